//! Process-wide providers.
//!
//! Until a provider is installed, [`tracer`] and [`logger`] hand out
//! producers whose activities are tracked in context but never exported and
//! whose log records are discarded.
use crate::logs::{Logger, LoggerProvider};
use crate::pipeline::LmtPipeline;
use crate::trace::{Tracer, TracerProvider};
use std::borrow::Cow;
use std::mem;
use std::sync::{OnceLock, PoisonError, RwLock};

fn global_tracer_provider() -> &'static RwLock<TracerProvider> {
    static GLOBAL_TRACER_PROVIDER: OnceLock<RwLock<TracerProvider>> = OnceLock::new();
    GLOBAL_TRACER_PROVIDER.get_or_init(|| RwLock::new(TracerProvider::default()))
}

fn global_logger_provider() -> &'static RwLock<LoggerProvider> {
    static GLOBAL_LOGGER_PROVIDER: OnceLock<RwLock<LoggerProvider>> = OnceLock::new();
    GLOBAL_LOGGER_PROVIDER.get_or_init(|| RwLock::new(LoggerProvider::default()))
}

/// The current global tracer provider.
pub fn tracer_provider() -> TracerProvider {
    global_tracer_provider()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// A tracer from the global provider.
pub fn tracer(name: impl Into<Cow<'static, str>>) -> Tracer {
    tracer_provider().tracer(name)
}

/// Install `provider` globally, returning the one it replaces.
pub fn set_tracer_provider(provider: TracerProvider) -> TracerProvider {
    let mut current = global_tracer_provider()
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    mem::replace(&mut *current, provider)
}

/// The current global logger provider.
pub fn logger_provider() -> LoggerProvider {
    global_logger_provider()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// A logger from the global provider.
pub fn logger(name: impl Into<Cow<'static, str>>) -> Logger {
    logger_provider().logger(name)
}

/// Install `provider` globally, returning the one it replaces.
pub fn set_logger_provider(provider: LoggerProvider) -> LoggerProvider {
    let mut current = global_logger_provider()
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    mem::replace(&mut *current, provider)
}

/// Install both providers of `pipeline` globally.
pub fn set_pipeline(pipeline: &LmtPipeline) {
    set_tracer_provider(pipeline.tracer_provider().clone());
    set_logger_provider(pipeline.logger_provider().clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::{LogRecord, Severity};
    use crate::testing::InMemoryRecords;
    use crate::trace::{Activity, SpanRecord};
    use std::sync::Arc;

    // Global state is shared by every test of the crate, so a single test
    // covers install and restore.
    #[test]
    fn installed_providers_serve_global_producers() {
        let spans = InMemoryRecords::<SpanRecord>::default();
        let logs = InMemoryRecords::<LogRecord>::default();
        let previous_tracer = set_tracer_provider(
            TracerProvider::builder()
                .with_service_name("global")
                .with_processor(Arc::new(spans.clone()))
                .build(),
        );
        let previous_logger = set_logger_provider(LoggerProvider::new(
            "global",
            "",
            Some(Arc::new(logs.clone())),
        ));

        {
            let _activity = Activity::start("global-op");
            logger("app").log(Severity::Info, "inside");
        }

        set_tracer_provider(previous_tracer);
        set_logger_provider(previous_logger);

        let finished = spans.records();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].name, "global-op");
        assert_eq!(finished[0].source_name, "blocks.activity");
        assert_eq!(&*finished[0].service_name, "global");

        let records = logs.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].span_id, Some(finished[0].span_id));
        assert_eq!(records[0].tenant_id, "miscellaneous");
    }
}
