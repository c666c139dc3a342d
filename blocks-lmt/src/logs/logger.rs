use crate::baggage::BaggageExt;
use crate::export::RecordProcessor;
use crate::logs::{LogRecord, Severity};
use crate::trace::DEFAULT_TENANT;
use crate::Context;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Creates [`Logger`]s that share a service identity and a log processor.
#[derive(Clone)]
pub struct LoggerProvider {
    inner: Arc<LoggerProviderInner>,
}

struct LoggerProviderInner {
    service_name: Arc<str>,
    default_tenant: String,
    processor: Option<Arc<dyn RecordProcessor<LogRecord>>>,
}

impl fmt::Debug for LoggerProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggerProvider")
            .field("service_name", &self.inner.service_name)
            .field("default_tenant", &self.inner.default_tenant)
            .field("exporting", &self.inner.processor.is_some())
            .finish()
    }
}

impl Default for LoggerProvider {
    fn default() -> Self {
        LoggerProvider::new("unknown_service", "", None)
    }
}

impl LoggerProvider {
    /// A provider for `service_name`. An empty `default_tenant` means
    /// [`DEFAULT_TENANT`]. Without a processor records are dropped.
    pub fn new(
        service_name: impl Into<Arc<str>>,
        default_tenant: impl Into<String>,
        processor: Option<Arc<dyn RecordProcessor<LogRecord>>>,
    ) -> Self {
        let default_tenant = default_tenant.into();
        LoggerProvider {
            inner: Arc::new(LoggerProviderInner {
                service_name: service_name.into(),
                default_tenant: if default_tenant.is_empty() {
                    DEFAULT_TENANT.to_string()
                } else {
                    default_tenant
                },
                processor,
            }),
        }
    }

    /// A logger whose records carry `name` unless they name themselves.
    pub fn logger(&self, name: impl Into<Cow<'static, str>>) -> Logger {
        Logger {
            name: name.into(),
            provider: self.clone(),
        }
    }

    /// Tenant used when a flow carries no tenant baggage.
    pub fn default_tenant(&self) -> &str {
        &self.inner.default_tenant
    }
}

/// Emits log records tagged with the identity of the current flow.
#[derive(Clone, Debug)]
pub struct Logger {
    name: Cow<'static, str>,
    provider: LoggerProvider,
}

impl Logger {
    /// Logger name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Emit a message at `severity`.
    pub fn log(&self, severity: Severity, message: impl Into<Cow<'static, str>>) {
        self.emit(LogRecord::new(severity, message));
    }

    /// Emit an error message with a rendered error attached.
    pub fn log_error(&self, message: impl Into<Cow<'static, str>>, error: &dyn fmt::Display) {
        self.emit(LogRecord::new(Severity::Error, message).with_exception(error.to_string()));
    }

    /// Stamp `record` with the service, the tenant and the ids of the current
    /// activity, then hand it to the processor. Never blocks on delivery.
    pub fn emit(&self, mut record: LogRecord) {
        let Some(processor) = &self.provider.inner.processor else {
            return;
        };
        let suppressed = Context::map_current(|cx| {
            if cx.is_telemetry_suppressed() {
                return true;
            }
            if let Some(activity) = &cx.activity {
                record.trace_id = Some(activity.trace_id());
                record.span_id = Some(activity.span_id());
            }
            record.tenant_id = cx
                .effective_baggage()
                .tenant_id()
                .unwrap_or(self.provider.inner.default_tenant.as_str())
                .to_string();
            false
        });
        if suppressed {
            return;
        }
        if record.logger_name.is_none() {
            record.logger_name = Some(self.name.clone());
        }
        record.service_name = self.provider.inner.service_name.clone();
        processor.emit(record);
    }
}
