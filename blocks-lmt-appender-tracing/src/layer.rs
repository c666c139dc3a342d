use blocks_lmt::logs::{LogRecord, Logger, LoggerProvider, Severity};
use blocks_lmt::Context;
use std::fmt::{self, Write};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context as LayerContext;
use tracing_subscriber::Layer;

const BRIDGE_LOGGER_NAME: &str = "blocks-lmt-appender-tracing";

/// Collects the fields of one event.
#[derive(Default)]
struct EventVisitor {
    message: String,
    exception: Option<String>,
    fields: String,
}

impl EventVisitor {
    fn record(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = value,
            "exception" | "error" => self.exception = Some(value),
            name if name.starts_with("log.") => {}
            name => {
                let _ = write!(self.fields, " {}={}", name, value);
            }
        }
    }

    fn into_message(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            let mut message = self.message;
            message.push_str(&self.fields);
            message.trim_start().to_string()
        }
    }
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.record(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record(field, format!("{:?}", value));
    }
}

/// A [`Layer`] turning `tracing` events into log records.
#[derive(Debug)]
pub struct BlocksLmtTracingBridge {
    logger: Logger,
}

impl BlocksLmtTracingBridge {
    /// A bridge emitting through loggers of `provider`.
    pub fn new(provider: &LoggerProvider) -> Self {
        BlocksLmtTracingBridge {
            logger: provider.logger(BRIDGE_LOGGER_NAME),
        }
    }
}

// Diagnostics of the core crate: its package name, or a module path inside it.
fn is_own_target(target: &str) -> bool {
    target == "blocks-lmt" || target == "blocks_lmt" || target.starts_with("blocks_lmt::")
}

fn severity_of(level: &Level) -> Severity {
    if *level == Level::TRACE {
        Severity::Trace
    } else if *level == Level::DEBUG {
        Severity::Debug
    } else if *level == Level::INFO {
        Severity::Info
    } else if *level == Level::WARN {
        Severity::Warning
    } else {
        Severity::Error
    }
}

impl<S: Subscriber> Layer<S> for BlocksLmtTracingBridge {
    fn on_event(&self, event: &Event<'_>, _ctx: LayerContext<'_, S>) {
        let meta = event.metadata();
        if is_own_target(meta.target()) || Context::is_current_telemetry_suppressed() {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);
        let exception = visitor.exception.take();

        let mut record =
            LogRecord::new(severity_of(meta.level()), visitor.into_message())
                .with_logger_name(meta.target());
        if let Some(exception) = exception {
            record = record.with_exception(exception);
        }
        self.logger.emit(record);
    }
}
