use crate::trace::{SpanId, TraceId};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

/// Log level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Finest grained diagnostics
    Trace,
    /// Debugging
    Debug,
    /// Normal operation
    Info,
    /// Something unexpected that was handled
    Warning,
    /// A failed operation
    Error,
    /// The application cannot continue
    Critical,
}

impl Severity {
    /// Upper-case name used on the wire.
    pub const fn name(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A log entry.
///
/// Built with [`LogRecord::new`]; identity fields (tenant, service, trace and
/// span ids) are filled in by the [`Logger`](crate::logs::Logger) that emits it.
#[derive(Clone, Debug, PartialEq)]
pub struct LogRecord {
    /// When the record was created
    pub timestamp: SystemTime,
    /// Level
    pub severity: Severity,
    /// Formatted message
    pub message: Cow<'static, str>,
    /// Rendered error or exception, if any
    pub exception: Option<String>,
    /// Emitting component, defaults to the logger's name
    pub logger_name: Option<Cow<'static, str>>,
    /// Trace of the activity current at emit time
    pub trace_id: Option<TraceId>,
    /// Span of the activity current at emit time
    pub span_id: Option<SpanId>,
    /// Tenant the record is tagged with
    pub tenant_id: String,
    /// Service that produced the record
    pub service_name: Arc<str>,
}

impl LogRecord {
    /// A record stamped with the current time.
    pub fn new(severity: Severity, message: impl Into<Cow<'static, str>>) -> Self {
        LogRecord {
            timestamp: SystemTime::now(),
            severity,
            message: message.into(),
            exception: None,
            logger_name: None,
            trace_id: None,
            span_id: None,
            tenant_id: String::new(),
            service_name: Arc::from(""),
        }
    }

    /// Attach a rendered error.
    pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
        self.exception = Some(exception.into());
        self
    }

    /// Override the logger name.
    pub fn with_logger_name(mut self, logger_name: impl Into<Cow<'static, str>>) -> Self {
        self.logger_name = Some(logger_name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severities_order_from_trace_to_critical() {
        assert!(Severity::Trace < Severity::Debug);
        assert!(Severity::Warning < Severity::Error);
        assert_eq!(Severity::Warning.to_string(), "WARNING");
    }

    #[test]
    fn builder_sets_optional_fields() {
        let record = LogRecord::new(Severity::Error, "payment failed")
            .with_exception("timeout talking to gateway")
            .with_logger_name("payments");
        assert_eq!(record.exception.as_deref(), Some("timeout talking to gateway"));
        assert_eq!(record.logger_name.as_deref(), Some("payments"));
        assert!(record.trace_id.is_none());
    }
}
