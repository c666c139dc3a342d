use crate::baggage::Baggage;
use crate::common::{Attributes, KeyValue};
use crate::trace::{SpanId, TraceId};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// The role a span plays in a trace.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SpanKind {
    /// Handles an inbound request.
    Server,
    /// Issues an outbound request.
    Client,
    /// Hands work to a broker.
    Producer,
    /// Receives work from a broker.
    Consumer,
    /// Work inside the application.
    #[default]
    Internal,
}

impl SpanKind {
    /// Upper-case name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Server => "SERVER",
            SpanKind::Client => "CLIENT",
            SpanKind::Producer => "PRODUCER",
            SpanKind::Consumer => "CONSUMER",
            SpanKind::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for SpanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the work a span represents.
///
/// `Unset` becomes `Ok` when the span is stopped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Status {
    /// Not set by the instrumentation yet.
    #[default]
    Unset,
    /// Completed without error.
    Ok,
    /// Failed.
    Error {
        /// What went wrong.
        description: Cow<'static, str>,
    },
}

impl Status {
    /// An error status with the given message.
    pub fn error(description: impl Into<Cow<'static, str>>) -> Self {
        Status::Error {
            description: description.into(),
        }
    }

    /// Upper-case name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Unset => "UNSET",
            Status::Ok => "OK",
            Status::Error { .. } => "ERROR",
        }
    }

    /// The error message, or an empty string.
    pub fn description(&self) -> &str {
        match self {
            Status::Error { description } => description,
            _ => "",
        }
    }
}

/// A timestamped annotation on a span.
#[derive(Clone, Debug, PartialEq)]
pub struct SpanEvent {
    /// Event name
    pub name: Cow<'static, str>,
    /// When it happened
    pub timestamp: SystemTime,
    /// Event attributes
    pub attributes: Vec<KeyValue>,
}

/// A finished span, ready to be exported.
#[derive(Clone, Debug, PartialEq)]
pub struct SpanRecord {
    /// Trace this span belongs to
    pub trace_id: TraceId,
    /// Id of this span
    pub span_id: SpanId,
    /// Parent span, `None` for the root of a trace
    pub parent_span_id: Option<SpanId>,
    /// Operation name
    pub name: Cow<'static, str>,
    /// Span kind
    pub kind: SpanKind,
    /// Name of the tracer that started the span
    pub source_name: Cow<'static, str>,
    /// Start time
    pub start_time: SystemTime,
    /// End time, fixed by the first stop
    pub end_time: SystemTime,
    /// Attributes
    pub attributes: Attributes,
    /// Events
    pub events: Vec<SpanEvent>,
    /// Final status, never `Unset`
    pub status: Status,
    /// Baggage at the time the span stopped
    pub baggage: Baggage,
    /// Tenant the span is tagged with
    pub tenant_id: String,
    /// Service that produced the span
    pub service_name: Arc<str>,
}

impl SpanRecord {
    /// Wall time between start and stop.
    pub fn duration(&self) -> Duration {
        self.end_time
            .duration_since(self.start_time)
            .unwrap_or_default()
    }

    /// Whether this is the root of its trace.
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(SpanKind::Server, "SERVER")]
    #[case(SpanKind::Client, "CLIENT")]
    #[case(SpanKind::Producer, "PRODUCER")]
    #[case(SpanKind::Consumer, "CONSUMER")]
    #[case(SpanKind::Internal, "INTERNAL")]
    fn span_kind_wire_names(#[case] kind: SpanKind, #[case] expected: &str) {
        assert_eq!(kind.to_string(), expected);
    }

    #[test]
    fn error_status_keeps_its_message() {
        let status = Status::error("boom");
        assert_eq!(status.as_str(), "ERROR");
        assert_eq!(status.description(), "boom");
        assert_eq!(Status::Ok.description(), "");
    }
}
