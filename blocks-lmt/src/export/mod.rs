//! Batching, delivery and recovery of finished records.
//!
//! Each stream (logs, traces) has its own [`BatchExporter`]: producers push
//! into a [`RecordBuffer`], a worker task drains it on a size signal or on the
//! flush timer, and every batch is handed to the [`DeliveryEngine`] on its own
//! task. Batches that exhaust their retries go to the stream's
//! [`RecoveryQueue`], which a separate task retries on a fixed cadence.
use std::fmt;
use std::time::Duration;

mod batch;
mod batch_exporter;
mod buffer;
mod delivery;
mod recovery;
mod retry;
mod sink;
mod wire;

pub use batch::{Batch, RetryState};
pub use batch_exporter::{BatchConfig, BatchExporter};
pub use buffer::{EnqueueOutcome, RecordBuffer};
pub use delivery::{DeliveryEngine, DeliveryOutcome};
pub use recovery::{RecoveryCycle, RecoveryQueue};
pub use retry::{retry_with_exponential_backoff, RetryPolicy};
pub use sink::{ConnectionString, Sink};
pub use wire::{ExportRecord, Message, CONTENT_TYPE};

// Shortest period accepted for the flush and recovery timers.
pub(crate) const MIN_TIMER_INTERVAL: Duration = Duration::from_millis(1);

/// The two independent telemetry streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Log records
    Logs,
    /// Finished spans
    Traces,
}

impl StreamKind {
    /// Value of the envelope's `Type` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Logs => "logs",
            StreamKind::Traces => "traces",
        }
    }

    /// Correlation id attached to every message of the stream.
    pub fn correlation_id(&self) -> &'static str {
        match self {
            StreamKind::Logs => "blocks-lmt-service-logs",
            StreamKind::Traces => "blocks-lmt-service-traces",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives finished records from loggers and tracers.
///
/// Implementations must return quickly and never block on delivery.
pub trait RecordProcessor<R>: Send + Sync + fmt::Debug {
    /// Take ownership of a finished record.
    fn emit(&self, record: R);
}
