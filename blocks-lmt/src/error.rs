//! Error types shared by the pipeline.
use crate::export::StreamKind;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to the code that configures or shuts down the pipeline.
///
/// Producer-facing operations never return these; they log and continue.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LmtError {
    /// Invalid settings or an unusable connection detected at setup time.
    /// Never retried.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The pipeline was already shut down.
    #[error("pipeline is already shut down")]
    AlreadyShutdown,

    /// A flush or shutdown did not finish before its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Background worker is gone or a lock could not be taken.
    #[error("internal failure: {0}")]
    InternalFailure(String),

    /// A delivery failure that reached a caller.
    #[error(transparent)]
    Export(#[from] ExportError),
}

/// Failures of a single delivery attempt, or of a batch as a whole.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ExportError {
    /// The sink failed to accept the message. Retried with backoff.
    #[error("transient send failure: {0}")]
    Transient(String),

    /// The batch could not be turned into a wire message.
    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),

    /// A batch was evicted from a full recovery queue and is lost.
    #[error("recovery queue full, dropped a {stream} batch of {records} records")]
    RecoveryExhausted {
        /// Stream the batch belonged to.
        stream: StreamKind,
        /// Number of records lost with it.
        records: usize,
    },
}

impl ExportError {
    /// Whether another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExportError::Transient(_))
    }
}

/// Result of pipeline management operations.
pub type LmtResult<T> = Result<T, LmtError>;

/// Result of one sink attempt.
pub type ExportResult = Result<(), ExportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_the_only_retryable_kind() {
        assert!(ExportError::Transient("socket closed".into()).is_transient());
        let evicted = ExportError::RecoveryExhausted {
            stream: StreamKind::Logs,
            records: 3,
        };
        assert!(!evicted.is_transient());
        assert_eq!(
            evicted.to_string(),
            "recovery queue full, dropped a logs batch of 3 records"
        );
    }

    #[test]
    fn export_errors_convert_into_pipeline_errors() {
        let err: LmtError = ExportError::Transient("busy".into()).into();
        assert!(matches!(err, LmtError::Export(ExportError::Transient(_))));
        assert_eq!(err.to_string(), "transient send failure: busy");
    }
}
