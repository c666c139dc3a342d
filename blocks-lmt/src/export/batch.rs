use crate::export::StreamKind;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Delivery history of a batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RetryState {
    /// Attempts made so far, across the delivery engine and recovery queue
    pub attempts: usize,
    /// When the last attempt started
    pub last_attempt: Option<SystemTime>,
    /// Earliest time the next attempt is scheduled for
    pub next_eligible: Option<SystemTime>,
}

impl RetryState {
    pub(crate) fn record_attempt(&mut self) {
        self.attempts += 1;
        self.last_attempt = Some(SystemTime::now());
        self.next_eligible = None;
    }

    pub(crate) fn schedule_after(&mut self, delay: Duration) {
        self.next_eligible = Some(SystemTime::now() + delay);
    }
}

/// An ordered group of records of one stream, delivered as one message.
#[derive(Debug)]
pub struct Batch<R> {
    records: Vec<R>,
    stream: StreamKind,
    service_name: Arc<str>,
    pub(crate) retry: RetryState,
}

impl<R> Batch<R> {
    /// A new batch that has not been attempted yet.
    pub fn new(stream: StreamKind, service_name: Arc<str>, records: Vec<R>) -> Self {
        Batch {
            records,
            stream,
            service_name,
            retry: RetryState::default(),
        }
    }

    /// Records in enqueue order.
    pub fn records(&self) -> &[R] {
        &self.records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Stream the batch belongs to.
    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    /// Service that produced the records.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Delivery history.
    pub fn retry_state(&self) -> &RetryState {
        &self.retry
    }

    /// Take the records out.
    pub fn into_records(self) -> Vec<R> {
        self.records
    }
}
