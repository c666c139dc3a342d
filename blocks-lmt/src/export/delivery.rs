use crate::error::ExportResult;
use crate::export::{
    retry_with_exponential_backoff, Batch, ExportRecord, Message, RecoveryCycle, RecoveryQueue,
    RetryPolicy, Sink, MIN_TIMER_INTERVAL,
};
use crate::{lmt_debug, lmt_error, lmt_warn};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Final result of [`DeliveryEngine::deliver`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The sink accepted the batch.
    Delivered {
        /// Attempts it took
        attempts: usize,
    },
    /// Every attempt failed; the batch is in the recovery queue.
    Queued {
        /// Attempts made
        attempts: usize,
    },
    /// The batch could not be encoded and was dropped.
    Dropped,
}

/// Sends batches of one stream through the shared sink, retrying with
/// backoff and parking exhausted batches in a [`RecoveryQueue`].
pub struct DeliveryEngine<R> {
    sink: Arc<dyn Sink>,
    policy: RetryPolicy,
    recovery: RecoveryQueue<R>,
    recovery_interval: Duration,
    attempts: AtomicUsize,
    failed_attempts: AtomicUsize,
}

impl<R> fmt::Debug for DeliveryEngine<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryEngine")
            .field("sink", &self.sink)
            .field("policy", &self.policy)
            .field("recovery_interval", &self.recovery_interval)
            .finish()
    }
}

impl<R: ExportRecord> DeliveryEngine<R> {
    /// An engine with a recovery queue of `max_failed_batches` entries that
    /// is retried every `recovery_interval`.
    pub fn new(
        sink: Arc<dyn Sink>,
        policy: RetryPolicy,
        max_failed_batches: usize,
        recovery_interval: Duration,
    ) -> Self {
        DeliveryEngine {
            sink,
            policy,
            recovery: RecoveryQueue::new(max_failed_batches),
            recovery_interval: recovery_interval.max(MIN_TIMER_INTERVAL),
            attempts: AtomicUsize::new(0),
            failed_attempts: AtomicUsize::new(0),
        }
    }

    /// Batches waiting for the next recovery cycle.
    pub fn recovery_queue(&self) -> &RecoveryQueue<R> {
        &self.recovery
    }

    /// Time between recovery cycles.
    pub fn recovery_interval(&self) -> Duration {
        self.recovery_interval
    }

    /// Sink attempts made so far, successful or not.
    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Sink attempts that failed.
    pub fn failed_attempt_count(&self) -> usize {
        self.failed_attempts.load(Ordering::Relaxed)
    }

    async fn attempt(&self, message: &Message) -> ExportResult {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let result = self.sink.send(message).await;
        if result.is_err() {
            self.failed_attempts.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// One attempt: encode the batch and hand it to the sink.
    pub async fn send(&self, batch: &mut Batch<R>) -> ExportResult {
        let message = Message::from_batch(batch)?;
        batch.retry.record_attempt();
        self.attempt(&message).await
    }

    /// Send with retries. A batch that fails every attempt moves to the
    /// recovery queue instead of being dropped.
    pub async fn deliver(&self, mut batch: Batch<R>) -> DeliveryOutcome {
        if batch.is_empty() {
            return DeliveryOutcome::Delivered { attempts: 0 };
        }
        let message = match Message::from_batch(&batch) {
            Ok(message) => message,
            Err(err) => {
                lmt_error!(
                    name: "Delivery.EncodeFailed",
                    stream = R::STREAM.as_str(),
                    records = batch.len() as u64,
                    error = format!("{}", err)
                );
                return DeliveryOutcome::Dropped;
            }
        };

        let policy = &self.policy;
        let retry = &mut batch.retry;
        let result = retry_with_exponential_backoff(policy, R::STREAM.as_str(), |attempt| {
            retry.record_attempt();
            if attempt < policy.max_attempts {
                retry.schedule_after(policy.backoff(attempt));
            }
            self.attempt(&message)
        })
        .await;

        let attempts = batch.retry.attempts;
        match result {
            Ok(()) => {
                lmt_debug!(
                    name: "Delivery.Sent",
                    stream = R::STREAM.as_str(),
                    records = batch.len() as u64,
                    attempts = attempts as u64
                );
                DeliveryOutcome::Delivered { attempts }
            }
            Err(err) => {
                lmt_warn!(
                    name: "Delivery.RetriesExhausted",
                    stream = R::STREAM.as_str(),
                    records = batch.len() as u64,
                    attempts = attempts as u64,
                    error = format!("{}", err)
                );
                batch.retry.schedule_after(self.recovery_interval);
                self.recovery.push(batch);
                DeliveryOutcome::Queued { attempts }
            }
        }
    }

    /// Try every queued batch once, oldest first. Delivered batches leave the
    /// queue, failed ones stay for the next cycle.
    pub async fn retry_recovery_queue(&self) -> RecoveryCycle {
        let pending = self.recovery.take_all();
        let attempted = pending.len();
        let mut delivered = 0;
        let mut failed = Vec::new();

        for mut batch in pending {
            match self.send(&mut batch).await {
                Ok(()) => delivered += 1,
                Err(err) if err.is_transient() => {
                    batch.retry.schedule_after(self.recovery_interval);
                    failed.push(batch);
                }
                Err(err) => {
                    lmt_error!(
                        name: "RecoveryQueue.Dropped",
                        stream = R::STREAM.as_str(),
                        records = batch.len() as u64,
                        error = format!("{}", err)
                    );
                }
            }
        }
        self.recovery.requeue_front(failed);

        RecoveryCycle {
            attempted,
            delivered,
            remaining: self.recovery.len(),
        }
    }
}
