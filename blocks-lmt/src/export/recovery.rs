use crate::error::ExportError;
use crate::export::{Batch, DeliveryEngine, ExportRecord};
use crate::{lmt_debug, lmt_warn, Context, FutureContextExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Bounded FIFO of batches whose immediate retries were exhausted.
///
/// When full, the oldest batch is evicted to make room. Eviction loses that
/// telemetry and is reported as [`ExportError::RecoveryExhausted`] in the
/// internal logs.
#[derive(Debug)]
pub struct RecoveryQueue<R> {
    queue: Mutex<VecDeque<Batch<R>>>,
    capacity: usize,
    evicted: AtomicUsize,
}

/// Result of one pass over the recovery queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecoveryCycle {
    /// Batches sent again
    pub attempted: usize,
    /// Of those, delivered and removed
    pub delivered: usize,
    /// Batches still queued afterwards
    pub remaining: usize,
}

impl<R> RecoveryQueue<R> {
    /// An empty queue holding at most `capacity` batches (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        RecoveryQueue {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            evicted: AtomicUsize::new(0),
        }
    }

    /// Append a batch, evicting and returning the oldest one if the queue is
    /// full.
    pub fn push(&self, batch: Batch<R>) -> Option<Batch<R>> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let evicted = if queue.len() >= self.capacity {
            queue.pop_front()
        } else {
            None
        };
        queue.push_back(batch);
        drop(queue);
        if let Some(old) = &evicted {
            self.report_eviction(old);
        }
        evicted
    }

    /// Number of queued batches.
    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued batches.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Batches lost to eviction so far.
    pub fn evicted_count(&self) -> usize {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Remove every queued batch, oldest first.
    pub(crate) fn take_all(&self) -> Vec<Batch<R>> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    /// Put back batches taken by [`RecoveryQueue::take_all`] ahead of any
    /// pushed since, then evict from the front down to capacity.
    pub(crate) fn requeue_front(&self, failed: Vec<Batch<R>>) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        for batch in failed.into_iter().rev() {
            queue.push_front(batch);
        }
        let mut evicted = Vec::new();
        while queue.len() > self.capacity {
            if let Some(old) = queue.pop_front() {
                evicted.push(old);
            }
        }
        drop(queue);
        for old in &evicted {
            self.report_eviction(old);
        }
    }

    fn report_eviction(&self, batch: &Batch<R>) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
        let err = ExportError::RecoveryExhausted {
            stream: batch.stream(),
            records: batch.len(),
        };
        lmt_warn!(
            name: "RecoveryQueue.Evicted",
            attempts = batch.retry_state().attempts as u64,
            error = format!("{}", err)
        );
    }
}

/// Start the task that retries the engine's recovery queue every `interval`
/// until `shutdown` fires.
pub(crate) fn spawn_recovery_task<R: ExportRecord>(
    engine: Arc<DeliveryEngine<R>>,
    interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    let task = async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let cycle = engine.retry_recovery_queue().await;
                    if cycle.attempted > 0 {
                        lmt_debug!(
                            name: "RecoveryQueue.Cycle",
                            stream = R::STREAM.as_str(),
                            attempted = cycle.attempted as u64,
                            delivered = cycle.delivered as u64,
                            remaining = cycle.remaining as u64
                        );
                    }
                }
            }
        }
    };
    tokio::spawn(task.with_context(Context::new().with_telemetry_suppressed()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::StreamKind;

    fn batch(tag: u32) -> Batch<u32> {
        Batch::new(StreamKind::Logs, Arc::from("svc"), vec![tag])
    }

    fn tags(queue: &RecoveryQueue<u32>) -> Vec<u32> {
        let batches = queue.take_all();
        let tags = batches.iter().map(|b| b.records()[0]).collect();
        queue.requeue_front(batches);
        tags
    }

    #[test]
    fn full_queue_evicts_oldest_first() {
        let queue = RecoveryQueue::new(3);
        for tag in 0..3 {
            assert!(queue.push(batch(tag)).is_none());
        }
        let evicted = queue.push(batch(3)).unwrap();
        assert_eq!(evicted.records(), &[0]);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.evicted_count(), 1);
        assert_eq!(tags(&queue), vec![1, 2, 3]);
    }

    #[test]
    fn length_never_exceeds_capacity() {
        let queue = RecoveryQueue::new(5);
        for tag in 0..100 {
            queue.push(batch(tag));
            assert!(queue.len() <= 5);
        }
        assert_eq!(queue.evicted_count(), 95);
        assert_eq!(tags(&queue), vec![95, 96, 97, 98, 99]);
    }

    #[test]
    fn requeued_batches_stay_ahead_of_newer_ones() {
        let queue = RecoveryQueue::new(3);
        queue.push(batch(1));
        queue.push(batch(2));
        let taken = queue.take_all();
        queue.push(batch(3));
        queue.push(batch(4));
        queue.requeue_front(taken);
        // 1, 2, 3, 4 over capacity 3: the oldest goes.
        assert_eq!(tags(&queue), vec![2, 3, 4]);
        assert_eq!(queue.evicted_count(), 1);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let queue = RecoveryQueue::new(0);
        queue.push(batch(1));
        assert_eq!(queue.push(batch(2)).unwrap().records(), &[1]);
        assert_eq!(queue.capacity(), 1);
    }
}
