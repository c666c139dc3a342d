use crate::export::{Batch, StreamKind};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// What happened to an enqueued record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Buffered, below the batch size.
    Buffered,
    /// Buffered, and a full batch is now waiting.
    BatchReady,
    /// The buffer was at its limit and the record was dropped.
    Dropped,
}

/// Thread-safe accumulator of pending records for one stream.
///
/// Every drain takes the lock, so a timer drain and a size drain racing on the
/// same records cannot both get them.
#[derive(Debug)]
pub struct RecordBuffer<R> {
    records: Mutex<VecDeque<R>>,
    stream: StreamKind,
    service_name: Arc<str>,
    batch_size: usize,
    max_queue_size: usize,
    dropped: AtomicUsize,
}

impl<R> RecordBuffer<R> {
    /// A buffer producing batches of at most `batch_size` records and holding
    /// at most `max_queue_size` records.
    pub fn new(
        stream: StreamKind,
        service_name: Arc<str>,
        batch_size: usize,
        max_queue_size: usize,
    ) -> Self {
        let batch_size = batch_size.max(1);
        RecordBuffer {
            records: Mutex::new(VecDeque::with_capacity(batch_size)),
            stream,
            service_name,
            batch_size,
            max_queue_size: max_queue_size.max(batch_size),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Append a record. Never waits on anything but the buffer lock.
    pub fn enqueue(&self, record: R) -> EnqueueOutcome {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records.len() >= self.max_queue_size {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return EnqueueOutcome::Dropped;
        }
        records.push_back(record);
        if records.len() >= self.batch_size {
            EnqueueOutcome::BatchReady
        } else {
            EnqueueOutcome::Buffered
        }
    }

    /// Remove up to one batch worth of the oldest records, in enqueue order.
    /// Returns `None` when there is nothing buffered.
    pub fn drain(&self) -> Option<Batch<R>> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records.is_empty() {
            return None;
        }
        let count = records.len().min(self.batch_size);
        let drained: Vec<R> = records.drain(..count).collect();
        Some(Batch::new(self.stream, self.service_name.clone(), drained))
    }

    /// Whether at least a full batch is buffered.
    pub fn has_full_batch(&self) -> bool {
        self.len() >= self.batch_size
    }

    /// Number of buffered records.
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum records per batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Records refused because the buffer was full.
    pub fn dropped_count(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn buffer(batch_size: usize, max_queue_size: usize) -> RecordBuffer<u32> {
        RecordBuffer::new(StreamKind::Logs, Arc::from("svc"), batch_size, max_queue_size)
    }

    #[test]
    fn drain_returns_records_in_enqueue_order_and_empties_the_buffer() {
        let buffer = buffer(10, 100);
        for i in 0..7 {
            assert_eq!(buffer.enqueue(i), EnqueueOutcome::Buffered);
        }
        let batch = buffer.drain().unwrap();
        assert_eq!(batch.records(), &[0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(batch.stream(), StreamKind::Logs);
        assert_eq!(batch.service_name(), "svc");
        assert!(buffer.is_empty());
        assert!(buffer.drain().is_none());
    }

    #[test]
    fn reaching_batch_size_reports_a_ready_batch() {
        let buffer = buffer(2, 100);
        assert_eq!(buffer.enqueue(1), EnqueueOutcome::Buffered);
        assert_eq!(buffer.enqueue(2), EnqueueOutcome::BatchReady);
        assert!(buffer.has_full_batch());
    }

    #[test]
    fn drain_takes_at_most_one_batch() {
        let buffer = buffer(3, 100);
        for i in 0..8 {
            buffer.enqueue(i);
        }
        assert_eq!(buffer.drain().unwrap().records(), &[0, 1, 2]);
        assert_eq!(buffer.drain().unwrap().records(), &[3, 4, 5]);
        assert_eq!(buffer.drain().unwrap().records(), &[6, 7]);
        assert!(buffer.drain().is_none());
    }

    #[test]
    fn full_buffer_drops_and_counts() {
        let buffer = buffer(2, 4);
        for i in 0..6 {
            buffer.enqueue(i);
        }
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.dropped_count(), 2);
        assert_eq!(buffer.enqueue(9), EnqueueOutcome::Dropped);
    }

    #[test]
    fn concurrent_producers_and_drainers_lose_and_duplicate_nothing() {
        let buffer = Arc::new(buffer(16, 1_000_000));
        let producers: Vec<_> = (0..4u32)
            .map(|p| {
                let buffer = buffer.clone();
                thread::spawn(move || {
                    for i in 0..1000 {
                        buffer.enqueue(p * 10_000 + i);
                    }
                })
            })
            .collect();
        let drainers: Vec<_> = (0..2)
            .map(|_| {
                let buffer = buffer.clone();
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    for _ in 0..500 {
                        if let Some(batch) = buffer.drain() {
                            seen.extend(batch.into_records());
                        }
                    }
                    seen
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        let mut seen: Vec<u32> = drainers
            .into_iter()
            .flat_map(|d| d.join().unwrap())
            .collect();
        while let Some(batch) = buffer.drain() {
            seen.extend(batch.into_records());
        }
        assert_eq!(seen.len(), 4000);
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 4000);
    }
}
