use crate::error::{LmtError, LmtResult};
use crate::export::{
    DeliveryEngine, EnqueueOutcome, ExportRecord, RecordBuffer, RecordProcessor, MIN_TIMER_INTERVAL,
};
use crate::export::recovery::spawn_recovery_task;
use crate::{lmt_debug, lmt_info, lmt_warn, Context, FutureContextExt};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

/// Default maximum records per batch.
pub(crate) const DEFAULT_BATCH_SIZE: usize = 100;
/// Default time between timer flushes.
pub(crate) const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
/// Default limit of buffered records per stream.
pub(crate) const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;

const CONTROL_CHANNEL_SIZE: usize = 64;

/// Batching settings of one stream.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchConfig {
    /// Records per batch; reaching it triggers a flush.
    pub batch_size: usize,
    /// Time between timer flushes.
    pub flush_interval: Duration,
    /// Buffered records beyond which new records are dropped.
    pub max_queue_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
        }
    }
}

#[derive(Debug)]
enum BatchMessage {
    /// At least one full batch is buffered.
    Drain,
    /// Drain everything and wait for in-flight deliveries.
    Flush(oneshot::Sender<()>),
    /// Flush, make a last recovery pass and stop.
    Shutdown(oneshot::Sender<()>),
}

/// Buffers the records of one stream and delivers them in batches from a
/// background task.
///
/// Producers only ever touch the buffer lock and a non-blocking channel send.
/// A flush happens when a full batch is buffered or when the flush timer
/// fires, whichever comes first; timer flushes also send partial batches.
/// Every batch is delivered on its own task, so a batch waiting out its
/// backoff never holds back the next one.
pub struct BatchExporter<R: ExportRecord> {
    buffer: Arc<RecordBuffer<R>>,
    engine: Arc<DeliveryEngine<R>>,
    message_sender: mpsc::Sender<BatchMessage>,
    // Set while a Drain message is pending, so producers send at most one.
    drain_message_sent: Arc<AtomicBool>,
    is_shutdown: AtomicBool,
    recovery_shutdown: Mutex<Option<oneshot::Sender<()>>>,
    timeout: Duration,
}

impl<R: ExportRecord> fmt::Debug for BatchExporter<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchExporter")
            .field("stream", &R::STREAM)
            .field("buffered", &self.buffer.len())
            .field("is_shutdown", &self.is_shutdown.load(Ordering::Relaxed))
            .finish()
    }
}

impl<R: ExportRecord> BatchExporter<R> {
    /// Start the flush worker and the recovery task of a stream.
    ///
    /// Must be called from within a tokio runtime. `timeout` bounds
    /// [`force_flush`](Self::force_flush) and [`shutdown`](Self::shutdown).
    pub fn new(
        service_name: Arc<str>,
        config: BatchConfig,
        engine: Arc<DeliveryEngine<R>>,
        timeout: Duration,
    ) -> Self {
        let buffer = Arc::new(RecordBuffer::new(
            R::STREAM,
            service_name,
            config.batch_size,
            config.max_queue_size,
        ));
        let (message_sender, message_receiver) = mpsc::channel(CONTROL_CHANNEL_SIZE);
        let drain_message_sent = Arc::new(AtomicBool::new(false));

        let (recovery_tx, recovery_rx) = oneshot::channel();
        spawn_recovery_task(engine.clone(), engine.recovery_interval(), recovery_rx);

        let worker = Worker {
            buffer: buffer.clone(),
            engine: engine.clone(),
            drain_message_sent: drain_message_sent.clone(),
            in_flight: JoinSet::new(),
        };
        tokio::spawn(
            worker
                .run(message_receiver, config.flush_interval.max(MIN_TIMER_INTERVAL))
                .with_context(Context::new().with_telemetry_suppressed()),
        );

        BatchExporter {
            buffer,
            engine,
            message_sender,
            drain_message_sent,
            is_shutdown: AtomicBool::new(false),
            recovery_shutdown: Mutex::new(Some(recovery_tx)),
            timeout,
        }
    }

    /// Buffer a record. Never blocks and never fails; a record refused by a
    /// full buffer or offered after shutdown is dropped and logged.
    pub fn enqueue(&self, record: R) -> EnqueueOutcome {
        if self.is_shutdown.load(Ordering::Relaxed) {
            lmt_warn!(
                name: "BatchExporter.Emit.AfterShutdown",
                stream = R::STREAM.as_str()
            );
            return EnqueueOutcome::Dropped;
        }

        let outcome = self.buffer.enqueue(record);
        match outcome {
            EnqueueOutcome::BatchReady => {
                if !self.drain_message_sent.swap(true, Ordering::AcqRel)
                    && self.message_sender.try_send(BatchMessage::Drain).is_err()
                {
                    // The next timer flush picks the records up.
                    self.drain_message_sent.store(false, Ordering::Release);
                }
            }
            EnqueueOutcome::Dropped => {
                if self.buffer.dropped_count() == 1 {
                    lmt_warn!(
                        name: "BatchExporter.RecordDroppingStarted",
                        stream = R::STREAM.as_str(),
                        message = "buffer is full, records are being dropped"
                    );
                }
            }
            EnqueueOutcome::Buffered => {}
        }
        outcome
    }

    /// The stream's pending records.
    pub fn buffer(&self) -> &RecordBuffer<R> {
        &self.buffer
    }

    /// The engine delivering this stream.
    pub fn delivery_engine(&self) -> &DeliveryEngine<R> {
        &self.engine
    }

    /// Records dropped because the buffer was full.
    pub fn dropped_count(&self) -> usize {
        self.buffer.dropped_count()
    }

    /// Deliver everything buffered and wait for all in-flight deliveries.
    pub async fn force_flush(&self) -> LmtResult<()> {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return Err(LmtError::AlreadyShutdown);
        }
        let (sender, receiver) = oneshot::channel();
        self.message_sender
            .send(BatchMessage::Flush(sender))
            .await
            .map_err(|_| LmtError::InternalFailure("flush worker is gone".into()))?;
        self.wait(receiver).await
    }

    /// Flush, stop the worker and the recovery task. Records arriving
    /// afterwards are dropped.
    pub async fn shutdown(&self) -> LmtResult<()> {
        if self.is_shutdown.swap(true, Ordering::AcqRel) {
            return Err(LmtError::AlreadyShutdown);
        }

        let dropped = self.buffer.dropped_count();
        if dropped > 0 {
            lmt_warn!(
                name: "BatchExporter.RecordsDropped",
                stream = R::STREAM.as_str(),
                dropped_count = dropped as u64,
                message = "records were dropped because the buffer was full"
            );
        }

        if let Some(recovery) = self
            .recovery_shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = recovery.send(());
        }

        let (sender, receiver) = oneshot::channel();
        self.message_sender
            .send(BatchMessage::Shutdown(sender))
            .await
            .map_err(|_| LmtError::InternalFailure("flush worker is gone".into()))?;
        let result = self.wait(receiver).await;

        let queued = self.engine.recovery_queue().len();
        if queued > 0 {
            lmt_warn!(
                name: "BatchExporter.Shutdown.RecoveryQueueNotEmpty",
                stream = R::STREAM.as_str(),
                queued_batches = queued as u64
            );
        }
        result
    }

    async fn wait(&self, receiver: oneshot::Receiver<()>) -> LmtResult<()> {
        match tokio::time::timeout(self.timeout, receiver).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(LmtError::InternalFailure(
                "flush worker stopped before replying".into(),
            )),
            Err(_) => Err(LmtError::Timeout(self.timeout)),
        }
    }
}

impl<R: ExportRecord> RecordProcessor<R> for BatchExporter<R> {
    fn emit(&self, record: R) {
        let _ = self.enqueue(record);
    }
}

struct Worker<R: ExportRecord> {
    buffer: Arc<RecordBuffer<R>>,
    engine: Arc<DeliveryEngine<R>>,
    drain_message_sent: Arc<AtomicBool>,
    in_flight: JoinSet<()>,
}

impl<R: ExportRecord> Worker<R> {
    async fn run(mut self, mut messages: mpsc::Receiver<BatchMessage>, flush_interval: Duration) {
        let start = tokio::time::Instant::now() + flush_interval;
        let mut ticker = tokio::time::interval_at(start, flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        lmt_debug!(
            name: "BatchExporter.WorkerStarted",
            stream = R::STREAM.as_str(),
            batch_size = self.buffer.batch_size() as u64,
            flush_interval_ms = flush_interval.as_millis() as u64
        );

        loop {
            tokio::select! {
                message = messages.recv() => match message {
                    Some(BatchMessage::Drain) => {
                        self.drain_message_sent.store(false, Ordering::Release);
                        lmt_debug!(name: "BatchExporter.ExportingDueToBatchSize", stream = R::STREAM.as_str());
                        while self.buffer.has_full_batch() {
                            self.dispatch_one();
                        }
                    }
                    Some(BatchMessage::Flush(reply)) => {
                        lmt_debug!(name: "BatchExporter.ExportingDueToForceFlush", stream = R::STREAM.as_str());
                        self.dispatch_all();
                        self.wait_in_flight().await;
                        let _ = reply.send(());
                    }
                    Some(BatchMessage::Shutdown(reply)) => {
                        lmt_debug!(name: "BatchExporter.ExportingDueToShutdown", stream = R::STREAM.as_str());
                        self.dispatch_all();
                        self.wait_in_flight().await;
                        let cycle = self.engine.retry_recovery_queue().await;
                        if cycle.attempted > 0 {
                            lmt_info!(
                                name: "BatchExporter.Shutdown.RecoveryPass",
                                stream = R::STREAM.as_str(),
                                delivered = cycle.delivered as u64,
                                remaining = cycle.remaining as u64
                            );
                        }
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.dispatch_all();
                        self.wait_in_flight().await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if !self.buffer.is_empty() {
                        lmt_debug!(name: "BatchExporter.ExportingDueToTimer", stream = R::STREAM.as_str());
                        self.dispatch_all();
                    }
                },
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    if let Err(err) = joined {
                        lmt_warn!(
                            name: "BatchExporter.DeliveryTaskFailed",
                            stream = R::STREAM.as_str(),
                            error = format!("{}", err)
                        );
                    }
                }
            }
        }

        lmt_debug!(name: "BatchExporter.WorkerStopped", stream = R::STREAM.as_str());
    }

    fn dispatch_one(&mut self) -> bool {
        let Some(batch) = self.buffer.drain() else {
            return false;
        };
        let engine = self.engine.clone();
        self.in_flight.spawn(
            async move {
                let _ = engine.deliver(batch).await;
            }
            .with_context(Context::new().with_telemetry_suppressed()),
        );
        true
    }

    fn dispatch_all(&mut self) {
        while self.dispatch_one() {}
    }

    async fn wait_in_flight(&mut self) {
        while self.in_flight.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baggage::TENANT_ID_KEY;
    use crate::export::RetryPolicy;
    use crate::logs::{LogRecord, Severity};
    use crate::testing::InMemorySink;

    fn exporter(sink: &InMemorySink, config: BatchConfig) -> BatchExporter<LogRecord> {
        let engine = Arc::new(DeliveryEngine::new(
            Arc::new(sink.clone()),
            RetryPolicy::default(),
            10,
            Duration::from_secs(30),
        ));
        BatchExporter::new(Arc::from("svc"), config, engine, Duration::from_secs(5))
    }

    fn record(message: &'static str, tenant: &str) -> LogRecord {
        let mut record = LogRecord::new(Severity::Info, message);
        record.tenant_id = tenant.to_string();
        record
    }

    fn messages_of(body: &serde_json::Value) -> Vec<String> {
        body["Data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["Message"].as_str().unwrap().to_string())
            .collect()
    }

    async fn wait_for_messages(sink: &InMemorySink, count: usize) {
        for _ in 0..200 {
            if sink.messages().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn full_batch_is_sent_without_waiting_for_the_timer() {
        let sink = InMemorySink::default();
        let exporter = exporter(
            &sink,
            BatchConfig {
                batch_size: 2,
                flush_interval: Duration::from_secs(60),
                ..BatchConfig::default()
            },
        );

        exporter.emit(record("A", "t1"));
        exporter.emit(record("B", "t1"));
        wait_for_messages(&sink, 1).await;

        let bodies = sink.bodies();
        assert_eq!(bodies.len(), 1);
        assert_eq!(messages_of(&bodies[0]), vec!["A", "B"]);
        assert_eq!(bodies[0]["Data"][0][TENANT_ID_KEY], "t1");
        assert!(exporter.buffer().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_flushes_a_partial_batch() {
        let sink = InMemorySink::default();
        let exporter = exporter(&sink, BatchConfig::default());

        exporter.emit(record("only", "t1"));
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(sink.messages().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let bodies = sink.bodies();
        assert_eq!(bodies.len(), 1);
        assert_eq!(messages_of(&bodies[0]), vec!["only"]);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_intervals_are_clamped_and_the_tasks_keep_running() {
        let sink = InMemorySink::default();
        let engine = Arc::new(DeliveryEngine::new(
            Arc::new(sink.clone()),
            RetryPolicy::default(),
            10,
            Duration::ZERO,
        ));
        assert_eq!(engine.recovery_interval(), MIN_TIMER_INTERVAL);
        let exporter = BatchExporter::new(
            Arc::from("svc"),
            BatchConfig {
                flush_interval: Duration::ZERO,
                ..BatchConfig::default()
            },
            engine,
            Duration::from_secs(5),
        );

        exporter.emit(record("tick", "t1"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sink.messages().len(), 1);

        exporter.emit(record("last", "t1"));
        exporter.shutdown().await.unwrap();
        assert_eq!(sink.messages().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn force_flush_delivers_everything_buffered() {
        let sink = InMemorySink::default();
        let exporter = exporter(
            &sink,
            BatchConfig {
                batch_size: 3,
                flush_interval: Duration::from_secs(60),
                ..BatchConfig::default()
            },
        );
        for message in ["1", "2", "3", "4"] {
            exporter.emit(record(message, "t1"));
        }

        exporter.force_flush().await.unwrap();

        let delivered: Vec<String> = sink.bodies().iter().flat_map(messages_of).collect();
        assert_eq!(delivered, vec!["1", "2", "3", "4"]);
        assert!(exporter.buffer().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_and_rejects_later_records() {
        let sink = InMemorySink::default();
        let exporter = exporter(
            &sink,
            BatchConfig {
                flush_interval: Duration::from_secs(60),
                ..BatchConfig::default()
            },
        );
        exporter.emit(record("before", "t1"));

        exporter.shutdown().await.unwrap();
        assert_eq!(sink.messages().len(), 1);

        assert_eq!(exporter.enqueue(record("after", "t1")), EnqueueOutcome::Dropped);
        assert!(matches!(
            exporter.shutdown().await,
            Err(LmtError::AlreadyShutdown)
        ));
        assert!(matches!(
            exporter.force_flush().await,
            Err(LmtError::AlreadyShutdown)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn full_buffer_drops_records_instead_of_blocking() {
        let sink = InMemorySink::default();
        let exporter = exporter(
            &sink,
            BatchConfig {
                batch_size: 100,
                flush_interval: Duration::from_secs(60),
                max_queue_size: 150,
            },
        );
        // The worker does not run between these calls on a single-threaded
        // runtime, so the buffer fills up.
        for _ in 0..200 {
            exporter.emit(record("x", "t1"));
        }
        assert_eq!(exporter.dropped_count(), 50);

        exporter.shutdown().await.unwrap();
        let delivered: usize = sink.messages().iter().map(|m| m.record_count).sum();
        assert_eq!(delivered, 150);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_failing_every_attempt_lands_in_recovery() {
        let sink = InMemorySink::default();
        sink.fail_always(true);
        let exporter = exporter(
            &sink,
            BatchConfig {
                batch_size: 1,
                flush_interval: Duration::from_secs(60),
                ..BatchConfig::default()
            },
        );
        exporter.emit(record("lost?", "t1"));

        // Three attempts with 1 s and 2 s waits in between.
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(sink.attempt_count(), 3);
        assert_eq!(exporter.delivery_engine().recovery_queue().len(), 1);

        sink.fail_always(false);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(exporter.delivery_engine().recovery_queue().is_empty());
        assert_eq!(sink.messages().len(), 1);
    }
}
