use crate::error::{ExportError, ExportResult, LmtError, LmtResult};
use crate::export::{ConnectionString, Message, RecordProcessor, Sink};
use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;

/// A [`Sink`] that keeps every delivered message in memory.
///
/// Clones share state, so a test can keep one handle and give the other to
/// the pipeline. Failures can be scripted with [`InMemorySink::fail_next`] and
/// [`InMemorySink::fail_always`].
///
/// # Example
///
/// ```
/// use blocks_lmt::testing::InMemorySink;
///
/// let sink = InMemorySink::default();
/// sink.fail_next(2);
/// assert!(sink.messages().is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemorySink {
    state: Arc<Mutex<SinkState>>,
}

#[derive(Debug, Default)]
struct SinkState {
    messages: Vec<Message>,
    attempts: Vec<Instant>,
    fail_next: usize,
    fail_always: bool,
    reject_connect: bool,
    topic: Option<String>,
    shut_down: bool,
}

impl InMemorySink {
    /// A sink whose `connect` fails, as a sink with a bad credential would.
    pub fn rejecting_connections() -> Self {
        let sink = InMemorySink::default();
        sink.lock().reject_connect = true;
        sink
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `count` sends.
    pub fn fail_next(&self, count: usize) {
        self.lock().fail_next = count;
    }

    /// Fail every send while `enabled`.
    pub fn fail_always(&self, enabled: bool) {
        self.lock().fail_always = enabled;
    }

    /// Messages accepted so far, in arrival order.
    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    /// Parsed bodies of the accepted messages.
    pub fn bodies(&self) -> Vec<serde_json::Value> {
        self.lock()
            .messages
            .iter()
            .filter_map(|m| serde_json::from_slice(&m.body).ok())
            .collect()
    }

    /// When each send was attempted, failed or not.
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.lock().attempts.clone()
    }

    /// Number of sends attempted.
    pub fn attempt_count(&self) -> usize {
        self.lock().attempts.len()
    }

    /// Topic passed to `connect`.
    pub fn topic(&self) -> Option<String> {
        self.lock().topic.clone()
    }

    /// Whether `shutdown` was called.
    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }

    /// Forget recorded messages and attempts.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.messages.clear();
        state.attempts.clear();
    }
}

impl Sink for InMemorySink {
    fn connect(&mut self, _connection: &ConnectionString, topic: &str) -> LmtResult<()> {
        let mut state = self.lock();
        if state.reject_connect {
            return Err(LmtError::Configuration(format!(
                "cannot open a sender for topic {}",
                topic
            )));
        }
        state.topic = Some(topic.to_string());
        Ok(())
    }

    fn send<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, ExportResult> {
        let result = {
            let mut state = self.lock();
            state.attempts.push(Instant::now());
            if state.fail_always {
                Err(ExportError::Transient("sink is failing".to_string()))
            } else if state.fail_next > 0 {
                state.fail_next -= 1;
                Err(ExportError::Transient("scripted failure".to_string()))
            } else {
                state.messages.push(message.clone());
                Ok(())
            }
        };
        Box::pin(std::future::ready(result))
    }

    fn shutdown(&self) -> LmtResult<()> {
        self.lock().shut_down = true;
        Ok(())
    }
}

/// A [`RecordProcessor`] that collects records instead of exporting them.
#[derive(Clone)]
pub struct InMemoryRecords<R> {
    records: Arc<Mutex<Vec<R>>>,
}

impl<R> Default for InMemoryRecords<R> {
    fn default() -> Self {
        InMemoryRecords {
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<R> fmt::Debug for InMemoryRecords<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRecords").finish_non_exhaustive()
    }
}

impl<R: Clone> InMemoryRecords<R> {
    /// Records collected so far, in emit order.
    pub fn records(&self) -> Vec<R> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<R: Send> RecordProcessor<R> for InMemoryRecords<R> {
    fn emit(&self, record: R) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}
