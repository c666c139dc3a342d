//! Activities: the in-flight side of a span.
//!
//! An [`Activity`] is the scoped form. Starting one makes it the current
//! activity of the calling thread, and dropping or stopping it restores the
//! previous one. A [`DetachedActivity`] is the same span without the thread
//! binding. It can cross `.await` points and threads, and its context is
//! attached to futures with [`FutureContextExt::with_context`].
//!
//! Both stop exactly once. Writes after the stop are ignored and
//! [`DetachedActivity::is_recording`] reports `false` from then on.
//!
//! [`FutureContextExt::with_context`]: crate::context::FutureContextExt::with_context
use crate::baggage::{Baggage, BaggageExt};
use crate::common::{Attributes, Key, KeyValue, Value};
use crate::context::ContextGuard;
use crate::lmt_debug;
use crate::trace::{SpanEvent, SpanId, SpanKind, SpanRecord, Status, TraceId, Tracer};
use crate::Context;
use std::borrow::Cow;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::SystemTime;

/// Mutable part of a span while it is running.
#[derive(Debug)]
struct SpanData {
    name: Cow<'static, str>,
    kind: SpanKind,
    start_time: SystemTime,
    attributes: Attributes,
    events: Vec<SpanEvent>,
    status: Status,
    baggage: Baggage,
}

/// Shared state of one span. Children keep a handle to the root of their
/// trace so root attribute lookups do not walk the parent chain.
pub(crate) struct SpanState {
    trace_id: TraceId,
    span_id: SpanId,
    parent_span_id: Option<SpanId>,
    root: Option<Arc<SpanState>>,
    tracer: Tracer,
    suppressed: bool,
    data: Mutex<Option<SpanData>>,
    // Attributes of a stopped root, still visible to its descendants.
    final_attributes: OnceLock<Attributes>,
    // Baggage at stop, still inherited by work running under this span.
    final_baggage: OnceLock<Baggage>,
}

impl fmt::Debug for SpanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanState")
            .field("trace_id", &self.trace_id)
            .field("span_id", &self.span_id)
            .field("parent_span_id", &self.parent_span_id)
            .field("recording", &self.is_recording())
            .finish()
    }
}

impl SpanState {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        tracer: Tracer,
        trace_id: TraceId,
        span_id: SpanId,
        parent: Option<Arc<SpanState>>,
        name: Cow<'static, str>,
        kind: SpanKind,
        baggage: Baggage,
        suppressed: bool,
    ) -> Arc<SpanState> {
        let parent_span_id = parent.as_ref().map(|p| p.span_id);
        let root = parent.map(|p| match &p.root {
            Some(root) => root.clone(),
            None => p,
        });
        Arc::new(SpanState {
            trace_id,
            span_id,
            parent_span_id,
            root,
            tracer,
            suppressed,
            data: Mutex::new(Some(SpanData {
                name,
                kind,
                start_time: SystemTime::now(),
                attributes: Attributes::new(),
                events: Vec::new(),
                status: Status::Unset,
                baggage,
            })),
            final_attributes: OnceLock::new(),
            final_baggage: OnceLock::new(),
        })
    }

    pub(crate) fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub(crate) fn span_id(&self) -> SpanId {
        self.span_id
    }

    pub(crate) fn is_recording(&self) -> bool {
        self.data
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Baggage of the span, frozen at stop.
    pub(crate) fn baggage(&self) -> Baggage {
        self.with_data_ref(|data| data.baggage.clone())
            .or_else(|| self.final_baggage.get().cloned())
            .unwrap_or_default()
    }

    fn baggage_item(&self, key: &str) -> Option<String> {
        match self.with_data_ref(|data| data.baggage.get(key).map(str::to_string)) {
            Some(value) => value,
            None => self.final_baggage.get()?.get(key).map(str::to_string),
        }
    }

    fn with_data_ref<T>(&self, f: impl FnOnce(&SpanData) -> T) -> Option<T> {
        self.data
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(f))
    }

    fn with_data<T>(&self, f: impl FnOnce(&mut SpanData) -> T) -> Option<T> {
        let result = self
            .data
            .lock()
            .ok()
            .and_then(|mut guard| guard.as_mut().map(f));
        if result.is_none() {
            lmt_debug!(
                name: "Activity.WriteAfterStop",
                span_id = format!("{}", self.span_id)
            );
        }
        result
    }

    fn root(&self) -> &SpanState {
        self.root.as_deref().unwrap_or(self)
    }

    fn attribute(&self, key: &str) -> Option<Value> {
        match self.with_data_ref(|data| data.attributes.get(key).cloned()) {
            Some(value) => value,
            None => self.final_attributes.get()?.get(key).cloned(),
        }
    }

    fn attributes(&self) -> Attributes {
        self.with_data_ref(|data| data.attributes.clone())
            .or_else(|| self.final_attributes.get().cloned())
            .unwrap_or_default()
    }

    fn set_attribute(&self, key: Key, value: Value) {
        self.with_data(|data| {
            data.attributes.insert(key, value);
        });
    }

    fn set_status(&self, status: Status) {
        self.with_data(|data| data.status = status);
    }

    fn mark_panicked(&self) {
        self.with_data(|data| {
            if !matches!(data.status, Status::Error { .. }) {
                data.status = Status::error("panicked");
            }
        });
    }

    /// Finish the span. Only the first call has an effect.
    pub(crate) fn end(&self) {
        let end_time = SystemTime::now();
        let data = match self.data.lock().ok().and_then(|mut guard| guard.take()) {
            Some(data) => data,
            None => return,
        };
        let provider = self.tracer.provider();
        if self.root.is_none() {
            let _ = self.final_attributes.set(data.attributes.clone());
        }
        if !data.baggage.is_empty() {
            let _ = self.final_baggage.set(data.baggage.clone());
        }
        let tenant_id = data
            .baggage
            .tenant_id()
            .unwrap_or(provider.default_tenant())
            .to_string();
        let status = match data.status {
            Status::Unset => Status::Ok,
            status => status,
        };
        let record = SpanRecord {
            trace_id: self.trace_id,
            span_id: self.span_id,
            parent_span_id: self.parent_span_id,
            name: data.name,
            kind: data.kind,
            source_name: Cow::Owned(self.tracer.name().to_string()),
            start_time: data.start_time,
            end_time,
            attributes: data.attributes,
            events: data.events,
            status,
            baggage: data.baggage,
            tenant_id,
            service_name: provider.service_name().clone(),
        };
        if !self.suppressed {
            provider.emit(record);
        }
    }
}

/// A running span that is not bound to the current thread.
///
/// Stopped on [`DetachedActivity::stop`] or when dropped. A drop during a
/// panic records an error status first.
pub struct DetachedActivity {
    state: Arc<SpanState>,
    context: Context,
}

impl fmt::Debug for DetachedActivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetachedActivity")
            .field("state", &self.state)
            .finish()
    }
}

impl DetachedActivity {
    pub(crate) fn new(state: Arc<SpanState>, parent_cx: &Context) -> Self {
        // The context's baggage now lives on the activity.
        let mut context = parent_cx.with_activity(state.clone());
        if !parent_cx.baggage().is_empty() {
            context = context.with_baggage(Baggage::new());
        }
        DetachedActivity { state, context }
    }

    /// Context with this activity as the current one.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Trace id, shared with every span of the flow.
    pub fn trace_id(&self) -> TraceId {
        self.state.trace_id
    }

    /// Span id.
    pub fn span_id(&self) -> SpanId {
        self.state.span_id
    }

    /// Span id of the parent, `None` for a root.
    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.state.parent_span_id
    }

    /// Whether the activity still accepts writes.
    pub fn is_recording(&self) -> bool {
        self.state.is_recording()
    }

    /// Set an attribute. Ignored after stop.
    pub fn set_property(&self, key: impl Into<Key>, value: impl Into<Value>) {
        self.state.set_attribute(key.into(), value.into());
    }

    /// Set several attributes. Ignored after stop.
    pub fn set_properties<I>(&self, properties: I)
    where
        I: IntoIterator<Item = KeyValue>,
    {
        self.state.with_data(|data| {
            for kv in properties {
                data.attributes.insert(kv.key, kv.value);
            }
        });
    }

    /// Read back an attribute of this activity.
    pub fn property(&self, key: &str) -> Option<Value> {
        self.state.attribute(key)
    }

    /// Record an event at the current time.
    pub fn add_event(&self, name: impl Into<Cow<'static, str>>, attributes: Vec<KeyValue>) {
        self.add_events([(name.into(), attributes)]);
    }

    /// Record several events, all stamped with the current time.
    pub fn add_events<I, N>(&self, events: I)
    where
        I: IntoIterator<Item = (N, Vec<KeyValue>)>,
        N: Into<Cow<'static, str>>,
    {
        let timestamp = SystemTime::now();
        self.state.with_data(|data| {
            data.events
                .extend(events.into_iter().map(|(name, attributes)| SpanEvent {
                    name: name.into(),
                    timestamp,
                    attributes,
                }));
        });
    }

    /// Set the status. The last call before stop wins.
    pub fn set_status(&self, status: Status) {
        self.state.set_status(status);
    }

    /// Shorthand for an error status with `description`.
    pub fn set_error(&self, description: impl Into<Cow<'static, str>>) {
        self.state.set_status(Status::error(description));
    }

    /// Set a baggage entry on this activity. Activities started from it
    /// afterwards inherit it, its parent and siblings do not.
    pub fn set_baggage(&self, key: impl Into<Key>, value: impl Into<String>) {
        let (key, value) = (key.into(), value.into());
        self.state.with_data(|data| {
            data.baggage.insert(key, value);
        });
    }

    /// Set several baggage entries.
    pub fn set_baggage_items<I, K, V>(&self, items: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Key>,
        V: Into<String>,
    {
        self.state.with_data(|data| {
            for (key, value) in items {
                data.baggage.insert(key, value);
            }
        });
    }

    /// Read a baggage entry. Still readable after stop.
    pub fn get_baggage(&self, key: &str) -> Option<String> {
        self.state.baggage_item(key)
    }

    /// Stop the activity. Later calls do nothing.
    pub fn stop(&self) {
        self.state.end();
    }
}

impl Drop for DetachedActivity {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.state.mark_panicked();
        }
        self.state.end();
    }
}

/// A running span that is the current activity of this thread.
///
/// Dereferences to [`DetachedActivity`] for reads and writes.
pub struct Activity {
    inner: DetachedActivity,
    guard: Option<ContextGuard>,
}

impl fmt::Debug for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activity")
            .field("state", &self.inner.state)
            .field("attached", &self.guard.is_some())
            .finish()
    }
}

impl Deref for Activity {
    type Target = DetachedActivity;

    fn deref(&self) -> &DetachedActivity {
        &self.inner
    }
}

impl Activity {
    pub(crate) fn attached(inner: DetachedActivity) -> Self {
        let guard = inner.context.clone().attach();
        Activity {
            inner,
            guard: Some(guard),
        }
    }

    /// Start an internal activity with the global tracer provider.
    pub fn start(name: impl Into<Cow<'static, str>>) -> Activity {
        crate::global::tracer("blocks.activity").start(name)
    }

    /// Stop the activity and restore the previously current one. Later calls
    /// do nothing.
    pub fn stop(&mut self) {
        self.inner.stop();
        self.guard.take();
    }

    fn with_current<T>(f: impl FnOnce(&SpanState) -> T) -> Option<T> {
        Context::map_current(|cx| cx.activity.as_deref().map(f))
    }

    /// Trace id of the current activity.
    pub fn current_trace_id() -> Option<TraceId> {
        Self::with_current(|state| state.trace_id)
    }

    /// Span id of the current activity.
    pub fn current_span_id() -> Option<SpanId> {
        Self::with_current(|state| state.span_id)
    }

    /// Set an attribute on the current activity, if any.
    pub fn set_current_property(key: impl Into<Key>, value: impl Into<Value>) {
        let (key, value) = (key.into(), value.into());
        Self::with_current(|state| state.set_attribute(key, value));
    }

    /// Set attributes on the current activity, if any.
    pub fn set_current_properties<I>(properties: I)
    where
        I: IntoIterator<Item = KeyValue>,
    {
        Self::with_current(|state| {
            state.with_data(|data| {
                for kv in properties {
                    data.attributes.insert(kv.key, kv.value);
                }
            })
        });
    }

    /// Set the status of the current activity, if any.
    pub fn set_current_status(status: Status) {
        Self::with_current(|state| state.set_status(status));
    }

    /// An attribute of the root activity of the current trace.
    pub fn root_attribute(key: &str) -> Option<Value> {
        Self::with_current(|state| state.root().attribute(key)).flatten()
    }

    /// All attributes of the root activity of the current trace.
    pub fn root_attributes() -> Attributes {
        Self::with_current(|state| state.root().attributes()).unwrap_or_default()
    }
}

impl Drop for Activity {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.inner.state.mark_panicked();
        }
        self.stop();
    }
}
