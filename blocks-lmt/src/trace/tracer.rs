use crate::baggage::BaggageExt;
use crate::context::FutureContextExt;
use crate::export::RecordProcessor;
use crate::trace::{
    Activity, DetachedActivity, IdGenerator, RandomIdGenerator, SpanKind, SpanRecord, SpanState,
};
use crate::Context;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Tenant used when neither baggage nor configuration names one.
pub const DEFAULT_TENANT: &str = "miscellaneous";

/// Creates [`Tracer`]s that share a service identity and a span processor.
///
/// Cheap to clone. A provider without a processor produces activities that
/// are tracked in context but never exported.
#[derive(Clone)]
pub struct TracerProvider {
    inner: Arc<TracerProviderInner>,
}

struct TracerProviderInner {
    service_name: Arc<str>,
    default_tenant: String,
    id_generator: Box<dyn IdGenerator>,
    processor: Option<Arc<dyn RecordProcessor<SpanRecord>>>,
}

impl fmt::Debug for TracerProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracerProvider")
            .field("service_name", &self.inner.service_name)
            .field("default_tenant", &self.inner.default_tenant)
            .field("exporting", &self.inner.processor.is_some())
            .finish()
    }
}

impl Default for TracerProvider {
    fn default() -> Self {
        TracerProvider::builder().build()
    }
}

impl TracerProvider {
    /// A builder for a provider.
    pub fn builder() -> TracerProviderBuilder {
        TracerProviderBuilder::default()
    }

    /// A tracer whose spans carry `name` as their source name.
    pub fn tracer(&self, name: impl Into<Cow<'static, str>>) -> Tracer {
        Tracer {
            name: name.into(),
            provider: self.clone(),
        }
    }

    /// Service the spans are attributed to.
    pub fn service_name(&self) -> &Arc<str> {
        &self.inner.service_name
    }

    /// Tenant used when a flow carries no tenant baggage.
    pub fn default_tenant(&self) -> &str {
        &self.inner.default_tenant
    }

    pub(crate) fn emit(&self, record: SpanRecord) {
        if let Some(processor) = &self.inner.processor {
            processor.emit(record);
        }
    }
}

/// Builder for [`TracerProvider`].
#[derive(Default)]
pub struct TracerProviderBuilder {
    service_name: Option<Arc<str>>,
    default_tenant: Option<String>,
    id_generator: Option<Box<dyn IdGenerator>>,
    processor: Option<Arc<dyn RecordProcessor<SpanRecord>>>,
}

impl fmt::Debug for TracerProviderBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracerProviderBuilder")
            .field("service_name", &self.service_name)
            .field("default_tenant", &self.default_tenant)
            .finish()
    }
}

impl TracerProviderBuilder {
    /// Service the spans are attributed to.
    pub fn with_service_name(mut self, service_name: impl Into<Arc<str>>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    /// Tenant for flows without a tenant override. An empty key means
    /// [`DEFAULT_TENANT`].
    pub fn with_default_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.default_tenant = Some(tenant.into());
        self
    }

    /// Replace the random id generator.
    pub fn with_id_generator<T: IdGenerator + 'static>(mut self, id_generator: T) -> Self {
        self.id_generator = Some(Box::new(id_generator));
        self
    }

    pub(crate) fn with_boxed_id_generator(mut self, id_generator: Box<dyn IdGenerator>) -> Self {
        self.id_generator = Some(id_generator);
        self
    }

    /// Where finished spans go.
    pub fn with_processor(mut self, processor: Arc<dyn RecordProcessor<SpanRecord>>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Create the provider.
    pub fn build(self) -> TracerProvider {
        let default_tenant = match self.default_tenant {
            Some(tenant) if !tenant.is_empty() => tenant,
            _ => DEFAULT_TENANT.to_string(),
        };
        TracerProvider {
            inner: Arc::new(TracerProviderInner {
                service_name: self.service_name.unwrap_or_else(|| Arc::from("unknown_service")),
                default_tenant,
                id_generator: self
                    .id_generator
                    .unwrap_or_else(|| Box::new(RandomIdGenerator::default())),
                processor: self.processor,
            }),
        }
    }
}

/// Starts activities.
#[derive(Clone, Debug)]
pub struct Tracer {
    name: Cow<'static, str>,
    provider: TracerProvider,
}

impl Tracer {
    /// Source name stamped on every span of this tracer.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The provider this tracer belongs to.
    pub fn provider(&self) -> &TracerProvider {
        &self.provider
    }

    /// Start an internal activity as a child of the current one and make it
    /// current on this thread.
    pub fn start(&self, name: impl Into<Cow<'static, str>>) -> Activity {
        self.start_with_kind(name, SpanKind::Internal)
    }

    /// Like [`Tracer::start`] with an explicit kind.
    pub fn start_with_kind(&self, name: impl Into<Cow<'static, str>>, kind: SpanKind) -> Activity {
        let parent_cx = Context::current();
        Activity::attached(self.start_detached(name, kind, &parent_cx))
    }

    /// Start an activity as a child of `parent_cx` without touching the
    /// current context. The result can move between threads.
    pub fn start_detached(
        &self,
        name: impl Into<Cow<'static, str>>,
        kind: SpanKind,
        parent_cx: &Context,
    ) -> DetachedActivity {
        let (trace_id, parent) = match parent_cx.activity.as_ref() {
            Some(parent) => (parent.trace_id(), Some(parent.clone())),
            None => (self.provider.inner.id_generator.new_trace_id(), None),
        };
        let baggage = parent_cx.effective_baggage();
        let state = SpanState::new(
            self.clone(),
            trace_id,
            self.provider.inner.id_generator.new_span_id(),
            parent,
            name.into(),
            kind,
            baggage,
            parent_cx.is_telemetry_suppressed(),
        );
        DetachedActivity::new(state, parent_cx)
    }

    /// Start the root activity of a new trace. Baggage on `parent_cx` is kept,
    /// any activity on it is ignored.
    pub fn start_root(
        &self,
        name: impl Into<Cow<'static, str>>,
        kind: SpanKind,
        parent_cx: &Context,
    ) -> DetachedActivity {
        let mut root_cx = Context::new().with_baggage(parent_cx.effective_baggage());
        if parent_cx.is_telemetry_suppressed() {
            root_cx = root_cx.with_telemetry_suppressed();
        }
        self.start_detached(name, kind, &root_cx)
    }

    /// Run `future` inside a child activity of the caller's current one.
    ///
    /// The activity is current whenever the future is polled and is stopped
    /// when it completes or is dropped.
    pub async fn in_activity<F>(&self, name: impl Into<Cow<'static, str>>, future: F) -> F::Output
    where
        F: Future,
    {
        let activity = self.start_detached(name, SpanKind::Internal, &Context::current());
        let output = future.with_context(activity.context().clone()).await;
        activity.stop();
        output
    }

    /// Like [`Tracer::in_activity`], recording an `Err` output as an error
    /// status with the error's message.
    pub async fn in_activity_result<F, T, E>(
        &self,
        name: impl Into<Cow<'static, str>>,
        future: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let activity = self.start_detached(name, SpanKind::Internal, &Context::current());
        let output = future.with_context(activity.context().clone()).await;
        if let Err(err) = &output {
            activity.set_error(err.to_string());
        }
        activity.stop();
        output
    }

    /// Run `f` inside a child activity on this thread, recording an `Err`
    /// result as an error status.
    pub fn in_scope<T, E, F>(&self, name: impl Into<Cow<'static, str>>, f: F) -> Result<T, E>
    where
        F: FnOnce(&Activity) -> Result<T, E>,
        E: fmt::Display,
    {
        let mut activity = self.start(name);
        let result = f(&activity);
        if let Err(err) = &result {
            activity.set_error(err.to_string());
        }
        activity.stop();
        result
    }
}
