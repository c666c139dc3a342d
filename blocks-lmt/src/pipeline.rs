//! Wiring of providers, exporters and the sink.
use crate::config::LmtConfig;
use crate::error::{LmtError, LmtResult};
use crate::export::{
    BatchExporter, DeliveryEngine, ExportRecord, RecordProcessor, Sink, StreamKind,
};
use crate::logs::{LogRecord, Logger, LoggerProvider};
use crate::trace::{IdGenerator, SpanRecord, Tracer, TracerProvider};
use crate::{lmt_debug, lmt_info};
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A running telemetry pipeline: one logs stream and one traces stream
/// delivered through a shared sink.
///
/// Cheap to clone; clones share the same exporters. Records still buffered
/// when the last clone is dropped are lost, so call
/// [`shutdown`](LmtPipeline::shutdown) before exiting.
#[derive(Clone)]
pub struct LmtPipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    config: LmtConfig,
    sink: Arc<dyn Sink>,
    logs: Arc<BatchExporter<LogRecord>>,
    traces: Arc<BatchExporter<SpanRecord>>,
    tracer_provider: TracerProvider,
    logger_provider: LoggerProvider,
    is_shutdown: AtomicBool,
}

impl fmt::Debug for LmtPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LmtPipeline")
            .field("service_id", &self.inner.config.service_id())
            .field("sink", &self.inner.sink)
            .field("logs", &self.inner.logs)
            .field("traces", &self.inner.traces)
            .finish()
    }
}

impl LmtPipeline {
    /// A builder for a pipeline with `config`.
    pub fn builder(config: LmtConfig) -> LmtPipelineBuilder {
        LmtPipelineBuilder {
            config,
            sink: None,
            id_generator: None,
        }
    }

    /// Settings the pipeline was built with.
    pub fn config(&self) -> &LmtConfig {
        &self.inner.config
    }

    /// Provider whose tracers export through this pipeline.
    pub fn tracer_provider(&self) -> &TracerProvider {
        &self.inner.tracer_provider
    }

    /// Provider whose loggers export through this pipeline.
    pub fn logger_provider(&self) -> &LoggerProvider {
        &self.inner.logger_provider
    }

    /// Shorthand for `tracer_provider().tracer(name)`.
    pub fn tracer(&self, name: impl Into<Cow<'static, str>>) -> Tracer {
        self.inner.tracer_provider.tracer(name)
    }

    /// Shorthand for `logger_provider().logger(name)`.
    pub fn logger(&self, name: impl Into<Cow<'static, str>>) -> Logger {
        self.inner.logger_provider.logger(name)
    }

    /// Exporter of the logs stream.
    pub fn logs_exporter(&self) -> &BatchExporter<LogRecord> {
        &self.inner.logs
    }

    /// Exporter of the traces stream.
    pub fn traces_exporter(&self) -> &BatchExporter<SpanRecord> {
        &self.inner.traces
    }

    /// Deliver everything buffered on both streams.
    pub async fn force_flush(&self) -> LmtResult<()> {
        if self.inner.is_shutdown.load(Ordering::Relaxed) {
            return Err(LmtError::AlreadyShutdown);
        }
        let (logs, traces) =
            tokio::join!(self.inner.logs.force_flush(), self.inner.traces.force_flush());
        logs.and(traces)
    }

    /// Flush and stop both streams, then close the sink.
    ///
    /// Returns the first error met; the sink is closed either way.
    pub async fn shutdown(&self) -> LmtResult<()> {
        if self.inner.is_shutdown.swap(true, Ordering::AcqRel) {
            return Err(LmtError::AlreadyShutdown);
        }
        let (logs, traces) =
            tokio::join!(self.inner.logs.shutdown(), self.inner.traces.shutdown());
        let sink = self.inner.sink.shutdown();
        lmt_info!(
            name: "Pipeline.Shutdown",
            service_id = self.inner.config.service_id().to_string(),
            logs_dropped = self.inner.logs.dropped_count() as u64,
            traces_dropped = self.inner.traces.dropped_count() as u64
        );
        logs.and(traces).and(sink)
    }
}

/// Builder of [`LmtPipeline`].
pub struct LmtPipelineBuilder {
    config: LmtConfig,
    sink: Option<Box<dyn Sink>>,
    id_generator: Option<Box<dyn IdGenerator>>,
}

impl fmt::Debug for LmtPipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LmtPipelineBuilder")
            .field("config", &self.config)
            .field("sink", &self.sink)
            .finish()
    }
}

impl LmtPipelineBuilder {
    /// Transport for both streams. Required.
    pub fn with_sink<S: Sink + 'static>(mut self, sink: S) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Replace the random trace and span id generator.
    pub fn with_id_generator<T: IdGenerator + 'static>(mut self, id_generator: T) -> Self {
        self.id_generator = Some(Box::new(id_generator));
        self
    }

    /// Connect the sink and start the background tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> LmtResult<LmtPipeline> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(LmtError::Configuration(
                "the pipeline must be built inside a tokio runtime".to_string(),
            ));
        }
        let mut sink = self
            .sink
            .ok_or_else(|| LmtError::Configuration("no sink configured".to_string()))?;
        let topic = self.config.topic();
        sink.connect(self.config.connection_string(), &topic)?;
        let sink: Arc<dyn Sink> = Arc::from(sink);
        lmt_debug!(name: "Pipeline.SinkConnected", topic = topic.clone());

        let config = self.config;
        let service_name: Arc<str> = Arc::from(config.service_id());
        let logs = Arc::new(exporter::<LogRecord>(&config, &sink, service_name.clone()));
        let traces = Arc::new(exporter::<SpanRecord>(&config, &sink, service_name.clone()));

        let mut tracer_provider = TracerProvider::builder()
            .with_service_name(service_name.clone())
            .with_default_tenant(config.default_tenant())
            .with_processor(traces.clone());
        if let Some(id_generator) = self.id_generator {
            tracer_provider = tracer_provider.with_boxed_id_generator(id_generator);
        }
        let log_processor: Arc<dyn RecordProcessor<LogRecord>> = logs.clone();
        let logger_provider =
            LoggerProvider::new(service_name, config.default_tenant(), Some(log_processor));

        Ok(LmtPipeline {
            inner: Arc::new(PipelineInner {
                tracer_provider: tracer_provider.build(),
                logger_provider,
                config,
                sink,
                logs,
                traces,
                is_shutdown: AtomicBool::new(false),
            }),
        })
    }
}

fn exporter<R: ExportRecord>(
    config: &LmtConfig,
    sink: &Arc<dyn Sink>,
    service_name: Arc<str>,
) -> BatchExporter<R> {
    let engine = Arc::new(DeliveryEngine::new(
        sink.clone(),
        config.retry_policy(),
        config.max_failed_batches(),
        config.recovery_interval(),
    ));
    let batch_config = match R::STREAM {
        StreamKind::Logs => config.logs_batch_config(),
        StreamKind::Traces => config.traces_batch_config(),
    };
    BatchExporter::new(service_name, batch_config, engine, config.shutdown_timeout())
}
