//! # Blocks LMT
//!
//! Logs and traces for multi-tenant services, batched per stream and
//! delivered to a message bus with retries and a bounded recovery queue.
//!
//! Producers never wait on delivery. Loggers and tracers hand finished
//! records to a per-stream [`BatchExporter`](export::BatchExporter); a
//! background task sends a batch when it is full or when the flush timer
//! fires. A batch that keeps failing is parked in a recovery queue and tried
//! again later; when that queue is full the oldest batch is dropped.
//!
//! Every record is tagged with the service id and a tenant id. The tenant
//! comes from the `TenantId` entry of the flow's baggage and falls back to the
//! configured tenant key, or `miscellaneous`.
//!
//! ## Getting started
//!
//! ```no_run
//! use blocks_lmt::export::{Message, Sink};
//! use blocks_lmt::logs::Severity;
//! use blocks_lmt::{BaggageExt, Context, FutureContextExt, LmtConfig, LmtPipeline};
//! use futures_util::future::BoxFuture;
//!
//! #[derive(Debug)]
//! struct StdoutSink;
//!
//! impl Sink for StdoutSink {
//!     fn send<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, blocks_lmt::error::ExportResult> {
//!         println!("{}", String::from_utf8_lossy(&message.body));
//!         Box::pin(std::future::ready(Ok(())))
//!     }
//! }
//!
//! # async fn run() -> blocks_lmt::error::LmtResult<()> {
//! let config = LmtConfig::builder()
//!     .with_service_id("orders")
//!     .with_connection_string("Endpoint=sb://bus.example.net/;SharedAccessSignature=sig")
//!     .build()?;
//! let pipeline = LmtPipeline::builder(config).with_sink(StdoutSink).build()?;
//!
//! let tracer = pipeline.tracer("checkout");
//! let logger = pipeline.logger("checkout");
//! tracer
//!     .in_activity("charge", async {
//!         logger.log(Severity::Info, "charging card");
//!     })
//!     .with_context(Context::current_with_tenant("tenant-1"))
//!     .await;
//!
//! pipeline.shutdown().await
//! # }
//! ```
//!
//! ## Crate feature flags
//!
//! * `internal-logs` (on by default): diagnostics of the pipeline itself are
//!   emitted as `tracing` events.
//! * `testing`: in-memory sink and record collectors.
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub(crate) mod internal_logging;

pub mod baggage;
mod common;
pub mod config;
mod context;
pub mod error;
pub mod export;
pub mod global;
pub mod instrumentation;
pub mod logs;
pub mod pipeline;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod trace;

pub use baggage::{Baggage, BaggageExt};
pub use common::{Attributes, Key, KeyValue, Value};
pub use config::{LmtConfig, LmtConfigBuilder};
pub use context::{Context, ContextGuard, FutureContextExt, WithContext};
pub use instrumentation::RequestInstrumentation;
pub use pipeline::{LmtPipeline, LmtPipelineBuilder};

#[doc(hidden)]
pub mod _private {
    #[cfg(feature = "internal-logs")]
    pub use tracing::{debug, error, info, warn};
}
