//! # Blocks LMT tracing appender
//!
//! Forwards [`tracing`](https://docs.rs/tracing) events into a `blocks_lmt`
//! [`Logger`](blocks_lmt::logs::Logger), so applications that already log with
//! `tracing` get their events batched, tagged with tenant and activity ids,
//! and delivered with the rest of their telemetry.
//!
//! The bridge is a [`Layer`](tracing_subscriber::Layer) and composes with any
//! other layer, such as `fmt`.
//!
//! ```no_run
//! use blocks_lmt_appender_tracing::BlocksLmtTracingBridge;
//! use tracing_subscriber::prelude::*;
//!
//! # fn setup(pipeline: &blocks_lmt::LmtPipeline) {
//! let bridge = BlocksLmtTracingBridge::new(pipeline.logger_provider());
//! let subscriber = tracing_subscriber::registry().with(bridge);
//! tracing::subscriber::set_global_default(subscriber).expect("no subscriber installed yet");
//!
//! tracing::error!(exception = "timeout", "payment provider unreachable");
//! # }
//! ```
//!
//! ## Mapping
//!
//! | tracing | log record |
//! |---|---|
//! | level `TRACE`..`ERROR` | severity `Trace`, `Debug`, `Info`, `Warning`, `Error` |
//! | `message` field | message |
//! | `exception` or `error` field | exception |
//! | other fields | appended to the message as `key=value` |
//! | target | logger name |
//!
//! Events whose target is the `blocks-lmt` core crate, and events emitted
//! while telemetry is suppressed on the current context, are skipped. This
//! keeps the pipeline's own diagnostics out of the pipeline.
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

mod layer;

pub use layer::BlocksLmtTracingBridge;
