//! Log producer throughput through the tracing bridge.
//!
//! Run with `cargo run --release --bin logs`. Every iteration emits one
//! `tracing` event that becomes a log record and is buffered for delivery to
//! a sink that discards everything.
use blocks_lmt::{LmtConfig, LmtPipeline};
use blocks_lmt_appender_tracing::BlocksLmtTracingBridge;
use tracing::error;
use tracing_subscriber::prelude::*;

mod sink;
mod throughput;

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("cannot start the runtime: {}", err);
            return;
        }
    };
    let _entered = runtime.enter();

    let pipeline = LmtConfig::builder()
        .with_service_id("stress")
        .with_connection_string("Endpoint=sb://localhost/;SharedAccessSignature=stress")
        .with_logs_batch_size(512)
        .with_max_queue_size(100_000)
        .build()
        .and_then(|config| LmtPipeline::builder(config).with_sink(sink::DiscardSink).build());
    let pipeline = match pipeline {
        Ok(pipeline) => pipeline,
        Err(err) => {
            eprintln!("cannot build the pipeline: {}", err);
            return;
        }
    };

    let bridge = BlocksLmtTracingBridge::new(pipeline.logger_provider());
    let subscriber = tracing_subscriber::registry().with(bridge);
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("cannot install the subscriber: {}", err);
        return;
    }

    throughput::test_throughput(|| {
        error!(
            name = "CheckoutFailed",
            order_id = 12345,
            amount = 199.99,
            "payment declined"
        );
    });

    let _ = runtime.block_on(pipeline.shutdown());
}
