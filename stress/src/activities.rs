//! Activity start/stop throughput.
//!
//! Run with `cargo run --release --bin activities`. Every iteration starts a
//! child activity under a tenant, sets a property and stops it; the finished
//! span is buffered for delivery to a sink that discards everything.
use blocks_lmt::{BaggageExt, Context, LmtConfig, LmtPipeline};

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
        .with_traces_batch_size(1000)
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

    let tracer = pipeline.tracer("stress");
    throughput::test_throughput(move || {
        let _tenant = Context::current_with_tenant("stress-tenant").attach();
        let mut activity = tracer.start("iteration");
        activity.set_property("order_id", 12345);
        activity.stop();
    });

    let _ = runtime.block_on(pipeline.shutdown());
}
