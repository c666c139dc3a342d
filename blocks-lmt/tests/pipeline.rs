use blocks_lmt::error::{ExportError, ExportResult};
use blocks_lmt::export::{Message, Sink};
use blocks_lmt::logs::Severity;
use blocks_lmt::{BaggageExt, Context, FutureContextExt, LmtConfig, LmtConfigBuilder, LmtPipeline};
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A sink that can be taken down and brought back.
#[derive(Clone, Debug, Default)]
struct FlakySink {
    down: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<Value>>>,
}

impl FlakySink {
    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn bodies(&self) -> Vec<Value> {
        self.bodies.lock().unwrap().clone()
    }
}

impl Sink for FlakySink {
    fn send<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, ExportResult> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let result = if self.down.load(Ordering::SeqCst) {
            Err(ExportError::Transient("bus unavailable".into()))
        } else {
            self.bodies
                .lock()
                .unwrap()
                .push(serde_json::from_slice(&message.body).unwrap());
            Ok(())
        };
        Box::pin(async move { result })
    }
}

fn config() -> LmtConfigBuilder {
    LmtConfig::builder()
        .with_service_id("orders")
        .with_tenant_key("")
        .with_connection_string(
            "Endpoint=sb://bus.example.net/;SharedAccessKeyName=send;SharedAccessKey=a2V5",
        )
}

#[tokio::test(start_paused = true)]
async fn batch_failing_during_an_outage_is_delivered_by_recovery() {
    let sink = FlakySink::default();
    sink.set_down(true);
    let pipeline = LmtPipeline::builder(
        config()
            .with_flush_interval(Duration::from_secs(1))
            .build()
            .unwrap(),
    )
    .with_sink(sink.clone())
    .build()
    .unwrap();

    pipeline.logger("orders").log(Severity::Error, "card declined");

    // Flush at 1 s, retries at 2 s and 4 s, then parked.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(sink.attempts(), 3);
    assert_eq!(
        pipeline
            .logs_exporter()
            .delivery_engine()
            .recovery_queue()
            .len(),
        1
    );

    sink.set_down(false);
    // The recovery cycle runs every 30 s.
    tokio::time::sleep(Duration::from_secs(25)).await;
    assert!(pipeline
        .logs_exporter()
        .delivery_engine()
        .recovery_queue()
        .is_empty());
    let bodies = sink.bodies();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["Data"][0]["Message"], "card declined");
    assert_eq!(bodies[0]["Data"][0]["TenantId"], "miscellaneous");

    pipeline.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn recovery_queue_keeps_only_the_newest_batches() {
    let sink = FlakySink::default();
    sink.set_down(true);
    let pipeline = LmtPipeline::builder(
        config()
            .with_logs_batch_size(1)
            .with_max_retries(1)
            .with_max_failed_batches(2)
            .build()
            .unwrap(),
    )
    .with_sink(sink.clone())
    .build()
    .unwrap();

    let logger = pipeline.logger("orders");
    for message in ["first", "second", "third"] {
        logger.log(Severity::Info, message);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let queue = pipeline.logs_exporter().delivery_engine().recovery_queue();
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.evicted_count(), 1);

    sink.set_down(false);
    tokio::time::sleep(Duration::from_secs(31)).await;
    let delivered: Vec<Value> = sink
        .bodies()
        .iter()
        .map(|body| body["Data"][0]["Message"].clone())
        .collect();
    assert_eq!(delivered, vec!["second", "third"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_flows_keep_their_own_tenant_and_trace() {
    let sink = FlakySink::default();
    let pipeline = LmtPipeline::builder(
        config()
            .with_flush_interval(Duration::from_secs(60))
            .build()
            .unwrap(),
    )
    .with_sink(sink.clone())
    .build()
    .unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let tracer = pipeline.tracer("worker");
            let logger = pipeline.logger("worker");
            let tenant = format!("tenant-{}", i);
            tokio::spawn(
                async move {
                    tracer
                        .in_activity("request", async move {
                            tokio::task::yield_now().await;
                            logger.log(Severity::Info, "handled");
                            tokio::task::yield_now().await;
                        })
                        .await
                }
                .with_context(Context::new().with_tenant(&tenant)),
            )
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }
    pipeline.force_flush().await.unwrap();

    let bodies = sink.bodies();
    let mut span_tenants = HashMap::new();
    for body in bodies.iter().filter(|b| b["Type"] == "traces") {
        for (tenant, spans) in body["Data"].as_object().unwrap() {
            for span in spans.as_array().unwrap() {
                span_tenants.insert(span["SpanId"].as_str().unwrap().to_string(), tenant.clone());
            }
        }
    }
    assert_eq!(span_tenants.len(), 16);

    let logs: Vec<&Value> = bodies
        .iter()
        .filter(|b| b["Type"] == "logs")
        .flat_map(|b| b["Data"].as_array().unwrap())
        .collect();
    assert_eq!(logs.len(), 16);
    for log in logs {
        let span_id = log["Properties"]["SpanId"].as_str().unwrap();
        assert_eq!(
            span_tenants.get(span_id).map(String::as_str),
            log["TenantId"].as_str()
        );
    }

    pipeline.shutdown().await.unwrap();
}
