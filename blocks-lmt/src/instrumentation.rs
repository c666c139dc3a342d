//! Hooks for HTTP server integrations.
use crate::trace::{DetachedActivity, SpanKind, Status, Tracer};
use crate::Context;
use std::fmt;

/// Request property holding the HTTP method.
pub const REQUEST_METHOD: &str = "Request.Method";
/// Request property holding the request path.
pub const REQUEST_URL: &str = "Request.Url";
/// Response property holding the HTTP status code.
pub const RESPONSE_STATUS_CODE: &str = "Response.StatusCode";

/// Produces one root SERVER span per inbound request.
///
/// A framework integration calls [`on_request_start`](Self::on_request_start)
/// when a request arrives, runs the handler under the returned activity's
/// context and calls [`on_request_end`](Self::on_request_end) with the
/// outcome. Tenant baggage on the caller's current context is carried into
/// the request's trace.
///
/// ```no_run
/// # async fn handle() -> u16 { 200 }
/// # async fn serve(instrumentation: blocks_lmt::RequestInstrumentation) {
/// use blocks_lmt::FutureContextExt;
///
/// let activity = instrumentation.on_request_start("GET", "/orders");
/// let status = handle().with_context(activity.context().clone()).await;
/// instrumentation.on_request_end(&activity, status, None);
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct RequestInstrumentation {
    tracer: Tracer,
}

impl RequestInstrumentation {
    /// Hooks producing spans through `tracer`.
    pub fn new(tracer: Tracer) -> Self {
        RequestInstrumentation { tracer }
    }

    /// Start the root activity of a request.
    pub fn on_request_start(&self, method: &str, path: &str) -> DetachedActivity {
        let activity = Context::map_current(|cx| {
            self.tracer
                .start_root(format!("{} {}", method, path), SpanKind::Server, cx)
        });
        activity.set_property(REQUEST_METHOD, method.to_string());
        activity.set_property(REQUEST_URL, path.to_string());
        activity
    }

    /// Record the response and stop the request's activity.
    ///
    /// The status becomes an error when `error` is given or the code is a
    /// 5xx; otherwise it is left to the activity's own status.
    pub fn on_request_end(
        &self,
        activity: &DetachedActivity,
        status_code: u16,
        error: Option<&dyn fmt::Display>,
    ) {
        activity.set_property(RESPONSE_STATUS_CODE, status_code);
        match error {
            Some(error) => activity.set_status(Status::error(error.to_string())),
            None if status_code >= 500 => {
                activity.set_status(Status::error(format!("HTTP {}", status_code)))
            }
            None => {}
        }
        activity.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baggage::BaggageExt;
    use crate::common::Value;
    use crate::testing::InMemoryRecords;
    use crate::trace::{SpanRecord, TracerProvider};
    use crate::FutureContextExt;
    use rstest::rstest;
    use std::sync::Arc;

    fn instrumentation() -> (RequestInstrumentation, InMemoryRecords<SpanRecord>) {
        let records = InMemoryRecords::default();
        let provider = TracerProvider::builder()
            .with_service_name("api")
            .with_processor(Arc::new(records.clone()))
            .build();
        (RequestInstrumentation::new(provider.tracer("http")), records)
    }

    #[rstest]
    #[case(200, None, false)]
    #[case(404, None, false)]
    #[case(503, None, true)]
    #[case(200, Some("handler failed"), true)]
    fn response_sets_code_and_status(
        #[case] code: u16,
        #[case] error: Option<&str>,
        #[case] is_error: bool,
    ) {
        let (instrumentation, records) = instrumentation();
        let activity = instrumentation.on_request_start("POST", "/orders");
        instrumentation.on_request_end(
            &activity,
            code,
            error.as_ref().map(|e| e as &dyn fmt::Display),
        );

        let spans = records.records();
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert!(span.is_root());
        assert_eq!(span.kind, SpanKind::Server);
        assert_eq!(span.attributes.get(REQUEST_METHOD), Some(&Value::from("POST")));
        assert_eq!(span.attributes.get(REQUEST_URL), Some(&Value::from("/orders")));
        assert_eq!(
            span.attributes.get(RESPONSE_STATUS_CODE),
            Some(&Value::I64(i64::from(code)))
        );
        let expected_status = if is_error { "ERROR" } else { "OK" };
        assert_eq!(span.status.as_str(), expected_status);
        if let Some(error) = error {
            assert_eq!(span.status.description(), error);
        }
    }

    #[tokio::test]
    async fn request_span_is_the_parent_of_handler_spans_and_keeps_the_tenant() {
        let (instrumentation, records) = instrumentation();
        let tracer = instrumentation.tracer.clone();

        let _tenant = Context::current_with_tenant("t9").attach();
        let request = instrumentation.on_request_start("GET", "/health");
        tracer
            .in_activity("db", async {})
            .with_context(request.context().clone())
            .await;
        instrumentation.on_request_end(&request, 200, None);

        let spans = records.records();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].parent_span_id, Some(spans[1].span_id));
        assert_eq!(spans[1].name, "GET /health");
        assert!(spans.iter().all(|span| span.tenant_id == "t9"));
    }
}
