//! JSON envelope sent to the sink, one message per batch.
//!
//! ```json
//! { "Type": "logs", "ServiceName": "orders", "Data": [ ... ] }
//! ```
//!
//! Log batches carry a list of entries. Trace batches carry an object keyed by
//! tenant id, each value being that tenant's spans in batch order.
use crate::baggage::Baggage;
use crate::common::{Attributes, Value};
use crate::error::ExportError;
use crate::export::{Batch, StreamKind};
use crate::logs::LogRecord;
use crate::trace::{SpanId, SpanRecord, TraceId};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Content type of every message.
pub const CONTENT_TYPE: &str = "application/json";

/// A record type that can be delivered as a batch.
pub trait ExportRecord: Send + Sync + fmt::Debug + 'static {
    /// Stream this record type travels on.
    const STREAM: StreamKind;

    /// Encode `records` as the `Data` of an envelope for `service_name`.
    fn encode(service_name: &str, records: &[Self]) -> serde_json::Result<Vec<u8>>
    where
        Self: Sized;
}

/// A serialized batch, ready for the sink.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Stream of the batch
    pub stream: StreamKind,
    /// `blocks-lmt-service-logs` or `blocks-lmt-service-traces`
    pub correlation_id: &'static str,
    /// Always [`CONTENT_TYPE`]
    pub content_type: &'static str,
    /// UTF-8 JSON envelope
    pub body: Vec<u8>,
    /// Number of records in the envelope
    pub record_count: usize,
}

impl Message {
    /// Serialize a batch.
    pub fn from_batch<R: ExportRecord>(batch: &Batch<R>) -> Result<Message, ExportError> {
        let body = R::encode(batch.service_name(), batch.records())?;
        Ok(Message {
            stream: R::STREAM,
            correlation_id: R::STREAM.correlation_id(),
            content_type: CONTENT_TYPE,
            body,
            record_count: batch.len(),
        })
    }
}

#[derive(Serialize)]
struct Envelope<'a, D> {
    #[serde(rename = "Type")]
    kind: &'static str,
    #[serde(rename = "ServiceName")]
    service_name: &'a str,
    #[serde(rename = "Data")]
    data: D,
}

fn as_rfc3339<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    let datetime: DateTime<Utc> = (*time).into();
    serializer.serialize_str(&datetime.to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn hex_or_empty<T: fmt::Display>(id: Option<T>) -> String {
    id.map(|id| id.to_string()).unwrap_or_default()
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct LogEntry<'a> {
    #[serde(serialize_with = "as_rfc3339")]
    timestamp: SystemTime,
    level: &'static str,
    message: &'a str,
    exception: &'a str,
    service_name: &'a str,
    properties: LogProperties<'a>,
    tenant_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct LogProperties<'a> {
    trace_id: String,
    span_id: String,
    logger_name: &'a str,
}

impl<'a> From<&'a LogRecord> for LogEntry<'a> {
    fn from(record: &'a LogRecord) -> Self {
        LogEntry {
            timestamp: record.timestamp,
            level: record.severity.name(),
            message: &record.message,
            exception: record.exception.as_deref().unwrap_or_default(),
            service_name: &record.service_name,
            properties: LogProperties {
                trace_id: hex_or_empty::<TraceId>(record.trace_id),
                span_id: hex_or_empty::<SpanId>(record.span_id),
                logger_name: record.logger_name.as_deref().unwrap_or_default(),
            },
            tenant_id: &record.tenant_id,
        }
    }
}

impl ExportRecord for LogRecord {
    const STREAM: StreamKind = StreamKind::Logs;

    fn encode(service_name: &str, records: &[Self]) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&Envelope {
            kind: Self::STREAM.as_str(),
            service_name,
            data: records.iter().map(LogEntry::from).collect::<Vec<_>>(),
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SpanEntry<'a> {
    #[serde(serialize_with = "as_rfc3339")]
    timestamp: SystemTime,
    trace_id: TraceId,
    span_id: SpanId,
    parent_span_id: String,
    operation_name: &'a str,
    kind: &'static str,
    activity_source_name: &'a str,
    #[serde(serialize_with = "as_rfc3339")]
    start_time: SystemTime,
    #[serde(serialize_with = "as_rfc3339")]
    end_time: SystemTime,
    duration: f64,
    attributes: &'a Attributes,
    status: &'static str,
    status_description: &'a str,
    baggage: &'a Baggage,
    events: Vec<EventEntry<'a>>,
    service_name: &'a str,
    tenant_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct EventEntry<'a> {
    name: &'a str,
    #[serde(serialize_with = "as_rfc3339")]
    timestamp: SystemTime,
    attributes: BTreeMap<&'a str, &'a Value>,
}

impl<'a> From<&'a SpanRecord> for SpanEntry<'a> {
    fn from(record: &'a SpanRecord) -> Self {
        SpanEntry {
            timestamp: record.end_time,
            trace_id: record.trace_id,
            span_id: record.span_id,
            parent_span_id: hex_or_empty(record.parent_span_id),
            operation_name: &record.name,
            kind: record.kind.as_str(),
            activity_source_name: &record.source_name,
            start_time: record.start_time,
            end_time: record.end_time,
            duration: record.duration().as_nanos() as f64 / 1_000_000.0,
            attributes: &record.attributes,
            status: record.status.as_str(),
            status_description: record.status.description(),
            baggage: &record.baggage,
            events: record
                .events
                .iter()
                .map(|event| EventEntry {
                    name: &event.name,
                    timestamp: event.timestamp,
                    attributes: event
                        .attributes
                        .iter()
                        .map(|kv| (kv.key.as_str(), &kv.value))
                        .collect(),
                })
                .collect(),
            service_name: &record.service_name,
            tenant_id: &record.tenant_id,
        }
    }
}

impl ExportRecord for SpanRecord {
    const STREAM: StreamKind = StreamKind::Traces;

    fn encode(service_name: &str, records: &[Self]) -> serde_json::Result<Vec<u8>> {
        let mut by_tenant: BTreeMap<&str, Vec<SpanEntry<'_>>> = BTreeMap::new();
        for record in records {
            by_tenant
                .entry(record.tenant_id.as_str())
                .or_default()
                .push(SpanEntry::from(record));
        }
        serde_json::to_vec(&Envelope {
            kind: Self::STREAM.as_str(),
            service_name,
            data: by_tenant,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baggage::TENANT_ID_KEY;
    use crate::logs::Severity;
    use crate::trace::{SpanKind, Status};
    use serde_json::json;
    use std::borrow::Cow;
    use std::sync::Arc;
    use std::time::{Duration, UNIX_EPOCH};

    fn log(message: &'static str, tenant: &str) -> LogRecord {
        let mut record = LogRecord::new(Severity::Info, message).with_logger_name("api");
        record.timestamp = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        record.tenant_id = tenant.to_string();
        record.service_name = Arc::from("orders");
        record
    }

    fn span(id: u64, parent: Option<u64>, tenant: &str) -> SpanRecord {
        let start_time = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let mut attributes = Attributes::new();
        attributes.insert("Request.Method".into(), Value::from("GET"));
        let baggage: Baggage = [(TENANT_ID_KEY, tenant)].into_iter().collect();
        SpanRecord {
            trace_id: TraceId::from(7),
            span_id: SpanId::from(id),
            parent_span_id: parent.map(SpanId::from),
            name: Cow::Borrowed("GET /orders"),
            kind: SpanKind::Server,
            source_name: Cow::Borrowed("http"),
            start_time,
            end_time: start_time + Duration::from_micros(1500),
            attributes,
            events: Vec::new(),
            status: Status::Ok,
            baggage,
            tenant_id: tenant.to_string(),
            service_name: Arc::from("orders"),
        }
    }

    #[test]
    fn log_batch_envelope() {
        let batch = Batch::new(
            StreamKind::Logs,
            Arc::from("orders"),
            vec![log("A", "t1"), log("B", "t1")],
        );
        let message = Message::from_batch(&batch).unwrap();
        assert_eq!(message.correlation_id, "blocks-lmt-service-logs");
        assert_eq!(message.content_type, "application/json");
        assert_eq!(message.record_count, 2);

        let body: serde_json::Value = serde_json::from_slice(&message.body).unwrap();
        assert_eq!(body["Type"], "logs");
        assert_eq!(body["ServiceName"], "orders");
        assert_eq!(
            body["Data"][0],
            json!({
                "Timestamp": "2023-11-14T22:13:20.000000Z",
                "Level": "INFO",
                "Message": "A",
                "Exception": "",
                "ServiceName": "orders",
                "Properties": {"TraceId": "", "SpanId": "", "LoggerName": "api"},
                "TenantId": "t1"
            })
        );
        assert_eq!(body["Data"][1]["Message"], "B");
    }

    #[test]
    fn trace_batch_groups_spans_by_tenant() {
        let batch = Batch::new(
            StreamKind::Traces,
            Arc::from("orders"),
            vec![span(1, None, "t1"), span(2, Some(1), "t2"), span(3, Some(1), "t1")],
        );
        let message = Message::from_batch(&batch).unwrap();
        assert_eq!(message.correlation_id, "blocks-lmt-service-traces");

        let body: serde_json::Value = serde_json::from_slice(&message.body).unwrap();
        assert_eq!(body["Type"], "traces");
        let t1 = body["Data"]["t1"].as_array().unwrap();
        let t2 = body["Data"]["t2"].as_array().unwrap();
        assert_eq!(t1.len(), 2);
        assert_eq!(t2.len(), 1);

        assert_eq!(t1[0]["SpanId"], "0000000000000001");
        assert_eq!(t1[0]["ParentSpanId"], "");
        assert_eq!(t1[1]["ParentSpanId"], "0000000000000001");
        assert_eq!(t1[0]["TraceId"], "00000000000000000000000000000007");
        assert_eq!(t1[0]["Kind"], "SERVER");
        assert_eq!(t1[0]["Duration"], 1.5);
        assert_eq!(t1[0]["Attributes"], json!({"Request.Method": "GET"}));
        assert_eq!(t1[0]["Baggage"], json!({"TenantId": "t1"}));
        assert_eq!(t1[0]["Status"], "OK");
        assert_eq!(t2[0]["TenantId"], "t2");
    }
}
