use chrono::{DateTime, Duration, TimeZone, Utc};
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue, any_value};
use opentelemetry_proto::tonic::logs::v1::{
    LogRecord as OtlpLogRecord, ResourceLogs as OtlpResourceLogs, ScopeLogs,
};
use opentelemetry_proto::tonic::resource::v1::Resource as OtlpResource;
use opentelemetry_proto::tonic::trace::v1::{
    ResourceSpans as OtlpResourceSpans, ScopeSpans, Span as OtlpSpan, Status,
};
use otelly_core::model::resource::{SERVICE_NAME_KEY, SERVICE_NAMESPACE_KEY};
use otelly_core::model::{
    Attributes, LogData, ResourceLogs, ResourceSpans, SpanData, SpanKind, StatusCode,
};

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
}

pub fn resource_attrs(service_name: &str, service_namespace: &str) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert(SERVICE_NAME_KEY.into(), service_name.into());
    attrs.insert(SERVICE_NAMESPACE_KEY.into(), service_namespace.into());
    attrs
}

/// `{trace_id}-checkout` (1000ms) → `-payment` (500ms at +250) → `-charge`
/// (250ms at +500), reported by `api` in namespace `shop`.
pub fn checkout_spans(trace_id: &str) -> ResourceSpans {
    let span = |name: &str, parent: Option<&str>, start_ms: i64, dur_ms: i64| {
        let mut attributes = Attributes::new();
        attributes.insert("http.route".into(), format!("/{name}").into());
        attributes.insert("retries".into(), 0_i64.into());
        SpanData {
            id: format!("{trace_id}-{name}"),
            trace_id: trace_id.to_string(),
            parent_span_id: parent.map(|p| format!("{trace_id}-{p}")),
            name: name.to_string(),
            kind: SpanKind::Server,
            start_time: base_time() + Duration::milliseconds(start_ms),
            duration: Duration::milliseconds(dur_ms),
            status_code: StatusCode::Ok,
            status_message: None,
            attributes,
        }
    };

    ResourceSpans {
        resource: resource_attrs("api", "shop"),
        spans: vec![
            span("checkout", None, 0, 1000),
            span("payment", Some("checkout"), 250, 500),
            span("charge", Some("payment"), 500, 250),
        ],
    }
}

pub fn checkout_logs(trace_id: &str) -> ResourceLogs {
    let log = |span: &str, offset_ms: i64, severity_number: i32, body: &str| LogData {
        span_id: Some(format!("{trace_id}-{span}")),
        body: body.to_string(),
        timestamp: base_time() + Duration::milliseconds(offset_ms),
        severity_number,
        severity_text: otelly_core::model::log::severity_label(severity_number).to_string(),
        attributes: Attributes::new(),
    };

    ResourceLogs {
        resource: resource_attrs("api", "shop"),
        logs: vec![
            log("payment", 300, 9, "authorizing card"),
            log("charge", 700, 13, "charge retried attempt=2"),
        ],
    }
}

fn string_kv(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::StringValue(value.to_string())),
        }),
    }
}

fn otlp_resource(service_name: &str, service_namespace: &str) -> OtlpResource {
    OtlpResource {
        attributes: vec![
            string_kv(SERVICE_NAME_KEY, service_name),
            string_kv(SERVICE_NAMESPACE_KEY, service_namespace),
        ],
        ..Default::default()
    }
}

fn unix_nanos(at: DateTime<Utc>) -> u64 {
    at.timestamp_nanos_opt().unwrap_or_default() as u64
}

/// OTLP span id for the `index`-th span of the checkout trace.
pub fn otlp_span_id(trace_id: [u8; 16], index: u8) -> [u8; 8] {
    let mut id = [0u8; 8];
    id[..7].copy_from_slice(&trace_id[..7]);
    id[7] = index;
    id
}

pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// The checkout trace as an OTLP export request. Span ids come from
/// [`otlp_span_id`] with indexes 1, 2, 3 for checkout, payment, charge.
pub fn checkout_trace_request(trace_id: [u8; 16]) -> ExportTraceServiceRequest {
    let span = |index: u8, parent: Option<u8>, name: &str, start_ms: i64, dur_ms: i64| {
        let start = base_time() + Duration::milliseconds(start_ms);
        OtlpSpan {
            trace_id: trace_id.to_vec(),
            span_id: otlp_span_id(trace_id, index).to_vec(),
            parent_span_id: parent
                .map(|p| otlp_span_id(trace_id, p).to_vec())
                .unwrap_or_default(),
            name: name.to_string(),
            kind: 2,
            start_time_unix_nano: unix_nanos(start),
            end_time_unix_nano: unix_nanos(start + Duration::milliseconds(dur_ms)),
            attributes: vec![string_kv("http.route", &format!("/{name}"))],
            status: Some(Status {
                code: 1,
                message: String::new(),
            }),
            ..Default::default()
        }
    };

    ExportTraceServiceRequest {
        resource_spans: vec![OtlpResourceSpans {
            resource: Some(otlp_resource("api", "shop")),
            scope_spans: vec![ScopeSpans {
                spans: vec![
                    span(1, None, "checkout", 0, 1000),
                    span(2, Some(1), "payment", 250, 500),
                    span(3, Some(2), "charge", 500, 250),
                ],
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

pub fn checkout_logs_request(trace_id: [u8; 16]) -> ExportLogsServiceRequest {
    ExportLogsServiceRequest {
        resource_logs: vec![OtlpResourceLogs {
            resource: Some(otlp_resource("api", "shop")),
            scope_logs: vec![ScopeLogs {
                log_records: vec![OtlpLogRecord {
                    time_unix_nano: unix_nanos(base_time() + Duration::milliseconds(700)),
                    severity_number: 13,
                    severity_text: "WARN".to_string(),
                    body: Some(AnyValue {
                        value: Some(any_value::Value::StringValue(
                            "charge retried attempt=2".to_string(),
                        )),
                    }),
                    trace_id: trace_id.to_vec(),
                    span_id: otlp_span_id(trace_id, 3).to_vec(),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}
