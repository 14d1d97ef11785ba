use chrono::{DateTime, Duration, Utc};
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue, any_value::Value};
use opentelemetry_proto::tonic::logs::v1::LogRecord as OtlpLogRecord;
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::Span as OtlpSpan;
use otelly_core::model::log::severity_label;
use otelly_core::model::{
    AttrValue, Attributes, LogData, ResourceLogs, ResourceSpans, SpanData, SpanKind, StatusCode,
};
use tracing::debug;

/// One group per OTLP resource entry; scopes are flattened into it.
pub fn decode_traces(req: ExportTraceServiceRequest) -> Vec<ResourceSpans> {
    req.resource_spans
        .into_iter()
        .map(|rs| {
            let resource = resource_attrs(rs.resource.as_ref());
            let spans = rs
                .scope_spans
                .iter()
                .flat_map(|ss| ss.spans.iter())
                .filter_map(decode_span)
                .collect();
            ResourceSpans { resource, spans }
        })
        .collect()
}

pub fn decode_logs(req: ExportLogsServiceRequest) -> Vec<ResourceLogs> {
    req.resource_logs
        .into_iter()
        .map(|rl| {
            let resource = resource_attrs(rl.resource.as_ref());
            let logs = rl
                .scope_logs
                .iter()
                .flat_map(|sl| sl.log_records.iter())
                .map(decode_log)
                .collect();
            ResourceLogs { resource, logs }
        })
        .collect()
}

pub fn decode_span(span: &OtlpSpan) -> Option<SpanData> {
    let Some(id) = bytes_to_hex(&span.span_id) else {
        debug!(name = %span.name, "dropping span without span id");
        return None;
    };

    let start = span.start_time_unix_nano;
    let elapsed = span.end_time_unix_nano.saturating_sub(start);
    let (status_code, status_message) = match &span.status {
        Some(status) => (
            StatusCode::from_otlp(status.code),
            Some(status.message.clone()).filter(|m| !m.is_empty()),
        ),
        None => (StatusCode::Unset, None),
    };

    Some(SpanData {
        id,
        trace_id: bytes_to_hex(&span.trace_id).unwrap_or_default(),
        parent_span_id: bytes_to_hex(&span.parent_span_id),
        name: span.name.clone(),
        kind: SpanKind::from_otlp(span.kind),
        start_time: nanos_to_dt(start),
        duration: Duration::nanoseconds(i64::try_from(elapsed).unwrap_or(i64::MAX)),
        status_code,
        status_message,
        attributes: kv_to_attrs(&span.attributes),
    })
}

pub fn decode_log(record: &OtlpLogRecord) -> LogData {
    let ts_nanos = if record.time_unix_nano == 0 {
        record.observed_time_unix_nano
    } else {
        record.time_unix_nano
    };
    let severity_text = if record.severity_text.is_empty() {
        severity_label(record.severity_number).to_string()
    } else {
        record.severity_text.clone()
    };

    LogData {
        span_id: bytes_to_hex(&record.span_id),
        body: record
            .body
            .as_ref()
            .map(|v| any_value_to_attr(v).to_string())
            .unwrap_or_default(),
        timestamp: nanos_to_dt(ts_nanos),
        severity_number: record.severity_number,
        severity_text,
        attributes: kv_to_attrs(&record.attributes),
    }
}

fn resource_attrs(resource: Option<&Resource>) -> Attributes {
    resource
        .map(|r| kv_to_attrs(&r.attributes))
        .unwrap_or_default()
}

fn kv_to_attrs(attrs: &[KeyValue]) -> Attributes {
    attrs
        .iter()
        .map(|kv| {
            let value = kv
                .value
                .as_ref()
                .map(any_value_to_attr)
                .unwrap_or_else(|| AttrValue::String(String::new()));
            (kv.key.clone(), value)
        })
        .collect()
}

/// Scalars map one to one. Compound values and bytes are flattened to text
/// so every attribute stays JSON-serializable.
fn any_value_to_attr(value: &AnyValue) -> AttrValue {
    match &value.value {
        Some(Value::StringValue(s)) => AttrValue::String(s.clone()),
        Some(Value::BoolValue(b)) => AttrValue::Bool(*b),
        Some(Value::IntValue(i)) => AttrValue::Int(*i),
        Some(Value::DoubleValue(d)) if d.is_finite() => AttrValue::Double(*d),
        Some(Value::DoubleValue(d)) => AttrValue::String(d.to_string()),
        Some(Value::BytesValue(b)) => AttrValue::String(hex(b)),
        Some(_) => AttrValue::String(any_value_to_json(value).to_string()),
        None => AttrValue::String(String::new()),
    }
}

fn any_value_to_json(value: &AnyValue) -> serde_json::Value {
    match &value.value {
        Some(Value::StringValue(s)) => serde_json::Value::String(s.clone()),
        Some(Value::BoolValue(b)) => serde_json::Value::Bool(*b),
        Some(Value::IntValue(i)) => serde_json::Value::from(*i),
        Some(Value::DoubleValue(d)) => serde_json::Number::from_f64(*d)
            .map(serde_json::Value::Number)
            .unwrap_or_else(|| serde_json::Value::String(d.to_string())),
        Some(Value::BytesValue(b)) => serde_json::Value::String(hex(b)),
        Some(Value::ArrayValue(arr)) => {
            serde_json::Value::Array(arr.values.iter().map(any_value_to_json).collect())
        }
        Some(Value::KvlistValue(list)) => serde_json::Value::Object(
            list.values
                .iter()
                .map(|kv| {
                    let v = kv
                        .value
                        .as_ref()
                        .map(any_value_to_json)
                        .unwrap_or(serde_json::Value::Null);
                    (kv.key.clone(), v)
                })
                .collect(),
        ),
        None => serde_json::Value::Null,
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn bytes_to_hex(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    Some(hex(bytes))
}

fn nanos_to_dt(nanos: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(i64::try_from(nanos).unwrap_or(i64::MAX))
}
