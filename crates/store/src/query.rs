use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use duckdb::{Connection, Row, params};
use otelly_core::error::{OtellyError, Result};
use otelly_core::model::attrs::attrs_from_json;
use otelly_core::model::{Log, Resource, Span, SpanKind, SpanWithResource, StatusCode};
use serde::Serialize;

use crate::Store;

/// Span count for one wall-clock minute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MinuteBucket {
    pub bucket_start: DateTime<Utc>,
    pub count: u64,
}

const SPAN_COLUMNS: &str = "s.id, s.name, s.start_time, s.duration_ns, s.trace_id, s.kind,
     s.parent_span_id, s.status_code, s.status_message, s.attributes, s.resource_id,
     COALESCE(r.service_name, 'unknown'), COALESCE(r.service_namespace, 'unknown')";

// A concurrent clear can drop the resource row between a span read and its
// resource lookup; such spans are still listed.
const SPAN_FROM: &str = "FROM span s LEFT JOIN resource r ON r.id = s.resource_id";

/// Column values as DuckDB hands them back, before enum and JSON decoding.
struct SpanRow {
    id: String,
    name: String,
    start_time: NaiveDateTime,
    duration_ns: i64,
    trace_id: String,
    kind: String,
    parent_span_id: Option<String>,
    status_code: String,
    status_message: Option<String>,
    attributes: String,
    resource_id: String,
    service_name: String,
    service_namespace: String,
}

impl SpanRow {
    fn read(row: &Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            start_time: row.get(2)?,
            duration_ns: row.get(3)?,
            trace_id: row.get(4)?,
            kind: row.get(5)?,
            parent_span_id: row.get(6)?,
            status_code: row.get(7)?,
            status_message: row.get(8)?,
            attributes: row.get(9)?,
            resource_id: row.get(10)?,
            service_name: row.get(11)?,
            service_namespace: row.get(12)?,
        })
    }

    fn decode(self) -> Result<SpanWithResource> {
        Ok(SpanWithResource {
            span: Span {
                id: self.id,
                trace_id: self.trace_id,
                parent_span_id: self.parent_span_id,
                name: self.name,
                kind: SpanKind::from_str(&self.kind)?,
                start_time: self.start_time.and_utc(),
                duration: Duration::nanoseconds(self.duration_ns),
                status_code: StatusCode::from_str(&self.status_code)?,
                status_message: self.status_message,
                attributes: attrs_from_json(&self.attributes)?,
                resource_id: self.resource_id,
            },
            service_name: self.service_name,
            service_namespace: self.service_namespace,
        })
    }
}

impl Store {
    pub fn get_span(&self, id: &str) -> Result<Span> {
        self.get_span_with_resource(id).map(|s| s.span)
    }

    pub fn get_span_with_resource(&self, id: &str) -> Result<SpanWithResource> {
        let conn = self.conn()?;
        let sql = format!("SELECT {SPAN_COLUMNS} {SPAN_FROM} WHERE s.id = ?");
        let mut spans = fetch_spans(&conn, &sql, params![id], "span")?;
        spans
            .pop()
            .ok_or_else(|| OtellyError::not_found("span", id))
    }

    pub fn get_resource(&self, id: &str) -> Result<Resource> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, service_name, service_namespace FROM resource WHERE id = ?")
            .map_err(|e| OtellyError::Store(format!("prepare resource failed: {e}")))?;
        let mut rows = stmt
            .query_map(params![id], read_resource)
            .map_err(|e| OtellyError::Store(format!("query resource failed: {e}")))?;
        match rows.next() {
            Some(row) => {
                row.map_err(|e| OtellyError::Store(format!("map resource row failed: {e}")))
            }
            None => Err(OtellyError::not_found("resource", id)),
        }
    }

    pub fn list_resources(&self) -> Result<Vec<Resource>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, service_name, service_namespace FROM resource ORDER BY id")
            .map_err(|e| OtellyError::Store(format!("prepare resources failed: {e}")))?;
        let rows = stmt
            .query_map([], read_resource)
            .map_err(|e| OtellyError::Store(format!("query resources failed: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| OtellyError::Store(format!("map resource row failed: {e}")))?);
        }
        Ok(out)
    }

    /// Spans without a parent, newest first.
    pub fn get_root_spans(&self) -> Result<Vec<SpanWithResource>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {SPAN_COLUMNS} {SPAN_FROM}
             WHERE s.parent_span_id IS NULL OR s.parent_span_id = ''
             ORDER BY s.start_time DESC"
        );
        fetch_spans(&conn, &sql, [], "root spans")
    }

    /// Every span of one trace, oldest first.
    pub fn get_spans_for_trace(&self, trace_id: &str) -> Result<Vec<SpanWithResource>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {SPAN_COLUMNS} {SPAN_FROM}
             WHERE s.trace_id = ?
             ORDER BY s.start_time ASC"
        );
        fetch_spans(&conn, &sql, params![trace_id], "trace spans")
    }

    pub fn spans_per_minute_for_resource(&self, resource_id: &str) -> Result<Vec<MinuteBucket>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT date_trunc('minute', start_time) AS minute, COUNT(*)
                 FROM span
                 WHERE resource_id = ?
                 GROUP BY minute
                 ORDER BY minute DESC",
            )
            .map_err(|e| OtellyError::Store(format!("prepare span histogram failed: {e}")))?;

        let rows = stmt
            .query_map(params![resource_id], |row| {
                Ok(MinuteBucket {
                    bucket_start: row.get::<_, NaiveDateTime>(0)?.and_utc(),
                    count: row.get::<_, i64>(1)? as u64,
                })
            })
            .map_err(|e| OtellyError::Store(format!("query span histogram failed: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(
                row.map_err(|e| OtellyError::Store(format!("map histogram row failed: {e}")))?,
            );
        }
        Ok(out)
    }

    /// Most recent logs, newest first.
    pub fn get_logs(&self, limit: usize) -> Result<Vec<Log>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT span_id, body, \"timestamp\", severity_number, severity_text,
                        resource_id, attributes
                 FROM log
                 ORDER BY \"timestamp\" DESC, id DESC
                 LIMIT ?",
            )
            .map_err(|e| OtellyError::Store(format!("prepare logs failed: {e}")))?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, NaiveDateTime>(2)?,
                    row.get::<_, i32>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .map_err(|e| OtellyError::Store(format!("query logs failed: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            let (span_id, body, ts, severity_number, severity_text, resource_id, attributes) =
                row.map_err(|e| OtellyError::Store(format!("map log row failed: {e}")))?;
            out.push(Log {
                span_id,
                body,
                timestamp: ts.and_utc(),
                severity_number,
                severity_text,
                resource_id,
                attributes: attrs_from_json(&attributes)?,
            });
        }
        Ok(out)
    }
}

fn read_resource(row: &Row<'_>) -> duckdb::Result<Resource> {
    Ok(Resource {
        id: row.get(0)?,
        service_name: row.get(1)?,
        service_namespace: row.get(2)?,
    })
}

fn fetch_spans<P: duckdb::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    what: &str,
) -> Result<Vec<SpanWithResource>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| OtellyError::Store(format!("prepare {what} failed: {e}")))?;
    let rows = stmt
        .query_map(params, SpanRow::read)
        .map_err(|e| OtellyError::Store(format!("query {what} failed: {e}")))?;

    let mut out = Vec::new();
    for row in rows {
        let row = row.map_err(|e| OtellyError::Store(format!("map {what} row failed: {e}")))?;
        out.push(row.decode()?);
    }
    Ok(out)
}
