use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use duckdb::{Connection, params};
use otelly_core::error::{OtellyError, Result};
use otelly_core::model::attrs::attrs_to_json;
use otelly_core::model::{
    Attributes, Log, Resource, ResourceLogs, ResourceSpans, SpanWithResource, nanos,
};
use tracing::{debug, warn};

use crate::Store;

impl Store {
    /// Registers the resource described by `attrs` and returns its id.
    ///
    /// First writer wins. Concurrent callers for the same id all get the id
    /// back and exactly one row is written.
    pub fn upsert_resource(&self, attrs: &Attributes) -> Result<String> {
        let resource = Resource::from_attributes(attrs);
        self.ensure_resource(&resource)?;
        Ok(resource.id)
    }

    /// Commits `resource` on its own, outside any caller transaction, unless
    /// it is already known.
    fn ensure_resource(&self, resource: &Resource) -> Result<()> {
        let mut known = self.known_resources()?;
        if known.contains(&resource.id) {
            return Ok(());
        }

        let conn = self.conn()?;
        let exists = conn
            .query_row(
                "SELECT COUNT(*) FROM resource WHERE id = ?",
                params![resource.id],
                |row| row.get::<_, i64>(0),
            )
            .map_err(|e| OtellyError::Store(format!("resource lookup failed: {e}")))?
            > 0;

        if !exists {
            conn.execute(
                "INSERT INTO resource (id, service_name, service_namespace) VALUES (?, ?, ?)",
                params![
                    resource.id,
                    resource.service_name,
                    resource.service_namespace
                ],
            )
            .map_err(|e| OtellyError::Store(format!("insert resource failed: {e}")))?;
            debug!(resource_id = %resource.id, "registered resource");
        }

        known.insert(resource.id.clone());
        Ok(())
    }

    /// Persists one resource group in a single transaction. Any failing row,
    /// a duplicate span id included, rolls the whole group back.
    pub fn insert_spans(&self, batch: &ResourceSpans) -> Result<Vec<SpanWithResource>> {
        let resource = Resource::from_attributes(&batch.resource);
        self.ensure_resource(&resource)?;
        if batch.spans.is_empty() {
            return Ok(Vec::new());
        }

        let spans = batch
            .spans
            .iter()
            .cloned()
            .map(|data| {
                let mut span = data.into_span(&resource.id);
                span.start_time = stored_instant(span.start_time);
                SpanWithResource {
                    span,
                    service_name: resource.service_name.clone(),
                    service_namespace: resource.service_namespace.clone(),
                }
            })
            .collect::<Vec<_>>();

        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| OtellyError::Store(format!("begin tx failed: {e}")))?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO span
                     (id, name, start_time, duration_ns, trace_id, kind, parent_span_id,
                      status_code, status_message, attributes, resource_id)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .map_err(|e| OtellyError::Store(format!("prepare insert span failed: {e}")))?;

            for span in &spans {
                let attributes = attrs_to_json(&span.attributes)?;
                stmt.execute(params![
                    span.id,
                    span.name,
                    ts_param(span.start_time),
                    nanos(span.duration),
                    span.trace_id,
                    span.kind.as_str(),
                    span.parent_span_id,
                    span.status_code.as_str(),
                    span.status_message,
                    attributes,
                    span.resource_id,
                ])
                .map_err(|e| insert_failed(e, "span", &span.id))?;
            }
        }

        tx.commit()
            .map_err(|e| OtellyError::Store(format!("commit spans failed: {e}")))?;
        Ok(spans)
    }

    pub fn insert_logs(&self, batch: &ResourceLogs) -> Result<Vec<Log>> {
        let resource = Resource::from_attributes(&batch.resource);
        self.ensure_resource(&resource)?;
        if batch.logs.is_empty() {
            return Ok(Vec::new());
        }

        let logs = batch
            .logs
            .iter()
            .cloned()
            .map(|data| {
                let mut log = data.into_log(&resource.id);
                log.timestamp = stored_instant(log.timestamp);
                log
            })
            .collect::<Vec<_>>();

        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| OtellyError::Store(format!("begin tx failed: {e}")))?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO log
                     (id, span_id, body, \"timestamp\", severity_number, severity_text,
                      resource_id, attributes)
                     VALUES (nextval('log_id_seq'), ?, ?, ?, ?, ?, ?, ?)",
                )
                .map_err(|e| OtellyError::Store(format!("prepare insert log failed: {e}")))?;

            for log in &logs {
                let attributes = attrs_to_json(&log.attributes)?;
                stmt.execute(params![
                    log.span_id,
                    log.body,
                    ts_param(log.timestamp),
                    log.severity_number,
                    log.severity_text,
                    log.resource_id,
                    attributes,
                ])
                .map_err(|e| OtellyError::Store(format!("insert log failed: {e}")))?;
            }
        }

        tx.commit()
            .map_err(|e| OtellyError::Store(format!("commit logs failed: {e}")))?;
        Ok(logs)
    }

    /// Removes every log, span and resource.
    pub fn clear(&self) -> Result<()> {
        let mut known = self.known_resources()?;
        let mut conn = self.conn()?;
        wipe(&mut conn, &["log", "span", "resource"])?;
        known.clear();
        debug!("cleared all telemetry");
        Ok(())
    }

    pub fn clear_logs(&self) -> Result<()> {
        let mut conn = self.conn()?;
        wipe(&mut conn, &["log"])
    }
}

fn wipe(conn: &mut Connection, tables: &[&str]) -> Result<()> {
    let tx = conn
        .transaction()
        .map_err(|e| OtellyError::Store(format!("begin tx failed: {e}")))?;
    for table in tables {
        tx.execute(&format!("DELETE FROM {table}"), [])
            .map_err(|e| OtellyError::Store(format!("delete from {table} failed: {e}")))?;
    }
    tx.commit()
        .map_err(|e| OtellyError::Store(format!("commit clear failed: {e}")))
}

/// TIMESTAMP keeps microseconds. Rows handed back to callers are cut to the
/// same precision so they match what a later query returns.
fn stored_instant(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(6)
}

/// Timestamps go in as RFC 3339 text.
pub(crate) fn ts_param(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, false)
}

fn insert_failed(e: duckdb::Error, entity: &'static str, id: &str) -> OtellyError {
    let detail = e.to_string();
    if detail.contains("Duplicate key") || detail.contains("PRIMARY KEY") {
        warn!(span_id = %id, error = %detail, "duplicate {entity} id, rolling back batch");
        return OtellyError::Conflict {
            entity,
            id: id.to_string(),
            detail,
        };
    }
    OtellyError::Store(format!("insert {entity} {id} failed: {detail}"))
}
