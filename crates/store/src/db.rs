use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::Connection;
use otelly_core::error::{OtellyError, Result};
use serde::Serialize;

use crate::schema::SCHEMA_SQL;

/// Handle to one DuckDB database.
///
/// Clones share the database. Every operation runs on its own cloned
/// connection, so writers on different threads get independent transactions.
#[derive(Clone)]
pub struct Store {
    root: Arc<Mutex<Connection>>,
    db_path: String,
    /// Resource ids known to be committed. Also serializes first inserts.
    pub(crate) known_resources: Arc<Mutex<HashSet<String>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStatus {
    pub db_path: String,
    pub db_size_bytes: u64,
    pub resources_count: usize,
    pub spans_count: usize,
    pub logs_count: usize,
    pub oldest_span: Option<DateTime<Utc>>,
    pub newest_span: Option<DateTime<Utc>>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| OtellyError::Io(format!("failed to create db dir: {e}")))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| OtellyError::Store(format!("failed to open duckdb: {e}")))?;
        conn.execute_batch("PRAGMA threads=4;")
            .map_err(|e| OtellyError::Store(format!("failed to set pragmas: {e}")))?;
        Self::init(conn, path.display().to_string())
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| OtellyError::Store(format!("failed to open in-memory db: {e}")))?;
        Self::init(conn, ":memory:".to_string())
    }

    fn init(conn: Connection, db_path: String) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| OtellyError::Store(format!("failed to initialize schema: {e}")))?;
        Ok(Self {
            root: Arc::new(Mutex::new(conn)),
            db_path,
            known_resources: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// A fresh connection to the same database.
    pub(crate) fn conn(&self) -> Result<Connection> {
        let root = self
            .root
            .lock()
            .map_err(|_| OtellyError::Internal("store connection mutex poisoned".into()))?;
        root.try_clone()
            .map_err(|e| OtellyError::Store(format!("failed to open connection: {e}")))
    }

    pub(crate) fn known_resources(&self) -> Result<MutexGuard<'_, HashSet<String>>> {
        self.known_resources
            .lock()
            .map_err(|_| OtellyError::Internal("resource registry mutex poisoned".into()))
    }

    pub fn status(&self) -> Result<StoreStatus> {
        let conn = self.conn()?;

        let resources_count = scalar_usize(&conn, "SELECT COUNT(*) FROM resource")?;
        let spans_count = scalar_usize(&conn, "SELECT COUNT(*) FROM span")?;
        let logs_count = scalar_usize(&conn, "SELECT COUNT(*) FROM log")?;

        let oldest_span = scalar_ts(&conn, "SELECT MIN(start_time) FROM span")?;
        let newest_span = scalar_ts(&conn, "SELECT MAX(start_time) FROM span")?;

        let db_size_bytes = if self.db_path == ":memory:" {
            0
        } else {
            fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StoreStatus {
            db_path: self.db_path.clone(),
            db_size_bytes,
            resources_count,
            spans_count,
            logs_count,
            oldest_span,
            newest_span,
        })
    }
}

fn scalar_usize(conn: &Connection, sql: &str) -> Result<usize> {
    conn.query_row(sql, [], |row| row.get::<_, i64>(0))
        .map(|v| v as usize)
        .map_err(|e| OtellyError::Store(format!("query failed: {e}")))
}

fn scalar_ts(conn: &Connection, sql: &str) -> Result<Option<DateTime<Utc>>> {
    conn.query_row(sql, [], |row| row.get::<_, Option<NaiveDateTime>>(0))
        .map(|opt| opt.map(|dt| dt.and_utc()))
        .map_err(|e| OtellyError::Store(format!("query failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_initializes() {
        let store = Store::open_in_memory().unwrap();
        let status = store.status().unwrap();
        assert_eq!(status.db_path, ":memory:");
        assert_eq!(status.resources_count, 0);
        assert_eq!(status.spans_count, 0);
        assert_eq!(status.logs_count, 0);
        assert_eq!(status.oldest_span, None);
    }

    #[test]
    fn clones_share_one_database() {
        let store = Store::open_in_memory().unwrap();
        let other = store.clone();
        store
            .conn()
            .unwrap()
            .execute_batch("INSERT INTO resource VALUES ('api:shop', 'api', 'shop')")
            .unwrap();
        assert_eq!(other.status().unwrap().resources_count, 1);
    }

    #[test]
    fn open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/otelly.duckdb");
        let store = Store::open(&path).unwrap();
        assert!(path.parent().unwrap().is_dir());
        assert_eq!(store.status().unwrap().spans_count, 0);
    }
}
