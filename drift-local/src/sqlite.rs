//! Bundled SQLite local store
//!
//! Reference `LocalStore` implementation for tests and single-process
//! embedders. Statements arrive pre-rendered from the gateway, so the
//! store itself never sees parameters.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::debug;

use drift_types::{Result, Row, SyncError, Value};

use crate::LocalStore;

fn storage_err(e: rusqlite::Error) -> SyncError {
    SyncError::storage(e.to_string())
}

fn validation_err(e: rusqlite::Error) -> SyncError {
    SyncError::validation(format!("invalid SQL: {e}"))
}

/// SQLite-backed local store, safe to share across async tasks.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(storage_err)?;
        conn.execute("PRAGMA foreign_keys = ON", [])
            .map_err(storage_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn column_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(sql).map_err(validation_err)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let mut rows = stmt.query([]).map_err(storage_err)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(storage_err)? {
            let mut record = Row::new();
            for (i, name) in columns.iter().enumerate() {
                record.insert(name.clone(), column_value(row.get_ref(i).map_err(storage_err)?));
            }
            out.push(record);
        }
        Ok(out)
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(sql).map_err(validation_err)?;
        let changed = stmt.execute([]).map_err(|e| match e {
            rusqlite::Error::ExecuteReturnedResults => {
                SyncError::validation("execute called with a statement returning rows")
            }
            other => storage_err(other),
        })?;
        debug!("executed statement, {changed} rows affected");
        Ok(())
    }

    async fn begin(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch("BEGIN").map_err(storage_err)
    }

    async fn commit(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch("COMMIT").map_err(storage_err)
    }

    async fn rollback(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch("ROLLBACK").map_err(storage_err)
    }
}
