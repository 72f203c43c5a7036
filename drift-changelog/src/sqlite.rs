//! SQLite-backed change log
//!
//! The `_sync_changes` relation is a compatibility surface: column names,
//! types, and indexes are fixed, and `data`/`old_data` hold the stable
//! JSON wire encoding.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use drift_types::{
    now_ms, row_from_json, row_to_json, Change, ChangeRequest, Operation, Result, Row, SyncError,
};

use crate::{ChangeLog, SyncCycle};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS _sync_changes (
    id TEXT PRIMARY KEY,
    "table" TEXT NOT NULL,
    op TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    data TEXT NOT NULL,
    old_data TEXT,
    synced INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_sync_changes_timestamp ON _sync_changes(timestamp);
CREATE INDEX IF NOT EXISTS idx_sync_changes_synced ON _sync_changes(synced);

CREATE TABLE IF NOT EXISTS _sync_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at INTEGER NOT NULL,
    finished_at INTEGER NOT NULL,
    pushed INTEGER NOT NULL DEFAULT 0,
    pulled INTEGER NOT NULL DEFAULT 0,
    conflicts INTEGER NOT NULL DEFAULT 0,
    success INTEGER NOT NULL DEFAULT 0,
    error TEXT
);
"#;

fn storage_err(e: rusqlite::Error) -> SyncError {
    SyncError::storage(e.to_string())
}

struct ChangeDb {
    conn: Connection,
    last_ts: i64,
}

impl ChangeDb {
    fn open(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(storage_err)?;
        let last_ts: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(timestamp), 0) FROM _sync_changes",
                [],
                |row| row.get(0),
            )
            .map_err(storage_err)?;
        info!("change log initialized, high watermark {last_ts}");
        Ok(Self { conn, last_ts })
    }

    fn record(&mut self, request: ChangeRequest) -> Result<Change> {
        request.validate()?;
        let timestamp = now_ms().max(self.last_ts);
        let change = Change {
            id: Uuid::new_v4().to_string(),
            table: request.table,
            op: request.op,
            timestamp,
            data: request.data,
            old_data: request.old_data,
        };
        let data = row_to_json(&change.data)?;
        let old_data = change.old_data.as_ref().map(row_to_json).transpose()?;
        self.conn
            .execute(
                r#"INSERT INTO _sync_changes (id, "table", op, timestamp, data, old_data, synced)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)"#,
                params![
                    change.id,
                    change.table,
                    change.op.as_str(),
                    change.timestamp,
                    data,
                    old_data,
                ],
            )
            .map_err(storage_err)?;
        self.last_ts = timestamp;
        debug!(
            "recorded {} change {} for table {}",
            change.op.as_str(),
            change.id,
            change.table
        );
        Ok(change)
    }

    fn unsynced(&self, since_ts: i64) -> Result<Vec<Change>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"SELECT id, "table", op, timestamp, data, old_data
                   FROM _sync_changes
                   WHERE synced = 0 AND timestamp > ?1
                   ORDER BY timestamp ASC, rowid ASC"#,
            )
            .map_err(storage_err)?;

        let raw = stmt
            .query_map(params![since_ts], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })
            .map_err(storage_err)?;

        let mut changes = Vec::new();
        let mut skipped = 0usize;
        for entry in raw {
            let (id, table, op, timestamp, data, old_data) = entry.map_err(storage_err)?;
            match decode_change(id, table, op, timestamp, data, old_data) {
                Ok(change) => changes.push(change),
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!("skipped {skipped} undecodable change log rows during scan");
        }
        Ok(changes)
    }

    fn mark_synced(&mut self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let placeholders = std::iter::repeat("?")
            .take(ids.len())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("UPDATE _sync_changes SET synced = 1 WHERE id IN ({placeholders})");
        self.conn
            .execute(&sql, rusqlite::params_from_iter(ids.iter()))
            .map_err(storage_err)?;
        Ok(())
    }

    fn clear_before(&mut self, ts: i64) -> Result<()> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM _sync_changes WHERE synced = 1 AND timestamp < ?1",
                params![ts],
            )
            .map_err(storage_err)?;
        if removed > 0 {
            debug!("pruned {removed} synced changes older than {ts}");
        }
        Ok(())
    }

    fn record_cycle(&mut self, cycle: &SyncCycle) -> Result<()> {
        self.conn
            .execute(
                r#"INSERT INTO _sync_history
                   (started_at, finished_at, pushed, pulled, conflicts, success, error)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
                params![
                    cycle.started_at,
                    cycle.finished_at,
                    cycle.pushed as i64,
                    cycle.pulled as i64,
                    cycle.conflicts as i64,
                    cycle.success,
                    cycle.error,
                ],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    fn recent_cycles(&self, limit: usize) -> Result<Vec<SyncCycle>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"SELECT started_at, finished_at, pushed, pulled, conflicts, success, error
                   FROM _sync_history
                   ORDER BY id DESC
                   LIMIT ?1"#,
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(SyncCycle {
                    started_at: row.get(0)?,
                    finished_at: row.get(1)?,
                    pushed: row.get::<_, i64>(2)? as u64,
                    pulled: row.get::<_, i64>(3)? as u64,
                    conflicts: row.get::<_, i64>(4)? as u64,
                    success: row.get(5)?,
                    error: row.get(6)?,
                })
            })
            .map_err(storage_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(storage_err)
    }
}

fn decode_change(
    id: String,
    table: String,
    op: String,
    timestamp: i64,
    data: String,
    old_data: Option<String>,
) -> Result<Change> {
    let op = Operation::parse(&op)
        .ok_or_else(|| SyncError::validation(format!("unknown operation '{op}'")))?;
    let data: Row = row_from_json(&data)?;
    let old_data = old_data.as_deref().map(row_from_json).transpose()?;
    Ok(Change {
        id,
        table,
        op,
        timestamp,
        data,
        old_data,
    })
}

/// SQLite-backed change log, safe to share across async tasks.
///
/// All statement work happens synchronously inside the lock; nothing
/// suspends while the write critical section is held.
#[derive(Clone)]
pub struct SqliteChangeLog {
    inner: Arc<Mutex<ChangeDb>>,
}

impl SqliteChangeLog {
    /// Open or create a change log database on disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(storage_err)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(ChangeDb::open(conn)?)),
        })
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(ChangeDb::open(conn)?)),
        })
    }
}

#[async_trait]
impl ChangeLog for SqliteChangeLog {
    async fn record(&self, request: ChangeRequest) -> Result<Change> {
        self.inner.lock().await.record(request)
    }

    async fn unsynced(&self, since_ts: i64) -> Result<Vec<Change>> {
        self.inner.lock().await.unsynced(since_ts)
    }

    async fn mark_synced(&self, ids: &[String]) -> Result<()> {
        self.inner.lock().await.mark_synced(ids)
    }

    async fn clear_before(&self, ts: i64) -> Result<()> {
        self.inner.lock().await.clear_before(ts)
    }

    async fn record_cycle(&self, cycle: SyncCycle) -> Result<()> {
        self.inner.lock().await.record_cycle(&cycle)
    }

    async fn recent_cycles(&self, limit: usize) -> Result<Vec<SyncCycle>> {
        self.inner.lock().await.recent_cycles(limit)
    }
}
