//! Durable change log
//!
//! Records every mutation against tracked tables independently of the
//! business tables, answers "which changes since T are unsynced?", flags
//! pushed changes, and prunes synced history. Two implementations:
//! in-memory for tests and ephemeral embedders, SQLite-backed for
//! everything else.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use drift_types::{Change, ChangeRequest, Result};

pub use memory::MemoryChangeLog;
pub use sqlite::SqliteChangeLog;

/// Summary of one finished sync cycle, kept for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncCycle {
    pub started_at: i64,
    pub finished_at: i64,
    pub pushed: u64,
    pub pulled: u64,
    pub conflicts: u64,
    pub success: bool,
    pub error: Option<String>,
}

/// The change log contract.
///
/// `record` serializes concurrent callers and never overwrites; timestamps
/// it assigns are non-decreasing, with insertion order breaking ties.
#[async_trait]
pub trait ChangeLog: Send + Sync {
    /// Assign id and timestamp, persist durably, return the materialized
    /// change.
    async fn record(&self, request: ChangeRequest) -> Result<Change>;

    /// Unsynced changes with `timestamp > since_ts`, ascending by
    /// timestamp then insertion order.
    async fn unsynced(&self, since_ts: i64) -> Result<Vec<Change>>;

    /// Flag the given ids as synced. Unknown ids are ignored; an empty
    /// input is a no-op success.
    async fn mark_synced(&self, ids: &[String]) -> Result<()>;

    /// Prune synced changes older than `ts`. Unsynced rows are never
    /// removed regardless of age.
    async fn clear_before(&self, ts: i64) -> Result<()>;

    /// Append a sync-cycle summary.
    async fn record_cycle(&self, cycle: SyncCycle) -> Result<()>;

    /// Most recent cycle summaries, newest first.
    async fn recent_cycles(&self, limit: usize) -> Result<Vec<SyncCycle>>;
}
