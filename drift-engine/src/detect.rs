//! Conflict detection
//!
//! Pairs local and remote changes by (table, primary key) and reports
//! value divergence and delete/update asymmetries. Metadata columns
//! prefixed `_sync_` never participate in value comparison.

use std::collections::BTreeMap;

use tracing::debug;

use drift_types::{Change, Conflict, Operation, Row};

/// Prefix of metadata columns excluded from comparison.
pub const SYNC_META_PREFIX: &str = "_sync_";
/// Remote last-update watermark column.
pub const SYNC_TIMESTAMP_COLUMN: &str = "_sync_timestamp";
/// Soft-delete tombstone column.
pub const SYNC_DELETED_COLUMN: &str = "_sync_deleted";

/// One remote row plus the timestamp it last changed at.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteVersion {
    pub table: String,
    pub row: Row,
    pub timestamp: i64,
}

impl RemoteVersion {
    /// Build from a downloaded row, reading `_sync_timestamp` when the
    /// row carries one.
    pub fn from_row(table: impl Into<String>, row: Row, fallback_ts: i64) -> Self {
        let timestamp = row
            .get(SYNC_TIMESTAMP_COLUMN)
            .and_then(|v| v.as_millis())
            .unwrap_or(fallback_ts);
        Self {
            table: table.into(),
            row,
            timestamp,
        }
    }
}

/// Project the primary key out of a row.
///
/// Tries `id`, `_id`, `uuid`, `key` in order; falls back to the canonical
/// serialization of the whole row. Empty rows have no key.
pub fn key_projection(row: &Row) -> Option<String> {
    for candidate in ["id", "_id", "uuid", "key"] {
        if let Some(value) = row.get(candidate) {
            if !value.is_null() {
                return Some(value.canonical());
            }
        }
    }
    if row.is_empty() {
        return None;
    }
    Some(drift_types::canonical_row(row))
}

/// Whether a remote row is a soft-delete tombstone.
pub fn is_tombstone(row: &Row) -> bool {
    matches!(
        row.get(SYNC_DELETED_COLUMN),
        Some(drift_types::Value::Boolean(true)) | Some(drift_types::Value::Integer(1))
    )
}

/// Strip `_sync_` metadata columns from a row.
pub fn strip_meta(row: &Row) -> Row {
    row.iter()
        .filter(|(k, _)| !k.starts_with(SYNC_META_PREFIX))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Detects diverging records between the two sides.
#[derive(Debug, Clone, Default)]
pub struct ConflictDetector {
    /// Rows whose `_sync_timestamp`s differ by less than this are treated
    /// as equal.
    tolerance_ms: Option<i64>,
}

impl ConflictDetector {
    pub fn new(tolerance_ms: Option<i64>) -> Self {
        Self { tolerance_ms }
    }

    /// Pair the latest change per (table, key) on each side and report
    /// divergence. Changes with no extractable key are skipped; they are
    /// still pushed blindly by the engine.
    pub fn detect(&self, local: &[Change], remote: &[RemoteVersion]) -> Vec<Conflict> {
        let mut local_latest: BTreeMap<(String, String), &Change> = BTreeMap::new();
        for change in local {
            if let Some(key) = key_projection(change.key_row()) {
                // Input is ordered by timestamp with insertion-order
                // tie-break, so the last writer per key wins.
                local_latest.insert((change.table.clone(), key), change);
            }
        }

        let mut remote_latest: BTreeMap<(String, String), &RemoteVersion> = BTreeMap::new();
        for version in remote {
            if let Some(key) = key_projection(&version.row) {
                let slot = (version.table.clone(), key);
                match remote_latest.get(&slot) {
                    Some(existing) if existing.timestamp > version.timestamp => {}
                    _ => {
                        remote_latest.insert(slot, version);
                    }
                }
            }
        }

        let mut conflicts = Vec::new();
        for ((table, key), change) in &local_latest {
            let Some(version) = remote_latest.get(&(table.clone(), key.clone())) else {
                continue;
            };

            let local_deleted = change.op == Operation::Delete;
            let remote_deleted = is_tombstone(&version.row);

            let conflict = if local_deleted && !remote_deleted {
                Some(Conflict {
                    table: table.clone(),
                    key: key.clone(),
                    local: Row::new(),
                    remote: version.row.clone(),
                    local_timestamp: change.timestamp,
                    remote_timestamp: version.timestamp,
                })
            } else if remote_deleted && !local_deleted {
                Some(Conflict {
                    table: table.clone(),
                    key: key.clone(),
                    local: change.data.clone(),
                    remote: Row::new(),
                    local_timestamp: change.timestamp,
                    remote_timestamp: version.timestamp,
                })
            } else if !local_deleted && self.rows_differ(&change.data, &version.row) {
                Some(Conflict {
                    table: table.clone(),
                    key: key.clone(),
                    local: change.data.clone(),
                    remote: version.row.clone(),
                    local_timestamp: change.timestamp,
                    remote_timestamp: version.timestamp,
                })
            } else {
                None
            };

            if let Some(conflict) = conflict {
                conflicts.push(conflict);
            }
        }

        if !conflicts.is_empty() {
            debug!("detected {} conflicts", conflicts.len());
        }
        conflicts
    }

    fn rows_differ(&self, local: &Row, remote: &Row) -> bool {
        if let (Some(tolerance), Some(lts), Some(rts)) = (
            self.tolerance_ms,
            local.get(SYNC_TIMESTAMP_COLUMN).and_then(|v| v.as_millis()),
            remote.get(SYNC_TIMESTAMP_COLUMN).and_then(|v| v.as_millis()),
        ) {
            if (lts - rts).abs() < tolerance {
                return false;
            }
        }

        let local_cols = local.keys().filter(|k| !k.starts_with(SYNC_META_PREFIX));
        let remote_cols = remote.keys().filter(|k| !k.starts_with(SYNC_META_PREFIX));
        let mut columns: Vec<&String> = local_cols.chain(remote_cols).collect();
        columns.sort();
        columns.dedup();

        columns
            .into_iter()
            .any(|column| local.get(column) != remote.get(column))
    }
}
