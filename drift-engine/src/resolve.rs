//! Conflict resolution
//!
//! Applies the declared policy to each detected conflict. `manual` never
//! picks a side: it surfaces the conflict for the embedder to settle.

use tracing::debug;

use drift_types::{Conflict, ConflictStrategy, Result, Row, SyncError, Value};

use crate::detect::strip_meta;

/// Which side a resolution chose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Local,
    Remote,
    Merged,
}

/// Resolved value for one conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub table: String,
    pub key: String,
    pub row: Row,
    pub winner: Winner,
}

/// Applies a `ConflictStrategy` to detected conflicts.
pub struct ConflictResolver {
    strategy: ConflictStrategy,
}

impl ConflictResolver {
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self { strategy }
    }

    pub fn resolve(&self, conflict: &Conflict) -> Result<Resolution> {
        let (row, winner) = match &self.strategy {
            ConflictStrategy::LocalWins => (conflict.local.clone(), Winner::Local),
            ConflictStrategy::RemoteWins => (conflict.remote.clone(), Winner::Remote),
            ConflictStrategy::LatestWins => {
                // Ties favor remote.
                if conflict.local_timestamp > conflict.remote_timestamp {
                    (conflict.local.clone(), Winner::Local)
                } else {
                    (conflict.remote.clone(), Winner::Remote)
                }
            }
            ConflictStrategy::Merge(merge) => {
                let merged = merge(conflict).map_err(|e| {
                    e.context(format!(
                        "merge failed for table {} key {}",
                        conflict.table, conflict.key
                    ))
                })?;
                (merged, Winner::Merged)
            }
            ConflictStrategy::Manual => {
                return Err(SyncError::conflicts(vec![conflict.clone()]));
            }
        };
        debug!(
            "resolved conflict on {} key {} in favor of {:?}",
            conflict.table, conflict.key, winner
        );
        Ok(Resolution {
            table: conflict.table.clone(),
            key: conflict.key.clone(),
            row: strip_meta(&row),
            winner,
        })
    }

    /// Resolve every conflict; the first failure fails the batch.
    pub fn resolve_all(&self, conflicts: &[Conflict]) -> Result<Vec<Resolution>> {
        conflicts.iter().map(|c| self.resolve(c)).collect()
    }
}

/// Field-wise merge preferring non-null values; when both sides are
/// non-null the local value is kept.
pub fn merge_prefer_non_null(conflict: &Conflict) -> Result<Row> {
    let mut merged = Row::new();
    let columns: Vec<&String> = conflict.local.keys().chain(conflict.remote.keys()).collect();
    for column in columns {
        let local = conflict.local.get(column);
        let remote = conflict.remote.get(column);
        let value = match (local, remote) {
            (Some(l), _) if !l.is_null() => l.clone(),
            (_, Some(r)) if !r.is_null() => r.clone(),
            _ => Value::Null,
        };
        merged.insert(column.clone(), value);
    }
    Ok(merged)
}

/// Set-union merge for array-valued columns.
///
/// Columns holding JSON-array text on both sides union element-wise,
/// keeping local order and appending unseen remote elements; everything
/// else falls back to prefer-non-null.
pub fn merge_array_union(conflict: &Conflict) -> Result<Row> {
    let mut merged = merge_prefer_non_null(conflict)?;
    for (column, local_value) in &conflict.local {
        let Some(remote_value) = conflict.remote.get(column) else {
            continue;
        };
        let (Some(local_arr), Some(remote_arr)) =
            (parse_json_array(local_value), parse_json_array(remote_value))
        else {
            continue;
        };

        let mut union = local_arr.clone();
        let mut seen: Vec<String> = local_arr.iter().map(|v| v.to_string()).collect();
        for item in remote_arr {
            let repr = item.to_string();
            if !seen.contains(&repr) {
                seen.push(repr);
                union.push(item);
            }
        }
        let rendered = serde_json::to_string(&union)
            .map_err(|e| SyncError::validation(format!("array merge encode failed: {e}")))?;
        merged.insert(column.clone(), Value::Text(rendered));
    }
    Ok(merged)
}

fn parse_json_array(value: &Value) -> Option<Vec<serde_json::Value>> {
    match value {
        Value::Text(text) => match serde_json::from_str::<serde_json::Value>(text) {
            Ok(serde_json::Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}
