//! In-memory change log

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use drift_types::{now_ms, Change, ChangeRequest, Result};

use crate::{ChangeLog, SyncCycle};

struct Entry {
    change: Change,
    synced: bool,
}

#[derive(Default)]
struct Inner {
    entries: Vec<Entry>,
    history: Vec<SyncCycle>,
    last_ts: i64,
}

/// Change log held entirely in memory.
#[derive(Clone, Default)]
pub struct MemoryChangeLog {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of entries, synced or not.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ChangeLog for MemoryChangeLog {
    async fn record(&self, request: ChangeRequest) -> Result<Change> {
        request.validate()?;
        let mut inner = self.inner.write().await;
        let timestamp = now_ms().max(inner.last_ts);
        inner.last_ts = timestamp;
        let change = Change {
            id: Uuid::new_v4().to_string(),
            table: request.table,
            op: request.op,
            timestamp,
            data: request.data,
            old_data: request.old_data,
        };
        inner.entries.push(Entry {
            change: change.clone(),
            synced: false,
        });
        Ok(change)
    }

    async fn unsynced(&self, since_ts: i64) -> Result<Vec<Change>> {
        let inner = self.inner.read().await;
        // Insertion order already ascends by timestamp.
        Ok(inner
            .entries
            .iter()
            .filter(|e| !e.synced && e.change.timestamp > since_ts)
            .map(|e| e.change.clone())
            .collect())
    }

    async fn mark_synced(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut inner = self.inner.write().await;
        for entry in &mut inner.entries {
            if ids.contains(entry.change.id.as_str()) {
                entry.synced = true;
            }
        }
        Ok(())
    }

    async fn clear_before(&self, ts: i64) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .entries
            .retain(|e| !(e.synced && e.change.timestamp < ts));
        Ok(())
    }

    async fn record_cycle(&self, cycle: SyncCycle) -> Result<()> {
        self.inner.write().await.history.push(cycle);
        Ok(())
    }

    async fn recent_cycles(&self, limit: usize) -> Result<Vec<SyncCycle>> {
        let inner = self.inner.read().await;
        Ok(inner.history.iter().rev().take(limit).cloned().collect())
    }
}
