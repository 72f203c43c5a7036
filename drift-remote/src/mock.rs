//! Scripted remote store for tests
//!
//! Holds per-table row snapshots, records every upload, and pops scripted
//! failures ahead of real behavior so retry and offline paths can be
//! exercised deterministically.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use drift_types::{Result, Row, SyncError};

use crate::payload::UploadPayload;
use crate::{QueryResult, RemoteStore};

#[derive(Default)]
struct MockInner {
    token: Option<String>,
    tables: HashMap<String, Vec<Row>>,
    uploads: Vec<(String, UploadPayload)>,
    auth_failures: VecDeque<SyncError>,
    upload_failures: VecDeque<SyncError>,
    download_failures: VecDeque<SyncError>,
    auth_calls: usize,
    upload_calls: usize,
    download_calls: usize,
    sql_calls: usize,
}

/// In-memory `RemoteStore` double.
#[derive(Clone, Default)]
pub struct MockRemoteStore {
    inner: Arc<Mutex<MockInner>>,
}

impl MockRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the remote snapshot of `table`.
    pub async fn set_table(&self, table: &str, rows: Vec<Row>) {
        self.inner.lock().await.tables.insert(table.to_string(), rows);
    }

    /// Queue an error for the next `authenticate` call.
    pub async fn script_auth_failure(&self, err: SyncError) {
        self.inner.lock().await.auth_failures.push_back(err);
    }

    /// Queue an error for the next `upload` call.
    pub async fn script_upload_failure(&self, err: SyncError) {
        self.inner.lock().await.upload_failures.push_back(err);
    }

    /// Queue an error for the next `download` call.
    pub async fn script_download_failure(&self, err: SyncError) {
        self.inner.lock().await.download_failures.push_back(err);
    }

    /// Every upload received, in call order.
    pub async fn uploads(&self) -> Vec<(String, UploadPayload)> {
        self.inner.lock().await.uploads.clone()
    }

    /// Distinct tables that received uploads, in call order.
    pub async fn uploaded_tables(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut seen = Vec::new();
        for (table, _) in &inner.uploads {
            if !seen.contains(table) {
                seen.push(table.clone());
            }
        }
        seen
    }

    pub async fn auth_calls(&self) -> usize {
        self.inner.lock().await.auth_calls
    }

    pub async fn upload_calls(&self) -> usize {
        self.inner.lock().await.upload_calls
    }

    pub async fn download_calls(&self) -> usize {
        self.inner.lock().await.download_calls
    }

    /// Total remote calls of any kind.
    pub async fn total_calls(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.auth_calls + inner.upload_calls + inner.download_calls + inner.sql_calls
    }
}

#[async_trait]
impl RemoteStore for MockRemoteStore {
    async fn authenticate(&self, token: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.auth_calls += 1;
        if let Some(err) = inner.auth_failures.pop_front() {
            return Err(err);
        }
        inner.token = Some(token.to_string());
        Ok(())
    }

    async fn execute_sql(&self, _sql: &str) -> Result<QueryResult> {
        let mut inner = self.inner.lock().await;
        inner.sql_calls += 1;
        if inner.token.is_none() {
            return Err(SyncError::auth("client is not authenticated"));
        }
        Ok(QueryResult::default())
    }

    async fn upload(&self, table: &str, payload: UploadPayload) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.upload_calls += 1;
        if inner.token.is_none() {
            return Err(SyncError::auth("client is not authenticated"));
        }
        if let Some(err) = inner.upload_failures.pop_front() {
            return Err(err);
        }
        inner.uploads.push((table.to_string(), payload));
        Ok(())
    }

    async fn download(&self, table: &str, since_ts: Option<i64>) -> Result<Vec<Row>> {
        let mut inner = self.inner.lock().await;
        inner.download_calls += 1;
        if inner.token.is_none() {
            return Err(SyncError::auth("client is not authenticated"));
        }
        if let Some(err) = inner.download_failures.pop_front() {
            return Err(err);
        }
        let rows = inner.tables.get(table).cloned().unwrap_or_default();
        Ok(match since_ts {
            None => rows,
            Some(since) => rows
                .into_iter()
                .filter(|row| {
                    row.get("_sync_timestamp")
                        .and_then(|v| v.as_millis())
                        .map_or(true, |ts| ts > since)
                })
                .collect(),
        })
    }
}
