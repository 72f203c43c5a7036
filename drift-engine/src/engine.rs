//! Sync engine
//!
//! State machine coordinating push, pull, and full sync cycles, the
//! auto-sync scheduler, state emission, and error propagation. The engine
//! owns its collaborators; there is no process-wide state.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use drift_changelog::{ChangeLog, SyncCycle};
use drift_local::LocalGateway;
use drift_net::NetworkMonitor;
use drift_remote::payload::build_payload;
use drift_remote::{RemoteStore, UploadPayload};
use drift_types::{
    now_ms, Change, ChangeRequest, Conflict, Operation, PullResult, PushResult, Result, Row,
    SyncConfig, SyncError, SyncResult, SyncState, Value,
};

use crate::batch::{process_in_batches, BatchOptions};
use crate::detect::{is_tombstone, key_projection, strip_meta, ConflictDetector, RemoteVersion};
use crate::filter::TableFilter;
use crate::resolve::{ConflictResolver, Winner};
use crate::retry::{retry_with_backoff, RetryPolicy};

/// Progress milestones emitted during a full sync.
const PROGRESS_STEPS: [u8; 6] = [10, 30, 40, 60, 80, 100];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Idle,
    Syncing,
}

#[derive(Clone)]
struct ConfiguredState {
    config: SyncConfig,
    filter: TableFilter,
}

/// Bound a remote call by the configured timeout.
async fn remote_call<T>(timeout_ms: u64, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match timeout(Duration::from_millis(timeout_ms.max(1)), fut).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::network(format!(
            "remote call timed out after {timeout_ms} ms"
        ))),
    }
}

/// The upload image of a change: post-image rows for inserts and updates,
/// a soft-delete tombstone for deletes.
fn change_to_row(change: &Change) -> Row {
    match change.op {
        Operation::Insert | Operation::Update => change.data.clone(),
        Operation::Delete => {
            let mut row = change.key_row().clone();
            row.insert(
                crate::detect::SYNC_DELETED_COLUMN.to_string(),
                Value::boolean(true),
            );
            row
        }
    }
}

/// Offline-first sync engine over a local change log, local store
/// gateway, remote store client, and network monitor.
pub struct SyncEngine {
    changelog: Arc<dyn ChangeLog>,
    local: LocalGateway,
    remote: Arc<dyn RemoteStore>,
    monitor: Arc<dyn NetworkMonitor>,
    config: RwLock<Option<ConfiguredState>>,
    phase: Mutex<Phase>,
    current_state: RwLock<SyncState>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SyncState>>>,
    auto_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn new(
        changelog: Arc<dyn ChangeLog>,
        local: LocalGateway,
        remote: Arc<dyn RemoteStore>,
        monitor: Arc<dyn NetworkMonitor>,
    ) -> Self {
        Self {
            changelog,
            local,
            remote,
            monitor,
            config: RwLock::new(None),
            phase: Mutex::new(Phase::Uninitialized),
            current_state: RwLock::new(SyncState::Idle),
            subscribers: Mutex::new(Vec::new()),
            auto_task: Mutex::new(None),
        }
    }

    /// Authenticate and store the configuration.
    ///
    /// Auth errors surface verbatim so the embedder can trigger a token
    /// refresh.
    pub async fn initialize(&self, config: SyncConfig) -> Result<()> {
        let mut phase = self.phase.lock().await;
        if *phase != Phase::Uninitialized {
            return Err(SyncError::validation("engine is already initialized"));
        }
        config.validate()?;
        let filter = TableFilter::from_config(&config.table_filter)?;
        let token = config.credential.resolve()?;
        remote_call(config.remote_timeout_ms, self.remote.authenticate(&token)).await?;

        *self.config.write().await = Some(ConfiguredState { config, filter });
        *phase = Phase::Idle;
        drop(phase);

        self.emit(SyncState::Idle).await;
        info!("sync engine initialized");
        Ok(())
    }

    /// Record a local mutation in the change log.
    pub async fn record_change(&self, request: ChangeRequest) -> Result<Change> {
        self.changelog.record(request).await
    }

    /// Prune synced change-log history older than `ts`.
    pub async fn prune_synced_before(&self, ts: i64) -> Result<()> {
        self.changelog.clear_before(ts).await
    }

    /// Subscribe to state emissions. Every transition is delivered in
    /// order; nothing coalesces.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<SyncState> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.push(tx);
        rx
    }

    /// The most recently emitted state.
    pub async fn state(&self) -> SyncState {
        self.current_state.read().await.clone()
    }

    async fn emit(&self, state: SyncState) {
        *self.current_state.write().await = state.clone();
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|tx| tx.send(state.clone()).is_ok());
    }

    async fn snapshot_config(&self) -> Result<ConfiguredState> {
        self.config
            .read()
            .await
            .clone()
            .ok_or_else(|| SyncError::validation("engine is not initialized"))
    }

    async fn enter_sync(&self) -> Result<()> {
        let mut phase = self.phase.lock().await;
        match *phase {
            Phase::Uninitialized => Err(SyncError::validation("engine is not initialized")),
            Phase::Syncing => Err(SyncError::validation(
                "a sync operation is already in progress",
            )),
            Phase::Idle => {
                *phase = Phase::Syncing;
                Ok(())
            }
        }
    }

    async fn exit_sync(&self) {
        let mut phase = self.phase.lock().await;
        if *phase == Phase::Syncing {
            *phase = Phase::Idle;
        }
    }

    /// Upload unsynced local changes.
    pub async fn push(&self) -> Result<PushResult> {
        self.enter_sync().await?;
        let result = async {
            let cfg = self.snapshot_config().await?;
            self.do_push(&cfg).await
        }
        .await;
        self.exit_sync().await;
        result
    }

    /// Refresh configured tables from the remote store.
    pub async fn pull(&self) -> Result<PullResult> {
        self.enter_sync().await?;
        let result = async {
            let cfg = self.snapshot_config().await?;
            self.do_pull(&cfg).await
        }
        .await;
        self.exit_sync().await;
        result
    }

    /// Run one full cycle: detect conflicts, push, pull.
    pub async fn sync(&self) -> Result<SyncResult> {
        self.enter_sync().await?;
        let started_ms = now_ms();
        let result = self.do_sync(started_ms).await;
        if let Err(err) = &result {
            self.emit(SyncState::Error {
                kind: err.kind().to_string(),
                message: err.to_string(),
            })
            .await;
            if let Err(history_err) = self
                .changelog
                .record_cycle(SyncCycle {
                    started_at: started_ms,
                    finished_at: now_ms(),
                    pushed: 0,
                    pulled: 0,
                    conflicts: 0,
                    success: false,
                    error: Some(err.to_string()),
                })
                .await
            {
                warn!("failed to record sync history: {history_err}");
            }
        }
        self.exit_sync().await;
        result
    }

    async fn do_push(&self, cfg: &ConfiguredState) -> Result<PushResult> {
        let changes = self.changelog.unsynced(0).await?;
        if changes.is_empty() {
            return Ok(PushResult::default());
        }
        let changes = cfg.filter.filter_changes(changes);
        if changes.is_empty() {
            return Ok(PushResult::default());
        }

        // Group by table, preserving first-appearance order.
        let mut table_order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<Change>> = HashMap::new();
        for change in changes {
            if !groups.contains_key(&change.table) {
                table_order.push(change.table.clone());
            }
            groups.entry(change.table.clone()).or_default().push(change);
        }

        let policy = RetryPolicy::from_config(&cfg.config);
        let options = BatchOptions {
            batch_size: cfg.config.batch_size,
            concurrency: cfg.config.concurrency,
            delay_between_batches: None,
        };
        let compression_enabled = cfg.config.compression_enabled;
        let threshold = cfg.config.compression_threshold_bytes;
        let timeout_ms = cfg.config.remote_timeout_ms;

        let mut uploaded = 0usize;
        let mut failed = 0usize;
        let mut errors: Vec<String> = Vec::new();
        let mut synced_ids: Vec<String> = Vec::new();

        for table in table_order {
            let group = groups.remove(&table).unwrap_or_default();
            let table_total: usize = group.len();
            debug!("pushing {table_total} changes for table {table}");

            let results = process_in_batches(group, &options, |index, batch: Vec<Change>| {
                let remote = Arc::clone(&self.remote);
                let table = table.clone();
                let policy = policy.clone();
                async move {
                    let ids: Vec<String> = batch.iter().map(|c| c.id.clone()).collect();
                    let rows: Vec<Row> = batch.iter().map(change_to_row).collect();
                    let count = rows.len();
                    let payload = build_payload(rows, compression_enabled, threshold)?;
                    retry_with_backoff(&policy, || {
                        let remote = Arc::clone(&remote);
                        let table = table.clone();
                        let payload = payload.clone();
                        async move { remote_call(timeout_ms, remote.upload(&table, payload)).await }
                    })
                    .await
                    .map_err(|e| e.context(format!("upload table {table} batch {index}")))?;
                    Ok((ids, count))
                }
            })
            .await;

            let mut table_uploaded = 0usize;
            let mut table_failed = false;
            for result in results {
                match result {
                    Ok((ids, count)) => {
                        table_uploaded += count;
                        synced_ids.extend(ids);
                    }
                    Err(err) => {
                        table_failed = true;
                        errors.push(err.to_string());
                    }
                }
            }
            uploaded += table_uploaded;

            if table_failed {
                failed += table_total - table_uploaded;
                warn!("push stopped after failures on table {table}");
                break;
            }
        }

        self.changelog.mark_synced(&synced_ids).await?;
        Ok(PushResult {
            uploaded,
            failed,
            errors,
        })
    }

    async fn do_pull(&self, cfg: &ConfiguredState) -> Result<PullResult> {
        let tables: Vec<String> = cfg
            .config
            .tables
            .iter()
            .filter(|t| cfg.filter.accepts(t))
            .cloned()
            .collect();
        if tables.is_empty() {
            return Err(SyncError::validation(
                "pull requires a non-empty tables list",
            ));
        }

        let policy = RetryPolicy::from_config(&cfg.config);
        let timeout_ms = cfg.config.remote_timeout_ms;

        let downloads = join_all(tables.into_iter().map(|table| {
            let remote = Arc::clone(&self.remote);
            let policy = policy.clone();
            async move {
                let result = retry_with_backoff(&policy, || {
                    let remote = Arc::clone(&remote);
                    let table = table.clone();
                    async move { remote_call(timeout_ms, remote.download(&table, None)).await }
                })
                .await;
                (table, result)
            }
        }))
        .await;

        let mut downloaded = 0usize;
        let mut applied = 0usize;
        let mut errors: Vec<String> = Vec::new();

        // Per-table transactions run sequentially; a failure rolls back
        // that table only.
        for (table, result) in downloads {
            match result {
                Err(err) => {
                    errors.push(err.context(format!("download table {table}")).to_string());
                }
                Ok(rows) => {
                    downloaded += rows.len();
                    match self.apply_table(&table, rows).await {
                        Ok(count) => applied += count,
                        Err(err) => {
                            errors.push(err.context(format!("apply table {table}")).to_string());
                        }
                    }
                }
            }
        }

        Ok(PullResult {
            downloaded,
            applied,
            errors,
        })
    }

    /// Coarse refresh: replace the local table contents with the
    /// downloaded snapshot inside one transaction.
    async fn apply_table(&self, table: &str, rows: Vec<Row>) -> Result<usize> {
        let table = table.to_string();
        self.local
            .transaction(move |tx| async move {
                tx.execute(&format!("DELETE FROM {table}"), &[]).await?;
                let mut applied = 0usize;
                for row in rows {
                    if is_tombstone(&row) {
                        continue;
                    }
                    let row = strip_meta(&row);
                    if row.is_empty() {
                        continue;
                    }
                    let columns: Vec<String> = row.keys().cloned().collect();
                    let placeholders: Vec<String> =
                        (1..=columns.len()).map(|i| format!("${i}")).collect();
                    let sql = format!(
                        "INSERT INTO {table} ({}) VALUES ({})",
                        columns.join(", "),
                        placeholders.join(", ")
                    );
                    let params: Vec<Value> = row.values().cloned().collect();
                    tx.execute(&sql, &params).await?;
                    applied += 1;
                }
                Ok(applied)
            })
            .await
    }

    async fn do_sync(&self, started_ms: i64) -> Result<SyncResult> {
        let cfg = self.snapshot_config().await?;
        let started = Instant::now();
        let mut errors: Vec<String> = Vec::new();

        self.emit(SyncState::Syncing {
            progress: PROGRESS_STEPS[0],
        })
        .await;

        let local_changes = cfg
            .filter
            .filter_changes(self.changelog.unsynced(0).await?);
        self.emit(SyncState::Syncing {
            progress: PROGRESS_STEPS[1],
        })
        .await;

        // Download the true remote state for every configured table; the
        // detector must never run against an empty remote set.
        let remote_versions = self.download_remote_versions(&cfg).await?;
        self.emit(SyncState::Syncing {
            progress: PROGRESS_STEPS[2],
        })
        .await;

        let detector = ConflictDetector::new(cfg.config.conflict_timestamp_tolerance_ms);
        let conflicts = detector.detect(&local_changes, &remote_versions);
        self.emit(SyncState::Syncing {
            progress: PROGRESS_STEPS[3],
        })
        .await;

        let manual_hold = !conflicts.is_empty() && cfg.config.conflict_strategy.is_manual();
        let mut pushed = 0usize;
        if manual_hold {
            debug!(
                "{} conflicts held for manual resolution, push skipped",
                conflicts.len()
            );
        } else {
            if !conflicts.is_empty() {
                pushed += self
                    .apply_resolutions(&cfg, &local_changes, &conflicts, &mut errors)
                    .await?;
            }
            let push_result = self.do_push(&cfg).await?;
            pushed += push_result.uploaded;
            errors.extend(push_result.errors);
        }
        self.emit(SyncState::Syncing {
            progress: PROGRESS_STEPS[4],
        })
        .await;

        let mut pulled = 0usize;
        if cfg.config.tables.is_empty() {
            debug!("no tables configured, pull skipped");
        } else {
            let pull_result = self.do_pull(&cfg).await?;
            pulled = pull_result.downloaded;
            errors.extend(pull_result.errors);
        }
        self.emit(SyncState::Syncing {
            progress: PROGRESS_STEPS[5],
        })
        .await;

        let duration_ms = (started.elapsed().as_millis() as u64).max(1);
        if let Err(err) = self
            .changelog
            .record_cycle(SyncCycle {
                started_at: started_ms,
                finished_at: now_ms(),
                pushed: pushed as u64,
                pulled: pulled as u64,
                conflicts: conflicts.len() as u64,
                success: true,
                error: None,
            })
            .await
        {
            warn!("failed to record sync history: {err}");
        }

        // Conflicts that the policy settled do not linger; only a manual
        // hold leaves them outstanding.
        if manual_hold {
            self.emit(SyncState::Conflict {
                conflicts: conflicts.clone(),
            })
            .await;
        } else {
            self.emit(SyncState::Idle).await;
        }

        info!(
            "sync cycle finished: pushed {pushed}, pulled {pulled}, {} conflicts, {} errors",
            conflicts.len(),
            errors.len()
        );
        Ok(SyncResult {
            pushed,
            pulled,
            conflicts,
            errors,
            duration_ms,
        })
    }

    async fn download_remote_versions(&self, cfg: &ConfiguredState) -> Result<Vec<RemoteVersion>> {
        let tables: Vec<String> = cfg
            .config
            .tables
            .iter()
            .filter(|t| cfg.filter.accepts(t))
            .cloned()
            .collect();
        let policy = RetryPolicy::from_config(&cfg.config);
        let timeout_ms = cfg.config.remote_timeout_ms;

        let downloads = join_all(tables.into_iter().map(|table| {
            let remote = Arc::clone(&self.remote);
            let policy = policy.clone();
            async move {
                let result = retry_with_backoff(&policy, || {
                    let remote = Arc::clone(&remote);
                    let table = table.clone();
                    async move { remote_call(timeout_ms, remote.download(&table, None)).await }
                })
                .await;
                (table, result)
            }
        }))
        .await;

        let mut versions = Vec::new();
        for (table, result) in downloads {
            let rows = result.map_err(|e| e.context(format!("download table {table}")))?;
            for row in rows {
                versions.push(RemoteVersion::from_row(table.clone(), row, 0));
            }
        }
        Ok(versions)
    }

    /// Settle resolved conflicts ahead of the push: remote-won changes are
    /// absorbed (marked synced without uploading, the pull applies the
    /// remote value), merged rows are uploaded directly.
    async fn apply_resolutions(
        &self,
        cfg: &ConfiguredState,
        local_changes: &[Change],
        conflicts: &[Conflict],
        errors: &mut Vec<String>,
    ) -> Result<usize> {
        let resolver = ConflictResolver::new(cfg.config.conflict_strategy.clone());
        let resolutions = resolver.resolve_all(conflicts)?;

        let mut ids_by_key: HashMap<(String, String), Vec<String>> = HashMap::new();
        for change in local_changes {
            if let Some(key) = key_projection(change.key_row()) {
                ids_by_key
                    .entry((change.table.clone(), key))
                    .or_default()
                    .push(change.id.clone());
            }
        }

        let policy = RetryPolicy::from_config(&cfg.config);
        let timeout_ms = cfg.config.remote_timeout_ms;
        let mut absorbed: Vec<String> = Vec::new();
        let mut pushed = 0usize;

        for resolution in resolutions {
            let slot = (resolution.table.clone(), resolution.key.clone());
            match resolution.winner {
                Winner::Local => {}
                Winner::Remote => {
                    if let Some(ids) = ids_by_key.get(&slot) {
                        absorbed.extend(ids.iter().cloned());
                    }
                }
                Winner::Merged => {
                    let upload = retry_with_backoff(&policy, || {
                        let remote = Arc::clone(&self.remote);
                        let table = resolution.table.clone();
                        let row = resolution.row.clone();
                        async move {
                            remote_call(
                                timeout_ms,
                                remote.upload(&table, UploadPayload::Rows(vec![row])),
                            )
                            .await
                        }
                    })
                    .await;
                    match upload {
                        Ok(()) => {
                            pushed += 1;
                            if let Some(ids) = ids_by_key.get(&slot) {
                                absorbed.extend(ids.iter().cloned());
                            }
                        }
                        Err(err) => {
                            errors.push(
                                err.context(format!(
                                    "upload merged row for table {}",
                                    resolution.table
                                ))
                                .to_string(),
                            );
                        }
                    }
                }
            }
        }

        if !absorbed.is_empty() {
            self.changelog.mark_synced(&absorbed).await?;
        }
        Ok(pushed)
    }

    /// Start the periodic scheduler. Idempotent.
    ///
    /// Offline ticks emit `Idle` and never touch the remote store.
    pub async fn start_auto_sync(self: &Arc<Self>) {
        let interval_ms = match self.config.read().await.as_ref() {
            Some(state) => state.config.sync_interval_ms,
            None => {
                warn!("auto-sync requested before initialize, ignoring");
                return;
            }
        };

        let mut task = self.auto_task.lock().await;
        if task.is_some() {
            return;
        }

        let engine = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(interval_ms.max(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let network = engine.monitor.current().await;
                if !network.online {
                    debug!("auto-sync tick skipped while offline");
                    engine.emit(SyncState::Idle).await;
                    continue;
                }
                // The cycle runs in its own task: stopping the scheduler
                // must not cancel a sync already in flight.
                let cycle = tokio::spawn({
                    let engine = Arc::clone(&engine);
                    async move { engine.sync().await }
                });
                match cycle.await {
                    Ok(Ok(result)) => debug!(
                        "auto-sync cycle: pushed {}, pulled {}, {} conflicts",
                        result.pushed,
                        result.pulled,
                        result.conflicts.len()
                    ),
                    // The cycle already emitted Error; the next tick
                    // re-attempts from Idle.
                    Ok(Err(err)) => warn!("auto-sync cycle failed: {err}"),
                    Err(join_err) => warn!("auto-sync cycle panicked: {join_err}"),
                }
            }
        }));
        info!("auto-sync started, interval {interval_ms} ms");
    }

    /// Stop the periodic scheduler. Idempotent; an in-flight sync
    /// finishes on its own.
    pub async fn stop_auto_sync(&self) {
        if let Some(task) = self.auto_task.lock().await.take() {
            task.abort();
            info!("auto-sync stopped");
        }
    }

    /// Whether the periodic scheduler is running.
    pub async fn is_auto_syncing(&self) -> bool {
        self.auto_task.lock().await.is_some()
    }
}
