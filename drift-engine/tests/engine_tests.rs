//! Integration tests for the sync engine against in-memory collaborators

use std::sync::Arc;
use std::time::Duration;

use drift_changelog::{ChangeLog, MemoryChangeLog};
use drift_engine::SyncEngine;
use drift_local::{LocalGateway, LocalStore, SqliteStore};
use drift_net::StaticNetworkMonitor;
use drift_remote::MockRemoteStore;
use drift_types::{
    now_ms, ChangeRequest, ConflictStrategy, Credential, LinkType, Operation, Row, SyncConfig,
    SyncError, SyncState, TableFilterConfig, Value,
};

struct Harness {
    engine: Arc<SyncEngine>,
    changelog: Arc<MemoryChangeLog>,
    remote: MockRemoteStore,
    monitor: Arc<StaticNetworkMonitor>,
    local: LocalGateway,
}

async fn harness() -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let changelog = Arc::new(MemoryChangeLog::new());
    let remote = MockRemoteStore::new();
    let monitor = Arc::new(StaticNetworkMonitor::online(LinkType::Wifi));

    let store = SqliteStore::open_in_memory().unwrap();
    store
        .execute("CREATE TABLE users (id TEXT PRIMARY KEY, name TEXT)")
        .await
        .unwrap();
    store
        .execute("CREATE TABLE products (id TEXT PRIMARY KEY, name TEXT)")
        .await
        .unwrap();
    let local = LocalGateway::new(Arc::new(store));

    let engine = Arc::new(SyncEngine::new(
        changelog.clone(),
        local.clone(),
        Arc::new(remote.clone()),
        monitor.clone(),
    ));
    Harness {
        engine,
        changelog,
        remote,
        monitor,
        local,
    }
}

fn config() -> SyncConfig {
    SyncConfig {
        credential: Credential::Token("tok-1".to_string()),
        tables: vec!["users".to_string()],
        conflict_strategy: ConflictStrategy::LatestWins,
        initial_retry_delay_ms: 5,
        max_retry_delay_ms: 40,
        ..SyncConfig::default()
    }
}

fn user_row(id: &str, name: &str) -> Row {
    let mut row = Row::new();
    row.insert("id".to_string(), Value::text(id));
    row.insert("name".to_string(), Value::text(name));
    row
}

fn insert(table: &str, id: &str, name: &str) -> ChangeRequest {
    ChangeRequest::new(table, Operation::Insert, user_row(id, name))
}

#[tokio::test]
async fn test_initialize_authenticates_and_emits_idle() {
    let h = harness().await;
    let mut states = h.engine.subscribe().await;

    h.engine.initialize(config()).await.unwrap();
    assert_eq!(h.remote.auth_calls().await, 1);
    assert_eq!(states.recv().await.unwrap(), SyncState::Idle);

    // A second initialize is rejected.
    let err = h.engine.initialize(config()).await.unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[tokio::test]
async fn test_initialize_surfaces_auth_errors_verbatim() {
    let h = harness().await;
    h.remote
        .script_auth_failure(SyncError::auth("credential rejected"))
        .await;

    let err = h.engine.initialize(config()).await.unwrap_err();
    match err {
        SyncError::Auth {
            requires_refresh, ..
        } => assert!(!requires_refresh),
        other => panic!("auth error was wrapped: {other:?}"),
    }

    // Operations before a successful initialize are rejected.
    let err = h.engine.push().await.unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[tokio::test]
async fn test_push_uploads_and_marks_synced() {
    let h = harness().await;
    h.engine.initialize(config()).await.unwrap();

    h.engine
        .record_change(insert("users", "1", "Alice"))
        .await
        .unwrap();
    h.engine
        .record_change(insert("users", "2", "Bob"))
        .await
        .unwrap();

    let result = h.engine.push().await.unwrap();
    assert_eq!(result.uploaded, 2);
    assert_eq!(result.failed, 0);
    assert!(result.errors.is_empty());

    assert!(h.changelog.unsynced(0).await.unwrap().is_empty());
    let uploads = h.remote.uploads().await;
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, "users");
    assert_eq!(uploads[0].1.rows().unwrap().len(), 2);
}

#[tokio::test]
async fn test_push_with_nothing_to_do_is_a_noop() {
    let h = harness().await;
    h.engine.initialize(config()).await.unwrap();

    let result = h.engine.push().await.unwrap();
    assert_eq!(result.uploaded, 0);
    assert_eq!(h.remote.upload_calls().await, 0);
}

#[tokio::test]
async fn test_push_respects_table_filter() {
    let h = harness().await;
    let mut cfg = config();
    cfg.table_filter = TableFilterConfig {
        exclude: vec!["logs".to_string()],
        ..TableFilterConfig::default()
    };
    h.engine.initialize(cfg).await.unwrap();

    h.engine
        .record_change(insert("users", "1", "Alice"))
        .await
        .unwrap();
    h.engine
        .record_change(insert("products", "1", "Widget"))
        .await
        .unwrap();
    h.engine
        .record_change(insert("logs", "1", "noise"))
        .await
        .unwrap();

    let result = h.engine.push().await.unwrap();
    assert_eq!(result.uploaded, 2);
    assert_eq!(h.remote.uploaded_tables().await, vec!["users", "products"]);

    // The filtered-out change stays unsynced.
    let remaining = h.changelog.unsynced(0).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].table, "logs");
}

#[tokio::test]
async fn test_push_retries_transient_failures() {
    let h = harness().await;
    h.engine.initialize(config()).await.unwrap();

    h.engine
        .record_change(insert("users", "1", "Alice"))
        .await
        .unwrap();
    h.remote
        .script_upload_failure(SyncError::network("connection reset"))
        .await;
    h.remote
        .script_upload_failure(SyncError::network("connection reset"))
        .await;

    let result = h.engine.push().await.unwrap();
    assert_eq!(result.uploaded, 1);
    assert_eq!(h.remote.upload_calls().await, 3);
}

#[tokio::test]
async fn test_push_partial_failure_preserves_succeeded_batches() {
    let h = harness().await;
    let mut cfg = config();
    cfg.batch_size = 1;
    cfg.max_retries = 1;
    h.engine.initialize(cfg).await.unwrap();

    for i in 0..3 {
        h.engine
            .record_change(insert("users", &i.to_string(), "x"))
            .await
            .unwrap();
    }
    h.remote
        .script_upload_failure(SyncError::network_status(400, "bad request"))
        .await;

    let result = h.engine.push().await.unwrap();
    assert_eq!(result.uploaded, 2);
    assert_eq!(result.failed, 1);
    assert_eq!(result.errors.len(), 1);

    // Only the failed batch's change is still unsynced.
    assert_eq!(h.changelog.unsynced(0).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_pull_replaces_local_table_contents() {
    let h = harness().await;
    h.engine.initialize(config()).await.unwrap();

    h.local
        .execute(
            "INSERT INTO users (id, name) VALUES ($1, $2)",
            &[Value::text("stale"), Value::text("Old")],
        )
        .await
        .unwrap();

    let mut kept = user_row("1", "Fresh");
    kept.insert("_sync_timestamp".to_string(), Value::integer(now_ms()));
    let mut tombstone = user_row("2", "Gone");
    tombstone.insert("_sync_deleted".to_string(), Value::boolean(true));
    h.remote.set_table("users", vec![kept, tombstone]).await;

    let result = h.engine.pull().await.unwrap();
    assert_eq!(result.downloaded, 2);
    assert_eq!(result.applied, 1);
    assert!(result.errors.is_empty());

    let rows = h.local.query("SELECT id, name FROM users", &[]).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], Value::text("1"));
    assert_eq!(rows[0]["name"], Value::text("Fresh"));
}

#[tokio::test]
async fn test_pull_failure_rolls_back_that_table_only() {
    let h = harness().await;
    let mut cfg = config();
    cfg.tables = vec!["users".to_string(), "products".to_string()];
    h.engine.initialize(cfg).await.unwrap();

    h.remote.set_table("users", vec![user_row("1", "A")]).await;
    // Column the local products table does not have.
    let mut bad = Row::new();
    bad.insert("id".to_string(), Value::text("1"));
    bad.insert("no_such_column".to_string(), Value::text("x"));
    h.remote.set_table("products", vec![bad]).await;

    let result = h.engine.pull().await.unwrap();
    assert_eq!(result.downloaded, 2);
    assert_eq!(result.applied, 1);
    assert_eq!(result.errors.len(), 1);

    let users = h.local.query("SELECT * FROM users", &[]).await.unwrap();
    assert_eq!(users.len(), 1);
    let products = h.local.query("SELECT * FROM products", &[]).await.unwrap();
    assert!(products.is_empty());
}

#[tokio::test]
async fn test_pull_requires_tables() {
    let h = harness().await;
    let mut cfg = config();
    cfg.tables = Vec::new();
    h.engine.initialize(cfg).await.unwrap();

    let err = h.engine.pull().await.unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[tokio::test]
async fn test_sync_with_no_changes_is_clean() {
    let h = harness().await;
    h.engine.initialize(config()).await.unwrap();
    let mut states = h.engine.subscribe().await;

    let result = h.engine.sync().await.unwrap();
    assert_eq!(result.pushed, 0);
    assert!(result.conflicts.is_empty());
    assert!(result.errors.is_empty());
    assert!(result.duration_ms >= 1);
    assert!(h.changelog.is_empty().await);

    // Progress milestones arrive in order, then Idle.
    let mut seen = Vec::new();
    while let Ok(state) = states.try_recv() {
        seen.push(state);
    }
    let expected: Vec<SyncState> = [10u8, 30, 40, 60, 80, 100]
        .into_iter()
        .map(|progress| SyncState::Syncing { progress })
        .chain(std::iter::once(SyncState::Idle))
        .collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn test_sync_latest_wins_absorbs_remote_victory() {
    let h = harness().await;
    h.engine.initialize(config()).await.unwrap();

    h.engine
        .record_change(ChangeRequest::new(
            "users",
            Operation::Update,
            user_row("1", "Local"),
        ))
        .await
        .unwrap();

    let mut remote_row = user_row("1", "Remote");
    remote_row.insert(
        "_sync_timestamp".to_string(),
        Value::integer(now_ms() + 60_000),
    );
    h.remote.set_table("users", vec![remote_row]).await;

    let result = h.engine.sync().await.unwrap();
    assert_eq!(result.conflicts.len(), 1);
    // Remote won: the local change is absorbed, not uploaded.
    assert_eq!(result.pushed, 0);
    assert_eq!(h.remote.upload_calls().await, 0);
    assert!(h.changelog.unsynced(0).await.unwrap().is_empty());

    // The pull applied the remote value locally, without metadata.
    let rows = h.local.query("SELECT * FROM users", &[]).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], Value::text("Remote"));
    assert!(!rows[0].contains_key("_sync_timestamp"));

    assert_eq!(h.engine.state().await, SyncState::Idle);
}

#[tokio::test]
async fn test_sync_manual_policy_holds_push() {
    let h = harness().await;
    let mut cfg = config();
    cfg.conflict_strategy = ConflictStrategy::Manual;
    h.engine.initialize(cfg).await.unwrap();

    h.engine
        .record_change(ChangeRequest::new(
            "users",
            Operation::Update,
            user_row("1", "Local"),
        ))
        .await
        .unwrap();
    let mut remote_row = user_row("1", "Remote");
    remote_row.insert(
        "_sync_timestamp".to_string(),
        Value::integer(now_ms() + 60_000),
    );
    h.remote.set_table("users", vec![remote_row]).await;

    let result = h.engine.sync().await.unwrap();
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.pushed, 0);
    assert_eq!(h.remote.upload_calls().await, 0);
    // The change stays unsynced for the embedder to settle.
    assert_eq!(h.changelog.unsynced(0).await.unwrap().len(), 1);

    match h.engine.state().await {
        SyncState::Conflict { conflicts } => assert_eq!(conflicts.len(), 1),
        other => panic!("expected conflict state, got {other:?}"),
    }
}

#[tokio::test]
async fn test_sync_records_history() {
    let h = harness().await;
    h.engine.initialize(config()).await.unwrap();
    h.engine
        .record_change(insert("users", "1", "Alice"))
        .await
        .unwrap();

    h.engine.sync().await.unwrap();
    let cycles = h.changelog.recent_cycles(5).await.unwrap();
    assert_eq!(cycles.len(), 1);
    assert!(cycles[0].success);
    assert_eq!(cycles[0].pushed, 1);
}

#[tokio::test]
async fn test_auto_sync_offline_never_touches_remote() {
    let h = harness().await;
    let mut cfg = config();
    cfg.sync_interval_ms = 25;
    h.engine.initialize(cfg).await.unwrap();
    h.monitor.set_offline();

    let auth_calls = h.remote.auth_calls().await;
    h.engine.start_auto_sync().await;
    tokio::time::sleep(Duration::from_millis(90)).await;
    h.engine.stop_auto_sync().await;

    assert_eq!(h.remote.auth_calls().await, auth_calls);
    assert_eq!(h.remote.upload_calls().await, 0);
    assert_eq!(h.remote.download_calls().await, 0);
}

#[tokio::test]
async fn test_auto_sync_runs_when_back_online() {
    let h = harness().await;
    let mut cfg = config();
    cfg.sync_interval_ms = 30;
    h.monitor.set_offline();
    h.engine.initialize(cfg).await.unwrap();

    let mut states = h.engine.subscribe().await;
    h.engine.start_auto_sync().await;
    assert!(h.engine.is_auto_syncing().await);

    tokio::time::sleep(Duration::from_millis(50)).await;
    h.monitor.set_online(LinkType::Wifi);
    tokio::time::sleep(Duration::from_millis(120)).await;
    h.engine.stop_auto_sync().await;
    h.engine.stop_auto_sync().await;
    assert!(!h.engine.is_auto_syncing().await);

    let mut seen = Vec::new();
    while let Ok(state) = states.try_recv() {
        seen.push(state);
    }
    let idle_at = seen
        .iter()
        .position(|s| *s == SyncState::Idle)
        .expect("offline ticks emit Idle");
    let syncing_at = seen
        .iter()
        .position(|s| matches!(s, SyncState::Syncing { .. }))
        .expect("online tick starts a cycle");
    assert!(idle_at < syncing_at);
    assert!(matches!(
        seen.last(),
        Some(SyncState::Idle) | Some(SyncState::Conflict { .. })
    ));
}

#[tokio::test]
async fn test_auto_sync_error_does_not_latch() {
    let h = harness().await;
    let mut cfg = config();
    cfg.sync_interval_ms = 25;
    cfg.max_retries = 1;
    h.engine.initialize(cfg).await.unwrap();

    // First cycle's download fails hard, later cycles succeed.
    h.remote
        .script_download_failure(SyncError::network_status(404, "missing table"))
        .await;
    h.remote.set_table("users", Vec::new()).await;

    let mut states = h.engine.subscribe().await;
    h.engine.start_auto_sync().await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    h.engine.stop_auto_sync().await;

    let mut seen = Vec::new();
    while let Ok(state) = states.try_recv() {
        seen.push(state);
    }
    let error_at = seen
        .iter()
        .position(|s| matches!(s, SyncState::Error { .. }))
        .expect("failed cycle emits Error");
    let recovered = seen[error_at + 1..]
        .iter()
        .any(|s| *s == SyncState::Idle);
    assert!(recovered, "engine latched in Error: {seen:?}");
}
