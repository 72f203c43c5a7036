//! End-to-end scenarios across the workspace crates
//!
//! Each test drives the full stack: memory or SQLite change log, bundled
//! SQLite local store, scripted mock remote, and a settable network
//! monitor.

use std::sync::Arc;
use std::time::Duration;

use driftsync::changelog::{ChangeLog, MemoryChangeLog, SqliteChangeLog};
use driftsync::engine::{
    ConflictDetector, ConflictResolver, RemoteVersion, SyncEngine, Winner,
};
use driftsync::local::{LocalGateway, LocalStore, SqliteStore};
use driftsync::net::StaticNetworkMonitor;
use driftsync::remote::{payload, MockRemoteStore, UploadPayload};
use driftsync::types::{
    ChangeRequest, Conflict, ConflictStrategy, Credential, LinkType, Operation, Row, SyncConfig,
    SyncState, Value,
};

async fn local_store() -> Arc<SqliteStore> {
    let store = SqliteStore::open_in_memory().unwrap();
    store
        .execute("CREATE TABLE users (id TEXT PRIMARY KEY, name TEXT)")
        .await
        .unwrap();
    store
        .execute("CREATE TABLE products (id TEXT PRIMARY KEY, name TEXT)")
        .await
        .unwrap();
    store
        .execute("CREATE TABLE logs (id TEXT PRIMARY KEY, line TEXT)")
        .await
        .unwrap();
    Arc::new(store)
}

fn base_config(tables: &[&str]) -> SyncConfig {
    SyncConfig {
        credential: Credential::Token("tok-1".to_string()),
        tables: tables.iter().map(|t| t.to_string()).collect(),
        conflict_strategy: ConflictStrategy::LatestWins,
        initial_retry_delay_ms: 5,
        max_retry_delay_ms: 50,
        ..SyncConfig::default()
    }
}

fn row2(k1: &str, v1: &str, k2: &str, v2: &str) -> Row {
    let mut row = Row::new();
    row.insert(k1.to_string(), Value::text(v1));
    row.insert(k2.to_string(), Value::text(v2));
    row
}

/// Two recorded inserts upload in one batch and leave the log clean.
#[tokio::test]
async fn scenario_push_two_inserts() {
    let changelog = Arc::new(MemoryChangeLog::new());
    let remote = MockRemoteStore::new();
    let monitor = Arc::new(StaticNetworkMonitor::online(LinkType::Wifi));
    let engine = Arc::new(SyncEngine::new(
        changelog.clone(),
        LocalGateway::new(local_store().await),
        Arc::new(remote.clone()),
        monitor,
    ));
    engine.initialize(base_config(&["users"])).await.unwrap();

    engine
        .record_change(ChangeRequest::new(
            "users",
            Operation::Insert,
            row2("id", "1", "name", "Alice"),
        ))
        .await
        .unwrap();
    engine
        .record_change(ChangeRequest::new(
            "users",
            Operation::Insert,
            row2("id", "2", "name", "Bob"),
        ))
        .await
        .unwrap();

    let result = engine.push().await.unwrap();
    assert_eq!(result.uploaded, 2);
    assert!(changelog.unsynced(0).await.unwrap().is_empty());
}

/// Auto-sync idles while offline and starts a cycle once online.
#[tokio::test]
async fn scenario_offline_to_online_transition() {
    let changelog = Arc::new(MemoryChangeLog::new());
    let remote = MockRemoteStore::new();
    let monitor = Arc::new(StaticNetworkMonitor::offline());
    let engine = Arc::new(SyncEngine::new(
        changelog,
        LocalGateway::new(local_store().await),
        Arc::new(remote.clone()),
        monitor.clone(),
    ));

    let mut config = base_config(&["users"]);
    config.sync_interval_ms = 100;
    engine.initialize(config).await.unwrap();

    let mut states = engine.subscribe().await;
    engine.start_auto_sync().await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    monitor.set_online(LinkType::Wifi);
    tokio::time::sleep(Duration::from_millis(250)).await;
    engine.stop_auto_sync().await;

    let mut seen = Vec::new();
    while let Ok(state) = states.try_recv() {
        seen.push(state);
    }

    let idle_at = seen
        .iter()
        .position(|s| *s == SyncState::Idle)
        .expect("stream contains Idle");
    let syncing_at = seen
        .iter()
        .position(|s| matches!(s, SyncState::Syncing { .. }))
        .expect("stream contains Syncing");
    assert!(idle_at < syncing_at);
    let after_syncing = &seen[syncing_at..];
    assert!(after_syncing
        .iter()
        .any(|s| matches!(s, SyncState::Idle | SyncState::Conflict { .. })));
}

/// Latest-wins resolves a divergent record to the newer remote value.
#[test]
fn scenario_latest_wins_conflict() {
    let detector = ConflictDetector::default();
    let local = vec![driftsync::types::Change {
        id: "c1".to_string(),
        table: "users".to_string(),
        op: Operation::Update,
        timestamp: 1_000,
        data: row2("id", "1", "name", "Local"),
        old_data: None,
    }];
    let mut remote_row = row2("id", "1", "name", "Remote");
    remote_row.insert("_sync_timestamp".to_string(), Value::integer(2_000));
    let remote = vec![RemoteVersion::from_row("users", remote_row, 0)];

    let conflicts = detector.detect(&local, &remote);
    assert_eq!(conflicts.len(), 1);

    let resolution = ConflictResolver::new(ConflictStrategy::LatestWins)
        .resolve(&conflicts[0])
        .unwrap();
    assert_eq!(resolution.winner, Winner::Remote);
    assert_eq!(resolution.row, row2("id", "1", "name", "Remote"));
}

/// The table filter keeps excluded tables out of the upload stream.
#[tokio::test]
async fn scenario_table_filter_excludes_logs() {
    let changelog = Arc::new(MemoryChangeLog::new());
    let remote = MockRemoteStore::new();
    let monitor = Arc::new(StaticNetworkMonitor::online(LinkType::Ethernet));
    let engine = Arc::new(SyncEngine::new(
        changelog,
        LocalGateway::new(local_store().await),
        Arc::new(remote.clone()),
        monitor,
    ));

    let mut config = base_config(&["users", "products"]);
    config.table_filter.exclude = vec!["logs".to_string()];
    engine.initialize(config).await.unwrap();

    for (table, id) in [("users", "1"), ("products", "2"), ("logs", "3")] {
        engine
            .record_change(ChangeRequest::new(
                table,
                Operation::Insert,
                row2("id", id, "name", "x"),
            ))
            .await
            .unwrap();
    }
    engine.push().await.unwrap();

    let tables = remote.uploaded_tables().await;
    assert_eq!(tables, vec!["users", "products"]);
}

/// Payloads above the threshold travel gzipped and decompress
/// byte-for-byte.
#[tokio::test]
async fn scenario_compression_above_threshold() {
    let changelog = Arc::new(MemoryChangeLog::new());
    let remote = MockRemoteStore::new();
    let monitor = Arc::new(StaticNetworkMonitor::online(LinkType::Wifi));
    let engine = Arc::new(SyncEngine::new(
        changelog,
        LocalGateway::new(local_store().await),
        Arc::new(remote.clone()),
        monitor,
    ));

    let mut config = base_config(&["users"]);
    config.compression_enabled = true;
    config.compression_threshold_bytes = 100;
    engine.initialize(config).await.unwrap();

    // Roughly 1.2 kB of JSON once encoded.
    engine
        .record_change(ChangeRequest::new(
            "users",
            Operation::Insert,
            row2("id", "1", "name", &"x".repeat(1_150)),
        ))
        .await
        .unwrap();
    engine.push().await.unwrap();

    let uploads = remote.uploads().await;
    assert_eq!(uploads.len(), 1);
    match &uploads[0].1 {
        UploadPayload::Gzip(bytes) => {
            assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
            let original = payload::encode_rows(&[row2("id", "1", "name", &"x".repeat(1_150))])
                .unwrap();
            assert_eq!(payload::decompress(bytes).unwrap(), original);
        }
        other => panic!("expected compressed payload, got {other:?}"),
    }
}

/// A transient upload failure is retried to success.
#[tokio::test]
async fn scenario_retry_on_transient_network_error() {
    let changelog = Arc::new(MemoryChangeLog::new());
    let remote = MockRemoteStore::new();
    let monitor = Arc::new(StaticNetworkMonitor::online(LinkType::Wifi));
    let engine = Arc::new(SyncEngine::new(
        changelog,
        LocalGateway::new(local_store().await),
        Arc::new(remote.clone()),
        monitor,
    ));
    engine.initialize(base_config(&["users"])).await.unwrap();

    engine
        .record_change(ChangeRequest::new(
            "users",
            Operation::Insert,
            row2("id", "1", "name", "Alice"),
        ))
        .await
        .unwrap();
    remote
        .script_upload_failure(driftsync::types::SyncError::network("reset"))
        .await;
    remote
        .script_upload_failure(driftsync::types::SyncError::network("reset"))
        .await;

    let result = engine.push().await.unwrap();
    assert_eq!(result.uploaded, 1);
    assert!(result.errors.is_empty());
    assert_eq!(remote.upload_calls().await, 3);
}

/// A full cycle against the SQLite change log survives a process
/// restart: synced rows stay synced across reopen.
#[tokio::test]
async fn scenario_sqlite_changelog_full_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("changes.db");

    {
        let changelog = Arc::new(SqliteChangeLog::open(&path).unwrap());
        let remote = MockRemoteStore::new();
        let monitor = Arc::new(StaticNetworkMonitor::online(LinkType::Wifi));
        let engine = Arc::new(SyncEngine::new(
            changelog.clone(),
            LocalGateway::new(local_store().await),
            Arc::new(remote.clone()),
            monitor,
        ));
        engine.initialize(base_config(&["users"])).await.unwrap();

        engine
            .record_change(ChangeRequest::new(
                "users",
                Operation::Insert,
                row2("id", "1", "name", "Alice"),
            ))
            .await
            .unwrap();
        let result = engine.sync().await.unwrap();
        assert_eq!(result.pushed, 1);
        assert!(result.duration_ms >= 1);
    }

    let reopened = SqliteChangeLog::open(&path).unwrap();
    assert!(reopened.unsynced(0).await.unwrap().is_empty());
    let cycles = reopened.recent_cycles(5).await.unwrap();
    assert_eq!(cycles.len(), 1);
    assert!(cycles[0].success);
}

/// Update-vs-delete asymmetry surfaces with an empty row on the deleting
/// side, and manual policy refuses to pick.
#[test]
fn scenario_update_vs_delete_manual() {
    let detector = ConflictDetector::default();
    let local = vec![driftsync::types::Change {
        id: "c1".to_string(),
        table: "users".to_string(),
        op: Operation::Update,
        timestamp: 5_000,
        data: row2("id", "1", "name", "Edited"),
        old_data: None,
    }];
    let mut tombstone = Row::new();
    tombstone.insert("id".to_string(), Value::text("1"));
    tombstone.insert("_sync_deleted".to_string(), Value::boolean(true));
    tombstone.insert("_sync_timestamp".to_string(), Value::integer(6_000));
    let remote = vec![RemoteVersion::from_row("users", tombstone, 0)];

    let conflicts: Vec<Conflict> = detector.detect(&local, &remote);
    assert_eq!(conflicts.len(), 1);
    assert!(conflicts[0].remote.is_empty());

    let err = ConflictResolver::new(ConflictStrategy::Manual)
        .resolve(&conflicts[0])
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");
}
