//! Integration tests for the offline mutation queue and sync runs.
//!
//! Drives a SQLite-backed store through the sync engine with an in-process
//! loopback remote:
//! - Offline create followed by a successful sync
//! - Retry exhaustion after repeated transport failures, then manual retry
//! - Unreachable remote and empty queue short-circuits
//! - Wholesale batch failure accounting
//! - Durability across reopen and serialized concurrent runs

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use tasksync::store::{MutationQueue, NewTask, SqliteStore, SyncStatus, TaskPatch, TaskStore};
use tasksync::sync::{SyncEngine, SyncResult, SyncSettings};
use tasksync::transport::loopback::LoopbackTransport;
use tasksync_proto::mutation::OperationKind;
use tasksync_proto::task::TaskId;

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

type Engine = SyncEngine<SqliteStore, SqliteStore, LoopbackTransport>;

fn make_engine(store: &SqliteStore, settings: SyncSettings) -> Engine {
    SyncEngine::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        LoopbackTransport::new(),
        settings,
    )
}

fn setup() -> (Engine, SqliteStore) {
    let store = SqliteStore::open_in_memory().unwrap();
    (make_engine(&store, SyncSettings::default()), store)
}

async fn create(store: &SqliteStore, title: &str) -> TaskId {
    store
        .create_task(NewTask {
            title: title.to_string(),
            description: None,
        })
        .await
        .unwrap()
        .id
}

async fn rename(store: &SqliteStore, id: &TaskId, title: &str) {
    store
        .update_task(
            id,
            TaskPatch {
                title: Some(title.to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
}

/// No live task may sit in `pending` once the queue holds nothing for it.
async fn assert_no_orphaned_pending(store: &SqliteStore) {
    let queued: Vec<TaskId> = store
        .pending_items(u32::MAX)
        .await
        .unwrap()
        .iter()
        .map(|item| item.task_id)
        .collect();
    for task in store.list_tasks(true).await.unwrap() {
        if task.sync_status == SyncStatus::Pending {
            assert!(
                queued.contains(&task.id),
                "task {} is pending with an empty queue",
                task.id
            );
        }
    }
}

// =============================================================================
// Offline create then sync
// =============================================================================

#[tokio::test]
async fn offline_create_then_sync() {
    let (engine, store) = setup();
    engine.transport().set_reachable(false);

    let id = create(&store, "X").await;
    let items = store.pending_items(3).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].operation(), OperationKind::Create);

    let offline = engine.sync().await.unwrap();
    assert!(!offline.success);
    assert_eq!(store.pending_count().await.unwrap(), 1);

    engine.transport().set_reachable(true);
    let result = engine.sync().await.unwrap();

    assert!(result.success);
    assert_eq!(result.synced, 1);
    assert_eq!(store.pending_count().await.unwrap(), 0);
    let task = store.get_task(&id).await.unwrap().unwrap();
    assert_eq!(task.sync_status, SyncStatus::Synced);
    assert!(task.server_id.is_some());
    assert!(task.last_synced_at.is_some());
    assert_no_orphaned_pending(&store).await;
}

// =============================================================================
// Retry exhaustion
// =============================================================================

#[tokio::test]
async fn three_failed_syncs_mark_task_error() {
    let (engine, store) = setup();
    let id = create(&store, "A").await;
    rename(&store, &id, "A1").await;
    rename(&store, &id, "A2").await;
    rename(&store, &id, "A3").await;
    assert_eq!(store.pending_count().await.unwrap(), 4);
    engine.transport().set_failing(true);

    for attempt in 1..=3u32 {
        let result = engine.sync().await.unwrap();
        assert!(!result.success);
        assert_eq!(result.failed, 4);
        if attempt < 3 {
            let items = store.pending_items(3).await.unwrap();
            assert!(items.iter().all(|i| i.retry_count == attempt));
            let task = store.get_task(&id).await.unwrap().unwrap();
            assert_eq!(task.sync_status, SyncStatus::Pending);
        }
    }

    let task = store.get_task(&id).await.unwrap().unwrap();
    assert_eq!(task.sync_status, SyncStatus::Error);
    assert!(task.last_error.as_deref().unwrap().contains("3 attempts"));
    assert_eq!(store.pending_count().await.unwrap(), 0);

    let fourth = engine.sync().await.unwrap();
    assert_eq!(fourth, SyncResult::empty());
    assert_eq!(engine.transport().submitted().len(), 3);
}

#[tokio::test]
async fn errored_task_recovers_through_retry() {
    let store = SqliteStore::open_in_memory().unwrap();
    let engine = make_engine(
        &store,
        SyncSettings {
            max_retries: 1,
            ..SyncSettings::default()
        },
    );
    let id = create(&store, "flaky").await;
    engine.transport().set_failing(true);
    engine.sync().await.unwrap();
    assert_eq!(
        store.get_task(&id).await.unwrap().unwrap().sync_status,
        SyncStatus::Error
    );

    let retried = store.retry_task(&id).await.unwrap().unwrap();
    assert_eq!(retried.sync_status, SyncStatus::Pending);
    let items = store.pending_items(1).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].operation(), OperationKind::Create);

    engine.transport().set_failing(false);
    let result = engine.sync().await.unwrap();
    assert!(result.success);
    let task = store.get_task(&id).await.unwrap().unwrap();
    assert_eq!(task.sync_status, SyncStatus::Synced);
    assert!(task.last_error.is_none());
}

// =============================================================================
// Short-circuits and wholesale failure
// =============================================================================

#[tokio::test]
async fn unreachable_run_changes_nothing() {
    let (engine, store) = setup();
    for title in ["a", "b", "c"] {
        create(&store, title).await;
    }
    let before = store.pending_items(3).await.unwrap();
    engine.transport().set_reachable(false);

    let result = engine.sync().await.unwrap();

    assert!(!result.success);
    assert_eq!(result.synced, 0);
    assert_eq!(result.failed, 0);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].task_id.is_none());
    assert_eq!(store.pending_items(3).await.unwrap(), before);
}

#[tokio::test]
async fn empty_queue_sync_succeeds() {
    let (engine, _store) = setup();
    let result = engine.sync().await.unwrap();
    assert!(result.success);
    assert_eq!(result.synced, 0);
    assert_eq!(result.failed, 0);
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn wholesale_failure_counts_each_item_once() {
    let store = SqliteStore::open_in_memory().unwrap();
    let engine = make_engine(
        &store,
        SyncSettings {
            batch_size: 3,
            ..SyncSettings::default()
        },
    );
    for i in 0..7 {
        create(&store, &format!("task {i}")).await;
    }
    engine.transport().set_failing(true);

    let result = engine.sync().await.unwrap();

    assert_eq!(result.failed, 7);
    assert_eq!(result.errors.len(), 7);
    // Later batches still ran after the first one failed.
    assert_eq!(engine.transport().submitted().len(), 3);
    let items = store.pending_items(3).await.unwrap();
    assert_eq!(items.len(), 7);
    assert!(items.iter().all(|i| i.retry_count == 1));
    assert!(result.errors.iter().all(|e| e.operation == Some(OperationKind::Create)));
}

// =============================================================================
// Ordering, durability and concurrency
// =============================================================================

#[tokio::test]
async fn per_task_order_is_preserved_on_the_wire() {
    let (engine, store) = setup();
    let a = create(&store, "a").await;
    let b = create(&store, "b").await;
    rename(&store, &a, "a2").await;
    store.delete_task(&b).await.unwrap();

    engine.sync().await.unwrap();

    let sent: Vec<_> = engine.transport().submitted()[0]
        .items
        .iter()
        .map(|i| (i.task_id, i.operation))
        .collect();
    assert_eq!(
        sent,
        vec![
            (a, OperationKind::Create),
            (b, OperationKind::Create),
            (a, OperationKind::Update),
            (b, OperationKind::Delete),
        ]
    );
    assert_no_orphaned_pending(&store).await;
}

#[tokio::test]
async fn queue_survives_restart_and_syncs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.db");

    let id = {
        let store = SqliteStore::open(&path).unwrap();
        create(&store, "persisted").await
    };

    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(store.pending_count().await.unwrap(), 1);
    let engine = make_engine(&store, SyncSettings::default());
    let result = engine.sync().await.unwrap();
    assert_eq!(result.synced, 1);

    let reopened = SqliteStore::open(&path).unwrap();
    let task = reopened.get_task(&id).await.unwrap().unwrap();
    assert_eq!(task.sync_status, SyncStatus::Synced);
    assert!(reopened.last_sync_at().await.unwrap().is_some());
}

#[tokio::test]
async fn concurrent_runs_never_double_submit() {
    let (engine, store) = setup();
    for i in 0..10 {
        create(&store, &format!("t{i}")).await;
    }
    let engine = Arc::new(engine);

    let first = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.sync().await.unwrap() }
    });
    let second = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.sync().await.unwrap() }
    });
    let (first, second) = (first.await.unwrap(), second.await.unwrap());

    assert_eq!(first.synced + second.synced, 10);
    let submitted: usize = engine
        .transport()
        .submitted()
        .iter()
        .map(|b| b.items.len())
        .sum();
    assert_eq!(submitted, 10);
    assert_eq!(store.pending_count().await.unwrap(), 0);
}
