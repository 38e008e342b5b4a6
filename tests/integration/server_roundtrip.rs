//! End-to-end tests: client engine over HTTP against an in-process server.
//!
//! Validates the wire contract and the server's conflict rules together:
//! - Queued creates, updates and deletes reach the server in order
//! - A newer edit made on the server comes back as a conflict and wins
//! - Oversized batches are rejected wholesale (HTTP 413)
//! - A stopped server is reported as unreachable

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tasksync::store::{MutationQueue, NewTask, SqliteStore, SyncStatus, TaskPatch, TaskStore};
use tasksync::sync::{SyncEngine, SyncSettings};
use tasksync::transport::http::HttpTransport;
use tasksync_proto::task::TaskId;
use tasksync_server::server::{SyncState, start_server_with_state};
use tasksync_server::store::ServerStore;

type Engine = SyncEngine<SqliteStore, SqliteStore, HttpTransport>;

/// Start the sync server in-process and return its base URL and state.
async fn start_sync_server(
    max_batch_items: usize,
) -> (String, Arc<SyncState>, tokio::task::JoinHandle<()>) {
    let state = Arc::new(SyncState::with_config(max_batch_items, ServerStore::new()));
    let (addr, handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start sync server");
    (format!("http://{addr}"), state, handle)
}

fn make_engine(url: &str, store: &SqliteStore, settings: SyncSettings) -> Engine {
    SyncEngine::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        HttpTransport::new(url).unwrap(),
        settings,
    )
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

#[tokio::test]
async fn queued_changes_reach_the_server() {
    let (url, state, _handle) = start_sync_server(500).await;
    let store = SqliteStore::open_in_memory().unwrap();
    let engine = make_engine(&url, &store, SyncSettings::default());

    let kept = create(&store, "kept").await;
    let dropped = create(&store, "dropped").await;
    store
        .update_task(
            &kept,
            TaskPatch {
                completed: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    store.delete_task(&dropped).await.unwrap();

    let result = engine.sync().await.unwrap();

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.synced, 4);
    assert_eq!(store.pending_count().await.unwrap(), 0);

    let on_server = state.store.get(&kept).await.unwrap();
    assert!(on_server.task.completed);
    let local = store.get_task(&kept).await.unwrap().unwrap();
    assert_eq!(local.server_id.as_deref(), Some(on_server.server_id.as_str()));
    assert_eq!(local.sync_status, SyncStatus::Synced);

    assert!(state.store.get(&dropped).await.unwrap().task.deleted);
    assert_eq!(state.store.list(false).await.len(), 1);
}

#[tokio::test]
async fn server_side_newer_edit_wins_conflict() {
    let (url, state, _handle) = start_sync_server(500).await;
    let store = SqliteStore::open_in_memory().unwrap();
    let engine = make_engine(&url, &store, SyncSettings::default());

    let id = create(&store, "original").await;
    engine.sync().await.unwrap();

    store
        .update_task(
            &id,
            TaskPatch {
                title: Some("client edit".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let mut remote_edit = store.get_task(&id).await.unwrap().unwrap().snapshot();
    remote_edit.title = "edited elsewhere".to_string();
    remote_edit.updated_at += TimeDelta::seconds(30);
    state.store.put(remote_edit.clone()).await;

    let result = engine.sync().await.unwrap();

    assert!(result.success);
    assert_eq!(result.synced, 1);
    let task = store.get_task(&id).await.unwrap().unwrap();
    assert_eq!(task.title, "edited elsewhere");
    assert_eq!(task.updated_at, remote_edit.updated_at);
    assert_eq!(task.sync_status, SyncStatus::Synced);
    assert_eq!(state.store.get(&id).await.unwrap().task.title, "edited elsewhere");
}

#[tokio::test]
async fn invalid_title_is_an_item_error() {
    let (url, state, _handle) = start_sync_server(500).await;
    let store = SqliteStore::open_in_memory().unwrap();
    let engine = make_engine(&url, &store, SyncSettings::default());

    let id = create(&store, "fine").await;
    // Bypass local validation to get an unacceptable title on the wire.
    let mut bad = store.get_task(&id).await.unwrap().unwrap().snapshot();
    bad.id = TaskId::new();
    bad.title = String::new();
    store
        .enqueue(tasksync_proto::mutation::MutationPayload::Create(bad.clone()))
        .await
        .unwrap();

    let result = engine.sync().await.unwrap();

    assert!(!result.success);
    assert_eq!((result.synced, result.failed), (1, 1));
    assert_eq!(result.errors[0].task_id, Some(bad.id));
    assert!(state.store.get(&bad.id).await.is_none());
}

#[tokio::test]
async fn oversized_batch_fails_every_item() {
    let (url, state, _handle) = start_sync_server(2).await;
    let store = SqliteStore::open_in_memory().unwrap();
    let engine = make_engine(&url, &store, SyncSettings::default());
    for title in ["a", "b", "c"] {
        create(&store, title).await;
    }

    let result = engine.sync().await.unwrap();

    assert_eq!(result.failed, 3);
    assert!(result.errors.iter().all(|e| e.error.contains("413")));
    assert!(state.store.is_empty().await);

    // Smaller batches fit under the limit.
    let engine = make_engine(
        &url,
        &store,
        SyncSettings {
            batch_size: 2,
            ..SyncSettings::default()
        },
    );
    let result = engine.sync().await.unwrap();
    assert!(result.success);
    assert_eq!(state.store.len().await, 3);
}

#[tokio::test]
async fn stopped_server_is_unreachable() {
    let (url, _state, handle) = start_sync_server(500).await;
    handle.abort();
    let _ = handle.await;

    let store = SqliteStore::open_in_memory().unwrap();
    create(&store, "waiting").await;
    let engine = make_engine(
        &url,
        &store,
        SyncSettings {
            probe_timeout: Duration::from_secs(2),
            ..SyncSettings::default()
        },
    );

    let result = engine.sync().await.unwrap();

    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].task_id.is_none());
    assert_eq!(store.pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn tasks_endpoint_lists_live_tasks() {
    let (url, state, _handle) = start_sync_server(500).await;
    let store = SqliteStore::open_in_memory().unwrap();
    let engine = make_engine(&url, &store, SyncSettings::default());
    create(&store, "one").await;
    let two = create(&store, "two").await;
    store.delete_task(&two).await.unwrap();
    engine.sync().await.unwrap();

    let live: serde_json::Value = reqwest::get(format!("{url}/tasks"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let all: serde_json::Value = reqwest::get(format!("{url}/tasks?all=true"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(live.as_array().unwrap().len(), 1);
    assert_eq!(live[0]["title"], serde_json::json!("one"));
    assert!(live[0].get("serverId").is_some());
    assert_eq!(all.as_array().unwrap().len(), 2);
    assert_eq!(state.store.len().await, 2);
}
