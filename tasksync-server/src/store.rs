//! In-memory server-side task table.
//!
//! The [`ServerStore`] applies submitted mutations in order and decides each
//! item's verdict. A mutation is a conflict when the stored version has a
//! strictly newer modification time; otherwise it is applied. Equal times
//! are accepted so a replayed mutation succeeds idempotently.

use std::collections::HashMap;

use tasksync_proto::batch::{BatchItem, BatchRequest, BatchResponse, ItemStatus, ProcessedItem};
use tasksync_proto::mutation::MutationPayload;
use tasksync_proto::task::{TaskId, TaskSnapshot, validate_title};
use tokio::sync::RwLock;
use uuid::Uuid;

/// A task as the server holds it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTask {
    /// Identifier the server assigned on first sight.
    pub server_id: String,
    /// Latest accepted version.
    #[serde(flatten)]
    pub task: TaskSnapshot,
}

/// Thread-safe server task table keyed by client task id.
#[derive(Debug, Default)]
pub struct ServerStore {
    tasks: RwLock<HashMap<TaskId, StoredTask>>,
}

impl ServerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies every item of a batch in order, returning one verdict per item.
    pub async fn process_batch(&self, request: &BatchRequest) -> BatchResponse {
        let mut tasks = self.tasks.write().await;
        let processed_items: Vec<ProcessedItem> = request
            .items
            .iter()
            .map(|item| apply_item(&mut tasks, item))
            .collect();
        drop(tasks);

        let conflicts = processed_items
            .iter()
            .filter(|p| p.status == ItemStatus::Conflict)
            .count();
        let errors = processed_items
            .iter()
            .filter(|p| p.status == ItemStatus::Error)
            .count();
        tracing::info!(
            items = processed_items.len(),
            conflicts,
            errors,
            client_timestamp = %request.client_timestamp,
            "batch processed"
        );

        BatchResponse { processed_items }
    }

    /// Looks up one task by client id.
    pub async fn get(&self, id: &TaskId) -> Option<StoredTask> {
        self.tasks.read().await.get(id).cloned()
    }

    /// All tasks ordered by creation time; tombstones only if asked.
    pub async fn list(&self, include_deleted: bool) -> Vec<StoredTask> {
        let tasks = self.tasks.read().await;
        let mut listed: Vec<StoredTask> = tasks
            .values()
            .filter(|t| include_deleted || !t.task.deleted)
            .cloned()
            .collect();
        listed.sort_by_key(|t| (t.task.created_at, t.task.id));
        listed
    }

    /// Writes a version directly, bypassing conflict checks.
    ///
    /// Stands in for an edit made by another client.
    pub async fn put(&self, task: TaskSnapshot) -> StoredTask {
        let mut tasks = self.tasks.write().await;
        let server_id = tasks
            .get(&task.id)
            .map_or_else(new_server_id, |t| t.server_id.clone());
        let stored = StoredTask { server_id, task };
        tasks.insert(stored.task.id, stored.clone());
        stored
    }

    /// Number of tasks held, tombstones included.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Whether the store holds no tasks.
    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

fn new_server_id() -> String {
    Uuid::now_v7().to_string()
}

fn apply_item(tasks: &mut HashMap<TaskId, StoredTask>, item: &BatchItem) -> ProcessedItem {
    let client_id = item.task_id;
    if item.payload.task_id() != client_id || item.payload.kind() != item.operation {
        return ProcessedItem::error(client_id, "item header does not match its payload");
    }

    if let MutationPayload::Create(snapshot) | MutationPayload::Update(snapshot) = &item.payload
        && let Err(e) = validate_title(&snapshot.title)
    {
        return ProcessedItem::error(client_id, e.to_string());
    }

    if let Some(existing) = tasks.get(&client_id)
        && existing.task.updated_at > item.payload.modified_at()
    {
        tracing::debug!(
            task_id = %client_id,
            operation = %item.operation,
            "stale mutation rejected as conflict"
        );
        return ProcessedItem::conflict(
            client_id,
            existing.server_id.clone(),
            existing.task.clone(),
        );
    }

    match &item.payload {
        MutationPayload::Create(snapshot) | MutationPayload::Update(snapshot) => {
            let stored = tasks
                .entry(client_id)
                .and_modify(|t| t.task = snapshot.clone())
                .or_insert_with(|| StoredTask {
                    server_id: new_server_id(),
                    task: snapshot.clone(),
                });
            ProcessedItem::success(client_id, stored.server_id.clone(), stored.task.clone())
        }
        MutationPayload::Delete { deleted_at, .. } => {
            let Some(existing) = tasks.get_mut(&client_id) else {
                return ProcessedItem {
                    client_id,
                    server_id: None,
                    status: ItemStatus::Success,
                    resolved_data: None,
                    error: None,
                };
            };
            existing.task.deleted = true;
            existing.task.updated_at = *deleted_at;
            ProcessedItem::success(client_id, existing.server_id.clone(), existing.task.clone())
        }
    }
}
