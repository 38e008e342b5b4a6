//! Local task storage and the durable mutation queue.
//!
//! Defines the [`TaskStore`] and [`MutationQueue`] traits the sync engine
//! talks to, plus the record types that flow through them. Every task
//! mutation made through a [`TaskStore`] also appends a queue item, so the
//! two are implemented over the same storage engine.
//!
//! Implementations:
//! - [`sqlite::SqliteStore`]: SQLite-backed store implementing both traits

pub mod sqlite;

use std::future::Future;

use chrono::{DateTime, Utc};
use tasksync_proto::codec::CodecError;
use tasksync_proto::mutation::{MutationPayload, OperationKind};
use tasksync_proto::task::{TaskId, TaskSnapshot, TitleError};

pub use sqlite::SqliteStore;

/// Errors from the durable storage layer.
///
/// These are never swallowed by the sync engine: a run that hits one fails
/// as a whole.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying database reported an error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored payload could not be decoded.
    #[error("stored payload is unreadable: {0}")]
    Codec(#[from] CodecError),

    /// A row holds a value that does not map to a known type.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// The database file or its directory could not be prepared.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from task mutations that validate their input.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The title failed validation.
    #[error(transparent)]
    InvalidTitle(#[from] TitleError),

    /// Storage failed while applying the mutation.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Sync state of a local task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local changes are waiting in the queue.
    Pending,
    /// The server has confirmed the latest local state.
    Synced,
    /// A queued change exhausted its retries.
    Error,
}

impl SyncStatus {
    /// Stable lowercase name, also used as the storage column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            "error" => Ok(Self::Error),
            other => Err(StoreError::Corrupt(format!("unknown sync status: {other}"))),
        }
    }
}

/// A task as the client stores it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Task {
    /// Client-assigned identifier, immutable.
    pub id: TaskId,
    /// Task title.
    pub title: String,
    /// Optional description.
    pub description: Option<String>,
    /// Completion flag.
    pub completed: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last local or server-applied modification time.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete flag; deleted tasks are hidden from normal listings.
    pub deleted: bool,
    /// Where this task stands with respect to the server.
    pub sync_status: SyncStatus,
    /// Identifier the server assigned, once known.
    pub server_id: Option<String>,
    /// When the server last confirmed this task.
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Last sync error, for tasks in [`SyncStatus::Error`].
    pub last_error: Option<String>,
}

impl Task {
    /// Returns the portable snapshot of this task's user-visible fields.
    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            title: self.title.clone(),
            description: self.description.clone(),
            completed: self.completed,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted: self.deleted,
        }
    }
}

/// Input for creating a task.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    /// Title (validated).
    pub title: String,
    /// Optional description.
    pub description: Option<String>,
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    /// New title (validated).
    pub title: Option<String>,
    /// New description; `Some(None)` clears it.
    pub description: Option<Option<String>>,
    /// New completion flag.
    pub completed: Option<bool>,
}

/// Queue item identifier (storage sequence number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueItemId(pub i64);

impl std::fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One pending change awaiting remote confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    /// Unique item identifier; also the enqueue sequence.
    pub id: QueueItemId,
    /// Task the change applies to.
    pub task_id: TaskId,
    /// Snapshot captured at enqueue time.
    pub payload: MutationPayload,
    /// Enqueue time.
    pub enqueued_at: DateTime<Utc>,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Error from the last failed attempt.
    pub last_error: Option<String>,
}

impl QueueItem {
    /// Returns the operation kind of this item.
    #[must_use]
    pub const fn operation(&self) -> OperationKind {
        self.payload.kind()
    }
}

/// What [`MutationQueue::record_failure`] did with an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The item stays queued with the given retry count.
    Retrying {
        /// Retry count after the increment.
        retry_count: u32,
    },
    /// The item hit the retry limit; it was purged and its task marked `error`.
    Exhausted,
    /// The item was no longer queued (already confirmed or purged).
    Gone,
}

/// Remote confirmation of one queue item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAck {
    /// Server-assigned identifier, if the server reported one.
    pub server_id: Option<String>,
    /// Winning server data to write over the local fields, if any.
    pub apply: Option<TaskSnapshot>,
    /// Confirmation time.
    pub synced_at: DateTime<Utc>,
}

/// Durable record of task state plus the CRUD operations that feed the queue.
///
/// Every mutating method marks the task `pending`, stamps a new
/// modification time, and appends a matching [`QueueItem`] in the same
/// write.
pub trait TaskStore: Send + Sync {
    /// Look up a task by identifier, including soft-deleted ones.
    fn get_task(
        &self,
        id: &TaskId,
    ) -> impl Future<Output = Result<Option<Task>, StoreError>> + Send;

    /// List tasks ordered by creation time; soft-deleted tasks only if asked.
    fn list_tasks(
        &self,
        include_deleted: bool,
    ) -> impl Future<Output = Result<Vec<Task>, StoreError>> + Send;

    /// Create a task and queue its `create` mutation.
    fn create_task(&self, new: NewTask) -> impl Future<Output = Result<Task, TaskError>> + Send;

    /// Update a live task and queue an `update` mutation.
    ///
    /// Returns `None` for unknown or soft-deleted tasks.
    fn update_task(
        &self,
        id: &TaskId,
        patch: TaskPatch,
    ) -> impl Future<Output = Result<Option<Task>, TaskError>> + Send;

    /// Soft-delete a live task and queue a `delete` mutation.
    ///
    /// Returns `false` for unknown or already deleted tasks.
    fn delete_task(&self, id: &TaskId) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Move an errored task back to `pending` by re-queueing its current state.
    ///
    /// Returns `None` for unknown tasks; tasks not in `error` are returned unchanged.
    fn retry_task(
        &self,
        id: &TaskId,
    ) -> impl Future<Output = Result<Option<Task>, StoreError>> + Send;

    /// Time of the last sync run that reached the server.
    fn last_sync_at(
        &self,
    ) -> impl Future<Output = Result<Option<DateTime<Utc>>, StoreError>> + Send;

    /// Persist the time of a sync run that reached the server.
    fn record_sync_time(
        &self,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Ordered, durable log of pending mutations.
///
/// The sync engine only reads items and requests transitions through this
/// trait; it never edits items directly.
pub trait MutationQueue: Send + Sync {
    /// Append a mutation with retry count 0. The task id comes from the payload.
    fn enqueue(
        &self,
        payload: MutationPayload,
    ) -> impl Future<Output = Result<QueueItem, StoreError>> + Send;

    /// Items with `retry_count < max_retries`, in enqueue order.
    fn pending_items(
        &self,
        max_retries: u32,
    ) -> impl Future<Output = Result<Vec<QueueItem>, StoreError>> + Send;

    /// Purge every item whose retry count is already at or over
    /// `max_retries`, marking each owning task `error`. Returns the purged
    /// items.
    ///
    /// Items end up over the limit when the limit is lowered between runs.
    fn purge_exhausted(
        &self,
        max_retries: u32,
    ) -> impl Future<Output = Result<Vec<QueueItem>, StoreError>> + Send;

    /// Count a failed attempt. Reaching `max_retries` purges the item and
    /// marks its task `error`.
    fn record_failure(
        &self,
        item: &QueueItem,
        error: &str,
        max_retries: u32,
    ) -> impl Future<Output = Result<FailureOutcome, StoreError>> + Send;

    /// Remove a confirmed item and apply the confirmation to its task in one write.
    ///
    /// The task becomes `synced` unless other items for it are still queued.
    fn confirm(
        &self,
        item: &QueueItem,
        ack: &RemoteAck,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove one item. Returns whether it existed.
    fn remove(&self, id: QueueItemId) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Remove every item for a task after a confirmed success. Returns how
    /// many were removed.
    ///
    /// A task left `pending` by the removed items is settled to `synced`.
    fn remove_all_for_task(
        &self,
        task_id: &TaskId,
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;

    /// Number of queued items, regardless of retry count.
    fn pending_count(&self) -> impl Future<Output = Result<usize, StoreError>> + Send;
}
