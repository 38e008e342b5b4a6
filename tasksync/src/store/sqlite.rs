//! SQLite-backed task store and mutation queue.
//!
//! One connection behind a [`parking_lot::Mutex`] serves both traits. Each
//! state transition (task write plus queue append, confirmation, failure
//! bookkeeping) runs in a single transaction, so a crash never leaves a task
//! and its queue items disagreeing.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use tasksync_proto::codec::{decode_payload, encode_payload};
use tasksync_proto::mutation::{MutationPayload, OperationKind};
use tasksync_proto::task::{TaskId, validate_title};

use super::{
    FailureOutcome, MutationQueue, NewTask, QueueItem, QueueItemId, RemoteAck, StoreError,
    SyncStatus, Task, TaskError, TaskPatch, TaskStore,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id             TEXT PRIMARY KEY,
    title          TEXT NOT NULL,
    description    TEXT,
    completed      INTEGER NOT NULL DEFAULT 0,
    created_at     INTEGER NOT NULL,
    updated_at     INTEGER NOT NULL,
    deleted        INTEGER NOT NULL DEFAULT 0,
    sync_status    TEXT NOT NULL DEFAULT 'pending',
    server_id      TEXT,
    last_synced_at INTEGER,
    last_error     TEXT
);

CREATE TABLE IF NOT EXISTS sync_queue (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id     TEXT NOT NULL,
    operation   TEXT NOT NULL,
    payload     BLOB NOT NULL,
    enqueued_at INTEGER NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error  TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_task ON sync_queue (task_id);

CREATE TABLE IF NOT EXISTS sync_meta (
    key   TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
";

const TASK_COLUMNS: &str = "id, title, description, completed, created_at, updated_at, deleted, \
                            sync_status, server_id, last_synced_at, last_error";

const QUEUE_COLUMNS: &str = "id, task_id, payload, enqueued_at, retry_count, last_error";

const LAST_SYNC_KEY: &str = "last_sync_at";

/// SQLite implementation of [`TaskStore`] and [`MutationQueue`].
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) a database file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the directory cannot be created, the file
    /// cannot be opened, or the schema cannot be applied.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init(conn)
    }

    /// Open a private in-memory database (for tests and dry runs).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl TaskStore for SqliteStore {
    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        let conn = self.conn.lock();
        load_task(&conn, id)
    }

    async fn list_tasks(&self, include_deleted: bool) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE deleted = 0 OR ?1 ORDER BY created_at, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([include_deleted], TaskRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }

    async fn create_task(&self, new: NewTask) -> Result<Task, TaskError> {
        validate_title(&new.title)?;
        let now = now_ms();
        let task = Task {
            id: TaskId::new(),
            title: new.title,
            description: new.description,
            completed: false,
            created_at: now,
            updated_at: now,
            deleted: false,
            sync_status: SyncStatus::Pending,
            server_id: None,
            last_synced_at: None,
            last_error: None,
        };

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(StoreError::from)?;
        save_task(&tx, &task)?;
        insert_queue_item(&tx, &MutationPayload::Create(task.snapshot()))?;
        tx.commit().map_err(StoreError::from)?;
        drop(conn);

        tracing::debug!(task_id = %task.id, "task created");
        Ok(task)
    }

    async fn update_task(&self, id: &TaskId, patch: TaskPatch) -> Result<Option<Task>, TaskError> {
        if let Some(title) = &patch.title {
            validate_title(title)?;
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(StoreError::from)?;
        let Some(mut task) = load_task(&tx, id)? else {
            return Ok(None);
        };
        if task.deleted {
            return Ok(None);
        }

        if let Some(title) = patch.title {
            task.title = title;
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if let Some(completed) = patch.completed {
            task.completed = completed;
        }
        task.updated_at = next_modification(task.updated_at);
        task.sync_status = SyncStatus::Pending;
        task.last_error = None;

        save_task(&tx, &task)?;
        insert_queue_item(&tx, &MutationPayload::Update(task.snapshot()))?;
        tx.commit().map_err(StoreError::from)?;
        drop(conn);

        tracing::debug!(task_id = %task.id, "task updated");
        Ok(Some(task))
    }

    async fn delete_task(&self, id: &TaskId) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let Some(mut task) = load_task(&tx, id)? else {
            return Ok(false);
        };
        if task.deleted {
            return Ok(false);
        }

        task.deleted = true;
        task.updated_at = next_modification(task.updated_at);
        task.sync_status = SyncStatus::Pending;
        task.last_error = None;

        save_task(&tx, &task)?;
        let payload = MutationPayload::Delete {
            id: task.id,
            deleted_at: task.updated_at,
        };
        insert_queue_item(&tx, &payload)?;
        tx.commit()?;
        drop(conn);

        tracing::debug!(task_id = %task.id, "task soft-deleted");
        Ok(true)
    }

    async fn retry_task(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let Some(mut task) = load_task(&tx, id)? else {
            return Ok(None);
        };
        if task.sync_status != SyncStatus::Error {
            return Ok(Some(task));
        }

        // The server may never have seen the task if its create was the
        // mutation that ran out of retries.
        let payload = if task.deleted {
            MutationPayload::Delete {
                id: task.id,
                deleted_at: task.updated_at,
            }
        } else if task.server_id.is_none() {
            MutationPayload::Create(task.snapshot())
        } else {
            MutationPayload::Update(task.snapshot())
        };

        task.sync_status = SyncStatus::Pending;
        task.last_error = None;
        save_task(&tx, &task)?;
        insert_queue_item(&tx, &payload)?;
        tx.commit()?;
        drop(conn);

        tracing::info!(task_id = %task.id, operation = %payload.kind(), "errored task re-queued");
        Ok(Some(task))
    }

    async fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.conn.lock();
        let ms: Option<i64> = conn
            .query_row(
                "SELECT value FROM sync_meta WHERE key = ?1",
                [LAST_SYNC_KEY],
                |row| row.get(0),
            )
            .optional()?;
        ms.map(from_ms).transpose()
    }

    async fn record_sync_time(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sync_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![LAST_SYNC_KEY, at.timestamp_millis()],
        )?;
        Ok(())
    }
}

impl MutationQueue for SqliteStore {
    async fn enqueue(&self, payload: MutationPayload) -> Result<QueueItem, StoreError> {
        let conn = self.conn.lock();
        insert_queue_item(&conn, &payload)
    }

    async fn pending_items(&self, max_retries: u32) -> Result<Vec<QueueItem>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue
             WHERE retry_count < ?1
             ORDER BY id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([max_retries], QueueRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(QueueRow::into_item).collect()
    }

    async fn record_failure(
        &self,
        item: &QueueItem,
        error: &str,
        max_retries: u32,
    ) -> Result<FailureOutcome, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let retry_count: Option<u32> = tx
            .query_row(
                "UPDATE sync_queue SET retry_count = retry_count + 1, last_error = ?1
                 WHERE id = ?2 RETURNING retry_count",
                params![error, item.id.0],
                |row| row.get(0),
            )
            .optional()?;
        let Some(retry_count) = retry_count else {
            return Ok(FailureOutcome::Gone);
        };

        let task_id = item.task_id.to_string();
        let outcome = if retry_count >= max_retries {
            tx.execute("DELETE FROM sync_queue WHERE id = ?1", [item.id.0])?;
            let message = exhaustion_message(item.operation(), retry_count, error);
            tx.execute(
                "UPDATE tasks SET sync_status = ?1, last_error = ?2 WHERE id = ?3",
                params![SyncStatus::Error.as_str(), message, task_id],
            )?;
            FailureOutcome::Exhausted
        } else {
            tx.execute(
                "UPDATE tasks SET last_error = ?1 WHERE id = ?2",
                params![error, task_id],
            )?;
            FailureOutcome::Retrying { retry_count }
        };
        tx.commit()?;
        Ok(outcome)
    }

    async fn purge_exhausted(&self, max_retries: u32) -> Result<Vec<QueueItem>, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let items = {
            let sql = format!(
                "SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE retry_count >= ?1 ORDER BY id ASC"
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt
                .query_map([max_retries], QueueRow::read)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(QueueRow::into_item)
                .collect::<Result<Vec<_>, _>>()?
        };

        for item in &items {
            let error = item.last_error.as_deref().unwrap_or("retry limit reached");
            let message = exhaustion_message(item.operation(), item.retry_count, error);
            tx.execute("DELETE FROM sync_queue WHERE id = ?1", [item.id.0])?;
            tx.execute(
                "UPDATE tasks SET sync_status = ?1, last_error = ?2 WHERE id = ?3",
                params![SyncStatus::Error.as_str(), message, item.task_id.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(items)
    }

    async fn confirm(&self, item: &QueueItem, ack: &RemoteAck) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let task_id = item.task_id.to_string();

        tx.execute("DELETE FROM sync_queue WHERE id = ?1", [item.id.0])?;
        let remaining: i64 = tx.query_row(
            "SELECT COUNT(*) FROM sync_queue WHERE task_id = ?1",
            [&task_id],
            |row| row.get(0),
        )?;

        if let Some(winner) = &ack.apply {
            tx.execute(
                "UPDATE tasks SET title = ?1, description = ?2, completed = ?3,
                        updated_at = ?4, deleted = ?5
                 WHERE id = ?6",
                params![
                    winner.title,
                    winner.description,
                    winner.completed,
                    winner.updated_at.timestamp_millis(),
                    winner.deleted,
                    task_id
                ],
            )?;
        }

        let settled = if remaining > 0 {
            SyncStatus::Pending
        } else {
            SyncStatus::Synced
        };
        // An errored task only leaves `error` through a new mutation or retry.
        tx.execute(
            "UPDATE tasks SET
                 sync_status = CASE WHEN sync_status = 'error' THEN sync_status ELSE ?1 END,
                 last_error = CASE WHEN sync_status = 'error' THEN last_error ELSE NULL END,
                 server_id = COALESCE(?2, server_id),
                 last_synced_at = ?3
             WHERE id = ?4",
            params![
                settled.as_str(),
                ack.server_id,
                ack.synced_at.timestamp_millis(),
                task_id
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn remove(&self, id: QueueItemId) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute("DELETE FROM sync_queue WHERE id = ?1", [id.0])?;
        Ok(changed > 0)
    }

    async fn remove_all_for_task(&self, task_id: &TaskId) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let task_id = task_id.to_string();
        let removed = tx.execute("DELETE FROM sync_queue WHERE task_id = ?1", [&task_id])?;
        tx.execute(
            "UPDATE tasks SET sync_status = ?1, last_error = NULL
             WHERE id = ?2 AND sync_status = ?3",
            params![
                SyncStatus::Synced.as_str(),
                task_id,
                SyncStatus::Pending.as_str()
            ],
        )?;
        tx.commit()?;
        Ok(removed)
    }

    async fn pending_count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
        usize::try_from(count).map_err(|_| StoreError::Corrupt(format!("negative count {count}")))
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// Raw `tasks` row, converted to [`Task`] outside the rusqlite closure.
struct TaskRow {
    id: String,
    title: String,
    description: Option<String>,
    completed: bool,
    created_at: i64,
    updated_at: i64,
    deleted: bool,
    sync_status: String,
    server_id: Option<String>,
    last_synced_at: Option<i64>,
    last_error: Option<String>,
}

impl TaskRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            completed: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            deleted: row.get(6)?,
            sync_status: row.get(7)?,
            server_id: row.get(8)?,
            last_synced_at: row.get(9)?,
            last_error: row.get(10)?,
        })
    }

    fn into_task(self) -> Result<Task, StoreError> {
        Ok(Task {
            id: parse_task_id(&self.id)?,
            title: self.title,
            description: self.description,
            completed: self.completed,
            created_at: from_ms(self.created_at)?,
            updated_at: from_ms(self.updated_at)?,
            deleted: self.deleted,
            sync_status: self.sync_status.parse()?,
            server_id: self.server_id,
            last_synced_at: self.last_synced_at.map(from_ms).transpose()?,
            last_error: self.last_error,
        })
    }
}

/// Raw `sync_queue` row.
struct QueueRow {
    id: i64,
    task_id: String,
    payload: Vec<u8>,
    enqueued_at: i64,
    retry_count: u32,
    last_error: Option<String>,
}

impl QueueRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            task_id: row.get(1)?,
            payload: row.get(2)?,
            enqueued_at: row.get(3)?,
            retry_count: row.get(4)?,
            last_error: row.get(5)?,
        })
    }

    fn into_item(self) -> Result<QueueItem, StoreError> {
        Ok(QueueItem {
            id: QueueItemId(self.id),
            task_id: parse_task_id(&self.task_id)?,
            payload: decode_payload(&self.payload)?,
            enqueued_at: from_ms(self.enqueued_at)?,
            retry_count: self.retry_count,
            last_error: self.last_error,
        })
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn load_task(conn: &Connection, id: &TaskId) -> Result<Option<Task>, StoreError> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
    let row = conn
        .query_row(&sql, [id.to_string()], TaskRow::read)
        .optional()?;
    row.map(TaskRow::into_task).transpose()
}

fn save_task(conn: &Connection, task: &Task) -> Result<(), StoreError> {
    let sql = format!(
        "INSERT OR REPLACE INTO tasks ({TASK_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
    );
    conn.execute(
        &sql,
        params![
            task.id.to_string(),
            task.title,
            task.description,
            task.completed,
            task.created_at.timestamp_millis(),
            task.updated_at.timestamp_millis(),
            task.deleted,
            task.sync_status.as_str(),
            task.server_id,
            task.last_synced_at.map(|t| t.timestamp_millis()),
            task.last_error,
        ],
    )?;
    Ok(())
}

/// Append a queue item stamped with the wall clock. Queue order is the
/// autoincrement id, never this timestamp.
fn insert_queue_item(
    conn: &Connection,
    payload: &MutationPayload,
) -> Result<QueueItem, StoreError> {
    let bytes = encode_payload(payload)?;
    let enqueued_at = now_ms();
    let task_id = payload.task_id();
    conn.execute(
        "INSERT INTO sync_queue (task_id, operation, payload, enqueued_at, retry_count)
         VALUES (?1, ?2, ?3, ?4, 0)",
        params![
            task_id.to_string(),
            payload.kind().as_str(),
            bytes,
            enqueued_at.timestamp_millis()
        ],
    )?;
    Ok(QueueItem {
        id: QueueItemId(conn.last_insert_rowid()),
        task_id,
        payload: payload.clone(),
        enqueued_at,
        retry_count: 0,
        last_error: None,
    })
}

/// Task error text for an item that ran out of retries.
fn exhaustion_message(operation: OperationKind, attempts: u32, error: &str) -> String {
    format!("{operation} failed after {attempts} attempts: {error}")
}

fn parse_task_id(raw: &str) -> Result<TaskId, StoreError> {
    raw.parse()
        .map_err(|e| StoreError::Corrupt(format!("bad task id {raw:?}: {e}")))
}

fn from_ms(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {ms}")))
}

/// Current time at the millisecond precision the tables store.
fn now_ms() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Modification time for a new local write: now, but never at or before the
/// previous one, so a local edit always outranks the version it replaces.
fn next_modification(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = now_ms();
    if now > previous {
        now
    } else {
        previous + TimeDelta::milliseconds(1)
    }
}
