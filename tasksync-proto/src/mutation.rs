//! Queued mutation payloads.
//!
//! Each variant carries only what its operation needs: a full snapshot for
//! create and update, the identifier plus a tombstone time for delete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{TaskId, TaskSnapshot};

/// Kind of operation a queued mutation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Task was created locally.
    Create,
    /// Task fields were changed locally.
    Update,
    /// Task was soft-deleted locally.
    Delete,
}

impl OperationKind {
    /// Stable lowercase name, also used as the storage column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown operation kind: {other}")),
        }
    }
}

/// The data a queued mutation carries, captured at enqueue time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum MutationPayload {
    /// Full snapshot of a newly created task.
    Create(TaskSnapshot),
    /// Full snapshot after a local update.
    Update(TaskSnapshot),
    /// Soft delete of the identified task.
    Delete {
        /// Task being deleted.
        id: TaskId,
        /// When the delete happened; compared like any other modification time.
        deleted_at: DateTime<Utc>,
    },
}

impl MutationPayload {
    /// Returns the operation this payload performs.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::Create(_) => OperationKind::Create,
            Self::Update(_) => OperationKind::Update,
            Self::Delete { .. } => OperationKind::Delete,
        }
    }

    /// Returns the identifier of the task this payload targets.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        match self {
            Self::Create(snapshot) | Self::Update(snapshot) => snapshot.id,
            Self::Delete { id, .. } => *id,
        }
    }

    /// Returns the modification time the payload asserts.
    #[must_use]
    pub const fn modified_at(&self) -> DateTime<Utc> {
        match self {
            Self::Create(snapshot) | Self::Update(snapshot) => snapshot.updated_at,
            Self::Delete { deleted_at, .. } => *deleted_at,
        }
    }
}
