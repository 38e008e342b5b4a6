//! Task types shared between the client and the server.
//!
//! A [`TaskSnapshot`] is the portable shape of a task: the fields that travel
//! inside queued mutations and come back as server-resolved data. Local-only
//! bookkeeping (sync status, retry errors) lives on the client side.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed task title length in characters.
pub const MAX_TASK_TITLE_LENGTH: usize = 256;

/// Stable, client-assigned task identifier (UUID v7 for time-ordering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a new time-ordered task identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `TaskId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Reasons a task title is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TitleError {
    /// Task title cannot be empty.
    #[error("task title cannot be empty")]
    Empty,
    /// Task title exceeds [`MAX_TASK_TITLE_LENGTH`].
    #[error("task title too long (max 256 characters)")]
    TooLong,
}

/// Checks a title against the rules both sides enforce.
///
/// # Errors
///
/// Returns [`TitleError::Empty`] for blank titles and
/// [`TitleError::TooLong`] past [`MAX_TASK_TITLE_LENGTH`] characters.
pub fn validate_title(title: &str) -> Result<(), TitleError> {
    if title.trim().is_empty() {
        return Err(TitleError::Empty);
    }
    if title.chars().count() > MAX_TASK_TITLE_LENGTH {
        return Err(TitleError::TooLong);
    }
    Ok(())
}

/// Portable snapshot of a task's user-visible fields.
///
/// `updated_at` is the scalar timestamp conflict resolution compares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    /// Client-assigned identifier.
    pub id: TaskId,
    /// Task title.
    pub title: String,
    /// Optional free-form description.
    pub description: Option<String>,
    /// Whether the task has been completed.
    pub completed: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete flag.
    pub deleted: bool,
}
