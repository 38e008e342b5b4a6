//! Sync batch wire contract.
//!
//! A client submits a [`BatchRequest`] holding an ordered slice of its
//! mutation queue and receives a [`BatchResponse`] with one
//! [`ProcessedItem`] verdict per submitted item, keyed by task identifier.
//! Both travel as JSON bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mutation::{MutationPayload, OperationKind};
use crate::task::{TaskId, TaskSnapshot};

/// Path of the health endpoint, relative to the server base address.
pub const HEALTH_PATH: &str = "health";

/// Path of the batch endpoint, relative to the server base address.
pub const BATCH_PATH: &str = "sync/batch";

/// One queued mutation as submitted to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    /// Task the mutation targets.
    pub task_id: TaskId,
    /// Operation kind, duplicated from the payload for readability on the wire.
    pub operation: OperationKind,
    /// Snapshot captured when the mutation was queued.
    pub payload: MutationPayload,
}

impl BatchItem {
    /// Builds a batch item from a payload, deriving task id and operation.
    #[must_use]
    pub fn from_payload(payload: MutationPayload) -> Self {
        Self {
            task_id: payload.task_id(),
            operation: payload.kind(),
            payload,
        }
    }
}

/// A bounded group of mutations sent together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    /// Items in queue order (oldest first).
    pub items: Vec<BatchItem>,
    /// Client clock at submission time.
    pub client_timestamp: DateTime<Utc>,
}

/// Per-item verdict reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// The mutation was applied.
    Success,
    /// The server holds a newer version; see `resolved_data`.
    Conflict,
    /// The mutation was rejected.
    Error,
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Conflict => f.write_str("conflict"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Verdict for one submitted item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedItem {
    /// Client task identifier of the submitted item.
    pub client_id: TaskId,
    /// Server-assigned identifier, when the server knows the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    /// Outcome for this item.
    pub status: ItemStatus,
    /// Server's authoritative version (on success) or competing version (on conflict).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_data: Option<TaskSnapshot>,
    /// Error text for rejected items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessedItem {
    /// A successful verdict carrying the server's stored version.
    #[must_use]
    pub fn success(client_id: TaskId, server_id: String, resolved: TaskSnapshot) -> Self {
        Self {
            client_id,
            server_id: Some(server_id),
            status: ItemStatus::Success,
            resolved_data: Some(resolved),
            error: None,
        }
    }

    /// A conflict verdict carrying the newer server version.
    #[must_use]
    pub fn conflict(client_id: TaskId, server_id: String, server_version: TaskSnapshot) -> Self {
        Self {
            client_id,
            server_id: Some(server_id),
            status: ItemStatus::Conflict,
            resolved_data: Some(server_version),
            error: None,
        }
    }

    /// A rejection with an error message.
    #[must_use]
    pub fn error(client_id: TaskId, message: impl Into<String>) -> Self {
        Self {
            client_id,
            server_id: None,
            status: ItemStatus::Error,
            resolved_data: None,
            error: Some(message.into()),
        }
    }
}

/// Server reply to a [`BatchRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    /// One verdict per submitted item, in submission order.
    pub processed_items: Vec<ProcessedItem>,
}

/// Body of the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` when the server answers.
    pub status: String,
    /// Server clock when the probe was answered.
    pub server_time: DateTime<Utc>,
}
