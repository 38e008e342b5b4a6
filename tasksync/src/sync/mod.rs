//! Sync reconciliation: the engine that drains the mutation queue.
//!
//! - [`engine::SyncEngine`]: probes the remote, submits batches, applies verdicts
//! - [`resolve`]: last-write-wins conflict resolution

pub mod engine;
pub mod resolve;

use std::time::Duration;

use chrono::{DateTime, Utc};
use tasksync_proto::mutation::OperationKind;
use tasksync_proto::task::TaskId;

use crate::store::StoreError;

pub use engine::{BatchOutcome, SyncEngine};

/// Hard failures of a sync run.
///
/// Network and per-item failures never surface here; they are reported in
/// [`SyncResult::errors`].
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The local store failed; the run was aborted.
    #[error("local storage failed during sync: {0}")]
    Store(#[from] StoreError),
}

/// Tunables for a [`SyncEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Maximum items per submitted batch.
    pub batch_size: usize,
    /// Failed attempts after which an item is purged and its task errored.
    pub max_retries: u32,
    /// Bound on the reachability probe.
    pub probe_timeout: Duration,
    /// Bound on one batch submission.
    pub batch_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_retries: 3,
            probe_timeout: Duration::from_secs(5),
            batch_timeout: Duration::from_secs(30),
        }
    }
}

impl SyncSettings {
    /// Returns these settings with zero batch size or retry limit raised to 1.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            batch_size: self.batch_size.max(1),
            max_retries: self.max_retries.max(1),
            ..self
        }
    }
}

/// Where the engine currently is in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
#[serde(rename_all = "camelCase", tag = "phase")]
pub enum SyncPhase {
    /// No run in progress.
    #[default]
    Idle,
    /// Checking that the remote is reachable.
    Probing,
    /// The probe failed; the run is ending without touching the queue.
    Offline,
    /// Reading pending items.
    Draining,
    /// Waiting on the remote for a batch (1-based).
    BatchSend {
        /// Batch number within the run.
        batch: usize,
    },
    /// Applying a batch's verdicts locally (1-based).
    Applying {
        /// Batch number within the run.
        batch: usize,
    },
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Probing => f.write_str("probing"),
            Self::Offline => f.write_str("offline"),
            Self::Draining => f.write_str("draining"),
            Self::BatchSend { batch } => write!(f, "sending batch {batch}"),
            Self::Applying { batch } => write!(f, "applying batch {batch}"),
        }
    }
}

/// One failed item (or the synthetic unreachable entry) in a [`SyncResult`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFailure {
    /// Task the failed item belonged to; `None` for run-level failures.
    pub task_id: Option<TaskId>,
    /// Operation of the failed item; `None` for run-level failures.
    pub operation: Option<OperationKind>,
    /// Human-readable cause.
    pub error: String,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Summary of one sync run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    /// True iff no item failed and the remote was reachable.
    pub success: bool,
    /// Items confirmed by the remote (conflicts resolved count here).
    pub synced: usize,
    /// Items that failed in this run.
    pub failed: usize,
    /// Failures in the order they happened.
    pub errors: Vec<SyncFailure>,
}

impl SyncResult {
    /// A successful run with nothing to report.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            success: true,
            synced: 0,
            failed: 0,
            errors: Vec::new(),
        }
    }

    /// The result of a run that could not reach the remote.
    #[must_use]
    pub fn unreachable(reason: &str) -> Self {
        Self {
            success: false,
            synced: 0,
            failed: 0,
            errors: vec![SyncFailure {
                task_id: None,
                operation: None,
                error: format!("remote unreachable: {reason}"),
                timestamp: Utc::now(),
            }],
        }
    }
}

/// Snapshot of the engine for status displays.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusReport {
    /// Items still queued, including ones at the retry limit.
    pub pending: usize,
    /// Last run that reached the remote.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Current phase.
    pub phase: SyncPhase,
}
