//! Last-write-wins conflict resolution.
//!
//! A conflict is settled by comparing the two versions' modification times.
//! When the times are equal the server version wins, so a client and the
//! server that both hold the same pair always agree on the outcome.

use tasksync_proto::task::TaskSnapshot;

/// Which side supplied the winning version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Winner {
    /// The local version is strictly newer.
    Local,
    /// The server version is newer or equally new.
    Server,
}

impl std::fmt::Display for Winner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Server => f.write_str("server"),
        }
    }
}

/// Outcome of [`resolve_conflict`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Side that won.
    pub winner: Winner,
    /// Authoritative data to persist.
    pub task: TaskSnapshot,
}

/// Picks the winner between a local and a server version of one task.
///
/// Rules (in priority order):
/// 1. Strictly later `updated_at` wins.
/// 2. Equal timestamps: the server wins.
///
/// Pure apart from the audit log line; identical inputs always give the
/// identical result.
#[must_use]
pub fn resolve_conflict(local: &TaskSnapshot, server: &TaskSnapshot) -> Resolution {
    let (winner, task) = if local.updated_at > server.updated_at {
        (Winner::Local, local.clone())
    } else {
        (Winner::Server, server.clone())
    };

    tracing::info!(
        task_id = %local.id,
        local_updated_at = %local.updated_at,
        server_updated_at = %server.updated_at,
        %winner,
        "conflict resolved"
    );

    Resolution { winner, task }
}
