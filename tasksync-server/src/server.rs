//! HTTP surface of the sync server.
//!
//! Routes:
//! - `GET /health`: reachability probe, no side effects
//! - `POST /sync/batch`: apply a [`BatchRequest`] and return per-item verdicts
//! - `GET /tasks?all=true`: list the server's copy of the tasks

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use tasksync_proto::batch::{BatchRequest, BatchResponse, HealthResponse};

use crate::store::{ServerStore, StoredTask};

/// Default cap on items per submitted batch.
pub const DEFAULT_MAX_BATCH_ITEMS: usize = 500;

/// Request failures that map onto HTTP status codes.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The batch holds more items than the server accepts.
    #[error("batch of {size} items exceeds the limit of {max}")]
    BatchTooLarge {
        /// Items submitted.
        size: usize,
        /// Configured limit.
        max: usize,
    },
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::BatchTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        };
        (status, self.to_string()).into_response()
    }
}

/// Shared server state: the task table and request limits.
#[derive(Debug)]
pub struct SyncState {
    /// Server-side task table.
    pub store: ServerStore,
    /// Maximum items accepted in one batch.
    max_batch_items: usize,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncState {
    /// State with an empty store and the default batch limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_BATCH_ITEMS, ServerStore::new())
    }

    /// State with a custom batch limit and store.
    #[must_use]
    pub const fn with_config(max_batch_items: usize, store: ServerStore) -> Self {
        Self {
            store,
            max_batch_items,
        }
    }
}

/// Query string of `GET /tasks`.
#[derive(Debug, Default, serde::Deserialize)]
struct ListQuery {
    #[serde(default)]
    all: bool,
}

/// Starts the sync server on the given address and returns the bound address
/// and a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(SyncState::new())).await
}

/// Starts the sync server with a pre-configured [`SyncState`].
///
/// Keep a clone of the `Arc` to inspect or seed the store from tests.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<SyncState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/health", axum::routing::get(health_handler))
        .route("/sync/batch", axum::routing::post(batch_handler))
        .route("/tasks", axum::routing::get(list_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "sync server error");
        }
    });

    Ok((bound_addr, handle))
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        server_time: Utc::now(),
    })
}

async fn batch_handler(
    State(state): State<Arc<SyncState>>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, ServerError> {
    if request.items.len() > state.max_batch_items {
        tracing::warn!(
            size = request.items.len(),
            max = state.max_batch_items,
            "oversized batch rejected"
        );
        return Err(ServerError::BatchTooLarge {
            size: request.items.len(),
            max: state.max_batch_items,
        });
    }
    Ok(Json(state.store.process_batch(&request).await))
}

async fn list_handler(
    State(state): State<Arc<SyncState>>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<StoredTask>> {
    Json(state.store.list(query.all).await)
}
