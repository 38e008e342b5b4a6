//! Batch transport abstraction.
//!
//! Defines the [`BatchTransport`] trait the sync engine submits batches
//! through. Implementations:
//! - [`http::HttpTransport`]: JSON over HTTP against a `tasksync-server`
//! - [`loopback::LoopbackTransport`]: scripted in-process peer for testing

pub mod http;
pub mod loopback;

use std::future::Future;

use tasksync_proto::batch::{BatchRequest, BatchResponse};

/// Errors that can occur during transport operations.
///
/// Any of these on a batch submission means no item in that batch was
/// confirmed.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The remote peer could not be reached.
    #[error("remote is unreachable: {0}")]
    Unreachable(String),

    /// The HTTP client reported an error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote answered with a non-success status code.
    #[error("remote returned status {0}")]
    Status(u16),

    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),

    /// The configured remote address is not a valid URL.
    #[error("invalid remote url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Async transport that carries batches to the remote peer.
pub trait BatchTransport: Send + Sync {
    /// Cheap, side-effect-free reachability check.
    fn health_check(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Submit one batch and return the remote's per-item verdicts.
    ///
    /// An `Err` is a wholesale failure, never a partial success.
    fn submit_batch(
        &self,
        request: &BatchRequest,
    ) -> impl Future<Output = Result<BatchResponse, TransportError>> + Send;
}
