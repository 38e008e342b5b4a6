//! HTTP batch transport.
//!
//! Talks JSON to a `tasksync-server`: `GET {base}/health` for the
//! reachability probe and `POST {base}/sync/batch` for submissions.
//! Timeouts are applied by the caller.

use tasksync_proto::batch::{BATCH_PATH, BatchRequest, BatchResponse, HEALTH_PATH};
use url::Url;

use super::{BatchTransport, TransportError};

/// [`BatchTransport`] over HTTP using a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    health_url: Url,
    batch_url: Url,
}

impl HttpTransport {
    /// Build a transport for the server at `base_url`.
    ///
    /// A base without a trailing slash is treated as a directory, so
    /// `http://host/api` resolves to `http://host/api/sync/batch`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUrl`] if `base_url` does not parse.
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            client: reqwest::Client::new(),
            health_url: base.join(HEALTH_PATH)?,
            batch_url: base.join(BATCH_PATH)?,
        })
    }

    /// The resolved batch endpoint.
    #[must_use]
    pub const fn batch_url(&self) -> &Url {
        &self.batch_url
    }
}

impl BatchTransport for HttpTransport {
    async fn health_check(&self) -> Result<(), TransportError> {
        let response = self
            .client
            .get(self.health_url.clone())
            .send()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Status(response.status().as_u16()))
        }
    }

    async fn submit_batch(&self, request: &BatchRequest) -> Result<BatchResponse, TransportError> {
        let response = self
            .client
            .post(self.batch_url.clone())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "batch rejected by remote");
            return Err(TransportError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}
