//! Chunk forwarding between nodes.

use std::time::Duration;

use thiserror::Error;

use scatter_core::Chunk;

/// Shared HTTP client for posting chunks to a peer node's `/chunk` endpoint.
#[derive(Clone)]
pub struct Forwarder {
    http: reqwest::Client,
}

impl Forwarder {
    pub fn new(timeout: Duration) -> Result<Self, ForwardError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ForwardError::Client)?;
        Ok(Self { http })
    }

    /// POST a chunk to `http://{addr}/chunk`. Any non-2xx is a failure —
    /// the chunk is considered lost from the pipeline.
    pub async fn send_chunk(&self, addr: &str, chunk: &Chunk) -> Result<(), ForwardError> {
        let url = format!("http://{addr}/chunk");
        let resp = self
            .http
            .post(&url)
            .json(chunk)
            .send()
            .await
            .map_err(|e| ForwardError::Transport {
                url: url.clone(),
                source: e,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ForwardError::Status {
                url,
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("post to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
}
