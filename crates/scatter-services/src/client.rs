//! The originating client: fragments requests across the upstream pool and
//! reassembles the response chunks that downstreams deliver back.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;

use scatter_core::config::ClientConfig;
use scatter_core::{chunk, crypto, Chunk};

use crate::error::PipelineError;
use crate::forward::{ForwardError, Forwarder};
use crate::pending::{PendingMap, ProxyResponse, RequestError};

/// Timeout for each individual chunk send to an upstream.
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ProxyClient {
    config: ClientConfig,
    pending: PendingMap,
    forwarder: Forwarder,
}

impl ProxyClient {
    pub fn new(config: ClientConfig) -> Result<Self, ForwardError> {
        Ok(Self {
            config,
            pending: PendingMap::new(),
            forwarder: Forwarder::new(SEND_TIMEOUT)?,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub async fn get(
        &self,
        url: &str,
        headers: HashMap<String, String>,
    ) -> Result<ProxyResponse, RequestError> {
        self.request("GET", url, &[], headers).await
    }

    pub async fn post(
        &self,
        url: &str,
        body: &[u8],
        headers: HashMap<String, String>,
    ) -> Result<ProxyResponse, RequestError> {
        self.request("POST", url, body, headers).await
    }

    /// Proxy one HTTP request through the pipeline.
    ///
    /// Fragments the body, scatters the chunks round-robin across the
    /// upstream pool, then waits for the matching response session to
    /// reassemble — or for the deadline.
    pub async fn request(
        &self,
        method: &str,
        url: &str,
        body: &[u8],
        headers: HashMap<String, String>,
    ) -> Result<ProxyResponse, RequestError> {
        if self.config.upstreams.is_empty() {
            return Err(RequestError::NoUpstreams);
        }

        let session_id = chunk::generate_session_id();
        tracing::info!(%session_id, method, url, bytes = body.len(), "proxying request");

        let rx = self.pending.register(&session_id);

        if let Err(e) = self.send_fragments(&session_id, method, url, body, &headers).await {
            self.pending.cancel(&session_id);
            return Err(e);
        }

        let timeout = self.config.timeout();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                self.pending.cancel(&session_id);
                Err(RequestError::Canceled)
            }
            Err(_) => {
                // Late chunks for this id will now be discarded silently.
                self.pending.cancel(&session_id);
                tracing::warn!(%session_id, ?timeout, "request timed out");
                Err(RequestError::Timeout(timeout))
            }
        }
    }

    /// Fragment the body and send each chunk to its round-robin upstream.
    ///
    /// Sends are fire-and-forget per chunk: a lost chunk surfaces later as
    /// the session timeout, never as an immediate request error.
    async fn send_fragments(
        &self,
        session_id: &str,
        method: &str,
        url: &str,
        body: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<(), RequestError> {
        let slices = split_body(body, self.config.chunk_size.max(1));
        let total_chunks = slices.len() as u32;
        tracing::debug!(%session_id, total_chunks, chunk_size = self.config.chunk_size, "fragmenting request");

        for (i, slice) in slices.into_iter().enumerate() {
            let data = crypto::seal_payload(slice, &self.config.encryption)?;
            let chunk = Chunk {
                session_id: session_id.to_string(),
                sequence_num: i as u32 + 1,
                total_chunks,
                data,
                timestamp: Utc::now(),
                source_client: self.config.callback_addr(),
                target_url: Some(url.to_string()),
                method: Some(method.to_string()),
                headers: headers.clone(),
            };

            let upstream = &self.config.upstreams[i % self.config.upstreams.len()];
            if let Err(e) = self.forwarder.send_chunk(upstream, &chunk).await {
                tracing::warn!(%session_id, seq = i + 1, %upstream, error = %e, "chunk send failed, continuing");
            } else {
                tracing::debug!(%session_id, seq = i + 1, total_chunks, %upstream, "chunk sent");
            }
        }

        Ok(())
    }

    /// Accept one response chunk delivered by a downstream.
    pub fn accept_response_chunk(&self, body: &[u8]) -> Result<(), PipelineError> {
        let chunk = Chunk::from_json(body)?;
        let payload = crypto::open_payload(&chunk.data, &self.config.encryption)?;
        tracing::debug!(
            session_id = %chunk.session_id,
            seq = chunk.sequence_num,
            total = chunk.total_chunks,
            "response chunk received"
        );
        self.pending
            .record(&chunk.session_id, chunk.sequence_num, chunk.total_chunks, payload);
        Ok(())
    }
}

/// Split a body into chunk-sized slices. An empty body still yields one
/// zero-length slice so the session exists on the wire.
fn split_body(body: &[u8], chunk_size: usize) -> Vec<&[u8]> {
    if body.is_empty() {
        vec![&[]]
    } else {
        body.chunks(chunk_size).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_yields_exactly_one_empty_slice() {
        let slices = split_body(b"", 8192);
        assert_eq!(slices.len(), 1);
        assert!(slices[0].is_empty());
    }

    #[test]
    fn exact_multiple_yields_full_chunks() {
        let body = vec![0u8; 3 * 8192];
        let slices = split_body(&body, 8192);
        assert_eq!(slices.len(), 3);
        assert!(slices.iter().all(|s| s.len() == 8192));
    }

    #[test]
    fn one_extra_byte_yields_one_extra_chunk() {
        let body = vec![0u8; 3 * 8192 + 1];
        let slices = split_body(&body, 8192);
        assert_eq!(slices.len(), 4);
        assert_eq!(slices[3].len(), 1);
    }

    #[test]
    fn slices_cover_the_body_in_order() {
        let body: Vec<u8> = (0..=255).collect();
        let slices = split_body(&body, 100);
        assert_eq!(slices.len(), 3);
        let rejoined: Vec<u8> = slices.concat();
        assert_eq!(rejoined, body);
    }

    #[tokio::test]
    async fn request_without_upstreams_fails_fast() {
        let client = ProxyClient::new(ClientConfig::default()).unwrap();
        let err = client.get("http://target.test/", HashMap::new()).await;
        assert!(matches!(err, Err(RequestError::NoUpstreams)));
        assert_eq!(client.pending_count(), 0);
    }
}
