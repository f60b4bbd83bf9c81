//! Central aggregator — reassembles requests from the upstream pool,
//! performs the outbound call, and fans the response back out across the
//! downstream pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use scatter_core::config::CentralConfig;
use scatter_core::{crypto, Chunk};

use crate::error::PipelineError;
use crate::forward::{ForwardError, Forwarder};
use crate::gateway::ProxyRequest;
use crate::session::{self, new_session_table, Session, SessionTable};

const FANOUT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct CentralNode {
    config: CentralConfig,
    sessions: SessionTable,
    forwarder: Forwarder,
    /// Client for Internet egress and relay-chain submission.
    egress: reqwest::Client,
}

impl CentralNode {
    pub fn new(config: CentralConfig) -> Result<Arc<Self>, ForwardError> {
        let egress = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(ForwardError::Client)?;
        Ok(Arc::new(Self {
            sessions: new_session_table(),
            forwarder: Forwarder::new(FANOUT_TIMEOUT)?,
            egress,
            config,
        }))
    }

    pub fn config(&self) -> &CentralConfig {
        &self.config
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn spawn_sweep(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        session::spawn_sweep(
            self.sessions.clone(),
            "central",
            self.config.reassembly_timeout(),
            interval,
        )
    }

    /// Accept one request chunk from an upstream. When the chunk completes
    /// its session, the session leaves the table and a dispatch task takes
    /// sole ownership of it.
    pub fn accept_chunk(self: Arc<Self>, body: &[u8]) -> Result<(), PipelineError> {
        let mut chunk = Chunk::from_json(body)?;
        chunk.data = crypto::open_payload(&chunk.data, &self.config.encryption)?;
        tracing::debug!(
            session_id = %chunk.session_id,
            seq = chunk.sequence_num,
            total = chunk.total_chunks,
            "chunk received"
        );

        if let Some(session) = session::record_chunk(&self.sessions, chunk, self.config.max_sessions)? {
            tokio::spawn(async move {
                self.dispatch(session).await;
            });
        }
        Ok(())
    }

    /// Reassemble, egress, fan out. Failures here are hop-local: the session
    /// is simply dropped and the originating client times out.
    async fn dispatch(self: Arc<Self>, session: Session) {
        let session_id = session.id.clone();
        tracing::info!(%session_id, chunks = session.total_chunks, "session complete, dispatching");

        let body = match session.assemble() {
            Ok(body) => body,
            Err(seq) => {
                tracing::error!(%session_id, seq, "missing chunk at completion, dropping session");
                return;
            }
        };

        let response = match self.perform_egress(&session, body).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(%session_id, error = %e, "egress failed, dropping session");
                return;
            }
        };

        if let Err(e) = self.dispatch_response(&session, &response).await {
            tracing::error!(%session_id, error = %e, "response fan-out failed");
        }
    }

    async fn perform_egress(&self, session: &Session, body: Vec<u8>) -> Result<Vec<u8>, PipelineError> {
        match self.config.relay.as_deref() {
            Some(relay) => self.egress_via_relay(relay, session, body).await,
            None => self.egress_direct(session, body).await,
        }
    }

    /// Direct mode: replay the request against its target and read the body.
    async fn egress_direct(&self, session: &Session, body: Vec<u8>) -> Result<Vec<u8>, PipelineError> {
        let url = session
            .target_url
            .as_deref()
            .ok_or_else(|| PipelineError::Egress("session has no target URL".into()))?;
        let method = session.method.as_deref().unwrap_or("GET");
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| PipelineError::Egress(format!("bad method {method:?}")))?;

        let mut req = self.egress.request(method, url);
        for (k, v) in &session.headers {
            if k.eq_ignore_ascii_case("x-node-id") || k.eq_ignore_ascii_case("x-auth-token") {
                continue;
            }
            req = req.header(k, v);
        }

        let resp = req
            .body(body)
            .send()
            .await
            .map_err(|e| PipelineError::Egress(e.to_string()))?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| PipelineError::Egress(e.to_string()))?;

        tracing::info!(session_id = %session.id, url, bytes = bytes.len(), "proxied request");
        Ok(bytes.to_vec())
    }

    /// Relay-chain mode: wrap the request as a gateway envelope and hand it
    /// to the first relay hop. The relay acknowledges without returning the
    /// gateway's response body, so this path yields an empty response and
    /// the client eventually times out.
    async fn egress_via_relay(
        &self,
        relay: &str,
        session: &Session,
        body: Vec<u8>,
    ) -> Result<Vec<u8>, PipelineError> {
        let envelope = ProxyRequest {
            request_id: session.id.clone(),
            target_url: session
                .target_url
                .clone()
                .ok_or_else(|| PipelineError::Egress("session has no target URL".into()))?,
            method: session.method.clone().unwrap_or_else(|| "GET".into()),
            body,
            headers: session.headers.clone(),
        };

        let url = format!("http://{relay}/relay");
        let resp = self
            .egress
            .post(&url)
            .header("X-Request-ID", &session.id)
            .header("X-From-Node", &self.config.node_id)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| PipelineError::Egress(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(PipelineError::Egress(format!(
                "relay {url} returned status {}",
                resp.status()
            )));
        }

        tracing::info!(session_id = %session.id, relay, "request handed to relay chain");
        Ok(Vec::new())
    }

    /// Fragment the response and dispatch round-robin across downstreams.
    /// Every chunk carries the source-client address from request chunk 1 —
    /// that is how downstreams learn where to deliver.
    async fn dispatch_response(&self, session: &Session, response: &[u8]) -> Result<(), PipelineError> {
        if self.config.downstreams.is_empty() {
            return Err(PipelineError::Egress("no downstream servers configured".into()));
        }

        let source_client = session
            .first_chunk()
            .map(|c| c.source_client.clone())
            .unwrap_or_default();
        if source_client.is_empty() {
            return Err(PipelineError::Egress("session carries no source client address".into()));
        }

        let chunk_size = self.config.chunk_size.max(1);
        let total_chunks = response.len().div_ceil(chunk_size) as u32;
        tracing::debug!(session_id = %session.id, total_chunks, "fragmenting response");

        for (i, slice) in response.chunks(chunk_size).enumerate() {
            let data = crypto::seal_payload(slice, &self.config.encryption)?;
            let chunk = Chunk {
                session_id: session.id.clone(),
                sequence_num: i as u32 + 1,
                total_chunks,
                data,
                timestamp: Utc::now(),
                source_client: source_client.clone(),
                target_url: None,
                method: None,
                headers: HashMap::new(),
            };

            let downstream = &self.config.downstreams[i % self.config.downstreams.len()];
            if let Err(e) = self.forwarder.send_chunk(downstream, &chunk).await {
                tracing::warn!(
                    session_id = %session.id,
                    seq = i + 1,
                    %downstream,
                    error = %e,
                    "response chunk send failed"
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(max_sessions: usize) -> Arc<CentralNode> {
        CentralNode::new(CentralConfig {
            max_sessions,
            downstreams: vec!["127.0.0.1:1".into()],
            ..CentralConfig::default()
        })
        .unwrap()
    }

    fn wire_chunk(id: &str, seq: u32, total: u32) -> Vec<u8> {
        Chunk {
            session_id: id.into(),
            sequence_num: seq,
            total_chunks: total,
            data: b"part".to_vec(),
            timestamp: Utc::now(),
            source_client: "127.0.0.1:7000".into(),
            target_url: Some("http://target.test/".into()),
            method: Some("POST".into()),
            headers: HashMap::new(),
        }
        .to_json()
        .unwrap()
    }

    #[tokio::test]
    async fn partial_session_stays_in_the_table() {
        let node = node(16);
        node.clone().accept_chunk(&wire_chunk("s1", 1, 3)).unwrap();
        node.clone().accept_chunk(&wire_chunk("s1", 2, 3)).unwrap();
        assert_eq!(node.session_count(), 1);
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let node = node(16);
        assert!(matches!(
            node.clone().accept_chunk(b"[1,2,3]"),
            Err(PipelineError::Malformed(_))
        ));
        assert_eq!(node.session_count(), 0);
    }

    #[tokio::test]
    async fn capacity_cap_returns_capacity_error() {
        let node = node(1);
        node.clone().accept_chunk(&wire_chunk("s1", 1, 2)).unwrap();
        assert!(matches!(
            node.clone().accept_chunk(&wire_chunk("s2", 1, 2)),
            Err(PipelineError::Capacity)
        ));
    }
}
