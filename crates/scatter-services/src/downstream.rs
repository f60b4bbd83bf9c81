//! Downstream egress node — collects response chunks from central and
//! delivers them straight to the originating client.
//!
//! Delivery never routes back through the upstream path: the client address
//! rides on the chunks themselves. Once a session is complete, the chunks
//! go out individually in sequence order, each re-encrypted for the client
//! hop.

use std::sync::Arc;
use std::time::Duration;

use scatter_core::config::DownstreamConfig;
use scatter_core::{crypto, Chunk};

use crate::error::PipelineError;
use crate::forward::{ForwardError, Forwarder};
use crate::session::{self, new_session_table, Session, SessionTable};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

pub struct DownstreamNode {
    config: DownstreamConfig,
    sessions: SessionTable,
    forwarder: Forwarder,
}

impl DownstreamNode {
    pub fn new(config: DownstreamConfig) -> Result<Arc<Self>, ForwardError> {
        Ok(Arc::new(Self {
            sessions: new_session_table(),
            forwarder: Forwarder::new(DELIVERY_TIMEOUT)?,
            config,
        }))
    }

    pub fn config(&self) -> &DownstreamConfig {
        &self.config
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn spawn_sweep(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        session::spawn_sweep(
            self.sessions.clone(),
            "downstream",
            self.config.reassembly_timeout(),
            interval,
        )
    }

    /// Accept one response chunk from central.
    pub fn accept_chunk(self: Arc<Self>, body: &[u8]) -> Result<(), PipelineError> {
        let mut chunk = Chunk::from_json(body)?;
        chunk.data = crypto::open_payload(&chunk.data, &self.config.encryption)?;
        tracing::debug!(
            session_id = %chunk.session_id,
            seq = chunk.sequence_num,
            total = chunk.total_chunks,
            "response chunk received"
        );

        if let Some(session) = session::record_chunk(&self.sessions, chunk, self.config.max_sessions)? {
            tokio::spawn(async move {
                self.deliver(session).await;
            });
        }
        Ok(())
    }

    /// Send each chunk of a complete session to the client address carried
    /// in chunk 1. Per-chunk failures are logged and skipped.
    async fn deliver(self: Arc<Self>, session: Session) {
        let session_id = session.id.clone();

        let client_addr = session
            .first_chunk()
            .map(|c| c.source_client.clone())
            .unwrap_or_default();
        if client_addr.is_empty() {
            tracing::error!(%session_id, "no client address on session, dropping");
            return;
        }

        let chunks = match session.take_ordered() {
            Ok(chunks) => chunks,
            Err(seq) => {
                tracing::error!(%session_id, seq, "missing chunk at completion, dropping session");
                return;
            }
        };

        let total = chunks.len();
        tracing::info!(%session_id, total, client = %client_addr, "session complete, delivering to client");

        for mut chunk in chunks {
            self.config.obfuscation.apply(&mut chunk.headers);

            match crypto::seal_payload(&chunk.data, &self.config.encryption) {
                Ok(data) => chunk.data = data,
                Err(e) => {
                    tracing::warn!(%session_id, seq = chunk.sequence_num, error = %e, "re-encryption failed, skipping chunk");
                    continue;
                }
            }

            if let Err(e) = self.forwarder.send_chunk(&client_addr, &chunk).await {
                tracing::warn!(
                    %session_id,
                    seq = chunk.sequence_num,
                    client = %client_addr,
                    error = %e,
                    "delivery to client failed"
                );
            }
        }

        tracing::debug!(%session_id, total, "delivery pass finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use chrono::Utc;

    fn wire_chunk(id: &str, seq: u32, total: u32, source_client: &str) -> Vec<u8> {
        Chunk {
            session_id: id.into(),
            sequence_num: seq,
            total_chunks: total,
            data: b"slice".to_vec(),
            timestamp: Utc::now(),
            source_client: source_client.into(),
            target_url: None,
            method: None,
            headers: HashMap::new(),
        }
        .to_json()
        .unwrap()
    }

    #[tokio::test]
    async fn partial_response_session_is_tracked() {
        let node = DownstreamNode::new(DownstreamConfig::default()).unwrap();
        node.clone()
            .accept_chunk(&wire_chunk("r1", 1, 2, "127.0.0.1:7000"))
            .unwrap();
        assert_eq!(node.session_count(), 1);
    }

    #[tokio::test]
    async fn completion_takes_the_session_out_of_the_table() {
        let node = DownstreamNode::new(DownstreamConfig::default()).unwrap();
        node.clone()
            .accept_chunk(&wire_chunk("r2", 2, 2, "127.0.0.1:1"))
            .unwrap();
        node.clone()
            .accept_chunk(&wire_chunk("r2", 1, 2, "127.0.0.1:1"))
            .unwrap();
        // Session moved to the delivery task; delivery itself fails against
        // the dead port but the table must already be clean.
        assert_eq!(node.session_count(), 0);
    }

    #[tokio::test]
    async fn garbage_is_malformed() {
        let node = DownstreamNode::new(DownstreamConfig::default()).unwrap();
        assert!(matches!(
            node.accept_chunk(b"\x00\x01"),
            Err(PipelineError::Malformed(_))
        ));
    }
}
