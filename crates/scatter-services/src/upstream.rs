//! Upstream ingress node — a stateless re-encrypting forwarder.
//!
//! Holds no session map: each chunk is obfuscated, re-keyed, delayed, and
//! pushed to the central aggregator independently.

use std::time::Duration;

use rand::Rng;

use scatter_core::config::UpstreamConfig;
use scatter_core::{crypto, Chunk};

use crate::error::PipelineError;
use crate::forward::{ForwardError, Forwarder};

const FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

pub struct UpstreamNode {
    config: UpstreamConfig,
    forwarder: Forwarder,
}

impl UpstreamNode {
    pub fn new(config: UpstreamConfig) -> Result<Self, ForwardError> {
        Ok(Self {
            config,
            forwarder: Forwarder::new(FORWARD_TIMEOUT)?,
        })
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Accept one request chunk from a client and forward it to central.
    pub async fn accept_chunk(&self, body: &[u8]) -> Result<(), PipelineError> {
        let mut chunk = Chunk::from_json(body)?;
        tracing::debug!(
            session_id = %chunk.session_id,
            seq = chunk.sequence_num,
            total = chunk.total_chunks,
            "request chunk received"
        );

        self.config.obfuscation.apply(&mut chunk.headers);

        // Plaintext exists only between these two transforms: decrypt under
        // the ingress key, reseal under the forwarding key with a fresh nonce.
        if self.config.encryption.enabled {
            let plaintext = crypto::decrypt(&chunk.data, &self.config.encryption.ingress_key()?)?;
            chunk.data = crypto::encrypt(&plaintext, &self.config.encryption.forward_key()?)?;
        }

        jitter_sleep(self.config.obfuscation.jitter_ms).await;

        self.forwarder
            .send_chunk(&self.config.central, &chunk)
            .await?;
        tracing::debug!(session_id = %chunk.session_id, seq = chunk.sequence_num, "chunk forwarded to central");
        Ok(())
    }
}

/// Sleep a uniform random duration in `[0, max_ms]` milliseconds.
pub(crate) async fn jitter_sleep(max_ms: u64) {
    if max_ms == 0 {
        return;
    }
    let delay = rand::thread_rng().gen_range(0..=max_ms);
    tokio::time::sleep(Duration::from_millis(delay)).await;
}
