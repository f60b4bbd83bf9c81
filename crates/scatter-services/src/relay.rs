//! Relay — optional mixing hop between central and the gateway.
//!
//! A relay either forwards traffic immediately or buffers it and releases a
//! shuffled batch on a timer, breaking timing correlation between what
//! enters and what leaves. A single next-hop cursor rotates periodically:
//! path diversity over time, not per-message spreading.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use scatter_core::config::RelayConfig;

use crate::error::PipelineError;
use crate::forward::ForwardError;

/// Nominal cadence of the mixing-buffer flush.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(3);

/// Delay before a relay attempts gateway registration.
pub const REGISTRATION_DELAY: Duration = Duration::from_secs(2);

struct BufferedPayload {
    request_id: String,
    from_node: String,
    data: Bytes,
    received_at: Instant,
}

/// What happened to an accepted payload.
#[derive(Debug, PartialEq, Eq)]
pub enum RelayDisposition {
    /// Forwarded to the next hop inline. 200.
    Forwarded,
    /// Parked in the mixing buffer. 202.
    Queued,
}

pub struct RelayNode {
    config: RelayConfig,
    http: reqwest::Client,
    hop_cursor: AtomicUsize,
    buffer: Mutex<Vec<BufferedPayload>>,
    token: RwLock<Option<String>>,
}

impl RelayNode {
    pub fn new(config: RelayConfig) -> Result<Arc<Self>, ForwardError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(ForwardError::Client)?;
        let token = RwLock::new(config.auth_token.clone());
        Ok(Arc::new(Self {
            config,
            http,
            hop_cursor: AtomicUsize::new(0),
            buffer: Mutex::new(Vec::new()),
            token,
        }))
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn next_hop_index(&self) -> usize {
        self.hop_cursor.load(Ordering::Relaxed)
    }

    pub async fn buffered(&self) -> usize {
        self.buffer.lock().await.len()
    }

    pub async fn registered(&self) -> bool {
        self.token.read().await.is_some()
    }

    /// Accept one opaque payload from the previous hop.
    pub async fn accept(
        &self,
        data: Bytes,
        request_id: String,
        from_node: String,
    ) -> Result<RelayDisposition, PipelineError> {
        tracing::debug!(%request_id, from = %from_node, bytes = data.len(), "relay traffic received");

        if self.config.traffic_mixing {
            let mut buffer = self.buffer.lock().await;
            if buffer.len() >= self.config.max_buffered {
                return Err(PipelineError::Capacity);
            }
            buffer.push(BufferedPayload {
                request_id,
                from_node,
                data,
                received_at: Instant::now(),
            });
            return Ok(RelayDisposition::Queued);
        }

        self.forward(&data, &request_id).await?;
        Ok(RelayDisposition::Forwarded)
    }

    /// Forward one payload to the terminal gateway or the current next hop.
    async fn forward(&self, data: &[u8], request_id: &str) -> Result<(), PipelineError> {
        let (url, terminal) = match self.config.gateway_url.as_deref() {
            Some(gateway) => (format!("{}/proxy", gateway.trim_end_matches('/')), true),
            None => {
                let hops = &self.config.next_hops;
                if hops.is_empty() {
                    return Err(PipelineError::Egress("no next hops configured".into()));
                }
                let hop = &hops[self.hop_cursor.load(Ordering::Relaxed) % hops.len()];
                (format!("http://{hop}/relay"), false)
            }
        };

        let mut req = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-Request-ID", request_id)
            .header("X-From-Node", &self.config.node_id)
            .body(data.to_vec());

        if terminal {
            if let Some(token) = self.token.read().await.clone() {
                req = req
                    .header("X-Node-ID", &self.config.node_id)
                    .header("X-Auth-Token", token);
            }
        }

        let resp = req
            .send()
            .await
            .map_err(|e| PipelineError::Egress(e.to_string()))?;
        // 200 (served) and 202 (queued at the gateway) both count.
        if !resp.status().is_success() {
            return Err(PipelineError::Egress(format!(
                "{url} returned status {}",
                resp.status()
            )));
        }

        tracing::debug!(%request_id, %url, "traffic forwarded");
        Ok(())
    }

    /// Drain the mixing buffer on a ticker: copy-and-clear under lock,
    /// shuffle to decouple release order from arrival order, forward each.
    pub fn spawn_flush(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let relay = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let mut batch = {
                    let mut buffer = relay.buffer.lock().await;
                    std::mem::take(&mut *buffer)
                };
                if batch.is_empty() {
                    continue;
                }

                batch.shuffle(&mut rand::thread_rng());
                tracing::debug!(items = batch.len(), "flushing mixed traffic");

                for item in batch {
                    let relay = Arc::clone(&relay);
                    tokio::spawn(async move {
                        let held = item.received_at.elapsed();
                        if let Err(e) = relay.forward(&item.data, &item.request_id).await {
                            tracing::warn!(
                                request_id = %item.request_id,
                                from = %item.from_node,
                                ?held,
                                error = %e,
                                "buffered forward failed"
                            );
                        }
                    });
                }
            }
        })
    }

    /// Advance the next-hop cursor every rotation period.
    pub fn spawn_rotation(self: Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        if self.config.rotation_secs == 0 || self.config.next_hops.len() <= 1 {
            return None;
        }
        let relay = self;
        Some(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(relay.config.rotation_secs));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let len = relay.config.next_hops.len();
                let next = (relay.hop_cursor.load(Ordering::Relaxed) + 1) % len;
                relay.hop_cursor.store(next, Ordering::Relaxed);
                tracing::debug!(hop = next, "rotated next-hop cursor");
            }
        }))
    }

    /// Register with the gateway after a startup delay when no token is
    /// configured.
    pub fn spawn_registration(self: Arc<Self>, startup_delay: Duration) -> Option<tokio::task::JoinHandle<()>> {
        let gateway = self.config.gateway_url.clone()?;
        if self.config.auth_token.is_some() {
            return None;
        }
        let relay = self;
        Some(tokio::spawn(async move {
            tokio::time::sleep(startup_delay).await;
            if let Err(e) = relay.register(&gateway).await {
                tracing::error!(error = %e, "gateway registration failed");
            }
        }))
    }

    async fn register(&self, gateway: &str) -> Result<(), PipelineError> {
        #[derive(Serialize)]
        struct Registration<'a> {
            node_id: &'a str,
            secret: &'a str,
        }
        #[derive(Deserialize)]
        struct RegistrationReply {
            node_id: String,
            token: String,
        }

        let url = format!("{}/register", gateway.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .json(&Registration {
                node_id: &self.config.node_id,
                secret: &self.config.secret,
            })
            .send()
            .await
            .map_err(|e| PipelineError::Egress(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(PipelineError::Egress(format!(
                "registration returned status {}",
                resp.status()
            )));
        }

        let reply: RegistrationReply = resp
            .json()
            .await
            .map_err(|e| PipelineError::Egress(e.to_string()))?;
        *self.token.write().await = Some(reply.token);
        tracing::info!(node_id = %reply.node_id, "registered with gateway");
        Ok(())
    }
}
