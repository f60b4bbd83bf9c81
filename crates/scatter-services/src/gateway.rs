//! Gateway — the single Internet egress.
//!
//! Authenticates relays, optionally batches and jitters outbound requests,
//! and performs the actual HTTP call with the inter-node auth headers
//! stripped. On the batched path the response bodies are discarded; nothing
//! routes them back through the relay chain.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

use scatter_core::chunk::serde_b64;
use scatter_core::config::GatewayConfig;

use crate::auth::TokenRegistry;
use crate::error::PipelineError;
use crate::forward::ForwardError;

/// Cadence of the mixing-batch drain.
pub const BATCH_INTERVAL: Duration = Duration::from_secs(5);

/// The request envelope a relay submits to `/proxy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyRequest {
    pub request_id: String,
    pub target_url: String,
    pub method: String,
    #[serde(default, with = "serde_b64")]
    pub body: Vec<u8>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

struct QueuedRequest {
    request: ProxyRequest,
    node_id: String,
    received_at: Instant,
}

/// Outcome of an authenticated `/proxy` submission.
pub enum ProxyDisposition {
    /// Executed inline; carries the target's response body.
    Completed(Vec<u8>),
    /// Queued into the mixing batch; carries the request id.
    Queued(String),
}

pub struct Gateway {
    config: GatewayConfig,
    tokens: TokenRegistry,
    batch: Mutex<Vec<QueuedRequest>>,
    http: reqwest::Client,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Result<Arc<Self>, ForwardError> {
        let tokens = TokenRegistry::new(config.authenticated_nodes.clone());
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(ForwardError::Client)?;
        Ok(Arc::new(Self {
            config,
            tokens,
            batch: Mutex::new(Vec::new()),
            http,
        }))
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    pub fn mixing(&self) -> bool {
        self.config.traffic_mixing
    }

    pub async fn queued(&self) -> usize {
        self.batch.lock().await.len()
    }

    /// Constant-time check of the `X-Node-ID` / `X-Auth-Token` pair.
    pub fn authenticate(&self, node_id: &str, token: &str) -> bool {
        self.tokens.verify(node_id, token)
    }

    /// Handle `/register`: known node ids get a fresh token, others None.
    /// The submitted secret travels with the registration but carries no
    /// meaning beyond the node-id allowlist.
    pub fn register(&self, node_id: &str) -> Option<String> {
        self.tokens.register(node_id)
    }

    /// Handle an authenticated `/proxy` submission.
    pub async fn submit(&self, body: &[u8], node_id: &str) -> Result<ProxyDisposition, PipelineError> {
        let request: ProxyRequest =
            serde_json::from_slice(body).map_err(PipelineError::InvalidBody)?;

        if self.config.timing_jitter_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.timing_jitter_ms)).await;
        }

        if self.config.traffic_mixing {
            let mut batch = self.batch.lock().await;
            if batch.len() >= self.config.max_batch {
                return Err(PipelineError::Capacity);
            }
            let request_id = request.request_id.clone();
            tracing::debug!(%request_id, node_id, "request queued for mixing");
            batch.push(QueuedRequest {
                request,
                node_id: node_id.to_string(),
                received_at: Instant::now(),
            });
            Ok(ProxyDisposition::Queued(request_id))
        } else {
            let response = self.perform(&request).await?;
            Ok(ProxyDisposition::Completed(response))
        }
    }

    /// Execute the outbound call with the inter-node auth headers stripped.
    async fn perform(&self, request: &ProxyRequest) -> Result<Vec<u8>, PipelineError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| PipelineError::Egress(format!("bad method {:?}", request.method)))?;

        let mut req = self.http.request(method, &request.target_url);
        for (k, v) in &request.headers {
            if k.eq_ignore_ascii_case("x-node-id") || k.eq_ignore_ascii_case("x-auth-token") {
                continue;
            }
            req = req.header(k, v);
        }

        let resp = req
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| PipelineError::Egress(e.to_string()))?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| PipelineError::Egress(e.to_string()))?;

        tracing::info!(
            request_id = %request.request_id,
            target = %request.target_url,
            bytes = bytes.len(),
            "egress request completed"
        );
        Ok(bytes.to_vec())
    }

    /// Drain the mixing batch on a ticker: copy-and-clear under lock, then
    /// run the calls concurrently.
    pub fn spawn_batch(self: Arc<Self>, interval: Duration) -> Option<tokio::task::JoinHandle<()>> {
        if !self.config.traffic_mixing {
            return None;
        }
        let gateway = self;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let batch = {
                    let mut queue = gateway.batch.lock().await;
                    std::mem::take(&mut *queue)
                };
                if batch.is_empty() {
                    continue;
                }
                tracing::info!(requests = batch.len(), "draining mixed batch");

                for item in batch {
                    let gateway = Arc::clone(&gateway);
                    tokio::spawn(async move {
                        let waited = item.received_at.elapsed();
                        if let Err(e) = gateway.perform(&item.request).await {
                            tracing::warn!(
                                request_id = %item.request.request_id,
                                node_id = %item.node_id,
                                ?waited,
                                error = %e,
                                "batched egress failed"
                            );
                        }
                    });
                }
            }
        }))
    }
}
