//! scatterd — runs one scatter pipeline role.
//!
//! Usage: `scatterd [config.toml]`. The role comes from the config file (or
//! `SCATTER_ROLE`); everything else lives in that role's section.

use std::sync::Arc;

use anyhow::{Context, Result};

use scatter_core::{NodeConfig, Role};
use scatter_services::gateway::BATCH_INTERVAL;
use scatter_services::relay::{FLUSH_INTERVAL, REGISTRATION_DELAY};
use scatter_services::session::SWEEP_INTERVAL;
use scatter_services::{CentralNode, DownstreamNode, Gateway, ProxyClient, RelayNode, UpstreamNode};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "scatter.toml".to_string());
    let config = NodeConfig::load(&config_path)
        .with_context(|| format!("failed to load config from {config_path}"))?;

    tracing::info!(role = config.role.as_str(), config = %config_path, "scatterd starting");

    match config.role {
        Role::Client => {
            let client = Arc::new(ProxyClient::new(config.client)?);
            let port = client.config().listen_port;
            tracing::info!(port, upstreams = client.config().upstreams.len(), "client listening for responses");
            scatter_api::serve(scatter_api::client_router(client), port).await
        }

        Role::Upstream => {
            let node = Arc::new(UpstreamNode::new(config.upstream)?);
            let port = node.config().listen_port;
            tracing::info!(port, central = %node.config().central, "upstream forwarding to central");
            scatter_api::serve(scatter_api::upstream_router(node), port).await
        }

        Role::Central => {
            let node = CentralNode::new(config.central)?;
            node.spawn_sweep(SWEEP_INTERVAL);
            let port = node.config().listen_port;
            tracing::info!(port, downstreams = node.config().downstreams.len(), "central aggregator up");
            scatter_api::serve(scatter_api::central_router(node), port).await
        }

        Role::Downstream => {
            let node = DownstreamNode::new(config.downstream)?;
            node.spawn_sweep(SWEEP_INTERVAL);
            let port = node.config().listen_port;
            tracing::info!(port, "downstream egress up");
            scatter_api::serve(scatter_api::downstream_router(node), port).await
        }

        Role::Relay => {
            let node = RelayNode::new(config.relay)?;
            if node.config().traffic_mixing {
                node.clone().spawn_flush(FLUSH_INTERVAL);
            }
            node.clone().spawn_rotation();
            node.clone().spawn_registration(REGISTRATION_DELAY);
            let port = node.config().listen_port;
            tracing::info!(
                port,
                node_id = %node.config().node_id,
                next_hops = node.config().next_hops.len(),
                mixing = node.config().traffic_mixing,
                "relay up"
            );
            scatter_api::serve(scatter_api::relay_router(node), port).await
        }

        Role::Gateway => {
            let node = Gateway::new(config.gateway)?;
            node.clone().spawn_batch(BATCH_INTERVAL);
            let port = node.config().listen_port;
            tracing::info!(port, mixing = node.mixing(), "gateway up");
            scatter_api::serve(scatter_api::gateway_router(node), port).await
        }
    }
}
