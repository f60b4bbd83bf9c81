//! HTTP surface for scatter nodes.
//!
//! Each role gets its own `Router` object rather than a process-global mux,
//! so several nodes can coexist in one process — the integration tests run
//! a whole pipeline over loopback this way.

pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use scatter_services::{CentralNode, DownstreamNode, Gateway, ProxyClient, RelayNode, UpstreamNode};

pub fn client_router(client: Arc<ProxyClient>) -> Router {
    Router::new()
        .route("/chunk", post(handlers::client::handle_chunk))
        .route("/health", get(handlers::client::handle_health))
        .with_state(client)
}

pub fn upstream_router(node: Arc<UpstreamNode>) -> Router {
    Router::new()
        .route("/chunk", post(handlers::upstream::handle_chunk))
        .route("/health", get(handlers::upstream::handle_health))
        .with_state(node)
}

pub fn central_router(node: Arc<CentralNode>) -> Router {
    Router::new()
        .route("/chunk", post(handlers::central::handle_chunk))
        .route("/health", get(handlers::central::handle_health))
        .with_state(node)
}

pub fn downstream_router(node: Arc<DownstreamNode>) -> Router {
    Router::new()
        .route("/chunk", post(handlers::downstream::handle_chunk))
        .route("/health", get(handlers::downstream::handle_health))
        .with_state(node)
}

pub fn relay_router(node: Arc<RelayNode>) -> Router {
    Router::new()
        .route("/relay", post(handlers::relay::handle_relay))
        .route("/health", get(handlers::relay::handle_health))
        .with_state(node)
}

pub fn gateway_router(node: Arc<Gateway>) -> Router {
    Router::new()
        .route("/proxy", post(handlers::gateway::handle_proxy))
        .route("/register", post(handlers::gateway::handle_register))
        .route("/health", get(handlers::gateway::handle_health))
        .with_state(node)
}

/// Bind a node's router on the given port and serve it forever.
pub async fn serve(router: Router, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "node listening");
    axum::serve(listener, router).await?;
    Ok(())
}
