//! Relay role — opaque forwarding endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use bytes::Bytes;
use serde::Serialize;

use scatter_services::relay::RelayDisposition;
use scatter_services::RelayNode;

/// `POST /relay` — accept opaque bytes from the previous hop. 200 when
/// forwarded inline, 202 when parked in the mixing buffer.
pub async fn handle_relay(
    State(node): State<Arc<RelayNode>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let request_id = super::header_str(&headers, "x-request-id");
    let from_node = super::header_str(&headers, "x-from-node");

    match node.accept(body, request_id, from_node).await {
        Ok(RelayDisposition::Forwarded) => (StatusCode::OK, "traffic relayed".into()),
        Ok(RelayDisposition::Queued) => (StatusCode::ACCEPTED, "traffic queued".into()),
        Err(e) => super::error_response(e),
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub role: &'static str,
    pub node_id: String,
    pub buffered_traffic: usize,
    pub registered: bool,
    pub next_hops: usize,
    pub time: String,
}

pub async fn handle_health(State(node): State<Arc<RelayNode>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        role: "relay",
        node_id: node.config().node_id.clone(),
        buffered_traffic: node.buffered().await,
        registered: node.registered().await,
        next_hops: node.config().next_hops.len(),
        time: chrono::Utc::now().to_rfc3339(),
    })
}
