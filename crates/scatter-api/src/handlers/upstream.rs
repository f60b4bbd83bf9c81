//! Upstream role — ingress endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;
use serde::Serialize;

use scatter_services::UpstreamNode;

/// `POST /chunk` — accept one request chunk, re-key it, forward to central.
pub async fn handle_chunk(
    State(node): State<Arc<UpstreamNode>>,
    body: Bytes,
) -> (StatusCode, String) {
    match node.accept_chunk(&body).await {
        Ok(()) => (StatusCode::OK, "chunk received and forwarded".into()),
        Err(e) => super::error_response(e),
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub role: &'static str,
    pub time: String,
}

pub async fn handle_health(State(_node): State<Arc<UpstreamNode>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        role: "upstream",
        time: chrono::Utc::now().to_rfc3339(),
    })
}
