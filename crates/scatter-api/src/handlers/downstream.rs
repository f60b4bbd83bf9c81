//! Downstream role — response egress endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;
use serde::Serialize;

use scatter_services::DownstreamNode;

/// `POST /chunk` — accept one response chunk from central.
pub async fn handle_chunk(
    State(node): State<Arc<DownstreamNode>>,
    body: Bytes,
) -> (StatusCode, String) {
    match node.accept_chunk(&body) {
        Ok(()) => (StatusCode::OK, "chunk received".into()),
        Err(e) => super::error_response(e),
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub role: &'static str,
    pub active_sessions: usize,
    pub time: String,
}

pub async fn handle_health(State(node): State<Arc<DownstreamNode>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        role: "downstream",
        active_sessions: node.session_count(),
        time: chrono::Utc::now().to_rfc3339(),
    })
}
