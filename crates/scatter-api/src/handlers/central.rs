//! Central role — aggregation endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;
use serde::Serialize;

use scatter_services::CentralNode;

/// `POST /chunk` — aggregate one request chunk from an upstream. Completing
/// a session schedules its dispatch; the response never flows back through
/// this connection.
pub async fn handle_chunk(
    State(node): State<Arc<CentralNode>>,
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

pub async fn handle_health(State(node): State<Arc<CentralNode>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        role: "central",
        active_sessions: node.session_count(),
        time: chrono::Utc::now().to_rfc3339(),
    })
}
