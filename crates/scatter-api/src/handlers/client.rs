//! Client role — response listener.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;
use serde::Serialize;

use scatter_services::ProxyClient;

/// `POST /chunk` — response chunks arriving from downstreams.
/// Chunks for unknown sessions are acknowledged and discarded.
pub async fn handle_chunk(
    State(client): State<Arc<ProxyClient>>,
    body: Bytes,
) -> (StatusCode, String) {
    match client.accept_response_chunk(&body) {
        Ok(()) => (StatusCode::OK, "chunk received".into()),
        Err(e) => super::error_response(e),
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub role: &'static str,
    pub pending_sessions: usize,
    pub time: String,
}

pub async fn handle_health(State(client): State<Arc<ProxyClient>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        role: "client",
        pending_sessions: client.pending_count(),
        time: chrono::Utc::now().to_rfc3339(),
    })
}
