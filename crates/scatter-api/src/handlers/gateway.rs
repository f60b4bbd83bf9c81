//! Gateway role — authenticated egress and node registration.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use scatter_services::gateway::ProxyDisposition;
use scatter_services::Gateway;

#[derive(Serialize)]
struct QueuedAck {
    status: &'static str,
    request_id: String,
}

/// `POST /proxy` — relay-submitted egress request. Requires the
/// `X-Node-ID` / `X-Auth-Token` pair; 200 with the response body inline,
/// 202 when queued into the mixing batch.
pub async fn handle_proxy(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let node_id = super::header_str(&headers, "x-node-id");
    let token = super::header_str(&headers, "x-auth-token");

    if !gateway.authenticate(&node_id, &token) {
        tracing::warn!(%node_id, "proxy authentication failed");
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }

    match gateway.submit(&body, &node_id).await {
        Ok(ProxyDisposition::Completed(response)) => (StatusCode::OK, response).into_response(),
        Ok(ProxyDisposition::Queued(request_id)) => (
            StatusCode::ACCEPTED,
            Json(QueuedAck {
                status: "queued",
                request_id,
            }),
        )
            .into_response(),
        Err(e) => super::error_response(e).into_response(),
    }
}

#[derive(Deserialize)]
struct RegisterRequest {
    node_id: String,
    secret: String,
}

#[derive(Serialize)]
struct RegisterResponse {
    node_id: String,
    token: String,
}

/// `POST /register` — mint a token for a configured node id.
pub async fn handle_register(State(gateway): State<Arc<Gateway>>, body: Bytes) -> Response {
    let req: RegisterRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(_) => return (StatusCode::BAD_REQUEST, "invalid request").into_response(),
    };
    // The secret rides along for protocol parity; the node-id allowlist is
    // the actual gate.
    let _ = req.secret;

    match gateway.register(&req.node_id) {
        Some(token) => Json(RegisterResponse {
            node_id: req.node_id,
            token,
        })
        .into_response(),
        None => {
            tracing::warn!(node_id = %req.node_id, "registration refused");
            (StatusCode::UNAUTHORIZED, "unauthorized").into_response()
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub role: &'static str,
    pub queued_requests: usize,
    pub registered_nodes: usize,
    pub traffic_mixing: bool,
    pub time: String,
}

pub async fn handle_health(State(gateway): State<Arc<Gateway>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        role: "gateway",
        queued_requests: gateway.queued().await,
        registered_nodes: gateway.tokens().len(),
        traffic_mixing: gateway.mixing(),
        time: chrono::Utc::now().to_rfc3339(),
    })
}
