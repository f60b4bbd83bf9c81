//! HTTP handlers, one module per node role.

pub mod central;
pub mod client;
pub mod downstream;
pub mod gateway;
pub mod relay;
pub mod upstream;

use axum::http::{HeaderMap, StatusCode};

use scatter_services::PipelineError;

/// Map a pipeline failure to the status code the previous hop sees.
/// Errors are hop-local; nothing propagates end to end.
pub(crate) fn error_response(err: PipelineError) -> (StatusCode, String) {
    let status = match &err {
        PipelineError::Malformed(_) | PipelineError::InvalidBody(_) => StatusCode::BAD_REQUEST,
        PipelineError::Capacity => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::Crypto(_) | PipelineError::Forward(_) | PipelineError::Egress(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

/// Read a header as a string, empty when absent or non-UTF8.
pub(crate) fn header_str(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
