//! Hop-local failure taxonomy.
//!
//! Errors never cross a hop boundary: the API layer maps these to a status
//! code for the previous hop, and the only end-to-end surfaces are the
//! client's timeout and missing-chunk errors.

use thiserror::Error;

use crate::forward::ForwardError;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Body failed to deserialize or failed schema validation. 400.
    #[error(transparent)]
    Malformed(#[from] scatter_core::ChunkError),

    /// GCM tag mismatch, wrong key, truncated frame. 500, chunk dropped.
    #[error("payload crypto failure: {0}")]
    Crypto(#[from] scatter_core::CryptoError),

    /// Next hop unreachable or returned non-2xx. 500, chunk lost.
    #[error(transparent)]
    Forward(#[from] ForwardError),

    /// Gateway-bound request envelope failed to parse. 400.
    #[error("invalid request body: {0}")]
    InvalidBody(serde_json::Error),

    /// Session table or mixing buffer over its configured cap. 503.
    #[error("at capacity, rejecting")]
    Capacity,

    /// Outbound Internet/relay call failed. Logged, session dropped.
    #[error("egress failed: {0}")]
    Egress(String),
}
