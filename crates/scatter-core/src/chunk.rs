//! Chunk — the wire unit of the pipeline.
//!
//! A chunk is one fragment of a request or response body plus the session
//! metadata every hop needs to act without global state: request routing
//! (`target_url`, `method`, `headers`, present on request chunks only) and
//! the callback address the response must eventually reach
//! (`source_client`). Chunks travel as JSON; the payload rides as base64.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Base64 serialization for the payload field.
pub mod serde_b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::Deserialize;

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

/// One fragment of a request or response body.
///
/// Within a session: `total_chunks` is constant, sequence numbers are unique
/// in `[1, total_chunks]`, and the request metadata (when present) is
/// identical on every chunk, so reassembly anywhere in the chain knows where
/// the request is headed and where the response goes back to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// 16 random bytes, rendered as 32 lowercase hex chars.
    pub session_id: String,
    /// 1-indexed position within the session.
    pub sequence_num: u32,
    pub total_chunks: u32,
    /// Payload slice — possibly AES-256-GCM sealed, base64 on the wire.
    #[serde(with = "serde_b64")]
    pub data: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    /// `host:port` the downstream delivers the response chunks to.
    #[serde(default)]
    pub source_client: String,
    /// Request chunks only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    /// Request chunks only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Headers to replay against the target URL.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl Chunk {
    /// Parse and validate a chunk from its JSON wire form.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ChunkError> {
        let chunk: Chunk = serde_json::from_slice(bytes)?;
        chunk.validate()?;
        Ok(chunk)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Schema validation beyond what serde enforces.
    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.session_id.is_empty() {
            return Err(ChunkError::EmptySessionId);
        }
        if self.total_chunks < 1 {
            return Err(ChunkError::BadTotal(self.total_chunks));
        }
        if self.sequence_num < 1 || self.sequence_num > self.total_chunks {
            return Err(ChunkError::BadSequence {
                seq: self.sequence_num,
                total: self.total_chunks,
            });
        }
        Ok(())
    }

    /// True when this chunk carries request routing metadata.
    pub fn is_request(&self) -> bool {
        self.target_url.is_some()
    }
}

/// Generate a fresh session identifier: 16 random bytes as 32 hex chars.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("invalid chunk JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("session id is empty")]
    EmptySessionId,

    #[error("total_chunks must be at least 1, got {0}")]
    BadTotal(u32),

    #[error("sequence_num {seq} outside [1, {total}]")]
    BadSequence { seq: u32, total: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_chunk() -> Chunk {
        Chunk {
            session_id: generate_session_id(),
            sequence_num: 2,
            total_chunks: 3,
            data: b"fragment payload".to_vec(),
            timestamp: Utc::now(),
            source_client: "127.0.0.1:7000".into(),
            target_url: Some("http://example.test/path".into()),
            method: Some("POST".into()),
            headers: HashMap::from([("User-Agent".into(), "scatter/0.1".into())]),
        }
    }

    #[test]
    fn serde_round_trip_is_identity() {
        let chunk = request_chunk();
        let wire = chunk.to_json().unwrap();
        let back = Chunk::from_json(&wire).unwrap();
        assert_eq!(chunk, back);
    }

    #[test]
    fn response_chunk_omits_request_fields() {
        let mut chunk = request_chunk();
        chunk.target_url = None;
        chunk.method = None;
        chunk.headers.clear();

        let wire = String::from_utf8(chunk.to_json().unwrap()).unwrap();
        assert!(!wire.contains("target_url"));
        assert!(!wire.contains("method"));
        assert!(!wire.contains("headers"));

        let back = Chunk::from_json(wire.as_bytes()).unwrap();
        assert_eq!(chunk, back);
    }

    #[test]
    fn payload_is_base64_on_the_wire() {
        let chunk = request_chunk();
        let wire = String::from_utf8(chunk.to_json().unwrap()).unwrap();
        assert!(wire.contains("\"ZnJhZ21lbnQgcGF5bG9hZA==\""));
    }

    #[test]
    fn session_id_is_32_hex_chars() {
        let id = generate_session_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_session_id());
    }

    #[test]
    fn validate_rejects_zero_total() {
        let mut chunk = request_chunk();
        chunk.total_chunks = 0;
        chunk.sequence_num = 0;
        assert!(matches!(chunk.validate(), Err(ChunkError::BadTotal(0))));
    }

    #[test]
    fn validate_rejects_sequence_out_of_range() {
        let mut chunk = request_chunk();
        chunk.sequence_num = 4;
        assert!(matches!(
            chunk.validate(),
            Err(ChunkError::BadSequence { seq: 4, total: 3 })
        ));

        chunk.sequence_num = 0;
        assert!(chunk.validate().is_err());
    }

    #[test]
    fn from_json_rejects_garbage() {
        assert!(Chunk::from_json(b"not json at all").is_err());
        assert!(Chunk::from_json(b"{\"session_id\":\"abc\"}").is_err());
    }
}
