//! Client-side tracking of requests awaiting their response chunks.
//!
//! Each in-flight request is a single-producer single-consumer rendezvous:
//! the caller parks on a oneshot receiver with a deadline while response
//! chunks trickle in from downstreams. Whoever records the completing chunk
//! assembles the body and fires the channel.

use std::collections::HashMap;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;

/// The reassembled result handed back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("missing chunk {0} at completion")]
    MissingChunk(u32),

    #[error("no upstream servers configured")]
    NoUpstreams,

    #[error("payload encryption failed: {0}")]
    Crypto(#[from] scatter_core::CryptoError),

    #[error("response channel closed before completion")]
    Canceled,
}

struct PendingSession {
    chunks: HashMap<u32, Vec<u8>>,
    total_chunks: u32,
    tx: Option<oneshot::Sender<Result<ProxyResponse, RequestError>>>,
}

/// All requests currently awaiting responses, keyed by session id.
#[derive(Default)]
pub struct PendingMap {
    inner: DashMap<String, PendingSession>,
}

impl PendingMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Register a new pending session. The caller awaits the returned
    /// receiver; total-chunks is learned from the first response chunk.
    pub fn register(&self, session_id: &str) -> oneshot::Receiver<Result<ProxyResponse, RequestError>> {
        let (tx, rx) = oneshot::channel();
        self.inner.insert(
            session_id.to_string(),
            PendingSession {
                chunks: HashMap::new(),
                total_chunks: 0,
                tx: Some(tx),
            },
        );
        rx
    }

    /// Drop a pending session. Chunks arriving afterwards are discarded
    /// silently by `record`.
    pub fn cancel(&self, session_id: &str) {
        self.inner.remove(session_id);
    }

    /// Record one decrypted response chunk. Completes the rendezvous when
    /// the received count reaches the chunk's total.
    pub fn record(&self, session_id: &str, sequence_num: u32, total_chunks: u32, payload: Vec<u8>) {
        let complete = match self.inner.get_mut(session_id) {
            None => {
                tracing::debug!(session_id, "no pending session for response chunk, discarding");
                return;
            }
            Some(mut entry) => {
                entry.total_chunks = total_chunks;
                entry.chunks.insert(sequence_num, payload);
                entry.chunks.len() as u32 == entry.total_chunks
            }
        };

        if !complete {
            return;
        }

        // Only one task can win the remove; the rendezvous fires once.
        if let Some((_, mut session)) = self.inner.remove(session_id) {
            let result = assemble(&session.chunks, session.total_chunks);
            if let Some(tx) = session.tx.take() {
                // The receiver may have timed out already; nothing to do then.
                let _ = tx.send(result);
            }
        }
    }
}

/// Concatenate payloads in ascending sequence order.
fn assemble(
    chunks: &HashMap<u32, Vec<u8>>,
    total_chunks: u32,
) -> Result<ProxyResponse, RequestError> {
    let mut body = Vec::new();
    for seq in 1..=total_chunks {
        let payload = chunks.get(&seq).ok_or(RequestError::MissingChunk(seq))?;
        body.extend_from_slice(payload);
    }
    // The wire format does not carry egress status or headers yet.
    Ok(ProxyResponse {
        status: 200,
        headers: HashMap::new(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_completes_the_rendezvous_in_order() {
        let pending = PendingMap::new();
        let rx = pending.register("sess");

        pending.record("sess", 2, 3, b" cruel".to_vec());
        pending.record("sess", 1, 3, b"goodbye".to_vec());
        assert_eq!(pending.len(), 1);
        pending.record("sess", 3, 3, b" world".to_vec());

        let response = rx.await.unwrap().unwrap();
        assert_eq!(response.body, b"goodbye cruel world");
        assert_eq!(response.status, 200);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn single_chunk_response_completes_immediately() {
        let pending = PendingMap::new();
        let rx = pending.register("one");
        pending.record("one", 1, 1, b"done".to_vec());
        assert_eq!(rx.await.unwrap().unwrap().body, b"done");
    }

    #[tokio::test]
    async fn unknown_session_is_discarded_silently() {
        let pending = PendingMap::new();
        pending.record("ghost", 1, 1, b"late".to_vec());
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn chunks_after_cancel_are_discarded() {
        let pending = PendingMap::new();
        let rx = pending.register("gone");
        pending.cancel("gone");
        pending.record("gone", 1, 1, b"too late".to_vec());
        assert!(pending.is_empty());
        assert!(rx.await.is_err(), "sender dropped with the session");
    }

    #[tokio::test]
    async fn out_of_range_sequence_yields_missing_chunk() {
        let pending = PendingMap::new();
        let rx = pending.register("bad");
        // Two chunks recorded, but sequence 3 lands where 2 should be.
        pending.record("bad", 1, 2, b"a".to_vec());
        pending.record("bad", 3, 2, b"c".to_vec());
        match rx.await.unwrap() {
            Err(RequestError::MissingChunk(2)) => {}
            other => panic!("expected MissingChunk(2), got {other:?}"),
        }
    }
}
