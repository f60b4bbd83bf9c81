//! Session reassembly state, shared by the central and downstream roles.
//!
//! A session is owned by exactly one node: created lazily on first chunk
//! arrival, handed to a dispatch task by value the moment it completes, and
//! otherwise evicted by the periodic sweep. The table itself is the only
//! cross-task shared state a node holds.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use scatter_core::Chunk;

use crate::error::PipelineError;

/// Default cadence of the eviction sweep.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Reassembly state for one session.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    chunks: HashMap<u32, Chunk>,
    /// Learned from the first chunk; constant within a session.
    pub total_chunks: u32,
    pub first_seen: Instant,
    /// Request metadata cached from the first chunk that arrived.
    pub target_url: Option<String>,
    pub method: Option<String>,
    pub headers: HashMap<String, String>,
}

impl Session {
    fn new(first: &Chunk) -> Self {
        Self {
            id: first.session_id.clone(),
            chunks: HashMap::new(),
            total_chunks: first.total_chunks,
            first_seen: Instant::now(),
            target_url: first.target_url.clone(),
            method: first.method.clone(),
            headers: first.headers.clone(),
        }
    }

    /// Store a chunk under its sequence number. Duplicates overwrite.
    pub fn insert(&mut self, chunk: Chunk) {
        self.total_chunks = chunk.total_chunks;
        self.chunks.insert(chunk.sequence_num, chunk);
    }

    pub fn received(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_complete(&self) -> bool {
        self.chunks.len() as u32 == self.total_chunks
    }

    /// The chunk with sequence number 1 — carries the authoritative
    /// `source_client` for the session.
    pub fn first_chunk(&self) -> Option<&Chunk> {
        self.chunks.get(&1)
    }

    /// Concatenate payloads in ascending sequence order.
    /// A missing slot is fatal for the session.
    pub fn assemble(&self) -> Result<Vec<u8>, u32> {
        let mut body = Vec::new();
        for seq in 1..=self.total_chunks {
            let chunk = self.chunks.get(&seq).ok_or(seq)?;
            body.extend_from_slice(&chunk.data);
        }
        Ok(body)
    }

    /// Consume the session into its chunks, ascending by sequence number.
    pub fn take_ordered(mut self) -> Result<Vec<Chunk>, u32> {
        let mut ordered = Vec::with_capacity(self.total_chunks as usize);
        for seq in 1..=self.total_chunks {
            ordered.push(self.chunks.remove(&seq).ok_or(seq)?);
        }
        Ok(ordered)
    }
}

/// Concurrent session table keyed by session id.
pub type SessionTable = Arc<DashMap<String, Session>>;

pub fn new_session_table() -> SessionTable {
    Arc::new(DashMap::new())
}

/// Insert-or-create a session for this chunk and store the chunk in it.
///
/// Returns the owned session exactly once, on the insert that completes it —
/// the entry is removed from the table so no other task can reach it. A
/// chunk for a brand-new session is rejected with `Capacity` once the table
/// holds `max_sessions` entries.
pub fn record_chunk(
    table: &SessionTable,
    chunk: Chunk,
    max_sessions: usize,
) -> Result<Option<Session>, PipelineError> {
    let id = chunk.session_id.clone();

    if !table.contains_key(&id) && table.len() >= max_sessions {
        return Err(PipelineError::Capacity);
    }

    let complete = {
        let mut session = table
            .entry(id.clone())
            .or_insert_with(|| Session::new(&chunk));
        session.insert(chunk);
        session.is_complete()
    };

    if complete {
        // A racing duplicate may observe completeness too; only one remove
        // wins, so dispatch happens exactly once.
        Ok(table.remove(&id).map(|(_, session)| session))
    } else {
        Ok(None)
    }
}

/// Evict sessions older than `timeout`, every `interval`.
pub fn spawn_sweep(
    table: SessionTable,
    role: &'static str,
    timeout: Duration,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            table.retain(|id, session| {
                let expired = session.first_seen.elapsed() > timeout;
                if expired {
                    tracing::warn!(role, session_id = %id, received = session.received(), "session timed out, evicting");
                }
                !expired
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn chunk(id: &str, seq: u32, total: u32, data: &[u8]) -> Chunk {
        Chunk {
            session_id: id.into(),
            sequence_num: seq,
            total_chunks: total,
            data: data.to_vec(),
            timestamp: Utc::now(),
            source_client: "127.0.0.1:7000".into(),
            target_url: Some("http://target.test/".into()),
            method: Some("GET".into()),
            headers: HashMap::new(),
        }
    }

    #[test]
    fn completes_only_when_all_sequences_present() {
        let table = new_session_table();
        assert!(record_chunk(&table, chunk("s1", 1, 3, b"a"), 16).unwrap().is_none());
        assert!(record_chunk(&table, chunk("s1", 3, 3, b"c"), 16).unwrap().is_none());
        let session = record_chunk(&table, chunk("s1", 2, 3, b"b"), 16)
            .unwrap()
            .expect("third chunk completes the session");

        assert_eq!(session.assemble().unwrap(), b"abc");
        // Ownership moved out — the table no longer knows the session.
        assert!(table.is_empty());
    }

    #[test]
    fn order_of_arrival_does_not_matter() {
        let table = new_session_table();
        record_chunk(&table, chunk("s2", 2, 2, b"world"), 16).unwrap();
        let session = record_chunk(&table, chunk("s2", 1, 2, b"hello "), 16)
            .unwrap()
            .unwrap();
        assert_eq!(session.assemble().unwrap(), b"hello world");
    }

    #[test]
    fn duplicate_sequence_is_last_write_wins() {
        let table = new_session_table();
        record_chunk(&table, chunk("s3", 1, 2, b"first"), 16).unwrap();
        record_chunk(&table, chunk("s3", 1, 2, b"again"), 16).unwrap();
        let session = record_chunk(&table, chunk("s3", 2, 2, b"!"), 16)
            .unwrap()
            .unwrap();
        assert_eq!(session.assemble().unwrap(), b"again!");
    }

    #[test]
    fn metadata_comes_from_first_arriving_chunk() {
        let table = new_session_table();
        record_chunk(&table, chunk("s4", 2, 2, b"x"), 16).unwrap();
        let entry = table.get("s4").unwrap();
        assert_eq!(entry.target_url.as_deref(), Some("http://target.test/"));
        assert_eq!(entry.method.as_deref(), Some("GET"));
        assert_eq!(entry.total_chunks, 2);
    }

    #[test]
    fn capacity_rejects_new_sessions_only() {
        let table = new_session_table();
        record_chunk(&table, chunk("s5", 1, 2, b"a"), 1).unwrap();
        // New session beyond the cap is refused.
        assert!(matches!(
            record_chunk(&table, chunk("s6", 1, 1, b"b"), 1),
            Err(PipelineError::Capacity)
        ));
        // More chunks for the existing session still land.
        assert!(record_chunk(&table, chunk("s5", 2, 2, b"b"), 1)
            .unwrap()
            .is_some());
    }

    #[test]
    fn take_ordered_reports_missing_sequence() {
        let mut session = Session::new(&chunk("s7", 1, 3, b"a"));
        session.insert(chunk("s7", 1, 3, b"a"));
        session.insert(chunk("s7", 3, 3, b"c"));
        assert_eq!(session.take_ordered().unwrap_err(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_expired_sessions() {
        let table = new_session_table();
        record_chunk(&table, chunk("old", 1, 2, b"a"), 16).unwrap();

        let handle = spawn_sweep(
            table.clone(),
            "central",
            Duration::from_secs(60),
            Duration::from_secs(30),
        );

        tokio::time::advance(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;
        assert_eq!(table.len(), 1, "young session survives the first sweep");

        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;
        assert!(table.is_empty(), "expired session evicted");

        handle.abort();
    }
}
