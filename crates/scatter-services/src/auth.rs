//! Gateway-side node authentication.
//!
//! Tokens are minted at startup for statically configured node ids and
//! re-minted whenever a node registers. Verification is constant-time.

use dashmap::DashMap;
use subtle::ConstantTimeEq;

use scatter_core::crypto;

pub struct TokenRegistry {
    tokens: DashMap<String, String>,
    allowed: Vec<String>,
}

impl TokenRegistry {
    /// Mint a startup token for every configured node id.
    pub fn new(allowed: Vec<String>) -> Self {
        let tokens = DashMap::new();
        for node_id in &allowed {
            tokens.insert(node_id.clone(), crypto::generate_token());
            tracing::info!(%node_id, "auth token minted");
        }
        Self { tokens, allowed }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Constant-time credential check against the stored token.
    pub fn verify(&self, node_id: &str, presented: &str) -> bool {
        match self.tokens.get(node_id) {
            Some(expected) => expected.as_bytes().ct_eq(presented.as_bytes()).into(),
            None => false,
        }
    }

    /// Mint a fresh token for a node in the authenticated list.
    /// Returns None for unknown node ids.
    pub fn register(&self, node_id: &str) -> Option<String> {
        if !self.allowed.iter().any(|n| n == node_id) {
            return None;
        }
        let token = crypto::generate_token();
        self.tokens.insert(node_id.to_string(), token.clone());
        tracing::info!(node_id, "node registered, token re-minted");
        Some(token)
    }

    /// Current token for a node — startup wiring and tests.
    pub fn token_for(&self, node_id: &str) -> Option<String> {
        self.tokens.get(node_id).map(|t| t.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_tokens_verify() {
        let registry = TokenRegistry::new(vec!["relay-1".into(), "relay-2".into()]);
        assert_eq!(registry.len(), 2);

        let token = registry.token_for("relay-1").unwrap();
        assert_eq!(token.len(), 64);
        assert!(registry.verify("relay-1", &token));
        assert!(!registry.verify("relay-2", &token));
    }

    #[test]
    fn flipped_token_fails() {
        let registry = TokenRegistry::new(vec!["relay-1".into()]);
        let token = registry.token_for("relay-1").unwrap();

        // Flip one hex character.
        let mut bad = token.clone().into_bytes();
        bad[0] = if bad[0] == b'0' { b'1' } else { b'0' };
        assert!(!registry.verify("relay-1", std::str::from_utf8(&bad).unwrap()));

        // Truncation fails too.
        assert!(!registry.verify("relay-1", &token[..63]));
    }

    #[test]
    fn register_requires_configured_node_id() {
        let registry = TokenRegistry::new(vec!["relay-1".into()]);
        assert!(registry.register("intruder").is_none());

        let fresh = registry.register("relay-1").unwrap();
        assert_eq!(fresh.len(), 64);
        assert!(registry.verify("relay-1", &fresh));
    }

    #[test]
    fn registration_invalidates_the_previous_token() {
        let registry = TokenRegistry::new(vec!["relay-1".into()]);
        let old = registry.token_for("relay-1").unwrap();
        let fresh = registry.register("relay-1").unwrap();
        assert_ne!(old, fresh);
        assert!(!registry.verify("relay-1", &old));
    }

    #[test]
    fn unknown_node_never_verifies() {
        let registry = TokenRegistry::new(vec![]);
        assert!(registry.is_empty());
        assert!(!registry.verify("anyone", "anything"));
    }
}
