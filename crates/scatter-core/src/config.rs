//! Node configuration.
//!
//! Resolution order: config file → SCATTER_* environment overrides →
//! defaults. One file carries every role section; `role` picks which one a
//! daemon actually runs. Encryption keys are 64-hex-char strings and are
//! never compiled in — ship them via the file or `SCATTER_ENCRYPTION__KEY`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::{self, CryptoError, KEY_LEN};

/// Which node this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Upstream,
    Central,
    Downstream,
    Relay,
    Gateway,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Upstream => "upstream",
            Role::Central => "central",
            Role::Downstream => "downstream",
            Role::Relay => "relay",
            Role::Gateway => "gateway",
        }
    }
}

/// Top-level configuration: the role plus one section per role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub role: Role,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub central: CentralConfig,
    #[serde(default)]
    pub downstream: DownstreamConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl NodeConfig {
    /// Load config: file → env overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let mut config: NodeConfig =
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply SCATTER_* env var overrides.
    ///
    /// `SCATTER_ENCRYPTION__KEY` is the secrets path for deployments that
    /// keep key material out of files — it overrides the key in every role
    /// section at once.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SCATTER_ROLE") {
            match v.as_str() {
                "client" => self.role = Role::Client,
                "upstream" => self.role = Role::Upstream,
                "central" => self.role = Role::Central,
                "downstream" => self.role = Role::Downstream,
                "relay" => self.role = Role::Relay,
                "gateway" => self.role = Role::Gateway,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("SCATTER_ENCRYPTION__KEY") {
            for enc in [
                &mut self.client.encryption,
                &mut self.upstream.encryption,
                &mut self.central.encryption,
                &mut self.downstream.encryption,
            ] {
                enc.key = v.clone();
            }
        }
        if let Ok(v) = std::env::var("SCATTER_RELAY__AUTH_TOKEN") {
            self.relay.auth_token = Some(v);
        }
    }
}

// ── Shared sections ───────────────────────────────────────────────────────────

/// Per-hop AES-256-GCM settings.
///
/// `key` decrypts what arrives; `forward_key` seals what leaves, defaulting
/// to `key` so a single shared key across the deployment just works while a
/// separate key per hop stays possible.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    pub enabled: bool,
    /// 64 hex chars.
    pub key: String,
    /// 64 hex chars; falls back to `key` when absent.
    pub forward_key: Option<String>,
}

impl EncryptionConfig {
    pub fn ingress_key(&self) -> Result<[u8; KEY_LEN], CryptoError> {
        crypto::decode_key(&self.key)
    }

    pub fn forward_key(&self) -> Result<[u8; KEY_LEN], CryptoError> {
        match &self.forward_key {
            Some(k) => crypto::decode_key(k),
            None => crypto::decode_key(&self.key),
        }
    }
}

/// Header obfuscation and timing jitter applied before forwarding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObfuscationConfig {
    /// Headers merged into every forwarded chunk's metadata.
    pub headers: HashMap<String, String>,
    /// Upper bound for the uniform random forwarding delay.
    pub jitter_ms: u64,
}

impl ObfuscationConfig {
    /// Merge the configured headers into `headers`, overwriting collisions.
    pub fn apply(&self, headers: &mut HashMap<String, String>) {
        for (k, v) in &self.headers {
            headers.insert(k.clone(), v.clone());
        }
    }
}

// ── Role sections ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Fragment size for outgoing request bodies.
    pub chunk_size: usize,
    /// `host:port` of each upstream ingress node, round-robin order.
    pub upstreams: Vec<String>,
    /// Port the response listener binds.
    pub listen_port: u16,
    /// Host downstreams can reach this client on; advertised in every chunk.
    pub public_host: String,
    /// End-to-end deadline for one proxied request.
    pub timeout_ms: u64,
    pub encryption: EncryptionConfig,
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The `source_client` address stamped on every request chunk.
    pub fn callback_addr(&self) -> String {
        format!("{}:{}", self.public_host, self.listen_port)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            chunk_size: 8192,
            upstreams: Vec::new(),
            listen_port: 7000,
            public_host: "127.0.0.1".into(),
            timeout_ms: 30_000,
            encryption: EncryptionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub listen_port: u16,
    /// `host:port` of the central aggregator.
    pub central: String,
    pub obfuscation: ObfuscationConfig,
    pub encryption: EncryptionConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            listen_port: 7001,
            central: String::new(),
            obfuscation: ObfuscationConfig::default(),
            encryption: EncryptionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralConfig {
    pub listen_port: u16,
    /// `host:port` of each downstream egress node, round-robin order.
    pub downstreams: Vec<String>,
    /// Fragment size for response bodies.
    pub chunk_size: usize,
    /// Sessions older than this are evicted by the sweep.
    pub reassembly_timeout_ms: u64,
    /// Deadline for the outbound Internet request.
    pub request_timeout_ms: u64,
    /// Reject new sessions with 503 beyond this count.
    pub max_sessions: usize,
    /// First hop of the relay chain (`host:port`). None = direct egress.
    pub relay: Option<String>,
    /// Identity stamped in `X-From-Node` on relay forwards.
    pub node_id: String,
    pub encryption: EncryptionConfig,
}

impl CentralConfig {
    pub fn reassembly_timeout(&self) -> Duration {
        Duration::from_millis(self.reassembly_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            listen_port: 7002,
            downstreams: Vec::new(),
            chunk_size: 8192,
            reassembly_timeout_ms: 60_000,
            request_timeout_ms: 60_000,
            max_sessions: 4096,
            relay: None,
            node_id: "central".into(),
            encryption: EncryptionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownstreamConfig {
    pub listen_port: u16,
    pub reassembly_timeout_ms: u64,
    pub max_sessions: usize,
    pub obfuscation: ObfuscationConfig,
    pub encryption: EncryptionConfig,
}

impl DownstreamConfig {
    pub fn reassembly_timeout(&self) -> Duration {
        Duration::from_millis(self.reassembly_timeout_ms)
    }
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            listen_port: 7003,
            reassembly_timeout_ms: 60_000,
            max_sessions: 4096,
            obfuscation: ObfuscationConfig::default(),
            encryption: EncryptionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub listen_port: u16,
    pub node_id: String,
    /// Candidate next relay hops (`host:port`), one active at a time.
    pub next_hops: Vec<String>,
    /// Full base URL of the terminal gateway. Set only on the last relay.
    pub gateway_url: Option<String>,
    /// Pre-shared gateway token; registration runs when absent.
    pub auth_token: Option<String>,
    /// Secret presented during gateway registration.
    pub secret: String,
    /// Buffer-and-batch instead of forwarding immediately.
    pub traffic_mixing: bool,
    /// Seconds between next-hop cursor advances. 0 = never rotate.
    pub rotation_secs: u64,
    /// Reject with 503 beyond this many buffered payloads.
    pub max_buffered: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_port: 7100,
            node_id: "relay-1".into(),
            next_hops: Vec::new(),
            gateway_url: None,
            auth_token: None,
            secret: String::new(),
            traffic_mixing: false,
            rotation_secs: 0,
            max_buffered: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub listen_port: u16,
    /// Node ids allowed to register and proxy.
    pub authenticated_nodes: Vec<String>,
    /// Queue requests and drain them together instead of serving inline.
    pub traffic_mixing: bool,
    /// Fixed pre-egress delay.
    pub timing_jitter_ms: u64,
    pub request_timeout_ms: u64,
    /// Reject with 503 beyond this many queued requests.
    pub max_batch: usize,
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_port: 7200,
            authenticated_nodes: Vec::new(),
            traffic_mixing: false,
            timing_jitter_ms: 0,
            request_timeout_ms: 60_000,
            max_batch: 4096,
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_fills_defaults() {
        let config: NodeConfig = toml::from_str("role = \"central\"").unwrap();
        assert_eq!(config.role, Role::Central);
        assert_eq!(config.central.chunk_size, 8192);
        assert_eq!(config.central.reassembly_timeout_ms, 60_000);
        assert!(config.central.relay.is_none());
        assert!(!config.client.encryption.enabled);
    }

    #[test]
    fn role_sections_parse() {
        let text = r#"
            role = "client"

            [client]
            chunk_size = 4096
            upstreams = ["10.0.0.1:7001", "10.0.0.2:7001"]
            timeout_ms = 5000

            [client.encryption]
            enabled = true
            key = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff"
        "#;
        let config: NodeConfig = toml::from_str(text).unwrap();
        assert_eq!(config.client.chunk_size, 4096);
        assert_eq!(config.client.upstreams.len(), 2);
        assert!(config.client.encryption.enabled);
        assert_eq!(config.client.encryption.ingress_key().unwrap()[0], 0x00);
        assert_eq!(config.client.timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn callback_addr_is_host_port() {
        let client = ClientConfig {
            public_host: "203.0.113.9".into(),
            listen_port: 7444,
            ..ClientConfig::default()
        };
        assert_eq!(client.callback_addr(), "203.0.113.9:7444");
    }

    #[test]
    fn forward_key_falls_back_to_ingress() {
        let enc = EncryptionConfig {
            enabled: true,
            key: hex::encode([7u8; 32]),
            forward_key: None,
        };
        assert_eq!(enc.forward_key().unwrap(), enc.ingress_key().unwrap());

        let enc = EncryptionConfig {
            forward_key: Some(hex::encode([9u8; 32])),
            ..enc
        };
        assert_eq!(enc.forward_key().unwrap(), [9u8; 32]);
    }

    #[test]
    fn obfuscation_apply_merges_and_overwrites() {
        let obf = ObfuscationConfig {
            headers: HashMap::from([
                ("X-Forwarded-For".into(), "10.1.1.1".into()),
                ("User-Agent".into(), "Mozilla/5.0".into()),
            ]),
            jitter_ms: 0,
        };
        let mut headers = HashMap::from([("User-Agent".into(), "scatter/0.1".into())]);
        obf.apply(&mut headers);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers["User-Agent"], "Mozilla/5.0");
        assert_eq!(headers["X-Forwarded-For"], "10.1.1.1");
    }
}
