use serde::Deserialize;
use std::fs;
use std::path::Path;

use sutra_core::SutraResult;

/// AgentConfig holds every recognized node option. The file form is a JSON
/// document with the same keys; absent keys take the defaults below.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Bind address shared by the gRPC server and the gossip socket.
    pub host: String,
    pub grpc_port: u16,
    pub gossip_port: u16,
    /// `host:port` endpoints contacted once at startup.
    pub join_peers: Vec<String>,
    pub log_level: String,
    pub wal_path: String,
    /// TTL applied when an inbound kpak carries none (0 = never expires).
    pub default_ttl_seconds: i64,
    /// GC cadence; zero or negative is coerced to 300 seconds.
    pub gc_interval_seconds: i64,
    pub gc_enabled: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            host: "127.0.0.1".to_string(),
            grpc_port: 9090,
            gossip_port: 7946,
            join_peers: Vec::new(),
            log_level: "info".to_string(),
            wal_path: "./data/sutra.wal".to_string(),
            default_ttl_seconds: 0,
            gc_interval_seconds: 300,
            gc_enabled: true,
        }
    }
}

impl AgentConfig {
    pub fn load(path: impl AsRef<Path>) -> SutraResult<Self> {
        let payload = fs::read(path)?;
        Ok(serde_json::from_slice(&payload)?)
    }
}
