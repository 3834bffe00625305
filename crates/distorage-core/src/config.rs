use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DistorageError, DistorageResult};

/// Top-level configuration (loaded from distorage.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DistorageConfig {
    pub node: NodeConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// WebSocket listen address for store/get/delete (default: 0.0.0.0:53591)
    pub listen: String,
    /// Directory holding chunk records
    pub store_dir: PathBuf,
    /// Signing identity of this node
    pub keys_file: PathBuf,
    /// Directory service host:port
    pub directory_url: String,
    /// Keep an outbound registration connection to the directory
    pub announce: bool,
    /// Seconds to wait before reconnecting a dropped announcement
    pub announce_retry_secs: u64,
    /// Upper bound on preamble plus one operation
    pub handshake_timeout_secs: u64,
    /// Prometheus metrics endpoint (optional)
    pub metrics_addr: Option<String>,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Directory service host:port
    pub directory_url: String,
    /// Target replicas per chunk
    pub replication_count: usize,
    /// Port appended to directory endpoints that carry none
    pub node_port: u16,
    /// Ciphertext chunk size in bytes (default: 1 MiB)
    pub chunk_size: usize,
    /// Per-connection timeout covering dial, preamble, and response
    pub request_timeout_secs: u64,
    /// Chunks processed concurrently
    pub parallelism: usize,
    /// Local file registry (JSON)
    pub registry_file: PathBuf,
    /// Client key file
    pub keys_file: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:53591".into(),
            store_dir: PathBuf::from("~/.distorage/store"),
            keys_file: PathBuf::from("~/.distorage/keys.json"),
            directory_url: "127.0.0.1:8000".into(),
            announce: true,
            announce_retry_secs: 5,
            handshake_timeout_secs: 30,
            metrics_addr: Some("127.0.0.1:9105".into()),
            log_level: "info".into(),
            log_format: "text".into(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            directory_url: "127.0.0.1:8000".into(),
            replication_count: 5,
            node_port: 53591,
            chunk_size: 1024 * 1024,
            request_timeout_secs: 30,
            parallelism: 4,
            registry_file: PathBuf::from("~/.distorage/files.json"),
            keys_file: PathBuf::from("~/.distorage/keys.json"),
        }
    }
}

impl DistorageConfig {
    /// Read a TOML config. A missing file yields the defaults.
    pub fn load(path: &Path) -> DistorageResult<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                DistorageError::Config(format!("reading config {}: {e}", path.display()))
            })?;
            toml::from_str(&content).map_err(|e| {
                DistorageError::Config(format!("parsing config {}: {e}", path.display()))
            })?
        } else {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DistorageResult<()> {
        if self.client.replication_count == 0 {
            return Err(DistorageError::Config(
                "client.replication_count must be at least 1".into(),
            ));
        }
        if self.client.chunk_size == 0 {
            return Err(DistorageError::Config(
                "client.chunk_size must be at least 1".into(),
            ));
        }
        if self.client.parallelism == 0 {
            return Err(DistorageError::Config(
                "client.parallelism must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}
