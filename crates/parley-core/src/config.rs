//! Configuration system for Parley.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PARLEY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/parley/config.toml
//!   3. ~/.config/parley/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::ChunkKind;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub network: NetworkConfig,
    pub liveness: LivenessConfig,
    pub transfers: TransferConfig,
    pub client: ClientConfig,
    pub multicast: MulticastConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address both relay sockets bind to.
    pub bind_addr: String,
    /// Stream (line-framed) relay port.
    pub tcp_port: u16,
    /// Datagram relay port.
    pub udp_port: u16,
    /// Status API port, bound on 127.0.0.1 only.
    pub api_port: u16,
    pub enable_tcp: bool,
    pub enable_udp: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Silence after which a user is presumed gone.
    pub timeout_secs: u64,
    /// How often the registry is swept.
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Base64 characters per chunk frame. Must fit one datagram.
    pub chunk_size: usize,
    /// Incomplete transfers are dropped this long after their first chunk.
    pub image_expiry_secs: u64,
    pub file_expiry_secs: u64,
    pub voice_expiry_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub heartbeat_interval_secs: u64,
    /// Where received files, images and voice clips are written.
    pub download_dir: PathBuf,
}

/// Relay-less group announcements.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MulticastConfig {
    /// IPv4 multicast group.
    pub group: String,
    pub port: u16,
    /// Local interface address used to send and join. `0.0.0.0` lets the
    /// kernel pick.
    pub interface: String,
    pub ttl: u32,
    /// Deliver our own announcements to listeners on this host.
    pub loopback: bool,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            tcp_port: 9876,
            udp_port: 9877,
            api_port: 9878,
            enable_tcp: true,
            enable_udp: true,
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            sweep_interval_secs: 5,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 400,
            image_expiry_secs: 30,
            file_expiry_secs: 60,
            voice_expiry_secs: 120,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            download_dir: data_dir().join("downloads"),
        }
    }
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            group: "230.0.0.0".to_string(),
            port: 4446,
            interface: "0.0.0.0".to_string(),
            ttl: 1,
            loopback: true,
        }
    }
}

impl LivenessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl TransferConfig {
    /// Expiry window for an incomplete transfer of the given kind.
    pub fn expiry(&self, kind: ChunkKind) -> Duration {
        let secs = match kind {
            ChunkKind::Image => self.image_expiry_secs,
            ChunkKind::File => self.file_expiry_secs,
            ChunkKind::Voice => self.voice_expiry_secs,
        };
        Duration::from_secs(secs)
    }

    /// One window for every kind.
    pub fn uniform(secs: u64) -> Self {
        Self {
            image_expiry_secs: secs,
            file_expiry_secs: secs,
            voice_expiry_secs: secs,
            ..Self::default()
        }
    }
}

impl ClientConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("parley")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("parley")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ParleyConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path, still applying env overrides.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            ParleyConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("PARLEY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&ParleyConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply PARLEY_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn flag(v: &str) -> bool {
            v == "true" || v == "1"
        }

        if let Some(v) = lookup("PARLEY_NETWORK__BIND_ADDR") {
            self.network.bind_addr = v;
        }
        if let Some(p) = lookup("PARLEY_NETWORK__TCP_PORT").and_then(|v| v.parse().ok()) {
            self.network.tcp_port = p;
        }
        if let Some(p) = lookup("PARLEY_NETWORK__UDP_PORT").and_then(|v| v.parse().ok()) {
            self.network.udp_port = p;
        }
        if let Some(p) = lookup("PARLEY_NETWORK__API_PORT").and_then(|v| v.parse().ok()) {
            self.network.api_port = p;
        }
        if let Some(v) = lookup("PARLEY_NETWORK__ENABLE_TCP") {
            self.network.enable_tcp = flag(&v);
        }
        if let Some(v) = lookup("PARLEY_NETWORK__ENABLE_UDP") {
            self.network.enable_udp = flag(&v);
        }
        if let Some(s) = lookup("PARLEY_LIVENESS__TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.liveness.timeout_secs = s;
        }
        if let Some(s) = lookup("PARLEY_LIVENESS__SWEEP_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.liveness.sweep_interval_secs = s;
        }
        if let Some(n) = lookup("PARLEY_TRANSFERS__CHUNK_SIZE").and_then(|v| v.parse().ok()) {
            self.transfers.chunk_size = n;
        }
        if let Some(s) = lookup("PARLEY_CLIENT__HEARTBEAT_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.client.heartbeat_interval_secs = s;
        }
        if let Some(v) = lookup("PARLEY_CLIENT__DOWNLOAD_DIR") {
            self.client.download_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("PARLEY_MULTICAST__GROUP") {
            self.multicast.group = v;
        }
        if let Some(p) = lookup("PARLEY_MULTICAST__PORT").and_then(|v| v.parse().ok()) {
            self.multicast.port = p;
        }
        if let Some(v) = lookup("PARLEY_MULTICAST__INTERFACE") {
            self.multicast.interface = v;
        }
    }
}
