//! Configuration system for peerseek.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PEERSEEK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/peerseek/config.toml
//!   3. ~/.config/peerseek/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::record::{NetworkMode, PeerType};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerseekConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub registry: RegistryConfig,
    pub search: SearchConfig,
    pub filter: FilterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Display name. Empty = generated from the peer id.
    pub name: String,
    /// Our own seed. Created on first run.
    pub seed_path: PathBuf,
    /// Tier we announce.
    pub peer_type: PeerType,
    /// Topics we restrict ourselves to. Empty = everything.
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local control API, bound to 127.0.0.1.
    pub api_port: u16,
    /// Peer protocol port, bound to all interfaces.
    pub peer_port: u16,
    /// Addresses we announce to other peers.
    pub public_addresses: Vec<String>,
    pub mode: NetworkMode,
    /// Peers to greet at startup, as `host:port`.
    pub bootstrap: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub snapshot_path: PathBuf,
    pub flush_interval_secs: u64,
    /// Connected peers silent for longer are moved to disconnected.
    pub max_age_secs: u64,
    /// Cap on the disconnected partition. 0 = unlimited.
    pub max_disconnected: usize,
    pub ping_interval_secs: u64,
    /// Peers greeted per ping round.
    pub ping_fanout: usize,
    /// Seeds handed out per hello reply.
    pub seeds_per_hello: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Peers asked per vertical partition when the node is healthy.
    pub redundancy: usize,
    /// Vertical partitions = 2^partition_exponent.
    pub partition_exponent: u32,
    /// Minimum peer age in days for DHT targets.
    pub min_age_days: i64,
    pub request_timeout_ms: u64,
    pub deadline_ms: u64,
    pub max_results_per_peer: usize,
    /// Max concurrent peer requests. 0 = num_cpus.
    pub max_concurrency: usize,
    /// Copy remote results into the local index.
    pub store_remote_results: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Hosts (and their subdomains) whose results are dropped.
    pub blacklist: Vec<String>,
    /// If non-empty, only results from these domains are kept.
    pub accepted_domains: Vec<String>,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            seed_path: data_dir().join("myseed.txt"),
            peer_type: PeerType::Senior,
            tags: Vec::new(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            api_port: 9091,
            peer_port: 8090,
            public_addresses: Vec::new(),
            mode: NetworkMode::Global,
            bootstrap: Vec::new(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            snapshot_path: data_dir().join("peers.json"),
            flush_interval_secs: 60,
            max_age_secs: 24 * 60 * 60,
            max_disconnected: 5_000,
            ping_interval_secs: 120,
            ping_fanout: 4,
            seeds_per_hello: 20,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            redundancy: 3,
            partition_exponent: 4,
            min_age_days: 3,
            request_timeout_ms: 3_000,
            deadline_ms: 6_000,
            max_results_per_peer: 50,
            max_concurrency: 0,
            store_remote_results: false,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("peerseek")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("peerseek")
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

impl PeerseekConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            PeerseekConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("PEERSEEK_CONFIG")
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
            let text = toml::to_string_pretty(&PeerseekConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply PEERSEEK_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, var: F) {
        if let Some(v) = var("PEERSEEK_IDENTITY__NAME") {
            self.identity.name = v;
        }
        if let Some(p) = var("PEERSEEK_NETWORK__API_PORT").and_then(|v| v.parse().ok()) {
            self.network.api_port = p;
        }
        if let Some(p) = var("PEERSEEK_NETWORK__PEER_PORT").and_then(|v| v.parse().ok()) {
            self.network.peer_port = p;
        }
        if let Some(v) = var("PEERSEEK_NETWORK__MODE") {
            match v.as_str() {
                "global" => self.network.mode = NetworkMode::Global,
                "intranet" => self.network.mode = NetworkMode::Intranet,
                "all" => self.network.mode = NetworkMode::All,
                _ => {}
            }
        }
        if let Some(v) = var("PEERSEEK_NETWORK__PUBLIC_ADDRESSES") {
            self.network.public_addresses = split_list(&v);
        }
        if let Some(v) = var("PEERSEEK_NETWORK__BOOTSTRAP") {
            self.network.bootstrap = split_list(&v);
        }
        if let Some(v) = var("PEERSEEK_REGISTRY__SNAPSHOT_PATH") {
            self.registry.snapshot_path = PathBuf::from(v);
        }
        if let Some(n) = var("PEERSEEK_SEARCH__REDUNDANCY").and_then(|v| v.parse().ok()) {
            self.search.redundancy = n;
        }
        if let Some(n) = var("PEERSEEK_SEARCH__REQUEST_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.search.request_timeout_ms = n;
        }
        if let Some(v) = var("PEERSEEK_SEARCH__STORE_REMOTE_RESULTS") {
            self.search.store_remote_results = v == "true" || v == "1";
        }
    }
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
