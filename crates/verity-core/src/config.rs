//! Configuration for verityd and verity-ctl.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $VERITY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/verity/config.toml
//!   3. ~/.config/verity/config.toml
//!
//! Merkle chunk size and blob slice size are protocol constants (see
//! [`crate::wire`]), not settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::channel::ChannelConfig;
use crate::crypto::{CryptoError, SymmetricKey};
use crate::wire::{DEFAULT_PORT, MESSAGE_BUFFER, SLICE_SIZE};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VerityConfig {
    pub network: NetworkConfig,
    pub transfer: TransferConfig,
    pub storage: StorageConfig,
    pub crypto: CryptoConfig,
    pub audit: AuditConfig,
    pub recovery: RecoveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the server binds, and the host the client dials.
    pub bind_addr: String,
    pub port: u16,
    /// Per-read deadline in seconds.
    pub io_timeout_secs: u64,
    /// Sessions served at once. 1 = strictly sequential.
    pub max_sessions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Ceiling for one short-message read.
    pub message_buffer: usize,
    /// Largest envelope a receiver accepts.
    pub max_blob_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
    /// Extensions included in listings, without the dot. Empty = all files.
    pub list_extensions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Base64 32-byte shared key. Empty = read `key_path`.
    pub key: String,
    /// File holding the base64 key.
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Reconstruction program and arguments. Empty = recovery unavailable.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            io_timeout_secs: 30,
            max_sessions: 16,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            message_buffer: MESSAGE_BUFFER,
            max_blob_bytes: 256 * 1024 * 1024, // 256 MB
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: data_dir().join("received"),
            list_extensions: Vec::new(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: data_dir().join("audit.jsonl"),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 120,
        }
    }
}

impl NetworkConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs.max(1))
    }
}

impl RecoveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("verity")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("verity")
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
    #[error("no key configured (set crypto.key, crypto.key_path, or VERITY_KEY)")]
    MissingKey,
    #[error("bad key: {0}")]
    BadKey(#[from] CryptoError),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl VerityConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            VerityConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("VERITY_CONFIG")
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
            let text = toml::to_string_pretty(&VerityConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply VERITY_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("VERITY_NETWORK__BIND_ADDR") {
            self.network.bind_addr = v;
        }
        if let Some(p) = var("VERITY_NETWORK__PORT").and_then(|v| v.parse().ok()) {
            self.network.port = p;
        }
        if let Some(t) = var("VERITY_NETWORK__IO_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.network.io_timeout_secs = t;
        }
        if let Some(n) = var("VERITY_NETWORK__MAX_SESSIONS").and_then(|v| v.parse().ok()) {
            self.network.max_sessions = n;
        }
        if let Some(v) = var("VERITY_STORAGE__ROOT") {
            self.storage.root = PathBuf::from(v);
        }
        if let Some(v) = var("VERITY_KEY") {
            self.crypto.key = v;
        }
        if let Some(v) = var("VERITY_AUDIT__ENABLED") {
            self.audit.enabled = v == "true" || v == "1";
        }
        if let Some(v) = var("VERITY_AUDIT__PATH") {
            self.audit.path = PathBuf::from(v);
        }
        if let Some(v) = var("VERITY_RECOVERY__COMMAND") {
            self.recovery.command = v.split_whitespace().map(str::to_string).collect();
        }
    }

    /// Resolve the shared key from `crypto.key`, else `crypto.key_path`.
    pub fn load_key(&self) -> Result<SymmetricKey, ConfigError> {
        if !self.crypto.key.trim().is_empty() {
            return Ok(SymmetricKey::from_base64(&self.crypto.key)?);
        }
        if self.crypto.key_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingKey);
        }
        let path = &self.crypto.key_path;
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
        Ok(SymmetricKey::from_base64(&text)?)
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            message_buffer: self.transfer.message_buffer,
            slice_size: SLICE_SIZE,
            io_timeout: self.network.io_timeout(),
            verdict_timeout: self.network.io_timeout() + self.recovery.timeout(),
            max_blob_len: self.transfer.max_blob_bytes,
        }
    }

    /// `host:port` the server listens on.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.network.bind_addr, self.network.port)
    }
}
