//! Configuration loading and config file resolution
//!
//! Config file resolution follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. `WPQ_CONFIG` environment variable
//! 3. Platform config file (`~/.config/wpq/config.toml`, then `/etc/wpq/config.toml` on Linux)
//! 4. Compiled defaults (fallback)
//!
//! A missing or malformed file never aborts startup: a warning is logged and
//! compiled defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "WPQ_CONFIG";

/// Top-level TOML document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

/// `[server]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub database_path: PathBuf,
    /// Events retained per session for polling / Last-Event-ID replay
    pub event_log_capacity: usize,
    pub event_bus_capacity: usize,
    pub sse_keepalive_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5780".to_string(),
            database_path: default_data_dir().join("wpq.db"),
            event_log_capacity: 500,
            event_bus_capacity: 1000,
            sse_keepalive_secs: 15,
        }
    }
}

/// Realtime transport used by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Sse,
    Polling,
}

/// `[client]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub transport: TransportKind,
    pub poll_interval_ms: u64,
    /// First reconnect delay; doubles each attempt
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Consecutive failed attempts before the channel gives up
    pub max_retries: u32,
    /// Age after which an unconfirmed optimistic update is considered lost
    pub pending_window_ms: u64,
    pub reconcile_interval_ms: u64,
    /// Lifetime of memoized analytics
    pub memo_ttl_ms: u64,
    pub request_timeout_secs: u64,
    /// Silence on an SSE stream after which the connection is presumed dead
    /// (several server keep-alive intervals)
    pub stream_idle_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5780".to_string(),
            transport: TransportKind::Sse,
            poll_interval_ms: 2000,
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
            max_retries: 5,
            pending_window_ms: 5000,
            reconcile_interval_ms: 2500,
            memo_ttl_ms: 1000,
            request_timeout_secs: 10,
            stream_idle_timeout_secs: 45,
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl TomlConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Read and parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Resolve and load configuration, falling back to defaults
    pub fn load(cli_arg: Option<&Path>) -> Self {
        match resolve_config_path(cli_arg) {
            Some(path) => match Self::from_file(&path) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!(
                        "Failed to load config file {}: {} (using defaults)",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            None => {
                info!("No config file found, using compiled defaults");
                Self::default()
            }
        }
    }
}

/// Find the config file to load, following the documented priority order
///
/// Explicit paths (CLI, environment) are returned even if they do not exist so
/// the caller can warn about them; platform paths are only returned if present.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config file
    platform_config_candidates()
        .into_iter()
        .find(|candidate| candidate.exists())
}

fn platform_config_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("wpq").join("config.toml"));
    }
    if cfg!(target_os = "linux") {
        candidates.push(PathBuf::from("/etc/wpq/config.toml"));
    }
    candidates
}

/// OS-dependent default data folder
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("wpq"))
        .unwrap_or_else(|| PathBuf::from("./wpq_data"))
}
