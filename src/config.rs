//! Town-level configuration for the shared Dolt deployment.
//!
//! Loaded from `<town>/.town/config.toml`. A missing file means defaults;
//! a file that exists but does not parse is an error (a half-applied config
//! is worse than none). `TOWNKEEPER_*` environment variables override the
//! file, which lets tests and one-off operator sessions repoint the server
//! without editing town state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_DOLT_HOST: &str = "127.0.0.1";
pub const DEFAULT_DOLT_PORT: u16 = 3307;
pub const DEFAULT_DOLT_USER: &str = "root";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 50;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_SCRIPT_TIMEOUT_MS: u64 = 30_000;

/// Configuration for reaching the town's shared Dolt server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TownConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_user")]
    pub user: String,

    /// Admission-control ceiling. When left at the default, health probing
    /// may substitute the server-reported `@@global.max_connections`.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Bound on TCP connection attempts to the server.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Bound on a single script execution through the dolt CLI.
    #[serde(default = "default_script_timeout_ms")]
    pub script_timeout_ms: u64,

    /// Name or path of the dolt binary.
    #[serde(default = "default_dolt_bin")]
    pub dolt_bin: String,
}

fn default_host() -> String {
    DEFAULT_DOLT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_DOLT_PORT
}

fn default_user() -> String {
    DEFAULT_DOLT_USER.to_string()
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_script_timeout_ms() -> u64 {
    DEFAULT_SCRIPT_TIMEOUT_MS
}

fn default_dolt_bin() -> String {
    "dolt".to_string()
}

impl Default for TownConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            max_connections: default_max_connections(),
            connect_timeout_ms: default_connect_timeout_ms(),
            script_timeout_ms: default_script_timeout_ms(),
            dolt_bin: default_dolt_bin(),
        }
    }
}

impl TownConfig {
    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config at {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config at {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("TOWNKEEPER_DOLT_HOST") {
            if !host.is_empty() {
                self.host = host;
            }
        }
        if let Ok(port) = std::env::var("TOWNKEEPER_DOLT_PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }
        if let Ok(max) = std::env::var("TOWNKEEPER_MAX_CONNECTIONS") {
            if let Ok(max) = max.parse() {
                self.max_connections = max;
            }
        }
        if let Ok(bin) = std::env::var("TOWNKEEPER_DOLT_BIN") {
            if !bin.is_empty() {
                self.dolt_bin = bin;
            }
        }
    }
}
