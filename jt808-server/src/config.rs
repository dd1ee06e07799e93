//! Gateway configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via JT808_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Terminal-facing network configuration.
    pub network: NetworkConfig,
    /// Terminal database configuration.
    pub terminals: TerminalConfig,
    /// Operator control channel configuration.
    pub control: ControlConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable
    /// overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("JT808_CONFIG") {
            config = Self::from_file(&path)?;
        }
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.terminals.apply_env_overrides();
        self.control.apply_env_overrides();
    }
}

/// Terminal-facing listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to; all interfaces when unset.
    pub bind_ip: Option<IpAddr>,
    /// TCP port terminals connect to.
    pub port: u16,
    /// Maximum concurrent terminal connections.
    pub max_terminals: usize,
    /// Seconds of silence before an idle terminal is dropped.
    pub keepalive_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_ip: None,
            port: 7808,
            max_terminals: 512,
            // 30s idle + 3 probes at 5s intervals
            keepalive_secs: 45,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(ip) = std::env::var("JT808_BIND_IP") {
            if let Ok(parsed) = ip.parse() {
                self.bind_ip = Some(parsed);
            }
        }
        if let Ok(port) = std::env::var("JT808_PORT") {
            if let Ok(parsed) = port.parse() {
                self.port = parsed;
            }
        }
        if let Ok(max) = std::env::var("JT808_MAX_TERMINALS") {
            if let Ok(parsed) = max.parse() {
                self.max_terminals = parsed;
            }
        }
        if let Ok(secs) = std::env::var("JT808_KEEPALIVE_SECS") {
            if let Ok(parsed) = secs.parse() {
                self.keepalive_secs = parsed;
            }
        }
    }

    /// The listener socket address.
    pub fn bind_addr(&self) -> SocketAddr {
        let ip = self
            .bind_ip
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        SocketAddr::new(ip, self.port)
    }

    /// Idle cutoff as a [`Duration`].
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

/// Terminal database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Path to the `phone;authcode` terminal list.
    pub database_path: PathBuf,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./devices.list"),
        }
    }
}

impl TerminalConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("JT808_DEVICES") {
            self.database_path = PathBuf::from(path);
        }
    }
}

/// Operator control channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Unix socket path the operator CLI connects to.
    pub socket_path: PathBuf,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/jt808d.sock"),
        }
    }
}

impl ControlConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("JT808_CONTROL_SOCKET") {
            self.socket_path = PathBuf::from(path);
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
