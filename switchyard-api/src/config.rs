//! Configuration management for the Switchyard API
//!
//! Settings load in three layers:
//! 1. Environment variables (highest priority)
//! 2. Configuration file (TOML format)
//! 3. Default values (lowest priority)

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SwitchyardConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingSettings,
    pub ssh: SshConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database URL (e.g. "sqlite:///var/lib/switchyard/switchyard.db")
    pub url: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Directory for log files; unset means console only
    pub log_dir: Option<PathBuf>,
}

/// SSH transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Connection establishment timeout in seconds
    pub connect_timeout_secs: u64,
    /// Per-command timeout in seconds
    pub command_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8007,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:///var/lib/switchyard/switchyard.db".to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            command_timeout_secs: 30,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    FileRead(PathBuf, String),

    #[error("Failed to parse config file: {0}")]
    Parse(String),
}

impl SwitchyardConfig {
    /// Load configuration from the first config file found, then apply
    /// environment overrides.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(config_path) = Self::find_config_file() {
            match Self::load_from_file(&config_path) {
                Ok(file_config) => config = file_config,
                Err(e) => tracing::warn!("Ignoring config file: {}", e),
            }
        }

        config.apply_env_overrides();
        config
    }

    pub fn load_from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.clone(), e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            std::env::var("SWITCHYARD_CONFIG").ok().map(PathBuf::from),
            Some(PathBuf::from("/etc/switchyard/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        paths.into_iter().flatten().find(|p| p.exists())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("SWITCHYARD_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("SWITCHYARD_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(url) = std::env::var("SWITCHYARD_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(level) = std::env::var("SWITCHYARD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(dir) = std::env::var("SWITCHYARD_LOG_DIR") {
            self.logging.log_dir = Some(PathBuf::from(dir));
        }
        if let Ok(secs) = std::env::var("SWITCHYARD_SSH_COMMAND_TIMEOUT") {
            if let Ok(secs) = secs.parse() {
                self.ssh.command_timeout_secs = secs;
            }
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be non-zero".to_string());
        }
        if !self.database.url.starts_with("sqlite:") {
            return Err(format!(
                "database.url must be a sqlite URL, got '{}'",
                self.database.url
            ));
        }
        if self.ssh.command_timeout_secs == 0 {
            return Err("ssh.command_timeout_secs must be non-zero".to_string());
        }
        Ok(())
    }
}
