//! Configuration management for the termbridge service.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/termbridge/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{DEFAULT_COLS, DEFAULT_ROWS};

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_sessions must be between 1 and 10000, got {0}")]
    InvalidMaxSessions(usize),

    #[error("port must be greater than 0")]
    InvalidPort,

    #[error("path must start with '/', got {0:?}")]
    InvalidPath(String),

    #[error("max_message_bytes must be at least 1024, got {0}")]
    InvalidMaxMessageBytes(usize),

    #[error("max_cols and max_rows must be at least 80x30, got {cols}x{rows}")]
    InvalidGeometryBound { cols: u16, rows: u16 },

    #[error("{0} queue size must be greater than 0")]
    InvalidQueueSize(&'static str),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the termbridge service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General service configuration.
    pub daemon: DaemonConfig,

    /// WebSocket listener configuration.
    pub server: ServerConfig,

    /// Session limits and teardown tuning.
    pub session: SessionConfig,
}

/// General service configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Directory for daily rolling log files. Logs go to stderr when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// Control socket path. Defaults to the per-user runtime directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_socket: Option<PathBuf>,
}

/// WebSocket listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind_address: String,

    /// Port to bind. Overridden by the `PORT` environment variable.
    pub port: u16,

    /// Only upgrade requests on this path are accepted.
    pub path: String,

    /// Largest accepted WebSocket message in bytes.
    pub max_message_bytes: usize,
}

/// Session limits and teardown tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum number of concurrent sessions.
    pub max_sessions: usize,

    /// Largest accepted column count for resize requests.
    pub max_cols: u16,

    /// Largest accepted row count for resize requests.
    pub max_rows: u16,

    /// Milliseconds between `SIGHUP` and `SIGKILL` on teardown.
    pub kill_grace_ms: u64,

    /// Output chunks buffered between the PTY reader and the client.
    pub output_queue: usize,

    /// Input messages buffered between the client and the PTY writer.
    pub input_queue: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
            control_socket: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5000,
            path: "/terminal".to_string(),
            max_message_bytes: 1024 * 1024, // 1MB
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 100,
            max_cols: 1000,
            max_rows: 1000,
            kill_grace_ms: 500,
            output_queue: 64,
            input_queue: 64,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("termbridge")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - PORT: Override the listen port
    /// - TERMBRIDGE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("PORT") {
            if !port.is_empty() {
                match port.parse::<u16>() {
                    Ok(port) => {
                        tracing::info!("Overriding port from environment: {}", port);
                        self.server.port = port;
                    }
                    Err(_) => {
                        tracing::warn!("Ignoring invalid PORT value: {:?}", port);
                    }
                }
            }
        }

        if let Ok(level) = std::env::var("TERMBRIDGE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let session = &self.session;
        if session.max_sessions < 1 || session.max_sessions > 10_000 {
            return Err(ConfigError::InvalidMaxSessions(session.max_sessions));
        }

        if session.max_cols < DEFAULT_COLS || session.max_rows < DEFAULT_ROWS {
            return Err(ConfigError::InvalidGeometryBound {
                cols: session.max_cols,
                rows: session.max_rows,
            });
        }

        if session.output_queue == 0 {
            return Err(ConfigError::InvalidQueueSize("output"));
        }
        if session.input_queue == 0 {
            return Err(ConfigError::InvalidQueueSize("input"));
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        if !self.server.path.starts_with('/') {
            return Err(ConfigError::InvalidPath(self.server.path.clone()));
        }

        if self.server.max_message_bytes < 1024 {
            return Err(ConfigError::InvalidMaxMessageBytes(
                self.server.max_message_bytes,
            ));
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
