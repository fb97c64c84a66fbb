//! Configuration for the `touchterm` host.
//!
//! TOML file at `~/.config/touchterm/config.toml`. Every section falls back
//! to defaults, so an empty or missing file is a valid configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use protocol::{ServerEndpoint, DEFAULT_HOST, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::options::{TerminalOptions, MAX_FONT_SIZE, MIN_FONT_SIZE};
use crate::session::{KeyBindings, KeyChord, SessionSettings};
use crate::touch::TouchConfig;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("server.port must be greater than 0")]
    InvalidPort,

    #[error("server.host must not be empty")]
    EmptyHost,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("terminal.font_size must be between 8 and 24, got {0}")]
    InvalidFontSize(u16),

    #[error("bootstrap.poll_attempts must be between 1 and 600, got {0}")]
    InvalidPollAttempts(u32),

    #[error("touch.tap_hold_ms must be greater than 0")]
    InvalidTapHold,

    #[error("invalid key binding: {0}")]
    InvalidKeyBinding(String),
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    /// Options every new session starts with.
    pub terminal: TerminalOptions,
    pub touch: TouchConfig,
    pub bootstrap: BootstrapConfig,
    pub keys: KeysConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Directory the log file is written to.
    pub data_dir: PathBuf,
}

/// Where the local shell server listens and how to bring it up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Shell command that starts the server when it is not running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_command: Option<String>,

    /// Shell command that provisions the environment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_command: Option<String>,
}

/// Readiness polling after the server has been started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BootstrapConfig {
    pub poll_attempts: u32,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeysConfig {
    /// Chords owned by the host application, e.g. `"Ctrl-S|Ctrl-Shift-S"`.
    pub app_bindings: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            server_command: None,
            install_command: None,
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            poll_attempts: 10,
            poll_interval_ms: 1000,
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            app_bindings: vec![
                "Ctrl-S".to_string(),
                "Ctrl-Shift-P".to_string(),
                "Ctrl-Tab|Ctrl-Shift-Tab".to_string(),
            ],
        }
    }
}

impl ServerConfig {
    pub fn endpoint(&self) -> ServerEndpoint {
        ServerEndpoint::new(self.host.clone(), self.port)
    }
}

impl BootstrapConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("touchterm")
        .join("config.toml")
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("touchterm")
}

impl Config {
    /// Settings for sessions created from this configuration.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            options: self.terminal.clone(),
            touch: self.touch.clone(),
            poll_attempts: self.bootstrap.poll_attempts,
            poll_interval: self.bootstrap.poll_interval(),
            key_bindings: KeyBindings::from_specs(&self.keys.app_bindings),
            ..SessionSettings::default()
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Supported variables:
    /// - TOUCHTERM_HOST: shell server host
    /// - TOUCHTERM_PORT: shell server port (ignored if not a number)
    /// - TOUCHTERM_LOG_LEVEL: log level
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("TOUCHTERM_HOST") {
            if !host.is_empty() {
                tracing::info!("Overriding server host from environment: {}", host);
                self.server.host = host;
            }
        }

        if let Ok(port) = std::env::var("TOUCHTERM_PORT") {
            match port.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Overriding server port from environment: {}", port);
                    self.server.port = port;
                }
                Err(_) if port.is_empty() => {}
                Err(e) => tracing::warn!("Ignoring TOUCHTERM_PORT={:?}: {}", port, e),
            }
        }

        if let Ok(level) = std::env::var("TOUCHTERM_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.logging.log_level = level;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }

        let level = self.logging.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.log_level.clone()));
        }

        let font_size = self.terminal.font_size;
        if !(MIN_FONT_SIZE..=MAX_FONT_SIZE).contains(&font_size) {
            return Err(ConfigError::InvalidFontSize(font_size));
        }

        let attempts = self.bootstrap.poll_attempts;
        if attempts == 0 || attempts > 600 {
            return Err(ConfigError::InvalidPollAttempts(attempts));
        }

        if self.touch.tap_hold_ms == 0 {
            return Err(ConfigError::InvalidTapHold);
        }

        for spec in &self.keys.app_bindings {
            for combo in spec.split('|').map(str::trim).filter(|c| !c.is_empty()) {
                combo
                    .parse::<KeyChord>()
                    .map_err(|e| ConfigError::InvalidKeyBinding(e.0))?;
            }
        }

        Ok(())
    }

    /// Load configuration from a file. A missing file yields the defaults.
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

    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file, creating parent directories.
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

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
