//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::ApiConfig;
use crate::websocket::{HubConfig, SessionConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub hub: HubSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Per-connection timing and sizing
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_write_wait")]
    pub write_wait_secs: u64,

    #[serde(default = "default_pong_wait")]
    pub pong_wait_secs: u64,

    /// Defaults to nine tenths of `pong_wait_secs` when absent
    pub ping_period_secs: Option<u64>,

    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,
}

fn default_write_wait() -> u64 {
    10
}

fn default_pong_wait() -> u64 {
    60
}

fn default_max_message_size() -> usize {
    512
}

fn default_send_buffer() -> usize {
    1024
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            write_wait_secs: default_write_wait(),
            pong_wait_secs: default_pong_wait(),
            ping_period_secs: None,
            max_message_size: default_max_message_size(),
            send_buffer: default_send_buffer(),
        }
    }
}

impl SessionSettings {
    fn ping_period(&self) -> Duration {
        match self.ping_period_secs {
            Some(secs) => Duration::from_secs(secs),
            None => Duration::from_secs(self.pong_wait_secs) * 9 / 10,
        }
    }
}

/// Hub configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HubSettings {
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,

    #[serde(default = "default_quick_join_room_size")]
    pub quick_join_room_size: usize,
}

fn default_command_buffer() -> usize {
    256
}

fn default_quick_join_room_size() -> usize {
    2
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            command_buffer: default_command_buffer(),
            quick_join_room_size: default_quick_join_room_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only.
    ///
    /// Overrides that fail validation are discarded in favor of the defaults.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Err(e) = config.validate() {
            tracing::warn!("Ignoring environment overrides: {}", e);
            return Config::default();
        }
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("relay").join("config.toml")),
            Some(PathBuf::from("/etc/relay/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("RELAY_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("RELAY_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }

        if let Ok(size) = std::env::var("RELAY_MAX_MESSAGE_SIZE") {
            if let Ok(s) = size.parse() {
                self.session.max_message_size = s;
            }
        }

        if let Ok(level) = std::env::var("RELAY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("RELAY_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let session = &self.session;
        if session.ping_period() >= Duration::from_secs(session.pong_wait_secs) {
            return Err(ConfigError::Invalid(
                "session.ping_period_secs must be less than session.pong_wait_secs".to_string(),
            ));
        }
        if session.ping_period().is_zero() {
            return Err(ConfigError::Invalid(
                "session.ping_period_secs must be positive".to_string(),
            ));
        }
        if session.max_message_size == 0 || session.send_buffer == 0 {
            return Err(ConfigError::Invalid(
                "session.max_message_size and session.send_buffer must be positive".to_string(),
            ));
        }
        if self.hub.command_buffer == 0 || self.hub.quick_join_room_size == 0 {
            return Err(ConfigError::Invalid(
                "hub.command_buffer and hub.quick_join_room_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Listener settings for the HTTP server
    pub fn api_config(&self) -> ApiConfig {
        ApiConfig::new(self.server.host.clone(), self.server.port)
    }

    /// Settings applied to every session
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            write_wait: Duration::from_secs(self.session.write_wait_secs),
            pong_wait: Duration::from_secs(self.session.pong_wait_secs),
            ping_period: self.session.ping_period(),
            max_message_size: self.session.max_message_size,
            send_buffer: self.session.send_buffer,
        }
    }

    /// Settings for the hub loop
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            command_buffer: self.hub.command_buffer,
            quick_join_room_size: self.hub.quick_join_room_size,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Relay Configuration
#
# Environment variables override these settings:
# - RELAY_HOST
# - RELAY_PORT
# - RELAY_MAX_MESSAGE_SIZE
# - RELAY_LOG_LEVEL
# - RELAY_LOG_FORMAT

[server]
# Listener host
host = "0.0.0.0"

# Listener port
port = 8080

[session]
# Time allowed to write a frame to the peer (seconds)
write_wait_secs = 10

# Time allowed between pongs before a peer is presumed dead (seconds)
pong_wait_secs = 60

# Ping period, must be less than pong_wait_secs (defaults to 9/10 of it)
# ping_period_secs = 54

# Largest accepted inbound message (bytes)
max_message_size = 512

# Outbound queue capacity per connection
send_buffer = 1024

[hub]
# Capacity of the hub's command channel
command_buffer = 256

# Quick-join fills rooms up to this many members before opening a new one
quick_join_room_size = 2

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
