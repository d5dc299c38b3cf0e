//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connection::{LinkConfig, RetryPolicy};
use crate::producer::{Pacing, ProducerConfig};
use crate::server::HubConfig;
use crate::source::{BufferSelector, SelectorError};
use crate::wire::DEFAULT_DATA_EVENT;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub feeder: FeederConfig,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device-side producer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FeederConfig {
    /// Address of the data-acquisition device
    #[serde(default = "default_device_address")]
    pub device_address: String,

    /// Buffer to read: a UUID or a numeric index
    #[serde(default = "default_buffer")]
    pub buffer: String,

    /// Sample input, a file path or "-" for stdin
    #[serde(default = "default_input")]
    pub input: String,

    /// Delay after each sample; 0 disables pacing
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,

    #[serde(default = "default_log_every")]
    pub log_every: u64,
}

fn default_device_address() -> String {
    "192.168.1.100".to_string()
}

fn default_buffer() -> String {
    "0".to_string()
}

fn default_input() -> String {
    "-".to_string()
}

fn default_pacing_ms() -> u64 {
    1000
}

fn default_log_every() -> u64 {
    500
}

impl Default for FeederConfig {
    fn default() -> Self {
        Self {
            device_address: default_device_address(),
            buffer: default_buffer(),
            input: default_input(),
            pacing_ms: default_pacing_ms(),
            log_every: default_log_every(),
        }
    }
}

impl FeederConfig {
    pub fn producer_config(&self) -> ProducerConfig {
        ProducerConfig {
            pacing: Pacing::from_millis(self.pacing_ms),
            log_every: self.log_every,
        }
    }

    pub fn buffer_selector(&self) -> Result<BufferSelector, SelectorError> {
        self.buffer.parse()
    }
}

/// Outbound link configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,

    #[serde(default = "default_data_event")]
    pub data_event: String,

    /// Connect attempts before giving up; 0 retries forever
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_server_url() -> String {
    "ws://localhost:15064/ws".to_string()
}

fn default_data_event() -> String {
    DEFAULT_DATA_EVENT.to_string()
}

fn default_max_attempts() -> u32 {
    999_999
}

fn default_retry_delay() -> u64 {
    2000
}

fn default_backoff_factor() -> f64 {
    1.0
}

fn default_max_retry_delay() -> u64 {
    30_000
}

fn default_connect_timeout() -> u64 {
    10_000
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            data_event: default_data_event(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
            backoff_factor: default_backoff_factor(),
            max_retry_delay_ms: default_max_retry_delay(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl ConnectionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
            delay: Duration::from_millis(self.retry_delay_ms),
            backoff_factor: self.backoff_factor,
            max_delay: Duration::from_millis(self.max_retry_delay_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            url: self.server_url.clone(),
            data_event: self.data_event.clone(),
            retry: self.retry_policy(),
        }
    }
}

/// Broadcast server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_data_event")]
    pub data_event: String,

    #[serde(default = "default_max_subscribers")]
    pub max_subscribers: usize,

    /// Frames queued per subscriber before it is dropped
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,

    /// Local sample input for the embedded stream
    pub source: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    15064
}

fn default_max_subscribers() -> usize {
    1000
}

fn default_subscriber_buffer() -> usize {
    256
}

fn default_write_timeout() -> u64 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_event: default_data_event(),
            max_subscribers: default_max_subscribers(),
            subscriber_buffer: default_subscriber_buffer(),
            write_timeout_ms: default_write_timeout(),
            source: None,
        }
    }
}

impl ServerConfig {
    /// Runtime configuration for [`crate::server::serve`]
    pub fn to_server_config(&self) -> crate::server::ServerConfig {
        crate::server::ServerConfig {
            host: self.host.clone(),
            port: self.port,
            data_event: self.data_event.clone(),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            hub: HubConfig {
                max_subscribers: self.max_subscribers,
                subscriber_buffer: self.subscriber_buffer.max(1),
            },
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

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("windrelay").join("config.toml")),
            Some(PathBuf::from("/etc/windrelay/config.toml")),
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
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Feeder overrides
        if let Some(address) = var("WINDRELAY_DEVICE_ADDRESS") {
            self.feeder.device_address = address;
        }
        if let Some(buffer) = var("WINDRELAY_BUFFER") {
            self.feeder.buffer = buffer;
        }
        if let Some(input) = var("WINDRELAY_INPUT") {
            self.feeder.input = input;
        }
        if let Some(pacing) = var("WINDRELAY_PACING_MS").and_then(|v| v.parse().ok()) {
            self.feeder.pacing_ms = pacing;
        }

        // Connection overrides
        if let Some(url) = var("WINDRELAY_SERVER_URL") {
            self.connection.server_url = url;
        }
        if let Some(event) = var("WINDRELAY_DATA_EVENT") {
            self.connection.data_event = event.clone();
            self.server.data_event = event;
        }
        if let Some(attempts) = var("WINDRELAY_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.connection.max_attempts = attempts;
        }

        // Server overrides
        if let Some(host) = var("WINDRELAY_HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("WINDRELAY_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(source) = var("WINDRELAY_SOURCE") {
            self.server.source = Some(source);
        }

        // Logging overrides
        if let Some(level) = var("WINDRELAY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("WINDRELAY_LOG_FORMAT") {
            self.logging.format = format;
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
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# windrelay Configuration
#
# Environment variables override these settings:
# - WINDRELAY_DEVICE_ADDRESS
# - WINDRELAY_BUFFER
# - WINDRELAY_INPUT
# - WINDRELAY_PACING_MS
# - WINDRELAY_SERVER_URL
# - WINDRELAY_DATA_EVENT
# - WINDRELAY_MAX_ATTEMPTS
# - WINDRELAY_HOST
# - WINDRELAY_PORT
# - WINDRELAY_SOURCE
# - WINDRELAY_LOG_LEVEL
# - WINDRELAY_LOG_FORMAT

[feeder]
# Data-acquisition device address
device_address = "192.168.1.100"

# Buffer to read: a UUID or a numeric index
buffer = "0"

# JSON-lines sample input: a file path or "-" for stdin
input = "-"

# Delay after each sample (ms); 0 sends as fast as samples arrive
pacing_ms = 1000

# Log progress every N samples
log_every = 500

[connection]
# Broadcast server WebSocket URL
server_url = "ws://localhost:15064/ws"

# Event name records are sent under
data_event = "data"

# Connect attempts before giving up; 0 retries forever
max_attempts = 999999

# Delay between attempts (ms)
retry_delay_ms = 2000

# Multiplier applied to the delay after each failure (1.0 = fixed)
backoff_factor = 1.0

# Upper bound for the retry delay (ms)
max_retry_delay_ms = 30000

# Timeout for a single connect attempt (ms)
connect_timeout_ms = 10000

[server]
# Broadcast server host
host = "0.0.0.0"

# Broadcast server port
port = 15064

# Event name records are relayed under
data_event = "data"

# Maximum concurrent subscribers
max_subscribers = 1000

# Frames queued per subscriber before it is disconnected
subscriber_buffer = 256

# Socket write timeout per frame (ms)
write_timeout_ms = 5000

# Optional local sample input streamed by the server itself
# source = "/var/lib/windrelay/samples.jsonl"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
