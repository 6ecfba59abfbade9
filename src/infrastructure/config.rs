//! Configuration management for stream sessions
//!
//! Loads configuration from config.toml at startup.
//! All tunables live here to avoid hardcoded constants in the core.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level configuration
///
/// Loaded from `CONFIG_PATH` or `config.toml`; a missing file means defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Connection and session tunables
    #[serde(default)]
    pub stream: StreamOptions,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection and session tunables
///
/// Durations are expressed in milliseconds in TOML (`*_ms` keys).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StreamOptions {
    /// Low-level WebSocket ping period
    #[serde(rename = "ping_interval_ms", with = "millis", default = "default_ping_interval")]
    pub ping_interval: Duration,

    /// Forced full reconnect period; `None` never resets
    #[serde(rename = "reset_interval_ms", with = "opt_millis", default)]
    pub reset_interval: Option<Duration>,

    /// Idle buffers kept in the frame pool
    #[serde(default = "default_buffer_pool_size")]
    pub buffer_pool_size: usize,

    /// Initial capacity of each pooled buffer, bytes
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Outbound frame queue depth
    #[serde(default = "default_queue_size")]
    pub send_queue_size: usize,

    /// Inbound frame queue depth between read task and session
    #[serde(default = "default_queue_size")]
    pub inbound_queue_size: usize,

    /// Decoded message channel depth towards the consumer
    #[serde(default = "default_queue_size")]
    pub output_capacity: usize,

    /// Application heartbeat period
    #[serde(rename = "heartbeat_interval_ms", with = "millis", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,

    /// Pause before a session-level reconnect
    #[serde(rename = "reconnect_delay_ms", with = "millis", default = "default_reconnect_delay")]
    pub reconnect_delay: Duration,

    /// Channels per (un)subscribe request
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Dial attempts before giving up
    #[serde(default = "default_dial_attempts")]
    pub dial_attempts: u32,

    /// First retry delay; doubles after every failed attempt
    #[serde(rename = "dial_backoff_ms", with = "millis", default = "default_dial_backoff")]
    pub dial_backoff: Duration,

    /// Upper bound for a single dial attempt
    #[serde(rename = "dial_timeout_ms", with = "millis", default = "default_dial_timeout")]
    pub dial_timeout: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for rolling log files
    #[serde(default = "default_log_dir")]
    pub directory: PathBuf,

    /// Mirror events to stderr
    #[serde(default = "default_console")]
    pub console: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            ping_interval: default_ping_interval(),
            reset_interval: None,
            buffer_pool_size: default_buffer_pool_size(),
            buffer_capacity: default_buffer_capacity(),
            send_queue_size: default_queue_size(),
            inbound_queue_size: default_queue_size(),
            output_capacity: default_queue_size(),
            heartbeat_interval: default_heartbeat_interval(),
            reconnect_delay: default_reconnect_delay(),
            max_batch_size: default_max_batch_size(),
            dial_attempts: default_dial_attempts(),
            dial_backoff: default_dial_backoff(),
            dial_timeout: default_dial_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: default_log_dir(),
            console: default_console(),
        }
    }
}

fn default_ping_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_buffer_pool_size() -> usize {
    32
}

fn default_buffer_capacity() -> usize {
    2048
}

fn default_queue_size() -> usize {
    10
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(20)
}

fn default_reconnect_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_max_batch_size() -> usize {
    crate::ws::subscription::MAX_BATCH_SIZE
}

fn default_dial_attempts() -> u32 {
    10
}

fn default_dial_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_dial_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_console() -> bool {
    true
}

impl StreamOptions {
    /// Reject values the runtime cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero_checks = [
            (self.send_queue_size, "send_queue_size"),
            (self.inbound_queue_size, "inbound_queue_size"),
            (self.output_capacity, "output_capacity"),
            (self.max_batch_size, "max_batch_size"),
            (self.dial_attempts as usize, "dial_attempts"),
        ];
        if let Some((_, name)) = zero_checks.iter().find(|(v, _)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
        }
        if self.ping_interval.is_zero() || self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid("intervals must be non-zero".into()));
        }
        if self.reset_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::Invalid("reset_interval_ms must be non-zero".into()));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from `CONFIG_PATH` or `config.toml`
    ///
    /// If the file doesn't exist, returns default configuration.
    /// # Errors
    /// Returns error if file exists but cannot be read, parsed or validated.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => Self::from_toml(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.stream.validate()?;
        Ok(config)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for crate::StreamError {
    fn from(e: ConfigError) -> Self {
        crate::StreamError::Config(e.to_string())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}
