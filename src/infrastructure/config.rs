//! Configuration management
//!
//! Loads configuration from config.toml at startup (path overridable via
//! `CONFIG_PATH`). Every field has a default, so a partial file or no file
//! at all is fine.

use crate::core::QuoteMatch;
use crate::ws::subscription::{KlineInterval, DEFAULT_BATCH_SIZE, DEFAULT_MAX_STREAMS};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Pipeline configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Upstream exchange stream settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Combined-stream WebSocket endpoint
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// Kline intervals to subscribe for every symbol
    #[serde(default = "default_intervals")]
    pub intervals: Vec<KlineInterval>,

    /// Streams per SUBSCRIBE request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between consecutive SUBSCRIBE requests
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// Stream ceiling for one upstream connection
    #[serde(default = "default_max_streams")]
    pub max_streams: usize,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Symbol catalog settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,

    /// Quote currency the symbol set is filtered on
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,

    #[serde(default)]
    pub quote_match: QuoteMatch,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Bus backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    #[default]
    Redis,
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusConfig {
    #[serde(default)]
    pub backend: BusBackend,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Per-subscriber buffer of the in-memory bus
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
}

/// Client-facing server settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Upper bound for one payload write to one client
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,

    /// Consecutive failed deliveries before a client is evicted
    #[serde(default = "default_max_delivery_failures")]
    pub max_delivery_failures: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily-rolling JSON logs. Console only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            intervals: default_intervals(),
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            max_streams: default_max_streams(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            catalog_url: default_catalog_url(),
            quote_asset: default_quote_asset(),
            quote_match: QuoteMatch::default(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: BusBackend::default(),
            redis_url: default_redis_url(),
            memory_capacity: default_memory_capacity(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
            max_delivery_failures: default_max_delivery_failures(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
        }
    }
}

fn default_ws_url() -> String {
    "wss://stream.binance.com/stream".to_string()
}

fn default_intervals() -> Vec<KlineInterval> {
    vec![KlineInterval::Sec1]
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_batch_delay_ms() -> u64 {
    300
}

fn default_max_streams() -> usize {
    DEFAULT_MAX_STREAMS
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_catalog_url() -> String {
    "https://api.binance.com/api/v3/exchangeInfo".to_string()
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_memory_capacity() -> usize {
    crate::bus::memory::DEFAULT_CAPACITY
}

fn default_bind_addr() -> String {
    "0.0.0.0:8888".to_string()
}

fn default_delivery_timeout_ms() -> u64 {
    5000
}

fn default_max_delivery_failures() -> u32 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

impl UpstreamConfig {
    #[inline]
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl GatewayConfig {
    #[inline]
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

impl Config {
    /// Load configuration from config.toml file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// # Errors
    /// Returns error if file exists but cannot be read or parsed, or if the
    /// parsed values fail [`Config::validate`].
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from(Path::new(&config_path))
    }

    /// Load from an explicit path, same rules as [`Config::load`]
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File not found - use defaults
                Config::default()
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("upstream.ws_url", &self.upstream.ws_url)?;
        check_url("discovery.catalog_url", &self.discovery.catalog_url)?;

        if self.upstream.batch_size == 0 {
            return Err(ConfigError::Invalid("upstream.batch_size must be > 0"));
        }
        if self.upstream.batch_delay_ms == 0 {
            return Err(ConfigError::Invalid("upstream.batch_delay_ms must be > 0"));
        }
        if self.upstream.intervals.is_empty() {
            return Err(ConfigError::Invalid("upstream.intervals must not be empty"));
        }
        if self.upstream.max_streams == 0 {
            return Err(ConfigError::Invalid("upstream.max_streams must be > 0"));
        }
        if self.discovery.quote_asset.trim().is_empty() {
            return Err(ConfigError::Invalid("discovery.quote_asset must not be empty"));
        }
        if self.bus.backend == BusBackend::Redis {
            check_url("bus.redis_url", &self.bus.redis_url)?;
        }
        if self.gateway.bind_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Invalid("gateway.bind_addr must be host:port"));
        }
        if self.gateway.delivery_timeout_ms == 0 {
            return Err(ConfigError::Invalid("gateway.delivery_timeout_ms must be > 0"));
        }
        if self.gateway.max_delivery_failures == 0 {
            return Err(ConfigError::Invalid(
                "gateway.max_delivery_failures must be >= 1",
            ));
        }

        Ok(())
    }
}

fn check_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidUrl {
            field,
            reason: e.to_string(),
        })
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid URL in {field}: {reason}")]
    InvalidUrl { field: &'static str, reason: String },

    #[error("Invalid config: {0}")]
    Invalid(&'static str),
}
