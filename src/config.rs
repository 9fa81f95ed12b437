//! # Configuration Management
//!
//! Centralized configuration for the tunnel core.
//!
//! This module provides structured configuration for a tunnel session:
//! framing limits, reliability timers, rate limiting, transport retry
//! behavior, and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides
//!
//! ## Tuning Notes
//! - `ack_timeout` must sit comfortably above the token bucket's refill
//!   period, or retransmissions fire while the original frame is still
//!   queued behind the rate limiter. `validate()` flags this.

use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

use crate::core::codec::{max_payload_for_limit, HEADER_CHARS};

/// Default transport message character limit (Discord-sized).
pub const DEFAULT_TRANSPORT_MAX_CHARS: usize = 2000;

/// Default bound on unacknowledged in-flight frames.
pub const DEFAULT_WINDOW_SIZE: usize = 16;

/// Default bound on buffered out-of-order inbound frames.
pub const DEFAULT_MAX_REORDER_WINDOW: usize = 64;

/// Main tunnel configuration structure containing all configurable settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct TunnelConfig {
    /// Framing limits.
    #[serde(default)]
    pub frame: FrameConfig,

    /// Sequencing and retransmission settings.
    #[serde(default)]
    pub reliability: ReliabilityConfig,

    /// Outgoing message rate limiting.
    #[serde(default)]
    pub rate: RateConfig,

    /// Message-transport send retry settings.
    #[serde(default)]
    pub transport: TransportRetryConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TunnelConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| SessionError::InvalidConfig(format!("failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| SessionError::InvalidConfig(format!("failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> crate::error::Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| SessionError::InvalidConfig(format!("failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(limit) = std::env::var("MESSAGE_TUNNEL_TRANSPORT_MAX_CHARS") {
            if let Ok(val) = limit.parse::<usize>() {
                config.frame.transport_max_chars = val;
            }
        }

        if let Ok(window) = std::env::var("MESSAGE_TUNNEL_WINDOW_SIZE") {
            if let Ok(val) = window.parse::<usize>() {
                config.reliability.window_size = val;
            }
        }

        if let Ok(timeout) = std::env::var("MESSAGE_TUNNEL_ACK_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.reliability.ack_timeout = Duration::from_millis(val);
            }
        }

        config
    }

    /// Apply overrides to the default configuration.
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content.
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Largest frame payload, in bytes, permitted by the frame limits.
    pub fn max_payload(&self) -> usize {
        max_payload_for_limit(self.frame.transport_max_chars)
    }

    /// Validate the configuration for common issues and misconfigurations.
    ///
    /// Returns a list of validation errors. Empty list means the
    /// configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(self.frame.validate());
        errors.extend(self.reliability.validate());
        errors.extend(self.rate.validate());
        errors.extend(self.transport.validate());

        // Cross-section check: retransmission must not race the rate limiter.
        let refill = self.rate.refill_period();
        if self.reliability.ack_timeout < refill * 2 {
            errors.push(format!(
                "ack_timeout ({:?}) should be at least twice the rate limiter refill period ({:?}) to avoid retransmission storms",
                self.reliability.ack_timeout, refill
            ));
        }

        errors
    }

    /// Validate and return Result - convenience method.
    pub fn validate_strict(&self) -> crate::error::Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SessionError::InvalidConfig(errors.join("; ")))
        }
    }
}

/// Framing limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FrameConfig {
    /// Maximum characters per transport message. The frame payload bound is
    /// derived from this after base64 expansion and header overhead.
    pub transport_max_chars: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            transport_max_chars: DEFAULT_TRANSPORT_MAX_CHARS,
        }
    }
}

impl FrameConfig {
    /// Validate framing limits.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        // Below this there is no room for even one payload byte group.
        if max_payload_for_limit(self.transport_max_chars) == 0 {
            errors.push(format!(
                "transport_max_chars too small: {} (minimum useful: {})",
                self.transport_max_chars,
                HEADER_CHARS + 4
            ));
        } else if self.transport_max_chars > 1_000_000 {
            errors.push(format!(
                "transport_max_chars suspiciously large: {} (is this really a message transport?)",
                self.transport_max_chars
            ));
        }

        errors
    }
}

/// Sequencing and retransmission settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReliabilityConfig {
    /// Maximum unacknowledged frames in flight per direction.
    pub window_size: usize,

    /// How long to wait for an ACK of the oldest pending frame before
    /// retransmitting it.
    #[serde(with = "duration_serde")]
    pub ack_timeout: Duration,

    /// Retransmissions of a single frame before declaring the peer dead.
    pub max_retries: u32,

    /// Maximum buffered out-of-order inbound frames.
    pub max_reorder_window: usize,

    /// Interval for re-sending the cumulative ACK during idle periods so the
    /// peer's window can drain even when our ACKs get lost.
    #[serde(with = "duration_serde")]
    pub ack_heartbeat: Duration,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            ack_timeout: Duration::from_secs(2),
            max_retries: 5,
            max_reorder_window: DEFAULT_MAX_REORDER_WINDOW,
            ack_heartbeat: Duration::from_secs(1),
        }
    }
}

impl ReliabilityConfig {
    /// Validate reliability settings.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.window_size == 0 {
            errors.push("window_size must be greater than 0".to_string());
        } else if self.window_size > 10_000 {
            errors.push(format!(
                "window_size very large: {} (each slot holds an encoded frame in memory)",
                self.window_size
            ));
        }

        if self.ack_timeout.as_millis() < 10 {
            errors.push("ack_timeout too short (minimum: 10ms)".to_string());
        }

        if self.max_retries == 0 {
            errors.push("max_retries must be greater than 0".to_string());
        }

        if self.max_reorder_window == 0 {
            errors.push("max_reorder_window must be greater than 0".to_string());
        }

        if self.ack_heartbeat.as_millis() < 10 {
            errors.push("ack_heartbeat too short (minimum: 10ms)".to_string());
        }

        errors
    }
}

/// Outgoing message rate limiting (token bucket).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateConfig {
    /// Messages permitted per `interval`.
    pub messages_per_interval: u32,

    /// Refill interval of the token bucket.
    #[serde(with = "duration_serde")]
    pub interval: Duration,

    /// Bucket capacity (maximum burst).
    pub burst: u32,
}

impl Default for RateConfig {
    fn default() -> Self {
        // Discord-shaped: 5 messages per 5 seconds per channel.
        Self {
            messages_per_interval: 5,
            interval: Duration::from_secs(5),
            burst: 5,
        }
    }
}

impl RateConfig {
    /// Average time between token refills.
    pub fn refill_period(&self) -> Duration {
        if self.messages_per_interval == 0 {
            return self.interval;
        }
        self.interval / self.messages_per_interval
    }

    /// Validate rate settings.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.messages_per_interval == 0 {
            errors.push("messages_per_interval must be greater than 0".to_string());
        }

        if self.interval.is_zero() {
            errors.push("rate interval cannot be zero".to_string());
        }

        if self.burst == 0 {
            errors.push("burst must be greater than 0".to_string());
        } else if self.burst > 10_000 {
            errors.push(format!("burst very large: {}", self.burst));
        }

        errors
    }
}

/// Message-transport send retry settings. Independent of frame-level
/// retransmission: this covers a single `send()` call failing transiently.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportRetryConfig {
    /// Attempts per message before escalating to a fatal session error.
    pub max_send_retries: u32,

    /// First backoff delay; doubles per attempt.
    #[serde(with = "duration_serde")]
    pub initial_backoff: Duration,
}

impl Default for TransportRetryConfig {
    fn default() -> Self {
        Self {
            max_send_retries: 5,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

impl TransportRetryConfig {
    /// Validate transport retry settings.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_send_retries == 0 {
            errors.push("max_send_retries must be greater than 0".to_string());
        }

        if self.initial_backoff.is_zero() {
            errors.push("initial_backoff cannot be zero".to_string());
        } else if self.initial_backoff.as_secs() > 60 {
            errors.push("initial_backoff too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs.
    pub app_name: String,

    /// Log level.
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs.
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("message-tunnel"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

/// Durations as plain integer milliseconds in TOML.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        u64::try_from(d.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Log levels as lowercase names in TOML ("trace" through "error").
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S: Serializer>(level: &Level, serializer: S) -> Result<S::Ok, S::Error> {
        level.to_string().to_lowercase().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Level, D::Error> {
        let name = String::deserialize(deserializer)?;
        Level::from_str(&name)
            .map_err(|_| serde::de::Error::custom(format!("unknown log level: {name}")))
    }
}
