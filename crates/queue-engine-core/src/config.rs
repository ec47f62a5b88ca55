//! Engine configuration.
//!
//! Configuration is assembled with the `config` crate from, in order (later
//! sources override earlier ones):
//!
//! 1. Built-in defaults (every field carries a serde default)
//! 2. An optional configuration file (YAML, TOML or JSON, chosen by extension)
//! 3. Environment variables prefixed `QE` with `__` as the section separator,
//!    e.g. `QE__QUEUE__DEFAULT_TIMEOUT_SECONDS=30`

use crate::error::ConfigurationError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Upper bound for configured delay and timeout limits (100 years)
pub const MAX_DURATION_LIMIT_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "QE";

/// Environment variable naming an explicit configuration file
pub const CONFIG_FILE_ENV: &str = "QE_CONFIG_FILE";

/// Root engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-queue limits and defaults
    pub queue: QueueSettings,

    /// Push delivery settings
    pub push: PushConfig,

    /// Background reservation sweeper
    pub sweep: SweepConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Limits and defaults applied to queue operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Reservation timeout used when a post does not specify one
    pub default_timeout_seconds: u64,

    /// Largest accepted reservation timeout
    pub max_timeout_seconds: u64,

    /// Largest accepted post or release delay
    pub max_delay_seconds: u64,

    /// Largest `max`/`count` accepted by get and peek, and bodies per post
    pub max_batch_size: usize,

    /// Largest accepted message body in bytes
    pub max_body_size: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 60,
            max_timeout_seconds: 86_400,
            max_delay_seconds: 604_800,
            max_batch_size: 100,
            max_body_size: 64 * 1024, // 64KB
        }
    }
}

impl QueueSettings {
    /// Default reservation timeout as a duration
    pub fn default_timeout(&self) -> Duration {
        seconds(self.default_timeout_seconds)
    }

    /// Maximum reservation timeout as a duration
    pub fn max_timeout(&self) -> Duration {
        seconds(self.max_timeout_seconds)
    }

    /// Maximum delay as a duration
    pub fn max_delay(&self) -> Duration {
        seconds(self.max_delay_seconds)
    }
}

/// Push delivery configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Attempts per subscriber for queues that do not set `retries`
    pub default_retries: u32,

    /// Largest accepted `retries` value
    pub max_retries: u32,

    /// HTTP request timeout for a single delivery attempt
    pub request_timeout_seconds: u64,

    /// Backoff after the first failed attempt
    pub retry_initial_delay_ms: u64,

    /// Backoff cap
    pub retry_max_delay_ms: u64,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,

    /// Randomize backoff delays by ±25%
    pub use_jitter: bool,

    /// Completed push records retained per queue for status queries
    pub history_limit: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            default_retries: 3,
            max_retries: 100,
            request_timeout_seconds: 10,
            retry_initial_delay_ms: 1_000,
            retry_max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            use_jitter: true,
            history_limit: 10_000,
        }
    }
}

/// Background sweeper configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Run a periodic sweep that reclaims expired reservations eagerly
    pub enabled: bool,

    /// Interval between sweeps
    pub interval_ms: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 1_000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from defaults, an optional file and the environment
    ///
    /// When `path` is `None` the file named by `QE_CONFIG_FILE` is used if
    /// that variable is set. The result is validated before it is returned.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        let env_path = std::env::var(CONFIG_FILE_ENV)
            .ok()
            .filter(|p| !p.is_empty());
        let file = path
            .map(|p| p.to_path_buf())
            .or_else(|| env_path.map(Into::into));

        if let Some(file) = file {
            if !file.exists() {
                return Err(ConfigurationError::Missing {
                    key: file.display().to_string(),
                });
            }
            builder = builder.add_source(config::File::from(file).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        let config: EngineConfig =
            settings
                .try_deserialize()
                .map_err(|e| ConfigurationError::Parsing {
                    message: e.to_string(),
                })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a working engine
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let queue = &self.queue;
        if queue.default_timeout_seconds == 0 {
            return Err(invalid("queue.default_timeout_seconds must be positive"));
        }
        if queue.default_timeout_seconds > queue.max_timeout_seconds {
            return Err(invalid(
                "queue.default_timeout_seconds exceeds queue.max_timeout_seconds",
            ));
        }
        if queue.max_timeout_seconds > MAX_DURATION_LIMIT_SECONDS {
            return Err(invalid("queue.max_timeout_seconds exceeds 100 years"));
        }
        if queue.max_delay_seconds > MAX_DURATION_LIMIT_SECONDS {
            return Err(invalid("queue.max_delay_seconds exceeds 100 years"));
        }
        if queue.max_batch_size == 0 {
            return Err(invalid("queue.max_batch_size must be positive"));
        }
        if queue.max_body_size == 0 {
            return Err(invalid("queue.max_body_size must be positive"));
        }

        let push = &self.push;
        if push.default_retries > push.max_retries {
            return Err(invalid("push.default_retries exceeds push.max_retries"));
        }
        if push.request_timeout_seconds == 0 {
            return Err(invalid("push.request_timeout_seconds must be positive"));
        }
        if push.retry_initial_delay_ms > push.retry_max_delay_ms {
            return Err(invalid(
                "push.retry_initial_delay_ms exceeds push.retry_max_delay_ms",
            ));
        }
        if push.backoff_multiplier.is_nan() || push.backoff_multiplier < 1.0 {
            return Err(invalid("push.backoff_multiplier must be at least 1.0"));
        }

        if self.sweep.enabled && self.sweep.interval_ms == 0 {
            return Err(invalid("sweep.interval_ms must be positive when enabled"));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> ConfigurationError {
    ConfigurationError::Invalid {
        message: message.to_string(),
    }
}

fn seconds(value: u64) -> Duration {
    Duration::try_seconds(value.min(i64::MAX as u64) as i64).unwrap_or_else(Duration::max_value)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
