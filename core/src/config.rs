//! Registry configuration.
//!
//! Configuration can be built in code, parsed from TOML, or read from the
//! process environment.
//!
//! # Example
//!
//! ```
//! use cancelable_requests_core::config::RegistryConfig;
//! use std::time::Duration;
//!
//! let config = RegistryConfig::builder()
//!     .change_remove_on_cancel(false)
//!     .max_tombstone_age(Duration::from_secs(30))
//!     .build();
//!
//! assert!(!config.change_remove_on_cancel);
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Field |
//! |----------|-------|
//! | `CANCEL_REGISTRY_CHANGE_REMOVE_ON_CANCEL` | `change_remove_on_cancel` |
//! | `CANCEL_REGISTRY_TOMBSTONE_MAX_AGE_SECS` | `sweep.max_tombstone_age` |
//! | `CANCEL_REGISTRY_MAX_TOMBSTONES` | `sweep.max_tombstones_per_request` |
//! | `CANCEL_REGISTRY_SWEEP_INTERVAL_SECS` | `sweep.interval` |

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Environment variable for [`RegistryConfig::change_remove_on_cancel`]
pub const ENV_CHANGE_REMOVE_ON_CANCEL: &str = "CANCEL_REGISTRY_CHANGE_REMOVE_ON_CANCEL";
/// Environment variable for [`SweepPolicy::max_tombstone_age`] (seconds)
pub const ENV_TOMBSTONE_MAX_AGE_SECS: &str = "CANCEL_REGISTRY_TOMBSTONE_MAX_AGE_SECS";
/// Environment variable for [`SweepPolicy::max_tombstones_per_request`]
pub const ENV_MAX_TOMBSTONES: &str = "CANCEL_REGISTRY_MAX_TOMBSTONES";
/// Environment variable for [`SweepPolicy::interval`] (seconds)
pub const ENV_SWEEP_INTERVAL_SECS: &str = "CANCEL_REGISTRY_SWEEP_INTERVAL_SECS";

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A value could not be parsed
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Configuration key or environment variable
        key: String,
        /// The rejected raw value
        value: String,
    },

    /// TOML document could not be parsed
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Configuration parsed but is not usable
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

/// Policy for purging `Removed`/`Canceled` tombstones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepPolicy {
    /// Tombstones older than this are removed by a sweep
    #[serde(rename = "max_tombstone_age_secs", with = "duration_secs")]
    pub max_tombstone_age: Duration,

    /// Terminal slots kept per (component, request) group before the oldest are dropped
    pub max_tombstones_per_request: usize,

    /// How often the background sweeper runs
    #[serde(rename = "interval_secs", with = "duration_secs")]
    pub interval: Duration,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            max_tombstone_age: Duration::from_secs(300),
            max_tombstones_per_request: 64,
            interval: Duration::from_secs(60),
        }
    }
}

/// Process-wide registry options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Upgrade `Removed` slots to `Canceled` when a cancel arrives after completion
    pub change_remove_on_cancel: bool,

    /// Tombstone sweep policy
    pub sweep: SweepPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            change_remove_on_cancel: true,
            sweep: SweepPolicy::default(),
        }
    }
}

impl RegistryConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> RegistryConfigBuilder {
        RegistryConfigBuilder {
            config: Self::default(),
        }
    }

    /// Parse a TOML document.
    ///
    /// Missing keys fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Validation`] for unusable values.
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(document).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the process environment, starting from defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a variable is set but unparsable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Load using a custom variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a variable is set but unparsable,
    /// or [`ConfigError::Validation`] if the result is unusable.
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_CHANGE_REMOVE_ON_CANCEL) {
            config.change_remove_on_cancel = parse_bool(ENV_CHANGE_REMOVE_ON_CANCEL, &raw)?;
        }
        if let Some(raw) = lookup(ENV_TOMBSTONE_MAX_AGE_SECS) {
            config.sweep.max_tombstone_age =
                Duration::from_secs(parse_number(ENV_TOMBSTONE_MAX_AGE_SECS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_MAX_TOMBSTONES) {
            config.sweep.max_tombstones_per_request = parse_number(ENV_MAX_TOMBSTONES, &raw)?;
        }
        if let Some(raw) = lookup(ENV_SWEEP_INTERVAL_SECS) {
            config.sweep.interval =
                Duration::from_secs(parse_number(ENV_SWEEP_INTERVAL_SECS, &raw)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when the sweep interval is zero or
    /// no tombstones at all may be kept per request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep.interval.is_zero() {
            return Err(ConfigError::Validation(
                "sweep interval must be greater than zero".to_string(),
            ));
        }
        if self.sweep.max_tombstones_per_request == 0 {
            return Err(ConfigError::Validation(
                "max_tombstones_per_request must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`RegistryConfig`].
#[derive(Debug, Clone)]
pub struct RegistryConfigBuilder {
    config: RegistryConfig,
}

impl RegistryConfigBuilder {
    /// Whether a late cancel upgrades `Removed` to `Canceled`.
    #[must_use]
    pub const fn change_remove_on_cancel(mut self, enabled: bool) -> Self {
        self.config.change_remove_on_cancel = enabled;
        self
    }

    /// Maximum tombstone age before a sweep removes it.
    #[must_use]
    pub const fn max_tombstone_age(mut self, age: Duration) -> Self {
        self.config.sweep.max_tombstone_age = age;
        self
    }

    /// Terminal slots kept per request group.
    #[must_use]
    pub const fn max_tombstones_per_request(mut self, max: usize) -> Self {
        self.config.sweep.max_tombstones_per_request = max;
        self
    }

    /// Background sweep interval.
    #[must_use]
    pub const fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep.interval = interval;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub const fn build(self) -> RegistryConfig {
        self.config
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
