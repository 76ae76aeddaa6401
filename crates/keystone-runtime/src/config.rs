//! # Runtime Configuration
//!
//! One document covering the container, the event bus, the scheduler and
//! the health monitor. Values come from defaults, then an optional TOML
//! file, then `KEYSTONE_*` environment variables.
//!
//! ```toml
//! [container]
//! enable_cycle_detection = true
//! async_init_timeout_ms = 10000
//!
//! [bus]
//! max_history = 100
//! default_handler_timeout_ms = 5000
//!
//! [scheduler]
//! tick_interval_ms = 16
//!
//! [health]
//! health_check_interval_ms = 30000
//! service_timeout_ms = 1000
//! ```

use keystone_bus::BusConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub container: ContainerConfig,
    pub bus: BusConfig,
    pub scheduler: SchedulerConfig,
    pub health: HealthConfig,
}

/// Service container configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Fail on dependency cycles instead of skipping the back edge.
    pub enable_cycle_detection: bool,
    /// Timeout for each service's async initializer.
    pub async_init_timeout_ms: u64,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            enable_cycle_detection: true,
            async_init_timeout_ms: 10_000,
        }
    }
}

impl ContainerConfig {
    #[must_use]
    pub fn async_init_timeout(&self) -> Duration {
        Duration::from_millis(self.async_init_timeout_ms)
    }
}

/// Cooperative scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Period of the tick loop (one frame at 60 Hz by default).
    pub tick_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 16,
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Health monitor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    /// Period between check rounds.
    pub health_check_interval_ms: u64,
    /// A check slower than this counts as unhealthy.
    pub service_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            health_check_interval_ms: 30_000,
            service_timeout_ms: 1_000,
        }
    }
}

impl HealthConfig {
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    #[must_use]
    pub fn service_timeout(&self) -> Duration {
        Duration::from_millis(self.service_timeout_ms)
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config document: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl RuntimeConfig {
    /// Parse a TOML document. Missing sections and keys take defaults.
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(document)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&document)
    }

    /// Defaults, then the file if given, then the environment. Validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Override values from the process environment.
    ///
    /// # Environment Variables
    ///
    /// - `KEYSTONE_CYCLE_DETECTION`
    /// - `KEYSTONE_ASYNC_INIT_TIMEOUT_MS`
    /// - `KEYSTONE_MAX_HISTORY`
    /// - `KEYSTONE_HANDLER_TIMEOUT_MS`
    /// - `KEYSTONE_VALIDATE_PAYLOADS`
    /// - `KEYSTONE_TICK_INTERVAL_MS`
    /// - `KEYSTONE_HEALTH_ENABLED`
    /// - `KEYSTONE_HEALTH_INTERVAL_MS`
    /// - `KEYSTONE_SERVICE_TIMEOUT_MS`
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Override values from any key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_value(&lookup, "KEYSTONE_CYCLE_DETECTION", &mut self.container.enable_cycle_detection)?;
        override_value(&lookup, "KEYSTONE_ASYNC_INIT_TIMEOUT_MS", &mut self.container.async_init_timeout_ms)?;
        override_value(&lookup, "KEYSTONE_MAX_HISTORY", &mut self.bus.max_history)?;
        override_value(&lookup, "KEYSTONE_HANDLER_TIMEOUT_MS", &mut self.bus.default_handler_timeout_ms)?;
        override_value(&lookup, "KEYSTONE_VALIDATE_PAYLOADS", &mut self.bus.validate_payloads)?;
        override_value(&lookup, "KEYSTONE_TICK_INTERVAL_MS", &mut self.scheduler.tick_interval_ms)?;
        override_value(&lookup, "KEYSTONE_HEALTH_ENABLED", &mut self.health.enabled)?;
        override_value(&lookup, "KEYSTONE_HEALTH_INTERVAL_MS", &mut self.health.health_check_interval_ms)?;
        override_value(&lookup, "KEYSTONE_SERVICE_TIMEOUT_MS", &mut self.health.service_timeout_ms)?;
        Ok(())
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("scheduler.tick_interval_ms must be positive".into()));
        }
        if self.bus.max_history == 0 {
            return Err(ConfigError::Invalid("bus.max_history must be positive".into()));
        }
        if self.bus.default_handler_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "bus.default_handler_timeout_ms must be positive".into(),
            ));
        }
        if self.container.async_init_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "container.async_init_timeout_ms must be positive".into(),
            ));
        }
        if self.health.enabled && self.health.health_check_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "health.health_check_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn override_value<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: EnvValue,
{
    if let Some(raw) = lookup(key) {
        *target = T::parse_env(&raw).ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

trait EnvValue: Sized {
    fn parse_env(raw: &str) -> Option<Self>;
}

impl EnvValue for bool {
    fn parse_env(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    }
}

impl EnvValue for u64 {
    fn parse_env(raw: &str) -> Option<Self> {
        u64::from_str(raw.trim()).ok()
    }
}

impl EnvValue for usize {
    fn parse_env(raw: &str) -> Option<Self> {
        usize::from_str(raw.trim()).ok()
    }
}
