//! Configuration types

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Retry configuration for transient read failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_backoff_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.initial_backoff_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_backoff_ms",
                reason: "must be >= initial_backoff_ms".to_string(),
            });
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.multiplier",
                reason: "must be >= 1.0".to_string(),
            });
        }
        Ok(())
    }
}

/// Quiet period for debounced search input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DebounceConfig {
    pub quiet_ms: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self { quiet_ms: 300 }
    }
}

impl DebounceConfig {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_ms)
    }
}

/// Settings for the cache-synchronization engine.
///
/// Omitted fields fall back to the code defaults; unknown fields are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// How long a successful read is served from cache before a read refetches.
    pub stale_after_ms: u64,
    /// How long an entry with no subscriber and no fetch in flight is kept
    /// after its last use.
    pub gc_after_ms: u64,
    pub retry: RetryConfig,
    pub debounce: DebounceConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: 60_000,
            gc_after_ms: 300_000,
            retry: RetryConfig::default(),
            debounce: DebounceConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn with_stale_after(mut self, duration: Duration) -> Self {
        self.stale_after_ms = duration.as_millis() as u64;
        self
    }

    pub fn gc_after(&self) -> Duration {
        Duration::from_millis(self.gc_after_ms)
    }

    pub fn with_gc_after(mut self, duration: Duration) -> Self {
        self.gc_after_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_quiet_period(mut self, duration: Duration) -> Self {
        self.debounce.quiet_ms = duration.as_millis() as u64;
        self
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        if self.gc_after_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "gc_after_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.debounce.quiet_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "debounce.quiet_ms",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }
}
