//! Configuration loading for the `hangar` binary.
//!
//! The file path comes from `--config` or `HANGAR_CONFIG`. Without a file,
//! `--base-url` alone is enough and everything else takes code defaults.

use hangar_client::ClientCredentials;
use hangar_core::{ConfigError, SyncConfig};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

fn default_request_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CliConfig {
    pub api_base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub auth: ClientCredentials,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl CliConfig {
    pub fn for_base_url(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            request_timeout_ms: default_request_timeout_ms(),
            auth: ClientCredentials::default(),
            sync: SyncConfig::default(),
        }
    }

    /// Resolve configuration from an optional file and an optional base URL
    /// override, then validate it.
    pub fn load(path: Option<&Path>, base_url: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match (path, base_url) {
            (Some(path), _) => Self::from_path(path)?,
            (None, Some(url)) => Self::for_base_url(url),
            (None, None) => return Err(ConfigError::MissingConfigPath),
        };
        if let Some(url) = base_url {
            config.api_base_url = url.to_string();
        }
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

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        self.sync.validate()
    }
}
