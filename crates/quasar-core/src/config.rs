//! Host configuration.
//!
//! Supports multiple configuration sources with priority:
//! 1. An explicit TOML file passed by the caller
//! 2. `quasar.toml` in the working directory
//! 3. Environment variables
//! 4. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "quasar.toml";

/// Environment variable names.
pub mod env_vars {
    pub const EXTENSION_DIR: &str = "QUASAR_EXTENSION_DIR";
    pub const RENDEZVOUS_TIMEOUT_MS: &str = "QUASAR_RENDEZVOUS_TIMEOUT_MS";
}

/// Default values.
pub mod defaults {
    /// How long a producer waits for the host to publish a signaled value.
    pub const RENDEZVOUS_TIMEOUT_MS: u64 = 5_000;
    /// Lower bound applied to fixed-interval push periods.
    pub const SCHEDULER_MIN_INTERVAL_MS: u64 = 10;
    pub const EXTENSION_DIR: &str = "extensions";
}

/// Configuration shared by every loaded extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directory scanned for native extension libraries
    pub extension_dir: PathBuf,
    /// Upper bound on a producer's wait in `signal_data_ready`
    pub rendezvous_timeout_ms: u64,
    /// Fixed-interval periods shorter than this are clamped up
    pub scheduler_min_interval_ms: u64,
    /// Sources that start disabled, as `"extension/source"` keys
    pub disabled_sources: Vec<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            extension_dir: PathBuf::from(defaults::EXTENSION_DIR),
            rendezvous_timeout_ms: defaults::RENDEZVOUS_TIMEOUT_MS,
            scheduler_min_interval_ms: defaults::SCHEDULER_MIN_INTERVAL_MS,
            disabled_sources: Vec::new(),
        }
    }
}

impl HostConfig {
    /// Load configuration, preferring `path`, then `quasar.toml`, then the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            info!(category = "config", "Loading config from: {}", path.display());
            return Self::from_file(path);
        }

        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            info!(category = "config", "Loading config from: {}", DEFAULT_CONFIG_FILE);
            return Self::from_file(default_path);
        }

        info!(category = "config", "Loading config from environment variables");
        Ok(Self::from_env())
    }

    /// Parse a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: HostConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var(env_vars::EXTENSION_DIR) {
            config.extension_dir = PathBuf::from(dir);
        }

        if let Ok(raw) = std::env::var(env_vars::RENDEZVOUS_TIMEOUT_MS) {
            match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => config.rendezvous_timeout_ms = ms,
                _ => warn!(
                    category = "config",
                    value = %raw,
                    "Ignoring invalid {}", env_vars::RENDEZVOUS_TIMEOUT_MS
                ),
            }
        }

        config
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.rendezvous_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "rendezvous_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if let Some(key) = self.disabled_sources.iter().find(|k| !k.contains('/')) {
            return Err(ConfigError::Invalid(format!(
                "disabled source '{}' is not of the form extension/source",
                key
            )));
        }
        Ok(())
    }

    pub fn rendezvous_timeout(&self) -> Duration {
        Duration::from_millis(self.rendezvous_timeout_ms)
    }

    pub fn scheduler_min_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler_min_interval_ms)
    }

    /// Whether `extension/source` is listed in `disabled_sources`.
    pub fn is_source_disabled(&self, extension: &str, source: &str) -> bool {
        self.disabled_sources.iter().any(|key| {
            key.split_once('/')
                .map(|(ext, src)| ext == extension && src == source)
                .unwrap_or(false)
        })
    }
}
