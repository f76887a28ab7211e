//! Configuration System
//!
//! Layered configuration for persistence and logging. Sources, lowest
//! precedence first: built-in defaults, an optional TOML file, then
//! `STRATA_` prefixed environment variables (`STRATA_PERSIST__DEBOUNCE_MS`).

use crate::error::ConfigError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

mod merge_policy;
mod sources;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrataConfig {
    #[serde(default)]
    pub persist: PersistConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Persistence tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistConfig {
    /// Debounce window for coalescing dispatches, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Trace flushes and restores at debug level
    #[serde(default)]
    pub debug: bool,
}

fn default_debounce_ms() -> u64 {
    500
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            debug: false,
        }
    }
}

impl StrataConfig {
    /// Validate the configuration, collecting every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.persist.debounce_ms == 0 {
            errors.push("persist.debounce_ms must be greater than 0".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "text") {
            errors.push(format!(
                "logging.format must be 'json' or 'text', got '{}'",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Loads [`StrataConfig`] from its layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration, reading `file` when given.
    pub fn load(file: Option<&Path>) -> Result<StrataConfig, ConfigError> {
        let mut builder = merge_policy::builder_with_defaults()?;
        if let Some(file) = file {
            builder = sources::add_file(builder, file)?;
        }
        builder = sources::add_environment(builder);

        let config: StrataConfig = builder.build()?.try_deserialize()?;
        config
            .validate()
            .map_err(|errors| ConfigError::Invalid(errors.join("; ")))?;
        Ok(config)
    }

    /// Load from a single file without environment overrides.
    pub fn load_from_file(path: &Path) -> Result<StrataConfig, ConfigError> {
        let builder = sources::add_file(merge_policy::builder_with_defaults()?, path)?;
        let config: StrataConfig = builder.build()?.try_deserialize()?;
        config
            .validate()
            .map_err(|errors| ConfigError::Invalid(errors.join("; ")))?;
        Ok(config)
    }
}
