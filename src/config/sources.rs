//! Config sources: an optional TOML file and `STRATA_*` environment variables.

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File, FileFormat};
use std::path::Path;
use tracing::warn;

/// Add `path` as a TOML source. A missing file only logs a warning.
pub fn add_file(
    builder: ConfigBuilder<DefaultState>,
    path: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    if !path.exists() {
        warn!(
            config_path = %path.display(),
            "Configuration file not found, using defaults"
        );
        return Ok(builder);
    }
    let path = path.to_str().ok_or_else(|| {
        ConfigError::Message(format!("Configuration path is not UTF-8: {}", path.display()))
    })?;
    Ok(builder.add_source(File::new(path, FileFormat::Toml).required(false)))
}

/// Add `STRATA_` prefixed environment overrides; `__` separates nested keys.
pub fn add_environment(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix("STRATA")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    )
}
