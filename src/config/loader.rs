//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::NodeConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a TOML configuration without validating it.
pub fn parse_config(content: &str) -> Result<NodeConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Load a TOML configuration file. Validation runs separately, after any
/// command-line overrides have been applied.
pub fn load_config(path: &Path) -> Result<NodeConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Validate a fully assembled configuration.
pub fn check_config(config: &NodeConfig) -> Result<(), ConfigError> {
    validate_config(config).map_err(ConfigError::Validation)
}
