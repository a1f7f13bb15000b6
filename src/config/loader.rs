//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::BreakerSettings;
use crate::config::validation::ValidationError;

/// Error type for configuration loading and resolution.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed for '{name}': {}", join(.errors))]
    Validation {
        name: String,
        errors: Vec<ValidationError>,
    },

    #[error("Base configuration cycle detected for '{name}': {}", .chain.join(" -> "))]
    CycleDetected { name: String, chain: Vec<String> },
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load settings from a TOML file.
///
/// Only syntax is checked here; fragments are validated when resolved
/// (see `ConfigResolver::validate_all`).
pub fn load_settings(path: &Path) -> Result<BreakerSettings, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_settings(&content)
}

pub fn parse_settings(content: &str) -> Result<BreakerSettings, ConfigError> {
    Ok(toml::from_str(content)?)
}
