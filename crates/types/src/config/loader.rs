//! Reads adapter configuration documents from disk.

use std::{fs, path::Path};

use thiserror::Error;
use tracing::debug;

use super::{AdapterConfig, ValidationError, validate_adapter_config};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read adapter config '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse adapter config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid adapter config: {0}")]
    Invalid(#[from] ValidationError),
}

/// Loads, parses, and validates an adapter configuration file.
///
/// YAML is a superset of JSON, so both formats are accepted regardless of extension.
pub fn load_adapter_config(file_path: impl AsRef<Path>) -> Result<AdapterConfig, ConfigError> {
    let file_path = file_path.as_ref();
    let content = fs::read_to_string(file_path).map_err(|source| ConfigError::Read {
        path: file_path.display().to_string(),
        source,
    })?;
    let config = parse_adapter_config(&content)?;
    debug!(
        path = %file_path.display(),
        adapter = %config.metadata.name,
        params = config.spec.params.len(),
        preconditions = config.spec.preconditions.len(),
        resources = config.spec.resources.len(),
        "loaded adapter config"
    );
    Ok(config)
}

/// Parses and validates an adapter configuration from a YAML or JSON string.
pub fn parse_adapter_config(content: &str) -> Result<AdapterConfig, ConfigError> {
    let config: AdapterConfig = serde_yaml::from_str(content)?;
    validate_adapter_config(&config)?;
    Ok(config)
}
