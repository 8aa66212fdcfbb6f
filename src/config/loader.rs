//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::HeaderProxyConfig;
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
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<HeaderProxyConfig, ConfigError> {
    let config: HeaderProxyConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<HeaderProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error() {
        assert!(matches!(parse_config("[pool\ncapacity = 1"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validation_errors_are_joined() {
        let err = parse_config("[pool]\ncapacity = 0\n[fetch]\nmax_tokens = 0\n").unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("Validation failed: "));
        assert!(text.contains("pool.capacity must be at least 1"));
        assert!(text.contains(", "));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/header-proxy.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
