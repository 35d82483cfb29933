//! Error types shared across the workspace

use std::path::PathBuf;
use thiserror::Error;

/// Result alias for crates that surface [`OpFuzzError`].
pub type Result<T> = std::result::Result<T, OpFuzzError>;

/// Top-level error
#[derive(Debug, Error)]
pub enum OpFuzzError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for OpFuzzError {
    fn from(err: serde_json::Error) -> Self {
        OpFuzzError::Serialization(err.to_string())
    }
}

/// Malformed or missing settings. Always fatal and reported before any
/// generation begins.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("missing required option `{0}`")]
    Missing(&'static str),

    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("unknown {what} `{name}` (expected one of: {expected})")]
    UnknownName { what: &'static str, name: String, expected: String },
}

impl ConfigError {
    pub fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid { key, reason: reason.into() }
    }

    pub fn unknown(what: &'static str, name: impl Into<String>, expected: &[&str]) -> Self {
        ConfigError::UnknownName { what, name: name.into(), expected: expected.join(", ") }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_wraps_with_prefix() {
        let err: OpFuzzError = ConfigError::Missing("backend.targets").into();
        assert_eq!(err.to_string(), "Configuration error: missing required option `backend.targets`");
    }

    #[test]
    fn unknown_name_lists_expected() {
        let err = ConfigError::unknown("filter", "nans", &["nan", "inf"]);
        assert_eq!(err.to_string(), "unknown filter `nans` (expected one of: nan, inf)");
    }
}
