//! Errors surfaced by rule inference and rule files.

use opfuzz_ops::RegistryError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, InferenceError>;

/// Probe failures are data, not errors; these are the failures around them.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("failed to access rule file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed rule file {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("rule file {} has format version {found}, expected {expected}", path.display())]
    Version { path: PathBuf, found: u32, expected: u32 },
}

impl InferenceError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        InferenceError::Io { path: path.to_path_buf(), source }
    }
}
