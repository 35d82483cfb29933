//! Errors that stop a campaign.
//!
//! Backend crashes, timeouts and divergences are findings, not errors. What
//! remains is bad configuration and trouble with the campaign directory.

use opfuzz_common::ConfigError;
use opfuzz_infer::InferenceError;
use opfuzz_ops::RegistryError;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CampaignError>;

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("operator registry: {0}")]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("filter patch {}: {reason}", path.display())]
    Patch { path: PathBuf, reason: String },

    #[error("campaign directory {} already holds state; resume it or choose another name", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("campaign state {} is corrupt: {reason}", path.display())]
    CorruptState { path: PathBuf, reason: String },
}

impl CampaignError {
    pub(crate) fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        CampaignError::Io { action, path: path.to_path_buf(), source }
    }

    /// Whether the user can fix this by changing settings, as opposed to
    /// the environment failing underneath the campaign.
    pub fn is_config(&self) -> bool {
        match self {
            CampaignError::Config(_)
            | CampaignError::Registry(_)
            | CampaignError::Patch { .. }
            | CampaignError::AlreadyExists { .. } => true,
            CampaignError::Inference(err) => matches!(err, InferenceError::Registry(_) | InferenceError::Version { .. }),
            CampaignError::Io { .. } | CampaignError::CorruptState { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_user_errors() {
        assert!(CampaignError::from(ConfigError::Missing("backend.targets")).is_config());
        assert!(CampaignError::AlreadyExists { path: PathBuf::from("out/c") }.is_config());
        let io = CampaignError::io("write", Path::new("state.json"), std::io::Error::other("disk full"));
        assert!(!io.is_config());
        assert_eq!(io.to_string(), "failed to write state.json: disk full");
    }
}
