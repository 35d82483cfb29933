//! Locating and loading the configuration file.

use anyhow::{Context, Result};
use opfuzz_common::FuzzConfig;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "opfuzz.toml";

/// The file to read, if any: an explicit path, else `opfuzz.toml` in `dir`
/// when it exists.
pub fn config_path(explicit: Option<&Path>, dir: &Path) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => Some(dir.join(DEFAULT_CONFIG_FILE)).filter(|p| p.is_file()),
    }
}

/// Parse the configuration without validating it; commands validate after
/// applying their flag overrides.
pub fn load(explicit: Option<&Path>) -> Result<FuzzConfig> {
    let cwd = std::env::current_dir().context("failed to determine working directory")?;
    match config_path(explicit, &cwd) {
        Some(path) => {
            debug!(path = %path.display(), "loading configuration");
            FuzzConfig::from_file(&path).with_context(|| format!("loading configuration from {}", path.display()))
        }
        None => {
            debug!("no configuration file; using defaults");
            Ok(FuzzConfig::default())
        }
    }
}

/// Validate after overrides, with the usual context.
pub fn validated(config: FuzzConfig) -> Result<FuzzConfig> {
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins_even_if_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DEFAULT_CONFIG_FILE), "").unwrap();
        let explicit = dir.path().join("other.toml");
        assert_eq!(config_path(Some(&explicit), dir.path()), Some(explicit.clone()));
        assert!(load(Some(&explicit)).is_err());
    }

    #[test]
    fn default_file_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(config_path(None, dir.path()), None);
        std::fs::write(dir.path().join(DEFAULT_CONFIG_FILE), "[compare]\natol = 0.5\n").unwrap();
        let path = config_path(None, dir.path()).unwrap();
        assert_eq!(FuzzConfig::from_file(&path).unwrap().compare.atol, 0.5);
    }
}
