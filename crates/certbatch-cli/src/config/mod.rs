//! Configuration and state locations.

use anyhow::Result;
use certbatch::ServiceConfig;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("io", "certbatch", "certbatch")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
}

/// Default config file path.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("config.toml"))
}

/// Default directory for chunk records, artifacts and local CAs.
pub fn default_data_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

/// Load the service configuration.
///
/// A missing file means defaults. Downloads go under the data directory
/// unless the file sets `download_dir`.
pub fn load(path: Option<&Path>, data_dir: &Path) -> Result<ServiceConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };

    let mut config = ServiceConfig::load(&path)
        .map_err(|e| anyhow::anyhow!("Invalid config {}: {e}", path.display()))?;
    if config.download_dir.is_none() {
        config.download_dir = Some(data_dir.join("downloads"));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_defaults_downloads_into_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(Some(&dir.path().join("absent.toml")), dir.path()).unwrap();
        assert_eq!(config.chunk_size, 50);
        assert_eq!(config.download_dir, Some(dir.path().join("downloads")));
    }

    #[test]
    fn test_invalid_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "chunk_size = 0\n").unwrap();
        let err = load(Some(&path), dir.path()).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }
}
