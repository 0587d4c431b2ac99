//! Catalog configuration
//!
//! Supplies the ordered list of scan directories and the supported-extension
//! allowlist, plus the on-disk locations of both stores. Loaded from a TOML
//! file; every field has a default so a missing file still yields a working
//! local setup.

use crate::error::{CatalogError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

fn default_formats() -> Vec<String> {
    [".jpg", ".jpeg", ".png", ".gif", ".bmp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pixdex")
}

fn default_batch_size() -> usize {
    100
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directories walked by the reconciler and watched for live changes.
    pub scan_directories: Vec<PathBuf>,

    /// Extension allowlist, lowercase with leading dot.
    pub supported_formats: Vec<String>,

    /// Holds `catalog.db` (metadata store) and `semantic/` (vector index).
    pub data_dir: PathBuf,

    /// Upper bound on rows touched per delete transaction during sync.
    pub batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_directories: Vec::new(),
            supported_formats: default_formats(),
            data_dir: default_data_dir(),
            batch_size: default_batch_size(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)
            .map_err(|e| CatalogError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    pub fn metadata_db_path(&self) -> PathBuf {
        self.data_dir.join("catalog.db")
    }

    pub fn semantic_index_dir(&self) -> PathBuf {
        self.data_dir.join("semantic")
    }

    /// Case-insensitive extension check against the allowlist.
    pub fn is_supported(&self, path: &Path) -> bool {
        let lower = path.to_string_lossy().to_lowercase();
        self.supported_formats.iter().any(|fmt| lower.ends_with(fmt.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_missing() {
        let config = Config::load(Path::new("/nonexistent/pixdex.toml")).unwrap();
        assert_eq!(config.batch_size, 100);
        assert!(config.supported_formats.contains(&".jpg".to_string()));
    }

    #[test]
    fn parses_toml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixdex.toml");
        std::fs::write(
            &path,
            r#"
scan_directories = ["/photos"]
supported_formats = [".jpg"]
batch_size = 25
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.scan_directories, vec![PathBuf::from("/photos")]);
        assert_eq!(config.batch_size, 25);
        assert!(config.is_supported(Path::new("/photos/A.JPG")));
        assert!(!config.is_supported(Path::new("/photos/a.png")));
    }
}
