//! Store configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::revision::ReclaimPolicy;
use crate::storage::DEFAULT_CHUNK_SIZE;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Invalid configuration {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Configuration for a revision store
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Root of the blob bucket tree
    pub storage_root: PathBuf,

    /// JSON metadata index
    pub index_path: PathBuf,

    /// Delete blobs that no revision references any more when purging
    pub reclaim_on_purge: bool,

    /// Bytes copied per step when storing content
    pub chunk_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::with_base_dir(Path::new("./revstore_data"))
    }
}

impl StoreConfig {
    /// Blobs under `<base>/files`, index at `<base>/index.json`.
    pub fn with_base_dir(base: &Path) -> Self {
        Self {
            storage_root: base.join("files"),
            index_path: base.join("index.json"),
            reclaim_on_purge: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Read a JSON configuration file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        serde_json::from_slice(&data).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn reclaim_policy(&self) -> ReclaimPolicy {
        ReclaimPolicy::from_flag(self.reclaim_on_purge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert!(!config.reclaim_on_purge);
        assert_eq!(config.chunk_size, 8192);
        assert_eq!(config.reclaim_policy(), ReclaimPolicy::Retain);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("revstore.json");
        std::fs::write(&path, r#"{ "reclaim_on_purge": true, "storage_root": "/srv/blobs" }"#).unwrap();

        let config = StoreConfig::load(&path).unwrap();
        assert!(config.reclaim_on_purge);
        assert_eq!(config.storage_root, PathBuf::from("/srv/blobs"));
        assert_eq!(config.index_path, StoreConfig::default().index_path);
        assert_eq!(config.reclaim_policy(), ReclaimPolicy::Eager);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            StoreConfig::load(&dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));

        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(StoreConfig::load(&path), Err(ConfigError::Parse { .. })));
    }
}
