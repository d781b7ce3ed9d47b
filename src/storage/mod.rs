//! On-disk layout for the vector store
//!
//! `<data_dir>/metadata.sqlite` holds the authoritative rows; `<data_dir>/index/`
//! holds the dumped ANN graph, which can always be rebuilt from the rows.

pub mod database;

use crate::error::{DocseekError, Result};
use std::path::{Path, PathBuf};

pub use database::{Database, DbPool};

/// Paths used by one store instance
#[derive(Debug, Clone)]
pub struct StorageLayout {
    base_path: PathBuf,
}

impl StorageLayout {
    /// Create the directory structure under `base_path`
    pub fn create(base_path: PathBuf) -> Result<Self> {
        let layout = Self { base_path };
        let index_dir = layout.index_dir();
        std::fs::create_dir_all(&index_dir).map_err(|e| {
            DocseekError::io(
                e,
                format!("Failed to create index directory: {}", index_dir.display()),
            )
        })?;
        Ok(layout)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn database_path(&self) -> PathBuf {
        self.base_path.join("metadata.sqlite")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.base_path.join("index")
    }

    /// Total bytes on disk, recursively
    pub fn disk_usage(&self) -> Result<u64> {
        Self::dir_size(&self.base_path)
    }

    fn dir_size(path: &Path) -> Result<u64> {
        let mut size = 0u64;
        let entries = std::fs::read_dir(path).map_err(|e| {
            DocseekError::io(e, format!("Failed to read directory: {}", path.display()))
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| DocseekError::io(e, "Failed to read directory entry"))?;
            let metadata = entry
                .metadata()
                .map_err(|e| DocseekError::io(e, "Failed to read file metadata"))?;
            if metadata.is_dir() {
                size += Self::dir_size(&entry.path())?;
            } else {
                size += metadata.len();
            }
        }
        Ok(size)
    }
}
