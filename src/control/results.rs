use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::common::error::validate_component;
use crate::common::{Result, VaultError};
use crate::storage::remove_if_exists;

/// Request results pushed by workers, one file per result id.
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, id: &str) -> Result<PathBuf> {
        validate_component(id)?;
        Ok(self.dir.join(id))
    }

    pub fn write(&self, id: &str, blob: &[u8]) -> Result<()> {
        let path = self.path_of(id)?;
        fs::write(&path, blob)?;
        debug!(id, len = blob.len(), "result stored");
        Ok(())
    }

    pub fn read(&self, id: &str) -> Result<Vec<u8>> {
        let path = self.path_of(id)?;
        fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => VaultError::not_found(format!("result '{}'", id)),
            _ => VaultError::Io(e),
        })
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        let path = self.path_of(id)?;
        if !path.exists() {
            return Err(VaultError::not_found(format!("result '{}'", id)));
        }
        remove_if_exists(&path)
    }

    /// Ids of all stored results, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
