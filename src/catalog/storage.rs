//! Physical storage collaborator.
//! ------------------------------
//! The catalog treats storage as a black box behind `StorageManager`: it
//! creates and removes file-backed objects for a given locator. The default
//! `FileStorage` implementation lays forks out under a configured root as
//! `<root>/<tablespace>/<storage_oid>.<fork>`.
//!
//! Removal is never immediate: the transaction layer records pending
//! unlinks and resolves them at commit/abort so a failed transaction leaves
//! neither orphaned files nor a live catalog entry pointing at removed
//! storage.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::typesys::Oid;
use super::relation::Persistence;
use crate::error::{CatalogError, CatalogResult};

/// Fixed page size for block-count accounting.
pub const BLOCK_SIZE: u64 = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForkId {
    /// Primary data fork.
    Main,
    /// Initialization fork; its presence tells crash recovery to reset the
    /// main fork of an unlogged relation to empty.
    Init,
}

impl ForkId {
    fn suffix(self) -> &'static str {
        match self {
            ForkId::Main => "main",
            ForkId::Init => "init",
        }
    }
}

/// Identifies one physical storage object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageLocator {
    pub tablespace: Oid,
    pub storage_oid: Oid,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage object {0} already exists")]
    AlreadyExists(Oid),
    #[error("storage object {0} does not exist")]
    Missing(Oid),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for CatalogError {
    fn from(err: StorageError) -> Self {
        CatalogError::io("storage_error".to_string(), err.to_string())
    }
}

/// Interface the catalog consumes. Implementations own partial-file cleanup
/// for failed creates; the catalog does not compensate.
pub trait StorageManager: Send + Sync {
    fn create_storage(&self, locator: StorageLocator, persistence: Persistence) -> CatalogResult<()>;
    fn create_fork(&self, locator: StorageLocator, fork: ForkId, redo_restore_required: bool) -> CatalogResult<()>;
    fn force_sync_fork(&self, locator: StorageLocator, fork: ForkId) -> CatalogResult<()>;
    /// Immediate unlink of every fork. Called by the transaction layer when
    /// a scheduled removal falls due, never directly by DDL code.
    fn unlink_storage(&self, locator: StorageLocator) -> CatalogResult<()>;
    fn truncate(&self, locator: StorageLocator, new_block_count: u64) -> CatalogResult<()>;
    fn exists(&self, locator: StorageLocator, fork: ForkId) -> bool;
}

/// File-backed storage manager rooted at a directory.
#[derive(Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).ok();
        Ok(Self { root })
    }

    pub fn root_path(&self) -> &PathBuf {
        &self.root
    }

    fn tablespace_dir(&self, tablespace: Oid) -> PathBuf {
        self.root.join(format!("ts{}", tablespace))
    }

    fn fork_path(&self, locator: StorageLocator, fork: ForkId) -> PathBuf {
        self.tablespace_dir(locator.tablespace)
            .join(format!("{}.{}", locator.storage_oid, fork.suffix()))
    }

    fn create_file(&self, path: &Path) -> Result<fs::File> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(path)
            .with_context(|| format!("creating {}", path.display()))
    }
}

impl StorageManager for FileStorage {
    fn create_storage(&self, locator: StorageLocator, persistence: Persistence) -> CatalogResult<()> {
        let path = self.fork_path(locator, ForkId::Main);
        if path.exists() {
            return Err(StorageError::AlreadyExists(locator.storage_oid).into());
        }
        debug!(storage = locator.storage_oid, ?persistence, "creating main fork");
        self.create_file(&path).map_err(CatalogError::from)?;
        Ok(())
    }

    fn create_fork(&self, locator: StorageLocator, fork: ForkId, redo_restore_required: bool) -> CatalogResult<()> {
        let path = self.fork_path(locator, fork);
        let mut f = self.create_file(&path).map_err(CatalogError::from)?;
        if redo_restore_required {
            // Marker byte so recovery can distinguish a placeholder fork
            // from an interrupted create.
            f.write_all(&[0x01]).map_err(CatalogError::from)?;
        }
        Ok(())
    }

    fn force_sync_fork(&self, locator: StorageLocator, fork: ForkId) -> CatalogResult<()> {
        let path = self.fork_path(locator, fork);
        let f = fs::OpenOptions::new()
            .read(true)
            .open(&path)
            .map_err(|_| StorageError::Missing(locator.storage_oid))?;
        f.sync_all().map_err(CatalogError::from)?;
        Ok(())
    }

    fn unlink_storage(&self, locator: StorageLocator) -> CatalogResult<()> {
        for fork in [ForkId::Main, ForkId::Init] {
            let path = self.fork_path(locator, fork);
            if path.exists() {
                debug!(storage = locator.storage_oid, fork = fork.suffix(), "unlinking fork");
                fs::remove_file(&path).map_err(CatalogError::from)?;
            }
        }
        Ok(())
    }

    fn truncate(&self, locator: StorageLocator, new_block_count: u64) -> CatalogResult<()> {
        let path = self.fork_path(locator, ForkId::Main);
        let f = fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|_| StorageError::Missing(locator.storage_oid))?;
        f.set_len(new_block_count * BLOCK_SIZE).map_err(CatalogError::from)?;
        Ok(())
    }

    fn exists(&self, locator: StorageLocator, fork: ForkId) -> bool {
        self.fork_path(locator, fork).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn loc(oid: Oid) -> StorageLocator {
        StorageLocator { tablespace: 0, storage_oid: oid }
    }

    #[test]
    fn create_then_unlink() {
        let tmp = tempdir().unwrap();
        let s = FileStorage::new(tmp.path()).unwrap();
        s.create_storage(loc(100), Persistence::Permanent).unwrap();
        assert!(s.exists(loc(100), ForkId::Main));
        // double create is refused
        assert!(s.create_storage(loc(100), Persistence::Permanent).is_err());
        s.unlink_storage(loc(100)).unwrap();
        assert!(!s.exists(loc(100), ForkId::Main));
    }

    #[test]
    fn init_fork_and_sync() {
        let tmp = tempdir().unwrap();
        let s = FileStorage::new(tmp.path()).unwrap();
        s.create_storage(loc(101), Persistence::Unlogged).unwrap();
        s.create_fork(loc(101), ForkId::Init, true).unwrap();
        assert!(s.exists(loc(101), ForkId::Init));
        s.force_sync_fork(loc(101), ForkId::Init).unwrap();
        // unlink removes every fork
        s.unlink_storage(loc(101)).unwrap();
        assert!(!s.exists(loc(101), ForkId::Init));
    }

    #[test]
    fn truncate_resets_length() {
        let tmp = tempdir().unwrap();
        let s = FileStorage::new(tmp.path()).unwrap();
        s.create_storage(loc(102), Persistence::Permanent).unwrap();
        s.truncate(loc(102), 4).unwrap();
        let meta = fs::metadata(s.root_path().join("ts0").join("102.main")).unwrap();
        assert_eq!(meta.len(), 4 * BLOCK_SIZE);
        s.truncate(loc(102), 0).unwrap();
        let meta = fs::metadata(s.root_path().join("ts0").join("102.main")).unwrap();
        assert_eq!(meta.len(), 0);
    }
}
