//! Runtime store: the on-disk directory tree under
//! [`RuntimeConfig::root`] holding one subdirectory per container, and the
//! primitives for creating, loading, and removing those directories with
//! the exclusivity guarantees `create`/`delete` depend on.
//!
//! State is persisted per container directory rather than held only in
//! memory, so a separate `lxcri` invocation can load a container's record
//! back for `state`/`kill`/`delete` without the process that ran `create`
//! still being alive.

use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};

const STATE_FILE: &str = "lxcri.json";

/// A handle onto the on-disk store rooted at `root`.
#[derive(Clone, Debug)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Store { root: root.into() }
    }

    pub fn container_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Create a fresh, empty container directory. Fails with
    /// [`Error::AlreadyExists`] if one already exists for `id`, making this
    /// the sole place `create`'s "container id already exists" precondition
    /// is enforced against concurrent creators of the same id.
    pub fn create_dir(&self, id: &str) -> Result<PathBuf> {
        let dir = self.container_dir(id);
        match DirBuilder::new().mode(0o700).create(&dir) {
            Ok(()) => Ok(dir),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::AlreadyExists(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist `value` as `lxcri.json` in the container's directory.
    ///
    /// Writes to a temporary sibling file created with `O_EXCL` and renames
    /// it into place, so a reader never observes a partially written state
    /// file.
    pub fn write_state<T: Serialize>(&self, id: &str, value: &T) -> Result<()> {
        let dir = self.container_dir(id);
        let final_path = dir.join(STATE_FILE);
        let tmp_path = dir.join(format!(".{}.tmp", STATE_FILE));

        // Clear any stale temp file left by a previous failed write before
        // recreating it exclusively.
        let _ = fs::remove_file(&tmp_path);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&tmp_path)?;
        let json = serde_json::to_vec_pretty(value)?;
        file.write_all(&json)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    /// Load the persisted state for `id`, or [`Error::NotExist`] if there is
    /// none.
    pub fn load_state<T: DeserializeOwned>(&self, id: &str) -> Result<T> {
        let path = self.container_dir(id).join(STATE_FILE);
        match File::open(&path) {
            Ok(file) => Ok(serde_json::from_reader(file)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotExist(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// List every container id currently present in the store.
    pub fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(name.to_string());
                }
            }
        }
        Ok(ids)
    }

    /// Remove a container's directory entirely. Tolerates the directory
    /// already being gone, since `delete` is expected to be idempotent
    /// against a partially-cleaned-up container.
    pub fn remove_dir(&self, id: &str) -> Result<()> {
        let dir = self.container_dir(id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, id: &str) -> bool {
        self.container_dir(id).is_dir()
    }
}

/// Ensure the store root itself exists, creating it (and its parents) with
/// restrictive permissions if necessary.
pub fn ensure_root(root: &Path) -> Result<()> {
    fs::create_dir_all(root)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Dummy {
        value: u32,
    }

    #[test]
    fn create_dir_rejects_duplicate_id() {
        let root = tempdir().unwrap();
        let store = Store::new(root.path());
        store.create_dir("c1").unwrap();
        let err = store.create_dir("c1").unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn write_and_load_state_roundtrips() {
        let root = tempdir().unwrap();
        let store = Store::new(root.path());
        store.create_dir("c1").unwrap();
        store.write_state("c1", &Dummy { value: 42 }).unwrap();
        let loaded: Dummy = store.load_state("c1").unwrap();
        assert_eq!(loaded, Dummy { value: 42 });
    }

    #[test]
    fn load_state_missing_container_is_not_exist() {
        let root = tempdir().unwrap();
        let store = Store::new(root.path());
        let err = store.load_state::<Dummy>("missing").unwrap_err();
        assert!(matches!(err, Error::NotExist(_)));
    }

    #[test]
    fn remove_dir_is_idempotent() {
        let root = tempdir().unwrap();
        let store = Store::new(root.path());
        store.create_dir("c1").unwrap();
        store.remove_dir("c1").unwrap();
        store.remove_dir("c1").unwrap();
        assert!(!store.exists("c1"));
    }

    #[test]
    fn list_ids_reflects_created_containers() {
        let root = tempdir().unwrap();
        let store = Store::new(root.path());
        store.create_dir("c1").unwrap();
        store.create_dir("c2").unwrap();
        let mut ids = store.list_ids().unwrap();
        ids.sort();
        assert_eq!(ids, vec!["c1".to_string(), "c2".to_string()]);
    }
}
