//! Byte-level object storage behind the blob store.
//!
//! Objects are immutable and keyed by their content hash, so a backend only
//! has to make each write all-or-nothing.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::error::Result;

pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key`. Writing an existing key again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend cannot persist the object.
    fn put_object(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// # Errors
    ///
    /// Returns an error when the backend cannot be read.
    fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// # Errors
    ///
    /// Returns an error when the backend cannot be read.
    fn object_exists(&self, key: &str) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------------

/// Objects as files under `root/ab/cd/<rest-of-hash>`.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        if key.len() > 4 && key.is_ascii() {
            self.root.join(&key[..2]).join(&key[2..4]).join(&key[4..])
        } else {
            self.root.join(key)
        }
    }
}

impl ObjectStore for FsObjectStore {
    fn put_object(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        if path.exists() {
            return Ok(());
        }
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;
        // Readers must never observe a partial object.
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        debug!(key, bytes = bytes.len(), path = %path.display(), "object written");
        Ok(())
    }

    fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn object_exists(&self, key: &str) -> Result<bool> {
        Ok(self.path_for(key).is_file())
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// Process-local store for tests and simulation.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite an object in place, bypassing immutability. Only useful for
    /// exercising corruption detection.
    pub fn tamper(&self, key: &str, bytes: Vec<u8>) {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), bytes);
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put_object(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_insert_with(|| bytes.to_vec());
        Ok(())
    }

    fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn object_exists(&self, key: &str) -> Result<bool> {
        Ok(self
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::{FsObjectStore, MemoryObjectStore, ObjectStore};

    fn exercise(store: &dyn ObjectStore) {
        let key = "0123456789abcdef";
        assert!(!store.object_exists(key).expect("exists"));
        assert_eq!(store.get_object(key).expect("get"), None);
        store.put_object(key, b"first").expect("put");
        store.put_object(key, b"second").expect("put again");
        assert!(store.object_exists(key).expect("exists"));
        assert_eq!(store.get_object(key).expect("get"), Some(b"first".to_vec()));
    }

    #[test]
    fn memory_store_is_write_once() {
        let store = MemoryObjectStore::new();
        exercise(&store);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn fs_store_is_write_once_and_sharded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsObjectStore::open(dir.path().join("objects")).expect("open");
        exercise(&store);
        assert!(store.root().join("01").join("23").join("456789abcdef").is_file());
    }
}
