//! The file set of a project at one version, and the replay rules that move
//! it forward.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::change::Change;
use super::file::{File, FileRef};
use super::operation::Operation;
use crate::blob::BlobAccess;
use crate::error::{HistoryError, Result};
use crate::ot::StringFileData;

/// Persisted form of a snapshot: every file by reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub files: BTreeMap<String, FileRef>,
}

impl SnapshotRecord {
    /// Every blob the record needs to be loadable.
    pub fn blob_hashes(&self) -> impl Iterator<Item = &str> {
        self.files.values().flat_map(FileRef::hashes)
    }
}

/// A replayable file set. Text files are loaded from blobs the first time an
/// edit touches them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    files: BTreeMap<String, File>,
}

impl Snapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_record(record: SnapshotRecord) -> Self {
        Self {
            files: record
                .files
                .into_iter()
                .map(|(path, file)| (path, File::Stored(file)))
                .collect(),
        }
    }

    #[must_use]
    pub fn get(&self, pathname: &str) -> Option<&File> {
        self.files.get(pathname)
    }

    #[must_use]
    pub fn contains(&self, pathname: &str) -> bool {
        self.files.contains_key(pathname)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, &File)> {
        self.files.iter().map(|(path, file)| (path.as_str(), file))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Text of a file with its annotations.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::InvalidChange`] when the path does not exist
    /// and blob errors when content cannot be read.
    pub fn text(&self, pathname: &str, blobs: &dyn BlobAccess) -> Result<StringFileData> {
        self.existing(pathname)?.text(blobs)
    }

    /// Raw bytes of a file.
    ///
    /// # Errors
    ///
    /// As [`Self::text`].
    pub fn bytes(&self, pathname: &str, blobs: &dyn BlobAccess) -> Result<Vec<u8>> {
        self.existing(pathname)?.bytes(blobs)
    }

    /// Apply every operation of `change` in order.
    ///
    /// On error the snapshot may be partially updated; callers replay into a
    /// copy when they need all-or-nothing.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::InvalidChange`] when an operation names a
    /// missing file (or adds over an existing one), and operation errors when
    /// a text edit does not fit the file.
    pub fn apply_change(&mut self, change: &Change, blobs: &dyn BlobAccess) -> Result<()> {
        for operation in &change.operations {
            self.apply_operation(operation, blobs)?;
        }
        Ok(())
    }

    fn apply_operation(&mut self, operation: &Operation, blobs: &dyn BlobAccess) -> Result<()> {
        trace!(pathname = operation.pathname(), "apply operation");
        match operation {
            Operation::TextEdit {
                pathname,
                operation,
            } => {
                let file = self.existing_mut(pathname)?;
                if !file.is_text() {
                    return Err(HistoryError::InvalidChange(format!(
                        "text edit on binary file {pathname}"
                    )));
                }
                operation.apply(file.text_mut(blobs)?)?;
            }
            Operation::AddFile { pathname, file } => {
                if self.contains(pathname) {
                    return Err(HistoryError::InvalidChange(format!(
                        "file {pathname} already exists"
                    )));
                }
                self.files.insert(pathname.clone(), File::Stored(file.clone()));
            }
            Operation::RemoveFile { pathname } => {
                if self.files.remove(pathname).is_none() {
                    return Err(missing(pathname));
                }
            }
            Operation::RenameFile {
                pathname,
                new_pathname,
            } => {
                if self.contains(new_pathname) {
                    return Err(HistoryError::InvalidChange(format!(
                        "rename target {new_pathname} already exists"
                    )));
                }
                let file = self.files.remove(pathname).ok_or_else(|| missing(pathname))?;
                self.files.insert(new_pathname.clone(), file);
            }
            Operation::SetFileMetadata { pathname, metadata } => {
                self.existing_mut(pathname)?.set_metadata(metadata.clone());
            }
        }
        Ok(())
    }

    /// Persist loaded files and return the all-reference form.
    ///
    /// # Errors
    ///
    /// Returns blob errors when content cannot be written.
    pub fn store(&self, blobs: &dyn BlobAccess) -> Result<SnapshotRecord> {
        let mut files = BTreeMap::new();
        for (path, file) in &self.files {
            files.insert(path.clone(), file.store(blobs)?);
        }
        Ok(SnapshotRecord { files })
    }

    fn existing(&self, pathname: &str) -> Result<&File> {
        self.files.get(pathname).ok_or_else(|| missing(pathname))
    }

    fn existing_mut(&mut self, pathname: &str) -> Result<&mut File> {
        self.files.get_mut(pathname).ok_or_else(|| missing(pathname))
    }
}

fn missing(pathname: &str) -> HistoryError {
    HistoryError::InvalidChange(format!("no file at {pathname}"))
}
