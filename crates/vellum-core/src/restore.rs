//! Restoring earlier content as new, provenance-tagged changes.
//!
//! A restore never rewrites history: it computes operations that turn the
//! current files back into the target version's files and appends them
//! through [`HistoryWriter`], retrying on conflicts like any other writer.

use tracing::info;

use crate::assembler::HistoryAssembler;
use crate::blob::{BlobAccess, BlobStore};
use crate::error::{HistoryError, Result};
use crate::history::{Change, File, Operation, Origin, ProjectId, Snapshot};
use crate::ot::TextOperation;
use crate::store::ChunkStore;
use crate::timestamp;
use crate::writer::HistoryWriter;

#[derive(Clone, Copy)]
pub struct RestoreManager<'a> {
    chunks: ChunkStore<'a>,
    blobs: BlobStore<'a>,
    writer: HistoryWriter<'a>,
}

impl<'a> RestoreManager<'a> {
    #[must_use]
    pub const fn new(chunks: ChunkStore<'a>, blobs: BlobStore<'a>, writer: HistoryWriter<'a>) -> Self {
        Self {
            chunks,
            blobs,
            writer,
        }
    }

    /// Bring `pathname` back to its content at `target_version`.
    ///
    /// # Errors
    ///
    /// - [`HistoryError::VersionNotFound`] beyond the latest version
    /// - [`HistoryError::InvalidChange`] if the file did not exist at
    ///   `target_version`
    /// - [`HistoryError::VersionConflict`] once retries are exhausted
    pub fn restore_file(
        &self,
        project_id: ProjectId,
        pathname: &str,
        target_version: u64,
        user_id: Option<&str>,
    ) -> Result<Change> {
        let target = self.target_snapshot(project_id, target_version)?;
        let target_file = target.get(pathname).ok_or_else(|| {
            HistoryError::InvalidChange(format!(
                "no file at {pathname} in version {target_version}"
            ))
        })?;
        let origin = Origin::restore_file(
            target_version,
            pathname,
            self.chunks.version_timestamp(project_id, target_version)?,
        );

        let change = self.append(project_id, origin, user_id, |current| {
            file_operations(pathname, target_file, current.get(pathname), &self.blobs)
        })?;
        info!(project_id, pathname, target_version, "file restored");
        Ok(change)
    }

    /// Bring every file back to its state at `target_version`, removing files
    /// created since.
    ///
    /// # Errors
    ///
    /// As [`Self::restore_file`], except that no file must exist.
    pub fn restore_project(
        &self,
        project_id: ProjectId,
        target_version: u64,
        user_id: Option<&str>,
    ) -> Result<Change> {
        let target = self.target_snapshot(project_id, target_version)?;
        let origin = Origin::restore_project(
            target_version,
            self.chunks.version_timestamp(project_id, target_version)?,
        );

        let change = self.append(project_id, origin, user_id, |current| {
            let mut operations: Vec<Operation> = current
                .paths()
                .filter(|path| !target.contains(path))
                .map(Operation::remove)
                .collect();
            for (path, file) in target.files() {
                operations.extend(file_operations(path, file, current.get(path), &self.blobs)?);
            }
            Ok(operations)
        })?;
        info!(project_id, target_version, "project restored");
        Ok(change)
    }

    fn target_snapshot(&self, project_id: ProjectId, version: u64) -> Result<Snapshot> {
        HistoryAssembler::new(self.chunks, self.blobs).get_snapshot_at(project_id, version)
    }

    /// Append one change carrying `origin`, built against the current tip.
    /// The change is appended even when it has no operations.
    fn append<F>(
        &self,
        project_id: ProjectId,
        origin: Origin,
        user_id: Option<&str>,
        mut operations: F,
    ) -> Result<Change>
    where
        F: FnMut(&Snapshot) -> Result<Vec<Operation>>,
    {
        let mut appended = None;
        self.writer.append_with_retry(project_id, |current, _| {
            let change = Change::new(operations(current)?, timestamp::now())
                .with_origin(origin.clone())
                .with_author(user_id.map(str::to_string));
            appended = Some(change.clone());
            Ok(vec![change])
        })?;
        appended.ok_or_else(|| HistoryError::InvalidChange("restore built no change".into()))
    }
}

/// Operations turning `current` (absent when `None`) into `target`.
fn file_operations(
    pathname: &str,
    target: &File,
    current: Option<&File>,
    blobs: &dyn BlobAccess,
) -> Result<Vec<Operation>> {
    let Some(current) = current else {
        return Ok(vec![Operation::add(pathname, target.store(blobs)?)]);
    };

    let mut operations = Vec::new();
    if target.is_text() && current.is_text() {
        let before = current.text(blobs)?;
        let after = target.text(blobs)?;
        let edit = TextOperation::diff(before.content(), after.content());
        if !edit.is_noop() {
            operations.push(Operation::edit(pathname, edit));
        }
    } else {
        let (before, after) = (current.store(blobs)?, target.store(blobs)?);
        if before.hash != after.hash || before.is_text() != after.is_text() {
            operations.push(Operation::remove(pathname));
            operations.push(Operation::add(pathname, after));
            return Ok(operations);
        }
    }

    if let Some(metadata) = target.metadata()
        && current.metadata() != Some(metadata)
    {
        operations.push(Operation::SetFileMetadata {
            pathname: pathname.to_string(),
            metadata: metadata.clone(),
        });
    }
    Ok(operations)
}
