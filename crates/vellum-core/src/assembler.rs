//! Rebuilding project state at any version.
//!
//! A read locates the live chunk serving the version, starts from its base
//! snapshot and replays its changes in version order. Text content is only
//! loaded from the blob store for files an edit touches.

use std::collections::BTreeMap;
use std::io::{Seek, Write};

use tracing::{debug, instrument};
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use crate::blob::BlobStore;
use crate::error::{HistoryError, Result};
use crate::history::{Change, File, ProjectId, Snapshot};
use crate::store::ChunkStore;

#[derive(Clone, Copy)]
pub struct HistoryAssembler<'a> {
    chunks: ChunkStore<'a>,
    blobs: BlobStore<'a>,
}

impl<'a> HistoryAssembler<'a> {
    #[must_use]
    pub const fn new(chunks: ChunkStore<'a>, blobs: BlobStore<'a>) -> Self {
        Self { chunks, blobs }
    }

    /// The project's file set at `version`.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::VersionNotFound`] beyond the latest version,
    /// and replay or blob errors for damaged history.
    #[instrument(level = "debug", skip(self))]
    pub fn get_snapshot_at(&self, project_id: ProjectId, version: u64) -> Result<Snapshot> {
        let chunk = self.chunks.load_at_version(project_id, version)?;
        debug!(
            chunk_id = chunk.record.id,
            start = chunk.record.start_version,
            replayed = version - chunk.record.start_version,
            "replaying chunk"
        );
        chunk.replay_to(version, &self.blobs)
    }

    /// The latest version and the file set at it.
    ///
    /// # Errors
    ///
    /// As [`Self::get_snapshot_at`].
    pub fn get_latest_snapshot(&self, project_id: ProjectId) -> Result<(u64, Snapshot)> {
        let chunk = self.chunks.load_latest(project_id)?;
        let snapshot = chunk.replay(&self.blobs)?;
        Ok((chunk.record.end_version, snapshot))
    }

    /// A single file at `version`, or `None` if it did not exist then.
    ///
    /// # Errors
    ///
    /// As [`Self::get_snapshot_at`].
    pub fn get_file_at(
        &self,
        project_id: ProjectId,
        pathname: &str,
        version: u64,
    ) -> Result<Option<File>> {
        Ok(self
            .get_snapshot_at(project_id, version)?
            .get(pathname)
            .cloned())
    }

    /// Bytes of a file at `version`, or `None` if it did not exist then.
    ///
    /// # Errors
    ///
    /// As [`Self::get_snapshot_at`].
    pub fn get_file_content_at(
        &self,
        project_id: ProjectId,
        pathname: &str,
        version: u64,
    ) -> Result<Option<Vec<u8>>> {
        self.get_file_at(project_id, pathname, version)?
            .map(|file| file.bytes(&self.blobs))
            .transpose()
    }

    /// Changes producing versions `from + 1 ..= to`.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::VersionNotFound`] if `to` is beyond the latest
    /// version and [`HistoryError::InvalidChange`] if `from > to`.
    pub fn get_changes(&self, project_id: ProjectId, from: u64, to: u64) -> Result<Vec<Change>> {
        if from > to {
            return Err(HistoryError::InvalidChange(format!(
                "empty version range {from}..{to}"
            )));
        }
        self.chunks.load_changes(project_id, from, to)
    }

    /// Every file's bytes at `version`, keyed by path.
    ///
    /// # Errors
    ///
    /// As [`Self::get_snapshot_at`].
    pub fn export_full_content(
        &self,
        project_id: ProjectId,
        version: u64,
    ) -> Result<BTreeMap<String, Vec<u8>>> {
        let snapshot = self.get_snapshot_at(project_id, version)?;
        let mut content = BTreeMap::new();
        for (path, file) in snapshot.files() {
            content.insert(path.to_string(), file.bytes(&self.blobs)?);
        }
        Ok(content)
    }

    /// Write the project at `version` as a deflated zip archive. Returns the
    /// number of files written.
    ///
    /// # Errors
    ///
    /// As [`Self::get_snapshot_at`], plus archive and I/O errors from `out`.
    #[instrument(level = "debug", skip(self, out))]
    pub fn export_zip<W: Write + Seek>(
        &self,
        project_id: ProjectId,
        version: u64,
        out: W,
    ) -> Result<usize> {
        let content = self.export_full_content(project_id, version)?;
        let mut zip = zip::ZipWriter::new(out);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (path, bytes) in &content {
            zip.start_file(path.as_str(), options)?;
            zip.write_all(bytes)?;
        }
        zip.finish()?;
        debug!(files = content.len(), "zip export written");
        Ok(content.len())
    }
}
