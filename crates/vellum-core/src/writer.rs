//! The validated append path.
//!
//! Changes are checked against the replayed tip before anything is stored,
//! so an edit that does not fit the current content never reaches the
//! database. Appends that lose a race are retried by rebuilding the changes
//! against the new tip.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::blob::BlobStore;
use crate::config::HistoryConfig;
use crate::error::{HistoryError, Result};
use crate::history::{Change, Chunk, ProjectId, SealedChunk, Snapshot};
use crate::store::ChunkStore;

/// What an append did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Version after the last appended change.
    pub version: u64,
    /// Set when the append filled the open chunk and it was sealed.
    pub sealed: Option<SealedChunk>,
}

#[derive(Clone, Copy)]
pub struct HistoryWriter<'a> {
    chunks: ChunkStore<'a>,
    blobs: BlobStore<'a>,
    config: &'a HistoryConfig,
}

impl<'a> HistoryWriter<'a> {
    #[must_use]
    pub const fn new(chunks: ChunkStore<'a>, blobs: BlobStore<'a>, config: &'a HistoryConfig) -> Self {
        Self {
            chunks,
            blobs,
            config,
        }
    }

    /// Append `changes` on top of `expected_end_version`.
    ///
    /// # Errors
    ///
    /// - [`HistoryError::VersionConflict`] if the tip is no longer
    ///   `expected_end_version`
    /// - operation and [`HistoryError::InvalidChange`] errors if a change does
    ///   not apply to the current files
    pub fn persist_changes(
        &self,
        project_id: ProjectId,
        expected_end_version: u64,
        changes: &[Change],
    ) -> Result<AppendOutcome> {
        let tip = self.chunks.load_latest(project_id)?;
        if tip.record.end_version != expected_end_version {
            return Err(HistoryError::VersionConflict {
                expected: expected_end_version,
                actual: tip.record.end_version,
            });
        }
        let snapshot = tip.replay(&self.blobs)?;
        self.persist_onto(project_id, &tip, snapshot, changes)
    }

    /// Build changes against the current tip with `build` and append them,
    /// rebuilding and retrying when another writer gets there first.
    ///
    /// `build` receives the tip's file set and version; it may run more than
    /// once.
    ///
    /// # Errors
    ///
    /// Returns the last [`HistoryError::VersionConflict`] once retries are
    /// exhausted, and any other error immediately.
    pub fn append_with_retry<F>(&self, project_id: ProjectId, mut build: F) -> Result<AppendOutcome>
    where
        F: FnMut(&Snapshot, u64) -> Result<Vec<Change>>,
    {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let tip = self.chunks.load_latest(project_id)?;
            let snapshot = tip.replay(&self.blobs)?;
            let changes = build(&snapshot, tip.record.end_version)?;

            match self.persist_onto(project_id, &tip, snapshot, &changes) {
                Err(error) if error.is_retryable() && attempt < retry.max_attempts => {
                    let backoff = retry.backoff_ms(attempt);
                    warn!(project_id, attempt, backoff_ms = backoff, %error, "append conflict, retrying");
                    thread::sleep(Duration::from_millis(backoff));
                }
                outcome => return outcome,
            }
        }
    }

    /// Seal the open chunk now if it holds any changes.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::VersionConflict`] if another writer moved the
    /// tip while the snapshot was being stored.
    pub fn seal(&self, project_id: ProjectId) -> Result<Option<SealedChunk>> {
        let tip = self.chunks.load_latest(project_id)?;
        if tip.record.change_count() == 0 {
            return Ok(None);
        }
        let snapshot = tip.replay(&self.blobs)?;
        self.seal_at(project_id, &tip, tip.record.end_version, &snapshot)
            .map(Some)
    }

    fn persist_onto(
        &self,
        project_id: ProjectId,
        tip: &Chunk,
        mut snapshot: Snapshot,
        changes: &[Change],
    ) -> Result<AppendOutcome> {
        for change in changes {
            snapshot.apply_change(change, &self.blobs)?;
        }
        let version = self
            .chunks
            .append_to_pending(project_id, tip.record.end_version, changes)?;
        debug!(project_id, version, changes = changes.len(), "changes persisted");

        let filled = version - tip.record.start_version >= self.config.chunking.max_changes_per_chunk;
        let sealed = if filled {
            // The append is committed; a failed seal is left for the next writer.
            match self.seal_at(project_id, tip, version, &snapshot) {
                Ok(sealed) => Some(sealed),
                Err(error) => {
                    warn!(project_id, version, %error, "seal after append failed");
                    None
                }
            }
        } else {
            None
        };
        Ok(AppendOutcome { version, sealed })
    }

    fn seal_at(
        &self,
        project_id: ProjectId,
        tip: &Chunk,
        end_version: u64,
        snapshot: &Snapshot,
    ) -> Result<SealedChunk> {
        let record = snapshot.store(&self.blobs)?;
        let sealed = self
            .chunks
            .seal_chunk(project_id, tip.record.id, end_version, &record)?;
        info!(project_id, closed_id = sealed.closed_id, end_version, "open chunk full, sealed");
        Ok(sealed)
    }
}
