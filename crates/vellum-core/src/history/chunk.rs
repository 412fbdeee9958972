//! Version-ranged slices of a project's history.
//!
//! A chunk `[start, end]` holds a snapshot of the project at `start` and the
//! changes that produce versions `start + 1 ..= end`. Live chunks of a
//! project tile `[0, latest]` end to start; only the last one is open.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::change::Change;
use super::snapshot::{Snapshot, SnapshotRecord};
use crate::blob::BlobAccess;
use crate::error::{HistoryError, Result};

pub type ProjectId = i64;
pub type ChunkId = i64;

/// Metadata of a live chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    pub id: ChunkId,
    pub project_id: ProjectId,
    pub start_version: u64,
    pub end_version: u64,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub closed: bool,
}

impl ChunkRecord {
    #[must_use]
    pub const fn change_count(&self) -> u64 {
        self.end_version - self.start_version
    }

    /// Whether `version` is served by this chunk. A closed chunk hands its
    /// end version over to its successor; the open tip keeps it.
    #[must_use]
    pub const fn serves(&self, version: u64) -> bool {
        if self.closed {
            self.start_version <= version && version < self.end_version
        } else {
            self.start_version <= version && version <= self.end_version
        }
    }
}

/// A chunk assembled outside the live partition, waiting to be promoted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChunk {
    pub id: ChunkId,
    pub project_id: ProjectId,
    pub start_version: u64,
    pub end_version: u64,
    pub end_timestamp: Option<DateTime<Utc>>,
}

/// A chunk removed from the live partition, kept for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OldChunk {
    pub chunk_id: ChunkId,
    pub project_id: ProjectId,
    pub start_version: u64,
    pub end_version: u64,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub deleted_at: DateTime<Utc>,
}

/// Result of sealing: the chunk that was closed and the open chunk that
/// now follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealedChunk {
    pub closed_id: ChunkId,
    pub open_id: ChunkId,
}

/// A chunk with its base snapshot and changes, as loaded for replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub record: ChunkRecord,
    pub snapshot: SnapshotRecord,
    pub changes: Vec<Change>,
}

impl Chunk {
    /// Replay the base snapshot up to `version`.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::VersionNotFound`] when `version` lies outside
    /// the chunk, and replay errors from [`Snapshot::apply_change`].
    pub fn replay_to(&self, version: u64, blobs: &dyn BlobAccess) -> Result<Snapshot> {
        if version < self.record.start_version || version > self.record.end_version {
            return Err(HistoryError::VersionNotFound {
                requested: version,
                latest: self.record.end_version,
            });
        }
        let mut snapshot = Snapshot::from_record(self.snapshot.clone());
        let count = usize::try_from(version - self.record.start_version).unwrap_or(usize::MAX);
        for change in self.changes.iter().take(count) {
            snapshot.apply_change(change, blobs)?;
        }
        Ok(snapshot)
    }

    /// Replay every change in the chunk.
    ///
    /// # Errors
    ///
    /// As [`Self::replay_to`].
    pub fn replay(&self, blobs: &dyn BlobAccess) -> Result<Snapshot> {
        self.replay_to(self.record.end_version, blobs)
    }

    /// Timestamp at which `version` was recorded, if this chunk produced it.
    #[must_use]
    pub fn version_timestamp(&self, version: u64) -> Option<DateTime<Utc>> {
        let offset = version.checked_sub(self.record.start_version + 1)?;
        self.changes
            .get(usize::try_from(offset).ok()?)
            .map(|change| change.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::ChunkRecord;

    fn record(start: u64, end: u64, closed: bool) -> ChunkRecord {
        ChunkRecord {
            id: 1,
            project_id: 1,
            start_version: start,
            end_version: end,
            end_timestamp: None,
            closed,
        }
    }

    #[test]
    fn closed_chunk_hands_end_to_successor() {
        let chunk = record(2, 5, true);
        assert!(!chunk.serves(1));
        assert!(chunk.serves(2));
        assert!(chunk.serves(4));
        assert!(!chunk.serves(5));
        assert_eq!(chunk.change_count(), 3);
    }

    #[test]
    fn open_tip_keeps_its_end() {
        let chunk = record(5, 5, false);
        assert!(chunk.serves(5));
        assert!(!chunk.serves(6));
        assert_eq!(chunk.change_count(), 0);
    }
}
