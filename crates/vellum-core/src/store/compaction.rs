//! Chunk compaction: merging runs of small closed chunks into one.
//!
//! A merged chunk keeps the base snapshot of the first chunk in the run and
//! the concatenated changes of all of them, so every version it covers
//! replays exactly as before. The store stages the merged chunk, then retires
//! the run and promotes the replacement in one transaction.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::history::{ChunkRecord, OldChunk};

/// Chooses which closed chunks to merge.
pub trait CompactionPolicy {
    /// Index range into `closed` (sorted by start version, all contiguous)
    /// naming the run to merge, or `None` to leave the project alone.
    fn select_run(&self, closed: &[ChunkRecord]) -> Option<Range<usize>>;
}

// ---------------------------------------------------------------------------
// Size-tiered policy
// ---------------------------------------------------------------------------

/// Merge the first run of at least `min_chunks` consecutive closed chunks
/// whose combined change count stays within `max_merged_changes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeTieredPolicy {
    #[serde(default = "default_min_chunks")]
    pub min_chunks: usize,
    #[serde(default = "default_max_merged_changes")]
    pub max_merged_changes: u64,
}

const fn default_min_chunks() -> usize {
    4
}

const fn default_max_merged_changes() -> u64 {
    1000
}

impl Default for SizeTieredPolicy {
    fn default() -> Self {
        Self {
            min_chunks: default_min_chunks(),
            max_merged_changes: default_max_merged_changes(),
        }
    }
}

impl CompactionPolicy for SizeTieredPolicy {
    fn select_run(&self, closed: &[ChunkRecord]) -> Option<Range<usize>> {
        let min_chunks = self.min_chunks.max(2);
        for start in 0..closed.len() {
            let mut total = 0;
            let mut end = start;
            while end < closed.len() && total + closed[end].change_count() <= self.max_merged_changes
            {
                total += closed[end].change_count();
                end += 1;
            }
            if end - start >= min_chunks {
                return Some(start..end);
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// CompactionReport
// ---------------------------------------------------------------------------

/// Outcome of one compaction pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    /// The merged chunk now in the live partition.
    pub promoted: ChunkRecord,
    /// The chunks it replaced, now in `old_chunks`.
    pub retired: Vec<OldChunk>,
    /// Changes carried into the merged chunk.
    pub changes_merged: u64,
}
