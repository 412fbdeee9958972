//! The live-chunk partition invariant.
//!
//! Live chunks of a project, ordered by start version, must start at 0, each
//! start where the previous one ended, and end with the single open chunk.

use crate::error::{HistoryError, Result};
use crate::history::{ChunkRecord, ProjectId};

/// Check `chunks` (sorted by start version) against the partition invariant.
///
/// # Errors
///
/// Returns [`HistoryError::PartitionViolation`] describing the first break.
pub fn check(project_id: ProjectId, chunks: &[ChunkRecord]) -> Result<()> {
    let violation = |detail: String| HistoryError::PartitionViolation { project_id, detail };

    let Some(first) = chunks.first() else {
        return Err(violation("no live chunks".into()));
    };
    if first.start_version != 0 {
        return Err(violation(format!(
            "first chunk {} starts at {}",
            first.id, first.start_version
        )));
    }

    for pair in chunks.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.start_version != prev.end_version {
            return Err(violation(format!(
                "chunk {} ends at {} but chunk {} starts at {}",
                prev.id, prev.end_version, next.id, next.start_version
            )));
        }
        if !prev.closed {
            return Err(violation(format!("chunk {} is open but not last", prev.id)));
        }
    }

    for chunk in chunks {
        if chunk.start_version > chunk.end_version {
            return Err(violation(format!(
                "chunk {} has inverted range [{}, {}]",
                chunk.id, chunk.start_version, chunk.end_version
            )));
        }
    }

    match chunks.last() {
        Some(last) if last.closed => Err(violation(format!("last chunk {} is closed", last.id))),
        _ => Ok(()),
    }
}
