//! The project-level data model: operations, changes, snapshots, chunks and
//! their provenance.

pub mod change;
pub mod chunk;
pub mod file;
pub mod operation;
pub mod origin;
pub mod snapshot;

pub use change::{Change, DocVersion};
pub use chunk::{Chunk, ChunkId, ChunkRecord, OldChunk, PendingChunk, ProjectId, SealedChunk};
pub use file::{File, FileRef};
pub use operation::Operation;
pub use origin::Origin;
pub use snapshot::{Snapshot, SnapshotRecord};
