//! Content-addressed, deduplicated file content.

pub mod hash;
pub mod object_store;
pub mod store;

use serde::{Deserialize, Serialize};

pub use hash::{EMPTY_BLOB_HASH, hash_bytes};
pub use object_store::{FsObjectStore, MemoryObjectStore, ObjectStore};
pub use store::BlobStore;

use crate::error::Result;

/// Metadata of stored content. Lengths are fixed when the blob is first
/// written and never recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub hash: String,
    pub byte_length: u64,
    pub string_length: Option<u64>,
}

impl Blob {
    /// Describe `bytes` without storing them.
    #[must_use]
    pub fn describe(bytes: &[u8]) -> Self {
        Self {
            hash: hash_bytes(bytes),
            byte_length: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
            string_length: hash::string_length(bytes),
        }
    }

    #[must_use]
    pub const fn is_text(&self) -> bool {
        self.string_length.is_some()
    }
}

/// Read and write access to blob content, as needed by snapshot replay.
pub trait BlobAccess {
    /// # Errors
    ///
    /// Returns [`crate::HistoryError::BlobNotFound`] for unknown hashes.
    fn read_blob(&self, hash: &str) -> Result<Vec<u8>>;

    /// # Errors
    ///
    /// Returns an error when the content cannot be persisted.
    fn write_blob(&self, bytes: &[u8]) -> Result<Blob>;
}
