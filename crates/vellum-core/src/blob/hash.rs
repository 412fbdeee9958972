//! Content hashing for blobs.
//!
//! A blob's hash is the hex SHA-256 of git object framing
//! (`"blob <len>\0" ++ bytes`), the same digest `git hash-object` produces in
//! a SHA-256 repository.

use sha2::{Digest, Sha256};

use crate::error::{HistoryError, Result};
use crate::ot::MAX_STRING_LENGTH;

/// Hash of the empty blob.
pub const EMPTY_BLOB_HASH: &str =
    "473a0f4c3be8a93681a267e3b1e9a7dcda1185436fe141f7749120a303721813";

const HASH_BYTES: usize = 32;

#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("blob {}\0", bytes.len()).as_bytes());
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Decode a hex hash into the binary key used by the metadata tables.
///
/// # Errors
///
/// Returns [`HistoryError::BlobNotFound`] for anything that is not a
/// well-formed hash, since no stored blob can carry it.
pub fn decode(hash: &str) -> Result<Vec<u8>> {
    hex::decode(hash)
        .ok()
        .filter(|bytes| bytes.len() == HASH_BYTES)
        .ok_or_else(|| HistoryError::BlobNotFound {
            hash: hash.to_string(),
        })
}

#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Check that `bytes` hash to `expected`.
///
/// # Errors
///
/// Returns [`HistoryError::BlobCorrupt`] on mismatch.
pub fn verify(expected: &str, bytes: &[u8]) -> Result<()> {
    let actual = hash_bytes(bytes);
    if actual == expected {
        Ok(())
    } else {
        Err(HistoryError::BlobCorrupt {
            hash: expected.to_string(),
            actual,
        })
    }
}

/// Character count when `bytes` are editable text: valid UTF-8, no NUL and
/// within [`MAX_STRING_LENGTH`]. Anything else is binary.
#[must_use]
pub fn string_length(bytes: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(bytes).ok()?;
    if text.contains('\0') {
        return None;
    }
    let chars = text.chars().count();
    if chars > MAX_STRING_LENGTH {
        return None;
    }
    u64::try_from(chars).ok()
}
