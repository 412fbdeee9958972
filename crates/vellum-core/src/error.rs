use std::fmt;

use crate::ot::OperationError;

/// Machine-readable error codes for callers that branch on failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    LengthMismatch,
    IncompatibleLengths,
    TextTooLong,
    InvalidOperation,
    InvalidChange,
    VersionConflict,
    VersionNotFound,
    ProjectNotFound,
    ChunkNotFound,
    EmptyChunk,
    ChunkStillOpen,
    NoReplacement,
    PartitionViolation,
    BlobNotFound,
    BlobCorrupt,
    MissingBlob,
    BlobNotText,
    CorruptChange,
    StorageFailure,
    IoFailure,
    SerializationFailure,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::LengthMismatch => "E1001",
            Self::IncompatibleLengths => "E1002",
            Self::TextTooLong => "E1003",
            Self::InvalidOperation => "E1004",
            Self::InvalidChange => "E1005",
            Self::VersionConflict => "E2001",
            Self::VersionNotFound => "E2002",
            Self::ProjectNotFound => "E2003",
            Self::ChunkNotFound => "E2004",
            Self::EmptyChunk => "E2005",
            Self::ChunkStillOpen => "E2006",
            Self::NoReplacement => "E2007",
            Self::PartitionViolation => "E2008",
            Self::BlobNotFound => "E3001",
            Self::BlobCorrupt => "E3002",
            Self::MissingBlob => "E3003",
            Self::CorruptChange => "E3004",
            Self::BlobNotText => "E3005",
            Self::StorageFailure => "E5001",
            Self::IoFailure => "E5002",
            Self::SerializationFailure => "E5003",
        }
    }

    /// Short human-facing summary for logs.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::LengthMismatch => "Operation length does not match document",
            Self::IncompatibleLengths => "Operations cannot be composed",
            Self::TextTooLong => "Resulting text exceeds the size limit",
            Self::InvalidOperation => "Malformed operation",
            Self::InvalidChange => "Change cannot be applied to the snapshot",
            Self::VersionConflict => "Concurrent append advanced the project",
            Self::VersionNotFound => "Version not found",
            Self::ProjectNotFound => "Project not found",
            Self::ChunkNotFound => "Chunk not found",
            Self::EmptyChunk => "Chunk has no changes",
            Self::ChunkStillOpen => "Chunk is still open",
            Self::NoReplacement => "No staged replacement chunk",
            Self::PartitionViolation => "Chunk partition violated",
            Self::BlobNotFound => "Blob not found",
            Self::BlobCorrupt => "Blob content does not match its hash",
            Self::MissingBlob => "Change references a blob that is not stored",
            Self::CorruptChange => "Stored change failed its integrity check",
            Self::BlobNotText => "Blob is not valid text",
            Self::StorageFailure => "Storage failure",
            Self::IoFailure => "I/O failure",
            Self::SerializationFailure => "Serialization failure",
        }
    }

    /// Optional remediation hint.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::LengthMismatch | Self::IncompatibleLengths => {
                Some("Rebuild the operation against the current document content.")
            }
            Self::TextTooLong => Some("Split the document or store it as a binary file."),
            Self::VersionConflict => Some("Reload the latest chunk and reapply the change."),
            Self::EmptyChunk => Some("Append at least one change before sealing."),
            Self::ChunkStillOpen => Some("Seal the chunk before retiring it."),
            Self::NoReplacement => {
                Some("Stage a replacement chunk covering the same version range first.")
            }
            Self::MissingBlob => Some("Store file content in the blob store before appending."),
            Self::BlobCorrupt | Self::CorruptChange => {
                Some("Restore the affected object from a backup.")
            }
            Self::StorageFailure | Self::IoFailure => {
                Some("Check disk space and permissions, then retry.")
            }
            Self::InvalidOperation
            | Self::InvalidChange
            | Self::VersionNotFound
            | Self::ProjectNotFound
            | Self::ChunkNotFound
            | Self::PartitionViolation
            | Self::BlobNotFound
            | Self::BlobNotText
            | Self::SerializationFailure => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Every failure the history engine reports.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error("invalid change: {0}")]
    InvalidChange(String),

    /// The open chunk no longer ends where the writer expected.
    #[error("version conflict: expected end version {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error("version {requested} not found (latest is {latest})")]
    VersionNotFound { requested: u64, latest: u64 },

    #[error("project {0} not found")]
    ProjectNotFound(i64),

    #[error("chunk {0} not found")]
    ChunkNotFound(i64),

    #[error("chunk {0} has no changes to seal")]
    EmptyChunk(i64),

    #[error("chunk {0} is still open")]
    ChunkStillOpen(i64),

    #[error("no staged replacement covers chunk {0}")]
    NoReplacement(i64),

    #[error("chunk partition violated for project {project_id}: {detail}")]
    PartitionViolation { project_id: i64, detail: String },

    #[error("blob {hash} not found")]
    BlobNotFound { hash: String },

    #[error("blob {hash} is corrupt: content hashes to {actual}")]
    BlobCorrupt { hash: String, actual: String },

    #[error("change references blob {hash} which is not stored")]
    MissingBlob { hash: String },

    #[error("blob {hash} is not valid text")]
    BlobNotText { hash: String },

    #[error("change {version} in chunk {chunk_id} failed its integrity check")]
    CorruptChange { chunk_id: i64, version: u64 },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl HistoryError {
    /// Map this error to its stable [`ErrorCode`].
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Operation(inner) => match inner {
                OperationError::LengthMismatch { .. } => ErrorCode::LengthMismatch,
                OperationError::IncompatibleLengths { .. } => ErrorCode::IncompatibleLengths,
                OperationError::TooLong { .. } => ErrorCode::TextTooLong,
                OperationError::InvalidRaw(_) | OperationError::OutOfRange(_) => {
                    ErrorCode::InvalidOperation
                }
            },
            Self::InvalidChange(_) => ErrorCode::InvalidChange,
            Self::VersionConflict { .. } => ErrorCode::VersionConflict,
            Self::VersionNotFound { .. } => ErrorCode::VersionNotFound,
            Self::ProjectNotFound(_) => ErrorCode::ProjectNotFound,
            Self::ChunkNotFound(_) => ErrorCode::ChunkNotFound,
            Self::EmptyChunk(_) => ErrorCode::EmptyChunk,
            Self::ChunkStillOpen(_) => ErrorCode::ChunkStillOpen,
            Self::NoReplacement(_) => ErrorCode::NoReplacement,
            Self::PartitionViolation { .. } => ErrorCode::PartitionViolation,
            Self::BlobNotFound { .. } => ErrorCode::BlobNotFound,
            Self::BlobCorrupt { .. } => ErrorCode::BlobCorrupt,
            Self::MissingBlob { .. } => ErrorCode::MissingBlob,
            Self::BlobNotText { .. } => ErrorCode::BlobNotText,
            Self::CorruptChange { .. } => ErrorCode::CorruptChange,
            Self::Storage(_) => ErrorCode::StorageFailure,
            Self::Io(_) | Self::Archive(_) => ErrorCode::IoFailure,
            Self::Serialization(_) => ErrorCode::SerializationFailure,
        }
    }

    /// Only a lost append race is worth retrying; everything else either
    /// indicates a caller bug or a storage fault that may have partially
    /// written.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, HistoryError>;
