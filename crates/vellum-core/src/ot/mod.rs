//! Text operations and the annotated text they apply to.
//!
//! All lengths and positions count Unicode scalar values.

pub mod comments;
pub mod file_data;
pub mod range;
pub mod scan_op;
pub mod text_operation;
pub mod tracked_changes;
pub mod tracking;

pub use comments::{Comment, CommentList};
pub use file_data::{RangesData, StringFileData};
pub use range::Range;
pub use scan_op::{InsertOp, RetainOp, ScanOp};
pub use text_operation::TextOperation;
pub use tracked_changes::{TrackedChange, TrackedChangeList};
pub use tracking::{TrackingDirective, TrackingProps, TrackingType};

/// Longest text, in characters, an operation may produce.
pub const MAX_STRING_LENGTH: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    #[error("operation expects a base of {expected} characters but the text has {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error(
        "cannot compose: first operation produces {first_target} characters, second expects {second_base}"
    )]
    IncompatibleLengths {
        first_target: usize,
        second_base: usize,
    },

    #[error("result would be {length} characters, limit is {limit}")]
    TooLong { length: usize, limit: usize },

    #[error("invalid raw operation: {0}")]
    InvalidRaw(String),

    #[error("out of range: {0}")]
    OutOfRange(String),
}
