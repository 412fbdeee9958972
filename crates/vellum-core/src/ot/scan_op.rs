//! The three step kinds a [`TextOperation`](super::TextOperation) is built from.

use serde_json::{Map, Value};

use super::{MAX_STRING_LENGTH, OperationError};
use super::tracking::{TrackingDirective, TrackingProps};

/// Keep `length` characters, optionally changing their tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainOp {
    pub length: usize,
    pub tracking: TrackingDirective,
}

/// Insert text, optionally tracked and attached to comment threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertOp {
    pub text: String,
    pub tracking: Option<TrackingProps>,
    pub comment_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOp {
    Retain(RetainOp),
    Insert(InsertOp),
    Remove(usize),
}

impl RetainOp {
    #[must_use]
    pub const fn new(length: usize, tracking: TrackingDirective) -> Self {
        Self { length, tracking }
    }
}

impl InsertOp {
    #[must_use]
    pub fn new(
        text: impl Into<String>,
        tracking: Option<TrackingProps>,
        comment_ids: Vec<String>,
    ) -> Self {
        Self {
            text: text.into(),
            tracking,
            comment_ids,
        }
    }

    #[must_use]
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    #[must_use]
    pub const fn is_plain(&self) -> bool {
        self.tracking.is_none() && self.comment_ids.is_empty()
    }

    pub(crate) fn same_annotations(&self, other: &Self) -> bool {
        self.tracking == other.tracking && self.comment_ids == other.comment_ids
    }

    /// Split after `chars` characters, both halves keeping the annotations.
    pub(crate) fn split(&self, chars: usize) -> (Self, Self) {
        let (head, tail) = split_chars(&self.text, chars);
        (
            Self::new(head, self.tracking.clone(), self.comment_ids.clone()),
            Self::new(tail, self.tracking.clone(), self.comment_ids.clone()),
        )
    }
}

impl ScanOp {
    /// Characters consumed from the base document.
    #[must_use]
    pub fn input_length(&self) -> usize {
        match self {
            Self::Retain(op) => op.length,
            Self::Insert(_) => 0,
            Self::Remove(n) => *n,
        }
    }

    /// Characters produced in the target document.
    #[must_use]
    pub fn output_length(&self) -> usize {
        match self {
            Self::Retain(op) => op.length,
            Self::Insert(op) => op.char_len(),
            Self::Remove(_) => 0,
        }
    }

    /// Compact wire form: a positive number retains, a negative one removes,
    /// a string inserts; annotated steps become `{r: ..}` / `{i: ..}` objects.
    #[must_use]
    pub fn to_raw(&self) -> Value {
        match self {
            Self::Retain(op) => match op.tracking.to_raw() {
                None => Value::from(op.length),
                Some(tracking) => {
                    let mut obj = Map::new();
                    obj.insert("r".into(), Value::from(op.length));
                    obj.insert("tracking".into(), tracking);
                    Value::Object(obj)
                }
            },
            Self::Insert(op) if op.is_plain() => Value::String(op.text.clone()),
            Self::Insert(op) => {
                let mut obj = Map::new();
                obj.insert("i".into(), Value::String(op.text.clone()));
                if let Some(tracking) = &op.tracking {
                    obj.insert(
                        "tracking".into(),
                        serde_json::to_value(tracking).unwrap_or(Value::Null),
                    );
                }
                if !op.comment_ids.is_empty() {
                    obj.insert("commentIds".into(), Value::from(op.comment_ids.clone()));
                }
                Value::Object(obj)
            }
            Self::Remove(n) => {
                Value::from(-i64::try_from(*n).unwrap_or(i64::MAX))
            }
        }
    }

    /// # Errors
    ///
    /// Returns [`OperationError::InvalidRaw`] for zero or fractional counts,
    /// unknown objects, or malformed annotations.
    pub fn from_raw(raw: &Value) -> Result<Self, OperationError> {
        match raw {
            Value::Number(n) => {
                let n = n
                    .as_i64()
                    .ok_or_else(|| invalid(format!("not an integer step: {n}")))?;
                let count = usize::try_from(n.unsigned_abs())
                    .ok()
                    .filter(|count| *count <= MAX_STRING_LENGTH)
                    .ok_or_else(|| invalid(format!("step too large: {n}")))?;
                match n.signum() {
                    1 => Ok(Self::Retain(RetainOp::new(count, TrackingDirective::Unspecified))),
                    -1 => Ok(Self::Remove(count)),
                    _ => Err(invalid("zero-length step".to_string())),
                }
            }
            Value::String(text) => Ok(Self::Insert(InsertOp::new(text.clone(), None, Vec::new()))),
            Value::Object(obj) => {
                if let Some(r) = obj.get("r") {
                    let length = r
                        .as_u64()
                        .and_then(|n| usize::try_from(n).ok())
                        .filter(|n| (1..=MAX_STRING_LENGTH).contains(n))
                        .ok_or_else(|| invalid(format!("bad retain length: {r}")))?;
                    let tracking = TrackingDirective::from_raw(obj.get("tracking"))?;
                    return Ok(Self::Retain(RetainOp::new(length, tracking)));
                }
                if let Some(i) = obj.get("i") {
                    let text = i
                        .as_str()
                        .ok_or_else(|| invalid(format!("bad insert text: {i}")))?;
                    let tracking = match TrackingDirective::from_raw(obj.get("tracking"))? {
                        TrackingDirective::Unspecified => None,
                        TrackingDirective::Tracked(props) => Some(props),
                        TrackingDirective::Clear => {
                            return Err(invalid("inserts cannot clear tracking".to_string()));
                        }
                    };
                    let comment_ids = match obj.get("commentIds") {
                        None | Some(Value::Null) => Vec::new(),
                        Some(ids) => serde_json::from_value(ids.clone())
                            .map_err(|e| invalid(format!("commentIds: {e}")))?,
                    };
                    return Ok(Self::Insert(InsertOp::new(text, tracking, comment_ids)));
                }
                Err(invalid(format!("unknown step object: {raw}")))
            }
            other => Err(invalid(format!("unknown step: {other}"))),
        }
    }
}

fn invalid(detail: String) -> OperationError {
    OperationError::InvalidRaw(detail)
}

/// Split a string after `chars` characters.
pub(crate) fn split_chars(text: &str, chars: usize) -> (&str, &str) {
    let idx = text
        .char_indices()
        .nth(chars)
        .map_or(text.len(), |(idx, _)| idx);
    text.split_at(idx)
}
