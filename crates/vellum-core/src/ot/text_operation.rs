//! Retain / insert / remove operations over a text file.
//!
//! An operation is built with a consuming builder that keeps the step list in
//! canonical form:
//!
//! - zero-length steps are dropped
//! - adjacent steps of the same kind with equal annotations are merged
//! - an insert never directly follows a remove (it is moved in front)
//!
//! Canonical form makes structural equality meaningful, so two operations that
//! do the same thing compare equal.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::file_data::StringFileData;
use super::range::Range;
use super::scan_op::{InsertOp, RetainOp, ScanOp};
use super::tracking::{TrackingDirective, TrackingProps};
use super::{MAX_STRING_LENGTH, OperationError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextOperation {
    ops: Vec<ScanOp>,
    base_length: usize,
    target_length: usize,
}

impl TextOperation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn ops(&self) -> &[ScanOp] {
        &self.ops
    }

    /// Length of the text this operation applies to.
    #[must_use]
    pub const fn base_length(&self) -> usize {
        self.base_length
    }

    /// Length of the text this operation produces.
    #[must_use]
    pub const fn target_length(&self) -> usize {
        self.target_length
    }

    /// True when applying the operation changes neither text nor tracking.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.ops
            .iter()
            .all(|op| matches!(op, ScanOp::Retain(r) if r.tracking.is_unspecified()))
    }

    // ------------------------------------------------------------------
    // Builder
    // ------------------------------------------------------------------

    #[must_use]
    pub fn retain(self, length: usize) -> Self {
        self.retain_with(length, TrackingDirective::Unspecified)
    }

    #[must_use]
    pub fn retain_with(self, length: usize, tracking: impl Into<TrackingDirective>) -> Self {
        self.with_op(ScanOp::Retain(RetainOp::new(length, tracking.into())))
    }

    #[must_use]
    pub fn insert(self, text: impl Into<String>) -> Self {
        self.insert_with(text, None, Vec::new())
    }

    #[must_use]
    pub fn insert_with(
        self,
        text: impl Into<String>,
        tracking: Option<TrackingProps>,
        comment_ids: Vec<String>,
    ) -> Self {
        self.with_op(ScanOp::Insert(InsertOp::new(text, tracking, comment_ids)))
    }

    #[must_use]
    pub fn remove(self, length: usize) -> Self {
        self.with_op(ScanOp::Remove(length))
    }

    #[must_use]
    pub fn with_op(mut self, op: ScanOp) -> Self {
        self.push(op);
        self
    }

    fn push(&mut self, op: ScanOp) {
        match op {
            ScanOp::Retain(retain) => {
                if retain.length == 0 {
                    return;
                }
                self.base_length += retain.length;
                self.target_length += retain.length;
                if let Some(ScanOp::Retain(last)) = self.ops.last_mut() {
                    if last.tracking == retain.tracking {
                        last.length += retain.length;
                        return;
                    }
                }
                self.ops.push(ScanOp::Retain(retain));
            }
            ScanOp::Remove(length) => {
                if length == 0 {
                    return;
                }
                self.base_length += length;
                if let Some(ScanOp::Remove(last)) = self.ops.last_mut() {
                    *last += length;
                    return;
                }
                self.ops.push(ScanOp::Remove(length));
            }
            ScanOp::Insert(insert) => {
                if insert.text.is_empty() {
                    return;
                }
                self.target_length += insert.char_len();
                let len = self.ops.len();
                // Inserts go before a trailing remove so equivalent operations
                // share one representation.
                let slot = if matches!(self.ops.last(), Some(ScanOp::Remove(_))) {
                    len - 1
                } else {
                    len
                };
                if slot > 0 {
                    if let Some(ScanOp::Insert(prev)) = self.ops.get_mut(slot - 1) {
                        if prev.same_annotations(&insert) {
                            prev.text.push_str(&insert.text);
                            return;
                        }
                    }
                }
                self.ops.insert(slot, ScanOp::Insert(insert));
            }
        }
    }

    // ------------------------------------------------------------------
    // Application
    // ------------------------------------------------------------------

    /// Apply to plain text.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::LengthMismatch`] when the text length differs
    /// from the base length and [`OperationError::TooLong`] when the result
    /// would exceed [`MAX_STRING_LENGTH`].
    pub fn apply_to_string(&self, text: &str) -> Result<String, OperationError> {
        let actual = text.chars().count();
        if actual != self.base_length {
            return Err(OperationError::LengthMismatch {
                expected: self.base_length,
                actual,
            });
        }
        if self.target_length > MAX_STRING_LENGTH {
            return Err(OperationError::TooLong {
                length: self.target_length,
                limit: MAX_STRING_LENGTH,
            });
        }
        let mut chars = text.chars();
        let mut out = String::with_capacity(text.len());
        for op in &self.ops {
            match op {
                ScanOp::Retain(retain) => out.extend(chars.by_ref().take(retain.length)),
                ScanOp::Insert(insert) => out.push_str(&insert.text),
                ScanOp::Remove(length) => chars.by_ref().take(*length).for_each(drop),
            }
        }
        Ok(out)
    }

    /// Apply to a file, updating comments and tracked changes along with the
    /// content. The file is untouched when the operation does not fit.
    ///
    /// # Errors
    ///
    /// Same as [`Self::apply_to_string`].
    pub fn apply(&self, file: &mut StringFileData) -> Result<(), OperationError> {
        let result = self.apply_to_string(file.content())?;
        let (content, comments, tracked) = file.parts_mut();
        let mut cursor = 0;
        for op in &self.ops {
            match op {
                ScanOp::Retain(retain) => {
                    tracked.retain_unmerged(cursor, retain.length, &retain.tracking);
                    cursor += retain.length;
                }
                ScanOp::Insert(insert) => {
                    let length = insert.char_len();
                    comments.apply_insert(cursor, length, &insert.comment_ids);
                    tracked.insert_unmerged(cursor, length, insert.tracking.as_ref());
                    cursor += length;
                }
                ScanOp::Remove(length) => {
                    comments.apply_delete(cursor, *length);
                    tracked.delete_unmerged(cursor, *length);
                }
            }
        }
        // Merge once so the result depends only on per-character tracking.
        tracked.normalize();
        *content = result;
        Ok(())
    }

    /// Resulting length for a text of `length` characters.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::LengthMismatch`] when `length` differs from
    /// the base length.
    pub const fn apply_to_length(&self, length: usize) -> Result<usize, OperationError> {
        if length != self.base_length {
            return Err(OperationError::LengthMismatch {
                expected: self.base_length,
                actual: length,
            });
        }
        Ok(self.target_length)
    }

    // ------------------------------------------------------------------
    // Algebra
    // ------------------------------------------------------------------

    /// Build the operation that undoes `self` when applied to its result.
    ///
    /// Removed text is re-inserted with the tracking and comment threads it
    /// had in `previous`. Retained characters whose tracking differs after
    /// `self` (including timestamps moved by merging) get their old tracking
    /// back. For a `previous` whose tracked spans are merged, applying the
    /// inverse restores it exactly.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::LengthMismatch`] when `previous` is not a
    /// valid base for this operation.
    pub fn invert(&self, previous: &StringFileData) -> Result<Self, OperationError> {
        let chars: Vec<char> = previous.content().chars().collect();
        if chars.len() != self.base_length {
            return Err(OperationError::LengthMismatch {
                expected: self.base_length,
                actual: chars.len(),
            });
        }
        let mut after = previous.clone();
        self.apply(&mut after)?;
        let tracked = previous.tracked_changes();
        let tracked_after = after.tracked_changes();
        let comments = previous.comments();
        let mut inverse = Self::new();
        let mut cursor = 0;
        let mut after_cursor = 0;
        for op in &self.ops {
            match op {
                ScanOp::Retain(retain) => {
                    let span = Range::new(cursor, retain.length);
                    let shifted = Range::new(after_cursor, retain.length);
                    let edges = tracked.boundaries_within(&span).chain(
                        tracked_after
                            .boundaries_within(&shifted)
                            .map(|q| q - after_cursor + cursor),
                    );
                    for piece in pieces(span, edges) {
                        let before = tracked.tracking_at(piece.start());
                        let now = tracked_after.tracking_at(piece.start() - cursor + after_cursor);
                        let directive = if before == now {
                            TrackingDirective::Unspecified
                        } else {
                            before
                                .cloned()
                                .map_or(TrackingDirective::Clear, TrackingDirective::Tracked)
                        };
                        inverse.push(ScanOp::Retain(RetainOp::new(piece.length, directive)));
                    }
                    cursor += retain.length;
                    after_cursor += retain.length;
                }
                ScanOp::Insert(insert) => {
                    let length = insert.char_len();
                    inverse.push(ScanOp::Remove(length));
                    after_cursor += length;
                }
                ScanOp::Remove(length) => {
                    let span = Range::new(cursor, *length);
                    let edges = tracked
                        .boundaries_within(&span)
                        .chain(comments.boundaries_within(&span));
                    for piece in pieces(span, edges) {
                        let text: String = chars[piece.start()..piece.end()].iter().collect();
                        inverse.push(ScanOp::Insert(InsertOp::new(
                            text,
                            tracked.tracking_at(piece.start()).cloned(),
                            comments.ids_at(piece.start()),
                        )));
                    }
                    cursor += length;
                }
            }
        }
        Ok(inverse)
    }

    /// Combine two consecutive operations into one with the same effect.
    ///
    /// Tracking set by `next` overrides tracking set by `self`; a retain in
    /// `next` that leaves tracking unspecified keeps what `self` did.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::IncompatibleLengths`] unless `self`'s target
    /// length equals `next`'s base length.
    pub fn compose(&self, next: &Self) -> Result<Self, OperationError> {
        let incompatible = || OperationError::IncompatibleLengths {
            first_target: self.target_length,
            second_base: next.base_length,
        };
        if self.target_length != next.base_length {
            return Err(incompatible());
        }

        let mut result = Self::new();
        let mut first = self.ops.iter().cloned();
        let mut second = next.ops.iter().cloned();
        let mut a = first.next();
        let mut b = second.next();

        loop {
            match (a.take(), b.take()) {
                (None, None) => break,
                (Some(ScanOp::Remove(length)), rest) => {
                    result.push(ScanOp::Remove(length));
                    a = first.next();
                    b = rest;
                }
                (rest, Some(ScanOp::Insert(insert))) => {
                    result.push(ScanOp::Insert(insert));
                    a = rest;
                    b = second.next();
                }
                (Some(ScanOp::Retain(ra)), Some(ScanOp::Retain(rb))) => {
                    let n = ra.length.min(rb.length);
                    result.push(ScanOp::Retain(RetainOp::new(n, ra.tracking.then(&rb.tracking))));
                    a = retain_rest(&ra, n).or_else(|| first.next());
                    b = retain_rest(&rb, n).or_else(|| second.next());
                }
                (Some(ScanOp::Insert(ia)), Some(ScanOp::Remove(nb))) => {
                    let la = ia.char_len();
                    let n = la.min(nb);
                    a = insert_rest(&ia, n).or_else(|| first.next());
                    b = remove_rest(nb, n).or_else(|| second.next());
                }
                (Some(ScanOp::Insert(ia)), Some(ScanOp::Retain(rb))) => {
                    let n = ia.char_len().min(rb.length);
                    let (head, _) = ia.split(n);
                    let tracking = match &rb.tracking {
                        TrackingDirective::Unspecified => head.tracking,
                        TrackingDirective::Tracked(props) => Some(props.clone()),
                        TrackingDirective::Clear => None,
                    };
                    result.push(ScanOp::Insert(InsertOp::new(
                        head.text,
                        tracking,
                        head.comment_ids,
                    )));
                    a = insert_rest(&ia, n).or_else(|| first.next());
                    b = retain_rest(&rb, n).or_else(|| second.next());
                }
                (Some(ScanOp::Retain(ra)), Some(ScanOp::Remove(nb))) => {
                    let n = ra.length.min(nb);
                    result.push(ScanOp::Remove(n));
                    a = retain_rest(&ra, n).or_else(|| first.next());
                    b = remove_rest(nb, n).or_else(|| second.next());
                }
                (None, Some(_)) | (Some(_), None) => return Err(incompatible()),
            }
        }
        Ok(result)
    }

    /// Transform two concurrent operations on the same text into
    /// `(a', b')` such that `a.compose(b') == b.compose(a')`.
    ///
    /// Inserts at the same position put `a`'s text first, and where both set
    /// tracking on a span `a`'s tracking wins.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::IncompatibleLengths`] when the base lengths
    /// differ.
    pub fn transform(a: &Self, b: &Self) -> Result<(Self, Self), OperationError> {
        let incompatible = || OperationError::IncompatibleLengths {
            first_target: a.base_length,
            second_base: b.base_length,
        };
        if a.base_length != b.base_length {
            return Err(incompatible());
        }

        let mut a_prime = Self::new();
        let mut b_prime = Self::new();
        let mut first = a.ops.iter().cloned();
        let mut second = b.ops.iter().cloned();
        let mut x = first.next();
        let mut y = second.next();

        loop {
            match (x.take(), y.take()) {
                (None, None) => break,
                (Some(ScanOp::Insert(insert)), rest) => {
                    b_prime.push(plain_retain(insert.char_len()));
                    a_prime.push(ScanOp::Insert(insert));
                    x = first.next();
                    y = rest;
                }
                (rest, Some(ScanOp::Insert(insert))) => {
                    a_prime.push(plain_retain(insert.char_len()));
                    b_prime.push(ScanOp::Insert(insert));
                    x = rest;
                    y = second.next();
                }
                (Some(ScanOp::Retain(ra)), Some(ScanOp::Retain(rb))) => {
                    let n = ra.length.min(rb.length);
                    let b_tracking = if ra.tracking.is_unspecified() {
                        rb.tracking.clone()
                    } else {
                        TrackingDirective::Unspecified
                    };
                    a_prime.push(ScanOp::Retain(RetainOp::new(n, ra.tracking.clone())));
                    b_prime.push(ScanOp::Retain(RetainOp::new(n, b_tracking)));
                    x = retain_rest(&ra, n).or_else(|| first.next());
                    y = retain_rest(&rb, n).or_else(|| second.next());
                }
                (Some(ScanOp::Remove(na)), Some(ScanOp::Remove(nb))) => {
                    let n = na.min(nb);
                    x = remove_rest(na, n).or_else(|| first.next());
                    y = remove_rest(nb, n).or_else(|| second.next());
                }
                (Some(ScanOp::Remove(na)), Some(ScanOp::Retain(rb))) => {
                    let n = na.min(rb.length);
                    a_prime.push(ScanOp::Remove(n));
                    x = remove_rest(na, n).or_else(|| first.next());
                    y = retain_rest(&rb, n).or_else(|| second.next());
                }
                (Some(ScanOp::Retain(ra)), Some(ScanOp::Remove(nb))) => {
                    let n = ra.length.min(nb);
                    b_prime.push(ScanOp::Remove(n));
                    x = retain_rest(&ra, n).or_else(|| first.next());
                    y = remove_rest(nb, n).or_else(|| second.next());
                }
                (None, Some(_)) | (Some(_), None) => return Err(incompatible()),
            }
        }
        Ok((a_prime, b_prime))
    }

    /// The operation turning `from` into `to`: keep the common prefix and
    /// suffix and replace the middle.
    #[must_use]
    pub fn diff(from: &str, to: &str) -> Self {
        let old: Vec<char> = from.chars().collect();
        let new: Vec<char> = to.chars().collect();
        let prefix = old.iter().zip(&new).take_while(|(a, b)| a == b).count();
        let suffix = old[prefix..]
            .iter()
            .rev()
            .zip(new[prefix..].iter().rev())
            .take_while(|(a, b)| a == b)
            .count();
        let inserted: String = new[prefix..new.len() - suffix].iter().collect();
        Self::new()
            .retain(prefix)
            .remove(old.len() - prefix - suffix)
            .insert(inserted)
            .retain(suffix)
    }

    // ------------------------------------------------------------------
    // Wire form
    // ------------------------------------------------------------------

    #[must_use]
    pub fn to_raw(&self) -> Value {
        Value::Array(self.ops.iter().map(ScanOp::to_raw).collect())
    }

    /// # Errors
    ///
    /// Returns [`OperationError::InvalidRaw`] when `raw` is not an array of
    /// valid steps.
    pub fn from_raw(raw: &Value) -> Result<Self, OperationError> {
        let steps = raw
            .as_array()
            .ok_or_else(|| OperationError::InvalidRaw(format!("expected an array, got {raw}")))?;
        steps
            .iter()
            .try_fold(Self::new(), |op, step| Ok(op.with_op(ScanOp::from_raw(step)?)))
    }
}

fn plain_retain(length: usize) -> ScanOp {
    ScanOp::Retain(RetainOp::new(length, TrackingDirective::Unspecified))
}

fn retain_rest(retain: &RetainOp, used: usize) -> Option<ScanOp> {
    (retain.length > used)
        .then(|| ScanOp::Retain(RetainOp::new(retain.length - used, retain.tracking.clone())))
}

fn remove_rest(length: usize, used: usize) -> Option<ScanOp> {
    (length > used).then(|| ScanOp::Remove(length - used))
}

fn insert_rest(insert: &InsertOp, used: usize) -> Option<ScanOp> {
    (insert.char_len() > used).then(|| ScanOp::Insert(insert.split(used).1))
}

/// Cut `span` at every edge in `edges`, yielding non-empty pieces in order.
fn pieces(span: Range, edges: impl Iterator<Item = usize>) -> Vec<Range> {
    let mut points: Vec<usize> = edges.collect();
    points.push(span.start());
    points.push(span.end());
    points.sort_unstable();
    points.dedup();
    points
        .windows(2)
        .map(|w| Range::new(w[0], w[1] - w[0]))
        .filter(|r| !r.is_empty())
        .collect()
}

impl fmt::Display for TextOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, op) in self.ops.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            match op {
                ScanOp::Retain(retain) => match &retain.tracking {
                    TrackingDirective::Unspecified => write!(f, "retain {}", retain.length)?,
                    TrackingDirective::Tracked(props) => {
                        write!(f, "retain {} (tracked by {})", retain.length, props.user_id)?;
                    }
                    TrackingDirective::Clear => write!(f, "retain {} (clear)", retain.length)?,
                },
                ScanOp::Insert(insert) => write!(f, "insert '{}'", insert.text)?,
                ScanOp::Remove(length) => write!(f, "remove {length}")?,
            }
        }
        Ok(())
    }
}

impl Serialize for TextOperation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_raw().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TextOperation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Self::from_raw(&raw).map_err(D::Error::custom)
    }
}
