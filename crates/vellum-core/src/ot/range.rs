//! Half-open character spans used by comments and tracked changes.

use serde::{Deserialize, Serialize};

use super::OperationError;

/// The span `[pos, pos + length)` measured in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Range {
    pub pos: usize,
    pub length: usize,
}

impl Range {
    #[must_use]
    pub const fn new(pos: usize, length: usize) -> Self {
        Self { pos, length }
    }

    #[must_use]
    pub const fn start(&self) -> usize {
        self.pos
    }

    #[must_use]
    pub const fn end(&self) -> usize {
        self.pos + self.length
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// True when `other` lies entirely within this range.
    #[must_use]
    pub const fn contains(&self, other: &Self) -> bool {
        self.start() <= other.start() && other.end() <= self.end()
    }

    /// True when the cursor sits inside or on either edge of the range.
    #[must_use]
    pub const fn contains_cursor(&self, cursor: usize) -> bool {
        self.start() <= cursor && cursor <= self.end()
    }

    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start() < other.end() && other.start() < self.end()
    }

    /// True when the ranges are adjacent without sharing a character.
    #[must_use]
    pub const fn touches(&self, other: &Self) -> bool {
        self.end() == other.start() || other.end() == self.start()
    }

    #[must_use]
    pub const fn starts_after(&self, other: &Self) -> bool {
        self.start() >= other.end()
    }

    #[must_use]
    pub const fn start_is_after(&self, cursor: usize) -> bool {
        self.start() > cursor
    }

    #[must_use]
    pub const fn can_merge(&self, other: &Self) -> bool {
        self.overlaps(other) || self.touches(other)
    }

    /// Smallest range covering both; only meaningful when [`Self::can_merge`].
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let start = self.start().min(other.start());
        let end = self.end().max(other.end());
        Self::new(start, end - start)
    }

    /// Remove the characters of `other` from this range, closing the gap.
    #[must_use]
    pub fn subtract(&self, other: &Self) -> Self {
        let overlap = self.intersect(other).map_or(0, |r| r.length);
        let pos = if other.start() < self.start() {
            other.start().max(self.start().saturating_sub(other.length))
        } else {
            self.start()
        };
        Self::new(pos, self.length - overlap)
    }

    #[must_use]
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let start = self.start().max(other.start());
        let end = self.end().min(other.end());
        (start < end).then(|| Self::new(start, end - start))
    }

    #[must_use]
    pub const fn extend_by(&self, length: usize) -> Self {
        Self::new(self.pos, self.length + length)
    }

    /// # Errors
    ///
    /// Returns [`OperationError::OutOfRange`] when shrinking past zero.
    pub fn shrink_by(&self, length: usize) -> Result<Self, OperationError> {
        let remaining = self.length.checked_sub(length).ok_or_else(|| {
            OperationError::OutOfRange(format!("cannot shrink {self:?} by {length}"))
        })?;
        Ok(Self::new(self.pos, remaining))
    }

    /// Shift the range; a negative delta that would move before zero clamps.
    #[must_use]
    pub const fn move_by(&self, delta: isize) -> Self {
        Self::new(self.pos.saturating_add_signed(delta), self.length)
    }

    /// Split at an absolute cursor into `(left, right)`.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::OutOfRange`] when the cursor lies outside
    /// `[start, end]`.
    pub fn split_at(&self, cursor: usize) -> Result<(Self, Self), OperationError> {
        if !self.contains_cursor(cursor) {
            return Err(OperationError::OutOfRange(format!(
                "cursor {cursor} outside {self:?}"
            )));
        }
        let left = Self::new(self.pos, cursor - self.pos);
        let right = Self::new(cursor, self.end() - cursor);
        Ok((left, right))
    }

    /// Open a gap of `length` at `cursor`, returning the part before the gap,
    /// the gap itself and the shifted part after it.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::OutOfRange`] when the cursor lies outside
    /// `[start, end]`.
    pub fn insert_at(
        &self,
        cursor: usize,
        length: usize,
    ) -> Result<(Self, Self, Self), OperationError> {
        let (left, right) = self.split_at(cursor)?;
        let gap = Self::new(cursor, length);
        Ok((left, gap, Self::new(cursor + length, right.length)))
    }
}

#[cfg(test)]
mod tests {
    use super::Range;

    #[test]
    fn contains_and_cursor_bounds() {
        let r = Range::new(5, 10);
        assert!(r.contains(&Range::new(5, 10)));
        assert!(r.contains(&Range::new(6, 2)));
        assert!(!r.contains(&Range::new(4, 2)));
        assert!(r.contains_cursor(5));
        assert!(r.contains_cursor(15));
        assert!(!r.contains_cursor(16));
    }

    #[test]
    fn overlap_versus_touch() {
        let a = Range::new(0, 5);
        assert!(a.overlaps(&Range::new(4, 3)));
        assert!(!a.overlaps(&Range::new(5, 3)));
        assert!(a.touches(&Range::new(5, 3)));
        assert!(Range::new(5, 3).touches(&a));
        assert!(!a.touches(&Range::new(6, 1)));
        assert!(Range::new(5, 3).starts_after(&a));
    }

    #[test]
    fn subtract_shrinks_from_each_side() {
        let r = Range::new(10, 10);
        assert_eq!(r.subtract(&Range::new(12, 3)), Range::new(10, 7));
        assert_eq!(r.subtract(&Range::new(5, 10)), Range::new(5, 5));
        assert_eq!(r.subtract(&Range::new(15, 10)), Range::new(10, 5));
        assert_eq!(r.subtract(&Range::new(0, 30)), Range::new(0, 0));
        assert_eq!(r.subtract(&Range::new(30, 5)), r);
    }

    #[test]
    fn merge_and_intersect() {
        let a = Range::new(0, 5);
        let b = Range::new(5, 5);
        assert!(a.can_merge(&b));
        assert_eq!(a.merge(&b), Range::new(0, 10));
        assert_eq!(a.intersect(&b), None);
        assert_eq!(
            Range::new(0, 6).intersect(&Range::new(4, 10)),
            Some(Range::new(4, 2))
        );
    }

    #[test]
    fn shrink_and_move() {
        let r = Range::new(3, 4);
        assert_eq!(r.shrink_by(4).ok(), Some(Range::new(3, 0)));
        assert!(r.shrink_by(5).is_err());
        assert_eq!(r.move_by(2), Range::new(5, 4));
        assert_eq!(r.move_by(-3), Range::new(0, 4));
        assert_eq!(r.extend_by(1), Range::new(3, 5));
    }

    #[test]
    fn split_and_insert() {
        let r = Range::new(5, 10);
        assert_eq!(
            r.split_at(8).ok(),
            Some((Range::new(5, 3), Range::new(8, 7)))
        );
        assert!(r.split_at(4).is_err());
        assert!(r.split_at(16).is_err());
        assert_eq!(
            r.insert_at(8, 4).ok(),
            Some((Range::new(5, 3), Range::new(8, 4), Range::new(12, 7)))
        );
    }
}
