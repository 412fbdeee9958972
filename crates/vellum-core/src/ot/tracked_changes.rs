//! Ordered, non-overlapping tracked-change spans of a text file.

use serde::{Deserialize, Serialize};

use super::range::Range;
use super::tracking::{TrackingDirective, TrackingProps};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedChange {
    pub range: Range,
    pub tracking: TrackingProps,
}

impl TrackedChange {
    #[must_use]
    pub const fn new(range: Range, tracking: TrackingProps) -> Self {
        Self { range, tracking }
    }

    fn can_merge(&self, other: &Self) -> bool {
        self.tracking.same_author(&other.tracking) && self.range.can_merge(&other.range)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackedChangeList {
    changes: Vec<TrackedChange>,
}

impl TrackedChangeList {
    /// Build from stored spans. Spans are ordered but never merged here, so a
    /// stored list survives a load/store round-trip unchanged.
    #[must_use]
    pub fn new(mut changes: Vec<TrackedChange>) -> Self {
        changes.retain(|c| !c.range.is_empty());
        changes.sort_by_key(|c| c.range.pos);
        Self { changes }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedChange> {
        self.changes.iter()
    }

    /// Tracking of the character at `pos`, if any.
    #[must_use]
    pub fn tracking_at(&self, pos: usize) -> Option<&TrackingProps> {
        self.changes
            .iter()
            .find(|c| c.range.start() <= pos && pos < c.range.end())
            .map(|c| &c.tracking)
    }

    /// Span edges strictly inside `range`, used to cut it into uniformly
    /// tracked pieces.
    pub(crate) fn boundaries_within(&self, range: &Range) -> impl Iterator<Item = usize> + '_ {
        let range = *range;
        self.changes
            .iter()
            .flat_map(|c| [c.range.start(), c.range.end()])
            .filter(move |&p| range.start() < p && p < range.end())
    }

    pub fn apply_insert(&mut self, cursor: usize, length: usize, tracking: Option<&TrackingProps>) {
        self.insert_unmerged(cursor, length, tracking);
        self.normalize();
    }

    pub fn apply_delete(&mut self, cursor: usize, length: usize) {
        self.delete_unmerged(cursor, length);
        self.normalize();
    }

    pub fn apply_retain(&mut self, cursor: usize, length: usize, directive: &TrackingDirective) {
        self.retain_unmerged(cursor, length, directive);
        self.normalize();
    }

    /// The `*_unmerged` steps leave touching same-author spans apart, so a
    /// sequence of steps followed by one [`Self::normalize`] depends only on
    /// the per-character result.
    pub(crate) fn insert_unmerged(
        &mut self,
        cursor: usize,
        length: usize,
        tracking: Option<&TrackingProps>,
    ) {
        if length == 0 {
            return;
        }
        let mut next = Vec::with_capacity(self.changes.len() + 2);
        for change in self.changes.drain(..) {
            let range = change.range;
            if range.start() >= cursor {
                next.push(TrackedChange::new(range.move_by(signed(length)), change.tracking));
            } else if cursor >= range.end() {
                next.push(change);
            } else {
                // Strictly inside: the inserted text is not covered by this span.
                let left = Range::new(range.start(), cursor - range.start());
                let right = Range::new(cursor + length, range.end() - cursor);
                next.push(TrackedChange::new(left, change.tracking.clone()));
                next.push(TrackedChange::new(right, change.tracking));
            }
        }
        if let Some(tracking) = tracking {
            next.push(TrackedChange::new(Range::new(cursor, length), tracking.clone()));
        }
        self.changes = next;
    }

    pub(crate) fn delete_unmerged(&mut self, cursor: usize, length: usize) {
        if length == 0 {
            return;
        }
        let deleted = Range::new(cursor, length);
        self.changes = self
            .changes
            .drain(..)
            .map(|c| TrackedChange::new(c.range.subtract(&deleted), c.tracking))
            .filter(|c| !c.range.is_empty())
            .collect();
    }

    pub(crate) fn retain_unmerged(
        &mut self,
        cursor: usize,
        length: usize,
        directive: &TrackingDirective,
    ) {
        if length == 0 || directive.is_unspecified() {
            return;
        }
        let retained = Range::new(cursor, length);
        self.cut(&retained);
        if let TrackingDirective::Tracked(tracking) = directive {
            self.changes
                .push(TrackedChange::new(retained, tracking.clone()));
        }
    }

    /// Drop tracking from every character inside `range`.
    fn cut(&mut self, range: &Range) {
        let mut next = Vec::with_capacity(self.changes.len() + 1);
        for change in self.changes.drain(..) {
            if !change.range.overlaps(range) {
                next.push(change);
                continue;
            }
            if change.range.start() < range.start() {
                let left = Range::new(change.range.start(), range.start() - change.range.start());
                next.push(TrackedChange::new(left, change.tracking.clone()));
            }
            if change.range.end() > range.end() {
                let right = Range::new(range.end(), change.range.end() - range.end());
                next.push(TrackedChange::new(right, change.tracking));
            }
        }
        self.changes = next;
    }

    /// Sort, drop empty spans and join touching spans by the same author,
    /// keeping the latest timestamp.
    pub(crate) fn normalize(&mut self) {
        self.changes.retain(|c| !c.range.is_empty());
        self.changes.sort_by_key(|c| c.range.pos);
        let mut merged: Vec<TrackedChange> = Vec::with_capacity(self.changes.len());
        for change in self.changes.drain(..) {
            match merged.last_mut() {
                Some(last) if last.can_merge(&change) => {
                    last.range = last.range.merge(&change.range);
                    if change.tracking.ts > last.tracking.ts {
                        last.tracking.ts = change.tracking.ts;
                    }
                }
                _ => merged.push(change),
            }
        }
        self.changes = merged;
    }
}

fn signed(length: usize) -> isize {
    isize::try_from(length).unwrap_or(isize::MAX)
}

#[cfg(test)]
mod tests {
    use super::{TrackedChange, TrackedChangeList};
    use crate::ot::range::Range;
    use crate::ot::tracking::{TrackingDirective, TrackingProps, TrackingType};
    use chrono::{TimeZone, Utc};

    fn props(kind: TrackingType, user: &str, year: i32) -> TrackingProps {
        TrackingProps::new(
            kind,
            user,
            Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single().expect("valid date"),
        )
    }

    fn list(spans: &[(usize, usize, TrackingProps)]) -> TrackedChangeList {
        TrackedChangeList::new(
            spans
                .iter()
                .map(|(pos, len, t)| TrackedChange::new(Range::new(*pos, *len), t.clone()))
                .collect(),
        )
    }

    fn spans(list: &TrackedChangeList) -> Vec<(usize, usize, TrackingProps)> {
        list.iter()
            .map(|c| (c.range.pos, c.range.length, c.tracking.clone()))
            .collect()
    }

    #[test]
    fn same_author_insert_merges_with_latest_timestamp() {
        let old = props(TrackingType::Insert, "user1", 2023);
        let new = props(TrackingType::Insert, "user1", 2024);
        let mut tracked = list(&[(0, 3, old)]);
        tracked.apply_insert(3, 3, Some(&new));
        assert_eq!(spans(&tracked), vec![(0, 6, new)]);
    }

    #[test]
    fn same_author_insert_in_middle_extends() {
        let t = props(TrackingType::Insert, "user1", 2024);
        let mut tracked = list(&[(0, 10, t.clone())]);
        tracked.apply_insert(5, 6, Some(&t));
        assert_eq!(spans(&tracked), vec![(0, 16, t)]);
    }

    #[test]
    fn same_author_insert_at_same_position_merges() {
        let t = props(TrackingType::Insert, "user1", 2023);
        let mut tracked = list(&[(0, 3, t.clone())]);
        tracked.apply_insert(0, 3, Some(&t));
        assert_eq!(spans(&tracked), vec![(0, 6, t)]);
    }

    #[test]
    fn gap_prevents_merge() {
        let t = props(TrackingType::Insert, "user1", 2023);
        let mut tracked = list(&[(0, 3, t.clone())]);
        tracked.apply_insert(4, 2, Some(&t));
        assert_eq!(spans(&tracked), vec![(0, 3, t.clone()), (4, 2, t)]);
    }

    #[test]
    fn other_author_splits_range() {
        let a = props(TrackingType::Insert, "user1", 2023);
        let b = props(TrackingType::Insert, "user2", 2024);
        let mut tracked = list(&[(0, 10, a.clone())]);
        tracked.apply_insert(5, 3, Some(&b));
        assert_eq!(
            spans(&tracked),
            vec![(0, 5, a.clone()), (5, 3, b), (8, 5, a)]
        );
    }

    #[test]
    fn other_author_before_first_cursor_creates_new_range() {
        let a = props(TrackingType::Insert, "user1", 2023);
        let b = props(TrackingType::Insert, "user2", 2024);
        let mut tracked = list(&[(5, 5, a.clone())]);
        tracked.apply_insert(5, 2, Some(&b));
        assert_eq!(spans(&tracked), vec![(5, 2, b), (7, 5, a)]);
    }

    #[test]
    fn untracked_insert_at_end_leaves_range() {
        let a = props(TrackingType::Insert, "user1", 2023);
        let mut tracked = list(&[(0, 5, a.clone())]);
        tracked.apply_insert(5, 2, None);
        assert_eq!(spans(&tracked), vec![(0, 5, a)]);
    }

    #[test]
    fn delete_shrinks_or_removes() {
        let a = props(TrackingType::Delete, "user1", 2023);
        let mut tracked = list(&[(5, 10, a.clone())]);
        tracked.apply_delete(7, 3);
        assert_eq!(spans(&tracked), vec![(5, 7, a.clone())]);
        tracked.apply_delete(0, 6);
        assert_eq!(spans(&tracked), vec![(0, 6, a.clone())]);
        tracked.apply_delete(4, 10);
        assert_eq!(spans(&tracked), vec![(0, 4, a)]);
        tracked.apply_delete(0, 20);
        assert!(tracked.is_empty());
    }

    #[test]
    fn retain_with_tracking_overrides_and_splits() {
        let a = props(TrackingType::Insert, "user1", 2023);
        let b = props(TrackingType::Insert, "user2", 2024);
        let mut tracked = list(&[(0, 10, a.clone())]);
        tracked.apply_retain(5, 1, &TrackingDirective::Tracked(b.clone()));
        assert_eq!(
            spans(&tracked),
            vec![(0, 5, a.clone()), (5, 1, b), (6, 4, a)]
        );
    }

    #[test]
    fn retain_same_author_updates_timestamp() {
        let old = props(TrackingType::Insert, "user1", 2023);
        let new = props(TrackingType::Insert, "user1", 2024);
        let mut tracked = list(&[(0, 10, old)]);
        tracked.apply_retain(1, 12, &TrackingDirective::Tracked(new.clone()));
        assert_eq!(spans(&tracked), vec![(0, 13, new)]);
    }

    #[test]
    fn retain_without_tracking_is_noop() {
        let a = props(TrackingType::Insert, "user1", 2023);
        let mut tracked = list(&[(0, 10, a.clone())]);
        tracked.apply_retain(3, 4, &TrackingDirective::Unspecified);
        assert_eq!(spans(&tracked), vec![(0, 10, a)]);
    }

    #[test]
    fn clear_removes_tracking_in_span() {
        let a = props(TrackingType::Delete, "user1", 2023);
        let mut tracked = list(&[(4, 4, a.clone())]);
        tracked.apply_retain(4, 4, &TrackingDirective::Clear);
        assert!(tracked.is_empty());

        let mut tracked = list(&[(4, 4, a.clone())]);
        tracked.apply_retain(6, 4, &TrackingDirective::Clear);
        assert_eq!(spans(&tracked), vec![(4, 2, a)]);
    }

    #[test]
    fn adjacent_other_user_is_appended() {
        let a = props(TrackingType::Delete, "user1", 2023);
        let b = props(TrackingType::Delete, "user2", 2024);
        let mut tracked = list(&[(4, 4, a.clone())]);
        tracked.apply_retain(8, 1, &TrackingDirective::Tracked(b.clone()));
        assert_eq!(spans(&tracked), vec![(4, 4, a), (8, 1, b)]);
    }

    #[test]
    fn tracking_at_reports_covering_span() {
        let a = props(TrackingType::Insert, "user1", 2023);
        let tracked = list(&[(2, 3, a.clone())]);
        assert_eq!(tracked.tracking_at(1), None);
        assert_eq!(tracked.tracking_at(2), Some(&a));
        assert_eq!(tracked.tracking_at(4), Some(&a));
        assert_eq!(tracked.tracking_at(5), None);
    }
}
