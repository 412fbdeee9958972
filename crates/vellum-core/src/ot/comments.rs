//! Comment threads anchored to character ranges.

use serde::{Deserialize, Serialize};

use super::range::Range;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    #[serde(default)]
    pub ranges: Vec<Range>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub resolved: bool,
}

impl Comment {
    #[must_use]
    pub fn new(id: impl Into<String>, ranges: Vec<Range>, resolved: bool) -> Self {
        let mut comment = Self {
            id: id.into(),
            ranges,
            resolved,
        };
        comment.normalize();
        comment
    }

    #[must_use]
    pub fn covers(&self, pos: usize) -> bool {
        self.ranges
            .iter()
            .any(|r| r.start() <= pos && pos < r.end())
    }

    /// Inserted text belongs to this thread only when the insert names it.
    /// An unnamed insert strictly inside a range splits the range around the
    /// new text.
    fn apply_insert(&mut self, cursor: usize, length: usize, extend: bool) {
        let shift = isize::try_from(length).unwrap_or(isize::MAX);
        let mut extended = false;
        let mut next = Vec::with_capacity(self.ranges.len() + 1);
        for range in self.ranges.drain(..) {
            if extend && !extended && range.start() <= cursor && cursor <= range.end() {
                next.push(range.extend_by(length));
                extended = true;
            } else if range.start() < cursor && cursor < range.end() {
                next.push(Range::new(range.start(), cursor - range.start()));
                next.push(Range::new(cursor + length, range.end() - cursor));
            } else if range.start() >= cursor {
                next.push(range.move_by(shift));
            } else {
                next.push(range);
            }
        }
        if extend && !extended {
            next.push(Range::new(cursor, length));
        }
        self.ranges = next;
        self.normalize();
    }

    fn apply_delete(&mut self, deleted: &Range) {
        for range in &mut self.ranges {
            *range = range.subtract(deleted);
        }
        self.normalize();
    }

    fn normalize(&mut self) {
        self.ranges.retain(|r| !r.is_empty());
        self.ranges.sort();
        let mut merged: Vec<Range> = Vec::with_capacity(self.ranges.len());
        for range in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if last.can_merge(&range) => *last = last.merge(&range),
                _ => merged.push(range),
            }
        }
        self.ranges = merged;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentList {
    comments: Vec<Comment>,
}

impl CommentList {
    #[must_use]
    pub const fn new(comments: Vec<Comment>) -> Self {
        Self { comments }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.comments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Comment> {
        self.comments.iter()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == id)
    }

    /// Add a thread, replacing any existing thread with the same id.
    pub fn add(&mut self, comment: Comment) {
        match self.comments.iter_mut().find(|c| c.id == comment.id) {
            Some(existing) => *existing = comment,
            None => self.comments.push(comment),
        }
    }

    pub fn set_resolved(&mut self, id: &str, resolved: bool) -> bool {
        self.comments
            .iter_mut()
            .find(|c| c.id == id)
            .map(|c| c.resolved = resolved)
            .is_some()
    }

    /// Ids of the threads covering the character at `pos`.
    #[must_use]
    pub fn ids_at(&self, pos: usize) -> Vec<String> {
        self.comments
            .iter()
            .filter(|c| c.covers(pos))
            .map(|c| c.id.clone())
            .collect()
    }

    pub(crate) fn boundaries_within(&self, range: &Range) -> impl Iterator<Item = usize> + '_ {
        let range = *range;
        self.comments
            .iter()
            .flat_map(|c| c.ranges.iter())
            .flat_map(|r| [r.start(), r.end()])
            .filter(move |&p| range.start() < p && p < range.end())
    }

    pub fn apply_insert(&mut self, cursor: usize, length: usize, comment_ids: &[String]) {
        if length == 0 {
            return;
        }
        for comment in &mut self.comments {
            let extend = comment_ids.iter().any(|id| *id == comment.id);
            comment.apply_insert(cursor, length, extend);
        }
    }

    /// Deleting text never removes a thread, only its ranges.
    pub fn apply_delete(&mut self, cursor: usize, length: usize) {
        if length == 0 {
            return;
        }
        let deleted = Range::new(cursor, length);
        for comment in &mut self.comments {
            comment.apply_delete(&deleted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Comment, CommentList};
    use crate::ot::range::Range;

    fn one(ranges: Vec<Range>) -> CommentList {
        CommentList::new(vec![Comment::new("c1", ranges, false)])
    }

    fn ranges(list: &CommentList) -> Vec<Range> {
        list.get("c1").map(|c| c.ranges.clone()).unwrap_or_default()
    }

    #[test]
    fn unnamed_insert_inside_splits() {
        let mut list = one(vec![Range::new(2, 5)]);
        list.apply_insert(4, 3, &[]);
        assert_eq!(ranges(&list), vec![Range::new(2, 2), Range::new(7, 3)]);
        assert!(!list.get("c1").is_some_and(|c| c.covers(5)));
    }

    #[test]
    fn named_insert_inside_extends() {
        let mut list = one(vec![Range::new(2, 5)]);
        list.apply_insert(4, 3, &["c1".to_string()]);
        assert_eq!(ranges(&list), vec![Range::new(2, 8)]);
    }

    #[test]
    fn named_insert_at_start_then_unnamed_insert_stays_outside() {
        let mut list = one(vec![Range::new(0, 1)]);
        list.apply_insert(0, 1, &["c1".to_string()]);
        assert_eq!(ranges(&list), vec![Range::new(0, 2)]);
        list.apply_insert(1, 1, &[]);
        assert_eq!(ranges(&list), vec![Range::new(0, 1), Range::new(2, 1)]);
    }

    #[test]
    fn insert_at_edges_respects_comment_ids() {
        let mut list = one(vec![Range::new(2, 5)]);
        list.apply_insert(7, 2, &[]);
        assert_eq!(ranges(&list), vec![Range::new(2, 5)]);
        list.apply_insert(2, 2, &[]);
        assert_eq!(ranges(&list), vec![Range::new(4, 5)]);
        list.apply_insert(9, 1, &["c1".to_string()]);
        assert_eq!(ranges(&list), vec![Range::new(4, 6)]);
    }

    #[test]
    fn insert_before_shifts() {
        let mut list = one(vec![Range::new(5, 2)]);
        list.apply_insert(1, 3, &[]);
        assert_eq!(ranges(&list), vec![Range::new(8, 2)]);
    }

    #[test]
    fn insert_with_id_outside_adds_range() {
        let mut list = one(vec![]);
        list.apply_insert(4, 3, &["c1".to_string()]);
        assert_eq!(ranges(&list), vec![Range::new(4, 3)]);
    }

    #[test]
    fn delete_shrinks_and_keeps_empty_thread() {
        let mut list = one(vec![Range::new(4, 3)]);
        list.apply_delete(5, 1);
        assert_eq!(ranges(&list), vec![Range::new(4, 2)]);
        list.apply_delete(0, 10);
        assert!(ranges(&list).is_empty());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn ids_at_reports_covering_threads() {
        let list = CommentList::new(vec![
            Comment::new("a", vec![Range::new(0, 4)], false),
            Comment::new("b", vec![Range::new(2, 4)], true),
        ]);
        assert_eq!(list.ids_at(3), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(list.ids_at(5), vec!["b".to_string()]);
        assert!(list.ids_at(6).is_empty());
    }

    #[test]
    fn resolved_flag_only_serialized_when_set() {
        let open = serde_json::to_value(Comment::new("x", vec![], false)).expect("json");
        assert_eq!(open, serde_json::json!({"id": "x", "ranges": []}));
        let done = serde_json::to_value(Comment::new("x", vec![], true)).expect("json");
        assert_eq!(done["resolved"], serde_json::json!(true));
    }
}
