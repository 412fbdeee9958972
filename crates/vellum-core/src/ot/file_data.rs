use serde::{Deserialize, Serialize};

use super::comments::CommentList;
use super::tracked_changes::TrackedChangeList;

/// Content of a text file together with its comments and tracked changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StringFileData {
    content: String,
    #[serde(default, skip_serializing_if = "CommentList::is_empty")]
    comments: CommentList,
    #[serde(default, skip_serializing_if = "TrackedChangeList::is_empty")]
    tracked_changes: TrackedChangeList,
}

/// The annotations of a text file without its content; stored as a separate
/// blob so a file's text stays shareable between projects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangesData {
    #[serde(default, skip_serializing_if = "CommentList::is_empty")]
    pub comments: CommentList,
    #[serde(default, skip_serializing_if = "TrackedChangeList::is_empty")]
    pub tracked_changes: TrackedChangeList,
}

impl RangesData {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.comments.is_empty() && self.tracked_changes.is_empty()
    }
}

impl StringFileData {
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_ranges(content: impl Into<String>, ranges: RangesData) -> Self {
        Self {
            content: content.into(),
            comments: ranges.comments,
            tracked_changes: ranges.tracked_changes,
        }
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Length in characters, the unit every operation counts in.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }

    #[must_use]
    pub const fn comments(&self) -> &CommentList {
        &self.comments
    }

    pub const fn comments_mut(&mut self) -> &mut CommentList {
        &mut self.comments
    }

    #[must_use]
    pub const fn tracked_changes(&self) -> &TrackedChangeList {
        &self.tracked_changes
    }

    #[must_use]
    pub fn ranges(&self) -> RangesData {
        RangesData {
            comments: self.comments.clone(),
            tracked_changes: self.tracked_changes.clone(),
        }
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut String, &mut CommentList, &mut TrackedChangeList) {
        (
            &mut self.content,
            &mut self.comments,
            &mut self.tracked_changes,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::StringFileData;
    use serde_json::json;

    #[test]
    fn plain_content_serializes_without_annotations() {
        let data = StringFileData::new("hello");
        assert_eq!(
            serde_json::to_value(&data).expect("json"),
            json!({"content": "hello"})
        );
    }

    #[test]
    fn annotated_raw_round_trips() {
        let raw = json!({
            "content": "foo bar baz",
            "comments": [{"id": "comment1", "ranges": [{"pos": 4, "length": 3}]}],
            "trackedChanges": [{
                "range": {"pos": 4, "length": 3},
                "tracking": {"type": "insert", "userId": "user1", "ts": "2024-01-01T00:00:00.000Z"}
            }]
        });
        let data: StringFileData = serde_json::from_value(raw.clone()).expect("parse");
        assert_eq!(data.char_len(), 11);
        assert_eq!(data.comments().len(), 1);
        assert_eq!(data.tracked_changes().len(), 1);
        assert_eq!(serde_json::to_value(&data).expect("json"), raw);
    }

    #[test]
    fn char_len_counts_scalar_values() {
        assert_eq!(StringFileData::new("héllo ✓").char_len(), 7);
    }
}
