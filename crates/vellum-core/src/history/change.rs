use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::operation::Operation;
use super::origin::Origin;
use crate::timestamp;

/// Per-document version recorded alongside a change by the editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocVersion {
    pub pathname: String,
    pub v: u64,
}

/// The unit appended to history. Each change advances the project version
/// by one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub authors: Vec<Option<i64>>,
    #[serde(default)]
    pub v2_authors: Vec<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v2_doc_versions: Option<BTreeMap<String, DocVersion>>,
}

impl Change {
    #[must_use]
    pub fn new(operations: Vec<Operation>, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            operations,
            authors: Vec::new(),
            v2_authors: Vec::new(),
            origin: None,
            project_version: None,
            v2_doc_versions: None,
        }
    }

    #[must_use]
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    #[must_use]
    pub fn with_author(mut self, user_id: Option<String>) -> Self {
        self.v2_authors.push(user_id);
        self
    }

    /// Every blob hash referenced by an operation in this change.
    pub fn blob_hashes(&self) -> impl Iterator<Item = &str> {
        self.operations.iter().flat_map(Operation::blob_hashes)
    }
}

#[cfg(test)]
mod tests {
    use super::{Change, DocVersion};
    use crate::history::{Operation, Origin};
    use crate::ot::TextOperation;
    use crate::timestamp;
    use serde_json::json;

    #[test]
    fn wire_shape() {
        let ts = timestamp::parse("2024-01-02T03:04:05.678Z").expect("ts");
        let mut change = Change::new(
            vec![Operation::edit("main.tex", TextOperation::new().insert("hi"))],
            ts,
        )
        .with_origin(Origin::plain("upload"))
        .with_author(Some("u1".into()));
        change.authors.push(None);
        change.project_version = Some("3.0".into());
        change.v2_doc_versions = Some(
            [(
                "doc1".to_string(),
                DocVersion {
                    pathname: "main.tex".into(),
                    v: 7,
                },
            )]
            .into(),
        );

        let raw = serde_json::to_value(&change).expect("json");
        assert_eq!(
            raw,
            json!({
                "timestamp": "2024-01-02T03:04:05.678Z",
                "operations": [{"pathname": "main.tex", "textOperation": ["hi"]}],
                "authors": [null],
                "v2Authors": ["u1"],
                "origin": {"kind": "upload"},
                "projectVersion": "3.0",
                "v2DocVersions": {"doc1": {"pathname": "main.tex", "v": 7}}
            })
        );
        let back: Change = serde_json::from_value(raw).expect("parse");
        assert_eq!(back, change);
    }

    #[test]
    fn optional_fields_may_be_absent() {
        let change: Change = serde_json::from_value(json!({
            "timestamp": "2024-01-02T03:04:05.000Z",
            "operations": []
        }))
        .expect("parse");
        assert!(change.origin.is_none());
        assert!(change.authors.is_empty());
        assert_eq!(change.blob_hashes().count(), 0);
    }
}
