//! Project-level operations: edit, add, remove, rename, set metadata.
//!
//! Wire shapes are distinguished by which key accompanies `pathname`:
//!
//! | variant           | shape                                  |
//! |-------------------|----------------------------------------|
//! | `TextEdit`        | `{pathname, textOperation: [...]}`     |
//! | `AddFile`         | `{pathname, file: {hash, ...}}`        |
//! | `RemoveFile`      | `{pathname, newPathname: ""}`          |
//! | `RenameFile`      | `{pathname, newPathname}`              |
//! | `SetFileMetadata` | `{pathname, metadata: {...}}`          |

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value, json};

use super::file::FileRef;
use crate::error::{HistoryError, Result};
use crate::ot::TextOperation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    TextEdit {
        pathname: String,
        operation: TextOperation,
    },
    AddFile {
        pathname: String,
        file: FileRef,
    },
    RemoveFile {
        pathname: String,
    },
    RenameFile {
        pathname: String,
        new_pathname: String,
    },
    SetFileMetadata {
        pathname: String,
        metadata: Map<String, Value>,
    },
}

impl Operation {
    #[must_use]
    pub fn edit(pathname: impl Into<String>, operation: TextOperation) -> Self {
        Self::TextEdit {
            pathname: pathname.into(),
            operation,
        }
    }

    #[must_use]
    pub fn add(pathname: impl Into<String>, file: FileRef) -> Self {
        Self::AddFile {
            pathname: pathname.into(),
            file,
        }
    }

    #[must_use]
    pub fn remove(pathname: impl Into<String>) -> Self {
        Self::RemoveFile {
            pathname: pathname.into(),
        }
    }

    #[must_use]
    pub fn rename(pathname: impl Into<String>, new_pathname: impl Into<String>) -> Self {
        Self::RenameFile {
            pathname: pathname.into(),
            new_pathname: new_pathname.into(),
        }
    }

    #[must_use]
    pub fn pathname(&self) -> &str {
        match self {
            Self::TextEdit { pathname, .. }
            | Self::AddFile { pathname, .. }
            | Self::RemoveFile { pathname }
            | Self::RenameFile { pathname, .. }
            | Self::SetFileMetadata { pathname, .. } => pathname,
        }
    }

    /// Blob hashes that must be stored before this operation may be persisted.
    pub fn blob_hashes(&self) -> impl Iterator<Item = &str> {
        let file = match self {
            Self::AddFile { file, .. } => Some(file),
            _ => None,
        };
        file.into_iter().flat_map(FileRef::hashes)
    }

    #[must_use]
    pub fn to_raw(&self) -> Value {
        match self {
            Self::TextEdit {
                pathname,
                operation,
            } => json!({ "pathname": pathname, "textOperation": operation.to_raw() }),
            Self::AddFile { pathname, file } => json!({ "pathname": pathname, "file": file }),
            Self::RemoveFile { pathname } => json!({ "pathname": pathname, "newPathname": "" }),
            Self::RenameFile {
                pathname,
                new_pathname,
            } => json!({ "pathname": pathname, "newPathname": new_pathname }),
            Self::SetFileMetadata { pathname, metadata } => {
                json!({ "pathname": pathname, "metadata": metadata })
            }
        }
    }

    /// # Errors
    ///
    /// Returns [`HistoryError::InvalidChange`] for unrecognised shapes and
    /// operation errors for malformed text operations.
    pub fn from_raw(raw: &Value) -> Result<Self> {
        let invalid = || HistoryError::InvalidChange(format!("unrecognised operation: {raw}"));
        let obj = raw.as_object().ok_or_else(invalid)?;
        let pathname = obj
            .get("pathname")
            .and_then(Value::as_str)
            .ok_or_else(invalid)?
            .to_string();

        if let Some(steps) = obj.get("textOperation") {
            return Ok(Self::TextEdit {
                pathname,
                operation: TextOperation::from_raw(steps)?,
            });
        }
        if let Some(file) = obj.get("file") {
            return Ok(Self::AddFile {
                pathname,
                file: serde_json::from_value(file.clone())?,
            });
        }
        if let Some(new_pathname) = obj.get("newPathname") {
            let new_pathname = new_pathname.as_str().ok_or_else(invalid)?;
            return Ok(if new_pathname.is_empty() {
                Self::RemoveFile { pathname }
            } else {
                Self::RenameFile {
                    pathname,
                    new_pathname: new_pathname.to_string(),
                }
            });
        }
        if let Some(Value::Object(metadata)) = obj.get("metadata") {
            return Ok(Self::SetFileMetadata {
                pathname,
                metadata: metadata.clone(),
            });
        }
        Err(invalid())
    }
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_raw().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Self::from_raw(&raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::Operation;
    use crate::blob::EMPTY_BLOB_HASH;
    use crate::history::FileRef;
    use crate::ot::TextOperation;
    use serde_json::json;

    fn file() -> FileRef {
        FileRef {
            hash: EMPTY_BLOB_HASH.to_string(),
            byte_length: 0,
            string_length: Some(0),
            ranges_hash: None,
            metadata: None,
        }
    }

    #[test]
    fn raw_shapes() {
        assert_eq!(
            Operation::edit("a.tex", TextOperation::new().retain(1).insert("x")).to_raw(),
            json!({"pathname": "a.tex", "textOperation": [1, "x"]})
        );
        assert_eq!(
            Operation::remove("a.tex").to_raw(),
            json!({"pathname": "a.tex", "newPathname": ""})
        );
        assert_eq!(
            Operation::rename("a.tex", "b.tex").to_raw(),
            json!({"pathname": "a.tex", "newPathname": "b.tex"})
        );
        assert_eq!(
            Operation::add("a.tex", file()).to_raw(),
            json!({"pathname": "a.tex", "file": {
                "hash": EMPTY_BLOB_HASH, "byteLength": 0, "stringLength": 0
            }})
        );
    }

    #[test]
    fn every_variant_round_trips() {
        let mut metadata = serde_json::Map::new();
        metadata.insert("main".into(), json!(true));
        let ops = [
            Operation::edit("a", TextOperation::new().insert("hi")),
            Operation::add("b", file()),
            Operation::remove("c"),
            Operation::rename("d", "e"),
            Operation::SetFileMetadata {
                pathname: "f".into(),
                metadata,
            },
        ];
        for op in ops {
            let json = serde_json::to_string(&op).expect("json");
            let back: Operation = serde_json::from_str(&json).expect("parse");
            assert_eq!(back, op);
        }
    }

    #[test]
    fn rejects_unknown_shapes() {
        assert!(Operation::from_raw(&json!({"pathname": "a"})).is_err());
        assert!(Operation::from_raw(&json!({"textOperation": [1]})).is_err());
        assert!(Operation::from_raw(&json!({"pathname": "a", "textOperation": [0]})).is_err());
    }

    #[test]
    fn add_file_lists_its_blobs() {
        let mut with_ranges = file();
        with_ranges.ranges_hash = Some("ranges".into());
        let op = Operation::add("a", with_ranges);
        assert_eq!(
            op.blob_hashes().collect::<Vec<_>>(),
            vec![EMPTY_BLOB_HASH, "ranges"]
        );
        assert_eq!(Operation::remove("a").blob_hashes().count(), 0);
    }
}
