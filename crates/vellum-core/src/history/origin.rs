//! Provenance of a change.
//!
//! Every origin serializes as `{kind, ...}`. The structured kinds are a closed
//! set matched in [`Origin::from_raw`]; anything else (including a structured
//! kind with a malformed payload) degrades to [`Origin::Plain`] so newer
//! writers never break older readers. Restore timestamps hold millisecond
//! precision, the precision of the wire form.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::timestamp;

const FILE_RESTORE: &str = "file-restore";
const PROJECT_RESTORE: &str = "project-restore";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Any kind without structured payload, e.g. `"upload"`.
    Plain { kind: String },
    /// A single file was restored to its content at `version`.
    RestoreFile {
        version: u64,
        path: String,
        timestamp: DateTime<Utc>,
    },
    /// The whole project was restored to `version`.
    RestoreProject {
        version: u64,
        timestamp: DateTime<Utc>,
    },
}

impl Origin {
    #[must_use]
    pub fn plain(kind: impl Into<String>) -> Self {
        Self::Plain { kind: kind.into() }
    }

    #[must_use]
    pub fn restore_file(version: u64, path: impl Into<String>, ts: DateTime<Utc>) -> Self {
        Self::RestoreFile {
            version,
            path: path.into(),
            timestamp: timestamp::truncate(ts),
        }
    }

    #[must_use]
    pub fn restore_project(version: u64, ts: DateTime<Utc>) -> Self {
        Self::RestoreProject {
            version,
            timestamp: timestamp::truncate(ts),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Plain { kind } => kind,
            Self::RestoreFile { .. } => FILE_RESTORE,
            Self::RestoreProject { .. } => PROJECT_RESTORE,
        }
    }

    /// Parse an origin; `None` in, `None` out. Objects without a string
    /// `kind` are treated as absent.
    #[must_use]
    pub fn from_raw(raw: Option<&Value>) -> Option<Self> {
        let obj = raw?.as_object()?;
        let kind = obj.get("kind")?.as_str()?;
        let structured = match kind {
            FILE_RESTORE => parse_restore_file(obj),
            PROJECT_RESTORE => parse_restore_project(obj),
            _ => None,
        };
        Some(structured.unwrap_or_else(|| Self::plain(kind)))
    }

    #[must_use]
    pub fn to_raw(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("kind".into(), Value::from(self.kind()));
        match self {
            Self::Plain { .. } => {}
            Self::RestoreFile {
                version,
                path,
                timestamp: ts,
            } => {
                obj.insert("version".into(), Value::from(*version));
                obj.insert("path".into(), Value::from(path.as_str()));
                obj.insert("timestamp".into(), Value::from(timestamp::format(ts)));
            }
            Self::RestoreProject {
                version,
                timestamp: ts,
            } => {
                obj.insert("version".into(), Value::from(*version));
                obj.insert("timestamp".into(), Value::from(timestamp::format(ts)));
            }
        }
        Value::Object(obj)
    }
}

fn parse_restore_file(obj: &Map<String, Value>) -> Option<Origin> {
    Some(Origin::restore_file(
        obj.get("version")?.as_u64()?,
        obj.get("path")?.as_str()?,
        raw_timestamp(obj)?,
    ))
}

fn parse_restore_project(obj: &Map<String, Value>) -> Option<Origin> {
    Some(Origin::restore_project(
        obj.get("version")?.as_u64()?,
        raw_timestamp(obj)?,
    ))
}

fn raw_timestamp(obj: &Map<String, Value>) -> Option<DateTime<Utc>> {
    timestamp::parse(obj.get("timestamp")?.as_str()?).ok()
}

impl Serialize for Origin {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_raw().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Origin {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Self::from_raw(Some(&raw)).ok_or_else(|| D::Error::custom("origin without a kind"))
    }
}
