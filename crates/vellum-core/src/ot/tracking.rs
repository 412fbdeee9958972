//! Tracked-change metadata and the three-state tracking directive carried by
//! retains.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Value, json};

use super::OperationError;
use crate::timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingType {
    Insert,
    Delete,
}

/// Marks a span as a pending tracked insertion or deletion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackingProps {
    #[serde(rename = "type")]
    pub kind: TrackingType,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(with = "timestamp")]
    pub ts: DateTime<Utc>,
}

impl TrackingProps {
    #[must_use]
    pub fn new(kind: TrackingType, user_id: impl Into<String>, ts: DateTime<Utc>) -> Self {
        Self {
            kind,
            user_id: user_id.into(),
            ts,
        }
    }

    /// Two spans can be joined when they share author and type; the joined
    /// span keeps the later timestamp.
    #[must_use]
    pub fn same_author(&self, other: &Self) -> bool {
        self.kind == other.kind && self.user_id == other.user_id
    }
}

/// What a retain does to existing tracking on the span it covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum TrackingDirective {
    /// Leave existing tracking untouched.
    #[default]
    Unspecified,
    /// Replace tracking on the span.
    Tracked(TrackingProps),
    /// Strip any tracking on the span.
    Clear,
}

const CLEAR_TYPE: &str = "none";

impl TrackingDirective {
    #[must_use]
    pub const fn is_unspecified(&self) -> bool {
        matches!(self, Self::Unspecified)
    }

    /// The later directive wins unless it leaves tracking untouched.
    #[must_use]
    pub fn then(&self, later: &Self) -> Self {
        if later.is_unspecified() {
            self.clone()
        } else {
            later.clone()
        }
    }

    /// Raw form, `None` when unspecified.
    #[must_use]
    pub fn to_raw(&self) -> Option<Value> {
        match self {
            Self::Unspecified => None,
            Self::Tracked(props) => serde_json::to_value(props).ok(),
            Self::Clear => Some(json!({ "type": CLEAR_TYPE })),
        }
    }

    /// # Errors
    ///
    /// Returns [`OperationError::InvalidRaw`] when the value is neither the
    /// clear sentinel nor valid tracking props.
    pub fn from_raw(raw: Option<&Value>) -> Result<Self, OperationError> {
        let Some(raw) = raw else {
            return Ok(Self::Unspecified);
        };
        if raw.get("type").and_then(Value::as_str) == Some(CLEAR_TYPE) {
            return Ok(Self::Clear);
        }
        serde_json::from_value(raw.clone())
            .map(Self::Tracked)
            .map_err(|e| OperationError::InvalidRaw(format!("tracking: {e}")))
    }
}

impl From<TrackingProps> for TrackingDirective {
    fn from(props: TrackingProps) -> Self {
        Self::Tracked(props)
    }
}

impl Serialize for TrackingDirective {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_raw().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TrackingDirective {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<Value>::deserialize(deserializer)?;
        Self::from_raw(raw.as_ref()).map_err(D::Error::custom)
    }
}
