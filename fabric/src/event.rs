use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Subscribing to this type receives every event.
pub const WILDCARD: &str = "*";

/// Wire frame: `{type, timestamp, payload, source}` plus an optional
/// recipient for addressed delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
}

impl Event {
    /// Broadcast event: delivered to every subscriber of its type plus
    /// wildcard subscribers.
    pub fn broadcast(kind: impl Into<String>, source: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
            recipient: None,
        }
    }

    /// Addressed event carrying an explicit recipient.
    pub fn addressed(
        kind: impl Into<String>,
        source: impl Into<String>,
        recipient: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            recipient: Some(recipient.into()),
            ..Self::broadcast(kind, source, payload)
        }
    }
}
