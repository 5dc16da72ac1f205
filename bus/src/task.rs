use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::BusError;

/// Delivery priority. The derived ordering matches delivery order:
/// `Critical` drains before any `High`, and so on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Critical,
    High,
    Normal,
    Low,
}

impl TaskPriority {
    pub const DELIVERY_ORDER: [TaskPriority; 4] = [
        TaskPriority::Critical,
        TaskPriority::High,
        TaskPriority::Normal,
        TaskPriority::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Critical => "critical",
            TaskPriority::High => "high",
            TaskPriority::Normal => "normal",
            TaskPriority::Low => "low",
        }
    }

    /// Boundary validation for priority strings arriving off the wire.
    pub fn parse(value: &str) -> Result<Self, BusError> {
        match value {
            "critical" => Ok(TaskPriority::Critical),
            "high" => Ok(TaskPriority::High),
            "normal" => Ok(TaskPriority::Normal),
            "low" => Ok(TaskPriority::Low),
            other => Err(BusError::UnknownPriority(other.to_string())),
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work addressed to one recipient. Immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub from: String,
    pub to: String,
    pub priority: TaskPriority,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        priority: TaskPriority,
        kind: impl Into<String>,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.into(),
            to: to.into(),
            priority,
            kind: kind.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Ephemeral liveness broadcast; never persisted beyond fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub agent: String,
    pub status: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// Small addressed message; independent of the task priority lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: Value,
    pub created_at: DateTime<Utc>,
}

impl BridgeMessage {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        kind: impl Into<String>,
        content: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.into(),
            to: to.into(),
            kind: kind.into(),
            content,
            created_at: Utc::now(),
        }
    }
}

pub fn task_list_key(recipient: &str, priority: TaskPriority) -> String {
    format!("tasks:{recipient}:{priority}")
}

pub fn notify_channel(recipient: &str) -> String {
    format!("tasks:{recipient}:notify")
}

pub fn message_channel(recipient: &str) -> String {
    format!("message:{recipient}")
}

pub fn heartbeat_channel() -> &'static str {
    "heartbeats"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order_is_total_and_strict() {
        assert!(TaskPriority::Critical < TaskPriority::High);
        assert!(TaskPriority::High < TaskPriority::Normal);
        assert!(TaskPriority::Normal < TaskPriority::Low);
    }

    #[test]
    fn unknown_priority_strings_are_rejected_at_the_boundary() {
        assert!(TaskPriority::parse("critical").is_ok());
        let err = TaskPriority::parse("urgent").unwrap_err();
        assert!(matches!(err, BusError::UnknownPriority(ref p) if p == "urgent"));
    }

    #[test]
    fn task_wire_format_matches_the_contract() {
        let mut payload = Map::new();
        payload.insert("order".into(), Value::String("1".into()));
        let task = Task::new("gateway", "worker", TaskPriority::Critical, "compile", payload);
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["priority"], "critical");
        assert_eq!(value["type"], "compile");
        assert_eq!(value["payload"]["order"], "1");
        assert!(value["created_at"].is_string());

        let parsed: Task = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.id, task.id);
        assert_eq!(parsed.priority, TaskPriority::Critical);
    }

    #[test]
    fn list_keys_follow_the_naming_discipline() {
        assert_eq!(
            task_list_key("worker", TaskPriority::High),
            "tasks:worker:high"
        );
        assert_eq!(notify_channel("worker"), "tasks:worker:notify");
        assert_eq!(message_channel("worker"), "message:worker");
    }
}
