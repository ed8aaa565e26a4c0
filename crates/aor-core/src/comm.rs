// AOR Core - Comm message type
//
// The single unit of communication flowing through agents, flows, and
// graph nodes. Comms are never mutated in place; every derivation produces
// a new value linked through `parent_id`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Message category.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommType {
    #[default]
    Text,
    System,
    Error,
    ToolCall,
    ToolResult,
}

/// Conversation role of the sender.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommRole {
    #[default]
    User,
    System,
    Assistant,
    Tool,
}

/// Delivery priority.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    Urgent,
    Critical,
}

/// A message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comm {
    /// Unique message id
    pub id: String,

    /// Id of the message this one derives from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Message body
    pub content: String,

    /// Sender identifier
    pub from: String,

    /// Recipient identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    #[serde(rename = "type", default)]
    pub comm_type: CommType,

    #[serde(default)]
    pub role: CommRole,

    #[serde(default)]
    pub priority: Priority,

    /// Structured payload accompanying the content
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, serde_json::Value>,

    /// Out-of-band metadata (correlation, timing, routing hints)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Comm {
    /// Create a new message.
    pub fn new(content: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: None,
            content: content.into(),
            from: from.into(),
            to: None,
            comm_type: CommType::default(),
            role: CommRole::default(),
            priority: Priority::default(),
            data: HashMap::new(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
            ttl_ms: None,
            expires_at: None,
        }
    }

    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    pub fn with_type(mut self, comm_type: CommType) -> Self {
        self.comm_type = comm_type;
        self
    }

    pub fn with_role(mut self, role: CommRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_data(mut self, data: HashMap<String, serde_json::Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_data_entry(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_metadata_entry(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set a time-to-live; `expires_at` is derived from `created_at`.
    pub fn with_ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self.expires_at = Some(self.created_at + Duration::milliseconds(ttl_ms as i64));
        self
    }

    /// Produce a reply: a new message parented on this one, addressed back
    /// to the sender, preserving correlation metadata.
    pub fn reply(&self, content: impl Into<String>, from: impl Into<String>) -> Self {
        let mut reply = Comm::new(content, from)
            .with_to(self.from.clone())
            .with_role(CommRole::Assistant);
        reply.parent_id = Some(self.id.clone());
        if let Some(correlation) = self.metadata.get("correlation_id") {
            reply
                .metadata
                .insert("correlation_id".to_string(), correlation.clone());
        }
        reply
    }

    /// Whether the message has outlived its TTL.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() > expires_at,
            None => false,
        }
    }

    /// String payload accessor.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_defaults() {
        let comm = Comm::new("hello", "user");
        assert_eq!(comm.content, "hello");
        assert_eq!(comm.from, "user");
        assert_eq!(comm.comm_type, CommType::Text);
        assert_eq!(comm.role, CommRole::User);
        assert_eq!(comm.priority, Priority::Normal);
        assert!(comm.to.is_none());
        assert!(!comm.is_expired());
    }

    #[test]
    fn test_reply_links_parent_and_direction() {
        let original = Comm::new("question", "alice")
            .with_metadata_entry("correlation_id", json!("corr-1"));
        let reply = original.reply("answer", "assistant");

        assert_eq!(reply.parent_id.as_deref(), Some(original.id.as_str()));
        assert_eq!(reply.to.as_deref(), Some("alice"));
        assert_eq!(reply.role, CommRole::Assistant);
        assert_eq!(reply.metadata.get("correlation_id"), Some(&json!("corr-1")));
        assert_ne!(reply.id, original.id);
    }

    #[test]
    fn test_ttl_expiry() {
        let mut comm = Comm::new("stale", "user").with_ttl(1);
        assert!(comm.expires_at.is_some());

        // Force the expiry into the past.
        comm.expires_at = Some(Utc::now() - Duration::milliseconds(10));
        assert!(comm.is_expired());

        let fresh = Comm::new("fresh", "user").with_ttl(60_000);
        assert!(!fresh.is_expired());
    }

    #[test]
    fn test_serde_round_trip() {
        let comm = Comm::new("payload", "svc")
            .with_to("worker")
            .with_type(CommType::ToolCall)
            .with_priority(Priority::Urgent)
            .with_data_entry("key", json!({"nested": true}));

        let encoded = serde_json::to_string(&comm).unwrap();
        assert!(encoded.contains("\"TOOL_CALL\""));
        assert!(encoded.contains("\"URGENT\""));

        let decoded: Comm = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.id, comm.id);
        assert_eq!(decoded.comm_type, CommType::ToolCall);
        assert_eq!(decoded.data.get("key"), Some(&json!({"nested": true})));
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::Urgent);
        assert!(Priority::Urgent > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }
}
