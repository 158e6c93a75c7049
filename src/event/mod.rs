//! Trigger event types for TriggerClaw
//!
//! This module defines the inbound event shape consumed from the trigger
//! source, its validation rules, and the dedup cache used to suppress
//! at-least-once redelivery.

pub mod dedup;

pub use dedup::DedupCache;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TriggerError};

/// Where a trigger event originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    /// Inbound email (new message in a monitored inbox)
    Email,
    /// Inbound chat message
    Chat,
    /// Generic webhook delivery
    Webhook,
    /// Anything the subscriber does not recognize
    #[serde(other)]
    Unknown,
}

impl Default for TriggerSource {
    fn default() -> Self {
        TriggerSource::Email
    }
}

/// The payload carried by a trigger event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventPayload {
    /// Sender address, normalized to the bare address
    pub sender: String,
    /// Message subject line
    pub subject: String,
    /// Free-form message body containing the instruction
    pub body: String,
    /// Thread the reply should be posted on, when the source has threads
    pub thread_id: Option<String>,
}

/// An inbound trigger event. Immutable once parsed; identity is `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
    /// Unique event identifier, used for deduplication
    pub id: String,
    /// Where the event came from
    #[serde(default)]
    pub source: TriggerSource,
    /// The user this event belongs to (scopes session and connections)
    pub user_id: String,
    /// When the external condition occurred
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
    /// The message payload
    pub payload: EventPayload,
}

impl TriggerEvent {
    /// Parse and validate a raw event from the trigger source.
    ///
    /// Required fields: non-empty `id`, `userId` and `payload.body`.
    /// Anything else missing falls back to a default. The sender address is
    /// normalized from `"Name <addr>"` form to the bare address.
    ///
    /// # Errors
    /// Returns [`TriggerError::MalformedEvent`] when a required field is
    /// missing or empty. Malformed events are dropped, never retried.
    pub fn parse(raw: &Value) -> Result<Self> {
        let mut event: TriggerEvent = serde_json::from_value(raw.clone())
            .map_err(|e| TriggerError::MalformedEvent(format!("invalid event shape: {}", e)))?;

        if event.id.trim().is_empty() {
            return Err(TriggerError::MalformedEvent("empty event id".to_string()));
        }
        if event.user_id.trim().is_empty() {
            return Err(TriggerError::MalformedEvent("empty userId".to_string()));
        }
        if event.payload.body.trim().is_empty() {
            return Err(TriggerError::MalformedEvent(
                "empty payload.body".to_string(),
            ));
        }

        event.payload.sender = normalize_address(&event.payload.sender);
        Ok(event)
    }

    /// The instruction text handed to the planner, composed the way the
    /// message arrived: subject and sender on top, body below.
    pub fn instruction(&self) -> String {
        format!(
            "Subject: {}\n\nFrom: {}\n\n{}",
            self.payload.subject, self.payload.sender, self.payload.body
        )
    }

    /// True when this event was sent by the assistant's own address.
    /// Processing such events would reply to our own replies.
    pub fn is_from(&self, address: &str) -> bool {
        !address.is_empty() && self.payload.sender.eq_ignore_ascii_case(address)
    }
}

/// Normalize a sender address: `"Alice Smith <alice@example.com>"` becomes
/// `"alice@example.com"`. A bare address passes through unchanged.
pub fn normalize_address(raw: &str) -> String {
    if let (Some(start), Some(end)) = (raw.find('<'), raw.rfind('>')) {
        if start < end {
            return raw[start + 1..end].trim().to_string();
        }
    }
    raw.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_raw() -> Value {
        json!({
            "id": "evt-1",
            "source": "email",
            "userId": "alice@example.com",
            "occurredAt": "2025-06-01T12:00:00Z",
            "payload": {
                "sender": "Alice Smith <alice@example.com>",
                "subject": "Issue request",
                "body": "Create a GitHub issue titled X",
                "threadId": "thread-9"
            }
        })
    }

    #[test]
    fn test_parse_valid_event() {
        let event = TriggerEvent::parse(&valid_raw()).unwrap();
        assert_eq!(event.id, "evt-1");
        assert_eq!(event.source, TriggerSource::Email);
        assert_eq!(event.user_id, "alice@example.com");
        assert_eq!(event.payload.sender, "alice@example.com");
        assert_eq!(event.payload.thread_id.as_deref(), Some("thread-9"));
    }

    #[test]
    fn test_parse_missing_id_rejected() {
        let mut raw = valid_raw();
        raw.as_object_mut().unwrap().remove("id");
        let err = TriggerEvent::parse(&raw).unwrap_err();
        assert!(matches!(err, TriggerError::MalformedEvent(_)));
    }

    #[test]
    fn test_parse_empty_user_id_rejected() {
        let mut raw = valid_raw();
        raw["userId"] = json!("  ");
        let err = TriggerEvent::parse(&raw).unwrap_err();
        assert!(matches!(err, TriggerError::MalformedEvent(_)));
    }

    #[test]
    fn test_parse_empty_body_rejected() {
        let mut raw = valid_raw();
        raw["payload"]["body"] = json!("");
        let err = TriggerEvent::parse(&raw).unwrap_err();
        assert!(matches!(err, TriggerError::MalformedEvent(_)));
    }

    #[test]
    fn test_parse_defaults_for_optional_fields() {
        let raw = json!({
            "id": "evt-2",
            "userId": "bob@example.com",
            "payload": {"body": "Summarize my inbox"}
        });
        let event = TriggerEvent::parse(&raw).unwrap();
        assert_eq!(event.source, TriggerSource::Email);
        assert!(event.payload.thread_id.is_none());
        assert!(event.payload.subject.is_empty());
    }

    #[test]
    fn test_parse_unknown_source() {
        let mut raw = valid_raw();
        raw["source"] = json!("carrier-pigeon");
        let event = TriggerEvent::parse(&raw).unwrap();
        assert_eq!(event.source, TriggerSource::Unknown);
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(
            normalize_address("Alice Smith <alice@example.com>"),
            "alice@example.com"
        );
        assert_eq!(normalize_address("bob@example.com"), "bob@example.com");
        assert_eq!(normalize_address("  carol@example.com "), "carol@example.com");
        // Unbalanced brackets pass through
        assert_eq!(normalize_address("broken <addr"), "broken <addr");
    }

    #[test]
    fn test_is_from_case_insensitive() {
        let event = TriggerEvent::parse(&valid_raw()).unwrap();
        assert!(event.is_from("Alice@Example.com"));
        assert!(!event.is_from("assistant@example.com"));
        assert!(!event.is_from(""));
    }

    #[test]
    fn test_instruction_composition() {
        let event = TriggerEvent::parse(&valid_raw()).unwrap();
        let instruction = event.instruction();
        assert!(instruction.contains("Subject: Issue request"));
        assert!(instruction.contains("From: alice@example.com"));
        assert!(instruction.contains("Create a GitHub issue titled X"));
    }
}
