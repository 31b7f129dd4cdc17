// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Raw message rows as they travel over the event channel.
//!
//! Rows written by older clients or third-party automations may omit the
//! `role` column. [`MessageRecord::into_message`] is the only place that
//! guesses a role from the payload; everything past this boundary works with
//! the typed [`MessageRole`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::types::{ConversationId, DeliveryStatus, Message, MessageId, MessageRole, Sentiment};

/// A message row as delivered by a change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub role: Option<String>,
    pub content: String,
    #[serde(default)]
    pub image_ref: Option<String>,
    #[serde(default)]
    pub sentiment: Option<Sentiment>,
    #[serde(default)]
    pub delivery_status: Option<DeliveryStatus>,
    pub created_at: DateTime<Utc>,
    /// Free-form payload attached by the writer.
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl MessageRecord {
    /// Converts the row into a typed message, resolving the role.
    pub fn into_message(self) -> Message {
        let role = resolve_role(self.role.as_deref(), self.metadata.as_ref());
        Message {
            id: self.id,
            conversation_id: self.conversation_id,
            role,
            content: self.content,
            image_ref: self.image_ref,
            sentiment: self.sentiment,
            delivery_status: self.delivery_status,
            created_at: self.created_at,
        }
    }
}

impl From<&Message> for MessageRecord {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            conversation_id: message.conversation_id.clone(),
            role: Some(message.role.to_string()),
            content: message.content.clone(),
            image_ref: message.image_ref.clone(),
            sentiment: message.sentiment.clone(),
            delivery_status: message.delivery_status,
            created_at: message.created_at,
            metadata: None,
        }
    }
}

/// Resolves the author of a row.
///
/// An explicit, parseable `role` always wins. Otherwise the metadata is
/// inspected: `sender_type`, then agent markers (`agent_id`, `agent_name`),
/// then bot markers (`is_bot`, `ai_generated`), then `system`. Rows with no
/// usable hint are attributed to the customer.
pub fn resolve_role(explicit: Option<&str>, metadata: Option<&Value>) -> MessageRole {
    if let Some(role) = explicit.and_then(|r| r.trim().parse::<MessageRole>().ok()) {
        return role;
    }

    let role = metadata.map(role_from_metadata).unwrap_or(MessageRole::User);
    debug!(explicit = ?explicit, role = %role, "message role resolved from payload");
    role
}

fn role_from_metadata(metadata: &Value) -> MessageRole {
    if let Some(role) = metadata
        .get("sender_type")
        .and_then(Value::as_str)
        .and_then(|s| s.trim().parse::<MessageRole>().ok())
    {
        return role;
    }

    let present = |key: &str| metadata.get(key).is_some_and(|v| !v.is_null());
    let flagged = |key: &str| metadata.get(key).and_then(Value::as_bool).unwrap_or(false);

    if present("agent_id") || present("agent_name") {
        MessageRole::Agent
    } else if flagged("is_bot") || flagged("ai_generated") {
        MessageRole::Assistant
    } else if flagged("system") {
        MessageRole::System
    } else {
        MessageRole::User
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(role: Option<&str>, metadata: Option<Value>) -> MessageRecord {
        MessageRecord {
            id: MessageId::from("m-1"),
            conversation_id: ConversationId::from("c-1"),
            role: role.map(str::to_string),
            content: "hi".into(),
            image_ref: None,
            sentiment: None,
            delivery_status: None,
            created_at: Utc::now(),
            metadata,
        }
    }

    #[test]
    fn explicit_role_takes_precedence_over_metadata() {
        let msg = record(Some("assistant"), Some(json!({ "agent_id": "a-1" }))).into_message();
        assert_eq!(msg.role, MessageRole::Assistant);
    }

    #[test]
    fn explicit_role_is_case_insensitive() {
        assert_eq!(resolve_role(Some("Agent"), None), MessageRole::Agent);
    }

    #[test]
    fn unparseable_role_falls_back_to_heuristics() {
        let meta = json!({ "agent_name": "Dana" });
        assert_eq!(resolve_role(Some("operator"), Some(&meta)), MessageRole::Agent);
    }

    #[test]
    fn metadata_heuristics() {
        assert_eq!(
            resolve_role(None, Some(&json!({ "sender_type": "system" }))),
            MessageRole::System
        );
        assert_eq!(
            resolve_role(None, Some(&json!({ "is_bot": true }))),
            MessageRole::Assistant
        );
        assert_eq!(
            resolve_role(None, Some(&json!({ "ai_generated": true }))),
            MessageRole::Assistant
        );
        assert_eq!(
            resolve_role(None, Some(&json!({ "agent_id": null }))),
            MessageRole::User
        );
        assert_eq!(resolve_role(None, None), MessageRole::User);
    }

    #[test]
    fn record_from_message_keeps_role() {
        let msg = record(Some("agent"), None).into_message();
        let back = MessageRecord::from(&msg);
        assert_eq!(back.role.as_deref(), Some("agent"));
        assert_eq!(back.into_message(), msg);
    }
}
