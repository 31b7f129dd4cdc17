// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by the store, the event channel, and both sessions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::record::MessageRecord;

/// Unique identifier for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Unique identifier for a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifier of one live subscription on an event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of adapter behind a trait object.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Store,
    EventChannel,
    Responder,
}

/// Who is currently responsible for replying in a conversation.
///
/// Exactly one value holds at any time. `Resolved` is terminal: a customer
/// writing after resolution starts a new conversation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationStatus {
    AiHandling,
    AwaitingHumanResponse,
    Resolved,
}

impl ConversationStatus {
    /// Whether automated replies may be generated in this status.
    pub fn ai_replies_allowed(self) -> bool {
        self == ConversationStatus::AiHandling
    }

    pub fn is_terminal(self) -> bool {
        self == ConversationStatus::Resolved
    }
}

/// Author of a message. Immutable after creation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The customer, writing from the widget.
    User,
    /// The AI responder.
    Assistant,
    /// A human agent, writing from the help desk.
    Agent,
    /// Notices emitted by status transitions.
    System,
}

/// Delivery state of an agent-authored message as seen by the widget.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    /// `Delivered` and `Failed` never change again.
    pub fn is_final(self) -> bool {
        self != DeliveryStatus::Pending
    }

    /// Only `pending -> delivered` and `pending -> failed` are legal.
    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        self == DeliveryStatus::Pending && next.is_final()
    }
}

/// Outcome of an idempotent delivery-status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryUpdate {
    /// The status moved from `pending` to the requested value.
    Applied,
    /// The message already had the requested status; nothing changed.
    AlreadyApplied,
    /// The message is in another final status, or carries no delivery status.
    Rejected { current: Option<DeliveryStatus> },
}

/// Decides what a delivery-status write does, given the stored status.
///
/// Shared by every store implementation so the idempotence rule lives in one place.
pub fn plan_delivery_update(
    current: Option<DeliveryStatus>,
    target: DeliveryStatus,
) -> DeliveryUpdate {
    match current {
        Some(status) if status == target => DeliveryUpdate::AlreadyApplied,
        Some(status) if status.can_transition_to(target) => DeliveryUpdate::Applied,
        other => DeliveryUpdate::Rejected { current: other },
    }
}

/// Perceived liveness of a realtime subscription.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Subscribed,
    Error,
    Closed,
}

/// Sentiment attached to a message by an external analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    pub label: String,
    pub score: f32,
}

/// A persisted conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub chatbot_id: String,
    pub customer_email: Option<String>,
    /// Origin channel, e.g. `widget`.
    pub source: String,
    pub status: ConversationStatus,
    pub assigned_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a conversation. New conversations start in `AI_HANDLING`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewConversation {
    pub chatbot_id: String,
    pub customer_email: Option<String>,
    pub source: String,
}

/// A status write. `expected` turns the write into a compare-and-set.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: ConversationStatus,
    pub assigned_agent: Option<String>,
    pub expected: Option<ConversationStatus>,
}

/// A persisted message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub role: MessageRole,
    pub content: String,
    pub image_ref: Option<String>,
    pub sentiment: Option<Sentiment>,
    /// Set only on agent-authored messages.
    pub delivery_status: Option<DeliveryStatus>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_agent_authored(&self) -> bool {
        self.role == MessageRole::Agent
    }
}

/// Input for inserting a message.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub role: MessageRole,
    pub content: String,
    pub image_ref: Option<String>,
    pub sentiment: Option<Sentiment>,
}

impl NewMessage {
    pub fn text(
        conversation_id: ConversationId,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id,
            role,
            content: content.into(),
            image_ref: None,
            sentiment: None,
        }
    }

    pub fn with_image(mut self, image_ref: Option<String>) -> Self {
        self.image_ref = image_ref;
        self
    }

    pub fn with_sentiment(mut self, sentiment: Option<Sentiment>) -> Self {
        self.sentiment = sentiment;
        self
    }

    /// Agent messages start `pending`; every other role has no delivery status.
    pub fn initial_delivery_status(&self) -> Option<DeliveryStatus> {
        (self.role == MessageRole::Agent).then_some(DeliveryStatus::Pending)
    }

    /// Materializes the message with a fresh identifier and timestamp.
    pub fn into_message(self, id: MessageId, created_at: DateTime<Utc>) -> Message {
        let delivery_status = self.initial_delivery_status();
        Message {
            id,
            conversation_id: self.conversation_id,
            role: self.role,
            content: self.content,
            image_ref: self.image_ref,
            sentiment: self.sentiment,
            delivery_status,
            created_at,
        }
    }
}

/// Row-level change notification carried by the event channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    MessageInserted { record: MessageRecord },
    MessageUpdated { record: MessageRecord },
    StatusUpdated {
        conversation_id: ConversationId,
        status: ConversationStatus,
        assigned_agent: Option<String>,
    },
}

impl ChangeEvent {
    /// The conversation this change belongs to; used as the channel key.
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            ChangeEvent::MessageInserted { record } | ChangeEvent::MessageUpdated { record } => {
                &record.conversation_id
            }
            ChangeEvent::StatusUpdated {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

/// Connection lifecycle signal emitted by the event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelSignal {
    Subscribed,
    Error(String),
    TimedOut,
    Closed,
}

impl fmt::Display for ChannelSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelSignal::Subscribed => write!(f, "subscribed"),
            ChannelSignal::Error(reason) => write!(f, "error: {reason}"),
            ChannelSignal::TimedOut => write!(f, "timed out"),
            ChannelSignal::Closed => write!(f, "closed"),
        }
    }
}

/// Everything a subscriber can receive.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Change(ChangeEvent),
    Signal(ChannelSignal),
}
