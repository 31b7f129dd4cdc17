// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the deskline hand-off runtime.
//!
//! This crate provides the foundational trait definitions, error types, and
//! common types used throughout the deskline workspace. The durable store,
//! the event channel, and the AI responder are all reached through the
//! traits defined here.

pub mod error;
pub mod record;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::DesklineError;
pub use record::MessageRecord;
pub use types::{
    AdapterType, ChangeEvent, ChannelEvent, ChannelSignal, ConnectionState, Conversation,
    ConversationId, ConversationStatus, DeliveryStatus, DeliveryUpdate, HealthStatus, Message,
    MessageId, MessageRole, NewConversation, NewMessage, StatusUpdate, SubscriptionId,
};

// Re-export all adapter traits at crate root.
pub use traits::{
    AiReply, AutoResponder, ConversationStore, EventChannel, PluginAdapter, ResponderRequest,
    Subscription,
};
