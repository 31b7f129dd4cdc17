// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event channel trait: publish/subscribe of row-level changes keyed by conversation.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::DesklineError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{ChangeEvent, ChannelEvent, ConversationId, SubscriptionId};

/// One live subscription to a conversation's changes.
///
/// The first event on a healthy subscription is
/// [`ChannelSignal::Subscribed`](crate::types::ChannelSignal::Subscribed).
/// When the transport drops, an error, timeout, or close signal is sent and
/// the receiver ends; nothing published in the meantime is replayed.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub conversation_id: ConversationId,
    pub events: mpsc::Receiver<ChannelEvent>,
}

/// At-least-once, best-effort-ordered change transport.
#[async_trait]
pub trait EventChannel: PluginAdapter {
    /// Opens a subscription for one conversation.
    async fn subscribe(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Subscription, DesklineError>;

    /// Tears a subscription down. Unknown ids are ignored.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), DesklineError>;

    /// Delivers a change to every subscriber of its conversation.
    ///
    /// Returns the number of subscribers reached.
    async fn publish(&self, event: ChangeEvent) -> Result<usize, DesklineError>;
}
