// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable store trait: the single source of truth for conversations and messages.

use async_trait::async_trait;

use crate::error::DesklineError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{
    Conversation, ConversationId, ConversationStatus, DeliveryStatus, DeliveryUpdate, Message,
    MessageId, NewConversation, NewMessage, StatusUpdate,
};

/// Persistence backend for conversations and messages.
///
/// Implementations must make [`update_message_delivery_status`] idempotent:
/// concurrent duplicate writes of the same status resolve to one applied
/// update and any number of [`DeliveryUpdate::AlreadyApplied`].
///
/// [`update_message_delivery_status`]: ConversationStore::update_message_delivery_status
#[async_trait]
pub trait ConversationStore: PluginAdapter {
    /// Creates a conversation in `AI_HANDLING`.
    async fn create_conversation(
        &self,
        new: NewConversation,
    ) -> Result<Conversation, DesklineError>;

    /// Point lookup of a conversation.
    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, DesklineError>;

    /// Lists conversations, most recently updated first.
    async fn list_conversations(
        &self,
        status: Option<ConversationStatus>,
    ) -> Result<Vec<Conversation>, DesklineError>;

    /// Current status, or `NotFound`.
    async fn get_conversation_status(
        &self,
        id: &ConversationId,
    ) -> Result<ConversationStatus, DesklineError> {
        self.get_conversation(id)
            .await?
            .map(|c| c.status)
            .ok_or_else(|| DesklineError::NotFound {
                entity: "conversation",
                id: id.to_string(),
            })
    }

    /// Single atomic update of the status (and assigned agent).
    ///
    /// When `update.expected` is set and differs from the stored status the
    /// write is refused with [`DesklineError::Conflict`]; otherwise the last
    /// write wins.
    async fn set_conversation_status(
        &self,
        id: &ConversationId,
        update: StatusUpdate,
    ) -> Result<Conversation, DesklineError>;

    /// Inserts a message and returns it with its assigned id and timestamp.
    async fn insert_message(&self, message: NewMessage) -> Result<Message, DesklineError>;

    /// Messages of a conversation in commit order, or `NotFound`.
    async fn get_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, DesklineError>;

    /// Point lookup of a message.
    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>, DesklineError>;

    /// Idempotent delivery-status write.
    async fn update_message_delivery_status(
        &self,
        id: &MessageId,
        status: DeliveryStatus,
    ) -> Result<DeliveryUpdate, DesklineError>;
}
