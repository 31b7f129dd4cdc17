// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Change-feed decorator for a durable store.
//!
//! Writes go to the wrapped store first; only after they succeed is a change
//! notification published. A failed publish is logged and swallowed: the
//! persisted row stays authoritative and subscribers catch up on reconnect.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use deskline_core::traits::adapter::PluginAdapter;
use deskline_core::traits::channel::EventChannel;
use deskline_core::traits::store::ConversationStore;
use deskline_core::types::{
    AdapterType, ChangeEvent, Conversation, ConversationId, ConversationStatus, DeliveryStatus,
    DeliveryUpdate, HealthStatus, Message, MessageId, NewConversation, NewMessage, StatusUpdate,
};
use deskline_core::{DesklineError, MessageRecord};

/// A [`ConversationStore`] that broadcasts its own writes.
pub struct ChangeFeedStore {
    inner: Arc<dyn ConversationStore>,
    channel: Arc<dyn EventChannel>,
    name: String,
}

impl ChangeFeedStore {
    pub fn new(inner: Arc<dyn ConversationStore>, channel: Arc<dyn EventChannel>) -> Self {
        let name = format!("{}+feed", inner.name());
        Self {
            inner,
            channel,
            name,
        }
    }

    /// The wrapped store, for reads that should bypass the feed.
    pub fn inner(&self) -> &Arc<dyn ConversationStore> {
        &self.inner
    }

    async fn broadcast(&self, event: ChangeEvent) {
        let conversation_id = event.conversation_id().clone();
        match self.channel.publish(event).await {
            Ok(reached) => {
                debug!(conversation_id = %conversation_id, reached, "change broadcast");
            }
            Err(e) => {
                warn!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "change broadcast failed; subscribers will reconcile on reconnect"
                );
            }
        }
    }
}

#[async_trait]
impl PluginAdapter for ChangeFeedStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> semver::Version {
        self.inner.version()
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Store
    }

    async fn health_check(&self) -> Result<HealthStatus, DesklineError> {
        let store = self.inner.health_check().await?;
        if store != HealthStatus::Healthy {
            return Ok(store);
        }
        match self.channel.health_check().await? {
            HealthStatus::Healthy => Ok(HealthStatus::Healthy),
            HealthStatus::Degraded(reason) | HealthStatus::Unhealthy(reason) => {
                Ok(HealthStatus::Degraded(format!("change feed: {reason}")))
            }
        }
    }

    async fn shutdown(&self) -> Result<(), DesklineError> {
        self.inner.shutdown().await
    }
}

#[async_trait]
impl ConversationStore for ChangeFeedStore {
    async fn create_conversation(
        &self,
        new: NewConversation,
    ) -> Result<Conversation, DesklineError> {
        // Nobody can be subscribed to an id that did not exist yet.
        self.inner.create_conversation(new).await
    }

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, DesklineError> {
        self.inner.get_conversation(id).await
    }

    async fn list_conversations(
        &self,
        status: Option<ConversationStatus>,
    ) -> Result<Vec<Conversation>, DesklineError> {
        self.inner.list_conversations(status).await
    }

    async fn get_conversation_status(
        &self,
        id: &ConversationId,
    ) -> Result<ConversationStatus, DesklineError> {
        self.inner.get_conversation_status(id).await
    }

    async fn set_conversation_status(
        &self,
        id: &ConversationId,
        update: StatusUpdate,
    ) -> Result<Conversation, DesklineError> {
        let conversation = self.inner.set_conversation_status(id, update).await?;
        self.broadcast(ChangeEvent::StatusUpdated {
            conversation_id: conversation.id.clone(),
            status: conversation.status,
            assigned_agent: conversation.assigned_agent.clone(),
        })
        .await;
        Ok(conversation)
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, DesklineError> {
        let message = self.inner.insert_message(message).await?;
        self.broadcast(ChangeEvent::MessageInserted {
            record: MessageRecord::from(&message),
        })
        .await;
        Ok(message)
    }

    async fn get_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, DesklineError> {
        self.inner.get_messages(conversation_id).await
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>, DesklineError> {
        self.inner.get_message(id).await
    }

    async fn update_message_delivery_status(
        &self,
        id: &MessageId,
        status: DeliveryStatus,
    ) -> Result<DeliveryUpdate, DesklineError> {
        let outcome = self.inner.update_message_delivery_status(id, status).await?;
        if outcome == DeliveryUpdate::Applied {
            match self.inner.get_message(id).await {
                Ok(Some(message)) => {
                    self.broadcast(ChangeEvent::MessageUpdated {
                        record: MessageRecord::from(&message),
                    })
                    .await;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(message_id = %id, error = %e, "could not load updated message for broadcast");
                }
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InProcessChannel;
    use deskline_config::StorageConfig;
    use deskline_core::types::{ChannelEvent, ChannelSignal, MessageRole};
    use deskline_storage::SqliteStore;

    async fn feed() -> (ChangeFeedStore, Arc<InProcessChannel>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            database_path: dir.path().join("feed.db").display().to_string(),
            wal_mode: true,
        };
        let store = SqliteStore::new(config);
        store.initialize().await.unwrap();
        let channel = Arc::new(InProcessChannel::new());
        let feed = ChangeFeedStore::new(Arc::new(store), channel.clone());
        (feed, channel, dir)
    }

    async fn next_change(sub: &mut deskline_core::Subscription) -> ChangeEvent {
        loop {
            match sub.events.recv().await {
                Some(ChannelEvent::Change(change)) => return change,
                Some(ChannelEvent::Signal(ChannelSignal::Subscribed)) => continue,
                other => panic!("unexpected channel event: {other:?}"),
            }
        }
    }

    fn new_conversation() -> NewConversation {
        NewConversation {
            chatbot_id: "bot-1".into(),
            customer_email: Some("pat@example.com".into()),
            source: "widget".into(),
        }
    }

    #[tokio::test]
    async fn insert_is_broadcast_with_role() {
        let (feed, channel, _dir) = feed().await;
        let conv = feed.create_conversation(new_conversation()).await.unwrap();
        let mut sub = channel.subscribe(&conv.id).await.unwrap();

        let msg = feed
            .insert_message(NewMessage::text(conv.id.clone(), MessageRole::Agent, "hi"))
            .await
            .unwrap();

        match next_change(&mut sub).await {
            ChangeEvent::MessageInserted { record } => {
                assert_eq!(record.id, msg.id);
                assert_eq!(record.role.as_deref(), Some("agent"));
                assert_eq!(record.delivery_status, Some(DeliveryStatus::Pending));
            }
            other => panic!("expected insert, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn only_applied_delivery_updates_are_broadcast() {
        let (feed, channel, _dir) = feed().await;
        let conv = feed.create_conversation(new_conversation()).await.unwrap();
        let msg = feed
            .insert_message(NewMessage::text(conv.id.clone(), MessageRole::Agent, "hi"))
            .await
            .unwrap();
        let mut sub = channel.subscribe(&conv.id).await.unwrap();

        let first = feed
            .update_message_delivery_status(&msg.id, DeliveryStatus::Delivered)
            .await
            .unwrap();
        let second = feed
            .update_message_delivery_status(&msg.id, DeliveryStatus::Delivered)
            .await
            .unwrap();
        assert_eq!(first, DeliveryUpdate::Applied);
        assert_eq!(second, DeliveryUpdate::AlreadyApplied);

        match next_change(&mut sub).await {
            ChangeEvent::MessageUpdated { record } => {
                assert_eq!(record.delivery_status, Some(DeliveryStatus::Delivered));
            }
            other => panic!("expected update, got {other:?}"),
        }
        assert!(sub.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn write_survives_failed_broadcast() {
        let (feed, channel, _dir) = feed().await;
        let conv = feed.create_conversation(new_conversation()).await.unwrap();
        channel.shutdown().await.unwrap();

        let updated = feed
            .set_conversation_status(
                &conv.id,
                StatusUpdate {
                    status: ConversationStatus::Resolved,
                    assigned_agent: None,
                    expected: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, ConversationStatus::Resolved);
        assert_eq!(
            feed.get_conversation_status(&conv.id).await.unwrap(),
            ConversationStatus::Resolved
        );
    }
}
