// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` assembles a complete runtime: a store (in memory by
//! default, or SQLite in a temp directory) wrapped in a change feed, a
//! [`FaultyChannel`] carrying the changes, and a [`MockResponder`]. Widget
//! and help-desk sessions opened through it talk to each other only through
//! the store and the channel, as they would in production.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use deskline_agent::{ConversationCache, HelpDeskSession, Runtime, WidgetOptions, WidgetSession};
use deskline_bus::ChangeFeedStore;
use deskline_config::{DesklineConfig, StorageConfig};
use deskline_core::traits::responder::AiReply;
use deskline_core::types::{Conversation, ConversationId, NewConversation};
use deskline_core::{ConversationStore, DesklineError};
use deskline_storage::SqliteStore;

use crate::faulty_channel::FaultyChannel;
use crate::memory_store::MemoryStore;
use crate::mock_responder::MockResponder;

/// How long [`wait_until`] waits before failing the test.
pub const WAIT_LIMIT: Duration = Duration::from_secs(60);

/// Waits until `pred` holds for the watched value and returns a copy of it.
///
/// Panics after [`WAIT_LIMIT`].
pub async fn wait_until<T, F>(rx: &mut watch::Receiver<T>, pred: F) -> T
where
    T: Clone,
    F: FnMut(&T) -> bool,
{
    tokio::time::timeout(WAIT_LIMIT, rx.wait_for(pred))
        .await
        .expect("condition not reached in time")
        .expect("watched value dropped")
        .clone()
}

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    replies: Vec<AiReply>,
    reply_delay: Option<Duration>,
    config: DesklineConfig,
    sqlite: bool,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            replies: Vec::new(),
            reply_delay: None,
            config: DesklineConfig::default(),
            sqlite: false,
        }
    }

    /// Set mock responder replies as plain text.
    pub fn with_mock_responses(mut self, responses: Vec<String>) -> Self {
        self.replies = responses.into_iter().map(AiReply::text).collect();
        self
    }

    /// Set mock responder replies, including risk scores and sentiment.
    pub fn with_replies(mut self, replies: Vec<AiReply>) -> Self {
        self.replies = replies;
        self
    }

    /// Make the mock responder take `delay` for every reply.
    pub fn with_reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = Some(delay);
        self
    }

    /// Adjust the configuration before the runtime is built.
    pub fn configure(mut self, f: impl FnOnce(&mut DesklineConfig)) -> Self {
        f(&mut self.config);
        self
    }

    /// Persist to SQLite in a temp directory instead of memory.
    ///
    /// Fault injection on the store is unavailable in this mode.
    pub fn with_sqlite(mut self) -> Self {
        self.sqlite = true;
        self
    }

    /// Build the test harness, creating all required subsystems.
    pub async fn build(self) -> Result<TestHarness, DesklineError> {
        let temp_dir = tempfile::TempDir::new().map_err(DesklineError::storage)?;
        let mut config = self.config;

        let (inner, memory): (Arc<dyn ConversationStore>, Option<Arc<MemoryStore>>) =
            if self.sqlite {
                config.storage = StorageConfig {
                    database_path: temp_dir
                        .path()
                        .join("test.db")
                        .to_string_lossy()
                        .to_string(),
                    wal_mode: true,
                };
                let store = SqliteStore::new(config.storage.clone());
                store.initialize().await?;
                let store: Arc<dyn ConversationStore> = Arc::new(store);
                (store, None)
            } else {
                let memory = Arc::new(MemoryStore::new());
                let store: Arc<dyn ConversationStore> = memory.clone();
                (store, Some(memory))
            };

        let channel = Arc::new(FaultyChannel::new());
        let store: Arc<dyn ConversationStore> =
            Arc::new(ChangeFeedStore::new(inner, channel.clone()));
        let mut responder = MockResponder::with_replies(self.replies);
        if let Some(delay) = self.reply_delay {
            responder = responder.with_delay(delay);
        }
        let responder = Arc::new(responder);
        let cache = ConversationCache::in_memory(&config.widget);
        let runtime = Runtime::new(store.clone(), channel.clone(), responder.clone(), config);

        Ok(TestHarness {
            runtime,
            store,
            memory,
            channel,
            responder,
            cache,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete test environment with mock adapters and temp storage.
pub struct TestHarness {
    /// The runtime sessions are opened against.
    pub runtime: Runtime,
    /// The store as sessions see it (writes are broadcast).
    pub store: Arc<dyn ConversationStore>,
    /// The in-memory store under the feed, for fault injection.
    pub memory: Option<Arc<MemoryStore>>,
    /// The event channel, for dropping connections.
    pub channel: Arc<FaultyChannel>,
    /// The mock AI responder.
    pub responder: Arc<MockResponder>,
    /// Conversation cache shared by every widget opened through the harness.
    pub cache: ConversationCache,
    /// Temp directory kept alive for cleanup on drop.
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new builder for configuring the test harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// The in-memory store. Panics if the harness was built on SQLite.
    pub fn memory(&self) -> &Arc<MemoryStore> {
        self.memory
            .as_ref()
            .expect("harness was built with SQLite; no in-memory store")
    }

    /// Open a widget for `chatbot_id` with the harness cache.
    pub async fn open_widget(&self, chatbot_id: &str) -> Result<WidgetSession, DesklineError> {
        self.open_widget_with(WidgetOptions::new(chatbot_id)).await
    }

    pub async fn open_widget_with(
        &self,
        options: WidgetOptions,
    ) -> Result<WidgetSession, DesklineError> {
        WidgetSession::open(&self.runtime, self.cache.clone(), options).await
    }

    /// Open a help-desk session for `agent_id`.
    pub async fn open_help_desk(
        &self,
        conversation_id: &ConversationId,
        agent_id: &str,
    ) -> Result<HelpDeskSession, DesklineError> {
        HelpDeskSession::open(&self.runtime, conversation_id, agent_id).await
    }

    /// Create a conversation directly in the store.
    pub async fn create_conversation(&self, chatbot_id: &str) -> Result<Conversation, DesklineError> {
        self.store
            .create_conversation(NewConversation {
                chatbot_id: chatbot_id.to_string(),
                customer_email: None,
                source: "widget".to_string(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskline_core::types::{ChannelEvent, ChannelSignal, MessageRole, NewMessage};
    use deskline_core::EventChannel;

    #[tokio::test]
    async fn builder_creates_working_environment() {
        let harness = TestHarness::builder().build().await.unwrap();
        assert!(harness.store.list_conversations(None).await.unwrap().is_empty());
        assert!(harness.memory.is_some());
    }

    #[tokio::test]
    async fn writes_are_broadcast_on_the_channel() {
        let harness = TestHarness::builder().build().await.unwrap();
        let conv = harness.create_conversation("bot-1").await.unwrap();
        let mut sub = harness.channel.subscribe(&conv.id).await.unwrap();
        assert_eq!(
            sub.events.recv().await,
            Some(ChannelEvent::Signal(ChannelSignal::Subscribed))
        );

        harness
            .store
            .insert_message(NewMessage::text(conv.id.clone(), MessageRole::User, "hi"))
            .await
            .unwrap();
        assert!(matches!(sub.events.recv().await, Some(ChannelEvent::Change(_))));
    }

    #[tokio::test]
    async fn sqlite_harness_persists() {
        let harness = TestHarness::builder().with_sqlite().build().await.unwrap();
        let conv = harness.create_conversation("bot-1").await.unwrap();
        let listed = harness.store.list_conversations(None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, conv.id);
        assert!(harness.memory.is_none());
    }
}
