// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the [`ConversationStore`] trait.

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use deskline_config::model::StorageConfig;
use deskline_core::types::{
    AdapterType, Conversation, ConversationId, ConversationStatus, DeliveryStatus, DeliveryUpdate,
    HealthStatus, Message, MessageId, NewConversation, NewMessage, StatusUpdate,
};
use deskline_core::{ConversationStore, DesklineError, PluginAdapter};

use crate::database::{Database, map_tr_err};
use crate::queries;

/// SQLite-backed durable store.
///
/// The database is opened lazily by [`SqliteStore::initialize`]; every other
/// operation fails with a storage error until then.
pub struct SqliteStore {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteStore {
    /// The database is not opened until [`initialize`](Self::initialize) is called.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    /// Opens the database and applies migrations. Fails if called twice.
    pub async fn initialize(&self) -> Result<(), DesklineError> {
        let db = Database::open(&self.config.database_path, self.config.wal_mode).await?;
        self.db
            .set(db)
            .map_err(|_| DesklineError::storage("store already initialized"))?;
        debug!(path = %self.config.database_path, "SQLite store initialized");
        Ok(())
    }

    fn db(&self) -> Result<&Database, DesklineError> {
        self.db
            .get()
            .ok_or_else(|| DesklineError::storage("store not initialized -- call initialize() first"))
    }
}

#[async_trait]
impl PluginAdapter for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Store
    }

    async fn health_check(&self) -> Result<HealthStatus, DesklineError> {
        self.db()?
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), DesklineError> {
        if let Some(db) = self.db.get() {
            db.checkpoint().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn create_conversation(
        &self,
        new: NewConversation,
    ) -> Result<Conversation, DesklineError> {
        queries::conversations::create_conversation(self.db()?, new).await
    }

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, DesklineError> {
        queries::conversations::get_conversation(self.db()?, id).await
    }

    async fn list_conversations(
        &self,
        status: Option<ConversationStatus>,
    ) -> Result<Vec<Conversation>, DesklineError> {
        queries::conversations::list_conversations(self.db()?, status).await
    }

    async fn set_conversation_status(
        &self,
        id: &ConversationId,
        update: StatusUpdate,
    ) -> Result<Conversation, DesklineError> {
        queries::conversations::set_conversation_status(self.db()?, id, update).await
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, DesklineError> {
        queries::messages::insert_message(self.db()?, message).await
    }

    async fn get_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, DesklineError> {
        queries::messages::get_messages(self.db()?, conversation_id).await
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>, DesklineError> {
        queries::messages::get_message(self.db()?, id).await
    }

    async fn update_message_delivery_status(
        &self,
        id: &MessageId,
        status: DeliveryStatus,
    ) -> Result<DeliveryUpdate, DesklineError> {
        queries::messages::update_delivery_status(self.db()?, id, status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskline_core::types::MessageRole;
    use tempfile::tempdir;

    fn make_config(path: &std::path::Path) -> StorageConfig {
        StorageConfig {
            database_path: path.display().to_string(),
            wal_mode: true,
        }
    }

    async fn open_store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = SqliteStore::new(make_config(&dir.path().join("store.db")));
        store.initialize().await.unwrap();
        (store, dir)
    }

    fn widget_conversation() -> NewConversation {
        NewConversation {
            chatbot_id: "bot-1".into(),
            customer_email: Some("pat@example.com".into()),
            source: "widget".into(),
        }
    }

    #[tokio::test]
    async fn identity() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::new(make_config(&dir.path().join("id.db")));
        assert_eq!(store.name(), "sqlite");
        assert_eq!(store.version(), semver::Version::new(0, 1, 0));
        assert_eq!(store.adapter_type(), AdapterType::Store);
    }

    #[tokio::test]
    async fn initialize_creates_file_and_rejects_second_call() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("init.db");
        let store = SqliteStore::new(make_config(&path));
        store.initialize().await.unwrap();
        assert!(path.exists(), "database file should be created");
        assert!(store.initialize().await.is_err());
    }

    #[tokio::test]
    async fn health_check_requires_initialize() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::new(make_config(&dir.path().join("health.db")));
        assert!(store.health_check().await.is_err());
        store.initialize().await.unwrap();
        assert_eq!(store.health_check().await.unwrap(), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn new_conversation_starts_ai_handling() {
        let (store, _dir) = open_store().await;
        let conv = store.create_conversation(widget_conversation()).await.unwrap();
        assert_eq!(conv.status, ConversationStatus::AiHandling);
        assert_eq!(
            store.get_conversation_status(&conv.id).await.unwrap(),
            ConversationStatus::AiHandling
        );
        let fetched = store.get_conversation(&conv.id).await.unwrap().unwrap();
        assert_eq!(fetched, conv);
    }

    #[tokio::test]
    async fn missing_conversation_is_not_found() {
        let (store, _dir) = open_store().await;
        let ghost = ConversationId::from("ghost");
        assert!(matches!(
            store.get_messages(&ghost).await,
            Err(DesklineError::NotFound { entity: "conversation", .. })
        ));
        assert!(matches!(
            store.get_conversation_status(&ghost).await,
            Err(DesklineError::NotFound { .. })
        ));
        assert!(matches!(
            store
                .insert_message(NewMessage::text(ghost, MessageRole::User, "hi"))
                .await,
            Err(DesklineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn messages_come_back_in_commit_order() {
        let (store, _dir) = open_store().await;
        let conv = store.create_conversation(widget_conversation()).await.unwrap();
        for (role, text) in [
            (MessageRole::User, "hello"),
            (MessageRole::Assistant, "hi, how can I help?"),
            (MessageRole::System, "An agent has joined."),
            (MessageRole::Agent, "Dana here."),
        ] {
            store
                .insert_message(NewMessage::text(conv.id.clone(), role, text))
                .await
                .unwrap();
        }

        let messages = store.get_messages(&conv.id).await.unwrap();
        let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::User,
                MessageRole::Assistant,
                MessageRole::System,
                MessageRole::Agent
            ]
        );
        assert_eq!(messages[3].delivery_status, Some(DeliveryStatus::Pending));
        assert!(messages[..3].iter().all(|m| m.delivery_status.is_none()));
    }

    #[tokio::test]
    async fn guarded_status_write_detects_conflict() {
        let (store, _dir) = open_store().await;
        let conv = store.create_conversation(widget_conversation()).await.unwrap();

        let taken = store
            .set_conversation_status(
                &conv.id,
                StatusUpdate {
                    status: ConversationStatus::AwaitingHumanResponse,
                    assigned_agent: Some("agent-a".into()),
                    expected: Some(ConversationStatus::AiHandling),
                },
            )
            .await
            .unwrap();
        assert_eq!(taken.assigned_agent.as_deref(), Some("agent-a"));

        let second = store
            .set_conversation_status(
                &conv.id,
                StatusUpdate {
                    status: ConversationStatus::AwaitingHumanResponse,
                    assigned_agent: Some("agent-b".into()),
                    expected: Some(ConversationStatus::AiHandling),
                },
            )
            .await;
        assert!(matches!(
            second,
            Err(DesklineError::Conflict {
                expected: ConversationStatus::AiHandling,
                actual: ConversationStatus::AwaitingHumanResponse,
            })
        ));

        let stored = store.get_conversation(&conv.id).await.unwrap().unwrap();
        assert_eq!(stored.assigned_agent.as_deref(), Some("agent-a"));
    }

    #[tokio::test]
    async fn unguarded_status_write_is_last_write_wins() {
        let (store, _dir) = open_store().await;
        let conv = store.create_conversation(widget_conversation()).await.unwrap();
        for agent in ["agent-a", "agent-b"] {
            store
                .set_conversation_status(
                    &conv.id,
                    StatusUpdate {
                        status: ConversationStatus::AwaitingHumanResponse,
                        assigned_agent: Some(agent.into()),
                        expected: None,
                    },
                )
                .await
                .unwrap();
        }
        let stored = store.get_conversation(&conv.id).await.unwrap().unwrap();
        assert_eq!(stored.assigned_agent.as_deref(), Some("agent-b"));
    }

    #[tokio::test]
    async fn concurrent_duplicate_confirmations_apply_once() {
        let (store, _dir) = open_store().await;
        let conv = store.create_conversation(widget_conversation()).await.unwrap();
        let msg = store
            .insert_message(NewMessage::text(conv.id.clone(), MessageRole::Agent, "hi"))
            .await
            .unwrap();

        let outcomes = futures::future::join_all(
            (0..8).map(|_| store.update_message_delivery_status(&msg.id, DeliveryStatus::Delivered)),
        )
        .await;
        let applied = outcomes
            .iter()
            .filter(|o| matches!(o, Ok(DeliveryUpdate::Applied)))
            .count();
        let duplicates = outcomes
            .iter()
            .filter(|o| matches!(o, Ok(DeliveryUpdate::AlreadyApplied)))
            .count();
        assert_eq!(applied, 1);
        assert_eq!(duplicates, 7);

        let stored = store.get_message(&msg.id).await.unwrap().unwrap();
        assert_eq!(stored.delivery_status, Some(DeliveryStatus::Delivered));
    }

    #[tokio::test]
    async fn final_delivery_status_is_never_reversed() {
        let (store, _dir) = open_store().await;
        let conv = store.create_conversation(widget_conversation()).await.unwrap();
        let agent = store
            .insert_message(NewMessage::text(conv.id.clone(), MessageRole::Agent, "hi"))
            .await
            .unwrap();
        let user = store
            .insert_message(NewMessage::text(conv.id.clone(), MessageRole::User, "yo"))
            .await
            .unwrap();

        store
            .update_message_delivery_status(&agent.id, DeliveryStatus::Failed)
            .await
            .unwrap();
        assert_eq!(
            store
                .update_message_delivery_status(&agent.id, DeliveryStatus::Delivered)
                .await
                .unwrap(),
            DeliveryUpdate::Rejected {
                current: Some(DeliveryStatus::Failed)
            }
        );
        assert_eq!(
            store
                .update_message_delivery_status(&user.id, DeliveryStatus::Delivered)
                .await
                .unwrap(),
            DeliveryUpdate::Rejected { current: None }
        );
        assert!(matches!(
            store
                .update_message_delivery_status(&MessageId::from("nope"), DeliveryStatus::Delivered)
                .await,
            Err(DesklineError::NotFound { entity: "message", .. })
        ));
    }

    #[tokio::test]
    async fn inbox_lists_by_status_most_recent_first() {
        let (store, _dir) = open_store().await;
        let older = store.create_conversation(widget_conversation()).await.unwrap();
        let newer = store.create_conversation(widget_conversation()).await.unwrap();
        store
            .insert_message(NewMessage::text(older.id.clone(), MessageRole::User, "bump"))
            .await
            .unwrap();

        let all = store.list_conversations(None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, older.id, "message insert bumps updated_at");

        store
            .set_conversation_status(
                &newer.id,
                StatusUpdate {
                    status: ConversationStatus::AwaitingHumanResponse,
                    assigned_agent: None,
                    expected: None,
                },
            )
            .await
            .unwrap();
        let waiting = store
            .list_conversations(Some(ConversationStatus::AwaitingHumanResponse))
            .await
            .unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].id, newer.id);
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reopen.db");
        let conv_id = {
            let store = SqliteStore::new(make_config(&path));
            store.initialize().await.unwrap();
            let conv = store.create_conversation(widget_conversation()).await.unwrap();
            store
                .insert_message(NewMessage::text(conv.id.clone(), MessageRole::User, "hi"))
                .await
                .unwrap();
            store.shutdown().await.unwrap();
            conv.id
        };

        let store = SqliteStore::new(make_config(&path));
        store.initialize().await.unwrap();
        assert_eq!(store.get_messages(&conv_id).await.unwrap().len(), 1);
    }
}
