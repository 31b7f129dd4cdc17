// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory conversation store with fault injection.
//!
//! `MemoryStore` implements `ConversationStore` entirely in async code, so
//! tests running on a paused clock advance time deterministically. Writes
//! can be failed, counted, timestamped, or held at a gate to stage races.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;

use deskline_core::traits::adapter::PluginAdapter;
use deskline_core::traits::store::ConversationStore;
use deskline_core::types::{
    plan_delivery_update, AdapterType, Conversation, ConversationId, ConversationStatus,
    DeliveryStatus, DeliveryUpdate, HealthStatus, Message, MessageId, NewConversation, NewMessage,
    StatusUpdate,
};
use deskline_core::DesklineError;

/// Holds callers while paused and counts how many are waiting.
struct Gate {
    paused: watch::Sender<bool>,
    parked: watch::Sender<usize>,
}

impl Gate {
    fn new() -> Self {
        Self {
            paused: watch::Sender::new(false),
            parked: watch::Sender::new(0),
        }
    }

    async fn pass(&self) {
        let mut rx = self.paused.subscribe();
        if !*rx.borrow_and_update() {
            return;
        }
        self.parked.send_modify(|n| *n += 1);
        let _ = rx.wait_for(|paused| !*paused).await;
        self.parked.send_modify(|n| *n -= 1);
    }

    async fn wait_for_parked(&self, count: usize) {
        let mut rx = self.parked.subscribe();
        let _ = rx.wait_for(|parked| *parked >= count).await;
    }
}

#[derive(Default)]
struct Data {
    conversations: HashMap<ConversationId, (u64, Conversation)>,
    messages: Vec<Message>,
}

/// A conversation store backed by plain collections.
pub struct MemoryStore {
    data: Mutex<Data>,
    seq: AtomicU64,
    fail_creates: AtomicUsize,
    fail_inserts: AtomicUsize,
    fail_status_writes: AtomicUsize,
    fail_delivery_writes: AtomicUsize,
    status_writes: AtomicUsize,
    delivery_writes: AtomicUsize,
    delivery_attempts: StdMutex<Vec<Instant>>,
    create_gate: Gate,
    status_gate: Gate,
    delivery_gate: Gate,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            data: Mutex::new(Data::default()),
            seq: AtomicU64::new(0),
            fail_creates: AtomicUsize::new(0),
            fail_inserts: AtomicUsize::new(0),
            fail_status_writes: AtomicUsize::new(0),
            fail_delivery_writes: AtomicUsize::new(0),
            status_writes: AtomicUsize::new(0),
            delivery_writes: AtomicUsize::new(0),
            delivery_attempts: StdMutex::new(Vec::new()),
            create_gate: Gate::new(),
            status_gate: Gate::new(),
            delivery_gate: Gate::new(),
        }
    }

    /// Fail the next `n` conversation creations with a storage error.
    pub fn fail_next_creates(&self, n: usize) {
        self.fail_creates.store(n, Ordering::SeqCst);
    }

    /// Hold conversation creations until resumed.
    pub fn pause_creates(&self) {
        self.create_gate.paused.send_replace(true);
    }

    pub fn resume_creates(&self) {
        self.create_gate.paused.send_replace(false);
    }

    /// Wait until at least `n` conversation creations are being held.
    pub async fn wait_for_paused_creates(&self, n: usize) {
        self.create_gate.wait_for_parked(n).await;
    }

    /// Fail the next `n` message inserts with a storage error.
    pub fn fail_next_inserts(&self, n: usize) {
        self.fail_inserts.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` status writes with a storage error.
    pub fn fail_next_status_writes(&self, n: usize) {
        self.fail_status_writes.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` delivery-status writes with a storage error.
    pub fn fail_next_delivery_writes(&self, n: usize) {
        self.fail_delivery_writes.store(n, Ordering::SeqCst);
    }

    /// Hold status writes until [`resume_status_writes`](Self::resume_status_writes).
    ///
    /// Held writes compare against the stored status only after release.
    pub fn pause_status_writes(&self) {
        self.status_gate.paused.send_replace(true);
    }

    pub fn resume_status_writes(&self) {
        self.status_gate.paused.send_replace(false);
    }

    /// Wait until at least `n` status writes are being held.
    pub async fn wait_for_paused_status_writes(&self, n: usize) {
        self.status_gate.wait_for_parked(n).await;
    }

    /// Hold delivery-status writes until resumed.
    pub fn pause_delivery_writes(&self) {
        self.delivery_gate.paused.send_replace(true);
    }

    pub fn resume_delivery_writes(&self) {
        self.delivery_gate.paused.send_replace(false);
    }

    /// Wait until at least `n` delivery-status writes are being held.
    pub async fn wait_for_paused_delivery_writes(&self, n: usize) {
        self.delivery_gate.wait_for_parked(n).await;
    }

    /// Number of `set_conversation_status` calls, failed ones included.
    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    /// Number of `update_message_delivery_status` calls, failed ones included.
    pub fn delivery_writes(&self) -> usize {
        self.delivery_writes.load(Ordering::SeqCst)
    }

    /// When each delivery-status write was attempted.
    pub fn delivery_attempt_times(&self) -> Vec<Instant> {
        self.delivery_attempts
            .lock()
            .map(|times| times.clone())
            .unwrap_or_default()
    }

    /// Set a status directly, bypassing counters, gates and the transition table.
    pub async fn force_status(&self, id: &ConversationId, status: ConversationStatus) {
        let seq = self.next_seq();
        let mut data = self.data.lock().await;
        if let Some((order, conversation)) = data.conversations.get_mut(id) {
            conversation.status = status;
            conversation.updated_at = Utc::now();
            *order = seq;
        }
    }

    /// Delete a conversation and its messages, as an external cleanup would.
    pub async fn remove_conversation(&self, id: &ConversationId) {
        let mut data = self.data.lock().await;
        data.conversations.remove(id);
        data.messages.retain(|m| &m.conversation_id != id);
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn take_fault(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn not_found(entity: &'static str, id: impl ToString) -> DesklineError {
    DesklineError::NotFound {
        entity,
        id: id.to_string(),
    }
}

#[async_trait]
impl PluginAdapter for MemoryStore {
    fn name(&self) -> &str {
        "memory-store"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Store
    }

    async fn health_check(&self) -> Result<HealthStatus, DesklineError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), DesklineError> {
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create_conversation(
        &self,
        new: NewConversation,
    ) -> Result<Conversation, DesklineError> {
        self.create_gate.pass().await;
        if take_fault(&self.fail_creates) {
            return Err(DesklineError::storage("injected create failure"));
        }
        let now = Utc::now();
        let conversation = Conversation {
            id: ConversationId::generate(),
            chatbot_id: new.chatbot_id,
            customer_email: new.customer_email,
            source: new.source,
            status: ConversationStatus::AiHandling,
            assigned_agent: None,
            created_at: now,
            updated_at: now,
        };
        let seq = self.next_seq();
        self.data
            .lock()
            .await
            .conversations
            .insert(conversation.id.clone(), (seq, conversation.clone()));
        Ok(conversation)
    }

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, DesklineError> {
        Ok(self
            .data
            .lock()
            .await
            .conversations
            .get(id)
            .map(|(_, c)| c.clone()))
    }

    async fn list_conversations(
        &self,
        status: Option<ConversationStatus>,
    ) -> Result<Vec<Conversation>, DesklineError> {
        let data = self.data.lock().await;
        let mut rows: Vec<&(u64, Conversation)> = data
            .conversations
            .values()
            .filter(|(_, c)| status.is_none_or(|s| c.status == s))
            .collect();
        rows.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(rows.into_iter().map(|(_, c)| c.clone()).collect())
    }

    async fn set_conversation_status(
        &self,
        id: &ConversationId,
        update: StatusUpdate,
    ) -> Result<Conversation, DesklineError> {
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        self.status_gate.pass().await;
        if take_fault(&self.fail_status_writes) {
            return Err(DesklineError::storage("injected status write failure"));
        }

        let seq = self.next_seq();
        let mut data = self.data.lock().await;
        let (order, conversation) = data
            .conversations
            .get_mut(id)
            .ok_or_else(|| not_found("conversation", id))?;
        if let Some(expected) = update.expected.filter(|e| *e != conversation.status) {
            return Err(DesklineError::Conflict {
                expected,
                actual: conversation.status,
            });
        }
        conversation.status = update.status;
        conversation.assigned_agent = update.assigned_agent;
        conversation.updated_at = Utc::now();
        *order = seq;
        Ok(conversation.clone())
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, DesklineError> {
        if take_fault(&self.fail_inserts) {
            return Err(DesklineError::storage("injected insert failure"));
        }

        let seq = self.next_seq();
        let mut data = self.data.lock().await;
        let Some((order, conversation)) = data.conversations.get_mut(&message.conversation_id)
        else {
            return Err(not_found("conversation", &message.conversation_id));
        };
        let now = Utc::now();
        conversation.updated_at = now;
        *order = seq;

        let stored = message.into_message(MessageId::generate(), now);
        data.messages.push(stored.clone());
        Ok(stored)
    }

    async fn get_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, DesklineError> {
        let data = self.data.lock().await;
        if !data.conversations.contains_key(conversation_id) {
            return Err(not_found("conversation", conversation_id));
        }
        Ok(data
            .messages
            .iter()
            .filter(|m| &m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>, DesklineError> {
        Ok(self
            .data
            .lock()
            .await
            .messages
            .iter()
            .find(|m| &m.id == id)
            .cloned())
    }

    async fn update_message_delivery_status(
        &self,
        id: &MessageId,
        status: DeliveryStatus,
    ) -> Result<DeliveryUpdate, DesklineError> {
        self.delivery_writes.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut times) = self.delivery_attempts.lock() {
            times.push(Instant::now());
        }
        self.delivery_gate.pass().await;
        if take_fault(&self.fail_delivery_writes) {
            return Err(DesklineError::storage("injected delivery write failure"));
        }

        let mut data = self.data.lock().await;
        let message = data
            .messages
            .iter_mut()
            .find(|m| &m.id == id)
            .ok_or_else(|| not_found("message", id))?;
        let outcome = plan_delivery_update(message.delivery_status, status);
        if outcome == DeliveryUpdate::Applied {
            message.delivery_status = Some(status);
        }
        Ok(outcome)
    }
}
