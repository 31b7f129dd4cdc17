// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Local message list of a session.
//!
//! Entries are deduplicated by message id. Optimistic sends get a local id
//! until the store assigns the real one; the log swaps ids in place and drops
//! the optimistic copy if the stored row already arrived over the channel.

use chrono::{DateTime, Utc};
use deskline_core::types::{DeliveryStatus, Message, MessageId, MessageRole};
use serde::Serialize;

/// Prefix of ids the store never assigned.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Where an entry stands relative to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendState {
    /// Stored, or received from the store.
    Persisted,
    /// Shown optimistically, persistence in flight.
    Sending,
    /// Persistence failed; can be retried.
    Failed,
    /// Generated locally and never stored (the welcome message).
    Synthetic,
}

/// One line in a session's message list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewEntry {
    pub id: MessageId,
    pub role: MessageRole,
    pub content: String,
    pub image_ref: Option<String>,
    pub delivery_status: Option<DeliveryStatus>,
    pub created_at: DateTime<Utc>,
    pub send_state: SendState,
}

impl ViewEntry {
    fn from_message(message: Message) -> Self {
        Self {
            id: message.id,
            role: message.role,
            content: message.content,
            image_ref: message.image_ref,
            delivery_status: message.delivery_status,
            created_at: message.created_at,
            send_state: SendState::Persisted,
        }
    }

    pub fn is_local(&self) -> bool {
        self.send_state != SendState::Persisted
    }
}

/// A fresh id for an optimistic entry.
pub fn local_id() -> MessageId {
    MessageId(format!("{LOCAL_ID_PREFIX}{}", uuid::Uuid::new_v4()))
}

/// Ordered, deduplicated message list.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    entries: Vec<ViewEntry>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A log holding stored messages in commit order.
    pub fn from_messages(messages: Vec<Message>) -> Self {
        let mut log = Self::new();
        for message in messages {
            log.insert_remote(message);
        }
        log
    }

    pub fn entries(&self) -> &[ViewEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &MessageId) -> Option<&ViewEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.get(id).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Appends a stored message unless one with the same id is present.
    ///
    /// A duplicate can still settle the entry's delivery status. Returns
    /// `true` if the message was new.
    pub fn insert_remote(&mut self, message: Message) -> bool {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.id == message.id) {
            if let Some(status) = message.delivery_status {
                settle(existing, status);
            }
            return false;
        }
        self.entries.push(ViewEntry::from_message(message));
        true
    }

    /// Appends a locally generated entry and returns its id.
    pub fn push_local(
        &mut self,
        role: MessageRole,
        content: impl Into<String>,
        image_ref: Option<String>,
        send_state: SendState,
    ) -> MessageId {
        let id = local_id();
        self.entries.push(ViewEntry {
            id: id.clone(),
            role,
            content: content.into(),
            image_ref,
            delivery_status: None,
            created_at: Utc::now(),
            send_state,
        });
        id
    }

    /// Replaces an optimistic entry with its stored row.
    pub fn confirm_local(&mut self, local_id: &MessageId, stored: Message) {
        let Some(pos) = self.entries.iter().position(|e| &e.id == local_id) else {
            self.insert_remote(stored);
            return;
        };
        match self.entries.iter().position(|e| e.id == stored.id) {
            // The channel delivered the stored row first; move it into the
            // optimistic entry's place.
            Some(echo) => {
                let remote = self.entries.remove(echo);
                let pos = if echo < pos { pos - 1 } else { pos };
                self.entries[pos] = remote;
            }
            None => self.entries[pos] = ViewEntry::from_message(stored),
        }
    }

    /// Sets the send state of a local entry. Returns `false` if unknown.
    pub fn mark_local(&mut self, local_id: &MessageId, state: SendState) -> bool {
        match self.entries.iter_mut().find(|e| &e.id == local_id && e.is_local()) {
            Some(entry) => {
                entry.send_state = state;
                true
            }
            None => false,
        }
    }

    /// Moves a pending delivery status to a final one. Final statuses never change.
    pub fn apply_delivery(&mut self, id: &MessageId, status: DeliveryStatus) -> bool {
        match self.entries.iter_mut().find(|e| &e.id == id) {
            Some(entry) => settle(entry, status),
            None => false,
        }
    }

    /// Merges a fresh fetch from the store.
    ///
    /// Stored messages come first, in commit order; entries the fetch does
    /// not know about (local ones, or rows that arrived after the fetch was
    /// taken) keep their relative order after them. Returns the ids that
    /// were not in the log before.
    pub fn reconcile(&mut self, fetched: Vec<Message>) -> Vec<MessageId> {
        let mut old = std::mem::take(&mut self.entries);
        let mut added = Vec::new();

        for message in fetched {
            match old.iter().position(|e| e.id == message.id) {
                Some(pos) => {
                    let mut entry = old.remove(pos);
                    if let Some(status) = message.delivery_status {
                        settle(&mut entry, status);
                    }
                    self.entries.push(entry);
                }
                None => {
                    added.push(message.id.clone());
                    self.entries.push(ViewEntry::from_message(message));
                }
            }
        }
        self.entries.extend(old);
        added
    }
}

fn settle(entry: &mut ViewEntry, status: DeliveryStatus) -> bool {
    match entry.delivery_status {
        Some(current) if current.can_transition_to(status) => {
            entry.delivery_status = Some(status);
            true
        }
        _ => false,
    }
}
