// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process event channel.
//!
//! Subscribers of one conversation each get a bounded mpsc queue. A
//! subscriber that cannot keep up is evicted rather than silently skipped:
//! its queue drains and then ends, which the owning session observes as a
//! transport drop and answers with a reconnect plus a fresh fetch.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use deskline_core::traits::adapter::PluginAdapter;
use deskline_core::traits::channel::{EventChannel, Subscription};
use deskline_core::types::{
    AdapterType, ChangeEvent, ChannelEvent, ChannelSignal, ConversationId, HealthStatus,
    SubscriptionId,
};
use deskline_core::DesklineError;

/// Default per-subscriber queue depth.
pub const DEFAULT_BUFFER: usize = 256;

struct Subscriber {
    id: SubscriptionId,
    tx: mpsc::Sender<ChannelEvent>,
}

/// Publish/subscribe transport keyed by conversation id.
pub struct InProcessChannel {
    topics: DashMap<ConversationId, Vec<Subscriber>>,
    owners: DashMap<SubscriptionId, ConversationId>,
    next_id: AtomicU64,
    buffer: usize,
    closed: AtomicBool,
}

impl InProcessChannel {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_BUFFER)
    }

    /// Creates a channel whose subscriber queues hold `buffer` events.
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            topics: DashMap::new(),
            owners: DashMap::new(),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of live subscribers for a conversation.
    pub fn subscriber_count(&self, conversation_id: &ConversationId) -> usize {
        self.topics
            .get(conversation_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Drops every subscription of a conversation with an error signal.
    ///
    /// Models a transport failure: subscribers see `Error(reason)` and then
    /// the end of their stream. Returns the number of subscribers dropped.
    pub fn disconnect(&self, conversation_id: &ConversationId, reason: &str) -> usize {
        let Some((_, subs)) = self.topics.remove(conversation_id) else {
            return 0;
        };
        for sub in &subs {
            self.owners.remove(&sub.id);
            let _ = sub
                .tx
                .try_send(ChannelEvent::Signal(ChannelSignal::Error(reason.to_string())));
        }
        warn!(
            conversation_id = %conversation_id,
            dropped = subs.len(),
            reason,
            "event channel dropped subscribers"
        );
        subs.len()
    }

    fn evict(&self, ids: &[SubscriptionId]) {
        for id in ids {
            self.owners.remove(id);
        }
    }
}

impl Default for InProcessChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginAdapter for InProcessChannel {
    fn name(&self) -> &str {
        "in-process"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::EventChannel
    }

    async fn health_check(&self) -> Result<HealthStatus, DesklineError> {
        if self.closed.load(Ordering::Acquire) {
            Ok(HealthStatus::Unhealthy("channel is shut down".to_string()))
        } else {
            Ok(HealthStatus::Healthy)
        }
    }

    async fn shutdown(&self) -> Result<(), DesklineError> {
        self.closed.store(true, Ordering::Release);
        let keys: Vec<ConversationId> = self.topics.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, subs)) = self.topics.remove(&key) {
                for sub in subs {
                    let _ = sub.tx.try_send(ChannelEvent::Signal(ChannelSignal::Closed));
                }
            }
        }
        self.owners.clear();
        info!("in-process event channel shut down");
        Ok(())
    }
}

#[async_trait]
impl EventChannel for InProcessChannel {
    async fn subscribe(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Subscription, DesklineError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DesklineError::channel("channel is shut down"));
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.buffer);
        tx.try_send(ChannelEvent::Signal(ChannelSignal::Subscribed))
            .map_err(|e| DesklineError::channel(format!("subscribe acknowledgment failed: {e}")))?;

        self.owners.insert(id, conversation_id.clone());
        self.topics
            .entry(conversation_id.clone())
            .or_default()
            .push(Subscriber { id, tx });

        debug!(conversation_id = %conversation_id, subscription = %id, "subscribed");
        Ok(Subscription {
            id,
            conversation_id: conversation_id.clone(),
            events: rx,
        })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), DesklineError> {
        let Some((_, conversation_id)) = self.owners.remove(&id) else {
            return Ok(());
        };
        let now_empty = match self.topics.get_mut(&conversation_id) {
            Some(mut subs) => {
                subs.retain(|sub| sub.id != id);
                subs.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.topics.remove_if(&conversation_id, |_, subs| subs.is_empty());
        }
        debug!(conversation_id = %conversation_id, subscription = %id, "unsubscribed");
        Ok(())
    }

    async fn publish(&self, event: ChangeEvent) -> Result<usize, DesklineError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DesklineError::channel("channel is shut down"));
        }

        let key = event.conversation_id().clone();
        let mut reached = 0;
        let mut evicted = Vec::new();

        if let Some(mut subs) = self.topics.get_mut(&key) {
            subs.retain(|sub| match sub.tx.try_send(ChannelEvent::Change(event.clone())) {
                Ok(()) => {
                    reached += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!(
                        conversation_id = %key,
                        subscription = %sub.id,
                        "subscriber queue full, evicting"
                    );
                    evicted.push(sub.id);
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    evicted.push(sub.id);
                    false
                }
            });
        }

        self.evict(&evicted);
        debug!(conversation_id = %key, reached, "change published");
        Ok(reached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskline_core::types::ConversationStatus;

    fn status_event(conversation: &str) -> ChangeEvent {
        ChangeEvent::StatusUpdated {
            conversation_id: ConversationId::from(conversation),
            status: ConversationStatus::AwaitingHumanResponse,
            assigned_agent: Some("agent-1".into()),
        }
    }

    #[tokio::test]
    async fn first_event_is_subscribed_signal() {
        let channel = InProcessChannel::new();
        let mut sub = channel.subscribe(&ConversationId::from("c-1")).await.unwrap();
        assert_eq!(
            sub.events.recv().await,
            Some(ChannelEvent::Signal(ChannelSignal::Subscribed))
        );
    }

    #[tokio::test]
    async fn publish_reaches_only_matching_conversation() {
        let channel = InProcessChannel::new();
        let mut a = channel.subscribe(&ConversationId::from("c-a")).await.unwrap();
        let mut b = channel.subscribe(&ConversationId::from("c-b")).await.unwrap();
        a.events.recv().await;
        b.events.recv().await;

        let reached = channel.publish(status_event("c-a")).await.unwrap();
        assert_eq!(reached, 1);
        assert_eq!(
            a.events.recv().await,
            Some(ChannelEvent::Change(status_event("c-a")))
        );
        assert!(b.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_ends_stream() {
        let channel = InProcessChannel::new();
        let conv = ConversationId::from("c-1");
        let mut sub = channel.subscribe(&conv).await.unwrap();
        sub.events.recv().await;

        channel.unsubscribe(sub.id).await.unwrap();
        assert_eq!(channel.subscriber_count(&conv), 0);
        assert_eq!(sub.events.recv().await, None);

        // Unknown ids are ignored.
        channel.unsubscribe(sub.id).await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_sends_error_then_ends() {
        let channel = InProcessChannel::new();
        let conv = ConversationId::from("c-1");
        let mut sub = channel.subscribe(&conv).await.unwrap();
        sub.events.recv().await;

        assert_eq!(channel.disconnect(&conv, "socket reset"), 1);
        assert_eq!(
            sub.events.recv().await,
            Some(ChannelEvent::Signal(ChannelSignal::Error(
                "socket reset".into()
            )))
        );
        assert_eq!(sub.events.recv().await, None);
        assert_eq!(channel.publish(status_event("c-1")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_is_evicted() {
        let channel = InProcessChannel::with_buffer(2);
        let conv = ConversationId::from("c-1");
        let mut sub = channel.subscribe(&conv).await.unwrap();

        // Queue holds the subscribed signal plus one change.
        assert_eq!(channel.publish(status_event("c-1")).await.unwrap(), 1);
        assert_eq!(channel.publish(status_event("c-1")).await.unwrap(), 0);
        assert_eq!(channel.subscriber_count(&conv), 0);

        assert!(sub.events.recv().await.is_some());
        assert!(sub.events.recv().await.is_some());
        assert_eq!(sub.events.recv().await, None);
    }

    #[tokio::test]
    async fn shutdown_closes_subscribers_and_rejects_new_ones() {
        let channel = InProcessChannel::new();
        let conv = ConversationId::from("c-1");
        let mut sub = channel.subscribe(&conv).await.unwrap();
        sub.events.recv().await;

        channel.shutdown().await.unwrap();
        assert_eq!(
            sub.events.recv().await,
            Some(ChannelEvent::Signal(ChannelSignal::Closed))
        );
        assert!(channel.subscribe(&conv).await.is_err());
        assert!(matches!(
            channel.health_check().await.unwrap(),
            HealthStatus::Unhealthy(_)
        ));
    }
}
