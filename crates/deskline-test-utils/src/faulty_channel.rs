// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event channel with controllable transport failures.
//!
//! `FaultyChannel` wraps an [`InProcessChannel`] and lets tests refuse,
//! delay, or hang subscribe calls and drop live subscriptions on demand.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use deskline_bus::InProcessChannel;
use deskline_core::traits::adapter::PluginAdapter;
use deskline_core::traits::channel::{EventChannel, Subscription};
use deskline_core::types::{
    AdapterType, ChangeEvent, ConversationId, HealthStatus, SubscriptionId,
};
use deskline_core::DesklineError;

/// A mock event channel for connection-health tests.
pub struct FaultyChannel {
    inner: InProcessChannel,
    subscribe_calls: AtomicUsize,
    fail_subscribes: AtomicUsize,
    hang: watch::Sender<bool>,
    delay: Mutex<Option<Duration>>,
}

impl FaultyChannel {
    /// Create a channel that behaves normally until told otherwise.
    pub fn new() -> Self {
        Self {
            inner: InProcessChannel::new(),
            subscribe_calls: AtomicUsize::new(0),
            fail_subscribes: AtomicUsize::new(0),
            hang: watch::Sender::new(false),
            delay: Mutex::new(None),
        }
    }

    /// The wrapped channel.
    pub fn inner(&self) -> &InProcessChannel {
        &self.inner
    }

    /// Drop every subscription of a conversation with `Error(reason)`.
    pub fn drop_connections(&self, conversation_id: &ConversationId, reason: &str) -> usize {
        self.inner.disconnect(conversation_id, reason)
    }

    /// Number of `subscribe` calls so far, failed ones included.
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Refuse the next `n` subscribe calls with a channel error.
    pub fn fail_next_subscribes(&self, n: usize) {
        self.fail_subscribes.store(n, Ordering::SeqCst);
    }

    /// While set, subscribe calls never complete.
    pub fn hang_subscribes(&self, hang: bool) {
        self.hang.send_replace(hang);
    }

    /// Delay every subscribe call by `delay` before it completes.
    pub fn delay_subscribes(&self, delay: Duration) {
        if let Ok(mut slot) = self.delay.lock() {
            *slot = Some(delay);
        }
    }

    pub fn subscriber_count(&self, conversation_id: &ConversationId) -> usize {
        self.inner.subscriber_count(conversation_id)
    }
}

impl Default for FaultyChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginAdapter for FaultyChannel {
    fn name(&self) -> &str {
        "faulty-channel"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::EventChannel
    }

    async fn health_check(&self) -> Result<HealthStatus, DesklineError> {
        self.inner.health_check().await
    }

    async fn shutdown(&self) -> Result<(), DesklineError> {
        self.inner.shutdown().await
    }
}

#[async_trait]
impl EventChannel for FaultyChannel {
    async fn subscribe(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Subscription, DesklineError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        let mut hang = self.hang.subscribe();
        let _ = hang.wait_for(|hung| !*hung).await;

        let delay = self.delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let refuse = self
            .fail_subscribes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refuse {
            return Err(DesklineError::channel("injected subscribe failure"));
        }
        self.inner.subscribe(conversation_id).await
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), DesklineError> {
        self.inner.unsubscribe(id).await
    }

    async fn publish(&self, event: ChangeEvent) -> Result<usize, DesklineError> {
        self.inner.publish(event).await
    }
}
