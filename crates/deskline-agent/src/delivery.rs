// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivery confirmation for agent-authored messages.
//!
//! The widget side confirms every agent message it observes by writing
//! `delivered` to the store. A failing write is retried with exponential
//! backoff; once retries are exhausted the message is marked `failed`
//! (best effort) and the connection monitor is asked to check the
//! subscription, since a store that cannot be reached usually means the
//! realtime link is in trouble too.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use deskline_core::types::{ConversationId, DeliveryStatus, DeliveryUpdate, MessageId};
use deskline_core::{ConversationStore, DesklineError};
use deskline_resilience::{ExponentialBackoff, Scheduler};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Receives "check the connection" requests.
pub trait RecoverySink: Send + Sync {
    fn request_recovery(&self, reason: &str);
}

/// What a confirmation ended with, as seen by callers that joined it.
#[derive(Debug, Clone)]
enum Outcome {
    Settled(DeliveryStatus),
    Failed(String),
    Cancelled,
}

type InFlight = watch::Receiver<Option<Outcome>>;

/// Confirms delivery of agent messages for one conversation.
pub struct DeliveryCoordinator {
    store: Arc<dyn ConversationStore>,
    backoff: ExponentialBackoff,
    scheduler: Scheduler,
    recovery: Option<Arc<dyn RecoverySink>>,
    states: DashMap<MessageId, DeliveryStatus>,
    in_flight: DashMap<MessageId, InFlight>,
}

impl DeliveryCoordinator {
    /// `scheduler` bounds the coordinator's lifetime: cancelling it stops
    /// every pending retry.
    pub fn new(
        store: Arc<dyn ConversationStore>,
        backoff: ExponentialBackoff,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            store,
            backoff,
            scheduler,
            recovery: None,
            states: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    pub fn with_recovery(mut self, recovery: Arc<dyn RecoverySink>) -> Self {
        self.recovery = Some(recovery);
        self
    }

    /// Locally known delivery status of a message.
    pub fn status(&self, message_id: &MessageId) -> Option<DeliveryStatus> {
        self.states.get(message_id).map(|s| *s)
    }

    /// Confirmations currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Stops all pending confirmations and their retry timers.
    pub fn cancel(&self) {
        self.scheduler.cancel();
    }

    /// Confirms delivery of one message and returns its final local status.
    ///
    /// Confirming a message already known as delivered is a no-op success. A
    /// second caller for a message whose confirmation is in flight waits for
    /// that attempt instead of issuing another write, and gets its result or
    /// error. Returns
    /// [`DesklineError::Cancelled`] if the coordinator is cancelled first.
    pub async fn confirm_delivery(
        &self,
        message_id: &MessageId,
        conversation_id: &ConversationId,
    ) -> Result<DeliveryStatus, DesklineError> {
        let (tx, rx) = watch::channel(None);
        let waiting = match self.in_flight.entry(message_id.clone()) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(entry) => {
                if let Some(status) = self.status(message_id).filter(|s| s.is_final()) {
                    debug!(message_id = %message_id, status = %status, "delivery already settled");
                    return Ok(status);
                }
                entry.insert(rx);
                None
            }
        };
        if let Some(mut rx) = waiting {
            debug!(message_id = %message_id, "joining in-flight confirmation");
            return match rx.wait_for(Option::is_some).await {
                Ok(outcome) => match &*outcome {
                    Some(Outcome::Settled(status)) => Ok(*status),
                    Some(Outcome::Failed(reason)) => Err(DesklineError::Internal(reason.clone())),
                    Some(Outcome::Cancelled) | None => Err(DesklineError::Cancelled),
                },
                Err(_) => Err(DesklineError::Cancelled),
            };
        }

        let _guard = InFlightGuard {
            map: &self.in_flight,
            id: message_id,
        };
        self.states
            .entry(message_id.clone())
            .or_insert(DeliveryStatus::Pending);

        let result = self.run(message_id, conversation_id).await;
        let outcome = match &result {
            Ok(status) => {
                self.states.insert(message_id.clone(), *status);
                Outcome::Settled(*status)
            }
            Err(DesklineError::Internal(reason)) => Outcome::Failed(reason.clone()),
            Err(DesklineError::Cancelled) => Outcome::Cancelled,
            Err(e) => Outcome::Failed(e.to_string()),
        };
        let _ = tx.send(Some(outcome));
        result
    }

    async fn run(
        &self,
        message_id: &MessageId,
        conversation_id: &ConversationId,
    ) -> Result<DeliveryStatus, DesklineError> {
        let token = self.scheduler.token().clone();
        let mut retry = 0;

        loop {
            if token.is_cancelled() {
                return Err(DesklineError::Cancelled);
            }

            let attempt = retry + 1;
            match self
                .store
                .update_message_delivery_status(message_id, DeliveryStatus::Delivered)
                .await
            {
                Ok(DeliveryUpdate::Applied | DeliveryUpdate::AlreadyApplied) => {
                    debug!(
                        conversation_id = %conversation_id,
                        message_id = %message_id,
                        attempt,
                        "delivery confirmed"
                    );
                    return Ok(DeliveryStatus::Delivered);
                }
                Ok(DeliveryUpdate::Rejected {
                    current: Some(DeliveryStatus::Failed),
                }) => {
                    debug!(message_id = %message_id, "message already marked failed");
                    return Ok(DeliveryStatus::Failed);
                }
                Ok(DeliveryUpdate::Rejected { current }) => {
                    return Err(DesklineError::Internal(format!(
                        "message {message_id} cannot be confirmed (delivery status {current:?})"
                    )));
                }
                Err(e) => {
                    warn!(
                        conversation_id = %conversation_id,
                        message_id = %message_id,
                        attempt,
                        error = %e,
                        "delivery confirmation failed"
                    );
                }
            }

            if !self.backoff.allows(retry) {
                break;
            }
            let delay = self.backoff.delay_for(retry);
            retry += 1;
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(DesklineError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(
            conversation_id = %conversation_id,
            message_id = %message_id,
            attempts = retry + 1,
            "delivery confirmation exhausted retries"
        );
        if let Err(e) = self
            .store
            .update_message_delivery_status(message_id, DeliveryStatus::Failed)
            .await
        {
            warn!(message_id = %message_id, error = %e, "could not record failed delivery");
        }
        if let Some(recovery) = &self.recovery {
            recovery.request_recovery("delivery confirmation exhausted retries");
        }
        Ok(DeliveryStatus::Failed)
    }
}

// Clears the in-flight slot even when the confirming future is dropped.
struct InFlightGuard<'a> {
    map: &'a DashMap<MessageId, InFlight>,
    id: &'a MessageId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(self.id);
    }
}
