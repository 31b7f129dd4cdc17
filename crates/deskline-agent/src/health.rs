// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection health monitor for one conversation subscription.
//!
//! The monitor runs as a task that owns the [`Subscription`]. It forwards
//! change events to its session, keeps a [`ConnectionSnapshot`] for display,
//! and drives recovery:
//!
//! - an error, timeout, or close signal (or a failed subscribe) schedules a
//!   re-subscribe after the fixed reconnect delay, forever;
//! - a periodic health tick that finds the connection not `subscribed` makes
//!   one attempt right away, replacing any pending delayed reconnect;
//! - a recovery request (from the delivery coordinator) forces a re-subscribe.
//!
//! At most one subscribe attempt is in flight. Closing the monitor
//! unsubscribes and stops every timer; a subscribe that completes after
//! teardown started is released immediately.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use deskline_config::ConnectionConfig;
use deskline_core::types::{
    ChangeEvent, ChannelEvent, ChannelSignal, ConnectionState, ConversationId, SubscriptionId,
};
use deskline_core::{DesklineError, EventChannel, Subscription};
use deskline_resilience::{Scheduler, TaskHandle};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::delivery::RecoverySink;

/// Connection state plus what a status indicator needs to render it.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub last_error: Option<String>,
    /// Last acknowledgment or change event received.
    pub last_good_at: Option<DateTime<Utc>>,
    /// Failures since the last successful subscribe.
    pub consecutive_failures: u32,
    /// Subscribe attempts made so far, including the first.
    pub attempts: u32,
}

impl Default for ConnectionSnapshot {
    fn default() -> Self {
        Self {
            state: ConnectionState::Closed,
            last_error: None,
            last_good_at: None,
            consecutive_failures: 0,
            attempts: 0,
        }
    }
}

impl ConnectionSnapshot {
    /// Whether a "reconnecting" indicator should be shown.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Error
        ) && self.attempts > 1
    }
}

/// What the monitor reports to its session.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// A change notification for the conversation.
    Change(ChangeEvent),
    /// The channel acknowledged a subscription. Anything published while the
    /// previous subscription was down was missed and must be re-fetched.
    Subscribed {
        conversation_id: ConversationId,
        resubscribed: bool,
    },
    StateChanged {
        conversation_id: ConversationId,
        snapshot: ConnectionSnapshot,
    },
}

impl MonitorEvent {
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            MonitorEvent::Change(change) => change.conversation_id(),
            MonitorEvent::Subscribed {
                conversation_id, ..
            }
            | MonitorEvent::StateChanged {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

#[derive(Debug)]
enum Command {
    Recover { reason: String },
}

/// Cloneable handle for asking a running monitor to recover.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl RecoverySink for MonitorHandle {
    fn request_recovery(&self, reason: &str) {
        let _ = self.commands.send(Command::Recover {
            reason: reason.to_string(),
        });
    }
}

/// A running monitor.
pub struct ConnectionMonitor {
    conversation_id: ConversationId,
    handle: MonitorHandle,
    state: watch::Receiver<ConnectionSnapshot>,
    task: TaskHandle<()>,
}

impl ConnectionMonitor {
    /// Starts monitoring `conversation_id` and subscribes immediately.
    ///
    /// The monitor task lives on `scheduler`; cancelling it has the same
    /// effect as [`close`](Self::close) without waiting.
    pub fn start(
        channel: Arc<dyn EventChannel>,
        conversation_id: ConversationId,
        config: &ConnectionConfig,
        scheduler: &Scheduler,
        events: mpsc::UnboundedSender<MonitorEvent>,
    ) -> Self {
        let snapshot = ConnectionSnapshot {
            state: ConnectionState::Connecting,
            ..ConnectionSnapshot::default()
        };
        let (state_tx, state_rx) = watch::channel(snapshot.clone());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let runner = Runner {
            channel,
            conversation_id: conversation_id.clone(),
            config: config.clone(),
            events,
            state_tx,
            snapshot,
            subscription: None,
            attempt: None,
            reconnect_at: None,
            ever_subscribed: false,
        };
        let task = scheduler.spawn_cooperative(move |token| runner.run(token, commands_rx));

        Self {
            conversation_id,
            handle: MonitorHandle {
                commands: commands_tx,
            },
            state: state_rx,
            task,
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.state.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().state
    }

    /// A receiver that observes every snapshot change.
    pub fn watch(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.state.clone()
    }

    pub fn handle(&self) -> MonitorHandle {
        self.handle.clone()
    }

    pub fn request_recovery(&self, reason: &str) {
        self.handle.request_recovery(reason);
    }

    /// Unsubscribes, stops all timers, and waits for the task to finish.
    pub async fn close(self) {
        self.task.cancel();
        self.task.join().await;
    }
}

type Attempt = Pin<Box<dyn Future<Output = Result<Subscription, DesklineError>> + Send>>;

struct Runner {
    channel: Arc<dyn EventChannel>,
    conversation_id: ConversationId,
    config: ConnectionConfig,
    events: mpsc::UnboundedSender<MonitorEvent>,
    state_tx: watch::Sender<ConnectionSnapshot>,
    snapshot: ConnectionSnapshot,
    subscription: Option<Subscription>,
    attempt: Option<Attempt>,
    reconnect_at: Option<Instant>,
    ever_subscribed: bool,
}

impl Runner {
    async fn run(mut self, token: CancellationToken, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.begin_attempt("initial subscribe").await;

        let period = self.config.health_check_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                result = next_attempt(&mut self.attempt) => {
                    self.attempt = None;
                    self.attempt_finished(result, &token).await;
                }
                event = next_event(&mut self.subscription) => {
                    if !self.handle_event(event).await {
                        break;
                    }
                }
                command = commands.recv() => match command {
                    Some(Command::Recover { reason }) => self.recover(&reason).await,
                    None => break,
                },
                _ = sleep_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.begin_attempt("reconnect delay elapsed").await;
                }
                _ = ticker.tick() => self.health_check().await,
            }
        }

        self.teardown().await;
    }

    async fn begin_attempt(&mut self, reason: &str) {
        if self.attempt.is_some() {
            return;
        }
        self.reconnect_at = None;
        if let Some(sub) = self.subscription.take() {
            self.release(sub.id).await;
        }

        self.snapshot.attempts += 1;
        debug!(
            conversation_id = %self.conversation_id,
            attempt = self.snapshot.attempts,
            reason,
            "subscribing"
        );
        self.set_state(ConnectionState::Connecting);

        let channel = self.channel.clone();
        let conversation_id = self.conversation_id.clone();
        let timeout = self.config.subscribe_timeout();
        self.attempt = Some(Box::pin(async move {
            match tokio::time::timeout(timeout, channel.subscribe(&conversation_id)).await {
                Ok(result) => result,
                Err(_) => Err(DesklineError::Timeout { duration: timeout }),
            }
        }));
    }

    async fn attempt_finished(
        &mut self,
        result: Result<Subscription, DesklineError>,
        token: &CancellationToken,
    ) {
        match result {
            Ok(sub) if token.is_cancelled() => {
                debug!(subscription = %sub.id, "releasing subscription that completed after teardown");
                self.release(sub.id).await;
            }
            Ok(sub) => {
                debug!(
                    conversation_id = %self.conversation_id,
                    subscription = %sub.id,
                    "subscription opened, awaiting acknowledgment"
                );
                self.subscription = Some(sub);
            }
            Err(e) => self.connection_lost(ConnectionState::Error, e.to_string()).await,
        }
    }

    /// Returns `false` once the session has gone away.
    async fn handle_event(&mut self, event: Option<ChannelEvent>) -> bool {
        match event {
            Some(ChannelEvent::Signal(ChannelSignal::Subscribed)) => {
                let resubscribed = self.ever_subscribed;
                self.ever_subscribed = true;
                self.snapshot.consecutive_failures = 0;
                self.snapshot.last_error = None;
                self.snapshot.last_good_at = Some(Utc::now());
                info!(
                    conversation_id = %self.conversation_id,
                    resubscribed,
                    attempts = self.snapshot.attempts,
                    "subscribed"
                );
                self.set_state(ConnectionState::Subscribed);
                self.emit(MonitorEvent::Subscribed {
                    conversation_id: self.conversation_id.clone(),
                    resubscribed,
                })
            }
            Some(ChannelEvent::Change(change)) => {
                self.snapshot.last_good_at = Some(Utc::now());
                self.emit(MonitorEvent::Change(change))
            }
            Some(ChannelEvent::Signal(ChannelSignal::Error(reason))) => {
                self.connection_lost(ConnectionState::Error, reason).await;
                true
            }
            Some(ChannelEvent::Signal(ChannelSignal::TimedOut)) => {
                self.connection_lost(ConnectionState::Error, "subscription timed out".into())
                    .await;
                true
            }
            Some(ChannelEvent::Signal(ChannelSignal::Closed)) => {
                self.connection_lost(ConnectionState::Closed, "closed by channel".into())
                    .await;
                true
            }
            None => {
                self.connection_lost(ConnectionState::Error, "subscription ended".into())
                    .await;
                true
            }
        }
    }

    async fn connection_lost(&mut self, state: ConnectionState, reason: String) {
        if let Some(sub) = self.subscription.take() {
            self.release(sub.id).await;
        }
        self.snapshot.consecutive_failures += 1;
        warn!(
            conversation_id = %self.conversation_id,
            state = %state,
            reason = %reason,
            failures = self.snapshot.consecutive_failures,
            retry_in = ?self.config.reconnect_delay(),
            "connection lost"
        );
        self.snapshot.last_error = Some(reason);
        self.set_state(state);
        if self.attempt.is_none() {
            self.reconnect_at = Some(Instant::now() + self.config.reconnect_delay());
        }
    }

    async fn health_check(&mut self) {
        if self.snapshot.state == ConnectionState::Subscribed {
            debug!(conversation_id = %self.conversation_id, "health check ok");
            return;
        }
        if self.attempt.is_some() {
            debug!(conversation_id = %self.conversation_id, "health check: attempt already in flight");
            return;
        }
        info!(
            conversation_id = %self.conversation_id,
            state = %self.snapshot.state,
            "health check found connection down, reconnecting"
        );
        self.begin_attempt("health check").await;
    }

    async fn recover(&mut self, reason: &str) {
        if self.attempt.is_some() {
            debug!(conversation_id = %self.conversation_id, reason, "recovery already in progress");
            return;
        }
        info!(conversation_id = %self.conversation_id, reason, "recovery requested");
        self.begin_attempt(reason).await;
    }

    async fn teardown(&mut self) {
        self.attempt = None;
        self.reconnect_at = None;
        if let Some(sub) = self.subscription.take() {
            self.release(sub.id).await;
        }
        self.set_state(ConnectionState::Closed);
        debug!(conversation_id = %self.conversation_id, "connection monitor stopped");
    }

    async fn release(&mut self, id: SubscriptionId) {
        if let Err(e) = self.channel.unsubscribe(id).await {
            warn!(subscription = %id, error = %e, "unsubscribe failed");
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.snapshot.state = state;
        self.state_tx.send_replace(self.snapshot.clone());
        let _ = self.events.send(MonitorEvent::StateChanged {
            conversation_id: self.conversation_id.clone(),
            snapshot: self.snapshot.clone(),
        });
    }

    fn emit(&self, event: MonitorEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

async fn next_attempt(attempt: &mut Option<Attempt>) -> Result<Subscription, DesklineError> {
    match attempt {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_event(subscription: &mut Option<Subscription>) -> Option<ChannelEvent> {
    match subscription {
        Some(sub) => sub.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
