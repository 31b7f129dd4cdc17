// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Customer-facing widget session.
//!
//! A [`WidgetSession`] is a handle to an actor task that owns the widget's
//! message list, conversation status, and connection state. User actions
//! arrive as commands; change events arrive from the connection monitor;
//! slow work (persisting, AI replies, delivery confirmation, re-fetching)
//! runs in tasks on the conversation's scheduler and reports back, so the
//! actor never waits on the network while events are queued.
//!
//! The conversation handle is remembered in a [`ConversationCache`]. A fresh
//! widget shows a welcome message that is only stored once the customer
//! actually sends something.

use std::sync::Arc;

use chrono::Utc;
use deskline_core::types::{
    ChangeEvent, Conversation, ConversationId, ConversationStatus, DeliveryStatus, Message,
    MessageId, MessageRole, NewConversation, NewMessage,
};
use deskline_core::DesklineError;
use deskline_resilience::{Scheduler, TaskHandle};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::ConversationCache;
use crate::delivery::DeliveryCoordinator;
use crate::health::{ConnectionMonitor, ConnectionSnapshot, MonitorEvent};
use crate::responder::{AiGate, GateOutcome};
use crate::session::{request, SendReceipt, SessionState, COMMAND_BUFFER};
use crate::status::{StatusMachine, Trigger};
use crate::view::{MessageLog, SendState, ViewEntry};
use crate::Runtime;

/// Notice shown when a delivery confirmation gives up.
pub const DELIVERY_NOTICE: &str = "Some messages may not have been delivered.";

/// Who the widget is talking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetOptions {
    pub chatbot_id: String,
    pub customer_email: Option<String>,
    /// Origin recorded on new conversations.
    pub source: String,
}

impl WidgetOptions {
    pub fn new(chatbot_id: impl Into<String>) -> Self {
        Self {
            chatbot_id: chatbot_id.into(),
            customer_email: None,
            source: "widget".to_string(),
        }
    }

    pub fn with_customer(mut self, email: impl Into<String>) -> Self {
        self.customer_email = Some(email.into());
        self
    }
}

/// Read-only projection for the widget UI.
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetView {
    pub session: SessionState,
    pub conversation_id: Option<ConversationId>,
    pub status: Option<ConversationStatus>,
    pub messages: Vec<ViewEntry>,
    pub connection: ConnectionSnapshot,
    pub notice: Option<String>,
    /// An AI reply is outstanding; sends are refused until it arrives.
    pub awaiting_ai: bool,
}

impl WidgetView {
    pub fn message(&self, id: &MessageId) -> Option<&ViewEntry> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Contents of the messages with `role`, in order.
    pub fn contents(&self, role: MessageRole) -> Vec<&str> {
        self.messages
            .iter()
            .filter(|m| m.role == role)
            .map(|m| m.content.as_str())
            .collect()
    }
}

enum Command {
    Send {
        content: String,
        image_ref: Option<String>,
        reply: oneshot::Sender<Result<SendReceipt, DesklineError>>,
    },
    RetrySend {
        local_id: MessageId,
        reply: oneshot::Sender<Result<SendReceipt, DesklineError>>,
    },
    ReturnToAi {
        reply: oneshot::Sender<Result<Conversation, DesklineError>>,
    },
    StartNew {
        reply: oneshot::Sender<Result<(), DesklineError>>,
    },
}

enum Internal {
    Created {
        seq: u64,
        result: Result<Conversation, DesklineError>,
    },
    Persisted {
        conversation_id: ConversationId,
        local_id: MessageId,
        stored: Option<Message>,
    },
    AiFinished {
        conversation_id: ConversationId,
        local_id: MessageId,
        outcome: Result<GateOutcome, DesklineError>,
    },
    Delivery {
        conversation_id: ConversationId,
        message_id: MessageId,
        result: Result<DeliveryStatus, DesklineError>,
    },
    Fetched {
        conversation_id: ConversationId,
        epoch: u64,
        result: Result<(Vec<Message>, ConversationStatus), DesklineError>,
    },
    StatusApplied {
        conversation_id: ConversationId,
        conversation: Conversation,
        notice: Option<Message>,
    },
    DismissNotice {
        seq: u64,
    },
}

/// Handle to a running widget session.
pub struct WidgetSession {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<WidgetView>,
    task: TaskHandle<()>,
}

impl WidgetSession {
    /// Opens the widget, resuming the cached conversation when possible.
    ///
    /// A cached conversation that is expired or no longer in the store is
    /// forgotten and the widget starts fresh. Other store errors are returned.
    pub async fn open(
        runtime: &Runtime,
        cache: ConversationCache,
        options: WidgetOptions,
    ) -> Result<Self, DesklineError> {
        let resumed = resolve_cached(runtime, &cache, &options).await?;

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (monitor_tx, monitor_rx) = mpsc::unbounded_channel();

        let mut actor = WidgetActor {
            runtime: runtime.clone(),
            gate: runtime.ai_gate(),
            machine: runtime.status_machine(),
            cache,
            options,
            root: runtime.scheduler.child(),
            active: None,
            creating: None,
            create_seq: 0,
            log: MessageLog::new(),
            status: None,
            status_epoch: 0,
            ai_request: None,
            welcome: None,
            notice: None,
            notice_seq: 0,
            connection: ConnectionSnapshot::default(),
            view_tx: watch::Sender::new(empty_view()),
            internal_tx,
            monitor_tx,
        };

        match resumed {
            Some((conversation, messages)) => {
                info!(
                    conversation_id = %conversation.id,
                    status = %conversation.status,
                    messages = messages.len(),
                    "widget resumed conversation"
                );
                actor.log = MessageLog::from_messages(messages);
                actor.status = Some(conversation.status);
                actor.attach(conversation.id);
                actor.confirm_pending();
            }
            None => {
                debug!(chatbot_id = %actor.options.chatbot_id, "widget starting fresh");
                actor.seed_welcome();
            }
        }
        actor.publish();

        let view = actor.view_tx.subscribe();
        let root = actor.root.clone();
        let task = root.spawn_cooperative(move |token| {
            actor.run(token, commands_rx, internal_rx, monitor_rx)
        });

        Ok(Self {
            commands: commands_tx,
            view,
            task,
        })
    }

    pub fn view(&self) -> WidgetView {
        self.view.borrow().clone()
    }

    /// A receiver that observes every view change.
    pub fn watch(&self) -> watch::Receiver<WidgetView> {
        self.view.clone()
    }

    /// Sends a customer message.
    ///
    /// Returns once the message is shown locally; persistence continues in
    /// the background and is reported through the receipt. Refused with
    /// [`DesklineError::SendBlocked`] while an AI reply is outstanding.
    pub async fn send(
        &self,
        content: impl Into<String>,
        image_ref: Option<String>,
    ) -> Result<SendReceipt, DesklineError> {
        let content = content.into();
        request(&self.commands, |reply| Command::Send {
            content,
            image_ref,
            reply,
        })
        .await
    }

    /// Retries persisting a message whose send failed.
    pub async fn retry_send(&self, local_id: &MessageId) -> Result<SendReceipt, DesklineError> {
        let local_id = local_id.clone();
        request(&self.commands, |reply| Command::RetrySend { local_id, reply }).await
    }

    /// Hands the conversation back to the assistant.
    pub async fn return_to_ai(&self) -> Result<Conversation, DesklineError> {
        request(&self.commands, |reply| Command::ReturnToAi { reply }).await
    }

    /// Forgets the current conversation and shows a fresh widget.
    pub async fn start_new(&self) -> Result<(), DesklineError> {
        request(&self.commands, |reply| Command::StartNew { reply }).await
    }

    /// Stops the session: unsubscribes and cancels every pending task.
    pub async fn close(self) {
        self.task.cancel();
        self.task.join().await;
    }
}

async fn resolve_cached(
    runtime: &Runtime,
    cache: &ConversationCache,
    options: &WidgetOptions,
) -> Result<Option<(Conversation, Vec<Message>)>, DesklineError> {
    let customer = options.customer_email.as_deref();
    let Some(entry) = cache.lookup(&options.chatbot_id, customer, Utc::now()) else {
        return Ok(None);
    };

    let messages = match runtime.store.get_messages(&entry.conversation_id).await {
        Ok(messages) => messages,
        Err(DesklineError::NotFound { .. }) => {
            info!(
                conversation_id = %entry.conversation_id,
                "cached conversation no longer exists, starting fresh"
            );
            cache.forget(&options.chatbot_id, customer);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    match runtime.store.get_conversation(&entry.conversation_id).await? {
        Some(conversation) => Ok(Some((conversation, messages))),
        None => {
            cache.forget(&options.chatbot_id, customer);
            Ok(None)
        }
    }
}

fn empty_view() -> WidgetView {
    WidgetView {
        session: SessionState::Idle,
        conversation_id: None,
        status: None,
        messages: Vec::new(),
        connection: ConnectionSnapshot::default(),
        notice: None,
        awaiting_ai: false,
    }
}

struct ActiveConversation {
    id: ConversationId,
    scheduler: Scheduler,
    monitor: ConnectionMonitor,
    delivery: Arc<DeliveryCoordinator>,
}

// The first message of a conversation that is still being created.
struct PendingCreate {
    seq: u64,
    local_id: MessageId,
    reply: oneshot::Sender<Result<Message, DesklineError>>,
    scheduler: Scheduler,
}

struct WidgetActor {
    runtime: Runtime,
    gate: AiGate,
    machine: StatusMachine,
    cache: ConversationCache,
    options: WidgetOptions,
    root: Scheduler,
    active: Option<ActiveConversation>,
    creating: Option<PendingCreate>,
    create_seq: u64,
    log: MessageLog,
    status: Option<ConversationStatus>,
    /// Bumped on every status change seen, so a slower re-fetch cannot
    /// roll the status back.
    status_epoch: u64,
    /// Local id of the message whose AI reply is outstanding.
    ai_request: Option<MessageId>,
    /// Local id of the unsent welcome message.
    welcome: Option<MessageId>,
    notice: Option<String>,
    notice_seq: u64,
    connection: ConnectionSnapshot,
    view_tx: watch::Sender<WidgetView>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    monitor_tx: mpsc::UnboundedSender<MonitorEvent>,
}

impl WidgetActor {
    async fn run(
        mut self,
        token: CancellationToken,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
        mut monitor: mpsc::UnboundedReceiver<MonitorEvent>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = monitor.recv() => self.handle_monitor_event(event),
                Some(event) = internal.recv() => self.handle_internal(event).await,
            }
            self.publish();
        }

        self.detach().await;
        self.root.cancel();
        self.view_tx.send_modify(|view| {
            view.session = SessionState::Closed;
            view.connection = ConnectionSnapshot::default();
        });
        debug!(chatbot_id = %self.options.chatbot_id, "widget session closed");
    }

    fn publish(&self) {
        let session = if self.active.is_some() {
            SessionState::Active
        } else {
            SessionState::Idle
        };
        self.view_tx.send_replace(WidgetView {
            session,
            conversation_id: self.active.as_ref().map(|a| a.id.clone()),
            status: self.status,
            messages: self.log.entries().to_vec(),
            connection: self.connection.clone(),
            notice: self.notice.clone(),
            awaiting_ai: self.ai_request.is_some(),
        });
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send {
                content,
                image_ref,
                reply,
            } => {
                let result = self.send(content, image_ref).await;
                let _ = reply.send(result);
            }
            Command::RetrySend { local_id, reply } => {
                let _ = reply.send(self.retry_send(local_id));
            }
            Command::ReturnToAi { reply } => self.return_to_ai(reply),
            Command::StartNew { reply } => {
                info!(chatbot_id = %self.options.chatbot_id, "starting new conversation");
                self.reset().await;
                self.seed_welcome();
                let _ = reply.send(Ok(()));
            }
        }
    }

    async fn send(
        &mut self,
        content: String,
        image_ref: Option<String>,
    ) -> Result<SendReceipt, DesklineError> {
        if self.ai_request.is_some() {
            return Err(DesklineError::SendBlocked {
                reason: "waiting for the assistant to reply".into(),
            });
        }
        if content.trim().is_empty() && image_ref.is_none() {
            return Err(DesklineError::SendBlocked {
                reason: "message is empty".into(),
            });
        }

        if self.status == Some(ConversationStatus::Resolved) {
            info!("conversation is resolved, starting a new one for this message");
            self.reset().await;
        }
        let local_id = self
            .log
            .push_local(MessageRole::User, content, image_ref, SendState::Sending);
        if self.active.is_none() {
            return Ok(self.create_conversation(local_id));
        }
        Ok(self.persist(local_id))
    }

    fn retry_send(&mut self, local_id: MessageId) -> Result<SendReceipt, DesklineError> {
        if self.ai_request.is_some() {
            return Err(DesklineError::SendBlocked {
                reason: "waiting for the assistant to reply".into(),
            });
        }
        let failed = self
            .log
            .get(&local_id)
            .is_some_and(|e| e.send_state == SendState::Failed);
        if !failed || self.creating.is_some() {
            return Err(DesklineError::NotFound {
                entity: "failed message",
                id: local_id.to_string(),
            });
        }
        self.log.mark_local(&local_id, SendState::Sending);
        if self.active.is_none() {
            return Ok(self.create_conversation(local_id));
        }
        Ok(self.persist(local_id))
    }

    // Stores a local entry (after the welcome message, the first time) and,
    // while the assistant is in charge, asks it for a reply.
    fn persist(&mut self, local_id: MessageId) -> SendReceipt {
        let (reply_tx, reply_rx) = oneshot::channel();
        let receipt = SendReceipt::new(local_id.clone(), reply_rx);
        self.store_local(local_id, reply_tx);
        receipt
    }

    fn store_local(
        &mut self,
        local_id: MessageId,
        reply_tx: oneshot::Sender<Result<Message, DesklineError>>,
    ) {
        let (Some(active), Some(entry)) = (&self.active, self.log.get(&local_id).cloned()) else {
            let _ = reply_tx.send(Err(DesklineError::Internal(
                "send without a conversation".into(),
            )));
            return;
        };

        let ask_ai = self.status.is_none_or(ConversationStatus::ai_replies_allowed);
        if ask_ai {
            self.ai_request = Some(local_id.clone());
        }
        let welcome = self.welcome.take().and_then(|id| {
            self.log
                .get(&id)
                .map(|e| (id, e.content.clone()))
        });

        let store = self.runtime.store.clone();
        let gate = self.gate.clone();
        let tx = self.internal_tx.clone();
        let conversation_id = active.id.clone();
        active.scheduler.spawn(async move {
            if let Some((welcome_id, text)) = welcome {
                let message =
                    NewMessage::text(conversation_id.clone(), MessageRole::Assistant, text);
                match store.insert_message(message).await {
                    Ok(stored) => {
                        let _ = tx.send(Internal::Persisted {
                            conversation_id: conversation_id.clone(),
                            local_id: welcome_id,
                            stored: Some(stored),
                        });
                    }
                    Err(e) => {
                        warn!(conversation_id = %conversation_id, error = %e, "failed to store welcome message");
                    }
                }
            }

            let message = NewMessage::text(conversation_id.clone(), MessageRole::User, &entry.content)
                .with_image(entry.image_ref.clone());
            let result = store.insert_message(message).await;
            let _ = tx.send(Internal::Persisted {
                conversation_id: conversation_id.clone(),
                local_id: local_id.clone(),
                stored: result.as_ref().ok().cloned(),
            });
            let stored = result.is_ok();
            let _ = reply_tx.send(result);

            if ask_ai && stored {
                let outcome = gate
                    .handle_incoming_customer_message(&conversation_id, &entry.content)
                    .await;
                let _ = tx.send(Internal::AiFinished {
                    conversation_id,
                    local_id,
                    outcome,
                });
            }
        });
    }

    // Creates the conversation for the first message in the background; the
    // message is stored once `Internal::Created` comes back. The entry counts
    // as the outstanding AI request meanwhile, so further sends wait.
    fn create_conversation(&mut self, local_id: MessageId) -> SendReceipt {
        let (reply_tx, reply_rx) = oneshot::channel();
        let receipt = SendReceipt::new(local_id.clone(), reply_rx);

        self.create_seq += 1;
        let seq = self.create_seq;
        let scheduler = self.root.child();
        let store = self.runtime.store.clone();
        let tx = self.internal_tx.clone();
        let new = NewConversation {
            chatbot_id: self.options.chatbot_id.clone(),
            customer_email: self.options.customer_email.clone(),
            source: self.options.source.clone(),
        };
        scheduler.spawn(async move {
            let result = store.create_conversation(new).await;
            let _ = tx.send(Internal::Created { seq, result });
        });

        self.ai_request = Some(local_id.clone());
        self.creating = Some(PendingCreate {
            seq,
            local_id,
            reply: reply_tx,
            scheduler,
        });
        receipt
    }

    fn conversation_created(&mut self, seq: u64, result: Result<Conversation, DesklineError>) {
        let Some(pending) = self.creating.take_if(|p| p.seq == seq) else {
            debug!(seq, "ignoring stale conversation creation");
            return;
        };
        match result {
            Ok(conversation) => {
                info!(
                    conversation_id = %conversation.id,
                    chatbot_id = %self.options.chatbot_id,
                    "conversation started"
                );
                self.cache.remember(
                    &self.options.chatbot_id,
                    self.options.customer_email.as_deref(),
                    &conversation.id,
                    Utc::now(),
                );
                self.status = Some(conversation.status);
                self.attach(conversation.id);
                self.publish();
                self.store_local(pending.local_id, pending.reply);
            }
            Err(e) => {
                warn!(chatbot_id = %self.options.chatbot_id, error = %e, "could not start conversation");
                self.log.mark_local(&pending.local_id, SendState::Failed);
                if self.ai_request.as_ref() == Some(&pending.local_id) {
                    self.ai_request = None;
                }
                let _ = pending.reply.send(Err(e));
            }
        }
    }

    fn return_to_ai(&mut self, reply: oneshot::Sender<Result<Conversation, DesklineError>>) {
        let Some(active) = &self.active else {
            let _ = reply.send(Err(DesklineError::NotFound {
                entity: "conversation",
                id: "(none)".into(),
            }));
            return;
        };
        let machine = self.machine.clone();
        let tx = self.internal_tx.clone();
        let conversation_id = active.id.clone();
        active.scheduler.spawn(async move {
            let result = machine.apply(&conversation_id, Trigger::ReturnToAi).await;
            if let Ok(transition) = &result {
                let _ = tx.send(Internal::StatusApplied {
                    conversation_id,
                    conversation: transition.conversation.clone(),
                    notice: transition.notice.clone(),
                });
            }
            let _ = reply.send(result.map(|t| t.conversation));
        });
    }

    fn attach(&mut self, conversation_id: ConversationId) {
        let config = &self.runtime.config;
        let scheduler = self.root.child();
        let monitor = ConnectionMonitor::start(
            self.runtime.channel.clone(),
            conversation_id.clone(),
            &config.connection,
            &scheduler,
            self.monitor_tx.clone(),
        );
        let delivery = DeliveryCoordinator::new(
            self.runtime.store.clone(),
            self.runtime.delivery_backoff(),
            scheduler.child(),
        )
        .with_recovery(Arc::new(monitor.handle()));
        self.connection = monitor.snapshot();
        self.active = Some(ActiveConversation {
            id: conversation_id,
            scheduler,
            monitor,
            delivery: Arc::new(delivery),
        });
    }

    async fn detach(&mut self) {
        if let Some(active) = self.active.take() {
            active.scheduler.cancel();
            active.monitor.close().await;
            debug!(conversation_id = %active.id, "detached from conversation");
        }
        self.connection = ConnectionSnapshot::default();
    }

    // Drops everything tied to the current conversation, including any AI
    // request and delivery retries still running for it.
    async fn reset(&mut self) {
        if let Some(pending) = self.creating.take() {
            pending.scheduler.cancel();
        }
        self.detach().await;
        self.cache.forget(
            &self.options.chatbot_id,
            self.options.customer_email.as_deref(),
        );
        self.log.clear();
        self.status = None;
        self.ai_request = None;
        self.welcome = None;
        self.notice = None;
    }

    fn seed_welcome(&mut self) {
        let text = self.runtime.config.widget.welcome_message.clone();
        let id = self
            .log
            .push_local(MessageRole::Assistant, text, None, SendState::Synthetic);
        self.welcome = Some(id);
    }

    fn is_current(&self, conversation_id: &ConversationId) -> bool {
        self.active.as_ref().is_some_and(|a| &a.id == conversation_id)
    }

    fn handle_monitor_event(&mut self, event: MonitorEvent) {
        if !self.is_current(event.conversation_id()) {
            return;
        }
        match event {
            MonitorEvent::Change(change) => self.apply_change(change),
            MonitorEvent::Subscribed { resubscribed, .. } => {
                debug!(resubscribed, "subscription acknowledged, re-fetching");
                self.refetch();
            }
            MonitorEvent::StateChanged { snapshot, .. } => self.connection = snapshot,
        }
    }

    fn apply_change(&mut self, change: ChangeEvent) {
        match change {
            ChangeEvent::MessageInserted { record } => {
                let message = record.into_message();
                let pending_agent = message.is_agent_authored()
                    && message.delivery_status == Some(DeliveryStatus::Pending);
                let id = message.id.clone();
                if self.log.insert_remote(message) {
                    debug!(message_id = %id, "message received");
                    if pending_agent {
                        self.confirm(id);
                    }
                }
            }
            ChangeEvent::MessageUpdated { record } => {
                let message = record.into_message();
                if !self.log.contains(&message.id) {
                    self.apply_change(ChangeEvent::MessageInserted {
                        record: (&message).into(),
                    });
                } else if let Some(status) = message.delivery_status {
                    self.log.apply_delivery(&message.id, status);
                }
            }
            ChangeEvent::StatusUpdated { status, .. } => {
                debug!(status = %status, "conversation status updated");
                self.status = Some(status);
                self.status_epoch += 1;
            }
        }
    }

    fn confirm(&self, message_id: MessageId) {
        let Some(active) = &self.active else {
            return;
        };
        let delivery = active.delivery.clone();
        let tx = self.internal_tx.clone();
        let conversation_id = active.id.clone();
        active.scheduler.spawn(async move {
            let result = delivery.confirm_delivery(&message_id, &conversation_id).await;
            let _ = tx.send(Internal::Delivery {
                conversation_id,
                message_id,
                result,
            });
        });
    }

    fn confirm_pending(&self) {
        for entry in self.log.entries() {
            if entry.role == MessageRole::Agent
                && entry.delivery_status == Some(DeliveryStatus::Pending)
            {
                self.confirm(entry.id.clone());
            }
        }
    }

    fn refetch(&self) {
        let Some(active) = &self.active else {
            return;
        };
        let store = self.runtime.store.clone();
        let tx = self.internal_tx.clone();
        let conversation_id = active.id.clone();
        let epoch = self.status_epoch;
        active.scheduler.spawn(async move {
            let result = async {
                let messages = store.get_messages(&conversation_id).await?;
                let status = store.get_conversation_status(&conversation_id).await?;
                Ok((messages, status))
            }
            .await;
            let _ = tx.send(Internal::Fetched {
                conversation_id,
                epoch,
                result,
            });
        });
    }

    async fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Created { seq, result } => self.conversation_created(seq, result),
            Internal::Persisted {
                conversation_id,
                local_id,
                stored,
            } => {
                if !self.is_current(&conversation_id) {
                    return;
                }
                match stored {
                    Some(message) => self.log.confirm_local(&local_id, message),
                    None => {
                        warn!(conversation_id = %conversation_id, local_id = %local_id, "send failed");
                        self.log.mark_local(&local_id, SendState::Failed);
                        if self.ai_request.as_ref() == Some(&local_id) {
                            self.ai_request = None;
                        }
                    }
                }
            }
            Internal::AiFinished {
                conversation_id,
                local_id,
                outcome,
            } => {
                if !self.is_current(&conversation_id) {
                    return;
                }
                if self.ai_request.as_ref() == Some(&local_id) {
                    self.ai_request = None;
                }
                if matches!(
                    outcome,
                    Ok(GateOutcome::Replied { escalated: true, .. }
                        | GateOutcome::CustomerEscalated
                        | GateOutcome::Suppressed { .. })
                ) {
                    self.status_epoch += 1;
                }
                match outcome {
                    Ok(GateOutcome::Replied { reply, escalated }) => {
                        self.log.insert_remote(reply);
                        if escalated {
                            self.status = Some(ConversationStatus::AwaitingHumanResponse);
                        }
                    }
                    Ok(GateOutcome::CustomerEscalated) => {
                        self.status = Some(ConversationStatus::AwaitingHumanResponse);
                    }
                    Ok(GateOutcome::Suppressed { status }) => self.status = Some(status),
                    Err(e) => {
                        warn!(conversation_id = %conversation_id, error = %e, "ai reply failed");
                    }
                }
            }
            Internal::Delivery {
                conversation_id,
                message_id,
                result,
            } => {
                if !self.is_current(&conversation_id) {
                    return;
                }
                match result {
                    Ok(status) => {
                        self.log.apply_delivery(&message_id, status);
                        if status == DeliveryStatus::Failed {
                            self.show_notice(DELIVERY_NOTICE);
                        }
                    }
                    Err(DesklineError::Cancelled) => {}
                    Err(e) => {
                        warn!(message_id = %message_id, error = %e, "delivery confirmation error");
                    }
                }
            }
            Internal::Fetched {
                conversation_id,
                epoch,
                result,
            } => {
                if !self.is_current(&conversation_id) {
                    return;
                }
                match result {
                    Ok((messages, status)) => {
                        let added = self.log.reconcile(messages);
                        if !added.is_empty() {
                            info!(
                                conversation_id = %conversation_id,
                                missed = added.len(),
                                "reconciled messages missed while disconnected"
                            );
                        }
                        if epoch == self.status_epoch {
                            self.status = Some(status);
                        }
                        self.confirm_pending();
                    }
                    Err(DesklineError::NotFound { .. }) => {
                        warn!(conversation_id = %conversation_id, "conversation disappeared, starting fresh");
                        self.reset().await;
                        self.seed_welcome();
                    }
                    Err(e) => {
                        warn!(conversation_id = %conversation_id, error = %e, "re-fetch failed");
                    }
                }
            }
            Internal::StatusApplied {
                conversation_id,
                conversation,
                notice,
            } => {
                if !self.is_current(&conversation_id) {
                    return;
                }
                self.status = Some(conversation.status);
                self.status_epoch += 1;
                if let Some(notice) = notice {
                    self.log.insert_remote(notice);
                }
            }
            Internal::DismissNotice { seq } => {
                if seq == self.notice_seq {
                    self.notice = None;
                }
            }
        }
    }

    fn show_notice(&mut self, text: &str) {
        self.notice_seq += 1;
        self.notice = Some(text.to_string());
        let seq = self.notice_seq;
        let tx = self.internal_tx.clone();
        self.root
            .spawn_after(self.runtime.config.widget.notice_ttl(), async move {
                let _ = tx.send(Internal::DismissNotice { seq });
            });
    }
}
