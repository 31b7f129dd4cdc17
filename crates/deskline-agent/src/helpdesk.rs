// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Agent-facing help-desk session.
//!
//! A [`HelpDeskSession`] follows one conversation for one agent. Like the
//! widget it is an actor: status actions and sends run as tasks on the
//! session's scheduler and report back, while change events from the
//! connection monitor keep the view current. The help desk never confirms
//! delivery itself; it only watches delivery statuses change.

use chrono::Utc;
use deskline_core::types::{
    ChangeEvent, Conversation, ConversationId, ConversationStatus, DeliveryStatus, Message,
    MessageId, MessageRole, NewMessage,
};
use deskline_core::DesklineError;
use deskline_resilience::{Scheduler, TaskHandle};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::health::{ConnectionMonitor, ConnectionSnapshot, MonitorEvent};
use crate::session::{request, SendReceipt, SessionState, COMMAND_BUFFER};
use crate::status::{StatusMachine, Trigger};
use crate::view::{MessageLog, SendState, ViewEntry};
use crate::Runtime;

/// Read-only projection for the help-desk UI.
#[derive(Debug, Clone, PartialEq)]
pub struct DeskView {
    pub session: SessionState,
    pub conversation: Conversation,
    pub messages: Vec<ViewEntry>,
    pub connection: ConnectionSnapshot,
}

impl DeskView {
    pub fn status(&self) -> ConversationStatus {
        self.conversation.status
    }

    pub fn message(&self, id: &MessageId) -> Option<&ViewEntry> {
        self.messages.iter().find(|m| &m.id == id)
    }
}

enum Command {
    Apply {
        trigger: Trigger,
        reply: oneshot::Sender<Result<Conversation, DesklineError>>,
    },
    Send {
        content: String,
        reply: oneshot::Sender<Result<SendReceipt, DesklineError>>,
    },
}

enum Internal {
    StatusApplied {
        conversation: Conversation,
        notice: Option<Message>,
    },
    Persisted {
        local_id: MessageId,
        stored: Option<Message>,
    },
    Fetched {
        epoch: u64,
        result: Result<(Vec<Message>, Conversation), DesklineError>,
    },
}

/// Handle to a running help-desk session.
pub struct HelpDeskSession {
    agent_id: String,
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<DeskView>,
    task: TaskHandle<()>,
}

impl HelpDeskSession {
    /// Conversations for the inbox, most recently updated first.
    pub async fn inbox(
        runtime: &Runtime,
        status: Option<ConversationStatus>,
    ) -> Result<Vec<Conversation>, DesklineError> {
        runtime.store.list_conversations(status).await
    }

    /// Opens a conversation for `agent_id` and starts following its changes.
    pub async fn open(
        runtime: &Runtime,
        conversation_id: &ConversationId,
        agent_id: impl Into<String>,
    ) -> Result<Self, DesklineError> {
        let agent_id = agent_id.into();
        let conversation = runtime
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| DesklineError::NotFound {
                entity: "conversation",
                id: conversation_id.to_string(),
            })?;
        let messages = runtime.store.get_messages(conversation_id).await?;
        info!(
            conversation_id = %conversation_id,
            agent_id = %agent_id,
            status = %conversation.status,
            "help desk opened conversation"
        );

        let scheduler = runtime.scheduler.child();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (monitor_tx, monitor_rx) = mpsc::unbounded_channel();
        let monitor = ConnectionMonitor::start(
            runtime.channel.clone(),
            conversation_id.clone(),
            &runtime.config.connection,
            &scheduler,
            monitor_tx,
        );

        let connection = monitor.snapshot();
        let view = DeskView {
            session: SessionState::Active,
            conversation: conversation.clone(),
            messages: Vec::new(),
            connection: connection.clone(),
        };
        let (view_tx, view_rx) = watch::channel(view);

        let actor = DeskActor {
            runtime: runtime.clone(),
            machine: runtime.status_machine(),
            agent_id: agent_id.clone(),
            scheduler: scheduler.clone(),
            monitor: Some(monitor),
            conversation,
            status_epoch: 0,
            log: MessageLog::from_messages(messages),
            connection,
            view_tx,
            internal_tx,
        };
        actor.publish();

        let task = scheduler.spawn_cooperative(move |token| {
            actor.run(token, commands_rx, internal_rx, monitor_rx)
        });

        Ok(Self {
            agent_id,
            commands: commands_tx,
            view: view_rx,
            task,
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn view(&self) -> DeskView {
        self.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<DeskView> {
        self.view.clone()
    }

    /// Delivery status of a message as last observed.
    pub fn delivery_status(&self, message_id: &MessageId) -> Option<DeliveryStatus> {
        self.view
            .borrow()
            .message(message_id)
            .and_then(|m| m.delivery_status)
    }

    /// Takes the conversation over from the assistant.
    pub async fn take_over(&self) -> Result<Conversation, DesklineError> {
        let trigger = Trigger::TakeOver {
            agent_id: self.agent_id.clone(),
        };
        self.apply(trigger).await
    }

    /// Hands the conversation back to the assistant.
    pub async fn return_to_ai(&self) -> Result<Conversation, DesklineError> {
        self.apply(Trigger::ReturnToAi).await
    }

    pub async fn resolve(&self) -> Result<Conversation, DesklineError> {
        self.apply(Trigger::Resolve).await
    }

    /// Sends an agent reply.
    ///
    /// Replying to a conversation the assistant is handling takes it over
    /// first. Replying to a resolved conversation is refused.
    pub async fn send(&self, content: impl Into<String>) -> Result<SendReceipt, DesklineError> {
        let content = content.into();
        request(&self.commands, |reply| Command::Send { content, reply }).await
    }

    pub async fn close(self) {
        self.task.cancel();
        self.task.join().await;
    }

    async fn apply(&self, trigger: Trigger) -> Result<Conversation, DesklineError> {
        request(&self.commands, |reply| Command::Apply { trigger, reply }).await
    }
}

struct DeskActor {
    runtime: Runtime,
    machine: StatusMachine,
    agent_id: String,
    scheduler: Scheduler,
    monitor: Option<ConnectionMonitor>,
    conversation: Conversation,
    /// Bumped on every status change seen, so a slower re-fetch cannot
    /// roll the status back.
    status_epoch: u64,
    log: MessageLog,
    connection: ConnectionSnapshot,
    view_tx: watch::Sender<DeskView>,
    internal_tx: mpsc::UnboundedSender<Internal>,
}

impl DeskActor {
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
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = monitor.recv() => self.handle_monitor_event(event),
                Some(event) = internal.recv() => self.handle_internal(event),
            }
            self.publish();
        }

        if let Some(monitor) = self.monitor.take() {
            monitor.close().await;
        }
        self.scheduler.cancel();
        self.view_tx.send_modify(|view| {
            view.session = SessionState::Closed;
            view.connection = ConnectionSnapshot::default();
        });
        debug!(conversation_id = %self.conversation.id, "help desk session closed");
    }

    fn publish(&self) {
        self.view_tx.send_replace(DeskView {
            session: SessionState::Active,
            conversation: self.conversation.clone(),
            messages: self.log.entries().to_vec(),
            connection: self.connection.clone(),
        });
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Apply { trigger, reply } => self.apply(trigger, reply),
            Command::Send { content, reply } => {
                let result = self.send(content);
                let _ = reply.send(result);
            }
        }
    }

    fn apply(
        &self,
        trigger: Trigger,
        reply: oneshot::Sender<Result<Conversation, DesklineError>>,
    ) {
        let machine = self.machine.clone();
        let tx = self.internal_tx.clone();
        let conversation_id = self.conversation.id.clone();
        self.scheduler.spawn(async move {
            let result = machine.apply(&conversation_id, trigger).await;
            if let Ok(transition) = &result {
                let _ = tx.send(Internal::StatusApplied {
                    conversation: transition.conversation.clone(),
                    notice: transition.notice.clone(),
                });
            }
            let _ = reply.send(result.map(|t| t.conversation));
        });
    }

    fn send(&mut self, content: String) -> Result<SendReceipt, DesklineError> {
        let status = self.conversation.status;
        if status == ConversationStatus::Resolved {
            return Err(DesklineError::InvalidTransition {
                from: status,
                trigger: "agent_reply".into(),
            });
        }
        if content.trim().is_empty() {
            return Err(DesklineError::SendBlocked {
                reason: "message is empty".into(),
            });
        }

        let local_id = self
            .log
            .push_local(MessageRole::Agent, content.clone(), None, SendState::Sending);
        let (reply_tx, reply_rx) = oneshot::channel();
        let receipt = SendReceipt::new(local_id.clone(), reply_rx);

        let take_over = (status == ConversationStatus::AiHandling).then(|| Trigger::TakeOver {
            agent_id: self.agent_id.clone(),
        });
        let machine = self.machine.clone();
        let store = self.runtime.store.clone();
        let tx = self.internal_tx.clone();
        let conversation_id = self.conversation.id.clone();
        self.scheduler.spawn(async move {
            if let Some(trigger) = take_over {
                match machine.apply(&conversation_id, trigger).await {
                    Ok(transition) => {
                        let _ = tx.send(Internal::StatusApplied {
                            conversation: transition.conversation,
                            notice: transition.notice,
                        });
                    }
                    // Someone else already moved it out of AI handling.
                    Err(DesklineError::InvalidTransition {
                        from: ConversationStatus::AwaitingHumanResponse,
                        ..
                    }) => {}
                    Err(e) => {
                        warn!(conversation_id = %conversation_id, error = %e, "implicit take-over failed");
                        let _ = tx.send(Internal::Persisted {
                            local_id,
                            stored: None,
                        });
                        let _ = reply_tx.send(Err(e));
                        return;
                    }
                }
            }

            let message = NewMessage::text(conversation_id, MessageRole::Agent, content);
            let result = store.insert_message(message).await;
            let _ = tx.send(Internal::Persisted {
                local_id,
                stored: result.as_ref().ok().cloned(),
            });
            let _ = reply_tx.send(result);
        });
        Ok(receipt)
    }

    fn handle_monitor_event(&mut self, event: MonitorEvent) {
        if event.conversation_id() != &self.conversation.id {
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
                self.log.insert_remote(record.into_message());
            }
            ChangeEvent::MessageUpdated { record } => {
                let message = record.into_message();
                match message.delivery_status {
                    Some(status) if self.log.contains(&message.id) => {
                        if self.log.apply_delivery(&message.id, status) {
                            debug!(message_id = %message.id, status = %status, "delivery status changed");
                        }
                    }
                    _ => {
                        self.log.insert_remote(message);
                    }
                }
            }
            ChangeEvent::StatusUpdated {
                status,
                assigned_agent,
                ..
            } => {
                self.conversation.status = status;
                self.conversation.assigned_agent = assigned_agent;
                self.conversation.updated_at = Utc::now();
                self.status_epoch += 1;
            }
        }
    }

    fn refetch(&self) {
        let store = self.runtime.store.clone();
        let tx = self.internal_tx.clone();
        let conversation_id = self.conversation.id.clone();
        let epoch = self.status_epoch;
        self.scheduler.spawn(async move {
            let result = async {
                let conversation = store
                    .get_conversation(&conversation_id)
                    .await?
                    .ok_or_else(|| DesklineError::NotFound {
                        entity: "conversation",
                        id: conversation_id.to_string(),
                    })?;
                let messages = store.get_messages(&conversation_id).await?;
                Ok((messages, conversation))
            }
            .await;
            let _ = tx.send(Internal::Fetched { epoch, result });
        });
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::StatusApplied {
                conversation,
                notice,
            } => {
                info!(
                    conversation_id = %conversation.id,
                    agent_id = %self.agent_id,
                    status = %conversation.status,
                    "status changed from help desk"
                );
                self.conversation = conversation;
                self.status_epoch += 1;
                if let Some(notice) = notice {
                    self.log.insert_remote(notice);
                }
            }
            Internal::Persisted { local_id, stored } => match stored {
                Some(message) => self.log.confirm_local(&local_id, message),
                None => {
                    self.log.mark_local(&local_id, SendState::Failed);
                }
            },
            Internal::Fetched { epoch, result } => match result {
                Ok((messages, conversation)) => {
                    let added = self.log.reconcile(messages);
                    if !added.is_empty() {
                        info!(
                            conversation_id = %conversation.id,
                            missed = added.len(),
                            "reconciled messages missed while disconnected"
                        );
                    }
                    if epoch == self.status_epoch {
                        self.conversation = conversation;
                    }
                }
                Err(e) => {
                    warn!(conversation_id = %self.conversation.id, error = %e, "re-fetch failed");
                }
            },
        }
    }
}
