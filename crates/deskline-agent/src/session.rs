// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pieces shared by the widget and help-desk session actors.

use std::fmt;

use deskline_core::types::{Message, MessageId};
use deskline_core::DesklineError;
use tokio::sync::{mpsc, oneshot};

/// Lifecycle of a session actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No conversation yet (fresh widget, welcome message only).
    Idle,
    /// Attached to a conversation and following its changes.
    Active,
    /// Torn down; no further work happens.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Active => write!(f, "active"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// An accepted send. The message is already in the local view.
#[derive(Debug)]
pub struct SendReceipt {
    pub local_id: MessageId,
    persisted: oneshot::Receiver<Result<Message, DesklineError>>,
}

impl SendReceipt {
    pub(crate) fn new(
        local_id: MessageId,
        persisted: oneshot::Receiver<Result<Message, DesklineError>>,
    ) -> Self {
        Self {
            local_id,
            persisted,
        }
    }

    /// Waits until the store accepted (or refused) the message.
    ///
    /// A refusal is retryable via the session's `retry_send`. Returns
    /// [`DesklineError::Cancelled`] if the conversation was switched first.
    pub async fn persisted(self) -> Result<Message, DesklineError> {
        self.persisted.await.unwrap_or(Err(DesklineError::Cancelled))
    }
}

/// Queue depth of a session's command channel.
pub(crate) const COMMAND_BUFFER: usize = 32;

/// Sends a command carrying a reply channel and waits for the reply.
pub(crate) async fn request<C, T>(
    commands: &mpsc::Sender<C>,
    build: impl FnOnce(oneshot::Sender<Result<T, DesklineError>>) -> C,
) -> Result<T, DesklineError> {
    let (tx, rx) = oneshot::channel();
    commands
        .send(build(tx))
        .await
        .map_err(|_| DesklineError::Cancelled)?;
    rx.await.unwrap_or(Err(DesklineError::Cancelled))
}
