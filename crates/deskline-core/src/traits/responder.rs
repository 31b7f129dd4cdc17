// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! AI responder trait. Reply generation and risk scoring happen outside deskline.

use async_trait::async_trait;

use crate::error::DesklineError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{Conversation, Message, Sentiment};

/// What the responder sees when asked for a reply.
#[derive(Debug, Clone)]
pub struct ResponderRequest {
    pub conversation: Conversation,
    /// Conversation history in commit order, including the latest customer message.
    pub history: Vec<Message>,
    pub latest: String,
}

/// A generated reply plus the opaque signals that ride along with it.
#[derive(Debug, Clone, PartialEq)]
pub struct AiReply {
    pub content: String,
    /// Escalation risk in `[0, 1]`, if the responder scored the exchange.
    pub escalation_risk: Option<f32>,
    pub sentiment: Option<Sentiment>,
}

impl AiReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            escalation_risk: None,
            sentiment: None,
        }
    }
}

/// Adapter for the automated assistant.
#[async_trait]
pub trait AutoResponder: PluginAdapter {
    /// Produces a reply to the latest customer message.
    async fn respond(&self, request: ResponderRequest) -> Result<AiReply, DesklineError>;
}
