// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gate between incoming customer messages and the AI responder.
//!
//! [`AiGate::handle_incoming_customer_message`] is the entry point the
//! automation side calls after a customer message is persisted. Replies are
//! only generated while the conversation is `AI_HANDLING`; explicit requests
//! for a human and high escalation-risk scores hand the conversation over.

use std::sync::Arc;

use deskline_core::types::{ConversationId, ConversationStatus, Message, MessageRole, NewMessage};
use deskline_core::{AutoResponder, ConversationStore, DesklineError, ResponderRequest};
use tracing::{debug, info, warn};

use crate::status::{StatusMachine, Trigger};

/// What happened to one customer message.
#[derive(Debug, Clone)]
pub enum GateOutcome {
    /// The assistant answered. `escalated` is set when its risk score handed
    /// the conversation to a human right after.
    Replied { reply: Message, escalated: bool },
    /// The customer asked for a human; no reply was generated.
    CustomerEscalated,
    /// Replies are not allowed in the current status.
    Suppressed { status: ConversationStatus },
}

/// Decides whether, and how, the assistant answers a customer.
#[derive(Clone)]
pub struct AiGate {
    store: Arc<dyn ConversationStore>,
    responder: Arc<dyn AutoResponder>,
    machine: StatusMachine,
}

impl AiGate {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        responder: Arc<dyn AutoResponder>,
        machine: StatusMachine,
    ) -> Self {
        Self {
            store,
            responder,
            machine,
        }
    }

    /// Handles a customer message that has already been persisted.
    pub async fn handle_incoming_customer_message(
        &self,
        conversation_id: &ConversationId,
        content: &str,
    ) -> Result<GateOutcome, DesklineError> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| DesklineError::NotFound {
                entity: "conversation",
                id: conversation_id.to_string(),
            })?;

        if !conversation.status.ai_replies_allowed() {
            debug!(
                conversation_id = %conversation_id,
                status = %conversation.status,
                "ai reply suppressed"
            );
            return Ok(GateOutcome::Suppressed {
                status: conversation.status,
            });
        }

        if requests_human(content, &self.machine.config().escalation_keywords) {
            info!(conversation_id = %conversation_id, "customer asked for a human");
            self.machine
                .apply(conversation_id, Trigger::CustomerEscalation)
                .await?;
            return Ok(GateOutcome::CustomerEscalated);
        }

        let history = self.store.get_messages(conversation_id).await?;
        let reply = self
            .responder
            .respond(ResponderRequest {
                conversation,
                history,
                latest: content.to_string(),
            })
            .await?;

        // An agent may have taken over while the responder was thinking.
        let status = self.store.get_conversation_status(conversation_id).await?;
        if !status.ai_replies_allowed() {
            debug!(
                conversation_id = %conversation_id,
                status = %status,
                "ai reply discarded after status change"
            );
            return Ok(GateOutcome::Suppressed { status });
        }

        let message = self
            .store
            .insert_message(
                NewMessage::text(conversation_id.clone(), MessageRole::Assistant, reply.content)
                    .with_sentiment(reply.sentiment),
            )
            .await?;
        debug!(conversation_id = %conversation_id, message_id = %message.id, "ai reply stored");

        let escalated = match reply.escalation_risk {
            Some(score) => match self.machine.evaluate_escalation_risk(conversation_id, score).await
            {
                Ok(transition) => transition.is_some(),
                Err(e) => {
                    warn!(
                        conversation_id = %conversation_id,
                        score,
                        error = %e,
                        "risk escalation failed"
                    );
                    false
                }
            },
            None => false,
        };

        Ok(GateOutcome::Replied {
            reply: message,
            escalated,
        })
    }
}

/// Whether `content` contains one of the escalation phrases as whole words.
pub fn requests_human(content: &str, phrases: &[String]) -> bool {
    let text = normalize(content);
    phrases.iter().any(|phrase| {
        let phrase = normalize(phrase);
        !phrase.trim().is_empty() && text.contains(&phrase)
    })
}

// Lowercases and collapses everything but letters and digits into single
// spaces, padded on both ends so `contains` only matches whole words.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push(' ');
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        out.push_str(&word.to_lowercase());
        out.push(' ');
    }
    out
}
