// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation status machine.
//!
//! Legal transitions:
//!
//! | From                      | Trigger                                   | To                        |
//! |---------------------------|-------------------------------------------|---------------------------|
//! | `AI_HANDLING`             | take-over, risk escalation, customer ask  | `AWAITING_HUMAN_RESPONSE` |
//! | `AWAITING_HUMAN_RESPONSE` | return to AI                              | `AI_HANDLING`             |
//! | `AWAITING_HUMAN_RESPONSE` | resolve                                   | `RESOLVED`                |
//! | `AI_HANDLING`             | resolve                                   | `RESOLVED`                |
//!
//! Every transition is one atomic status write. Anything outside the table is
//! rejected with [`DesklineError::InvalidTransition`] and leaves the stored
//! conversation untouched.

use std::fmt;
use std::sync::Arc;

use deskline_config::StatusConfig;
use deskline_core::types::{
    Conversation, ConversationId, ConversationStatus, Message, MessageRole, NewMessage,
    StatusUpdate,
};
use deskline_core::{ConversationStore, DesklineError};
use tracing::{debug, info, warn};

/// What asks for a status change.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// A human agent claims the conversation.
    TakeOver { agent_id: String },
    /// The responder scored the exchange above the escalation threshold.
    RiskEscalation { score: f32 },
    /// The customer explicitly asked for a human.
    CustomerEscalation,
    /// An agent or the customer hands the conversation back to the assistant.
    ReturnToAi,
    /// An agent marks the conversation resolved.
    Resolve,
}

impl Trigger {
    /// Stable name used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Trigger::TakeOver { .. } => "take_over",
            Trigger::RiskEscalation { .. } => "risk_escalation",
            Trigger::CustomerEscalation => "customer_escalation",
            Trigger::ReturnToAi => "return_to_ai",
            Trigger::Resolve => "resolve",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Target status of `trigger` from `from`, or `None` if the pair is not in the table.
pub fn transition_target(from: ConversationStatus, trigger: &Trigger) -> Option<ConversationStatus> {
    use ConversationStatus::*;

    match (from, trigger) {
        (
            AiHandling,
            Trigger::TakeOver { .. } | Trigger::RiskEscalation { .. } | Trigger::CustomerEscalation,
        ) => Some(AwaitingHumanResponse),
        (AwaitingHumanResponse, Trigger::ReturnToAi) => Some(AiHandling),
        (AiHandling | AwaitingHumanResponse, Trigger::Resolve) => Some(Resolved),
        _ => None,
    }
}

/// Result of an applied transition.
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: ConversationStatus,
    pub conversation: Conversation,
    /// System message posted into the conversation, if the transition emits one.
    pub notice: Option<Message>,
}

/// Applies status transitions against the durable store.
#[derive(Clone)]
pub struct StatusMachine {
    store: Arc<dyn ConversationStore>,
    config: StatusConfig,
}

impl StatusMachine {
    pub fn new(store: Arc<dyn ConversationStore>, config: StatusConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &StatusConfig {
        &self.config
    }

    /// Whether a responder risk score should hand the conversation to a human.
    pub fn exceeds_threshold(&self, score: f32) -> bool {
        score > self.config.escalation_threshold
    }

    /// Validates and persists one transition.
    ///
    /// With `guard_concurrent_writes` on, the write only lands if the stored
    /// status is still the one the transition was validated against; a lost
    /// race comes back as [`DesklineError::Conflict`] and nothing is written.
    pub async fn apply(
        &self,
        conversation_id: &ConversationId,
        trigger: Trigger,
    ) -> Result<Transition, DesklineError> {
        let current = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| DesklineError::NotFound {
                entity: "conversation",
                id: conversation_id.to_string(),
            })?;

        let Some(target) = transition_target(current.status, &trigger) else {
            debug!(
                conversation_id = %conversation_id,
                from = %current.status,
                trigger = %trigger,
                "transition rejected"
            );
            return Err(DesklineError::InvalidTransition {
                from: current.status,
                trigger: trigger.name().to_string(),
            });
        };

        let assigned_agent = match &trigger {
            Trigger::TakeOver { agent_id } => Some(agent_id.clone()),
            Trigger::ReturnToAi => None,
            _ => current.assigned_agent.clone(),
        };
        let update = StatusUpdate {
            status: target,
            assigned_agent,
            expected: self
                .config
                .guard_concurrent_writes
                .then_some(current.status),
        };

        let conversation = self
            .store
            .set_conversation_status(conversation_id, update)
            .await?;

        info!(
            conversation_id = %conversation_id,
            from = %current.status,
            to = %conversation.status,
            trigger = %trigger,
            "conversation status changed"
        );

        let notice = self.post_notice(conversation_id, &trigger).await;
        Ok(Transition {
            from: current.status,
            conversation,
            notice,
        })
    }

    /// Escalates when `score` is above the threshold. `Ok(None)` means no change was needed.
    pub async fn evaluate_escalation_risk(
        &self,
        conversation_id: &ConversationId,
        score: f32,
    ) -> Result<Option<Transition>, DesklineError> {
        if !self.exceeds_threshold(score) {
            return Ok(None);
        }
        self.apply(conversation_id, Trigger::RiskEscalation { score })
            .await
            .map(Some)
    }

    fn notice_text(&self, trigger: &Trigger) -> Option<&str> {
        match trigger {
            Trigger::TakeOver { .. } => Some(&self.config.takeover_notice),
            Trigger::RiskEscalation { .. } | Trigger::CustomerEscalation => {
                Some(&self.config.escalation_notice)
            }
            Trigger::ReturnToAi => Some(&self.config.return_notice),
            Trigger::Resolve => None,
        }
    }

    // The status write already landed; a failed notice must not undo it.
    async fn post_notice(
        &self,
        conversation_id: &ConversationId,
        trigger: &Trigger,
    ) -> Option<Message> {
        let text = self.notice_text(trigger)?;
        let notice = NewMessage::text(conversation_id.clone(), MessageRole::System, text);
        match self.store.insert_message(notice).await {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(
                    conversation_id = %conversation_id,
                    trigger = %trigger,
                    error = %e,
                    "failed to post transition notice"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskline_core::types::NewConversation;
    use deskline_test_utils::MemoryStore;
    use proptest::prelude::*;

    use ConversationStatus::*;

    async fn machine() -> (StatusMachine, Arc<MemoryStore>, ConversationId) {
        let store = Arc::new(MemoryStore::new());
        let conv = store
            .create_conversation(NewConversation {
                chatbot_id: "bot-1".into(),
                customer_email: None,
                source: "widget".into(),
            })
            .await
            .unwrap();
        let machine = StatusMachine::new(store.clone(), StatusConfig::default());
        (machine, store, conv.id)
    }

    fn take_over() -> Trigger {
        Trigger::TakeOver {
            agent_id: "agent-1".into(),
        }
    }

    #[tokio::test]
    async fn take_over_assigns_agent_and_posts_notice() {
        let (machine, store, id) = machine().await;

        let t = machine.apply(&id, take_over()).await.unwrap();
        assert_eq!(t.from, AiHandling);
        assert_eq!(t.conversation.status, AwaitingHumanResponse);
        assert_eq!(t.conversation.assigned_agent.as_deref(), Some("agent-1"));

        let notice = t.notice.expect("take-over posts a notice");
        assert_eq!(notice.role, MessageRole::System);
        assert_eq!(notice.content, StatusConfig::default().takeover_notice);
        assert_eq!(notice.delivery_status, None);
        assert_eq!(store.get_messages(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn return_to_ai_clears_agent() {
        let (machine, _store, id) = machine().await;
        machine.apply(&id, take_over()).await.unwrap();

        let t = machine.apply(&id, Trigger::ReturnToAi).await.unwrap();
        assert_eq!(t.conversation.status, AiHandling);
        assert_eq!(t.conversation.assigned_agent, None);
        assert!(t.notice.is_some());
    }

    #[tokio::test]
    async fn resolve_keeps_agent_and_posts_nothing() {
        let (machine, store, id) = machine().await;
        machine.apply(&id, take_over()).await.unwrap();

        let t = machine.apply(&id, Trigger::Resolve).await.unwrap();
        assert_eq!(t.conversation.status, Resolved);
        assert_eq!(t.conversation.assigned_agent.as_deref(), Some("agent-1"));
        assert!(t.notice.is_none());
        // Only the take-over notice.
        assert_eq!(store.get_messages(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejected_transition_leaves_state_unchanged() {
        let (machine, store, id) = machine().await;
        machine.apply(&id, Trigger::Resolve).await.unwrap();
        let before = store.get_conversation(&id).await.unwrap().unwrap();

        let err = machine.apply(&id, Trigger::ReturnToAi).await.unwrap_err();
        assert!(matches!(
            err,
            DesklineError::InvalidTransition { from: Resolved, ref trigger } if trigger == "return_to_ai"
        ));
        assert!(!err.is_retryable());
        assert_eq!(store.get_conversation(&id).await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn missing_conversation_is_not_found() {
        let (machine, _store, _id) = machine().await;
        let err = machine
            .apply(&ConversationId::from("nope"), Trigger::Resolve)
            .await
            .unwrap_err();
        assert!(matches!(err, DesklineError::NotFound { entity: "conversation", .. }));
    }

    #[tokio::test]
    async fn risk_below_threshold_is_a_no_op() {
        let (machine, store, id) = machine().await;
        assert!(machine.evaluate_escalation_risk(&id, 0.7).await.unwrap().is_none());
        assert_eq!(store.get_conversation_status(&id).await.unwrap(), AiHandling);

        let t = machine.evaluate_escalation_risk(&id, 0.71).await.unwrap().unwrap();
        assert_eq!(t.conversation.status, AwaitingHumanResponse);
        assert_eq!(t.conversation.assigned_agent, None);
    }

    #[tokio::test]
    async fn store_failure_is_retryable() {
        let (machine, store, id) = machine().await;
        store.fail_next_status_writes(1);

        let err = machine.apply(&id, take_over()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.get_conversation_status(&id).await.unwrap(), AiHandling);

        machine.apply(&id, take_over()).await.unwrap();
    }

    #[tokio::test]
    async fn failed_notice_does_not_undo_transition() {
        let (machine, store, id) = machine().await;
        store.fail_next_inserts(1);

        let t = machine.apply(&id, take_over()).await.unwrap();
        assert!(t.notice.is_none());
        assert_eq!(
            store.get_conversation_status(&id).await.unwrap(),
            AwaitingHumanResponse
        );
    }

    #[tokio::test]
    async fn concurrent_take_overs_have_one_winner_when_guarded() {
        let (machine, store, id) = machine().await;
        let other = machine.clone();
        let id2 = id.clone();

        // Both validate against AI_HANDLING; the second write is stale.
        store.pause_status_writes();
        let a = tokio::spawn({
            let machine = machine.clone();
            let id = id.clone();
            async move { machine.apply(&id, take_over()).await }
        });
        let b = tokio::spawn(async move {
            other
                .apply(
                    &id2,
                    Trigger::TakeOver {
                        agent_id: "agent-2".into(),
                    },
                )
                .await
        });
        store.wait_for_paused_status_writes(2).await;
        store.resume_status_writes();

        let results = [a.await.unwrap(), b.await.unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(DesklineError::Conflict { .. })))
            .count();
        assert_eq!((wins, conflicts), (1, 1));
    }

    #[tokio::test]
    async fn unguarded_writes_are_last_write_wins() {
        let store = Arc::new(MemoryStore::new());
        let conv = store
            .create_conversation(NewConversation {
                chatbot_id: "bot-1".into(),
                customer_email: None,
                source: "widget".into(),
            })
            .await
            .unwrap();
        let config = StatusConfig {
            guard_concurrent_writes: false,
            ..StatusConfig::default()
        };
        let machine = StatusMachine::new(store.clone(), config);

        store.pause_status_writes();
        let a = tokio::spawn({
            let machine = machine.clone();
            let id = conv.id.clone();
            async move { machine.apply(&id, take_over()).await }
        });
        let b = tokio::spawn({
            let machine = machine.clone();
            let id = conv.id.clone();
            async move { machine.apply(&id, Trigger::Resolve).await }
        });
        store.wait_for_paused_status_writes(2).await;
        store.resume_status_writes();

        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());
        let status = store.get_conversation_status(&conv.id).await.unwrap();
        assert!(status == AwaitingHumanResponse || status == Resolved);
    }

    fn status() -> impl Strategy<Value = ConversationStatus> {
        prop_oneof![Just(AiHandling), Just(AwaitingHumanResponse), Just(Resolved)]
    }

    fn trigger() -> impl Strategy<Value = Trigger> {
        prop_oneof![
            "[a-z]{1,8}".prop_map(|agent_id| Trigger::TakeOver { agent_id }),
            (0.0f32..=1.0).prop_map(|score| Trigger::RiskEscalation { score }),
            Just(Trigger::CustomerEscalation),
            Just(Trigger::ReturnToAi),
            Just(Trigger::Resolve),
        ]
    }

    proptest! {
        #[test]
        fn resolved_is_terminal(t in trigger()) {
            prop_assert_eq!(transition_target(Resolved, &t), None);
        }

        #[test]
        fn targets_follow_the_table(from in status(), t in trigger()) {
            let expected = match (&t, from) {
                (Trigger::TakeOver { .. } | Trigger::RiskEscalation { .. } | Trigger::CustomerEscalation, AiHandling) => Some(AwaitingHumanResponse),
                (Trigger::ReturnToAi, AwaitingHumanResponse) => Some(AiHandling),
                (Trigger::Resolve, AiHandling | AwaitingHumanResponse) => Some(Resolved),
                _ => None,
            };
            prop_assert_eq!(transition_target(from, &t), expected);
        }

        #[test]
        fn illegal_pairs_are_rejected_without_writes(from in status(), t in trigger()) {
            prop_assume!(transition_target(from, &t).is_none());
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let store = Arc::new(MemoryStore::new());
                let conv = store.create_conversation(NewConversation {
                    chatbot_id: "bot".into(),
                    customer_email: None,
                    source: "widget".into(),
                }).await.unwrap();
                store.force_status(&conv.id, from).await;
                let before = store.get_conversation(&conv.id).await.unwrap().unwrap();
                let writes = store.status_writes();

                let machine = StatusMachine::new(store.clone(), StatusConfig::default());
                let result = machine.apply(&conv.id, t.clone()).await;
                assert!(matches!(result, Err(DesklineError::InvalidTransition { .. })));
                assert_eq!(store.get_conversation(&conv.id).await.unwrap().unwrap(), before);
                assert_eq!(store.status_writes(), writes);
                assert!(store.get_messages(&conv.id).await.unwrap().is_empty());
            });
        }
    }
}
