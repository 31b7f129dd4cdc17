// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Widget session behaviour against the in-memory harness.

use std::time::Duration;

use chrono::Utc;
use deskline_agent::{SendState, SessionState, WidgetView, DELIVERY_NOTICE};
use deskline_core::types::{
    ChangeEvent, ConnectionState, ConversationId, ConversationStatus, DeliveryStatus, MessageRole,
    NewMessage,
};
use deskline_core::{DesklineError, EventChannel, MessageRecord};
use deskline_test_utils::{wait_until, TestHarness};

fn settled(view: &WidgetView, count: usize) -> bool {
    view.messages.len() == count
        && view.messages.iter().all(|m| m.send_state == SendState::Persisted)
        && !view.awaiting_ai
}

#[tokio::test(start_paused = true)]
async fn fresh_widget_shows_unpersisted_welcome() {
    let harness = TestHarness::builder().build().await.unwrap();
    let widget = harness.open_widget("bot-1").await.unwrap();

    let view = widget.view();
    assert_eq!(view.session, SessionState::Idle);
    assert_eq!(view.conversation_id, None);
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].role, MessageRole::Assistant);
    assert_eq!(view.messages[0].send_state, SendState::Synthetic);
    assert_eq!(
        view.messages[0].content,
        harness.runtime.config.widget.welcome_message
    );
    assert!(harness.store.list_conversations(None).await.unwrap().is_empty());

    widget.close().await;
}

#[tokio::test(start_paused = true)]
async fn first_send_creates_conversation_and_gets_ai_reply() {
    let harness = TestHarness::builder()
        .with_mock_responses(vec!["Hi! How can I help?".into()])
        .build()
        .await
        .unwrap();
    let widget = harness.open_widget("bot-1").await.unwrap();

    let receipt = widget.send("Hello", None).await.unwrap();
    assert!(widget.view().message(&receipt.local_id).is_some());
    let stored = receipt.persisted().await.unwrap();
    assert_eq!(stored.role, MessageRole::User);

    let mut rx = widget.watch();
    let view = wait_until(&mut rx, |v| settled(v, 3)).await;
    assert_eq!(view.session, SessionState::Active);
    assert_eq!(view.status, Some(ConversationStatus::AiHandling));
    assert_eq!(
        view.messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
        vec![
            harness.runtime.config.widget.welcome_message.as_str(),
            "Hello",
            "Hi! How can I help?",
        ]
    );

    // The welcome message is stored ahead of the first real message.
    let conv = view.conversation_id.clone().unwrap();
    let roles: Vec<MessageRole> = harness
        .store
        .get_messages(&conv)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.role)
        .collect();
    assert_eq!(
        roles,
        vec![MessageRole::Assistant, MessageRole::User, MessageRole::Assistant]
    );
    let cached = harness.cache.lookup("bot-1", None, Utc::now()).unwrap();
    assert_eq!(cached.conversation_id, conv);

    widget.close().await;
}

#[tokio::test(start_paused = true)]
async fn reopening_resumes_cached_conversation() {
    let harness = TestHarness::builder().build().await.unwrap();
    let widget = harness.open_widget("bot-1").await.unwrap();
    widget.send("Hello", None).await.unwrap().persisted().await.unwrap();
    let mut rx = widget.watch();
    let before = wait_until(&mut rx, |v| settled(v, 3)).await;
    widget.close().await;

    let widget = harness.open_widget("bot-1").await.unwrap();
    let view = widget.view();
    assert_eq!(view.session, SessionState::Active);
    assert_eq!(view.conversation_id, before.conversation_id);
    let ids: Vec<_> = view.messages.iter().map(|m| m.id.clone()).collect();
    let before_ids: Vec<_> = before.messages.iter().map(|m| m.id.clone()).collect();
    assert_eq!(ids, before_ids);
    assert!(view.messages.iter().all(|m| m.send_state == SendState::Persisted));

    widget.close().await;
}

#[tokio::test(start_paused = true)]
async fn cache_entry_older_than_a_week_starts_fresh() {
    let harness = TestHarness::builder().build().await.unwrap();
    let old = harness.create_conversation("bot-1").await.unwrap();
    harness
        .cache
        .remember("bot-1", None, &old.id, Utc::now() - chrono::Duration::days(8));

    let widget = harness.open_widget("bot-1").await.unwrap();
    assert_eq!(widget.view().conversation_id, None);
    assert!(harness.cache.lookup("bot-1", None, Utc::now()).is_none());
    widget.close().await;

    harness
        .cache
        .remember("bot-1", None, &old.id, Utc::now() - chrono::Duration::days(6));
    let widget = harness.open_widget("bot-1").await.unwrap();
    assert_eq!(widget.view().conversation_id, Some(old.id));
    widget.close().await;
}

#[tokio::test(start_paused = true)]
async fn vanished_conversation_starts_fresh_and_clears_cache() {
    let harness = TestHarness::builder().build().await.unwrap();
    let conv = harness.create_conversation("bot-1").await.unwrap();
    harness.cache.remember("bot-1", None, &conv.id, Utc::now());
    harness.memory().remove_conversation(&conv.id).await;

    let widget = harness.open_widget("bot-1").await.unwrap();
    let view = widget.view();
    assert_eq!(view.conversation_id, None);
    assert_eq!(view.messages.len(), 1);
    assert!(harness.cache.lookup("bot-1", None, Utc::now()).is_none());

    widget.close().await;
}

#[tokio::test(start_paused = true)]
async fn second_send_is_refused_while_ai_reply_is_outstanding() {
    let harness = TestHarness::builder()
        .with_reply_delay(Duration::from_secs(10))
        .build()
        .await
        .unwrap();
    let widget = harness.open_widget("bot-1").await.unwrap();

    widget.send("first", None).await.unwrap();
    assert!(widget.view().awaiting_ai);
    let err = widget.send("second", None).await.unwrap_err();
    assert!(matches!(err, DesklineError::SendBlocked { .. }));

    let mut rx = widget.watch();
    wait_until(&mut rx, |v| settled(v, 3)).await;
    widget.send("second", None).await.unwrap();

    widget.close().await;
}

#[tokio::test(start_paused = true)]
async fn empty_message_is_refused() {
    let harness = TestHarness::builder().build().await.unwrap();
    let widget = harness.open_widget("bot-1").await.unwrap();
    assert!(matches!(
        widget.send("   ", None).await,
        Err(DesklineError::SendBlocked { .. })
    ));
    assert!(harness.store.list_conversations(None).await.unwrap().is_empty());
    widget.close().await;
}

#[tokio::test(start_paused = true)]
async fn customer_can_write_while_awaiting_a_human() {
    let harness = TestHarness::builder().build().await.unwrap();
    let widget = harness.open_widget("bot-1").await.unwrap();
    let mut rx = widget.watch();

    widget.send("I need a human", None).await.unwrap();
    wait_until(&mut rx, |v| {
        v.status == Some(ConversationStatus::AwaitingHumanResponse) && !v.awaiting_ai
    })
    .await;

    widget.send("hello?", None).await.unwrap().persisted().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(harness.responder.call_count(), 0);
    assert!(!widget.view().awaiting_ai);

    widget.close().await;
}

#[tokio::test(start_paused = true)]
async fn failed_persist_is_marked_and_can_be_retried() {
    let harness = TestHarness::builder().build().await.unwrap();
    let widget = harness.open_widget("bot-1").await.unwrap();
    let mut rx = widget.watch();
    widget.send("Hello", None).await.unwrap();
    wait_until(&mut rx, |v| settled(v, 3)).await;

    harness.memory().fail_next_inserts(1);
    let receipt = widget.send("are you there?", None).await.unwrap();
    let local_id = receipt.local_id.clone();
    assert!(receipt.persisted().await.unwrap_err().is_retryable());
    let view = wait_until(&mut rx, |v| {
        v.message(&local_id).is_some_and(|m| m.send_state == SendState::Failed)
    })
    .await;
    assert!(!view.awaiting_ai);

    let retried = widget.retry_send(&local_id).await.unwrap();
    let stored = retried.persisted().await.unwrap();
    assert_eq!(stored.content, "are you there?");
    wait_until(&mut rx, |v| v.message(&stored.id).is_some() && v.message(&local_id).is_none())
        .await;

    widget.close().await;
}

#[tokio::test(start_paused = true)]
async fn widget_stays_responsive_while_conversation_is_created() {
    let harness = TestHarness::builder().build().await.unwrap();
    harness.memory().pause_creates();
    let widget = harness.open_widget("bot-1").await.unwrap();
    let mut rx = widget.watch();

    let receipt = widget.send("Hello", None).await.unwrap();
    harness.memory().wait_for_paused_creates(1).await;
    let view = widget.view();
    assert_eq!(view.conversation_id, None);
    assert!(view.awaiting_ai);
    assert_eq!(
        view.message(&receipt.local_id).map(|m| m.send_state),
        Some(SendState::Sending)
    );
    assert!(matches!(
        widget.send("again", None).await,
        Err(DesklineError::SendBlocked { .. })
    ));

    harness.memory().resume_creates();
    let stored = receipt.persisted().await.unwrap();
    assert_eq!(stored.content, "Hello");
    let view = wait_until(&mut rx, |v| settled(v, 3)).await;
    assert_eq!(view.conversation_id, Some(stored.conversation_id));

    widget.close().await;
}

#[tokio::test(start_paused = true)]
async fn failed_conversation_start_can_be_retried() {
    let harness = TestHarness::builder().build().await.unwrap();
    harness.memory().fail_next_creates(1);
    let widget = harness.open_widget("bot-1").await.unwrap();
    let mut rx = widget.watch();

    let receipt = widget.send("Hello", None).await.unwrap();
    let local_id = receipt.local_id.clone();
    assert!(receipt.persisted().await.unwrap_err().is_retryable());
    let view = wait_until(&mut rx, |v| {
        v.message(&local_id).is_some_and(|m| m.send_state == SendState::Failed)
    })
    .await;
    assert!(!view.awaiting_ai);
    assert_eq!(view.conversation_id, None);
    assert!(harness.store.list_conversations(None).await.unwrap().is_empty());

    let stored = widget.retry_send(&local_id).await.unwrap().persisted().await.unwrap();
    let view = wait_until(&mut rx, |v| settled(v, 3)).await;
    assert_eq!(view.conversation_id, Some(stored.conversation_id.clone()));
    let roles: Vec<MessageRole> = harness
        .store
        .get_messages(&stored.conversation_id)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.role)
        .collect();
    assert_eq!(
        roles,
        vec![MessageRole::Assistant, MessageRole::User, MessageRole::Assistant]
    );

    widget.close().await;
}

#[tokio::test(start_paused = true)]
async fn agent_message_is_confirmed_delivered() {
    let harness = TestHarness::builder().build().await.unwrap();
    let widget = harness.open_widget("bot-1").await.unwrap();
    let mut rx = widget.watch();
    widget.send("Hello", None).await.unwrap();
    let conv = wait_until(&mut rx, |v| settled(v, 3)).await.conversation_id.unwrap();

    let agent = harness
        .store
        .insert_message(NewMessage::text(conv, MessageRole::Agent, "Sam here"))
        .await
        .unwrap();
    wait_until(&mut rx, |v| {
        v.message(&agent.id)
            .is_some_and(|m| m.delivery_status == Some(DeliveryStatus::Delivered))
    })
    .await;
    assert_eq!(
        harness.store.get_message(&agent.id).await.unwrap().unwrap().delivery_status,
        Some(DeliveryStatus::Delivered)
    );

    widget.close().await;
}

#[tokio::test(start_paused = true)]
async fn exhausted_delivery_shows_notice_that_dismisses_itself() {
    let harness = TestHarness::builder().build().await.unwrap();
    let widget = harness.open_widget("bot-1").await.unwrap();
    let mut rx = widget.watch();
    widget.send("Hello", None).await.unwrap();
    let conv = wait_until(&mut rx, |v| settled(v, 3)).await.conversation_id.unwrap();

    harness.memory().fail_next_delivery_writes(4);
    let agent = harness
        .store
        .insert_message(NewMessage::text(conv, MessageRole::Agent, "Sam here"))
        .await
        .unwrap();

    let view = wait_until(&mut rx, |v| v.notice.is_some()).await;
    assert_eq!(view.notice.as_deref(), Some(DELIVERY_NOTICE));
    wait_until(&mut rx, |v| {
        v.message(&agent.id)
            .is_some_and(|m| m.delivery_status == Some(DeliveryStatus::Failed))
    })
    .await;
    wait_until(&mut rx, |v| v.notice.is_none()).await;

    widget.close().await;
}

#[tokio::test(start_paused = true)]
async fn duplicate_notifications_yield_one_entry() {
    let harness = TestHarness::builder().build().await.unwrap();
    let widget = harness.open_widget("bot-1").await.unwrap();
    let mut rx = widget.watch();
    widget.send("Hello", None).await.unwrap();
    let view = wait_until(&mut rx, |v| settled(v, 3)).await;
    let conv = view.conversation_id.clone().unwrap();

    let user = harness
        .store
        .get_messages(&conv)
        .await
        .unwrap()
        .into_iter()
        .find(|m| m.role == MessageRole::User)
        .unwrap();
    for _ in 0..2 {
        harness
            .channel
            .publish(ChangeEvent::MessageInserted {
                record: MessageRecord::from(&user),
            })
            .await
            .unwrap();
    }
    let marker = harness
        .store
        .insert_message(NewMessage::text(conv, MessageRole::Agent, "marker"))
        .await
        .unwrap();

    let view = wait_until(&mut rx, |v| v.message(&marker.id).is_some()).await;
    assert_eq!(view.messages.iter().filter(|m| m.id == user.id).count(), 1);
    assert_eq!(view.messages.len(), 4);

    widget.close().await;
}

#[tokio::test(start_paused = true)]
async fn start_new_forgets_the_conversation() {
    let harness = TestHarness::builder().build().await.unwrap();
    let widget = harness.open_widget("bot-1").await.unwrap();
    let mut rx = widget.watch();
    widget.send("Hello", None).await.unwrap();
    let first = wait_until(&mut rx, |v| settled(v, 3)).await.conversation_id.unwrap();

    widget.start_new().await.unwrap();
    let view = widget.view();
    assert_eq!(view.session, SessionState::Idle);
    assert_eq!(view.conversation_id, None);
    assert_eq!(view.status, None);
    assert_eq!(view.connection.state, ConnectionState::Closed);
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].send_state, SendState::Synthetic);
    assert!(harness.cache.lookup("bot-1", None, Utc::now()).is_none());
    assert_eq!(harness.channel.subscriber_count(&first), 0);

    widget.send("Hello again", None).await.unwrap();
    let second = wait_until(&mut rx, |v| settled(v, 3)).await.conversation_id.unwrap();
    assert_ne!(first, second);

    widget.close().await;
}

#[tokio::test(start_paused = true)]
async fn start_new_discards_an_outstanding_ai_reply() {
    let harness = TestHarness::builder()
        .with_reply_delay(Duration::from_secs(10))
        .build()
        .await
        .unwrap();
    let widget = harness.open_widget("bot-1").await.unwrap();
    widget.send("Hello", None).await.unwrap().persisted().await.unwrap();
    assert!(widget.view().awaiting_ai);

    widget.start_new().await.unwrap();
    assert!(!widget.view().awaiting_ai);
    tokio::time::sleep(Duration::from_secs(30)).await;

    let view = widget.view();
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].send_state, SendState::Synthetic);

    widget.close().await;
}

#[tokio::test(start_paused = true)]
async fn writing_after_resolution_starts_a_new_conversation() {
    let harness = TestHarness::builder().build().await.unwrap();
    let widget = harness.open_widget("bot-1").await.unwrap();
    let mut rx = widget.watch();
    widget.send("Hello", None).await.unwrap();
    let first = wait_until(&mut rx, |v| settled(v, 3)).await.conversation_id.unwrap();

    let desk = harness.open_help_desk(&first, "agent-1").await.unwrap();
    desk.resolve().await.unwrap();
    wait_until(&mut rx, |v| v.status == Some(ConversationStatus::Resolved)).await;

    widget.send("one more thing", None).await.unwrap();
    let view = wait_until(&mut rx, |v| {
        v.conversation_id.as_ref().is_some_and(|c| c != &first) && settled(v, 2)
    })
    .await;
    assert_eq!(view.status, Some(ConversationStatus::AiHandling));
    assert_eq!(view.messages[0].content, "one more thing");

    desk.close().await;
    widget.close().await;
}

#[tokio::test(start_paused = true)]
async fn close_unsubscribes() {
    let harness = TestHarness::builder().build().await.unwrap();
    let widget = harness.open_widget("bot-1").await.unwrap();
    let mut rx = widget.watch();
    widget.send("Hello", None).await.unwrap();
    let view = wait_until(&mut rx, |v| v.connection.state == ConnectionState::Subscribed).await;
    let conv: ConversationId = view.conversation_id.unwrap();
    assert_eq!(harness.channel.subscriber_count(&conv), 1);

    widget.close().await;
    assert_eq!(harness.channel.subscriber_count(&conv), 0);
    assert_eq!(rx.borrow().session, SessionState::Closed);
}
