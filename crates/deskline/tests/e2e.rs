// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end hand-off scenarios.
//!
//! Each test creates an isolated TestHarness. Scenarios A and B run on a temp
//! SQLite database; scenario C runs on the in-memory store with a paused
//! clock so the reconnect timing can be checked exactly.

use std::time::Duration;

use deskline_agent::{SendState, WidgetView};
use deskline_core::types::{
    ConnectionState, ConversationStatus, DeliveryStatus, MessageRole, NewMessage,
};
use deskline_test_utils::{wait_until, TestHarness};
use tokio::time::Instant;

fn settled(view: &WidgetView) -> bool {
    !view.awaiting_ai
        && view
            .messages
            .iter()
            .all(|m| m.send_state == SendState::Persisted)
}

// ---- Scenario A: customer and assistant ----

#[tokio::test]
async fn scenario_a_new_customer_gets_an_ai_reply_visible_everywhere() {
    let harness = TestHarness::builder()
        .with_sqlite()
        .with_mock_responses(vec!["Hi! What can I do for you?".to_string()])
        .build()
        .await
        .unwrap();
    let widget = harness.open_widget("bot-1").await.unwrap();
    let mut widget_rx = widget.watch();

    widget.send("Hello", None).await.unwrap().persisted().await.unwrap();
    let conv = widget.view().conversation_id.unwrap();
    let stored = harness.store.get_conversation(&conv).await.unwrap().unwrap();
    assert_eq!(stored.status, ConversationStatus::AiHandling);

    let desk = harness.open_help_desk(&conv, "agent-1").await.unwrap();
    let mut desk_rx = desk.watch();

    let view = wait_until(&mut widget_rx, |v| {
        settled(v) && v.contents(MessageRole::Assistant).contains(&"Hi! What can I do for you?")
    })
    .await;
    assert_eq!(view.contents(MessageRole::User), vec!["Hello"]);

    let desk_view = wait_until(&mut desk_rx, |v| {
        v.messages
            .iter()
            .any(|m| m.content == "Hi! What can I do for you?")
    })
    .await;
    assert!(desk_view.messages.iter().any(|m| m.content == "Hello"));

    let persisted = harness.store.get_messages(&conv).await.unwrap();
    assert_eq!(persisted.len(), 3, "welcome, customer message, reply");

    desk.close().await;
    widget.close().await;
    harness.runtime.shutdown().await.unwrap();
}

// ---- Scenario B: agent take-over ----

#[tokio::test]
async fn scenario_b_take_over_then_agent_reply_is_delivered() {
    let harness = TestHarness::builder().with_sqlite().build().await.unwrap();
    let widget = harness.open_widget("bot-1").await.unwrap();
    let mut widget_rx = widget.watch();

    widget.send("Hello", None).await.unwrap();
    let conv = wait_until(&mut widget_rx, |v| settled(v) && v.messages.len() == 3)
        .await
        .conversation_id
        .unwrap();
    assert_eq!(harness.responder.call_count(), 1);

    let desk = harness.open_help_desk(&conv, "agent-1").await.unwrap();
    let mut desk_rx = desk.watch();
    desk.take_over().await.unwrap();
    assert_eq!(
        harness.store.get_conversation_status(&conv).await.unwrap(),
        ConversationStatus::AwaitingHumanResponse
    );
    wait_until(&mut widget_rx, |v| {
        v.status == Some(ConversationStatus::AwaitingHumanResponse)
    })
    .await;

    widget
        .send("Can I talk to you?", None)
        .await
        .unwrap()
        .persisted()
        .await
        .unwrap();
    wait_until(&mut widget_rx, settled).await;
    assert_eq!(harness.responder.call_count(), 1, "no AI reply after take-over");

    let reply = desk
        .send("Of course, I'm here.")
        .await
        .unwrap()
        .persisted()
        .await
        .unwrap();
    wait_until(&mut widget_rx, |v| v.message(&reply.id).is_some()).await;
    wait_until(&mut desk_rx, |v| {
        v.message(&reply.id)
            .is_some_and(|m| m.delivery_status == Some(DeliveryStatus::Delivered))
    })
    .await;

    let stored = harness.store.get_message(&reply.id).await.unwrap().unwrap();
    assert_eq!(stored.delivery_status, Some(DeliveryStatus::Delivered));

    desk.close().await;
    widget.close().await;
    harness.runtime.shutdown().await.unwrap();
}

// ---- Scenario C: reconnect and reconcile ----

#[tokio::test(start_paused = true)]
async fn scenario_c_missed_messages_are_reconciled_after_reconnect() {
    let harness = TestHarness::builder().build().await.unwrap();
    let widget = harness.open_widget("bot-1").await.unwrap();
    let mut widget_rx = widget.watch();

    widget.send("Hello", None).await.unwrap();
    let conv = wait_until(&mut widget_rx, |v| {
        settled(v) && v.messages.len() == 3 && v.connection.state == ConnectionState::Subscribed
    })
    .await
    .conversation_id
    .unwrap();
    let desk = harness.open_help_desk(&conv, "agent-1").await.unwrap();
    desk.take_over().await.unwrap();

    harness.channel.drop_connections(&conv, "simulated network error");
    let view = wait_until(&mut widget_rx, |v| v.connection.state == ConnectionState::Error).await;
    assert!(view.connection.is_degraded());
    let lost_at = Instant::now();

    let missed = harness
        .store
        .insert_message(NewMessage::text(conv.clone(), MessageRole::Agent, "Are you still there?"))
        .await
        .unwrap();

    wait_until(&mut widget_rx, |v| v.connection.state == ConnectionState::Subscribed).await;
    assert!(lost_at.elapsed() <= Duration::from_secs(5));

    let view = wait_until(&mut widget_rx, |v| {
        v.message(&missed.id)
            .is_some_and(|m| m.delivery_status == Some(DeliveryStatus::Delivered))
    })
    .await;
    assert_eq!(view.contents(MessageRole::Agent), vec!["Are you still there?"]);

    desk.close().await;
    widget.close().await;
}
