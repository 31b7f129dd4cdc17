// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `deskline demo` command implementation.
//!
//! Wires a real runtime (SQLite behind a change feed, the in-process event
//! channel, and a scripted responder) and walks a widget and a help desk
//! through the basic hand-off scenarios:
//!
//! - A: a customer talks to the assistant and an agent reads along;
//! - B: the agent takes over, the customer keeps writing without AI replies,
//!   and the agent's reply is confirmed delivered by the widget.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::ValueEnum;
use deskline_agent::{
    ConversationCache, HelpDeskSession, Runtime, ViewEntry, WidgetOptions, WidgetSession,
};
use deskline_bus::{ChangeFeedStore, InProcessChannel};
use deskline_config::DesklineConfig;
use deskline_core::types::{
    AdapterType, ConversationId, ConversationStatus, DeliveryStatus, HealthStatus, MessageRole,
};
use deskline_core::{
    AiReply, AutoResponder, ConversationStore, DesklineError, PluginAdapter, ResponderRequest,
};
use deskline_storage::SqliteStore;
use tokio::sync::watch;
use tracing::info;

/// How long the demo waits for any single step to settle.
const STEP_TIMEOUT: Duration = Duration::from_secs(15);

/// Which scenarios `deskline demo` runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Customer and assistant, agent watching.
    A,
    /// Agent take-over and delivery confirmation.
    B,
    All,
}

impl Scenario {
    fn includes(self, other: Scenario) -> bool {
        self == Scenario::All || self == other
    }
}

/// Replies by restating what the customer wrote.
struct ScriptedResponder;

#[async_trait]
impl PluginAdapter for ScriptedResponder {
    fn name(&self) -> &str {
        "scripted-responder"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Responder
    }

    async fn health_check(&self) -> Result<HealthStatus, DesklineError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), DesklineError> {
        Ok(())
    }
}

#[async_trait]
impl AutoResponder for ScriptedResponder {
    async fn respond(&self, request: ResponderRequest) -> Result<AiReply, DesklineError> {
        Ok(AiReply::text(format!(
            "Thanks for reaching out! You said: \"{}\"",
            request.latest
        )))
    }
}

/// Run the `deskline demo` command.
pub async fn run_demo(
    mut config: DesklineConfig,
    scenario: Scenario,
    database: Option<PathBuf>,
    plain: bool,
) -> Result<(), DesklineError> {
    let scratch = tempfile::TempDir::new().map_err(DesklineError::storage)?;
    let path = database.unwrap_or_else(|| scratch.path().join("demo.db"));
    config.storage.database_path = path.to_string_lossy().to_string();
    info!(database = %config.storage.database_path, "starting demo");

    let sqlite = SqliteStore::new(config.storage.clone());
    sqlite.initialize().await?;
    let channel = Arc::new(InProcessChannel::with_buffer(config.connection.event_buffer));
    let store: Arc<dyn ConversationStore> =
        Arc::new(ChangeFeedStore::new(Arc::new(sqlite), channel.clone()));
    let runtime = Runtime::new(store, channel, Arc::new(ScriptedResponder), config);
    let cache = ConversationCache::in_memory(&runtime.config.widget);
    let printer = Printer {
        color: !plain && std::io::stdout().is_terminal(),
    };

    let result = async {
        if scenario.includes(Scenario::A) {
            assistant_handles_customer(&runtime, &cache, &printer).await?;
        }
        if scenario.includes(Scenario::B) {
            agent_takes_over(&runtime, &cache, &printer).await?;
        }
        Ok(())
    }
    .await;

    runtime.shutdown().await?;
    result
}

async fn assistant_handles_customer(
    runtime: &Runtime,
    cache: &ConversationCache,
    printer: &Printer,
) -> Result<(), DesklineError> {
    printer.heading("Scenario A: the assistant answers a customer");
    let widget = WidgetSession::open(runtime, cache.clone(), WidgetOptions::new("demo-a")).await?;
    let mut widget_rx = widget.watch();

    widget.send("Hello", None).await?.persisted().await?;
    let view = wait_for(&mut widget_rx, |v| {
        !v.awaiting_ai && v.contents(MessageRole::Assistant).len() >= 2
    })
    .await?;
    let conversation_id = current_conversation(view.conversation_id)?;
    printer.transcript("widget", &view.messages);

    let desk = HelpDeskSession::open(runtime, &conversation_id, "demo-agent").await?;
    printer.transcript("help desk", &desk.view().messages);
    info!(conversation_id = %conversation_id, status = %desk.view().status(), "scenario A done");

    desk.close().await;
    widget.close().await;
    Ok(())
}

async fn agent_takes_over(
    runtime: &Runtime,
    cache: &ConversationCache,
    printer: &Printer,
) -> Result<(), DesklineError> {
    printer.heading("Scenario B: an agent takes over");
    let widget = WidgetSession::open(runtime, cache.clone(), WidgetOptions::new("demo-b")).await?;
    let mut widget_rx = widget.watch();

    widget.send("Hello", None).await?.persisted().await?;
    let view = wait_for(&mut widget_rx, |v| !v.awaiting_ai).await?;
    let conversation_id = current_conversation(view.conversation_id)?;

    let desk = HelpDeskSession::open(runtime, &conversation_id, "demo-agent").await?;
    let mut desk_rx = desk.watch();
    desk.take_over().await?;
    wait_for(&mut widget_rx, |v| {
        v.status == Some(ConversationStatus::AwaitingHumanResponse)
    })
    .await?;

    widget
        .send("Is someone there?", None)
        .await?
        .persisted()
        .await?;
    let reply = desk
        .send("Hi, this is Sam from support.")
        .await?
        .persisted()
        .await?;
    let view = wait_for(&mut desk_rx, |v| {
        v.message(&reply.id)
            .is_some_and(|m| m.delivery_status == Some(DeliveryStatus::Delivered))
    })
    .await?;
    printer.transcript("help desk", &view.messages);
    info!(
        conversation_id = %conversation_id,
        message_id = %reply.id,
        "scenario B done, agent reply delivered"
    );

    desk.close().await;
    widget.close().await;
    Ok(())
}

fn current_conversation(id: Option<ConversationId>) -> Result<ConversationId, DesklineError> {
    id.ok_or_else(|| DesklineError::Internal("widget has no conversation".into()))
}

async fn wait_for<T, F>(rx: &mut watch::Receiver<T>, pred: F) -> Result<T, DesklineError>
where
    T: Clone,
    F: FnMut(&T) -> bool,
{
    match tokio::time::timeout(STEP_TIMEOUT, rx.wait_for(pred)).await {
        Ok(Ok(value)) => Ok(value.clone()),
        Ok(Err(_)) => Err(DesklineError::Cancelled),
        Err(_) => Err(DesklineError::Timeout {
            duration: STEP_TIMEOUT,
        }),
    }
}

struct Printer {
    color: bool,
}

impl Printer {
    fn heading(&self, text: &str) {
        println!();
        if self.color {
            use colored::Colorize;
            println!("  {}", text.bold());
        } else {
            println!("  {text}");
        }
        println!("  {}", "-".repeat(50));
    }

    fn transcript(&self, who: &str, messages: &[ViewEntry]) {
        println!("  [{who}]");
        for message in messages {
            let delivery = message
                .delivery_status
                .map(|s| format!(" ({s})"))
                .unwrap_or_default();
            let role = format!("{:<9}", message.role.to_string());
            if self.color {
                use colored::Colorize;
                println!("    {} {}{}", role.cyan(), message.content, delivery.dimmed());
            } else {
                println!("    {role} {}{delivery}", message.content);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_includes_every_scenario() {
        assert!(Scenario::All.includes(Scenario::A));
        assert!(Scenario::All.includes(Scenario::B));
        assert!(Scenario::A.includes(Scenario::A));
        assert!(!Scenario::A.includes(Scenario::B));
    }

    #[tokio::test]
    async fn demo_runs_both_scenarios_on_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let database = dir.path().join("demo.db");
        run_demo(
            DesklineConfig::default(),
            Scenario::All,
            Some(database.clone()),
            true,
        )
        .await
        .unwrap();
        assert!(database.exists());
    }
}
