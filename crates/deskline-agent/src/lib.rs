// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hand-off runtime for the deskline support chat.
//!
//! The [`Runtime`] bundles the durable store, the event channel, and the AI
//! responder with the validated configuration. Sessions are opened against it:
//! - [`WidgetSession`] for the customer-facing widget
//! - [`HelpDeskSession`] for a human agent following one conversation
//!
//! Both share the [`StatusMachine`], the [`ConnectionMonitor`], and the
//! message log. Only the widget confirms delivery of agent messages, through
//! a [`DeliveryCoordinator`].

pub mod cache;
pub mod delivery;
pub mod health;
pub mod helpdesk;
pub mod responder;
pub mod session;
pub mod status;
pub mod view;
pub mod widget;

use std::sync::Arc;

use deskline_config::DesklineConfig;
use deskline_core::{AutoResponder, ConversationStore, DesklineError, EventChannel};
use deskline_resilience::{ExponentialBackoff, Scheduler};
use tracing::{info, warn};

pub use cache::{CacheBackend, CacheEntry, ConversationCache, FileCacheBackend, MemoryCacheBackend};
pub use delivery::{DeliveryCoordinator, RecoverySink};
pub use health::{ConnectionMonitor, ConnectionSnapshot, MonitorEvent, MonitorHandle};
pub use helpdesk::{DeskView, HelpDeskSession};
pub use responder::{requests_human, AiGate, GateOutcome};
pub use session::{SendReceipt, SessionState};
pub use status::{transition_target, StatusMachine, Transition, Trigger};
pub use view::{MessageLog, SendState, ViewEntry};
pub use widget::{WidgetOptions, WidgetSession, WidgetView, DELIVERY_NOTICE};

/// Shared collaborators and configuration for every session.
///
/// Cheap to clone. Every background task of every session lives under
/// [`Runtime::scheduler`], so [`Runtime::shutdown`] stops them all.
#[derive(Clone)]
pub struct Runtime {
    pub store: Arc<dyn ConversationStore>,
    pub channel: Arc<dyn EventChannel>,
    pub responder: Arc<dyn AutoResponder>,
    pub config: Arc<DesklineConfig>,
    pub scheduler: Scheduler,
}

impl Runtime {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        channel: Arc<dyn EventChannel>,
        responder: Arc<dyn AutoResponder>,
        config: DesklineConfig,
    ) -> Self {
        Self {
            store,
            channel,
            responder,
            config: Arc::new(config),
            scheduler: Scheduler::new(),
        }
    }

    pub fn status_machine(&self) -> StatusMachine {
        StatusMachine::new(self.store.clone(), self.config.status.clone())
    }

    pub fn ai_gate(&self) -> AiGate {
        AiGate::new(
            self.store.clone(),
            self.responder.clone(),
            self.status_machine(),
        )
    }

    /// Retry schedule for delivery confirmations.
    pub fn delivery_backoff(&self) -> ExponentialBackoff {
        let delivery = &self.config.delivery;
        ExponentialBackoff::new(delivery.base_delay(), delivery.max_retries)
    }

    /// Stops every session task, then shuts the adapters down.
    pub async fn shutdown(&self) -> Result<(), DesklineError> {
        self.scheduler.shutdown().await;
        if let Err(e) = self.responder.shutdown().await {
            warn!(error = %e, "responder shutdown failed");
        }
        if let Err(e) = self.channel.shutdown().await {
            warn!(error = %e, "event channel shutdown failed");
        }
        self.store.shutdown().await?;
        info!("runtime shut down");
        Ok(())
    }
}
