// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter trait definitions for the external collaborators.
//!
//! All adapters extend the [`PluginAdapter`] base trait and use
//! `#[async_trait]` for dynamic dispatch compatibility.

pub mod adapter;
pub mod channel;
pub mod responder;
pub mod store;

pub use adapter::PluginAdapter;
pub use channel::{EventChannel, Subscription};
pub use responder::{AiReply, AutoResponder, ResponderRequest};
pub use store::ConversationStore;
