// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event channel plumbing for the deskline hand-off runtime.
//!
//! [`InProcessChannel`] is a publish/subscribe transport keyed by conversation
//! id. [`ChangeFeedStore`] wraps any durable store and publishes a row-level
//! change notification after every successful write, so sessions only ever
//! learn about changes through the channel.

pub mod channel;
pub mod feed;

pub use channel::InProcessChannel;
pub use feed::ChangeFeedStore;
