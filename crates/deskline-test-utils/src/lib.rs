// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for deskline integration tests.
//!
//! Provides mock adapters and test harness infrastructure for fast,
//! deterministic, CI-runnable tests without external services.
//!
//! # Components
//!
//! - [`MemoryStore`] - In-memory store with fault injection and write gates
//! - [`FaultyChannel`] - Event channel whose transport can be broken on demand
//! - [`MockResponder`] - AI responder with pre-configured replies
//! - [`TestHarness`] - A full runtime wired from the above

pub mod faulty_channel;
pub mod harness;
pub mod memory_store;
pub mod mock_responder;

pub use faulty_channel::FaultyChannel;
pub use harness::{wait_until, TestHarness, WAIT_LIMIT};
pub use memory_store::MemoryStore;
pub use mock_responder::MockResponder;
