// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resilience primitives for the deskline hand-off runtime.
//!
//! Every timer in the runtime (delivery retries, reconnect delays, health
//! checks, notice dismissal) is spawned through a [`Scheduler`] so that a
//! session teardown or a conversation switch cancels all of them at once.

pub mod backoff;
pub mod scheduler;

pub use backoff::ExponentialBackoff;
pub use scheduler::{Scheduler, TaskHandle};
