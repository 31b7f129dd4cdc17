// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic exponential backoff.

use std::time::Duration;

/// Shift cap; keeps `base * 2^n` from overflowing for any configured base.
const MAX_SHIFT: u32 = 16;

/// Retry schedule of `base * 2^retry` for `retry` in `0..max_retries`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base: Duration,
    max_retries: u32,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max_retries: u32) -> Self {
        Self { base, max_retries }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base.saturating_mul(1_u32 << retry.min(MAX_SHIFT))
    }

    /// Whether another retry is allowed after `retries_done` retries.
    pub fn allows(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }

    /// The full schedule, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|retry| self.delay_for(retry))
    }
}
