// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the deskline hand-off runtime.

use thiserror::Error;

use crate::types::ConversationStatus;

/// The primary error type used across all deskline adapter traits and core operations.
#[derive(Debug, Error)]
pub enum DesklineError {
    /// Configuration errors (invalid values, missing required fields).
    #[error("configuration error: {0}")]
    Config(String),

    /// Durable store errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Event channel errors (subscribe failure, dropped transport).
    #[error("channel error: {message}")]
    Channel {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A conversation or message does not exist in the durable store.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A status transition that is not in the transition table.
    #[error("transition `{trigger}` is not allowed from {from}")]
    InvalidTransition {
        from: ConversationStatus,
        trigger: String,
    },

    /// A guarded status write found a different status than expected.
    #[error("status changed concurrently: expected {expected}, found {actual}")]
    Conflict {
        expected: ConversationStatus,
        actual: ConversationStatus,
    },

    /// A send was refused by the session (e.g. an AI response is outstanding).
    #[error("send blocked: {reason}")]
    SendBlocked { reason: String },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// The operation was cancelled by a teardown or a conversation switch.
    #[error("operation cancelled")]
    Cancelled,

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DesklineError {
    /// Wraps any error as a storage error.
    pub fn storage(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Storage {
            source: source.into(),
        }
    }

    /// Builds a channel error without an underlying source.
    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel {
            message: message.into(),
            source: None,
        }
    }

    /// Whether the caller may reasonably re-attempt the operation.
    ///
    /// Transient transport and persistence failures are retryable; rejected
    /// transitions, missing records and cancellations are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. } | Self::Channel { .. } | Self::Timeout { .. } | Self::Conflict { .. }
        )
    }
}
