// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the deskline hand-off runtime.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level deskline configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DesklineConfig {
    /// Process identity and logging.
    #[serde(default)]
    pub app: AppConfig,

    /// Durable store settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Conversation status machine settings.
    #[serde(default)]
    pub status: StatusConfig,

    /// Delivery confirmation retry settings.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Realtime connection health settings.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Customer widget settings.
    #[serde(default)]
    pub widget: WidgetConfig,
}

/// Process identity and logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Display name used in logs.
    #[serde(default = "default_app_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_app_name() -> String {
    "deskline".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("deskline").join("deskline.db"))
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "deskline.db".to_string())
}

fn default_wal_mode() -> bool {
    true
}

/// Conversation status machine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StatusConfig {
    /// Escalation-risk score above which a conversation is handed to a human.
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: f32,

    /// Refuse status writes whose expected current status is stale.
    /// When off, concurrent transitions resolve as last-write-wins.
    #[serde(default = "default_guard_concurrent_writes")]
    pub guard_concurrent_writes: bool,

    /// System message posted when an agent takes over.
    #[serde(default = "default_takeover_notice")]
    pub takeover_notice: String,

    /// System message posted when the risk score or the customer escalates.
    #[serde(default = "default_escalation_notice")]
    pub escalation_notice: String,

    /// System message posted when the conversation goes back to the assistant.
    #[serde(default = "default_return_notice")]
    pub return_notice: String,

    /// Phrases that count as an explicit customer request for a human.
    #[serde(default = "default_escalation_keywords")]
    pub escalation_keywords: Vec<String>,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: default_escalation_threshold(),
            guard_concurrent_writes: default_guard_concurrent_writes(),
            takeover_notice: default_takeover_notice(),
            escalation_notice: default_escalation_notice(),
            return_notice: default_return_notice(),
            escalation_keywords: default_escalation_keywords(),
        }
    }
}

fn default_escalation_threshold() -> f32 {
    0.7
}

fn default_guard_concurrent_writes() -> bool {
    true
}

fn default_takeover_notice() -> String {
    "An agent has joined the conversation.".to_string()
}

fn default_escalation_notice() -> String {
    "We're connecting you with a member of our team.".to_string()
}

fn default_return_notice() -> String {
    "You're chatting with our AI assistant again.".to_string()
}

fn default_escalation_keywords() -> Vec<String> {
    [
        "human",
        "real person",
        "representative",
        "live agent",
        "talk to agent",
        "speak to agent",
        "speak with agent",
        "talk to someone",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Delivery confirmation retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DeliveryConfig {
    /// Retries after the first failed confirmation.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubles for every further retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl DeliveryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

/// Realtime connection health configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Fixed wait before re-subscribing after an error.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Interval of the liveness check while a conversation is open.
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// Upper bound on a single subscribe attempt.
    #[serde(default = "default_subscribe_timeout_secs")]
    pub subscribe_timeout_secs: u64,

    /// Buffered events per subscription before the sender waits.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl ConnectionConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_secs(self.subscribe_timeout_secs)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: default_reconnect_delay_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
            subscribe_timeout_secs: default_subscribe_timeout_secs(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_subscribe_timeout_secs() -> u64 {
    10
}

fn default_event_buffer() -> usize {
    256
}

/// Customer widget configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WidgetConfig {
    /// Age after which a cached conversation handle is ignored.
    #[serde(default = "default_cache_ttl_days")]
    pub cache_ttl_days: u32,

    /// Directory of the client-persisted conversation cache.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Greeting shown before the customer's first message.
    #[serde(default = "default_welcome_message")]
    pub welcome_message: String,

    /// How long the "may not have been delivered" notice stays visible.
    #[serde(default = "default_notice_ttl_secs")]
    pub notice_ttl_secs: u64,
}

impl WidgetConfig {
    pub fn notice_ttl(&self) -> Duration {
        Duration::from_secs(self.notice_ttl_secs)
    }
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            cache_ttl_days: default_cache_ttl_days(),
            cache_dir: default_cache_dir(),
            welcome_message: default_welcome_message(),
            notice_ttl_secs: default_notice_ttl_secs(),
        }
    }
}

fn default_cache_ttl_days() -> u32 {
    7
}

fn default_cache_dir() -> String {
    dirs::data_dir()
        .map(|p| p.join("deskline").join("widget-cache"))
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "widget-cache".to_string())
}

fn default_welcome_message() -> String {
    "Hi there! How can we help you today?".to_string()
}

fn default_notice_ttl_secs() -> u64 {
    5
}
