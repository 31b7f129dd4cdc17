// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as score ranges, non-zero intervals, and non-empty paths.

use crate::diagnostic::ConfigError;
use crate::model::DesklineConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Collects every violation instead of failing on the first one.
pub fn validate_config(config: &DesklineConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    if !LOG_LEVELS.contains(&config.app.log_level.as_str()) {
        fail(format!(
            "app.log_level `{}` is not one of {}",
            config.app.log_level,
            LOG_LEVELS.join(", ")
        ));
    }

    if config.storage.database_path.trim().is_empty() {
        fail("storage.database_path must not be empty".to_string());
    }

    let threshold = config.status.escalation_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        fail(format!(
            "status.escalation_threshold must be within 0.0..=1.0, got {threshold}"
        ));
    }

    for (i, keyword) in config.status.escalation_keywords.iter().enumerate() {
        if keyword.trim().is_empty() {
            fail(format!("status.escalation_keywords[{i}] must not be empty"));
        }
    }

    if config.delivery.base_delay_ms == 0 {
        fail("delivery.base_delay_ms must be greater than 0".to_string());
    }

    // 2^max_retries multiplies the base delay.
    if config.delivery.max_retries > 16 {
        fail(format!(
            "delivery.max_retries must be at most 16, got {}",
            config.delivery.max_retries
        ));
    }

    if config.connection.reconnect_delay_secs == 0 {
        fail("connection.reconnect_delay_secs must be greater than 0".to_string());
    }

    if config.connection.health_check_interval_secs == 0 {
        fail("connection.health_check_interval_secs must be greater than 0".to_string());
    }

    if config.connection.subscribe_timeout_secs == 0 {
        fail("connection.subscribe_timeout_secs must be greater than 0".to_string());
    }

    if config.connection.event_buffer == 0 {
        fail("connection.event_buffer must be greater than 0".to_string());
    }

    if config.widget.cache_ttl_days == 0 {
        fail("widget.cache_ttl_days must be greater than 0".to_string());
    }

    if config.widget.cache_dir.trim().is_empty() {
        fail("widget.cache_dir must not be empty".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
