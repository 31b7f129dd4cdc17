// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./deskline.toml` > `~/.config/deskline/deskline.toml` >
//! `/etc/deskline/deskline.toml` with environment variable overrides via the
//! `DESKLINE_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::DesklineConfig;

pub(crate) const SYSTEM_CONFIG: &str = "/etc/deskline/deskline.toml";
pub(crate) const LOCAL_CONFIG: &str = "deskline.toml";

/// Top-level sections that environment variables may address.
const SECTIONS: &[&str] = &["app", "storage", "status", "delivery", "connection", "widget"];

pub(crate) fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("deskline/deskline.toml"))
}

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/deskline/deskline.toml` (system-wide)
/// 3. `~/.config/deskline/deskline.toml` (user XDG config)
/// 4. `./deskline.toml` (local directory)
/// 5. `DESKLINE_*` environment variables
pub fn load_config() -> Result<DesklineConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<DesklineConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(DesklineConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<DesklineConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(DesklineConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used internally for config loading.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(DesklineConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG))
        .merge(Toml::file(user_config_path().unwrap_or_default()))
        .merge(Toml::file(LOCAL_CONFIG))
        .merge(env_provider())
}

/// Maps a prefix-stripped, lowercased env key onto a dotted config path.
///
/// Only the first underscore after a known section name becomes a dot, so
/// `DESKLINE_CONNECTION_RECONNECT_DELAY_SECS` maps to
/// `connection.reconnect_delay_secs`. Keys outside a known section are
/// passed through unchanged and rejected by `deny_unknown_fields`.
pub fn map_env_key(key: &str) -> String {
    for section in SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('_'))
        {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}

fn env_provider() -> Env {
    Env::prefixed("DESKLINE_").map(|key| map_env_key(key.as_str()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_split_on_section_only() {
        assert_eq!(
            map_env_key("connection_reconnect_delay_secs"),
            "connection.reconnect_delay_secs"
        );
        assert_eq!(
            map_env_key("status_escalation_threshold"),
            "status.escalation_threshold"
        );
        assert_eq!(map_env_key("storage_wal_mode"), "storage.wal_mode");
        assert_eq!(map_env_key("unknown_key"), "unknown_key");
    }

    #[test]
    fn figment_jail_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("DESKLINE_DELIVERY_MAX_RETRIES", "5");
            jail.set_env("DESKLINE_WIDGET_CACHE_TTL_DAYS", "2");
            jail.create_file("deskline.toml", "[delivery]\nbase_delay_ms = 250\n")?;

            let config = load_config_from_path(Path::new("deskline.toml"))?;
            assert_eq!(config.delivery.max_retries, 5);
            assert_eq!(config.delivery.base_delay_ms, 250);
            assert_eq!(config.widget.cache_ttl_days, 2);
            Ok(())
        });
    }
}
