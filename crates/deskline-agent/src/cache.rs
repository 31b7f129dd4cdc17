// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client-persisted conversation handle for the widget.
//!
//! One entry per (chatbot, customer) pair remembers which conversation the
//! widget was last in. Entries older than the configured TTL are ignored and
//! removed on lookup. Time is passed in explicitly so expiry is testable.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use deskline_config::WidgetConfig;
use deskline_core::types::ConversationId;
use deskline_core::DesklineError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Key prefix shared by every cache entry.
pub const KEY_PREFIX: &str = "deskline:conversation";

/// A remembered conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub conversation_id: ConversationId,
    pub created_at: DateTime<Utc>,
}

/// Where cache entries live.
pub trait CacheBackend: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<CacheEntry>, DesklineError>;
    fn store(&self, key: &str, entry: &CacheEntry) -> Result<(), DesklineError>;
    fn remove(&self, key: &str) -> Result<(), DesklineError>;
}

/// Process-local backend.
#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, CacheEntry>>, DesklineError> {
        self.entries
            .lock()
            .map_err(|_| DesklineError::Internal("conversation cache lock poisoned".into()))
    }
}

impl CacheBackend for MemoryCacheBackend {
    fn load(&self, key: &str) -> Result<Option<CacheEntry>, DesklineError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn store(&self, key: &str, entry: &CacheEntry) -> Result<(), DesklineError> {
        self.lock()?.insert(key.to_string(), entry.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), DesklineError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// One JSON file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileCacheBackend {
    dir: PathBuf,
}

impl FileCacheBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", percent_encode(key)))
    }
}

impl CacheBackend for FileCacheBackend {
    fn load(&self, key: &str) -> Result<Option<CacheEntry>, DesklineError> {
        let path = self.path_for(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DesklineError::storage(e)),
        };
        match serde_json::from_slice(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding unreadable cache entry");
                Ok(None)
            }
        }
    }

    fn store(&self, key: &str, entry: &CacheEntry) -> Result<(), DesklineError> {
        std::fs::create_dir_all(&self.dir).map_err(DesklineError::storage)?;
        let json = serde_json::to_vec(entry).map_err(DesklineError::storage)?;
        std::fs::write(self.path_for(key), json).map_err(DesklineError::storage)
    }

    fn remove(&self, key: &str) -> Result<(), DesklineError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DesklineError::storage(e)),
        }
    }
}

// Percent-encodes everything outside `[A-Za-z0-9_.-]`. Distinct inputs map to
// distinct outputs that contain no `:` or path separators.
fn percent_encode(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'.' | b'-' => out.push(byte as char),
            other => {
                let _ = write!(out, "%{other:02X}");
            }
        }
    }
    out
}

/// TTL-bounded conversation cache over a [`CacheBackend`].
#[derive(Clone)]
pub struct ConversationCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl ConversationCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    /// In-memory cache with the widget's configured TTL.
    pub fn in_memory(config: &WidgetConfig) -> Self {
        Self::new(Arc::new(MemoryCacheBackend::new()), ttl_from(config))
    }

    /// File-backed cache under the widget's configured directory.
    pub fn on_disk(config: &WidgetConfig) -> Self {
        Self::new(
            Arc::new(FileCacheBackend::new(&config.cache_dir)),
            ttl_from(config),
        )
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cache key for a chatbot and an optional customer identifier.
    ///
    /// Both parts are encoded, and an anonymous key has no customer segment,
    /// so no two (chatbot, customer) pairs share a key.
    pub fn key(chatbot_id: &str, customer: Option<&str>) -> String {
        let chatbot = percent_encode(chatbot_id);
        match customer.filter(|c| !c.is_empty()) {
            Some(customer) => format!("{KEY_PREFIX}:{chatbot}:{}", percent_encode(customer)),
            None => format!("{KEY_PREFIX}:{chatbot}"),
        }
    }

    /// Whether `entry` is still usable at `now`.
    pub fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(entry.created_at) < self.ttl
    }

    /// A fresh entry, if any. Expired and unreadable entries are removed.
    pub fn lookup(
        &self,
        chatbot_id: &str,
        customer: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<CacheEntry> {
        let key = Self::key(chatbot_id, customer);
        let entry = match self.backend.load(&key) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "conversation cache unreadable");
                return None;
            }
        };

        if self.is_fresh(&entry, now) {
            return Some(entry);
        }
        debug!(
            key = %key,
            conversation_id = %entry.conversation_id,
            created_at = %entry.created_at,
            "cached conversation expired"
        );
        self.remove_key(&key);
        None
    }

    pub fn remember(
        &self,
        chatbot_id: &str,
        customer: Option<&str>,
        conversation_id: &ConversationId,
        now: DateTime<Utc>,
    ) {
        let key = Self::key(chatbot_id, customer);
        let entry = CacheEntry {
            conversation_id: conversation_id.clone(),
            created_at: now,
        };
        if let Err(e) = self.backend.store(&key, &entry) {
            warn!(key = %key, error = %e, "failed to persist conversation cache entry");
        }
    }

    pub fn forget(&self, chatbot_id: &str, customer: Option<&str>) {
        self.remove_key(&Self::key(chatbot_id, customer));
    }

    fn remove_key(&self, key: &str) {
        if let Err(e) = self.backend.remove(key) {
            warn!(key = %key, error = %e, "failed to clear conversation cache entry");
        }
    }
}

fn ttl_from(config: &WidgetConfig) -> Duration {
    Duration::days(i64::from(config.cache_ttl_days))
}
