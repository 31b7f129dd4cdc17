// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock AI responder for deterministic testing.
//!
//! `MockResponder` implements `AutoResponder` with pre-configured replies,
//! enabling fast, CI-runnable tests without an external model.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use deskline_core::traits::adapter::PluginAdapter;
use deskline_core::traits::responder::{AiReply, AutoResponder, ResponderRequest};
use deskline_core::types::{AdapterType, HealthStatus};
use deskline_core::DesklineError;

type HookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Hook = Arc<dyn Fn() -> HookFuture + Send + Sync>;

/// A mock responder that returns pre-configured replies.
///
/// Replies are popped from a FIFO queue. When the queue is empty, the
/// latest customer message is echoed back as `echo: <message>`.
pub struct MockResponder {
    replies: Mutex<VecDeque<AiReply>>,
    failures: Mutex<VecDeque<DesklineError>>,
    requests: Mutex<Vec<ResponderRequest>>,
    hook: Mutex<Option<Hook>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockResponder {
    /// Create a responder with an empty reply queue.
    pub fn new() -> Self {
        Self::with_replies(Vec::new())
    }

    /// Create a responder pre-loaded with the given replies.
    pub fn with_replies(replies: Vec<AiReply>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::from(replies)),
            failures: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            hook: Mutex::new(None),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Take `delay` to produce every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Add a reply to the end of the queue.
    pub async fn add_reply(&self, reply: AiReply) {
        self.replies.lock().await.push_back(reply);
    }

    /// Fail the next call with `error`.
    pub async fn fail_next(&self, error: DesklineError) {
        self.failures.lock().await.push_back(error);
    }

    /// Run `hook` inside every call, before the reply is returned.
    pub async fn on_respond<F, Fut>(&self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: Hook = Arc::new(move || -> HookFuture { Box::pin(hook()) });
        *self.hook.lock().await = Some(hook);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The most recent request, if any.
    pub async fn last_request(&self) -> Option<ResponderRequest> {
        self.requests.lock().await.last().cloned()
    }

    pub async fn requests(&self) -> Vec<ResponderRequest> {
        self.requests.lock().await.clone()
    }
}

impl Default for MockResponder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginAdapter for MockResponder {
    fn name(&self) -> &str {
        "mock-responder"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Responder
    }

    async fn health_check(&self) -> Result<HealthStatus, DesklineError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), DesklineError> {
        Ok(())
    }
}

#[async_trait]
impl AutoResponder for MockResponder {
    async fn respond(&self, request: ResponderRequest) -> Result<AiReply, DesklineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latest = request.latest.clone();
        self.requests.lock().await.push(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let hook = self.hook.lock().await.clone();
        if let Some(hook) = hook {
            hook().await;
        }
        if let Some(error) = self.failures.lock().await.pop_front() {
            return Err(error);
        }

        Ok(self
            .replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| AiReply::text(format!("echo: {latest}"))))
    }
}
