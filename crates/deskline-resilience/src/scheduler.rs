// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cancellable task scheduling.
//!
//! A [`Scheduler`] owns a [`CancellationToken`] and a [`TaskTracker`]. Tasks
//! spawned through it stop at their next await point once the scheduler is
//! cancelled, and [`Scheduler::shutdown`] waits for all of them to finish.
//! Child schedulers are cancelled with their parent but can also be cancelled
//! on their own, which is how a session drops the timers of one conversation
//! without touching the rest. A child's tasks also count towards every
//! ancestor's tracker, so shutting down a parent waits for them too.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// Owner of a group of cancellable background tasks.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    token: CancellationToken,
    tracker: TaskTracker,
    ancestors: Vec<TaskTracker>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scheduler whose tasks are cancelled with this one, but not vice versa.
    pub fn child(&self) -> Scheduler {
        let mut ancestors = Vec::with_capacity(self.ancestors.len() + 1);
        ancestors.push(self.tracker.clone());
        ancestors.extend(self.ancestors.iter().cloned());
        Scheduler {
            token: self.token.child_token(),
            tracker: TaskTracker::new(),
            ancestors,
        }
    }

    /// The token tasks can observe directly.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancels every task spawned by this scheduler and its children.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            debug!("scheduler cancelled");
        }
        self.token.cancel();
    }

    /// Spawns `fut`; it resolves to `None` if cancelled first.
    ///
    /// Nothing is spawned on an already cancelled scheduler.
    pub fn spawn<F>(&self, fut: F) -> TaskHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.spawn_inner(None, fut)
    }

    /// Spawns `fut` to run after `delay`, unless cancelled before or during it.
    pub fn spawn_after<F>(&self, delay: Duration, fut: F) -> TaskHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.spawn_inner(Some(delay), fut)
    }

    fn spawn_inner<F>(&self, delay: Option<Duration>, fut: F) -> TaskHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let token = self.token.child_token();
        if token.is_cancelled() {
            return TaskHandle { token, join: None };
        }

        let task_token = token.clone();
        let held = self.ancestor_tokens();
        let join = self.tracker.spawn(async move {
            let _held = held;
            if let Some(delay) = delay {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            tokio::select! {
                biased;
                _ = task_token.cancelled() => None,
                out = fut => Some(out),
            }
        });

        TaskHandle {
            token,
            join: Some(join),
        }
    }

    /// Spawns a task that observes cancellation itself.
    ///
    /// The future is built from a token that fires when this scheduler (or
    /// the returned handle) is cancelled, and always runs to completion, so
    /// it can release resources after noticing cancellation.
    pub fn spawn_cooperative<F, Fut>(&self, f: F) -> TaskHandle<Fut::Output>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let token = self.token.child_token();
        let fut = f(token.clone());
        let held = self.ancestor_tokens();
        let join = self.tracker.spawn(async move {
            let _held = held;
            Some(fut.await)
        });
        TaskHandle {
            token,
            join: Some(join),
        }
    }

    /// Keeps each ancestor's tracker open for as long as they are held.
    fn ancestor_tokens(&self) -> Vec<TaskTrackerToken> {
        self.ancestors.iter().map(TaskTracker::token).collect()
    }

    /// Cancels all tasks, those of child schedulers included, and waits until
    /// every one of them has returned.
    pub async fn shutdown(&self) {
        self.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Number of tasks spawned here or by a child that have not yet returned.
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }
}

/// Handle to a single scheduled task.
///
/// Dropping the handle detaches the task; it keeps running until it finishes
/// or its scheduler is cancelled.
#[derive(Debug)]
pub struct TaskHandle<T> {
    token: CancellationToken,
    join: Option<JoinHandle<Option<T>>>,
}

impl<T> TaskHandle<T> {
    /// Cancels just this task.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits for the task. `None` if it was cancelled, never spawned, or panicked.
    pub async fn join(self) -> Option<T> {
        match self.join {
            Some(join) => join.await.ok().flatten(),
            None => None,
        }
    }
}
