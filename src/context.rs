// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cancellation and deadline propagation.
//!
//! A [`SyncContext`] is a [`CancellationToken`] plus an optional deadline.
//! Contexts form a tree: [`SyncContext::with_timeout`] derives a child whose
//! token is cancelled with its parent and whose deadline never outlives the
//! parent's. Every cancellable await point in the crate (backoff sleeps,
//! network calls, the scheduler loop) races [`SyncContext::done`].
//!
//! ```
//! use item_sync::SyncContext;
//! use std::time::Duration;
//!
//! let root = SyncContext::new();
//! let job = root.with_timeout(Duration::from_secs(600));
//! assert!(job.deadline().is_some());
//!
//! root.cancel();
//! assert!(job.is_cancelled());
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::SyncError;

#[derive(Debug, Clone, Default)]
pub struct SyncContext {
    token: CancellationToken,
    deadline: Option<Instant>,
    /// Owner-supplied tracker for work that must outlive the caller's future
    tasks: Option<TaskTracker>,
}

impl SyncContext {
    /// A root context: never expires, cancelled only explicitly.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing token (e.g. one shared with a signal handler).
    #[must_use]
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
            tasks: None,
        }
    }

    /// Derive a child bounded by `timeout`, or by the parent's deadline if
    /// that comes first.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < candidate => parent,
            _ => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
            tasks: self.tasks.clone(),
        }
    }

    /// Derive a child with the same deadline.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            tasks: self.tasks.clone(),
        }
    }

    /// Attach the tracker that [`spawn_tracked`](Self::spawn_tracked) uses.
    /// Derived contexts inherit it.
    #[must_use]
    pub fn with_tasks(mut self, tasks: TaskTracker) -> Self {
        self.tasks = Some(tasks);
        self
    }

    /// Spawn `task` on the attached tracker, so whoever waits on that tracker
    /// also waits for `task`. Without a tracker the task is detached.
    ///
    /// Returns false, dropping `task`, when called outside a tokio runtime.
    pub fn spawn_tracked<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return false;
        };
        match &self.tasks {
            Some(tasks) => {
                tasks.spawn_on(task, &handle);
            }
            None => {
                handle.spawn(task);
            }
        }
        true
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The reason this context is done, if it is.
    #[must_use]
    pub fn err(&self) -> Option<SyncError> {
        if self.token.is_cancelled() {
            return Some(SyncError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(SyncError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn check(&self) -> Result<(), SyncError> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> SyncError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => SyncError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => {
                    if self.token.is_cancelled() {
                        SyncError::Cancelled
                    } else {
                        SyncError::DeadlineExceeded
                    }
                }
            },
            None => {
                self.token.cancelled().await;
                SyncError::Cancelled
            }
        }
    }

    /// Sleep for `duration` unless the context finishes first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), SyncError> {
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Drive `fut` to completion unless the context finishes first, in which
    /// case `fut` is dropped.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, SyncError>
    where
        F: Future<Output = Result<T, SyncError>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_root_context_is_live() {
        let ctx = SyncContext::new();
        assert!(ctx.err().is_none());
        assert!(ctx.deadline().is_none());
        assert!(ctx.check().is_ok());
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_children() {
        let root = SyncContext::new();
        let child = root.with_timeout(Duration::from_secs(60));
        let grandchild = child.child();

        root.cancel();

        assert!(matches!(child.err(), Some(SyncError::Cancelled)));
        assert!(matches!(grandchild.err(), Some(SyncError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancelling_child_leaves_parent_alive() {
        let root = SyncContext::new();
        let child = root.with_timeout(Duration::from_secs(60));

        child.cancel();

        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let ctx = SyncContext::new().with_timeout(Duration::from_millis(100));

        let err = ctx.done().await;

        assert!(matches!(err, SyncError::DeadlineExceeded));
        assert!(matches!(ctx.err(), Some(SyncError::DeadlineExceeded)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_never_outlives_parent_deadline() {
        let parent = SyncContext::new().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(3600));

        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_deadline() {
        let ctx = SyncContext::new().with_timeout(Duration::from_millis(50));
        let started = Instant::now();

        let result = ctx.sleep(Duration::from_secs(30)).await;

        assert!(matches!(result, Err(SyncError::DeadlineExceeded)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_run_returns_cancelled_for_dead_context() {
        let ctx = SyncContext::new();
        ctx.cancel();

        let result: Result<u32, SyncError> = ctx.run(async { Ok(7) }).await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
    }

    #[tokio::test]
    async fn test_run_passes_through_result() {
        let ctx = SyncContext::new();
        let result: Result<u32, SyncError> = ctx.run(async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_tracked_is_awaited_by_tracker() {
        let tasks = TaskTracker::new();
        let ctx = SyncContext::new().with_tasks(tasks.clone()).with_timeout(Duration::from_secs(1));
        let done = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));

        let flag = std::sync::Arc::clone(&done);
        assert!(ctx.spawn_tracked(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        }));

        tasks.close();
        tasks.wait().await;
        assert!(done.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_spawn_tracked_outside_runtime() {
        assert!(!SyncContext::new().spawn_tracked(async {}));
    }
}
