// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! Two entry points share one [`RetryConfig`]:
//!
//! - [`Retrier`] classifies every failure through [`SyncError::is_retryable`]
//!   and races each backoff sleep against a [`SyncContext`]. External source
//!   calls go through it.
//! - [`retry`] is the plain helper used by storage plumbing (connect, schema,
//!   read queries) where every error is worth another try.
//!
//! Delays are deterministic: before attempt `k >= 1` the retrier waits
//! `min(initial_delay * factor^(k-1), max_delay)`. No jitter.
//!
//! # Example
//!
//! ```
//! use item_sync::RetryConfig;
//! use std::time::Duration;
//!
//! let config = RetryConfig::default();
//! assert_eq!(config.max_retries, 5);
//! assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
//! assert_eq!(config.delay_for_attempt(6), Duration::from_secs(30));
//!
//! // Startup: fail fast on bad storage config
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_retries, 5);
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::context::SyncContext;
use crate::error::SyncError;

/// Configuration for retry behavior.
///
/// Use the preset constructors for storage plumbing:
/// - [`RetryConfig::startup()`] - Fast-fail for initial connections
/// - [`RetryConfig::query()`] - Quick retry for individual queries
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts = `max_retries + 1`
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Fast-fail retry for initial startup connection.
    /// Use this when connecting to storage to detect configuration errors quickly.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Quick retry for individual queries (don't block forever).
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    /// Delay slept before attempt `attempt` (1-based; attempt 0 never waits).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let nanos = self.initial_delay.as_nanos() as f64 * self.factor.powi(exponent);
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos.max(0.0).round() as u64)
    }
}

/// Context-aware retrier with error classification.
#[derive(Debug, Clone, Default)]
pub struct Retrier {
    config: RetryConfig,
}

impl Retrier {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.config.delay_for_attempt(attempt)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// exhausts its attempts, or `ctx` finishes during a backoff sleep.
    pub async fn execute<F, Fut>(
        &self,
        ctx: &SyncContext,
        operation_name: &str,
        operation: F,
    ) -> Result<(), SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), SyncError>>,
    {
        self.execute_with_result(ctx, operation_name, operation).await
    }

    /// Same as [`Retrier::execute`], returning the operation's value.
    pub async fn execute_with_result<F, Fut, T>(
        &self,
        ctx: &SyncContext,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let mut attempt: u32 = 0;

        loop {
            if attempt > 0 {
                let delay = self.delay_for_attempt(attempt);
                debug!(operation = operation_name, attempt, ?delay, "Backing off before retry");
                crate::metrics::record_retry(operation_name);
                ctx.sleep(delay).await?;
            }

            let err = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(operation = operation_name, attempts = attempt + 1, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                debug!(operation = operation_name, error = %err, kind = %err.kind(), "Operation failed with non-retryable error");
                return Err(err);
            }

            if attempt >= self.config.max_retries {
                error!(
                    operation = operation_name,
                    attempts = attempt + 1,
                    error = %err,
                    "Operation failed, retries exhausted"
                );
                return Err(err);
            }

            warn!(
                operation = operation_name,
                attempt = attempt + 1,
                max_attempts = self.config.max_retries + 1,
                error = %err,
                "Operation failed, will retry"
            );
            attempt += 1;
        }
    }
}

/// Retry `operation` on every error, without a context.
///
/// Storage plumbing only: connection setup, schema creation and read queries.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempt > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, attempt);
                }
                return Ok(val);
            }
            Err(err) => {
                if attempt >= config.max_retries {
                    return Err(err);
                }
                attempt += 1;

                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name, attempt, config.max_retries + 1, err, delay
                );

                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn transient() -> SyncError {
        SyncError::Transport("connection reset".into())
    }

    #[test]
    fn test_delay_sequence() {
        let config = RetryConfig::default();
        let delays: Vec<u64> = (1..=7).map(|k| config.delay_for_attempt(k).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn test_first_attempt_never_waits() {
        assert_eq!(RetryConfig::default().delay_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn test_huge_attempt_caps_at_max_delay() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(10_000), config.max_delay);
    }

    #[test]
    fn test_sub_second_delays() {
        let config = RetryConfig::query();
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_first_try() {
        let retrier = Retrier::default();
        let calls = AtomicU32::new(0);

        let result = retrier
            .execute_with_result(&SyncContext::new(), "test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, SyncError>(42) }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let retrier = Retrier::default();
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let c = calls.clone();
        let result = retrier
            .execute_with_result(&SyncContext::new(), "test", move || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 3 {
                        Err(transient())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 1s + 2s + 4s of backoff
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_retries_and_returns_last_error() {
        let retrier = Retrier::new(RetryConfig {
            max_retries: 2,
            ..RetryConfig::default()
        });
        let calls = AtomicU32::new(0);

        let result = retrier
            .execute(&SyncContext::new(), "test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(SyncError::Transport(format!("failure {n}"))) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(SyncError::Transport(msg)) => assert_eq!(msg, "failure 2"),
            other => panic!("expected last transport error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_returns_immediately() {
        let retrier = Retrier::default();
        let calls = AtomicU32::new(0);

        let result = retrier
            .execute(&SyncContext::new(), "test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(SyncError::Http {
                        status: 404,
                        message: "Not Found".into(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(SyncError::Http { status: 404, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_retried() {
        let retrier = Retrier::new(RetryConfig::test());
        let calls = AtomicU32::new(0);

        let _ = retrier
            .execute(&SyncContext::new(), "test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(SyncError::Http {
                        status: 429,
                        message: "Too Many Requests".into(),
                    })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_backoff() {
        let retrier = Retrier::default();
        let ctx = SyncContext::new();
        let calls = Arc::new(AtomicU32::new(0));

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel();
        });

        let c = calls.clone();
        let result = retrier
            .execute(&ctx, "test", move || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_during_backoff() {
        let retrier = Retrier::default();
        let ctx = SyncContext::new().with_timeout(Duration::from_millis(2500));

        let result = retrier
            .execute(&ctx, "test", || async { Err(transient()) })
            .await;

        assert!(matches!(result, Err(SyncError::DeadlineExceeded)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_plain_retry_helper() {
        let calls = AtomicU32::new(0);

        let result: Result<u32, String> = retry("connect", &RetryConfig::test(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(format!("refused {n}"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_plain_retry_gives_up() {
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = retry("connect", &RetryConfig::test(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("refused".to_string()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
