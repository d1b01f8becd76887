// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry inside a circuit breaker.
//!
//! One logical call makes one breaker decision: the breaker guards the whole
//! retry loop, so a burst of transient failures that the retrier eventually
//! absorbs never trips the breaker, and an exhausted retry loop counts once.
//!
//! ```text
//! call(ctx, "pokemon-api", op)
//!   └─ breaker("pokemon-api")        rejected → SyncError::CircuitOpen
//!        └─ retrier                  backoff between attempts, races ctx
//!             └─ ctx.run(op())       each attempt dropped on cancellation
//! ```

use std::future::Future;
use std::sync::Arc;

use crate::context::SyncContext;
use crate::error::{ErrorKind, SyncError};
use crate::resilience::circuit_breaker::{CircuitBreakerManager, CircuitError};
use crate::resilience::retry::Retrier;

/// Classify an HTTP status: 4xx other than 408 and 429 will not get better by retrying.
#[must_use]
pub fn classify_status(status: u16) -> ErrorKind {
    match status {
        408 | 429 => ErrorKind::Retryable,
        400..=499 => ErrorKind::NonRetryable,
        _ => ErrorKind::Retryable,
    }
}

#[derive(Debug, Clone)]
pub struct ResilientClient {
    breakers: Arc<CircuitBreakerManager>,
    retrier: Retrier,
}

impl ResilientClient {
    #[must_use]
    pub fn new(breakers: Arc<CircuitBreakerManager>, retrier: Retrier) -> Self {
        Self { breakers, retrier }
    }

    #[must_use]
    pub fn breakers(&self) -> &Arc<CircuitBreakerManager> {
        &self.breakers
    }

    #[must_use]
    pub fn retrier(&self) -> &Retrier {
        &self.retrier
    }

    /// Run `operation` against `target` with retries, behind `target`'s breaker.
    ///
    /// Cancellation does not count against the breaker.
    pub async fn call<F, Fut, T>(&self, ctx: &SyncContext, target: &str, mut operation: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let breaker = self.breakers.get(target);

        let result = breaker
            .call_classified(
                || {
                    self.retrier
                        .execute_with_result(ctx, target, move || ctx.run(operation()))
                },
                |err: &SyncError| !err.is_cancellation(),
            )
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(CircuitError::Rejected) => Err(SyncError::CircuitOpen(target.to_string())),
            Err(CircuitError::Inner(err)) => Err(err),
        }
    }
}
