// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit breaker pattern for external sources.
//!
//! Protects the sync jobs against hammering an external API that is already
//! failing. Each named breaker counts consecutive failures and "trips" when
//! the threshold is reached.
//!
//! States:
//! - Closed: Normal operation, requests pass through
//! - Open: Service unhealthy, requests fail-fast without attempting
//! - HalfOpen: Recovery timeout elapsed, the next result decides
//!
//! Breakers are created lazily by [`CircuitBreakerManager::get`] and live for
//! the lifetime of the manager.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state for metrics/monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfOpen => write!(f, "half_open"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Error type for circuit-protected operations
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// Circuit is open, request rejected without attempting
    #[error("circuit breaker open, request rejected")]
    Rejected,
    /// The underlying operation failed
    #[error("operation failed: {0}")]
    Inner(#[source] E),
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitConfig {
    /// Number of consecutive failures to trip the circuit
    pub failure_threshold: u32,
    /// How long to stay open before letting a call through (half-open)
    pub recovery_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitConfig {
    /// Fast recovery for testing
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            failure_threshold: 2,
            recovery_timeout: Duration::from_millis(50),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    next_retry: Option<Instant>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            next_retry: None,
        }
    }
}

/// A named circuit breaker with metrics tracking
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    inner: Mutex<BreakerState>,

    // Metrics
    calls_total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("failure_count", &self.failure_count())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and config
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState::closed()),
            calls_total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    /// Create with default config
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitConfig::default())
    }

    /// Get the circuit breaker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Current state. An open breaker whose timeout elapsed still reports
    /// `Open` until the next call moves it to half-open.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Consecutive failures since the last success or reset
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Consecutive successes while closed
    #[must_use]
    pub fn success_count(&self) -> u32 {
        self.inner.lock().success_count
    }

    /// Time since the most recent recorded failure
    #[must_use]
    pub fn since_last_failure(&self) -> Option<Duration> {
        self.inner.lock().last_failure.map(|at| at.elapsed())
    }

    /// Remaining time before an open breaker admits a call
    #[must_use]
    pub fn next_retry_in(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        match (inner.state, inner.next_retry) {
            (CircuitState::Open, Some(at)) => Some(at.saturating_duration_since(Instant::now())),
            _ => None,
        }
    }

    /// Execute an async operation through the circuit breaker.
    ///
    /// Every error counts as a failure.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_classified(f, |_| true).await
    }

    /// Execute through the breaker, recording an error as a failure only when
    /// `counts_as_failure` says so. Errors that do not count leave the state
    /// untouched.
    pub async fn call_classified<F, Fut, T, E, P>(
        &self,
        f: F,
        counts_as_failure: P,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        self.calls_total.fetch_add(1, Ordering::Relaxed);

        if !self.try_acquire() {
            self.rejections.fetch_add(1, Ordering::Relaxed);
            warn!(circuit = %self.name, "Circuit breaker rejected call (open)");
            crate::metrics::record_circuit_breaker_call(&self.name, "rejected");
            return Err(CircuitError::Rejected);
        }

        match f().await {
            Ok(result) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                self.on_success();
                debug!(circuit = %self.name, "Circuit call succeeded");
                crate::metrics::record_circuit_breaker_call(&self.name, "success");
                Ok(result)
            }
            Err(e) => {
                if counts_as_failure(&e) {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    self.on_failure();
                    debug!(circuit = %self.name, "Circuit call failed");
                    crate::metrics::record_circuit_breaker_call(&self.name, "failure");
                } else {
                    debug!(circuit = %self.name, "Circuit call aborted, not counted");
                    crate::metrics::record_circuit_breaker_call(&self.name, "ignored");
                }
                Err(CircuitError::Inner(e))
            }
        }
    }

    /// Force the breaker back to closed with zeroed counters
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        *inner = BreakerState::closed();
        crate::metrics::set_circuit_state(&self.name, CircuitState::Closed as u8);
    }

    fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => match inner.next_retry {
                Some(at) if Instant::now() < at => false,
                _ => {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    true
                }
            },
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.failure_count = 0;
                inner.success_count = 0;
                inner.next_retry = None;
                self.transition(&mut inner, CircuitState::Closed);
            }
            _ => {
                inner.failure_count = 0;
                inner.success_count = inner.success_count.saturating_add(1);
            }
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.success_count = 0;
        inner.last_failure = Some(now);

        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.next_retry = Some(now + self.config.recovery_timeout);
                warn!(
                    circuit = %self.name,
                    failures = inner.failure_count,
                    retry_in = ?self.config.recovery_timeout,
                    "Circuit breaker opened"
                );
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::HalfOpen => {
                inner.next_retry = Some(now + self.config.recovery_timeout);
                warn!(
                    circuit = %self.name,
                    retry_in = ?self.config.recovery_timeout,
                    "Circuit breaker probe failed, reopening"
                );
                self.transition(&mut inner, CircuitState::Open);
            }
            _ => {}
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        if inner.state == to {
            return;
        }
        info!(circuit = %self.name, from = %inner.state, to = %to, "Circuit breaker state change");
        inner.state = to;
        crate::metrics::set_circuit_state(&self.name, to as u8);
    }

    /// Get total number of calls
    #[must_use]
    pub fn calls_total(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    /// Get number of successful calls
    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Get number of failed calls (operation errors)
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Get number of rejected calls (circuit open)
    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }
}

/// Lazily-populated registry of named breakers sharing one config.
///
/// Owned by the coordinator and handed to every resilient client; two clients
/// asking for the same name get the same breaker.
#[derive(Debug, Default)]
pub struct CircuitBreakerManager {
    config: CircuitConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerManager {
    #[must_use]
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the breaker for `name`.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(name) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write();
        // Another caller may have created it between the two locks
        Arc::clone(breakers.entry(name.to_string()).or_insert_with(|| {
            info!(circuit = name, "Creating circuit breaker");
            Arc::new(CircuitBreaker::new(name, self.config.clone()))
        }))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }

    /// Name and state of every breaker, sorted by name
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, CircuitState)> {
        let mut states: Vec<_> = self
            .breakers
            .read()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}
