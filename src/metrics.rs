// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for item-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `item_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `circuit`: breaker name (e.g. `pokemon-api`)
//! - `job`: scheduler job name
//! - `source`: external api source
//! - `status` / `result`: outcome of the operation

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a call outcome through a circuit breaker (success, failure, rejected)
pub fn record_circuit_breaker_call(circuit: &str, outcome: &str) {
    counter!(
        "item_sync_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "result" => outcome.to_string()
    )
    .increment(1);
}

/// Record circuit breaker state change (0 = closed, 1 = half-open, 2 = open)
pub fn set_circuit_state(circuit: &str, state: u8) {
    gauge!(
        "item_sync_circuit_breaker_state",
        "circuit" => circuit.to_string()
    )
    .set(state as f64);
}

/// Record a retry of a failed attempt
pub fn record_retry(operation: &str) {
    counter!(
        "item_sync_retries_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record the outcome of one job execution
pub fn record_job_run(job: &str, status: &str, duration: Duration) {
    counter!(
        "item_sync_job_runs_total",
        "job" => job.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(
        "item_sync_job_duration_seconds",
        "job" => job.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record one item upsert outcome (succeeded, failed)
pub fn record_item(source: &str, result: &str) {
    counter!(
        "item_sync_items_total",
        "source" => source.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

pub fn record_page_fetched(source: &str) {
    counter!(
        "item_sync_pages_fetched_total",
        "source" => source.to_string()
    )
    .increment(1);
}

/// Record latency of one logical call to an external source
pub fn record_fetch_latency(source: &str, duration: Duration) {
    histogram!(
        "item_sync_fetch_latency_seconds",
        "source" => source.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Set whether the scheduler loop is running
pub fn set_scheduler_running(running: bool) {
    gauge!("item_sync_scheduler_running").set(if running { 1.0 } else { 0.0 });
}

/// Guard that records fetch latency on drop
pub struct LatencyTimer {
    source: String,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_fetch_latency(&self.source, self.start.elapsed());
    }
}
