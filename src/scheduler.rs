// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Periodic job scheduler.
//!
//! Every registered [`Job`] fires once when the scheduler starts and again on
//! each interval tick. Each execution runs in its own task under a child
//! [`SyncContext`] bounded by the per-job timeout.
//!
//! ```text
//! start(ctx) ──► tick ──► spawn job A ─┐
//!                  │  └─► spawn job B ─┤  (TaskTracker)
//!                  ▼                   │
//!                tick ...              ▼
//! stop() ──► cancel loop ──► wait for in-flight jobs
//! ```
//!
//! A job that returns an error, panics or overruns its timeout is logged
//! and counted; it never stops the loop or another job.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::context::SyncContext;
use crate::error::SyncError;

/// How long a job may keep running after its context expires before its
/// future is dropped.
const TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// A unit of scheduled work.
#[async_trait]
pub trait Job: Send + Sync {
    /// Registry key; unique within a scheduler.
    fn name(&self) -> &str;

    /// Run once. `ctx` carries the per-job deadline.
    async fn execute(&self, ctx: SyncContext) -> Result<(), SyncError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// When false, `start` returns immediately without firing anything
    pub enabled: bool,
    pub sync_interval: Duration,
    pub job_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sync_interval: Duration::from_secs(15 * 60),
            job_timeout: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Default)]
struct Lifecycle {
    running: bool,
    /// Cancels the scheduling loop; present while running
    shutdown: Option<CancellationToken>,
}

pub struct Scheduler {
    config: SchedulerConfig,
    jobs: RwLock<HashMap<String, Arc<dyn Job>>>,
    lifecycle: Mutex<Lifecycle>,
    tracker: TaskTracker,
}

impl Scheduler {
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            jobs: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(Lifecycle::default()),
            tracker: TaskTracker::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Add `job`, replacing any job registered under the same name.
    pub fn register_job(&self, job: Arc<dyn Job>) {
        let name = job.name().to_string();
        if self.jobs.write().insert(name.clone(), job).is_some() {
            warn!(job = %name, "Replaced previously registered job");
        } else {
            info!(job = %name, "Registered job");
        }
    }

    /// Registered job names, sorted.
    #[must_use]
    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.read().keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.read().len()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lifecycle.lock().running
    }

    /// Run the scheduling loop until `ctx` is cancelled (`Err(Cancelled)`) or
    /// [`stop`](Self::stop) is called (`Ok`).
    ///
    /// Returns `Ok` immediately when disabled or already running.
    #[tracing::instrument(skip(self, ctx), fields(jobs = self.job_count()))]
    pub async fn start(&self, ctx: SyncContext) -> Result<(), SyncError> {
        let shutdown = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.running {
                debug!("Scheduler already running");
                return Ok(());
            }
            lifecycle.running = true;
            if !self.config.enabled {
                info!("Scheduler disabled by configuration");
                return Ok(());
            }
            let shutdown = CancellationToken::new();
            lifecycle.shutdown = Some(shutdown.clone());
            self.tracker.reopen();
            shutdown
        };

        crate::metrics::set_scheduler_running(true);
        info!(
            interval_secs = self.config.sync_interval.as_secs(),
            job_timeout_secs = self.config.job_timeout.as_secs(),
            "Scheduler started"
        );

        // The first tick completes immediately
        let mut interval = tokio::time::interval(self.config.sync_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break Ok(()),
                err = ctx.done() => break Err(err),
                _ = interval.tick() => self.spawn_tick(&ctx),
            }
        };

        match &result {
            Ok(()) => info!("Scheduler loop stopped"),
            Err(err) => info!(reason = %err, "Scheduler loop cancelled"),
        }
        result
    }

    /// Stop the loop and wait for every in-flight job to finish.
    ///
    /// Running jobs are not cancelled; they end on their own or at their
    /// timeout. No-op when not running.
    pub async fn stop(&self) {
        let shutdown = {
            let mut lifecycle = self.lifecycle.lock();
            if !lifecycle.running {
                debug!("Scheduler not running");
                return;
            }
            lifecycle.running = false;
            // Closed under the lock so no tick can spawn after this point
            self.tracker.close();
            lifecycle.shutdown.take()
        };

        info!("Stopping scheduler");
        if let Some(shutdown) = shutdown {
            shutdown.cancel();
        }

        self.tracker.wait().await;
        crate::metrics::set_scheduler_running(false);
        info!("Scheduler stopped");
    }

    /// Fire every registered job once and wait for all of them, including
    /// any run finalization they leave behind.
    pub async fn run_once(&self, ctx: &SyncContext) {
        let jobs = self.snapshot();
        info!(jobs = jobs.len(), "Running all jobs once");
        let tasks = TaskTracker::new();
        let runs = jobs.into_iter().map(|job| {
            let job_ctx = ctx.with_timeout(self.config.job_timeout).with_tasks(tasks.clone());
            run_job(job, job_ctx)
        });
        futures::future::join_all(runs).await;
        tasks.close();
        tasks.wait().await;
    }

    fn snapshot(&self) -> Vec<Arc<dyn Job>> {
        self.jobs.read().values().cloned().collect()
    }

    fn spawn_tick(&self, ctx: &SyncContext) {
        let jobs = self.snapshot();
        // Held while spawning; stop() closes the tracker under the same lock
        let _lifecycle = self.lifecycle.lock();
        if self.tracker.is_closed() {
            debug!("Scheduler stopping, tick skipped");
            return;
        }
        debug!(jobs = jobs.len(), "Scheduler tick");
        for job in jobs {
            let job_ctx = ctx
                .with_timeout(self.config.job_timeout)
                .with_tasks(self.tracker.clone());
            self.tracker.spawn(run_job(job, job_ctx));
        }
    }
}

/// Execute one job, isolating its errors and panics.
///
/// The job is expected to honour `ctx`; if it is still running
/// `TIMEOUT_GRACE` after the context expires its future is dropped.
async fn run_job(job: Arc<dyn Job>, ctx: SyncContext) {
    let name = job.name().to_string();
    let started = Instant::now();
    debug!(job = %name, "Job starting");

    let execution = AssertUnwindSafe(job.execute(ctx.clone())).catch_unwind();
    let outcome = tokio::select! {
        result = execution => match result {
            Ok(result) => result,
            Err(panic) => Err(SyncError::JobPanicked(panic_message(panic.as_ref()))),
        },
        err = async {
            let err = ctx.done().await;
            tokio::time::sleep(TIMEOUT_GRACE).await;
            err
        } => Err(err),
    };

    let duration = started.elapsed();
    match &outcome {
        Ok(()) => {
            crate::metrics::record_job_run(&name, "success", duration);
            info!(job = %name, duration_ms = duration.as_millis() as u64, "Job completed");
        }
        Err(err) => {
            let status = if err.is_cancellation() { "timeout" } else { "failure" };
            crate::metrics::record_job_run(&name, status, duration);
            error!(job = %name, duration_ms = duration.as_millis() as u64, error = %err, "Job failed");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "job panicked".to_string()
    }
}
