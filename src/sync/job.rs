// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One synchronization run of one source.
//!
//! ```text
//! create run (running) ─► fetch (pages | regions) ─► upsert each record ─► finish run
//!        │                                                                   ▲
//!        └──────────── RunGuard dropped early ─► failed update ──────────────┘
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::pagination::{PaginationStrategy, SyncRequest};
use crate::context::SyncContext;
use crate::error::SyncError;
use crate::item::ExternalRecord;
use crate::run_record::{RunCounts, RunStatus, RunUpdate};
use crate::scheduler::Job;
use crate::source::catalog::{self, FetchPlan};
use crate::source::{FetchParams, SourceClient};
use crate::storage::traits::{ItemStore, RunStore};

/// Records stored between cancellation checks
const CANCEL_CHECK_INTERVAL: usize = 100;

const ABORTED_MESSAGE: &str = "sync run aborted before completion";

/// Owns one run record from creation to its terminal update.
///
/// [`finish`](Self::finish) writes the outcome. A guard dropped without
/// `finish` (panic, timeout, future dropped) spawns a `failed` update instead,
/// on the task tracker carried by the context it began with.
pub struct RunGuard {
    ctx: SyncContext,
    runs: Arc<dyn RunStore>,
    run_id: i64,
    job_name: String,
    started: Instant,
    counts: RunCounts,
    first_error: Option<SyncError>,
    finished: bool,
}

impl RunGuard {
    /// Create the run record in `running` state.
    pub async fn begin(
        ctx: &SyncContext,
        runs: Arc<dyn RunStore>,
        job_name: &str,
        api_source: &str,
    ) -> Result<Self, SyncError> {
        let run_id = runs.create_run(job_name, api_source).await?;
        debug!(run_id, job = %job_name, "Run started");
        Ok(Self {
            ctx: ctx.clone(),
            runs,
            run_id,
            job_name: job_name.to_string(),
            started: Instant::now(),
            counts: RunCounts::default(),
            first_error: None,
            finished: false,
        })
    }

    #[must_use]
    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    #[must_use]
    pub fn counts(&self) -> RunCounts {
        self.counts
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        self.first_error.is_some()
    }

    pub fn record_success(&mut self) {
        self.counts.processed += 1;
        self.counts.succeeded += 1;
    }

    /// A record that was fetched but could not be stored.
    pub fn record_failure(&mut self, err: SyncError) {
        self.counts.processed += 1;
        self.counts.failed += 1;
        self.record_error(err);
    }

    /// A fetch that produced no records (one region of a per-region source).
    pub fn record_fetch_failure(&mut self, err: SyncError) {
        self.counts.failed += 1;
        self.record_error(err);
    }

    /// Keep the first error; later ones only reach the log.
    pub fn record_error(&mut self, err: SyncError) {
        if self.first_error.is_none() {
            self.first_error = Some(err);
        }
    }

    /// Write the terminal update: `failed` if any error was recorded,
    /// `completed` otherwise. Returns the first recorded error.
    pub async fn finish(mut self) -> Result<(), SyncError> {
        self.finished = true;
        let first_error = self.first_error.take();
        let status = if first_error.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        let update = RunUpdate {
            status,
            counts: self.counts,
            error_message: first_error.as_ref().map(ToString::to_string),
            execution_time: self.started.elapsed(),
        };

        let stored = self.runs.update_run(self.run_id, &update).await;

        info!(
            run_id = self.run_id,
            job = %self.job_name,
            status = %status,
            processed = self.counts.processed,
            succeeded = self.counts.succeeded,
            failed = self.counts.failed,
            duration_ms = update.execution_time_ms(),
            "Run finished"
        );

        match (first_error, stored) {
            (Some(err), Err(store_err)) => {
                error!(run_id = self.run_id, error = %store_err, "Failed to finalize run record");
                Err(err)
            }
            (Some(err), Ok(())) => Err(err),
            (None, Err(store_err)) => Err(store_err.into()),
            (None, Ok(())) => Ok(()),
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let error_message = match self.first_error.take() {
            Some(err) => format!("{ABORTED_MESSAGE}: {err}"),
            None => ABORTED_MESSAGE.to_string(),
        };
        let update = RunUpdate {
            status: RunStatus::Failed,
            counts: self.counts,
            error_message: Some(error_message),
            execution_time: self.started.elapsed(),
        };
        warn!(run_id = self.run_id, job = %self.job_name, "Run aborted, finalizing as failed");

        let runs = Arc::clone(&self.runs);
        let run_id = self.run_id;
        let spawned = self.ctx.spawn_tracked(async move {
            if let Err(e) = runs.update_run(run_id, &update).await {
                error!(run_id, error = %e, "Failed to finalize aborted run");
            }
        });
        if !spawned {
            error!(run_id = self.run_id, "No runtime available to finalize aborted run");
        }
    }
}

/// Synchronizes one source into the item store.
pub struct SyncJob {
    name: String,
    source: String,
    params: FetchParams,
    client: Arc<dyn SourceClient>,
    pagination: PaginationStrategy,
    items: Arc<dyn ItemStore>,
    runs: Arc<dyn RunStore>,
}

impl SyncJob {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        client: Arc<dyn SourceClient>,
        items: Arc<dyn ItemStore>,
        runs: Arc<dyn RunStore>,
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            params: FetchParams::new(),
            pagination: PaginationStrategy::new(Arc::clone(&client)),
            client,
            items,
            runs,
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: FetchParams) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn params(&self) -> &FetchParams {
        &self.params
    }

    async fn sync(&self, ctx: &SyncContext, run: &mut RunGuard) -> Result<(), SyncError> {
        let profile = catalog::profile(&self.source).ok_or_else(|| SyncError::UnsupportedSource(self.source.clone()))?;

        match profile.plan {
            FetchPlan::Paginated { operation } => {
                let request = SyncRequest::new(&self.source, operation).with_params(self.params.clone());
                // An explicit limit pins the job to a single page
                let records = if self.params.contains_key("limit") {
                    self.pagination.fetch(ctx, &request).await?
                } else {
                    self.pagination.fetch_all(ctx, &request).await?
                };
                self.store_all(ctx, run, &records).await
            }
            FetchPlan::PerRegion {
                operation,
                region_param,
                ..
            } => {
                for region in profile.regions(&self.params) {
                    let mut params = self.params.clone();
                    params.insert(region_param.to_string(), Value::String(region.clone()));

                    match self.client.fetch(ctx, &self.source, operation, &params).await {
                        Ok(records) => self.store_all(ctx, run, &records).await?,
                        Err(err) => {
                            warn!(region = %region, error = %err, "Region fetch failed");
                            run.record_fetch_failure(err);
                        }
                    }
                    ctx.check()?;
                }
                Ok(())
            }
        }
    }

    async fn store_all(&self, ctx: &SyncContext, run: &mut RunGuard, records: &[ExternalRecord]) -> Result<(), SyncError> {
        for (index, record) in records.iter().enumerate() {
            if index > 0 && index % CANCEL_CHECK_INTERVAL == 0 {
                ctx.check()?;
            }

            match self.items.upsert_with_hash(&self.source, record).await {
                Ok(()) => {
                    debug!(external_id = %record.id, "Stored item");
                    crate::metrics::record_item(&self.source, "succeeded");
                    run.record_success();
                }
                Err(e) => {
                    warn!(external_id = %record.id, error = %e, "Failed to store item");
                    crate::metrics::record_item(&self.source, "failed");
                    run.record_failure(e.into());
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Job for SyncJob {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip(self, ctx), fields(job = %self.name, source = %self.source))]
    async fn execute(&self, ctx: SyncContext) -> Result<(), SyncError> {
        let mut run = RunGuard::begin(&ctx, Arc::clone(&self.runs), &self.name, &self.source).await?;

        if let Err(err) = self.sync(&ctx, &mut run).await {
            run.record_error(err);
        }

        run.finish().await
    }
}
