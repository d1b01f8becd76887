// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync service coordinator.
//!
//! The [`SyncCoordinator`] owns every long-lived component and wires them
//! together from an [`ItemSyncConfig`]:
//! - item and run stores (SQL, or in-memory when no SQL URL is configured)
//! - the query cache (Redis, or in-memory)
//! - the circuit breaker registry shared by every outbound call
//! - the HTTP source client
//! - one [`SyncJob`] per configured job, registered with the [`Scheduler`]
//!
//! # Lifecycle
//!
//! ```text
//! Created → Connecting → Ready → Running → ShuttingDown → Stopped
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use item_sync::{ItemSyncConfig, SyncContext, SyncCoordinator};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), item_sync::SyncError> {
//! let coordinator = SyncCoordinator::connect(ItemSyncConfig::default()).await?;
//! coordinator.run_once(&SyncContext::new()).await;
//! # Ok(())
//! # }
//! ```

mod lifecycle;

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::ItemSyncConfig;
use crate::resilience::circuit_breaker::CircuitBreakerManager;
use crate::scheduler::Scheduler;
use crate::source::catalog;
use crate::source::SourceClient;
use crate::storage::traits::{ItemCache, ItemStore, RunStore};
use crate::sync::SyncJob;

/// Coordinator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Assembled, nothing running
    Created,
    /// Opening storage and cache connections
    Connecting,
    /// Connected, scheduler not started
    Ready,
    /// Scheduler loop active
    Running,
    /// Waiting for in-flight jobs
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Ready => write!(f, "Ready"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Backends the coordinator runs against.
pub struct Components {
    pub items: Arc<dyn ItemStore>,
    pub runs: Arc<dyn RunStore>,
    pub cache: Arc<dyn ItemCache>,
    pub client: Arc<dyn SourceClient>,
    pub breakers: Arc<CircuitBreakerManager>,
}

pub struct SyncCoordinator {
    config: ItemSyncConfig,
    state: watch::Sender<CoordinatorState>,
    state_rx: watch::Receiver<CoordinatorState>,
    items: Arc<dyn ItemStore>,
    runs: Arc<dyn RunStore>,
    cache: Arc<dyn ItemCache>,
    breakers: Arc<CircuitBreakerManager>,
    scheduler: Arc<Scheduler>,
}

impl SyncCoordinator {
    /// Build the scheduler and register one job per configured job whose
    /// source is in the catalog. Unknown sources are skipped with a warning.
    pub fn assemble(config: ItemSyncConfig, components: Components) -> Self {
        let (state_tx, state_rx) = watch::channel(CoordinatorState::Created);
        let scheduler = Arc::new(Scheduler::new(config.scheduler_config()));

        for job in &config.jobs {
            if catalog::profile(&job.source).is_none() {
                warn!(job = %job.name, source = %job.source, "Skipping job for unknown source");
                continue;
            }
            let sync_job = SyncJob::new(
                job.name.clone(),
                job.source.clone(),
                Arc::clone(&components.client),
                Arc::clone(&components.items),
                Arc::clone(&components.runs),
            )
            .with_params(job.params.clone());
            scheduler.register_job(Arc::new(sync_job));
        }
        info!(jobs = scheduler.job_count(), "Sync jobs registered");

        Self {
            config,
            state: state_tx,
            state_rx,
            items: components.items,
            runs: components.runs,
            cache: components.cache,
            breakers: components.breakers,
            scheduler,
        }
    }

    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        *self.state_rx.borrow()
    }

    /// Subscribe to state changes
    pub fn state_receiver(&self) -> watch::Receiver<CoordinatorState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn config(&self) -> &ItemSyncConfig {
        &self.config
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    #[must_use]
    pub fn items(&self) -> &Arc<dyn ItemStore> {
        &self.items
    }

    #[must_use]
    pub fn runs(&self) -> &Arc<dyn RunStore> {
        &self.runs
    }

    /// Query-side cache; the sync pipeline never reads it.
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn ItemCache> {
        &self.cache
    }

    #[must_use]
    pub fn breakers(&self) -> &Arc<CircuitBreakerManager> {
        &self.breakers
    }

    fn set_state(&self, state: CoordinatorState) {
        let _ = self.state.send(state);
    }
}
