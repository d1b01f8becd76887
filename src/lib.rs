//! # Item Sync
//!
//! Periodic, resilient synchronization of paginated external sources into an
//! idempotent item store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Scheduler                           │
//! │  • Fires every job at start, then every interval            │
//! │  • One task per job, each under its own timeout             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          SyncJob                            │
//! │  • Run record: running → completed | failed (RunGuard)     │
//! │  • Pages via PaginationStrategy, or one fetch per region   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Resilient source client                   │
//! │  • Circuit breaker per target                              │
//! │  • Capped exponential backoff inside the breaker           │
//! │  • Every wait races the job's SyncContext                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Idempotent item store                    │
//! │  • Upsert keyed by (external_id, api_source)               │
//! │  • Attributes rewritten only when the content hash changes │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use item_sync::{ItemSyncConfig, SyncContext, SyncCoordinator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), item_sync::SyncError> {
//!     let config = ItemSyncConfig::load(None)?;
//!     let coordinator = SyncCoordinator::connect(config).await?;
//!
//!     // Run every job once; `run` would keep the scheduler going instead
//!     coordinator.run_once(&SyncContext::new()).await;
//!     coordinator.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`scheduler`]: periodic [`Job`] runner
//! - [`sync`]: [`SyncJob`], [`RunGuard`] and the pagination strategy
//! - [`source`]: source client trait, capability catalog, resilient HTTP client
//! - [`resilience`]: circuit breakers and retry logic
//! - [`storage`]: item/run stores (SQL, memory) and query caches (Redis, memory)
//! - [`coordinator`]: wires everything together from [`ItemSyncConfig`]

pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod item;
pub mod metrics;
pub mod resilience;
pub mod run_record;
pub mod scheduler;
pub mod source;
pub mod storage;
pub mod sync;

pub use config::{ItemSyncConfig, JobSettings};
pub use context::SyncContext;
pub use coordinator::{CoordinatorState, SyncCoordinator};
pub use error::{ErrorKind, SyncError};
pub use item::{ExternalId, ExternalRecord, StoredItem};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerManager, CircuitConfig, CircuitError, CircuitState};
pub use resilience::retry::{Retrier, RetryConfig};
pub use run_record::{RunCounts, RunRecord, RunStatus, RunUpdate};
pub use scheduler::{Job, Scheduler, SchedulerConfig};
pub use source::resilient::ResilientClient;
pub use source::{FetchParams, PaginatedResponse, PaginationMetadata, SourceClient};
pub use storage::traits::{ItemCache, ItemStore, RunStore, StorageError};
pub use sync::{PaginationStrategy, RunGuard, SyncJob, SyncRequest};
pub use metrics::LatencyTimer;
