// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Coordinator lifecycle: connect, run, shutdown.

use std::sync::Arc;
use tracing::{info, warn};

use super::{Components, CoordinatorState, SyncCoordinator};
use crate::config::ItemSyncConfig;
use crate::context::SyncContext;
use crate::error::SyncError;
use crate::resilience::circuit_breaker::CircuitBreakerManager;
use crate::resilience::retry::Retrier;
use crate::source::http::HttpSourceClient;
use crate::source::resilient::ResilientClient;
use crate::storage::memory::{InMemoryCache, InMemoryStore};
use crate::storage::redis::RedisCache;
use crate::storage::sql::SqlStore;
use crate::storage::traits::{ItemCache, ItemStore, RunStore};

impl SyncCoordinator {
    /// Open storage, build the source client and register jobs.
    ///
    /// Startup flow:
    /// 1. SQL store (required when a URL is configured; otherwise in-memory)
    /// 2. Redis cache (optional; falls back to in-memory on failure)
    /// 3. Breaker registry and resilient HTTP client
    /// 4. Jobs
    #[tracing::instrument(skip(config), fields(has_sql, has_redis))]
    pub async fn connect(config: ItemSyncConfig) -> Result<Self, SyncError> {
        let span = tracing::Span::current();
        span.record("has_sql", config.sql_url().is_some());
        span.record("has_redis", config.redis_url().is_some());

        let (items, runs): (Arc<dyn ItemStore>, Arc<dyn RunStore>) = match config.sql_url() {
            Some(url) => {
                info!("Connecting to SQL store...");
                let store = Arc::new(SqlStore::new(url).await?);
                info!(sqlite = store.is_sqlite(), "SQL store connected");
                (store.clone(), store)
            }
            None => {
                warn!("No SQL URL configured - items and runs are kept in memory only");
                let store = Arc::new(InMemoryStore::new());
                (store.clone(), store)
            }
        };

        let cache: Arc<dyn ItemCache> = match config.redis_url() {
            Some(url) => match RedisCache::with_prefix(url, config.redis_prefix.as_deref()).await {
                Ok(cache) => {
                    info!(prefix = ?config.redis_prefix, "Redis cache connected");
                    Arc::new(cache)
                }
                Err(e) => {
                    warn!(error = %e, "Failed to connect to Redis - using in-memory cache");
                    Arc::new(InMemoryCache::new())
                }
            },
            None => Arc::new(InMemoryCache::new()),
        };

        let breakers = Arc::new(CircuitBreakerManager::new(config.circuit_config()));
        let resilient = ResilientClient::new(Arc::clone(&breakers), Retrier::new(config.retry_config()));
        let mut client = HttpSourceClient::new(&config.http_client_config(), resilient)?;
        for (source, endpoint) in config.endpoints() {
            client = client.with_endpoint(source, endpoint);
        }

        let wants_weather = config.jobs.iter().any(|j| j.source == "openweather");
        if wants_weather && client.endpoint("openweather").is_some_and(|e| e.api_key.is_none()) {
            warn!("openweather job configured without http.openweather_api_key - its runs will fail");
        }

        let coordinator = Self::assemble(
            config,
            Components {
                items,
                runs,
                cache,
                client: Arc::new(client),
                breakers,
            },
        );
        coordinator.set_state(CoordinatorState::Ready);
        info!("Sync coordinator ready");
        Ok(coordinator)
    }

    /// Run the scheduler until `ctx` is cancelled or [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self, ctx: SyncContext) -> Result<(), SyncError> {
        self.set_state(CoordinatorState::Running);
        let result = self.scheduler.start(ctx).await;
        if self.state() == CoordinatorState::Running {
            self.set_state(CoordinatorState::Ready);
        }
        result
    }

    /// Run every job once and wait for all of them.
    pub async fn run_once(&self, ctx: &SyncContext) {
        self.set_state(CoordinatorState::Running);
        self.scheduler.run_once(ctx).await;
        self.set_state(CoordinatorState::Ready);
    }

    /// Stop the scheduler and wait for in-flight jobs.
    pub async fn shutdown(&self) {
        info!("Initiating sync coordinator shutdown...");
        self.set_state(CoordinatorState::ShuttingDown);
        self.scheduler.stop().await;
        self.set_state(CoordinatorState::Stopped);
        info!(breakers = ?self.breakers.snapshot(), "Sync coordinator shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobSettings;

    fn in_memory_config() -> ItemSyncConfig {
        ItemSyncConfig {
            sql_url: None,
            jobs: vec![JobSettings::new("pokemon-sync", "pokemon")],
            ..ItemSyncConfig::default()
        }
    }

    #[tokio::test]
    async fn test_connect_in_memory() {
        let coordinator = SyncCoordinator::connect(in_memory_config()).await.unwrap();

        assert_eq!(coordinator.state(), CoordinatorState::Ready);
        assert_eq!(coordinator.scheduler().job_count(), 1);
        assert!(coordinator.breakers().is_empty());
    }

    #[tokio::test]
    async fn test_connect_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("coordinator.db").display());
        let config = ItemSyncConfig {
            sql_url: Some(url),
            ..in_memory_config()
        };

        let coordinator = SyncCoordinator::connect(config).await.unwrap();

        assert_eq!(coordinator.items().count_by_source("pokemon").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_disabled_scheduler_run_returns() {
        let mut config = in_memory_config();
        config.scheduler.enabled = false;
        let coordinator = SyncCoordinator::connect(config).await.unwrap();

        coordinator.run(SyncContext::new()).await.unwrap();
        coordinator.shutdown().await;

        assert_eq!(coordinator.state(), CoordinatorState::Stopped);
    }
}
