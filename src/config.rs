// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the sync service.
//!
//! Every field has a default, so an empty file (or none at all) is a valid
//! configuration. Sources, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. environment variables prefixed `ITEM_SYNC`, `__` between path segments
//!    (`ITEM_SYNC__SCHEDULER__ENABLED=false`, `ITEM_SYNC__HTTP__OPENWEATHER_API_KEY=...`)
//!
//! # Example
//!
//! ```
//! use item_sync::ItemSyncConfig;
//!
//! let config = ItemSyncConfig::default();
//! assert_eq!(config.scheduler.sync_interval_secs, 900);
//! assert_eq!(config.retry.max_retries, 5);
//! assert_eq!(config.jobs.len(), 2);
//! ```

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::SyncError;
use crate::resilience::circuit_breaker::CircuitConfig;
use crate::resilience::retry::RetryConfig;
use crate::scheduler::SchedulerConfig;
use crate::source::catalog::{self, SourceEndpoint};
use crate::source::http::HttpClientConfig;
use crate::source::FetchParams;

pub const ENV_PREFIX: &str = "ITEM_SYNC";

#[derive(Debug, Clone, Deserialize)]
pub struct ItemSyncConfig {
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub http: HttpSettings,

    /// SQL connection string (`sqlite://...` or `mysql://...`). Empty or
    /// absent keeps items in memory.
    #[serde(default = "default_sql_url")]
    pub sql_url: Option<String>,

    /// Redis connection string for the query cache
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Key prefix for the Redis cache
    #[serde(default)]
    pub redis_prefix: Option<String>,

    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_jobs")]
    pub jobs: Vec<JobSettings>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Consecutive failures that open a circuit
    #[serde(default = "default_circuit_threshold")]
    pub circuit_threshold: u32,
    /// Seconds an open circuit waits before admitting a probe
    #[serde(default = "default_circuit_timeout_secs")]
    pub circuit_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_pool_idle_timeout_secs")]
    pub pool_idle_timeout_secs: u64,
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
    #[serde(default)]
    pub openweather_api_key: Option<String>,
    #[serde(default)]
    pub pokemon_base_url: Option<String>,
    #[serde(default)]
    pub openweather_base_url: Option<String>,
}

/// One scheduled sync job.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobSettings {
    pub name: String,
    /// Catalog source name (`pokemon`, `openweather`)
    pub source: String,
    #[serde(default)]
    pub params: FetchParams,
}

impl JobSettings {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            params: FetchParams::new(),
        }
    }
}

fn default_true() -> bool { true }
fn default_sync_interval_secs() -> u64 { 15 * 60 }
fn default_job_timeout_secs() -> u64 { 10 * 60 }
fn default_max_retries() -> u32 { 5 }
fn default_initial_delay_ms() -> u64 { 1000 }
fn default_max_delay_ms() -> u64 { 30_000 }
fn default_backoff_factor() -> f64 { 2.0 }
fn default_circuit_threshold() -> u32 { 5 }
fn default_circuit_timeout_secs() -> u64 { 60 }
fn default_http_timeout_secs() -> u64 { 30 }
fn default_pool_idle_timeout_secs() -> u64 { 30 }
fn default_pool_max_idle_per_host() -> usize { 10 }
fn default_sql_url() -> Option<String> { Some("sqlite://item_sync.db?mode=rwc".to_string()) }
fn default_log_level() -> String { "info".to_string() }

fn default_jobs() -> Vec<JobSettings> {
    vec![
        JobSettings::new("pokemon-sync", "pokemon"),
        JobSettings::new("openweather-sync", "openweather"),
    ]
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            sync_interval_secs: default_sync_interval_secs(),
            job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            circuit_threshold: default_circuit_threshold(),
            circuit_timeout_secs: default_circuit_timeout_secs(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
            pool_idle_timeout_secs: default_pool_idle_timeout_secs(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            openweather_api_key: None,
            pokemon_base_url: None,
            openweather_base_url: None,
        }
    }
}

impl Default for ItemSyncConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerSettings::default(),
            retry: RetrySettings::default(),
            http: HttpSettings::default(),
            sql_url: default_sql_url(),
            redis_url: None,
            redis_prefix: None,
            log_level: default_log_level(),
            log_json: false,
            jobs: default_jobs(),
        }
    }
}

impl ItemSyncConfig {
    /// Load defaults, then `path` (if given), then `ITEM_SYNC__*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, SyncError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or spin the scheduler.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.scheduler.sync_interval_secs == 0 {
            return Err(SyncError::Config("scheduler.sync_interval_secs must be greater than 0".into()));
        }
        if self.scheduler.job_timeout_secs == 0 {
            return Err(SyncError::Config("scheduler.job_timeout_secs must be greater than 0".into()));
        }
        if !(self.retry.backoff_factor.is_finite() && self.retry.backoff_factor >= 1.0) {
            return Err(SyncError::Config("retry.backoff_factor must be at least 1.0".into()));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(SyncError::Config("retry.initial_delay_ms cannot exceed retry.max_delay_ms".into()));
        }
        if self.retry.circuit_threshold == 0 {
            return Err(SyncError::Config("retry.circuit_threshold must be greater than 0".into()));
        }

        let mut names = std::collections::HashSet::new();
        for job in &self.jobs {
            if job.name.trim().is_empty() {
                return Err(SyncError::Config("job name cannot be empty".into()));
            }
            if !names.insert(job.name.as_str()) {
                return Err(SyncError::Config(format!("duplicate job name '{}'", job.name)));
            }
        }
        Ok(())
    }

    /// The SQL URL, treating an empty string as unset.
    #[must_use]
    pub fn sql_url(&self) -> Option<&str> {
        self.sql_url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }

    #[must_use]
    pub fn redis_url(&self) -> Option<&str> {
        self.redis_url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }

    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            enabled: self.scheduler.enabled,
            sync_interval: Duration::from_secs(self.scheduler.sync_interval_secs),
            job_timeout: Duration::from_secs(self.scheduler.job_timeout_secs),
        }
    }

    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.retry.max_retries,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            factor: self.retry.backoff_factor,
        }
    }

    #[must_use]
    pub fn circuit_config(&self) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: self.retry.circuit_threshold,
            recovery_timeout: Duration::from_secs(self.retry.circuit_timeout_secs),
        }
    }

    #[must_use]
    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http.timeout_secs),
            pool_idle_timeout: Duration::from_secs(self.http.pool_idle_timeout_secs),
            pool_max_idle_per_host: self.http.pool_max_idle_per_host,
            ..HttpClientConfig::default()
        }
    }

    /// Endpoint per built-in source, with configured base URLs and keys applied.
    #[must_use]
    pub fn endpoints(&self) -> Vec<(String, SourceEndpoint)> {
        catalog::profiles()
            .iter()
            .map(|profile| {
                let mut endpoint = profile.default_endpoint();
                match profile.name {
                    "pokemon" => {
                        if let Some(url) = &self.http.pokemon_base_url {
                            endpoint.base_url = url.trim_end_matches('/').to_string();
                        }
                    }
                    "openweather" => {
                        if let Some(url) = &self.http.openweather_base_url {
                            endpoint.base_url = url.trim_end_matches('/').to_string();
                        }
                        endpoint = endpoint.with_api_key(self.http.openweather_api_key.clone());
                    }
                    _ => {}
                }
                (profile.name.to_string(), endpoint)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ItemSyncConfig::default();
        assert!(config.scheduler.enabled);
        assert_eq!(config.sql_url(), Some("sqlite://item_sync.db?mode=rwc"));
        assert!(config.redis_url().is_none());
        assert_eq!(config.log_level, "info");
        assert_eq!(
            config.jobs.iter().map(|j| j.source.as_str()).collect::<Vec<_>>(),
            vec!["pokemon", "openweather"]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_converters() {
        let config = ItemSyncConfig::default();

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.sync_interval, Duration::from_secs(900));
        assert_eq!(scheduler.job_timeout, Duration::from_secs(600));

        assert_eq!(config.retry_config(), RetryConfig::default());

        let circuit = config.circuit_config();
        assert_eq!(circuit.failure_threshold, 5);
        assert_eq!(circuit.recovery_timeout, Duration::from_secs(60));

        assert_eq!(config.http_client_config().timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("item-sync.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
sql_url = ""
log_json = true

[scheduler]
sync_interval_secs = 60

[retry]
max_retries = 2
circuit_threshold = 3

[http]
openweather_api_key = "secret"
pokemon_base_url = "http://localhost:8080/api/v2/"

[[jobs]]
name = "pokemon-first-page"
source = "pokemon"
params = {{ limit = 50 }}
"#
        )
        .unwrap();

        let config = ItemSyncConfig::load(Some(&path)).unwrap();

        assert!(config.sql_url().is_none());
        assert!(config.log_json);
        assert_eq!(config.scheduler.sync_interval_secs, 60);
        assert_eq!(config.scheduler.job_timeout_secs, 600);
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.circuit_config().failure_threshold, 3);
        assert_eq!(config.jobs.len(), 1);
        assert_eq!(crate::source::param_u64(&config.jobs[0].params, "limit"), Some(50));

        let endpoints: std::collections::HashMap<_, _> = config.endpoints().into_iter().collect();
        assert_eq!(endpoints["pokemon"].base_url, "http://localhost:8080/api/v2");
        assert_eq!(endpoints["openweather"].api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ItemSyncConfig::default();
        config.scheduler.sync_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ItemSyncConfig::default();
        config.retry.backoff_factor = 0.5;
        assert!(config.validate().is_err());

        let mut config = ItemSyncConfig::default();
        config.jobs.push(JobSettings::new("pokemon-sync", "pokemon"));
        assert!(matches!(config.validate(), Err(SyncError::Config(msg)) if msg.contains("duplicate")));
    }

    #[test]
    fn test_blank_api_key_is_unset() {
        let mut config = ItemSyncConfig::default();
        config.http.openweather_api_key = Some("   ".into());
        let endpoints: std::collections::HashMap<_, _> = config.endpoints().into_iter().collect();
        assert!(endpoints["openweather"].api_key.is_none());
    }
}
