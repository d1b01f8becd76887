// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::item::{ExternalId, ExternalRecord, StoredItem};
use crate::run_record::{RunRecord, RunUpdate};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Item not found")]
    NotFound,
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Items keyed by `(external_id, api_source)`.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Insert or update `record` in one atomic statement.
    ///
    /// Title and description always refresh. The attribute bag refreshes only
    /// when the content hash differs from the stored one. `sync_attempts`
    /// starts at 1 and grows by one per call.
    async fn upsert_with_hash(&self, api_source: &str, record: &ExternalRecord) -> Result<(), StorageError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<StoredItem>, StorageError>;

    async fn find_by_external_id(
        &self,
        api_source: &str,
        external_id: &ExternalId,
    ) -> Result<Option<StoredItem>, StorageError>;

    /// Newest first.
    async fn find_all(&self, limit: usize, offset: usize) -> Result<Vec<StoredItem>, StorageError>;

    /// Newest first, restricted to one source.
    async fn find_by_source(
        &self,
        api_source: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredItem>, StorageError>;

    async fn count_by_source(&self, api_source: &str) -> Result<u64, StorageError>;
}

/// Run records (`sync_jobs` table).
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Create a record in `running` state and return its id.
    async fn create_run(&self, job_name: &str, api_source: &str) -> Result<i64, StorageError>;

    async fn update_run(&self, run_id: i64, update: &RunUpdate) -> Result<(), StorageError>;

    async fn find_run(&self, run_id: i64) -> Result<Option<RunRecord>, StorageError>;

    /// Most recent runs of `job_name`, newest first.
    async fn list_runs(&self, job_name: &str, limit: usize) -> Result<Vec<RunRecord>, StorageError>;
}

/// Read-through cache for the query side.
#[async_trait]
pub trait ItemCache: Send + Sync {
    async fn get_items(&self, key: &str) -> Result<Option<Vec<StoredItem>>, StorageError>;
    async fn set_items(&self, key: &str, items: &[StoredItem], ttl: Duration) -> Result<(), StorageError>;
    async fn get_item(&self, key: &str) -> Result<Option<StoredItem>, StorageError>;
    async fn set_item(&self, key: &str, item: &StoredItem, ttl: Duration) -> Result<(), StorageError>;
    async fn invalidate(&self, key: &str) -> Result<(), StorageError>;
}

/// Cache key for a page of items
#[must_use]
pub fn items_page_key(api_source: Option<&str>, limit: usize, offset: usize) -> String {
    match api_source {
        Some(source) => format!("items:{source}:{limit}:{offset}"),
        None => format!("items:all:{limit}:{offset}"),
    }
}

/// Cache key for one item by internal id
#[must_use]
pub fn item_key(id: i64) -> String {
    format!("item:{id}")
}
