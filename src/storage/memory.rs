// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use super::traits::{ItemCache, ItemStore, RunStore, StorageError};
use crate::item::{now_millis, ExternalId, ExternalRecord, StoredItem};
use crate::run_record::{RunRecord, RunUpdate};

/// DashMap-backed item and run store.
pub struct InMemoryStore {
    items: DashMap<(String, String), StoredItem>,
    runs: DashMap<i64, RunRecord>,
    next_item_id: AtomicI64,
    next_run_id: AtomicI64,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
            runs: DashMap::new(),
            next_item_id: AtomicI64::new(1),
            next_run_id: AtomicI64::new(1),
        }
    }

    /// Get current item count
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of run records
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Clear all items and runs
    pub fn clear(&self) {
        self.items.clear();
        self.runs.clear();
    }

    fn sorted_newest_first(&self, api_source: Option<&str>) -> Vec<StoredItem> {
        let mut items: Vec<StoredItem> = self
            .items
            .iter()
            .filter(|entry| api_source.map_or(true, |s| entry.value().api_source == s))
            .map(|entry| entry.value().clone())
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        items
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ItemStore for InMemoryStore {
    async fn upsert_with_hash(&self, api_source: &str, record: &ExternalRecord) -> Result<(), StorageError> {
        let hash = record.content_hash()?;
        let description = record.description();
        let now = now_millis();

        match self.items.entry((record.id.key(), api_source.to_string())) {
            Entry::Occupied(mut entry) => {
                let item = entry.get_mut();
                item.title = record.title.clone();
                item.description = description;
                if item.content_hash != hash {
                    item.attributes = record.attributes.clone();
                }
                item.content_hash = hash;
                item.sync_attempts = item.sync_attempts.saturating_add(1);
                item.last_sync_error = None;
                item.synced_at = now;
                item.updated_at = now;
            }
            Entry::Vacant(entry) => {
                entry.insert(StoredItem {
                    id: self.next_item_id.fetch_add(1, Ordering::Relaxed),
                    external_id: record.id.key(),
                    api_source: api_source.to_string(),
                    title: record.title.clone(),
                    description,
                    attributes: record.attributes.clone(),
                    content_hash: hash,
                    sync_attempts: 1,
                    last_sync_error: None,
                    synced_at: now,
                    created_at: now,
                    updated_at: now,
                });
            }
        }
        Ok(())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<StoredItem>, StorageError> {
        Ok(self
            .items
            .iter()
            .find(|entry| entry.value().id == id)
            .map(|entry| entry.value().clone()))
    }

    async fn find_by_external_id(
        &self,
        api_source: &str,
        external_id: &ExternalId,
    ) -> Result<Option<StoredItem>, StorageError> {
        let key = (external_id.key(), api_source.to_string());
        Ok(self.items.get(&key).map(|r| r.value().clone()))
    }

    async fn find_all(&self, limit: usize, offset: usize) -> Result<Vec<StoredItem>, StorageError> {
        Ok(self.sorted_newest_first(None).into_iter().skip(offset).take(limit).collect())
    }

    async fn find_by_source(
        &self,
        api_source: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredItem>, StorageError> {
        Ok(self
            .sorted_newest_first(Some(api_source))
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn count_by_source(&self, api_source: &str) -> Result<u64, StorageError> {
        Ok(self.items.iter().filter(|e| e.value().api_source == api_source).count() as u64)
    }
}

#[async_trait]
impl RunStore for InMemoryStore {
    async fn create_run(&self, job_name: &str, api_source: &str) -> Result<i64, StorageError> {
        let id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        self.runs.insert(id, RunRecord::started(id, job_name, api_source, now_millis()));
        Ok(id)
    }

    async fn update_run(&self, run_id: i64, update: &RunUpdate) -> Result<(), StorageError> {
        let mut record = self.runs.get_mut(&run_id).ok_or(StorageError::NotFound)?;
        record.apply(update, now_millis());
        Ok(())
    }

    async fn find_run(&self, run_id: i64) -> Result<Option<RunRecord>, StorageError> {
        Ok(self.runs.get(&run_id).map(|r| r.value().clone()))
    }

    async fn list_runs(&self, job_name: &str, limit: usize) -> Result<Vec<RunRecord>, StorageError> {
        let mut runs: Vec<RunRecord> = self
            .runs
            .iter()
            .filter(|e| e.value().job_name == job_name)
            .map(|e| e.value().clone())
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        runs.truncate(limit);
        Ok(runs)
    }
}

/// DashMap cache with per-entry expiry. Values are stored as JSON so the
/// behavior matches the Redis cache.
pub struct InMemoryCache {
    entries: DashMap<String, (String, Instant)>,
}

impl InMemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get_json(&self, key: &str) -> Option<String> {
        if let Some(entry) = self.entries.get(key) {
            if Instant::now() < entry.value().1 {
                return Some(entry.value().0.clone());
            }
        }
        self.evict_expired(key);
        None
    }

    /// Remove `key` only if it is still expired under the shard lock, so a
    /// fresh value written since the read survives.
    fn evict_expired(&self, key: &str) -> bool {
        self.entries
            .remove_if(key, |_, (_, expires_at)| Instant::now() >= *expires_at)
            .is_some()
    }

    fn set_json(&self, key: &str, json: String, ttl: Duration) {
        self.entries.insert(key.to_string(), (json, Instant::now() + ttl));
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ItemCache for InMemoryCache {
    async fn get_items(&self, key: &str) -> Result<Option<Vec<StoredItem>>, StorageError> {
        self.get_json(key)
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(StorageError::from)
    }

    async fn set_items(&self, key: &str, items: &[StoredItem], ttl: Duration) -> Result<(), StorageError> {
        self.set_json(key, serde_json::to_string(items)?, ttl);
        Ok(())
    }

    async fn get_item(&self, key: &str) -> Result<Option<StoredItem>, StorageError> {
        self.get_json(key)
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(StorageError::from)
    }

    async fn set_item(&self, key: &str, item: &StoredItem, ttl: Duration) -> Result<(), StorageError> {
        self.set_json(key, serde_json::to_string(item)?, ttl);
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }
}
