// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis cache for the query side.
//!
//! Values are JSON strings written with `SET key value EX ttl`, so expiry is
//! Redis' job. Keys may carry a prefix for namespacing when the instance is
//! shared with other applications.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::traits::{ItemCache, StorageError};
use crate::item::StoredItem;
use crate::resilience::retry::{retry, RetryConfig};

pub struct RedisCache {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g., "item-sync:" → "item-sync:item:42")
    prefix: String,
}

impl RedisCache {
    /// Connect without a key prefix.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        Self::with_prefix(connection_string, None).await
    }

    /// Connect with an optional key prefix.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use item_sync::storage::redis::RedisCache;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let cache = RedisCache::with_prefix("redis://localhost", Some("item-sync:")).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_prefix(connection_string: &str, prefix: Option<&str>) -> Result<Self, StorageError> {
        let client = Client::open(connection_string).map_err(|e| StorageError::Backend(e.to_string()))?;

        // Use startup config: fast-fail, don't hang forever
        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))?;

        Ok(Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
        })
    }

    /// Apply the prefix to a key.
    #[inline]
    fn prefixed_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    /// Get the configured prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let mut conn = self.connection.clone();
        let data: Option<String> = conn
            .get(self.prefixed_key(key))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        data.map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(StorageError::from)
    }

    async fn set_json(&self, key: &str, json: String, ttl: Duration) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        // EX 0 is rejected by Redis
        let seconds = ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(self.prefixed_key(key), json, seconds)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ItemCache for RedisCache {
    async fn get_items(&self, key: &str) -> Result<Option<Vec<StoredItem>>, StorageError> {
        self.get_json(key).await
    }

    async fn set_items(&self, key: &str, items: &[StoredItem], ttl: Duration) -> Result<(), StorageError> {
        self.set_json(key, serde_json::to_string(items)?, ttl).await
    }

    async fn get_item(&self, key: &str) -> Result<Option<StoredItem>, StorageError> {
        self.get_json(key).await
    }

    async fn set_item(&self, key: &str, item: &StoredItem, ttl: Duration) -> Result<(), StorageError> {
        self.set_json(key, serde_json::to_string(item)?, ttl).await
    }

    async fn invalidate(&self, key: &str) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .del(self.prefixed_key(key))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}
