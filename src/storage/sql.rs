// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL storage backend for items and run records.
//!
//! Schema:
//! ```sql
//! CREATE TABLE items (
//!   id BIGINT PRIMARY KEY AUTO_INCREMENT,
//!   external_id VARCHAR(255) NOT NULL,
//!   api_source VARCHAR(64) NOT NULL,
//!   title TEXT NOT NULL,
//!   description TEXT NOT NULL,
//!   extend_info LONGTEXT,        -- attribute bag as JSON text
//!   content_hash VARCHAR(64) NOT NULL,
//!   sync_attempts BIGINT NOT NULL,
//!   last_sync_error TEXT,
//!   last_synced_at BIGINT NOT NULL,
//!   created_at BIGINT NOT NULL,
//!   updated_at BIGINT NOT NULL,
//!   UNIQUE (external_id, api_source)
//! )
//!
//! CREATE TABLE sync_jobs (
//!   id BIGINT PRIMARY KEY AUTO_INCREMENT,
//!   job_name, api_source, status, started_at, completed_at,
//!   items_processed, items_succeeded, items_failed,
//!   error_message, execution_time_ms
//! )
//! ```
//!
//! Timestamps are epoch millis.
//!
//! ## sqlx Any Driver Quirks
//!
//! We use TEXT instead of native JSON type because sqlx's `Any` driver:
//! 1. Doesn't support MySQL's JSON type mapping
//! 2. Treats LONGTEXT/TEXT as BLOB (requires reading as `Vec<u8>` then converting)

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use std::sync::Once;
use std::time::Duration;
use tracing::{debug, info};

use super::traits::{ItemStore, RunStore, StorageError};
use crate::item::{now_millis, Attributes, ExternalId, ExternalRecord, StoredItem};
use crate::resilience::retry::{retry, RetryConfig};
use crate::run_record::{RunCounts, RunRecord, RunStatus, RunUpdate};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

const ITEM_COLUMNS: &str = "id, external_id, api_source, title, description, extend_info, content_hash, \
     sync_attempts, last_sync_error, last_synced_at, created_at, updated_at";

const RUN_COLUMNS: &str = "id, job_name, api_source, status, started_at, completed_at, items_processed, \
     items_succeeded, items_failed, error_message, execution_time_ms";

const SQLITE_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        external_id TEXT NOT NULL,
        api_source TEXT NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        extend_info TEXT,
        content_hash TEXT NOT NULL,
        sync_attempts INTEGER NOT NULL DEFAULT 1,
        last_sync_error TEXT,
        last_synced_at INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE (external_id, api_source)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_items_api_source ON items (api_source)",
    "CREATE INDEX IF NOT EXISTS idx_items_created_at ON items (created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS sync_jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_name TEXT NOT NULL,
        api_source TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at INTEGER NOT NULL,
        completed_at INTEGER,
        items_processed INTEGER NOT NULL DEFAULT 0,
        items_succeeded INTEGER NOT NULL DEFAULT 0,
        items_failed INTEGER NOT NULL DEFAULT 0,
        error_message TEXT,
        execution_time_ms INTEGER
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sync_jobs_job_name ON sync_jobs (job_name)",
];

// MySQL - use LONGTEXT for JSON (sqlx Any driver doesn't support native JSON)
const MYSQL_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS items (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        external_id VARCHAR(255) NOT NULL,
        api_source VARCHAR(64) NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        extend_info LONGTEXT,
        content_hash VARCHAR(64) NOT NULL,
        sync_attempts BIGINT NOT NULL DEFAULT 1,
        last_sync_error TEXT,
        last_synced_at BIGINT NOT NULL,
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL,
        UNIQUE KEY uk_external_source (external_id, api_source),
        INDEX idx_api_source (api_source),
        INDEX idx_created_at (created_at)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_jobs (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        job_name VARCHAR(255) NOT NULL,
        api_source VARCHAR(64) NOT NULL,
        status VARCHAR(16) NOT NULL,
        started_at BIGINT NOT NULL,
        completed_at BIGINT,
        items_processed BIGINT NOT NULL DEFAULT 0,
        items_succeeded BIGINT NOT NULL DEFAULT 0,
        items_failed BIGINT NOT NULL DEFAULT 0,
        error_message TEXT,
        execution_time_ms BIGINT,
        INDEX idx_job_name (job_name)
    )
    "#,
];

// The stored hash is compared against the incoming one before it is overwritten,
// so the attribute bag only changes when the content did.
const SQLITE_UPSERT: &str = r#"
    INSERT INTO items (external_id, api_source, title, description, extend_info, content_hash,
                       sync_attempts, last_sync_error, last_synced_at, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, 1, NULL, ?, ?, ?)
    ON CONFLICT(external_id, api_source) DO UPDATE SET
        title = excluded.title,
        description = excluded.description,
        extend_info = CASE WHEN items.content_hash <> excluded.content_hash
                           THEN excluded.extend_info ELSE items.extend_info END,
        content_hash = excluded.content_hash,
        sync_attempts = items.sync_attempts + 1,
        last_sync_error = NULL,
        last_synced_at = excluded.last_synced_at,
        updated_at = excluded.updated_at
"#;

// MySQL evaluates assignments left to right, so extend_info must be set
// before content_hash is overwritten.
const MYSQL_UPSERT: &str = r#"
    INSERT INTO items (external_id, api_source, title, description, extend_info, content_hash,
                       sync_attempts, last_sync_error, last_synced_at, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, 1, NULL, ?, ?, ?)
    ON DUPLICATE KEY UPDATE
        title = VALUES(title),
        description = VALUES(description),
        extend_info = IF(content_hash <> VALUES(content_hash), VALUES(extend_info), extend_info),
        content_hash = VALUES(content_hash),
        sync_attempts = sync_attempts + 1,
        last_sync_error = NULL,
        last_synced_at = VALUES(last_synced_at),
        updated_at = VALUES(updated_at)
"#;

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// Read a text column, falling back to bytes (MySQL LONGTEXT via Any)
fn get_text(row: &AnyRow, column: &str) -> Option<String> {
    row.try_get::<Option<String>, _>(column)
        .ok()
        .flatten()
        .or_else(|| {
            row.try_get::<Option<Vec<u8>>, _>(column)
                .ok()
                .flatten()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
}

fn item_from_row(row: &AnyRow) -> Result<StoredItem, StorageError> {
    let attributes = match get_text(row, "extend_info") {
        Some(json) if !json.trim().is_empty() => serde_json::from_str::<Attributes>(&json)?,
        _ => Attributes::new(),
    };

    Ok(StoredItem {
        id: row.try_get("id").map_err(backend)?,
        external_id: get_text(row, "external_id").unwrap_or_default(),
        api_source: get_text(row, "api_source").unwrap_or_default(),
        title: get_text(row, "title").unwrap_or_default(),
        description: get_text(row, "description").unwrap_or_default(),
        attributes,
        content_hash: get_text(row, "content_hash").unwrap_or_default(),
        sync_attempts: row.try_get::<i64, _>("sync_attempts").map_err(backend)?.max(0) as u32,
        last_sync_error: get_text(row, "last_sync_error"),
        synced_at: row.try_get("last_synced_at").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
        updated_at: row.try_get("updated_at").map_err(backend)?,
    })
}

fn run_from_row(row: &AnyRow) -> Result<RunRecord, StorageError> {
    let status_text = get_text(row, "status").unwrap_or_default();
    let status: RunStatus = status_text.parse().map_err(StorageError::Serialization)?;
    let count = |column: &str| -> Result<u64, StorageError> {
        Ok(row.try_get::<i64, _>(column).map_err(backend)?.max(0) as u64)
    };

    Ok(RunRecord {
        id: row.try_get("id").map_err(backend)?,
        job_name: get_text(row, "job_name").unwrap_or_default(),
        api_source: get_text(row, "api_source").unwrap_or_default(),
        status,
        started_at: row.try_get("started_at").map_err(backend)?,
        completed_at: row.try_get::<Option<i64>, _>("completed_at").map_err(backend)?,
        counts: RunCounts {
            processed: count("items_processed")?,
            succeeded: count("items_succeeded")?,
            failed: count("items_failed")?,
        },
        error_message: get_text(row, "error_message"),
        execution_time_ms: row.try_get::<Option<i64>, _>("execution_time_ms").map_err(backend)?,
    })
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub struct SqlStore {
    pool: AnyPool,
    is_sqlite: bool,
}

impl SqlStore {
    /// Create a new SQL store with startup-mode retry (fails fast if config is wrong).
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(if is_sqlite { 5 } else { 20 })
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(backend)
        })
        .await?;

        let store = Self { pool, is_sqlite };

        // Enable WAL mode for SQLite (better concurrency, faster writes)
        if is_sqlite {
            store.enable_wal_mode().await?;
        }

        store.init_schema().await?;
        info!(sqlite = is_sqlite, "SQL store ready");
        Ok(store)
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    #[must_use]
    pub fn is_sqlite(&self) -> bool {
        self.is_sqlite
    }

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let statements = if self.is_sqlite { SQLITE_SCHEMA } else { MYSQL_SCHEMA };

        for sql in statements {
            retry("sql_init_schema", &RetryConfig::startup(), || async {
                sqlx::query(sql).execute(&self.pool).await.map_err(backend)
            })
            .await?;
        }

        Ok(())
    }

    async fn fetch_items(&self, sql: &str, binds: ItemQuery<'_>) -> Result<Vec<StoredItem>, StorageError> {
        let rows = retry("sql_find_items", &RetryConfig::query(), || async {
            let query = sqlx::query(sql);
            let query = match binds {
                ItemQuery::Page { limit, offset } => query.bind(limit).bind(offset),
                ItemQuery::SourcePage { api_source, limit, offset } => {
                    query.bind(api_source).bind(limit).bind(offset)
                }
            };
            query.fetch_all(&self.pool).await.map_err(backend)
        })
        .await?;

        rows.iter().map(item_from_row).collect()
    }
}

#[derive(Clone, Copy)]
enum ItemQuery<'a> {
    Page { limit: i64, offset: i64 },
    SourcePage { api_source: &'a str, limit: i64, offset: i64 },
}

#[async_trait]
impl ItemStore for SqlStore {
    async fn upsert_with_hash(&self, api_source: &str, record: &ExternalRecord) -> Result<(), StorageError> {
        let attributes_json = record.attributes_json()?;
        let hash = crate::item::content_hash(&record.title, &attributes_json);
        let external_id = record.id.key();
        let now = now_millis();

        let sql = if self.is_sqlite { SQLITE_UPSERT } else { MYSQL_UPSERT };

        // Not retried: a retry after an unseen commit would count the attempt twice
        sqlx::query(sql)
            .bind(&external_id)
            .bind(api_source)
            .bind(&record.title)
            .bind(record.description())
            .bind(&attributes_json)
            .bind(&hash)
            .bind(now)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        debug!(api_source, external_id = %external_id, hash = %hash, "Upserted item");
        Ok(())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<StoredItem>, StorageError> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?");
        let row = retry("sql_find_item", &RetryConfig::query(), || async {
            sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await.map_err(backend)
        })
        .await?;

        row.as_ref().map(item_from_row).transpose()
    }

    async fn find_by_external_id(
        &self,
        api_source: &str,
        external_id: &ExternalId,
    ) -> Result<Option<StoredItem>, StorageError> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE external_id = ? AND api_source = ?");
        let external_id = external_id.key();
        let row = retry("sql_find_item", &RetryConfig::query(), || async {
            sqlx::query(&sql)
                .bind(&external_id)
                .bind(api_source)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;

        row.as_ref().map(item_from_row).transpose()
    }

    async fn find_all(&self, limit: usize, offset: usize) -> Result<Vec<StoredItem>, StorageError> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?");
        self.fetch_items(
            &sql,
            ItemQuery::Page {
                limit: to_i64(limit),
                offset: to_i64(offset),
            },
        )
        .await
    }

    async fn find_by_source(
        &self,
        api_source: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredItem>, StorageError> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE api_source = ? ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        );
        self.fetch_items(
            &sql,
            ItemQuery::SourcePage {
                api_source,
                limit: to_i64(limit),
                offset: to_i64(offset),
            },
        )
        .await
    }

    async fn count_by_source(&self, api_source: &str) -> Result<u64, StorageError> {
        let row = retry("sql_count", &RetryConfig::query(), || async {
            sqlx::query("SELECT COUNT(*) AS total FROM items WHERE api_source = ?")
                .bind(api_source)
                .fetch_one(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;

        let total: i64 = row.try_get("total").map_err(backend)?;
        Ok(total.max(0) as u64)
    }
}

#[async_trait]
impl RunStore for SqlStore {
    async fn create_run(&self, job_name: &str, api_source: &str) -> Result<i64, StorageError> {
        let result = sqlx::query(
            "INSERT INTO sync_jobs (job_name, api_source, status, started_at) VALUES (?, ?, ?, ?)",
        )
        .bind(job_name)
        .bind(api_source)
        .bind(RunStatus::Running.as_str())
        .bind(now_millis())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        result
            .last_insert_id()
            .ok_or_else(|| StorageError::Backend("driver did not report the new run id".to_string()))
    }

    async fn update_run(&self, run_id: i64, update: &RunUpdate) -> Result<(), StorageError> {
        let to_db = |n: u64| i64::try_from(n).unwrap_or(i64::MAX);

        let result = sqlx::query(
            "UPDATE sync_jobs SET status = ?, completed_at = ?, items_processed = ?, items_succeeded = ?, \
             items_failed = ?, error_message = ?, execution_time_ms = ? WHERE id = ?",
        )
        .bind(update.status.as_str())
        .bind(now_millis())
        .bind(to_db(update.counts.processed))
        .bind(to_db(update.counts.succeeded))
        .bind(to_db(update.counts.failed))
        .bind(update.error_message.clone())
        .bind(update.execution_time_ms())
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn find_run(&self, run_id: i64) -> Result<Option<RunRecord>, StorageError> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM sync_jobs WHERE id = ?");
        let row = retry("sql_find_run", &RetryConfig::query(), || async {
            sqlx::query(&sql).bind(run_id).fetch_optional(&self.pool).await.map_err(backend)
        })
        .await?;

        row.as_ref().map(run_from_row).transpose()
    }

    async fn list_runs(&self, job_name: &str, limit: usize) -> Result<Vec<RunRecord>, StorageError> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM sync_jobs WHERE job_name = ? ORDER BY started_at DESC, id DESC LIMIT ?");
        let limit = to_i64(limit);
        let rows = retry("sql_list_runs", &RetryConfig::query(), || async {
            sqlx::query(&sql)
                .bind(job_name)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;

        rows.iter().map(run_from_row).collect()
    }
}
