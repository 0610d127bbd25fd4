// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL backend for the local persistent tier.
//!
//! SQLite (via sqlx's `Any` driver) keyed by `key`, surviving process
//! restarts. One row per item:
//!
//! ```sql
//! CREATE TABLE items (
//!   key TEXT PRIMARY KEY,
//!   value BLOB NOT NULL,
//!   data_tier INTEGER NOT NULL,  -- 0 transient, 1 staging, 2 archive
//!   ttl_ms INTEGER,              -- NULL = no expiry
//!   timestamp INTEGER NOT NULL,  -- epoch millis of last write
//!   access_count INTEGER,
//!   last_accessed INTEGER,
//!   checksum TEXT NOT NULL
//! )
//! ```
//!
//! ## sqlx Any Driver Quirks
//!
//! The `Any` driver has no Option binding for nullable integers across
//! backends, so `ttl_ms` is stored as -1 for "no TTL" and mapped back
//! on read.

use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{any::AnyPoolOptions, AnyPool, Row};

use super::traits::{BackendAdapter, KeyPage, StorageError};
use crate::pattern::glob_match;
use crate::resilience::retry::{retry, RetryConfig};
use crate::stored_item::{now_ms, DataTier, StoredItem};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

pub struct LocalStore {
    pool: AnyPool,
    scan_page_size: usize,
}

impl LocalStore {
    /// Create a new local store with startup-mode retry (fails fast if
    /// the path is unusable).
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        let pool = retry("local_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(8)
                .acquire_timeout(Duration::from_secs(10))
                .connect(connection_string)
                .await
                .map_err(|e| StorageError::Init(e.to_string()))
        })
        .await?;

        let store = Self {
            pool,
            scan_page_size: 500,
        };
        store.enable_wal_mode().await?;
        store.init_schema().await?;
        Ok(store)
    }

    /// Enable WAL journal mode: concurrent reads during writes and a
    /// single fsync per commit. NORMAL synchronous is safe under WAL.
    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Init(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Init(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let sql = r#"
            CREATE TABLE IF NOT EXISTS items (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                data_tier INTEGER NOT NULL DEFAULT 1,
                ttl_ms INTEGER NOT NULL DEFAULT -1,
                timestamp INTEGER NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0,
                last_accessed INTEGER NOT NULL DEFAULT 0,
                checksum TEXT NOT NULL
            )
            "#;

        retry("local_init_schema", &RetryConfig::startup(), || async {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Init(e.to_string()))
        })
        .await?;

        Ok(())
    }

    fn row_to_item(row: &sqlx::any::AnyRow) -> Result<StoredItem, StorageError> {
        let key: String = row
            .try_get("key")
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        let value: Vec<u8> = row
            .try_get("value")
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        let data_tier: i64 = row.try_get("data_tier").unwrap_or(1);
        let ttl_ms: i64 = row.try_get("ttl_ms").unwrap_or(-1);
        let timestamp: i64 = row.try_get("timestamp").unwrap_or(0);
        let access_count: i64 = row.try_get("access_count").unwrap_or(0);
        let last_accessed: i64 = row.try_get("last_accessed").unwrap_or(0);
        let checksum: String = row
            .try_get("checksum")
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;

        let data_tier = DataTier::from_u8(data_tier as u8).ok_or_else(|| StorageError::Corrupt {
            key: key.clone(),
            expected: "data_tier in 0..=2".to_string(),
            actual: data_tier.to_string(),
        })?;

        Ok(StoredItem {
            key,
            value,
            data_tier,
            ttl_ms: if ttl_ms >= 0 { Some(ttl_ms as u64) } else { None },
            timestamp,
            last_accessed: last_accessed.max(0) as u64,
            access_count: access_count.max(0) as u64,
            checksum,
        })
    }
}

#[async_trait]
impl BackendAdapter for LocalStore {
    async fn get(&self, key: &str) -> Result<Option<StoredItem>, StorageError> {
        let row = retry("local_get", &RetryConfig::query(), || async {
            sqlx::query("SELECT key, value, data_tier, ttl_ms, timestamp, access_count, last_accessed, checksum FROM items WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::Unavailable(e.to_string()))
        })
        .await?;

        let Some(row) = row else { return Ok(None) };
        let mut item = Self::row_to_item(&row)?;

        // Best-effort access stats; a failed bump doesn't fail the read
        item.access_count += 1;
        item.last_accessed = now_ms() as u64;
        let _ = sqlx::query(
            "UPDATE items SET access_count = access_count + 1, last_accessed = $1 WHERE key = $2",
        )
        .bind(item.last_accessed as i64)
        .bind(key)
        .execute(&self.pool)
        .await;

        Ok(Some(item))
    }

    async fn set(&self, item: &StoredItem) -> Result<(), StorageError> {
        let ttl: i64 = item.ttl_ms.map_or(-1, |t| t as i64);

        retry("local_set", &RetryConfig::query(), || async {
            sqlx::query(
                r#"
                INSERT INTO items (key, value, data_tier, ttl_ms, timestamp, access_count, last_accessed, checksum)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    data_tier = excluded.data_tier,
                    ttl_ms = excluded.ttl_ms,
                    timestamp = excluded.timestamp,
                    checksum = excluded.checksum
                "#,
            )
            .bind(&item.key)
            .bind(&item.value)
            .bind(item.data_tier.as_u8() as i64)
            .bind(ttl)
            .bind(item.timestamp)
            .bind(item.access_count as i64)
            .bind(item.last_accessed as i64)
            .bind(&item.checksum)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))
        })
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        retry("local_delete", &RetryConfig::query(), || async {
            sqlx::query("DELETE FROM items WHERE key = $1")
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Unavailable(e.to_string()))
        })
        .await?;
        Ok(())
    }

    async fn clear(&self, pattern: Option<&str>) -> Result<u64, StorageError> {
        // Incremental: keyset-cursor walk with bounded delete batches so
        // a large clear never holds a long write transaction
        let mut removed = 0u64;
        let mut last_key = String::new();

        loop {
            let after = last_key.clone();
            let rows = retry("local_clear_scan", &RetryConfig::query(), || {
                let after = after.clone();
                async move {
                    sqlx::query("SELECT key FROM items WHERE key > $1 ORDER BY key LIMIT $2")
                        .bind(after)
                        .bind(self.scan_page_size as i64)
                        .fetch_all(&self.pool)
                        .await
                        .map_err(|e| StorageError::Unavailable(e.to_string()))
                }
            })
            .await?;

            if rows.is_empty() {
                break;
            }

            for row in &rows {
                let key: String = row
                    .try_get("key")
                    .map_err(|e| StorageError::Unavailable(e.to_string()))?;
                if pattern.map_or(true, |p| glob_match(p, &key)) {
                    self.delete(&key).await?;
                    removed += 1;
                }
                last_key = key;
            }

            if rows.len() < self.scan_page_size {
                break;
            }
        }

        Ok(removed)
    }

    async fn scan_keys(&self, cursor: u64, limit: usize) -> Result<KeyPage, StorageError> {
        let rows = retry("local_scan", &RetryConfig::query(), || async {
            sqlx::query("SELECT key FROM items ORDER BY key LIMIT $1 OFFSET $2")
                .bind(limit as i64)
                .bind(cursor as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StorageError::Unavailable(e.to_string()))
        })
        .await?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in &rows {
            let key: String = row
                .try_get("key")
                .map_err(|e| StorageError::Unavailable(e.to_string()))?;
            keys.push(key);
        }

        let next_cursor = if keys.len() == limit {
            Some(cursor + keys.len() as u64)
        } else {
            None
        };
        Ok(KeyPage { keys, next_cursor })
    }

    async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
