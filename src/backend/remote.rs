// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis backend for the remote tier.
//!
//! Items are stored as JSON envelopes under an optional key prefix so
//! a shared Redis instance can be namespaced per application. Key
//! listing uses SCAN (never KEYS) and bulk deletion uses UNLINK in
//! bounded batches so a large clear cannot block the server.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, AsyncCommands, Client};
use tracing::debug;

use super::traits::{BackendAdapter, KeyPage, StorageError};
use crate::resilience::retry::{retry, RetryConfig};
use crate::stored_item::{now_ms, StoredItem};

pub struct RemoteStore {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g., "tierkv:" → "tierkv:session.1")
    prefix: String,
    scan_page_size: usize,
}

impl RemoteStore {
    /// Create a new Redis store without a key prefix.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        Self::with_prefix(connection_string, None).await
    }

    /// Create a new Redis store with an optional key prefix.
    ///
    /// The prefix is prepended to all keys, enabling namespacing when
    /// sharing a Redis instance with other applications.
    pub async fn with_prefix(
        connection_string: &str,
        prefix: Option<&str>,
    ) -> Result<Self, StorageError> {
        let client =
            Client::open(connection_string).map_err(|e| StorageError::Init(e.to_string()))?;

        // Startup config: fast-fail so a bad URL surfaces quickly
        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Unavailable(e.to_string()))?;

        Ok(Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
            scan_page_size: 500,
        })
    }

    #[inline]
    fn prefixed_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    #[inline]
    fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            key
        } else {
            key.strip_prefix(&self.prefix).unwrap_or(key)
        }
    }

    fn decode_item(&self, key: &str, raw: &str) -> Result<StoredItem, StorageError> {
        serde_json::from_str(raw).map_err(|e| StorageError::Corrupt {
            key: key.to_string(),
            expected: "valid JSON envelope".to_string(),
            actual: e.to_string(),
        })
    }

    /// One SCAN page of prefixed keys matching `match_pattern`.
    async fn scan_page(
        &self,
        cursor: u64,
        match_pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), StorageError> {
        let conn = self.connection.clone();
        let pattern = match_pattern.to_string();
        retry("redis_scan", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let pattern = pattern.clone();
            async move {
                let (next, keys): (u64, Vec<String>) = cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(count)
                    .query_async(&mut conn)
                    .await?;
                Ok((next, keys))
            }
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl BackendAdapter for RemoteStore {
    async fn get(&self, key: &str) -> Result<Option<StoredItem>, StorageError> {
        let conn = self.connection.clone();
        let prefixed = self.prefixed_key(key);

        let raw: Option<String> = retry("redis_get", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let k = prefixed.clone();
            async move {
                let data: Option<String> = conn.get(&k).await?;
                Ok(data)
            }
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Unavailable(e.to_string()))?;

        let Some(raw) = raw else { return Ok(None) };
        let mut item = self.decode_item(key, &raw)?;

        // Best-effort access stats; a failed write-back doesn't fail the read
        item.last_accessed = now_ms() as u64;
        item.access_count += 1;
        if let Ok(updated) = serde_json::to_string(&item) {
            let mut conn = self.connection.clone();
            let k = self.prefixed_key(key);
            let _: Result<(), redis::RedisError> = conn.set(&k, updated).await;
        }

        Ok(Some(item))
    }

    async fn set(&self, item: &StoredItem) -> Result<(), StorageError> {
        let envelope =
            serde_json::to_string(item).map_err(|e| StorageError::Unrecoverable(e.to_string()))?;
        let conn = self.connection.clone();
        let prefixed = self.prefixed_key(&item.key);

        retry("redis_set", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let k = prefixed.clone();
            let v = envelope.clone();
            async move {
                let _: () = conn.set(&k, &v).await?;
                Ok(())
            }
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Unavailable(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.connection.clone();
        let prefixed = self.prefixed_key(key);

        retry("redis_delete", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let k = prefixed.clone();
            async move {
                // UNLINK reclaims memory off-thread; deleting an absent
                // key is a no-op
                let _: u64 = cmd("UNLINK").arg(&k).query_async(&mut conn).await?;
                Ok(())
            }
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Unavailable(e.to_string()))
    }

    async fn clear(&self, pattern: Option<&str>) -> Result<u64, StorageError> {
        let match_pattern = format!("{}{}", self.prefix, pattern.unwrap_or("*"));
        let mut removed = 0u64;
        let mut cursor = 0u64;

        loop {
            let (next, keys) = self.scan_page(cursor, &match_pattern, self.scan_page_size).await?;

            if !keys.is_empty() {
                let conn = self.connection.clone();
                let batch = keys.clone();
                let unlinked: u64 = retry("redis_unlink_batch", &RetryConfig::query(), || {
                    let mut conn = conn.clone();
                    let batch = batch.clone();
                    async move {
                        let n: u64 = cmd("UNLINK").arg(&batch).query_async(&mut conn).await?;
                        Ok(n)
                    }
                })
                .await
                .map_err(|e: redis::RedisError| StorageError::Unavailable(e.to_string()))?;
                removed += unlinked;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(removed, pattern = %match_pattern, "remote clear finished");
        Ok(removed)
    }

    async fn scan_keys(&self, cursor: u64, limit: usize) -> Result<KeyPage, StorageError> {
        let match_pattern = format!("{}*", self.prefix);
        let (next, keys) = self.scan_page(cursor, &match_pattern, limit).await?;

        Ok(KeyPage {
            keys: keys.iter().map(|k| self.strip_prefix(k).to_string()).collect(),
            next_cursor: if next == 0 { None } else { Some(next) },
        })
    }

    async fn is_healthy(&self) -> bool {
        let mut conn = self.connection.clone();
        let pong: Result<String, redis::RedisError> =
            cmd("PING").query_async(&mut conn).await;
        matches!(pong.as_deref(), Ok("PONG"))
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}
