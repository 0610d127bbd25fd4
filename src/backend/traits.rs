use async_trait::async_trait;
use thiserror::Error;

use crate::pattern::glob_match;
use crate::stored_item::StoredItem;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Item not found")]
    NotFound,
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("Data corruption detected for '{key}': expected checksum {expected}, got {actual}")]
    Corrupt {
        key: String,
        expected: String,
        actual: String,
    },
    #[error("Unrecoverable: {0}")]
    Unrecoverable(String),
    #[error("Write-ahead buffer degraded: {0}")]
    WalDegraded(String),
    #[error("Initialization failed: {0}")]
    Init(String),
}

/// One page of a key scan.
#[derive(Debug, Clone)]
pub struct KeyPage {
    pub keys: Vec<String>,
    /// Cursor for the next page; `None` means the scan is complete
    pub next_cursor: Option<u64>,
}

/// Contract every backend tier implements.
///
/// Failures surface as [`StorageError::Unavailable`] (network, timeout)
/// or [`StorageError::Corrupt`] (malformed stored representation); the
/// orchestrator absorbs both. `NotFound` is expressed as `Ok(None)` from
/// `get`, never as an error.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Fetch an item. Implementations bump `last_accessed` and
    /// `access_count` best-effort.
    async fn get(&self, key: &str) -> Result<Option<StoredItem>, StorageError>;

    /// Unconditional overwrite.
    async fn set(&self, item: &StoredItem) -> Result<(), StorageError>;

    /// Idempotent: deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Delete keys matching `pattern` (all keys if `None`) in bounded
    /// batches, never as one blocking full-table operation. Returns the
    /// number of keys removed.
    async fn clear(&self, pattern: Option<&str>) -> Result<u64, StorageError>;

    /// Paginated key listing. Start with cursor 0; follow
    /// `next_cursor` until it is `None`.
    async fn scan_keys(&self, cursor: u64, limit: usize) -> Result<KeyPage, StorageError>;

    /// Cheap liveness probe. Never errors; an unreachable backend is
    /// simply unhealthy.
    async fn is_healthy(&self) -> bool;

    fn name(&self) -> &'static str;

    /// All keys matching a glob pattern, collected across scan pages.
    async fn list_keys(&self, pattern: Option<&str>) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut cursor = 0u64;
        loop {
            let page = self.scan_keys(cursor, 500).await?;
            for key in page.keys {
                if pattern.map_or(true, |p| glob_match(p, &key)) {
                    keys.push(key);
                }
            }
            match page.next_cursor {
                Some(next) => cursor = next,
                None => break,
            }
        }
        Ok(keys)
    }
}
