//! In-process backend tier. Always available; the floor of the
//! fallback chain.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{BackendAdapter, KeyPage, StorageError};
use crate::pattern::glob_match;
use crate::stored_item::{now_ms, StoredItem};

pub struct MemoryStore {
    data: DashMap<String, StoredItem>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Get current item count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendAdapter for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<StoredItem>, StorageError> {
        Ok(self.data.get_mut(key).map(|mut r| {
            let item = r.value_mut();
            item.last_accessed = now_ms() as u64;
            item.access_count += 1;
            item.clone()
        }))
    }

    async fn set(&self, item: &StoredItem) -> Result<(), StorageError> {
        self.data.insert(item.key.clone(), item.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.data.remove(key);
        Ok(())
    }

    async fn clear(&self, pattern: Option<&str>) -> Result<u64, StorageError> {
        match pattern {
            None => {
                let removed = self.data.len() as u64;
                self.data.clear();
                Ok(removed)
            }
            Some(p) => {
                let removed = AtomicU64::new(0);
                self.data.retain(|key, _| {
                    if glob_match(p, key) {
                        removed.fetch_add(1, Ordering::Relaxed);
                        false
                    } else {
                        true
                    }
                });
                Ok(removed.load(Ordering::Relaxed))
            }
        }
    }

    async fn scan_keys(&self, cursor: u64, limit: usize) -> Result<KeyPage, StorageError> {
        // DashMap has no stable iteration order across mutations; a
        // sorted snapshot gives the cursor a consistent meaning.
        let mut all: Vec<String> = self.data.iter().map(|r| r.key().clone()).collect();
        all.sort();

        let start = cursor as usize;
        let keys: Vec<String> = all.iter().skip(start).take(limit).cloned().collect();
        let next_cursor = if start + keys.len() < all.len() {
            Some((start + keys.len()) as u64)
        } else {
            None
        };
        Ok(KeyPage { keys, next_cursor })
    }

    async fn is_healthy(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
