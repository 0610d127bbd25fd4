// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Foreground operations: get, set, delete, keys, status.
//!
//! Every backend call is bounded by the configured operation timeout; a
//! timeout counts as the backend being unavailable and triggers the
//! same demotion path as a connection error.

use std::future::Future;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::{debug, warn};

use super::{SetOptions, StoreStatus, TieredStore};
use crate::backend::traits::StorageError;
use crate::events::StoreEvent;
use crate::metrics;
use crate::stored_item::{now_ms, StoredItem};
use crate::wal::WalOp;

impl TieredStore {
    pub(super) async fn op_timeout<T, F>(&self, fut: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        let limit = Duration::from_secs(self.config.op_timeout_secs);
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Unavailable(format!(
                "operation timed out after {}s",
                self.config.op_timeout_secs
            ))),
        }
    }

    /// Fetch a value from the active tier.
    ///
    /// An absent key is `Ok(None)` and never cascades to lower tiers; an
    /// expired item reads as absent and is deleted best-effort in the
    /// background. An unavailable backend demotes and the read is
    /// retried on the new active tier.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        loop {
            let index = self.active_index();
            let tier = self.tiers[index].clone();
            let _timer = metrics::LatencyTimer::new(tier.name(), "get");

            match self.op_timeout(tier.get(key)).await {
                Ok(Some(item)) => {
                    if item.is_expired(now_ms()) {
                        debug!(key, "item expired, deleting lazily");
                        let store = tier.clone();
                        let k = key.to_string();
                        tokio::spawn(async move {
                            let _ = store.delete(&k).await;
                        });
                        metrics::record_operation(tier.name(), "get", "success");
                        return Ok(None);
                    }
                    if !item.verify_checksum() {
                        metrics::record_operation(tier.name(), "get", "error");
                        return self.read_around_corruption(index, key).await;
                    }
                    metrics::record_operation(tier.name(), "get", "success");
                    return Ok(Some(item.value));
                }
                Ok(None) => {
                    metrics::record_operation(tier.name(), "get", "success");
                    return Ok(None);
                }
                Err(StorageError::Unavailable(cause)) => {
                    metrics::record_operation(tier.name(), "get", "error");
                    self.demote(index, &cause)?;
                }
                Err(e) => {
                    metrics::record_operation(tier.name(), "get", "error");
                    return Err(e);
                }
            }
        }
    }

    /// Check whether a key is present on the active tier without
    /// returning the value. Expired items count as absent, same as
    /// [`get`](Self::get).
    #[tracing::instrument(skip(self))]
    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        loop {
            let index = self.active_index();
            let tier = self.tiers[index].clone();

            match self.op_timeout(tier.get(key)).await {
                Ok(Some(item)) => {
                    metrics::record_operation(tier.name(), "exists", "success");
                    if item.is_expired(now_ms()) {
                        let store = tier.clone();
                        let k = key.to_string();
                        tokio::spawn(async move {
                            let _ = store.delete(&k).await;
                        });
                        return Ok(false);
                    }
                    return Ok(true);
                }
                Ok(None) => {
                    metrics::record_operation(tier.name(), "exists", "success");
                    return Ok(false);
                }
                Err(StorageError::Unavailable(cause)) => {
                    metrics::record_operation(tier.name(), "exists", "error");
                    self.demote(index, &cause)?;
                }
                Err(e) => {
                    metrics::record_operation(tier.name(), "exists", "error");
                    return Err(e);
                }
            }
        }
    }

    /// Explicit cascade across tiers in priority order, starting at the
    /// active one. Used by repair flows that need any surviving copy.
    pub async fn get_with_fallback(&self, key: &str) -> Result<Option<StoredItem>, StorageError> {
        let start = self.active_index();
        for tier in &self.tiers[start..] {
            match self.op_timeout(tier.get(key)).await {
                Ok(Some(item)) if !item.is_expired(now_ms()) => return Ok(Some(item)),
                Ok(_) => continue,
                Err(e) => {
                    debug!(tier = tier.name(), error = %e, "fallback read skipped tier");
                    continue;
                }
            }
        }
        Ok(None)
    }

    /// Store a value on the active tier.
    ///
    /// While any higher-priority tier is down (active index > 0) the
    /// mutation is also mirrored into the write-ahead buffer so it can
    /// be replayed on recovery.
    #[tracing::instrument(skip(self, value), fields(bytes = value.len()))]
    pub async fn set(&self, key: &str, value: Vec<u8>, opts: SetOptions) -> Result<(), StorageError> {
        let _freeze = self.write_freeze.read().await;

        let mut item =
            StoredItem::new(key.to_string(), value, self.config.checksum).with_tier(opts.data_tier);
        if let Some(ttl) = opts.ttl_ms {
            item = item.with_ttl(ttl);
        }

        loop {
            let index = self.active_index();
            let tier = self.tiers[index].clone();
            let _timer = metrics::LatencyTimer::new(tier.name(), "set");

            match self.op_timeout(tier.set(&item)).await {
                Ok(()) => {
                    metrics::record_operation(tier.name(), "set", "success");
                    if index > 0 {
                        self.mirror_to_wal(
                            key,
                            item.timestamp,
                            WalOp::Set {
                                value: item.value.clone(),
                                data_tier: item.data_tier,
                                ttl_ms: item.ttl_ms,
                                checksum: item.checksum.clone(),
                            },
                        )?;
                    }
                    return Ok(());
                }
                Err(StorageError::Unavailable(cause)) => {
                    metrics::record_operation(tier.name(), "set", "error");
                    self.demote(index, &cause)?;
                }
                Err(e) => {
                    metrics::record_operation(tier.name(), "set", "error");
                    return Err(e);
                }
            }
        }
    }

    /// Delete a key on the active tier. Idempotent; deleting an absent
    /// key succeeds. Mirrored to the write-ahead buffer like `set`.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let _freeze = self.write_freeze.read().await;

        loop {
            let index = self.active_index();
            let tier = self.tiers[index].clone();
            let _timer = metrics::LatencyTimer::new(tier.name(), "delete");

            match self.op_timeout(tier.delete(key)).await {
                Ok(()) => {
                    metrics::record_operation(tier.name(), "delete", "success");
                    if index > 0 {
                        self.mirror_to_wal(key, now_ms(), WalOp::Delete)?;
                    }
                    return Ok(());
                }
                Err(StorageError::Unavailable(cause)) => {
                    metrics::record_operation(tier.name(), "delete", "error");
                    self.demote(index, &cause)?;
                }
                Err(e) => {
                    metrics::record_operation(tier.name(), "delete", "error");
                    return Err(e);
                }
            }
        }
    }

    /// List keys on the active tier, optionally filtered by a glob
    /// pattern (`*`, `?`).
    #[tracing::instrument(skip(self))]
    pub async fn keys(&self, pattern: Option<&str>) -> Result<Vec<String>, StorageError> {
        loop {
            let index = self.active_index();
            let tier = self.tiers[index].clone();

            match self.op_timeout(tier.list_keys(pattern)).await {
                Ok(keys) => {
                    metrics::record_operation(tier.name(), "keys", "success");
                    return Ok(keys);
                }
                Err(StorageError::Unavailable(cause)) => {
                    metrics::record_operation(tier.name(), "keys", "error");
                    self.demote(index, &cause)?;
                }
                Err(e) => {
                    metrics::record_operation(tier.name(), "keys", "error");
                    return Err(e);
                }
            }
        }
    }

    /// Operational snapshot: active tier, WAL depth, transition times,
    /// conflict count.
    pub fn status(&self) -> StoreStatus {
        let state = self.state.lock().clone();
        StoreStatus {
            active_tier: state.active,
            active_tier_name: self.tiers[state.active].name(),
            wal_entries: self.wal.len(),
            wal_degraded: self.wal.is_degraded(),
            last_promotion: state.last_promotion,
            last_demotion: state.last_demotion,
            conflicts: self.conflicts.lock().len(),
        }
    }

    /// Append to the WAL, surfacing degraded/overflow transitions as
    /// events exactly once per episode.
    fn mirror_to_wal(&self, key: &str, timestamp: i64, op: WalOp) -> Result<(), StorageError> {
        self.wal.append(key, timestamp, op)?;
        metrics::set_wal_entries(self.wal.len());
        metrics::set_wal_bytes(self.wal.file_size_bytes());

        if self.wal.is_degraded() {
            if !self.wal_degraded_flagged.swap(true, Ordering::SeqCst) {
                let reason = self.wal.degraded_reason().unwrap_or_default();
                warn!(reason, "write-ahead buffer degraded to memory-only");
                self.events.emit(StoreEvent::WalDegraded { reason });
            }
        }

        let entries = self.wal.len();
        let oldest_age_secs = self
            .wal
            .oldest_timestamp()
            .map(|t| (now_ms().saturating_sub(t) / 1000).max(0) as u64)
            .unwrap_or(0);
        let overflowing = entries > self.config.wal_max_entries
            || oldest_age_secs > self.config.wal_max_age_secs;
        if overflowing {
            if !self.wal_overflow_flagged.swap(true, Ordering::SeqCst) {
                warn!(entries, oldest_age_secs, "write-ahead buffer past overflow threshold");
                self.events.emit(StoreEvent::WalOverflow {
                    entries,
                    oldest_age_secs,
                });
            }
        } else {
            self.wal_overflow_flagged.store(false, Ordering::SeqCst);
        }

        Ok(())
    }

    /// On a checksum mismatch at read time: surface the corruption,
    /// serve the first valid lower-tier copy (and heal the active tier
    /// best-effort), or read as absent if no valid copy exists.
    async fn read_around_corruption(
        &self,
        active: usize,
        key: &str,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        warn!(key, tier = self.tiers[active].name(), "checksum mismatch on read");
        metrics::record_corruption(self.tiers[active].name());
        self.events.emit(StoreEvent::CorruptionDetected {
            key: key.to_string(),
            tier: active,
        });

        for index in active + 1..self.tiers.len() {
            let tier = self.tiers[index].clone();
            if let Ok(Some(candidate)) = self.op_timeout(tier.get(key)).await {
                if candidate.verify_checksum() && !candidate.is_expired(now_ms()) {
                    let heal = self.tiers[active].clone();
                    if self.op_timeout(heal.set(&candidate)).await.is_ok() {
                        metrics::record_repair("restored");
                        self.events.emit(StoreEvent::KeyRepaired {
                            key: key.to_string(),
                            restored_from: index,
                        });
                    }
                    return Ok(Some(candidate.value));
                }
            }
        }

        metrics::record_repair("unrecoverable");
        self.events.emit(StoreEvent::KeyUnrecoverable {
            key: key.to_string(),
        });
        Ok(None)
    }
}
