// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Integrity scanning and split-brain resolution.
//!
//! The [`Repairer`] walks the active tier page by page, recomputes each
//! value's checksum, and restores corrupted entries from the next
//! lower-priority tier when a valid, sufficiently fresh copy exists.
//!
//! Divergence between a recovering tier and write-ahead entries is
//! resolved last-writer-wins by timestamp. Every resolution produces a
//! [`ConflictRecord`]; conflicts are never silent.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::traits::{BackendAdapter, StorageError};
use crate::events::{EventBus, StoreEvent};
use crate::metrics;
use crate::stored_item::{now_ms, StoredItem};

/// Which side won a last-writer-wins resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// The buffered write was newer and overwrote the tier's copy
    WalWins,
    /// The tier's existing copy was newer (or tied) and was kept
    TierWins,
}

impl std::fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictResolution::WalWins => write!(f, "wal_wins"),
            ConflictResolution::TierWins => write!(f, "tier_wins"),
        }
    }
}

/// Audit record of one split-brain resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRecord {
    pub key: String,
    pub wal_value: Vec<u8>,
    pub wal_timestamp: i64,
    pub tier_value: Vec<u8>,
    pub tier_timestamp: i64,
    pub resolution: ConflictResolution,
}

/// Outcome of one integrity scan.
#[derive(Debug, Clone, Default)]
pub struct RepairReport {
    pub scanned: u64,
    pub corrupted: u64,
    /// Expired items purged proactively during the walk
    pub purged: u64,
    pub repaired: Vec<String>,
    pub unrecoverable: Vec<String>,
}

/// Detects corrupted values in the active tier and restores them from
/// lower-priority tiers.
pub struct Repairer {
    events: EventBus,
    /// How much older than the corrupted copy a restore candidate may be
    staleness_bound_ms: i64,
    scan_page_size: usize,
    /// Bound on every backend call; a hung tier must not stall the scan
    op_timeout: Duration,
}

impl Repairer {
    pub fn new(
        events: EventBus,
        staleness_bound_ms: i64,
        scan_page_size: usize,
        op_timeout: Duration,
    ) -> Self {
        Self {
            events,
            staleness_bound_ms,
            scan_page_size,
            op_timeout,
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Unavailable(format!(
                "operation timed out after {:?}",
                self.op_timeout
            ))),
        }
    }

    /// Resolve a WAL-vs-tier divergence for one key, last-writer-wins.
    ///
    /// The buffered write wins only when strictly newer; on an exact
    /// timestamp tie the tier's existing copy is kept.
    pub fn resolve(
        key: &str,
        wal_value: &[u8],
        wal_timestamp: i64,
        tier_item: &StoredItem,
    ) -> ConflictRecord {
        let resolution = if wal_timestamp > tier_item.timestamp {
            ConflictResolution::WalWins
        } else {
            ConflictResolution::TierWins
        };

        ConflictRecord {
            key: key.to_string(),
            wal_value: wal_value.to_vec(),
            wal_timestamp,
            tier_value: tier_item.value.clone(),
            tier_timestamp: tier_item.timestamp,
            resolution,
        }
    }

    /// Walk the active tier, verify every item's checksum, restore
    /// corrupted entries from lower-priority tiers, and purge items
    /// whose TTL has elapsed.
    pub async fn integrity_scan(
        &self,
        tiers: &[Arc<dyn BackendAdapter>],
        active: usize,
    ) -> Result<RepairReport, StorageError> {
        let active_store = &tiers[active];
        let mut report = RepairReport::default();
        let mut cursor = 0u64;

        loop {
            let page = self
                .bounded(active_store.scan_keys(cursor, self.scan_page_size))
                .await?;

            for key in &page.keys {
                let item = match self.bounded(active_store.get(key)).await {
                    Ok(Some(item)) => item,
                    // Deleted between scan and fetch, or transient read
                    // failure; the next scan picks it up
                    Ok(None) | Err(_) => continue,
                };

                report.scanned += 1;
                if item.is_expired(now_ms()) {
                    // The read path already treats these as absent; the
                    // scan reclaims the space
                    if self.bounded(active_store.delete(key)).await.is_ok() {
                        debug!(key, "purged expired item");
                        report.purged += 1;
                    }
                    continue;
                }
                if item.verify_checksum() {
                    continue;
                }

                report.corrupted += 1;
                metrics::record_corruption(active_store.name());
                self.events.emit(StoreEvent::CorruptionDetected {
                    key: key.clone(),
                    tier: active,
                });
                warn!(key, tier = active_store.name(), "checksum mismatch detected");

                match self.restore(tiers, active, key, &item).await {
                    Some(restored_from) => {
                        metrics::record_repair("restored");
                        self.events.emit(StoreEvent::KeyRepaired {
                            key: key.clone(),
                            restored_from,
                        });
                        report.repaired.push(key.clone());
                    }
                    None => {
                        metrics::record_repair("unrecoverable");
                        self.events.emit(StoreEvent::KeyUnrecoverable { key: key.clone() });
                        report.unrecoverable.push(key.clone());
                    }
                }
            }

            match page.next_cursor {
                Some(next) => cursor = next,
                None => break,
            }
        }

        if report.corrupted > 0 || report.purged > 0 {
            info!(
                scanned = report.scanned,
                corrupted = report.corrupted,
                purged = report.purged,
                repaired = report.repaired.len(),
                unrecoverable = report.unrecoverable.len(),
                "integrity scan finished"
            );
        }
        Ok(report)
    }

    /// Find a valid copy in a lower-priority tier and overwrite the
    /// corrupted one. Returns the tier index the copy came from.
    ///
    /// A candidate qualifies only if its own checksum verifies and it is
    /// not older than the corrupted copy by more than the staleness
    /// bound (measured against the corrupted copy's timestamp, not the
    /// wall clock).
    async fn restore(
        &self,
        tiers: &[Arc<dyn BackendAdapter>],
        active: usize,
        key: &str,
        corrupt: &StoredItem,
    ) -> Option<usize> {
        for (index, tier) in tiers.iter().enumerate().skip(active + 1) {
            let candidate = match self.bounded(tier.get(key)).await {
                Ok(Some(item)) => item,
                Ok(None) | Err(_) => continue,
            };

            if !candidate.verify_checksum() {
                continue;
            }
            if candidate.timestamp < corrupt.timestamp.saturating_sub(self.staleness_bound_ms) {
                continue;
            }

            match self.bounded(tiers[active].set(&candidate)).await {
                Ok(()) => {
                    info!(key, from = tier.name(), "restored corrupted item");
                    return Some(index);
                }
                Err(e) => {
                    warn!(key, error = %e, "restore write failed");
                    return None;
                }
            }
        }
        None
    }
}
