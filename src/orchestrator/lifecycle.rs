// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Store lifecycle: init, demotion, recovery probing, promotion with
//! WAL replay, the background scheduler, and shutdown.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::TieredStore;
use crate::backend::traits::{BackendAdapter, StorageError};
use crate::events::StoreEvent;
use crate::integrity;
use crate::metrics;
use crate::repair::{ConflictResolution, Repairer};
use crate::stored_item::{now_ms, StoredItem};
use crate::wal::{WalEntry, WalOp};

impl TieredStore {
    /// Probe tiers from the top and pick the first healthy one as
    /// active. Idempotent; a second call is a no-op.
    ///
    /// WAL recovery already happened when the buffer was opened; init
    /// surfaces a degraded buffer as an event so the condition is
    /// visible from the first moment.
    #[tracing::instrument(skip(self))]
    pub async fn init(&self) -> Result<(), StorageError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut active = self.tiers.len() - 1;
        for (index, tier) in self.tiers.iter().enumerate() {
            if self.probe(tier).await {
                active = index;
                break;
            }
            warn!(tier = tier.name(), "tier unhealthy at init, falling back");
        }

        self.state.lock().active = active;
        metrics::set_active_tier(active);
        metrics::set_wal_entries(self.wal.len());

        // Entries buffered by a previous process run replay straight
        // into the preferred tier when it is healthy at startup. With a
        // lower tier active they stay buffered for the next promotion.
        if active == 0 && !self.wal.is_empty() {
            let _freeze = self.write_freeze.write().await;
            if let Err(e) = self.replay_wal(0).await {
                warn!(error = %e, "startup replay failed, entries kept buffered");
            }
        }

        if self.wal.is_degraded() && !self.wal_degraded_flagged.swap(true, Ordering::SeqCst) {
            let reason = self.wal.degraded_reason().unwrap_or_default();
            self.events.emit(StoreEvent::WalDegraded { reason });
        }

        info!(
            tier = self.tiers[active].name(),
            wal_entries = self.wal.len(),
            "tiered store initialized"
        );
        Ok(())
    }

    /// Background scheduler: recovery probes and periodic integrity
    /// scans, until [`close`](Self::close) is called.
    ///
    /// Intended to be spawned once:
    ///
    /// ```rust,ignore
    /// let store = Arc::new(store);
    /// let runner = store.clone();
    /// tokio::spawn(async move { runner.run().await });
    /// ```
    pub async fn run(&self) {
        let mut shutdown = self.shutdown_rx.clone();
        let mut health =
            tokio::time::interval(Duration::from_secs(self.config.health_check_interval_secs));
        let mut repair =
            tokio::time::interval(Duration::from_secs(self.config.repair_interval_secs));
        health.set_missed_tick_behavior(MissedTickBehavior::Skip);
        repair.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Consume the immediate first tick of each interval
        health.tick().await;
        repair.tick().await;

        info!("background scheduler running");
        loop {
            tokio::select! {
                _ = health.tick() => {
                    self.health_check().await;
                }
                _ = repair.tick() => {
                    let active = self.active_index();
                    if let Err(e) = self.repairer.integrity_scan(&self.tiers, active).await {
                        warn!(error = %e, "integrity scan failed");
                    }
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        info!("background scheduler stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Stop the background scheduler. Foreground operations keep
    /// working; only probing and periodic repair stop.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }

    pub(super) async fn probe(&self, tier: &Arc<dyn BackendAdapter>) -> bool {
        let limit = Duration::from_secs(self.config.health_timeout_secs);
        let healthy = tokio::time::timeout(limit, tier.is_healthy())
            .await
            .unwrap_or(false);
        metrics::set_backend_healthy(tier.name(), healthy);
        healthy
    }

    /// Move the active pointer one tier down after a backend failure.
    ///
    /// Errors only when there is no tier left to fall to; with the
    /// in-memory tier at the floor that means every backend including
    /// in-process memory failed, which is not survivable.
    pub(super) fn demote(&self, from: usize, cause: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        if state.active != from {
            // Another caller already moved the pointer
            return Ok(());
        }
        if from + 1 >= self.tiers.len() {
            return Err(StorageError::Unrecoverable(format!(
                "all backends unavailable, last error: {cause}"
            )));
        }
        state.active = from + 1;
        state.last_demotion = Some(now_ms());
        let to = state.active;
        drop(state);

        warn!(
            from = self.tiers[from].name(),
            to = self.tiers[to].name(),
            cause,
            "tier demoted"
        );
        metrics::record_demotion(self.tiers[from].name(), self.tiers[to].name());
        metrics::set_active_tier(to);
        metrics::set_backend_healthy(self.tiers[from].name(), false);
        self.events.emit(StoreEvent::TierDemoted {
            from,
            to,
            cause: cause.to_string(),
        });
        Ok(())
    }

    /// Probe every tier above the active one; promote to the first that
    /// answers. The background scheduler calls this on an interval, but
    /// it can also be invoked directly to force a recovery attempt.
    pub async fn health_check(&self) {
        let active = self.active_index();
        if active == 0 {
            return;
        }
        for target in 0..active {
            if self.probe(&self.tiers[target]).await {
                if let Err(e) = self.promote_to(target).await {
                    warn!(target = self.tiers[target].name(), error = %e, "promotion failed");
                }
                return;
            }
        }
    }

    /// Promote to a recovered higher-priority tier.
    ///
    /// Writes are frozen for the duration of the replay: buffered
    /// entries go into the recovered tier in sequence order and
    /// divergent keys are resolved last-writer-wins. The WAL is
    /// truncated only when the target is the preferred tier; entries
    /// replayed into an intermediate tier stay buffered so the preferred
    /// tier still receives them on its own recovery. A replay failure
    /// aborts the promotion and keeps the current active tier.
    pub(super) async fn promote_to(&self, target: usize) -> Result<(), StorageError> {
        let freeze = self.write_freeze.write().await;

        let from = self.active_index();
        if target >= from {
            return Ok(());
        }
        // Re-verify under the freeze; the probe that got us here raced
        // with real traffic
        if !self.probe(&self.tiers[target]).await {
            return Ok(());
        }

        let replayed = self.replay_wal(target).await?;

        {
            let mut state = self.state.lock();
            state.active = target;
            state.last_promotion = Some(now_ms());
        }
        metrics::record_promotion(self.tiers[from].name(), self.tiers[target].name());
        metrics::set_active_tier(target);
        self.events.emit(StoreEvent::TierPromoted { from, to: target });
        info!(
            from = self.tiers[from].name(),
            to = self.tiers[target].name(),
            replayed,
            "tier promoted"
        );

        drop(freeze);

        // On-demand repair pass over the newly active tier
        if let Err(e) = self.repairer.integrity_scan(&self.tiers, target).await {
            warn!(error = %e, "post-promotion integrity scan failed");
        }
        Ok(())
    }

    /// Replay every buffered entry into `target` in sequence order.
    /// Callers must hold the write freeze.
    ///
    /// Entries are dropped from the WAL only once tier 0 confirmed them.
    /// A replay into an intermediate tier keeps them buffered; otherwise
    /// a write accepted during a full outage would exist only on the
    /// first tier to come back and never reach the preferred one.
    async fn replay_wal(&self, target: usize) -> Result<usize, StorageError> {
        let tier = self.tiers[target].clone();
        let entries = self.wal.drain();
        let mut last_confirmed = None;
        let mut replayed = 0usize;

        for entry in entries {
            match self.replay_entry(&tier, &entry).await {
                Ok(()) => {
                    last_confirmed = Some(entry.sequence);
                    replayed += 1;
                }
                Err(e) => {
                    warn!(
                        key = entry.key,
                        sequence = entry.sequence,
                        error = %e,
                        "replay failed, aborting"
                    );
                    if target == 0 {
                        if let Some(seq) = last_confirmed {
                            self.wal.truncate_through(seq);
                        }
                    }
                    metrics::record_wal_replay(replayed, false);
                    metrics::set_wal_entries(self.wal.len());
                    return Err(e);
                }
            }
        }

        if target == 0 {
            if let Some(seq) = last_confirmed {
                self.wal.truncate_through(seq);
            }
        }
        metrics::record_wal_replay(replayed, true);
        metrics::set_wal_entries(self.wal.len());
        Ok(replayed)
    }

    /// Replay one buffered mutation into the recovering tier.
    async fn replay_entry(
        &self,
        tier: &Arc<dyn BackendAdapter>,
        entry: &WalEntry,
    ) -> Result<(), StorageError> {
        match &entry.op {
            WalOp::Set {
                value,
                data_tier,
                ttl_ms,
                checksum,
            } => {
                if !integrity::verify(checksum, value) {
                    warn!(
                        key = entry.key,
                        sequence = entry.sequence,
                        "buffered entry failed checksum, skipping"
                    );
                    return Ok(());
                }

                let existing = self.op_timeout(tier.get(&entry.key)).await?;
                if let Some(existing) = existing {
                    if existing.checksum != *checksum {
                        let record =
                            Repairer::resolve(&entry.key, value, entry.timestamp, &existing);
                        let resolution = record.resolution;
                        metrics::record_conflict(&resolution.to_string());
                        self.events.emit(StoreEvent::ConflictResolved {
                            key: entry.key.clone(),
                            resolution,
                        });
                        self.conflicts.lock().push(record);

                        if resolution == ConflictResolution::TierWins {
                            debug!(key = entry.key, "tier copy newer, buffered write dropped");
                            return Ok(());
                        }
                    }
                }

                let item = StoredItem {
                    key: entry.key.clone(),
                    value: value.clone(),
                    data_tier: *data_tier,
                    ttl_ms: *ttl_ms,
                    timestamp: entry.timestamp,
                    last_accessed: 0,
                    access_count: 0,
                    checksum: checksum.clone(),
                };
                self.op_timeout(tier.set(&item)).await
            }
            WalOp::Delete => {
                if let Some(existing) = self.op_timeout(tier.get(&entry.key)).await? {
                    if existing.timestamp > entry.timestamp {
                        debug!(key = entry.key, "tier copy newer than buffered delete, kept");
                        return Ok(());
                    }
                }
                self.op_timeout(tier.delete(&entry.key)).await
            }
        }
    }
}
