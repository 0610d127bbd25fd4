//! Typed event channel for operator-visible transitions.
//!
//! Tier changes, WAL degradation, and repair outcomes are broadcast as
//! [`StoreEvent`]s on a `tokio::sync::broadcast` channel. Subscribers
//! that fall behind lose the oldest events rather than blocking the
//! store.

use tokio::sync::broadcast;
use tracing::debug;

use crate::repair::ConflictResolution;

const CHANNEL_CAPACITY: usize = 256;

/// Events emitted by the tiered store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The active tier moved down the priority table after a backend failure
    TierDemoted {
        from: usize,
        to: usize,
        cause: String,
    },
    /// A higher-priority tier recovered and became active again
    TierPromoted { from: usize, to: usize },
    /// The WAL file is unavailable; buffered writes are memory-only
    WalDegraded { reason: String },
    /// The WAL exceeded its entry-count or age threshold (writes still accepted)
    WalOverflow { entries: u64, oldest_age_secs: u64 },
    /// A stored value failed checksum verification
    CorruptionDetected { key: String, tier: usize },
    /// A corrupted key was restored from a lower-priority tier
    KeyRepaired { key: String, restored_from: usize },
    /// No valid copy of a corrupted key exists in any tier
    KeyUnrecoverable { key: String },
    /// A WAL-vs-tier divergence was resolved last-writer-wins
    ConflictResolved {
        key: String,
        resolution: ConflictResolution,
    },
}

/// Broadcast fan-out for [`StoreEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StoreEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Succeeds even with zero subscribers.
    pub fn emit(&self, event: StoreEvent) {
        debug!(?event, "store event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
