// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tiered fallback orchestrator.
//!
//! The [`TieredStore`] is the facade application code talks to. It owns
//! the backend strategy table (remote, local persistent, in-memory, in
//! priority order), routes every operation to the active tier, demotes
//! on backend failure, and promotes back when a health probe sees a
//! higher-priority tier recover, replaying buffered writes in sequence
//! order first.
//!
//! # Lifecycle
//!
//! ```text
//! connect → init → (get/set/delete/keys ‖ run) → close
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use tierkv::{TieredStore, TierKvConfig, SetOptions};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = TierKvConfig {
//!     remote_url: Some("redis://localhost:6379".into()),
//!     local_path: Some("sqlite:tierkv.db?mode=rwc".into()),
//!     wal_path: Some("./tierkv.wal".into()),
//!     ..Default::default()
//! };
//!
//! let store = TieredStore::connect(config).await.expect("connect failed");
//! store.init().await.expect("init failed");
//!
//! store.set("k", b"v".to_vec(), SetOptions::default()).await.expect("set failed");
//! assert!(store.get("k").await.expect("get failed").is_some());
//! # }
//! ```

mod api;
mod lifecycle;
mod types;

pub use types::{SetOptions, StoreStatus, TierState};

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{watch, RwLock};
use tracing::warn;

use crate::backend::local::LocalStore;
use crate::backend::memory::MemoryStore;
use crate::backend::remote::RemoteStore;
use crate::backend::traits::{BackendAdapter, StorageError};
use crate::config::TierKvConfig;
use crate::events::EventBus;
use crate::repair::{ConflictRecord, Repairer};
use crate::wal::WriteAheadLog;

/// Key-value facade with transparent backend failover.
///
/// # Thread Safety
///
/// `Send + Sync`, designed for concurrent callers. The active-tier
/// index lives behind a short-held mutex that is never held across
/// backend I/O; promotion briefly freezes writes with an async RwLock.
pub struct TieredStore {
    pub(super) config: TierKvConfig,

    /// Strategy table in priority order; index 0 is most preferred
    pub(super) tiers: Vec<Arc<dyn BackendAdapter>>,

    /// Active tier index plus transition timestamps
    pub(super) state: Mutex<TierState>,

    /// Held shared by every write, exclusively during promotion replay
    pub(super) write_freeze: RwLock<()>,

    pub(super) wal: Arc<WriteAheadLog>,
    pub(super) events: EventBus,
    pub(super) repairer: Repairer,

    /// Audit ledger of split-brain resolutions
    pub(super) conflicts: Mutex<Vec<ConflictRecord>>,

    /// Edge detection so degraded/overflow events fire once per episode
    pub(super) wal_degraded_flagged: AtomicBool,
    pub(super) wal_overflow_flagged: AtomicBool,

    pub(super) initialized: AtomicBool,

    pub(super) shutdown: watch::Sender<bool>,
    pub(super) shutdown_rx: watch::Receiver<bool>,
}

impl TieredStore {
    /// Connect the configured backends and assemble the strategy table.
    ///
    /// The in-memory tier is always present. A remote or local backend
    /// that fails to connect at startup is logged and left out of the
    /// table for this process run; the store still works from the tiers
    /// that did connect.
    pub async fn connect(config: TierKvConfig) -> Result<Self, StorageError> {
        let mut tiers: Vec<Arc<dyn BackendAdapter>> = Vec::with_capacity(3);

        if let Some(url) = &config.remote_url {
            match RemoteStore::with_prefix(url, config.remote_prefix.as_deref()).await {
                Ok(store) => tiers.push(Arc::new(store)),
                Err(e) => {
                    warn!(error = %e, "remote backend unavailable at startup, continuing without it");
                    crate::metrics::set_backend_healthy("remote", false);
                }
            }
        }

        if let Some(path) = &config.local_path {
            match LocalStore::new(path).await {
                Ok(store) => tiers.push(Arc::new(store)),
                Err(e) => {
                    warn!(error = %e, "local backend unavailable at startup, continuing without it");
                    crate::metrics::set_backend_healthy("local", false);
                }
            }
        }

        tiers.push(Arc::new(MemoryStore::new()));

        let wal = Arc::new(WriteAheadLog::open(config.wal_path.as_deref()));
        Ok(Self::with_tiers(config, tiers, wal))
    }

    /// Assemble a store from pre-built tiers. The last tier must be
    /// infallible (in-memory); used directly by tests.
    pub fn with_tiers(
        config: TierKvConfig,
        tiers: Vec<Arc<dyn BackendAdapter>>,
        wal: Arc<WriteAheadLog>,
    ) -> Self {
        assert!(!tiers.is_empty(), "strategy table must hold at least one tier");

        let events = EventBus::new();
        let repairer = Repairer::new(
            events.clone(),
            config.staleness_bound_ms,
            config.scan_page_size,
            std::time::Duration::from_secs(config.op_timeout_secs),
        );
        let (shutdown, shutdown_rx) = watch::channel(false);

        Self {
            config,
            tiers,
            state: Mutex::new(TierState::default()),
            write_freeze: RwLock::new(()),
            wal,
            events,
            repairer,
            conflicts: Mutex::new(Vec::new()),
            wal_degraded_flagged: AtomicBool::new(false),
            wal_overflow_flagged: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            shutdown,
            shutdown_rx,
        }
    }

    /// Subscribe to store events (tier transitions, WAL state, repairs).
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<crate::events::StoreEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the split-brain resolution ledger.
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        self.conflicts.lock().clone()
    }

    pub(super) fn active_index(&self) -> usize {
        self.state.lock().active
    }
}
