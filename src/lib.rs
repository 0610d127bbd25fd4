//! # tierkv
//!
//! A tiered key-value resilience layer. Application code reads and writes
//! state through a single facade without knowing whether the remote store
//! is reachable, and without losing data during an outage.
//!
//! ## Architecture
//!
//! Three backends of decreasing durability/performance, addressed through
//! one orchestrator:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TieredStore (facade)                      │
//! │  • get/set/delete always hit the active tier               │
//! │  • demotes on backend failure, promotes on recovery        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Tier 0: Remote (Redis)                     │
//! │  • Preferred backend, probed optimistically at init        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ (demote on BackendUnavailable)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │             Tier 1: Local persistent (SQLite)               │
//! │  • Survives process restarts, probed for promotion         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ (demote on BackendUnavailable)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Tier 2: In-memory (DashMap)                 │
//! │  • Always available; writes mirrored to the WAL            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writes accepted while a higher-priority tier is down are mirrored into
//! a durable write-ahead buffer and replayed in sequence order when that
//! tier recovers. Every stored value carries a checksum; a background
//! repair pass detects corruption and restores from a lower tier, and
//! concurrent divergence is resolved last-writer-wins with an auditable
//! [`ConflictRecord`] per resolution.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tierkv::{TieredStore, TierKvConfig, SetOptions, DataTier};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TierKvConfig {
//!         remote_url: Some("redis://localhost:6379".into()),
//!         local_path: Some("sqlite:tierkv.db?mode=rwc".into()),
//!         wal_path: Some("./tierkv.wal".into()),
//!         ..Default::default()
//!     };
//!
//!     let store = TieredStore::connect(config).await.expect("connect failed");
//!     store.init().await.expect("init failed");
//!
//!     store
//!         .set("session:1", b"{\"x\":1}".to_vec(), SetOptions::tier(DataTier::Staging))
//!         .await
//!         .expect("set failed");
//!
//!     if let Some(value) = store.get("session:1").await.expect("get failed") {
//!         println!("found {} bytes", value.len());
//!     }
//! }
//! ```
//!
//! ## Modules
//!
//! - [`orchestrator`]: the [`TieredStore`] facade and failover state machine
//! - [`backend`]: the [`BackendAdapter`] contract and the three backends
//! - [`wal`]: durable write-ahead buffer for outage-era mutations
//! - [`repair`]: integrity scanning and split-brain resolution
//! - [`events`]: typed event channel for operator-visible transitions
//! - [`resilience`]: retry policies for backend connections

pub mod backend;
pub mod config;
pub mod events;
pub mod integrity;
pub mod metrics;
pub mod orchestrator;
pub mod pattern;
pub mod repair;
pub mod resilience;
pub mod stored_item;
pub mod wal;

pub use backend::traits::{BackendAdapter, KeyPage, StorageError};
pub use config::{ChecksumAlgorithm, TierKvConfig};
pub use events::{EventBus, StoreEvent};
pub use orchestrator::{SetOptions, StoreStatus, TieredStore};
pub use repair::{ConflictRecord, ConflictResolution, RepairReport, Repairer};
pub use resilience::retry::RetryConfig;
pub use stored_item::{DataTier, StoredItem};
pub use wal::{WalEntry, WalOp, WalStats, WriteAheadLog};
