//! Integration tests for the tiered store.
//!
//! Every test here runs against real backends that need no external
//! services: the SQLite tier uses in-memory or temp-file databases and
//! the top tier is either a plain in-memory store or a togglable
//! wrapper around one. The Redis-backed tier is exercised indirectly
//! through the shared `BackendAdapter` contract.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - `happy_*`: normal operation with all tiers healthy
//! - `failure_*`: outage, buffering, and recovery paths

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use tierkv::backend::local::LocalStore;
use tierkv::backend::memory::MemoryStore;
use tierkv::backend::traits::{BackendAdapter, KeyPage, StorageError};
use tierkv::config::TierKvConfig;
use tierkv::stored_item::{DataTier, StoredItem};
use tierkv::wal::WriteAheadLog;
use tierkv::{SetOptions, StoreEvent, TieredStore};

/// Togglable top tier used by the failure tests.
struct ToggleStore {
    inner: MemoryStore,
    healthy: AtomicBool,
}

impl ToggleStore {
    fn new(healthy: bool) -> Self {
        Self {
            inner: MemoryStore::new(),
            healthy: AtomicBool::new(healthy),
        }
    }

    fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("offline".into()))
        }
    }
}

#[async_trait]
impl BackendAdapter for ToggleStore {
    async fn get(&self, key: &str) -> Result<Option<StoredItem>, StorageError> {
        self.check()?;
        self.inner.get(key).await
    }
    async fn set(&self, item: &StoredItem) -> Result<(), StorageError> {
        self.check()?;
        self.inner.set(item).await
    }
    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        self.inner.delete(key).await
    }
    async fn clear(&self, pattern: Option<&str>) -> Result<u64, StorageError> {
        self.check()?;
        self.inner.clear(pattern).await
    }
    async fn scan_keys(&self, cursor: u64, limit: usize) -> Result<KeyPage, StorageError> {
        self.check()?;
        self.inner.scan_keys(cursor, limit).await
    }
    async fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
    fn name(&self) -> &'static str {
        "toggle"
    }
}

/// A plain `sqlite::memory:` URL gives every pooled connection its own
/// private database, so the schema created at startup is invisible to
/// the other connections. A uniquely named shared-cache in-memory
/// database keeps one database per test while staying visible across
/// the whole pool.
fn mem_db_url() -> String {
    use std::sync::atomic::AtomicU64;
    static NEXT_DB_ID: AtomicU64 = AtomicU64::new(0);
    let id = NEXT_DB_ID.fetch_add(1, Ordering::Relaxed);
    format!("sqlite:file:tierkv_integration_{id}?mode=memory&cache=shared")
}

fn test_config() -> TierKvConfig {
    TierKvConfig {
        op_timeout_secs: 2,
        health_timeout_secs: 1,
        ..Default::default()
    }
}

/// Memory-over-SQLite-over-memory store: a realistic tier mix that
/// runs without Docker.
async fn mixed_store() -> TieredStore {
    let local = LocalStore::new(&mem_db_url()).await.unwrap();
    let tiers: Vec<Arc<dyn BackendAdapter>> = vec![
        Arc::new(MemoryStore::new()),
        Arc::new(local),
        Arc::new(MemoryStore::new()),
    ];
    TieredStore::with_tiers(test_config(), tiers, Arc::new(WriteAheadLog::in_memory()))
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn happy_full_lifecycle() {
    let store = mixed_store().await;
    store.init().await.unwrap();

    store.set("user:1", b"alice".to_vec(), SetOptions::default()).await.unwrap();
    store.set("user:2", b"bob".to_vec(), SetOptions::default()).await.unwrap();

    assert_eq!(store.get("user:1").await.unwrap(), Some(b"alice".to_vec()));
    assert_eq!(store.get("user:2").await.unwrap(), Some(b"bob".to_vec()));
    assert_eq!(store.get("user:3").await.unwrap(), None);

    store.delete("user:1").await.unwrap();
    assert_eq!(store.get("user:1").await.unwrap(), None);
    // Deleting an absent key is not an error
    store.delete("user:1").await.unwrap();

    store.close();
}

#[tokio::test]
async fn happy_retention_classes_round_trip() {
    let store = mixed_store().await;
    store.init().await.unwrap();

    store.set("t", b"x".to_vec(), SetOptions::tier(DataTier::Transient)).await.unwrap();
    store.set("s", b"x".to_vec(), SetOptions::default()).await.unwrap();
    store.set("a", b"x".to_vec(), SetOptions::tier(DataTier::Archive)).await.unwrap();

    let t = store.get_with_fallback("t").await.unwrap().unwrap();
    let s = store.get_with_fallback("s").await.unwrap().unwrap();
    let a = store.get_with_fallback("a").await.unwrap().unwrap();
    assert_eq!(t.data_tier, DataTier::Transient);
    assert_eq!(s.data_tier, DataTier::Staging);
    assert_eq!(a.data_tier, DataTier::Archive);
}

#[tokio::test]
async fn happy_ttl_expiry_reads_as_absent() {
    let store = mixed_store().await;
    store.init().await.unwrap();

    store
        .set("ephemeral", b"x".to_vec(), SetOptions::tier(DataTier::Transient).with_ttl(50))
        .await
        .unwrap();
    assert_eq!(store.get("ephemeral").await.unwrap(), Some(b"x".to_vec()));

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(store.get("ephemeral").await.unwrap(), None);
}

#[tokio::test]
async fn happy_exists_without_fetching() {
    let store = mixed_store().await;
    store.init().await.unwrap();

    store.set("present", b"x".to_vec(), SetOptions::default()).await.unwrap();
    assert!(store.exists("present").await.unwrap());
    assert!(!store.exists("absent").await.unwrap());

    store
        .set("fleeting", b"x".to_vec(), SetOptions::tier(DataTier::Transient).with_ttl(50))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(!store.exists("fleeting").await.unwrap());
}

#[tokio::test]
async fn happy_archive_ignores_ttl() {
    let store = mixed_store().await;
    store.init().await.unwrap();

    store
        .set("keep", b"x".to_vec(), SetOptions::tier(DataTier::Archive).with_ttl(10))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.get("keep").await.unwrap(), Some(b"x".to_vec()));
}

#[tokio::test]
async fn happy_keys_glob_filtering() {
    let store = mixed_store().await;
    store.init().await.unwrap();

    for key in ["session:1", "session:2", "config:a"] {
        store.set(key, b"x".to_vec(), SetOptions::default()).await.unwrap();
    }

    let mut sessions = store.keys(Some("session:*")).await.unwrap();
    sessions.sort();
    assert_eq!(sessions, vec!["session:1", "session:2"]);

    let all = store.keys(None).await.unwrap();
    assert_eq!(all.len(), 3);

    assert!(store.keys(Some("nothing:*")).await.unwrap().is_empty());
}

#[tokio::test]
async fn happy_status_snapshot() {
    let store = mixed_store().await;
    store.init().await.unwrap();

    let status = store.status();
    assert_eq!(status.active_tier, 0);
    assert_eq!(status.wal_entries, 0);
    assert!(!status.wal_degraded);
    assert_eq!(status.conflicts, 0);
    assert!(status.last_demotion.is_none());
    assert!(status.to_string().contains("tier=0"));
}

#[tokio::test]
async fn happy_fallback_read_finds_lower_tier_copy() {
    let local = Arc::new(LocalStore::new(&mem_db_url()).await.unwrap());
    let tiers: Vec<Arc<dyn BackendAdapter>> =
        vec![Arc::new(MemoryStore::new()), local.clone()];
    let store = TieredStore::with_tiers(test_config(), tiers, Arc::new(WriteAheadLog::in_memory()));
    store.init().await.unwrap();

    // Key exists only on the lower tier (e.g. left over from a previous
    // run of the process)
    let item = StoredItem::new("old".into(), b"survivor".to_vec(), Default::default());
    local.set(&item).await.unwrap();

    // The plain read stops at the active tier
    assert_eq!(store.get("old").await.unwrap(), None);
    // The explicit cascade finds it
    let found = store.get_with_fallback("old").await.unwrap().unwrap();
    assert_eq!(found.value, b"survivor");
}

// =============================================================================
// Failure paths
// =============================================================================

#[tokio::test]
async fn failure_outage_buffers_then_replays_through_sqlite() {
    let toggle = Arc::new(ToggleStore::new(true));
    let local = LocalStore::new(&mem_db_url()).await.unwrap();
    let tiers: Vec<Arc<dyn BackendAdapter>> = vec![
        toggle.clone(),
        Arc::new(local),
        Arc::new(MemoryStore::new()),
    ];
    let store = TieredStore::with_tiers(test_config(), tiers, Arc::new(WriteAheadLog::in_memory()));
    store.init().await.unwrap();

    toggle.set_healthy(false);
    for i in 0..20 {
        store
            .set(&format!("k{i}"), format!("v{i}").into_bytes(), SetOptions::default())
            .await
            .unwrap();
    }
    assert_eq!(store.status().active_tier, 1);
    assert_eq!(store.status().wal_entries, 20);

    toggle.set_healthy(true);
    store.health_check().await;
    assert_eq!(store.status().active_tier, 0);
    assert_eq!(store.status().wal_entries, 0);

    for i in 0..20 {
        assert_eq!(
            store.get(&format!("k{i}")).await.unwrap(),
            Some(format!("v{i}").into_bytes())
        );
    }
}

#[tokio::test]
async fn failure_wal_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let wal_path = dir.path().join("buffer.wal");
    let wal_path = wal_path.to_str().unwrap();

    // First process run: top tier down, writes buffered to disk
    {
        let toggle = Arc::new(ToggleStore::new(false));
        let tiers: Vec<Arc<dyn BackendAdapter>> =
            vec![toggle, Arc::new(MemoryStore::new())];
        let wal = Arc::new(WriteAheadLog::open(Some(wal_path)));
        let store = TieredStore::with_tiers(test_config(), tiers, wal);
        store.init().await.unwrap();

        store.set("persisted", b"across restart".to_vec(), SetOptions::default()).await.unwrap();
        store.set("dropped", b"x".to_vec(), SetOptions::default()).await.unwrap();
        store.delete("dropped").await.unwrap();
        assert_eq!(store.status().wal_entries, 3);
    }

    // Second run: top tier healthy, startup replay drains the buffer
    let top = Arc::new(ToggleStore::new(true));
    let tiers: Vec<Arc<dyn BackendAdapter>> = vec![top.clone(), Arc::new(MemoryStore::new())];
    let wal = Arc::new(WriteAheadLog::open(Some(wal_path)));
    assert_eq!(wal.len(), 3);

    let store = TieredStore::with_tiers(test_config(), tiers, wal);
    store.init().await.unwrap();

    assert_eq!(store.status().wal_entries, 0);
    assert_eq!(store.get("persisted").await.unwrap(), Some(b"across restart".to_vec()));
    assert_eq!(store.get("dropped").await.unwrap(), None);
}

#[tokio::test]
async fn failure_degraded_wal_still_accepts_writes() {
    let toggle = Arc::new(ToggleStore::new(false));
    let tiers: Vec<Arc<dyn BackendAdapter>> = vec![toggle, Arc::new(MemoryStore::new())];
    // Unwritable path: the buffer degrades to memory-only
    let wal = Arc::new(WriteAheadLog::open(Some("/nonexistent/dir/buffer.wal")));
    assert!(wal.is_degraded());

    let store = TieredStore::with_tiers(test_config(), tiers, wal);
    let mut events = store.events();
    store.init().await.unwrap();

    // Writes never fail because of WAL health
    store.set("k", b"v".to_vec(), SetOptions::default()).await.unwrap();
    assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

    let status = store.status();
    assert!(status.wal_degraded);
    assert_eq!(status.wal_entries, 1);

    let mut saw_degraded = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, StoreEvent::WalDegraded { .. }) {
            saw_degraded = true;
        }
    }
    assert!(saw_degraded, "expected a WalDegraded event at init");
}

#[tokio::test]
async fn failure_background_scheduler_promotes() {
    let toggle = Arc::new(ToggleStore::new(true));
    let tiers: Vec<Arc<dyn BackendAdapter>> =
        vec![toggle.clone(), Arc::new(MemoryStore::new())];
    let config = TierKvConfig {
        health_check_interval_secs: 1,
        op_timeout_secs: 2,
        health_timeout_secs: 1,
        ..Default::default()
    };
    let store = Arc::new(TieredStore::with_tiers(
        config,
        tiers,
        Arc::new(WriteAheadLog::in_memory()),
    ));
    store.init().await.unwrap();

    let runner = store.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    toggle.set_healthy(false);
    store.set("k", b"v".to_vec(), SetOptions::default()).await.unwrap();
    assert_eq!(store.status().active_tier, 1);

    toggle.set_healthy(true);
    // The scheduler probes on its interval and promotes without any
    // foreground call
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while store.status().active_tier != 0 {
        assert!(tokio::time::Instant::now() < deadline, "scheduler never promoted");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

    store.close();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}
