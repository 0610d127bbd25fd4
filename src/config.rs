//! Configuration for the tiered store.
//!
//! # Example
//!
//! ```
//! use tierkv::TierKvConfig;
//!
//! // Minimal config (uses defaults, in-memory tier only)
//! let config = TierKvConfig::default();
//! assert_eq!(config.health_check_interval_secs, 60);
//!
//! // Full config
//! let config = TierKvConfig {
//!     remote_url: Some("redis://localhost:6379".into()),
//!     local_path: Some("sqlite:tierkv.db".into()),
//!     wal_path: Some("./tierkv.wal".into()),
//!     health_check_interval_secs: 30,
//!     ..Default::default()
//! };
//! ```

use serde::Deserialize;

/// Checksum algorithm applied to stored values.
///
/// Sha256 is the default. Crc32 is available for high-churn deployments
/// where digest cost dominates and corruption detection (not tamper
/// resistance) is the goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Sha256,
    Crc32,
}

impl Default for ChecksumAlgorithm {
    fn default() -> Self {
        ChecksumAlgorithm::Sha256
    }
}

/// Configuration for the tiered store.
///
/// All fields have sensible defaults. Without `remote_url` and
/// `local_path` only the in-memory tier is constructed, which is fine
/// for tests but offers no durability.
#[derive(Debug, Clone, Deserialize)]
pub struct TierKvConfig {
    /// Redis connection string (e.g., "redis://localhost:6379")
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Key prefix applied to every key in the remote store
    #[serde(default)]
    pub remote_prefix: Option<String>,

    /// SQL connection string for the local persistent tier
    /// (e.g., "sqlite:tierkv.db")
    #[serde(default)]
    pub local_path: Option<String>,

    /// Path for the write-ahead buffer file. None = memory-only WAL
    /// (no durability across restarts).
    #[serde(default)]
    pub wal_path: Option<String>,

    /// Seconds between health probes of downed higher-priority tiers
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// Seconds between background integrity scans
    #[serde(default = "default_repair_interval_secs")]
    pub repair_interval_secs: u64,

    /// Timeout for a single foreground backend operation
    #[serde(default = "default_op_timeout_secs")]
    pub op_timeout_secs: u64,

    /// Timeout for a single health probe
    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,

    /// WAL entry count above which WalOverflow is emitted
    #[serde(default = "default_wal_max_entries")]
    pub wal_max_entries: u64,

    /// WAL oldest-entry age above which WalOverflow is emitted
    #[serde(default = "default_wal_max_age_secs")]
    pub wal_max_age_secs: u64,

    /// How much older than a corrupted copy a restore candidate may be
    /// and still be used (milliseconds)
    #[serde(default = "default_staleness_bound_ms")]
    pub staleness_bound_ms: i64,

    /// Page size for key scans during repair and clear
    #[serde(default = "default_scan_page_size")]
    pub scan_page_size: usize,

    /// Checksum algorithm for stored values
    #[serde(default)]
    pub checksum: ChecksumAlgorithm,
}

fn default_health_check_interval_secs() -> u64 { 60 }
fn default_repair_interval_secs() -> u64 { 300 }
fn default_op_timeout_secs() -> u64 { 5 }
fn default_health_timeout_secs() -> u64 { 5 }
fn default_wal_max_entries() -> u64 { 100_000 }
fn default_wal_max_age_secs() -> u64 { 3600 }
fn default_staleness_bound_ms() -> i64 { 86_400_000 } // 24h
fn default_scan_page_size() -> usize { 500 }

impl Default for TierKvConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            remote_prefix: None,
            local_path: None,
            wal_path: None,
            health_check_interval_secs: default_health_check_interval_secs(),
            repair_interval_secs: default_repair_interval_secs(),
            op_timeout_secs: default_op_timeout_secs(),
            health_timeout_secs: default_health_timeout_secs(),
            wal_max_entries: default_wal_max_entries(),
            wal_max_age_secs: default_wal_max_age_secs(),
            staleness_bound_ms: default_staleness_bound_ms(),
            scan_page_size: default_scan_page_size(),
            checksum: ChecksumAlgorithm::default(),
        }
    }
}
