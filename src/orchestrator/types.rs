//! Orchestrator value types: write options, status snapshot, tier state.

use crate::stored_item::DataTier;

/// Options for a [`set`](super::TieredStore::set) call.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Retention class; defaults to [`DataTier::Staging`]
    pub data_tier: DataTier,
    /// Logical expiry in millis; ignored for Archive items
    pub ttl_ms: Option<u64>,
}

impl SetOptions {
    #[must_use]
    pub fn tier(data_tier: DataTier) -> Self {
        Self {
            data_tier,
            ttl_ms: None,
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }
}

/// Active tier index plus transition timestamps.
#[derive(Debug, Clone)]
pub struct TierState {
    pub active: usize,
    /// Epoch millis of the most recent promotion
    pub last_promotion: Option<i64>,
    /// Epoch millis of the most recent demotion
    pub last_demotion: Option<i64>,
}

impl Default for TierState {
    fn default() -> Self {
        Self {
            active: 0,
            last_promotion: None,
            last_demotion: None,
        }
    }
}

/// Point-in-time operational snapshot returned by
/// [`status`](super::TieredStore::status).
#[derive(Debug, Clone)]
pub struct StoreStatus {
    pub active_tier: usize,
    pub active_tier_name: &'static str,
    pub wal_entries: u64,
    pub wal_degraded: bool,
    pub last_promotion: Option<i64>,
    pub last_demotion: Option<i64>,
    /// Number of recorded split-brain resolutions
    pub conflicts: usize,
}

impl std::fmt::Display for StoreStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "tier={} ({}), wal={} entries{}, conflicts={}",
            self.active_tier,
            self.active_tier_name,
            self.wal_entries,
            if self.wal_degraded { " [degraded]" } else { "" },
            self.conflicts
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_options_default() {
        let opts = SetOptions::default();
        assert_eq!(opts.data_tier, DataTier::Staging);
        assert!(opts.ttl_ms.is_none());
    }

    #[test]
    fn test_set_options_builder() {
        let opts = SetOptions::tier(DataTier::Transient).with_ttl(30_000);
        assert_eq!(opts.data_tier, DataTier::Transient);
        assert_eq!(opts.ttl_ms, Some(30_000));
    }

    #[test]
    fn test_status_display() {
        let status = StoreStatus {
            active_tier: 1,
            active_tier_name: "local",
            wal_entries: 3,
            wal_degraded: true,
            last_promotion: None,
            last_demotion: Some(123),
            conflicts: 0,
        };
        let s = status.to_string();
        assert!(s.contains("tier=1 (local)"));
        assert!(s.contains("[degraded]"));
    }
}
