//! Stored item data structure.
//!
//! The [`StoredItem`] is the unit of storage that flows through every
//! backend tier. The value is an opaque byte payload; the store never
//! interprets it.

use serde::{Deserialize, Serialize};

use crate::config::ChecksumAlgorithm;
use crate::integrity;

/// Data-lifecycle tier of a stored item.
///
/// Orthogonal to which backend currently holds the item: this classifies
/// retention, not placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataTier {
    /// Ephemeral data, eligible for TTL expiry
    Transient,
    /// Working data, default classification
    Staging,
    /// Long-term data, never auto-expired even if a TTL is set
    Archive,
}

impl Default for DataTier {
    fn default() -> Self {
        DataTier::Staging
    }
}

impl std::fmt::Display for DataTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataTier::Transient => write!(f, "TRANSIENT"),
            DataTier::Staging => write!(f, "STAGING"),
            DataTier::Archive => write!(f, "ARCHIVE"),
        }
    }
}

impl DataTier {
    /// Stable numeric encoding used by the WAL and the SQL schema.
    pub fn as_u8(self) -> u8 {
        match self {
            DataTier::Transient => 0,
            DataTier::Staging => 1,
            DataTier::Archive => 2,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(DataTier::Transient),
            1 => Some(DataTier::Staging),
            2 => Some(DataTier::Archive),
            _ => None,
        }
    }
}

/// A key-value record with lifecycle and integrity metadata.
///
/// # Example
///
/// ```
/// use tierkv::{StoredItem, DataTier};
/// use tierkv::config::ChecksumAlgorithm;
///
/// let item = StoredItem::new("session:1".into(), b"payload".to_vec(), ChecksumAlgorithm::Sha256)
///     .with_tier(DataTier::Transient)
///     .with_ttl(30_000);
///
/// assert_eq!(item.data_tier, DataTier::Transient);
/// assert!(item.verify_checksum());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredItem {
    /// Unique key within the store's namespace
    pub key: String,
    /// Opaque serialized payload, hex-encoded in JSON envelopes
    #[serde(with = "value_hex")]
    pub value: Vec<u8>,
    /// Retention class
    #[serde(default)]
    pub data_tier: DataTier,
    /// Logical expiry in millis after `timestamp`; expired items read as absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    /// Epoch millis of creation or last write; last-writer-wins key
    pub timestamp: i64,
    /// Timestamp of last access (epoch millis)
    #[serde(default)]
    pub last_accessed: u64,
    /// Number of times accessed
    #[serde(default)]
    pub access_count: u64,
    /// Hex digest of `value`, computed at write time
    pub checksum: String,
}

impl StoredItem {
    /// Create a new item stamped with the current time and a fresh checksum.
    pub fn new(key: String, value: Vec<u8>, algo: ChecksumAlgorithm) -> Self {
        let checksum = integrity::checksum(algo, &value);
        Self {
            key,
            value,
            data_tier: DataTier::default(),
            ttl_ms: None,
            timestamp: now_ms(),
            last_accessed: 0,
            access_count: 0,
            checksum,
        }
    }

    #[must_use]
    pub fn with_tier(mut self, tier: DataTier) -> Self {
        self.data_tier = tier;
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Whether the item's TTL has elapsed at `now_ms`.
    ///
    /// Archive items never expire regardless of any TTL set on them.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        if self.data_tier == DataTier::Archive {
            return false;
        }
        match self.ttl_ms {
            Some(ttl) => now_ms.saturating_sub(self.timestamp) >= ttl as i64,
            None => false,
        }
    }

    /// Recompute the value digest and compare against the recorded checksum.
    pub fn verify_checksum(&self) -> bool {
        integrity::verify(&self.checksum, &self.value)
    }
}

/// Current epoch time in milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Serde adapter storing the byte payload as hex so JSON envelopes in
/// the remote tier stay valid UTF-8.
mod value_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
