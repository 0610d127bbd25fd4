// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Write-ahead buffer for mutations accepted while a higher-priority
//! tier is down.
//!
//! Entries are held in memory in sequence order and mirrored to an
//! append-only binary file so they survive a process restart. Each
//! on-disk frame is `TKWL` magic + version + fixed header + payload +
//! CRC32 trailer; recovery decodes until the first bad checksum, skips
//! interior corruption by scanning for the next magic, and rewrites the
//! file from the surviving entries.
//!
//! If the file becomes unwritable the log flips to degraded mode:
//! appends keep succeeding in memory and the orchestrator surfaces the
//! loss of durability as an event. The WAL never fails silently and
//! never rejects a write.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::backend::traits::StorageError;
use crate::stored_item::DataTier;

const WAL_MAGIC: &[u8; 4] = b"TKWL";
const WAL_VERSION: u8 = 1;

const OP_SET: u8 = 1;
const OP_DELETE: u8 = 2;

/// On-disk sentinel for an absent TTL. A real TTL of zero is a valid
/// immediately-expiring item and must survive the roundtrip.
const NO_TTL: u64 = u64::MAX;

/// magic(4) + version(1) + op(1) + tier(1) + key_len(2) + value_len(4)
/// + checksum_len(2) + ttl_ms(8) + sequence(8) + timestamp(8) = 39 bytes
const HEADER_SIZE: usize = 39;
const CRC_SIZE: usize = 4;

/// The mutation carried by a WAL entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalOp {
    Set {
        value: Vec<u8>,
        data_tier: DataTier,
        ttl_ms: Option<u64>,
        /// Value digest recorded at write time, re-verified at replay
        checksum: String,
    },
    Delete,
}

/// A single buffered mutation, ordered by `sequence`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    pub sequence: u64,
    pub key: String,
    pub timestamp: i64,
    pub op: WalOp,
}

impl WalEntry {
    /// Encode to the binary frame format.
    pub fn encode(&self) -> Result<Vec<u8>, StorageError> {
        let key_bytes = self.key.as_bytes();
        if key_bytes.len() > u16::MAX as usize {
            return Err(StorageError::Unrecoverable(format!(
                "key too long for WAL frame: {} bytes",
                key_bytes.len()
            )));
        }

        let (op_code, tier, ttl, value, checksum): (u8, u8, u64, &[u8], &[u8]) = match &self.op {
            WalOp::Set { value, data_tier, ttl_ms, checksum } => {
                if value.len() > u32::MAX as usize {
                    return Err(StorageError::Unrecoverable(format!(
                        "value too long for WAL frame: {} bytes",
                        value.len()
                    )));
                }
                (
                    OP_SET,
                    data_tier.as_u8(),
                    ttl_ms.unwrap_or(NO_TTL),
                    value,
                    checksum.as_bytes(),
                )
            }
            WalOp::Delete => (OP_DELETE, 0, NO_TTL, &[], &[]),
        };

        let mut buf = Vec::with_capacity(HEADER_SIZE + key_bytes.len() + value.len() + checksum.len() + CRC_SIZE);
        buf.extend_from_slice(WAL_MAGIC);
        buf.push(WAL_VERSION);
        buf.push(op_code);
        buf.push(tier);
        buf.extend_from_slice(&(key_bytes.len() as u16).to_le_bytes());
        buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(checksum.len() as u16).to_le_bytes());
        buf.extend_from_slice(&ttl.to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(key_bytes);
        buf.extend_from_slice(value);
        buf.extend_from_slice(checksum);

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decode one frame from the front of `data`, returning the entry
    /// and the number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), String> {
        if data.len() < HEADER_SIZE + CRC_SIZE {
            return Err("frame too short".into());
        }
        if &data[0..4] != WAL_MAGIC {
            return Err("invalid magic".into());
        }
        let version = data[4];
        if version != WAL_VERSION {
            return Err(format!("unsupported WAL version: {version}"));
        }

        let op_code = data[5];
        let tier = data[6];
        let key_len = u16::from_le_bytes([data[7], data[8]]) as usize;
        let value_len = u32::from_le_bytes([data[9], data[10], data[11], data[12]]) as usize;
        let checksum_len = u16::from_le_bytes([data[13], data[14]]) as usize;
        let ttl_ms = u64::from_le_bytes(data[15..23].try_into().map_err(|_| "bad header")?);
        let sequence = u64::from_le_bytes(data[23..31].try_into().map_err(|_| "bad header")?);
        let timestamp = i64::from_le_bytes(data[31..39].try_into().map_err(|_| "bad header")?);

        let total_len = HEADER_SIZE + key_len + value_len + checksum_len + CRC_SIZE;
        if data.len() < total_len {
            return Err("frame truncated".into());
        }

        let stored_crc = u32::from_le_bytes(
            data[total_len - CRC_SIZE..total_len]
                .try_into()
                .map_err(|_| "bad trailer")?,
        );
        let calculated_crc = crc32fast::hash(&data[..total_len - CRC_SIZE]);
        if stored_crc != calculated_crc {
            return Err(format!(
                "CRC mismatch: stored={stored_crc}, calculated={calculated_crc}"
            ));
        }

        let mut offset = HEADER_SIZE;
        let key = String::from_utf8_lossy(&data[offset..offset + key_len]).to_string();
        offset += key_len;
        let value = data[offset..offset + value_len].to_vec();
        offset += value_len;
        let checksum = String::from_utf8_lossy(&data[offset..offset + checksum_len]).to_string();

        let op = match op_code {
            OP_SET => WalOp::Set {
                value,
                data_tier: DataTier::from_u8(tier).ok_or_else(|| format!("unknown data tier: {tier}"))?,
                ttl_ms: if ttl_ms == NO_TTL { None } else { Some(ttl_ms) },
                checksum,
            },
            OP_DELETE => WalOp::Delete,
            other => return Err(format!("unknown operation: {other}")),
        };

        Ok((
            WalEntry {
                sequence,
                key,
                timestamp,
                op,
            },
            total_len,
        ))
    }
}

/// Point-in-time WAL statistics.
#[derive(Debug, Clone)]
pub struct WalStats {
    pub entries: u64,
    pub appended_total: u64,
    pub replayed_total: u64,
    pub corrupt_skipped: u64,
    pub degraded: bool,
    pub file_size_bytes: u64,
    pub oldest_timestamp: Option<i64>,
}

struct WalInner {
    entries: BTreeMap<u64, WalEntry>,
    writer: Option<BufWriter<File>>,
    degraded: Option<String>,
}

/// Durable ordered buffer of mutations awaiting replay.
pub struct WriteAheadLog {
    path: Option<PathBuf>,
    inner: Mutex<WalInner>,
    next_sequence: AtomicU64,
    appended_total: AtomicU64,
    replayed_total: AtomicU64,
    corrupt_skipped: AtomicU64,
}

impl WriteAheadLog {
    /// Open the WAL, recovering any entries persisted by a previous run.
    ///
    /// A `None` path yields a memory-only log. An unreadable or
    /// unwritable file does not fail the open; the log starts degraded
    /// and the condition is surfaced through [`WalStats`].
    pub fn open(path: Option<&str>) -> Self {
        let path = path.map(PathBuf::from);

        let mut entries = BTreeMap::new();
        let mut corrupt_skipped = 0u64;
        let mut degraded = None;
        let mut writer = None;

        if let Some(p) = &path {
            match Self::recover(p) {
                Ok((recovered, skipped, had_corruption)) => {
                    corrupt_skipped = skipped;
                    for entry in recovered {
                        entries.insert(entry.sequence, entry);
                    }
                    if had_corruption {
                        // Rewrite so the file holds only verified frames
                        if let Err(e) = Self::rewrite_file(p, entries.values()) {
                            warn!(path = %p.display(), error = %e, "WAL rewrite after recovery failed");
                            degraded = Some(e);
                        }
                    }
                }
                Err(e) => {
                    warn!(path = %p.display(), error = %e, "WAL recovery failed, starting degraded");
                    degraded = Some(e);
                }
            }

            if degraded.is_none() {
                match OpenOptions::new().create(true).append(true).open(p) {
                    Ok(file) => writer = Some(BufWriter::new(file)),
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "WAL file unwritable, starting degraded");
                        degraded = Some(e.to_string());
                    }
                }
            }

            info!(
                path = %p.display(),
                recovered = entries.len(),
                corrupt_skipped,
                degraded = degraded.is_some(),
                "WAL opened (binary format v{})", WAL_VERSION
            );
        }

        let next_sequence = entries.keys().next_back().map_or(1, |s| s + 1);

        Self {
            path,
            inner: Mutex::new(WalInner {
                entries,
                writer,
                degraded,
            }),
            next_sequence: AtomicU64::new(next_sequence),
            appended_total: AtomicU64::new(0),
            replayed_total: AtomicU64::new(0),
            corrupt_skipped: AtomicU64::new(corrupt_skipped),
        }
    }

    /// Memory-only WAL with no durability across restarts.
    pub fn in_memory() -> Self {
        Self::open(None)
    }

    fn recover(path: &Path) -> Result<(Vec<WalEntry>, u64, bool), String> {
        if !path.exists() {
            return Ok((Vec::new(), 0, false));
        }
        let mut file = File::open(path).map_err(|e| e.to_string())?;
        let mut data = Vec::new();
        file.read_to_end(&mut data).map_err(|e| e.to_string())?;

        let mut entries = Vec::new();
        let mut skipped = 0u64;
        let mut had_corruption = false;
        let mut offset = 0usize;

        while offset < data.len() {
            match WalEntry::decode(&data[offset..]) {
                Ok((entry, consumed)) => {
                    entries.push(entry);
                    offset += consumed;
                }
                Err(e) => {
                    warn!(offset, error = %e, "skipping corrupted WAL frame");
                    had_corruption = true;
                    skipped += 1;
                    // Scan for the next magic boundary
                    offset += 1;
                    while offset + 4 <= data.len() && &data[offset..offset + 4] != WAL_MAGIC {
                        offset += 1;
                    }
                    if offset + 4 > data.len() {
                        break;
                    }
                }
            }
        }

        Ok((entries, skipped, had_corruption))
    }

    fn rewrite_file<'a>(
        path: &Path,
        entries: impl Iterator<Item = &'a WalEntry>,
    ) -> Result<(), String> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| e.to_string())?;
        let mut writer = BufWriter::new(file);
        for entry in entries {
            let frame = entry.encode().map_err(|e| e.to_string())?;
            writer.write_all(&frame).map_err(|e| e.to_string())?;
        }
        writer.flush().map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Append a mutation, returning its assigned sequence number.
    ///
    /// Always succeeds for well-formed entries: a file write failure
    /// flips the log to degraded mode instead of erroring.
    pub fn append(&self, key: &str, timestamp: i64, op: WalOp) -> Result<u64, StorageError> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let entry = WalEntry {
            sequence,
            key: key.to_string(),
            timestamp,
            op,
        };
        let frame = entry.encode()?;

        let mut inner = self.inner.lock();
        if inner.degraded.is_none() {
            if let Some(writer) = inner.writer.as_mut() {
                let result = writer.write_all(&frame).and_then(|_| writer.flush());
                if let Err(e) = result {
                    warn!(error = %e, "WAL file write failed, flipping to degraded mode");
                    inner.degraded = Some(e.to_string());
                    inner.writer = None;
                }
            }
        }
        inner.entries.insert(sequence, entry);
        drop(inner);

        self.appended_total.fetch_add(1, Ordering::Relaxed);
        Ok(sequence)
    }

    /// All pending entries in ascending sequence order.
    pub fn drain(&self) -> Vec<WalEntry> {
        self.inner.lock().entries.values().cloned().collect()
    }

    /// Remove every entry with sequence <= `sequence` and rewrite the
    /// file to the surviving set. Call only after the target tier
    /// confirmed the replayed writes.
    pub fn truncate_through(&self, sequence: u64) {
        let mut inner = self.inner.lock();
        let keep = inner.entries.split_off(&(sequence + 1));
        let removed = inner.entries.len() as u64;
        inner.entries = keep;
        self.replayed_total.fetch_add(removed, Ordering::Relaxed);

        if let Some(path) = &self.path {
            if inner.degraded.is_none() {
                inner.writer = None;
                match Self::rewrite_file(path, inner.entries.values()) {
                    Ok(()) => match OpenOptions::new().append(true).open(path) {
                        Ok(file) => inner.writer = Some(BufWriter::new(file)),
                        Err(e) => {
                            warn!(error = %e, "WAL reopen after truncation failed");
                            inner.degraded = Some(e.to_string());
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, "WAL truncation rewrite failed");
                        inner.degraded = Some(e);
                    }
                }
            }
        }
    }

    pub fn len(&self) -> u64 {
        self.inner.lock().entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Timestamp of the oldest pending entry, if any.
    pub fn oldest_timestamp(&self) -> Option<i64> {
        self.inner
            .lock()
            .entries
            .values()
            .next()
            .map(|e| e.timestamp)
    }

    pub fn is_degraded(&self) -> bool {
        self.inner.lock().degraded.is_some()
    }

    pub fn degraded_reason(&self) -> Option<String> {
        self.inner.lock().degraded.clone()
    }

    pub fn file_size_bytes(&self) -> u64 {
        self.path
            .as_ref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map_or(0, |m| m.len())
    }

    pub fn stats(&self) -> WalStats {
        let inner = self.inner.lock();
        let entries = inner.entries.len() as u64;
        let degraded = inner.degraded.is_some();
        let oldest_timestamp = inner.entries.values().next().map(|e| e.timestamp);
        drop(inner);

        WalStats {
            entries,
            appended_total: self.appended_total.load(Ordering::Relaxed),
            replayed_total: self.replayed_total.load(Ordering::Relaxed),
            corrupt_skipped: self.corrupt_skipped.load(Ordering::Relaxed),
            degraded,
            file_size_bytes: self.file_size_bytes(),
            oldest_timestamp,
        }
    }
}
