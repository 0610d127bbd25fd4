//! Value checksums.
//!
//! Every stored value carries a hex digest computed at write time and
//! verified on read and during repair scans. The algorithm is fixed per
//! store instance via [`ChecksumAlgorithm`](crate::config::ChecksumAlgorithm).

use sha2::{Digest, Sha256};

use crate::config::ChecksumAlgorithm;

/// Compute the hex checksum of a value with the given algorithm.
pub fn checksum(algo: ChecksumAlgorithm, value: &[u8]) -> String {
    match algo {
        ChecksumAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(value);
            hex::encode(hasher.finalize())
        }
        ChecksumAlgorithm::Crc32 => {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(value);
            format!("{:08x}", hasher.finalize())
        }
    }
}

/// Verify a value against its recorded checksum.
///
/// The recorded string's length identifies the algorithm it was written
/// with (8 hex chars = CRC32, 64 = SHA-256), so verification survives a
/// config change between writes and reads.
pub fn verify(recorded: &str, value: &[u8]) -> bool {
    let algo = match recorded.len() {
        8 => ChecksumAlgorithm::Crc32,
        64 => ChecksumAlgorithm::Sha256,
        _ => return false,
    };
    checksum(algo, value) == recorded
}
