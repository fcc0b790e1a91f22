//! Single-pass digest computation and validation.
//!
//! Digests are computed incrementally as bytes pass through the stream
//! copier; nothing is re-read. Comparison is over lowercase hex strings.

use crc::{Crc, CRC_64_XZ};
use md5::{Digest as _, Md5};

use georep_types::{ChecksumAlgorithm, ChecksumSet};

static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

/// Running digest state for the algorithms an operation validates.
///
/// Created once per operation and fed across attempts, so a resumed
/// transfer ends up hashing the concatenation of every delivered byte.
pub struct DigestSet {
    md5: Option<Md5>,
    crc64: Option<crc::Digest<'static, u64>>,
}

impl DigestSet {
    #[must_use]
    pub fn for_set(set: ChecksumSet) -> Self {
        Self {
            md5: set.md5.then(Md5::new),
            crc64: set.crc64.then(|| CRC64.digest()),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        if let Some(md5) = self.md5.as_mut() {
            md5.update(chunk);
        }
        if let Some(crc) = self.crc64.as_mut() {
            crc.update(chunk);
        }
    }

    /// Consume the running state and produce hex-encoded digests.
    #[must_use]
    pub fn finalize(self) -> ComputedDigests {
        ComputedDigests {
            md5: self.md5.map(|h| hex::encode(h.finalize())),
            crc64: self.crc64.map(|d| format!("{:016x}", d.finalize())),
        }
    }
}

/// Hex-encoded digests computed over the delivered bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedDigests {
    pub md5: Option<String>,
    pub crc64: Option<String>,
}

impl ComputedDigests {
    #[must_use]
    pub fn get(&self, algorithm: ChecksumAlgorithm) -> Option<&str> {
        match algorithm {
            ChecksumAlgorithm::Md5 => self.md5.as_deref(),
            ChecksumAlgorithm::Crc64 => self.crc64.as_deref(),
        }
    }
}

/// Compare a declared digest against a computed one.
#[must_use]
pub fn digests_match(expected: &str, actual: &str) -> bool {
    expected.eq_ignore_ascii_case(actual)
}
