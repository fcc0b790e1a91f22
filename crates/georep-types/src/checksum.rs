//! Checksum algorithm descriptors.
//!
//! Digests travel as lowercase hex strings in response headers. Which
//! algorithms are requested transactionally and which are validated on the
//! received body are independent selections ([`ChecksumSet`]).

use serde::{Deserialize, Serialize};

/// Digest algorithms the protocol supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumAlgorithm {
    Md5,
    Crc64,
}

impl ChecksumAlgorithm {
    /// Wire header carrying this digest on requests and responses.
    #[must_use]
    pub fn header(self) -> &'static str {
        match self {
            Self::Md5 => "content-md5",
            Self::Crc64 => "x-content-crc64",
        }
    }

    /// Digest width in bytes.
    #[must_use]
    pub fn digest_len(self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Crc64 => 8,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Crc64 => "crc64",
        }
    }
}

/// Selection of digest algorithms for an operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumSet {
    pub md5: bool,
    pub crc64: bool,
}

impl ChecksumSet {
    pub const NONE: Self = Self {
        md5: false,
        crc64: false,
    };

    #[must_use]
    pub fn md5() -> Self {
        Self {
            md5: true,
            crc64: false,
        }
    }

    #[must_use]
    pub fn crc64() -> Self {
        Self {
            md5: false,
            crc64: true,
        }
    }

    #[must_use]
    pub fn any(self) -> bool {
        self.md5 || self.crc64
    }

    #[must_use]
    pub fn contains(self, algorithm: ChecksumAlgorithm) -> bool {
        match algorithm {
            ChecksumAlgorithm::Md5 => self.md5,
            ChecksumAlgorithm::Crc64 => self.crc64,
        }
    }

    /// The selected algorithms, in a fixed order.
    #[must_use]
    pub fn algorithms(self) -> Vec<ChecksumAlgorithm> {
        let mut out = Vec::new();
        if self.md5 {
            out.push(ChecksumAlgorithm::Md5);
        }
        if self.crc64 {
            out.push(ChecksumAlgorithm::Crc64);
        }
        out
    }
}
