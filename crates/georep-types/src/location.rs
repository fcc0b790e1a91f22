//! Endpoint locations and the per-operation location-targeting mode.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two replica locations serving the same logical resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageLocation {
    Primary,
    Secondary,
}

impl StorageLocation {
    /// The other replica.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Primary => Self::Secondary,
            Self::Secondary => Self::Primary,
        }
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Secondary => f.write_str("secondary"),
        }
    }
}

/// Base address of a replica endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which endpoint(s) an operation may target, and in what order.
///
/// The *Then* modes alternate between replicas on successive attempts; the
/// *Only* modes are fixed. An endpoint lock set during execution overrides
/// the mode for all subsequent attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationMode {
    PrimaryOnly,
    SecondaryOnly,
    PrimaryThenSecondary,
    SecondaryThenPrimary,
}

impl LocationMode {
    /// Target for a 1-based attempt index, before any lock is applied.
    #[must_use]
    pub fn location_for_attempt(self, attempt: u32) -> StorageLocation {
        let first = match self {
            Self::PrimaryOnly | Self::PrimaryThenSecondary => StorageLocation::Primary,
            Self::SecondaryOnly | Self::SecondaryThenPrimary => StorageLocation::Secondary,
        };
        match self {
            Self::PrimaryOnly | Self::SecondaryOnly => first,
            Self::PrimaryThenSecondary | Self::SecondaryThenPrimary => {
                // Attempt 1 hits the preferred replica, then alternate.
                if attempt % 2 == 1 {
                    first
                } else {
                    first.other()
                }
            }
        }
    }

    /// Whether the mode permits targeting `location` at all.
    #[must_use]
    pub fn permits(self, location: StorageLocation) -> bool {
        match self {
            Self::PrimaryOnly => location == StorageLocation::Primary,
            Self::SecondaryOnly => location == StorageLocation::Secondary,
            Self::PrimaryThenSecondary | Self::SecondaryThenPrimary => true,
        }
    }

    /// Whether the mode can ever target the secondary replica.
    #[must_use]
    pub fn uses_secondary(self) -> bool {
        self.permits(StorageLocation::Secondary)
    }
}
