//! Shared georep protocol and error model types.
//!
//! This crate is dependency-light so it can sit on both sides of the
//! engine boundary: the executor consumes these types, and domain glue
//! (request builders, response interpreters) produces them.

pub mod attempt;
pub mod checksum;
pub mod error;
pub mod location;

pub use attempt::{AttemptOutcome, AttemptRecord, RetryDecision};
pub use checksum::{ChecksumAlgorithm, ChecksumSet};
pub use error::{ErrorClass, StorageError};
pub use location::{Endpoint, LocationMode, StorageLocation};
