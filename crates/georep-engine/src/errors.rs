//! Terminal operation failure surfaced to the caller.

use serde::Serialize;

use georep_types::{AttemptRecord, ErrorClass, StorageError};

/// Failure of a whole operation: final classification, the last
/// underlying error, and the full attempt history for diagnostics.
///
/// Transient failures are retried inside the executor and never surface
/// individually; this is the only failure shape callers see.
#[derive(Debug, Serialize, thiserror::Error)]
#[error("operation failed after {} attempt(s): {last_error}", history.len())]
pub struct OperationError {
    pub class: ErrorClass,
    pub last_error: StorageError,
    pub history: Vec<AttemptRecord>,
}

impl OperationError {
    #[must_use]
    pub fn new(last_error: StorageError, history: Vec<AttemptRecord>) -> Self {
        Self {
            class: last_error.class,
            last_error,
            history,
        }
    }

    /// Number of attempts actually made.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.history.len() as u32
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.class == ErrorClass::Cancelled
    }
}
