//! Attempt records and retry decisions.
//!
//! A sequence of [`AttemptRecord`]s forms an operation's execution history.
//! The retry policy consumes that history and produces a [`RetryDecision`];
//! the failed operation surfaces the history for diagnostics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ErrorClass;
use crate::location::StorageLocation;

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AttemptOutcome {
    Success,
    Failed { class: ErrorClass, retryable: bool },
    Cancelled,
}

/// One full request/response cycle within an operation's retry loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt index.
    pub index: u32,
    /// Replica this attempt targeted.
    pub target: StorageLocation,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    /// Bytes durably delivered to the sink during this attempt, including
    /// attempts that failed or were cancelled mid-copy.
    pub bytes_transferred: u64,
}

impl AttemptRecord {
    /// Elapsed wall time of this attempt.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        (self.ended_at - self.started_at).to_std().unwrap_or_default()
    }

    #[must_use]
    pub fn failed_class(&self) -> Option<ErrorClass> {
        match self.outcome {
            AttemptOutcome::Failed { class, .. } => Some(class),
            _ => None,
        }
    }
}

/// Produced by the retry policy for each failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    /// How long to wait before the next attempt. Zero when `retry` is false.
    pub backoff: Duration,
    /// Replica the policy suggests for the next attempt. `None` defers to
    /// the operation's location mode. Ignored once an endpoint is locked.
    pub target: Option<StorageLocation>,
}

impl RetryDecision {
    /// Terminal decision: stop retrying.
    #[must_use]
    pub fn give_up() -> Self {
        Self {
            retry: false,
            backoff: Duration::ZERO,
            target: None,
        }
    }

    #[must_use]
    pub fn retry_after(backoff: Duration, target: Option<StorageLocation>) -> Self {
        Self {
            retry: true,
            backoff,
            target,
        }
    }
}
