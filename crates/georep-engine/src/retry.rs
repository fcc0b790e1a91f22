//! Retry policy: when to retry, how long to wait, where to aim next.
//!
//! A policy is stateless across operations and deterministic given
//! identical history, so retry behavior is testable in isolation. Jitter
//! is derived from the attempt index rather than an RNG for the same
//! reason.

use std::time::Duration;

use georep_types::{AttemptOutcome, AttemptRecord, ErrorClass, RetryDecision};

/// Decides, per failed attempt, whether and how to continue.
pub trait RetryPolicy: Send + Sync {
    /// `history` always ends with the attempt that just failed.
    fn decide(&self, history: &[AttemptRecord]) -> RetryDecision;
}

/// Exponential backoff with a delay cap, deterministic jitter, and both
/// attempt-count and elapsed-time budgets.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Total attempts allowed, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Wall-clock budget measured over the recorded history; `None`
    /// disables the elapsed check.
    pub max_elapsed: Option<Duration>,
    /// Jitter fraction in `[0, 1)`: each delay is scaled by a factor in
    /// `[1 - jitter, 1 + jitter)`.
    pub jitter: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_elapsed: None,
            jitter: 0.2,
        }
    }
}

impl ExponentialBackoff {
    /// Policy with a fixed attempt budget and default delays.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let delay_ms = (self.base_delay.as_millis() as u64).saturating_mul(1u64 << exp);
        let capped = Duration::from_millis(delay_ms).min(self.max_delay);
        apply_jitter(capped, attempt, self.jitter)
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn decide(&self, history: &[AttemptRecord]) -> RetryDecision {
        let Some(last) = history.last() else {
            return RetryDecision::give_up();
        };

        let (class, retryable) = match last.outcome {
            AttemptOutcome::Failed { class, retryable } => (class, retryable),
            // Success or cancellation never reaches the policy; refuse
            // rather than guess.
            _ => return RetryDecision::give_up(),
        };
        if !retryable || !class.default_retryable() {
            return RetryDecision::give_up();
        }

        // A stale checksum may be a transient server omission; give it
        // exactly one more chance.
        if class == ErrorClass::ChecksumStale
            && history[..history.len() - 1]
                .iter()
                .any(|rec| rec.failed_class() == Some(ErrorClass::ChecksumStale))
        {
            return RetryDecision::give_up();
        }

        let attempts = history.len() as u32;
        if attempts >= self.max_attempts {
            return RetryDecision::give_up();
        }

        if let Some(budget) = self.max_elapsed {
            let elapsed = (last.ended_at - history[0].started_at)
                .to_std()
                .unwrap_or_default();
            if elapsed >= budget {
                return RetryDecision::give_up();
            }
        }

        RetryDecision::retry_after(self.backoff_for(attempts), Some(last.target.other()))
    }
}

/// Deterministic jitter: a splitmix-style hash of the attempt index
/// produces a scale factor in `[1 - jitter, 1 + jitter)`.
fn apply_jitter(delay: Duration, attempt: u32, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let mut z = u64::from(attempt).wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    let unit = (z >> 11) as f64 / (1u64 << 53) as f64;
    let scale = 1.0 + jitter * (2.0 * unit - 1.0);
    delay.mul_f64(scale.max(0.0))
}
