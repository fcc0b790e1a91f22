//! Structured error model for storage operations.
//!
//! [`StorageError`] carries classification, retry metadata, and optional
//! diagnostic details. Construct via class-specific factory methods.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of an operation failure.
///
/// Determines default retry behavior and operator-facing categorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Transport-level failure: timeout, connection reset, DNS (retryable).
    TransientTransport,
    /// Server busy, throttled, or temporarily unavailable (retryable).
    RetryableServer,
    /// Transactional digest absent though validation was requested
    /// (retryable once, before any bytes have been delivered).
    ChecksumStale,
    /// Malformed request, authorization failure, type mismatch, or digest
    /// mismatch: never retried.
    FatalClient,
    /// Caller-initiated cancellation. Never retried, reported distinctly.
    Cancelled,
}

impl ErrorClass {
    /// Whether this class is retryable at all, before policy budgets apply.
    #[must_use]
    pub fn default_retryable(self) -> bool {
        matches!(
            self,
            Self::TransientTransport | Self::RetryableServer | Self::ChecksumStale
        )
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TransientTransport => "transient_transport",
            Self::RetryableServer => "retryable_server",
            Self::ChecksumStale => "checksum_stale",
            Self::FatalClient => "fatal_client",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Classified error from one attempt of a storage operation.
///
/// Construct via class-specific factory methods (e.g.
/// [`StorageError::transient_transport`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{class}] {code}: {message}")]
pub struct StorageError {
    pub class: ErrorClass,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    /// Server-requested delay before the next attempt, if it sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl StorageError {
    fn new(
        class: ErrorClass,
        retryable: bool,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            class,
            code: code.into(),
            message: message.into(),
            retryable,
            retry_after_ms: None,
            details: None,
        }
    }

    /// Transport-level failure (retryable).
    #[must_use]
    pub fn transient_transport(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::TransientTransport, true, code, message)
    }

    /// Server busy or throttled (retryable, honors `retry_after_ms`).
    #[must_use]
    pub fn server_busy(
        code: impl Into<String>,
        message: impl Into<String>,
        retry_after_ms: Option<u64>,
    ) -> Self {
        let mut err = Self::new(ErrorClass::RetryableServer, true, code, message);
        err.retry_after_ms = retry_after_ms;
        err
    }

    /// Recognized retryable status the interpreter expected (e.g. a 409
    /// during a pending server-side copy).
    #[must_use]
    pub fn expected_conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::RetryableServer, true, code, message)
    }

    /// Transactional digest missing from the response though validation
    /// was requested (retryable once).
    #[must_use]
    pub fn checksum_stale(algorithm: impl Into<String>) -> Self {
        let algorithm = algorithm.into();
        Self::new(
            ErrorClass::ChecksumStale,
            true,
            "CHECKSUM_ABSENT",
            format!("response carried no {algorithm} digest though validation was requested"),
        )
    }

    /// Digest mismatch on a non-resumed transfer (never retried).
    #[must_use]
    pub fn checksum_mismatch(
        algorithm: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::new(
            ErrorClass::FatalClient,
            false,
            "CHECKSUM_MISMATCH",
            format!(
                "{} digest mismatch: expected {}, computed {}",
                algorithm.into(),
                expected.into(),
                actual.into()
            ),
        )
    }

    /// Malformed request (never retried).
    #[must_use]
    pub fn malformed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::FatalClient, false, code, message)
    }

    /// Generic fatal client-side failure (never retried).
    #[must_use]
    pub fn fatal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::FatalClient, false, code, message)
    }

    /// Authorization failure (never retried).
    #[must_use]
    pub fn auth(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::FatalClient, false, code, message)
    }

    /// Resource-type or response-shape mismatch (never retried).
    #[must_use]
    pub fn type_mismatch(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::FatalClient, false, code, message)
    }

    /// Caller-initiated cancellation.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(
            ErrorClass::Cancelled,
            false,
            "CANCELLED",
            "operation cancelled by caller",
        )
    }

    /// Attach structured diagnostic details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// True when the class and the error both permit a retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retryable && self.class.default_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_transport_is_retryable() {
        let err = StorageError::transient_transport("CONN_RESET", "connection reset by peer");
        assert_eq!(err.class, ErrorClass::TransientTransport);
        assert!(err.is_retryable());
    }

    #[test]
    fn fatal_factories_are_not_retryable() {
        for err in [
            StorageError::malformed("BAD_RANGE", "range start beyond resource end"),
            StorageError::auth("SIGNATURE", "signature did not validate"),
            StorageError::type_mismatch("NOT_A_BLOB", "resource is a directory"),
            StorageError::checksum_mismatch("md5", "aa", "bb"),
        ] {
            assert_eq!(err.class, ErrorClass::FatalClient);
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn server_busy_carries_retry_after() {
        let err = StorageError::server_busy("THROTTLED", "server busy", Some(5000));
        assert_eq!(err.class, ErrorClass::RetryableServer);
        assert_eq!(err.retry_after_ms, Some(5000));
        assert!(err.is_retryable());
    }

    #[test]
    fn checksum_stale_is_retryable() {
        let err = StorageError::checksum_stale("md5");
        assert_eq!(err.class, ErrorClass::ChecksumStale);
        assert!(err.is_retryable());
        assert_eq!(err.code, "CHECKSUM_ABSENT");
    }

    #[test]
    fn cancelled_is_terminal() {
        let err = StorageError::cancelled();
        assert_eq!(err.class, ErrorClass::Cancelled);
        assert!(!err.is_retryable());
    }

    #[test]
    fn serde_roundtrip() {
        let err = StorageError::server_busy("THROTTLED", "slow down", Some(2500))
            .with_details(serde_json::json!({"endpoint": "secondary"}));
        let json = serde_json::to_string(&err).unwrap();
        let back: StorageError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }

    #[test]
    fn display_format() {
        let err = StorageError::malformed("BAD_RANGE", "negative length");
        assert_eq!(err.to_string(), "[fatal_client] BAD_RANGE: negative length");
    }
}
