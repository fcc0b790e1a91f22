//! The attempt loop: endpoint selection, cancellable send, resumable body
//! copy, digest validation, failure classification, and backoff.
//!
//! Within one operation execution is strictly sequential; attempt N's
//! request reflects attempt N-1's recorded failure and resumption offset.
//! Concurrency across operations belongs to the caller.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use georep_types::{
    AttemptOutcome, AttemptRecord, ChecksumAlgorithm, ErrorClass, LocationMode, StorageError,
    StorageLocation,
};

use crate::copier::{self, CopyErrorKind};
use crate::descriptor::{AttemptContext, OperationDescriptor};
use crate::digest::{self, DigestSet};
use crate::errors::OperationError;
use crate::retry::RetryPolicy;
use crate::transport::{Transport, TransportError};

enum AttemptEnd<T> {
    Done(T),
    Fail(StorageError),
    Cancelled,
}

/// Drive `descriptor` to completion against `transport`, consulting
/// `policy` after each retryable failure.
///
/// # Errors
///
/// Returns an [`OperationError`] carrying the final classification, the
/// last underlying error, and the full attempt history when retries are
/// exhausted, a fatal failure occurs, or the operation is cancelled.
pub async fn execute<T, Tr, P>(
    mut descriptor: OperationDescriptor<T>,
    transport: &Tr,
    policy: &P,
    cancel: &CancellationToken,
) -> Result<T, OperationError>
where
    Tr: Transport,
    P: RetryPolicy + ?Sized,
{
    if let Err(err) = check_configuration(&descriptor) {
        return Err(OperationError::new(err, Vec::new()));
    }

    let original_offset = descriptor.offset;
    let validating = descriptor.validation_checksums.any();

    let mut history: Vec<AttemptRecord> = Vec::new();
    // Bytes durably delivered to the sink across all attempts.
    let mut delivered: u64 = 0;
    let mut locked_location: Option<StorageLocation> = None;
    let mut locked_etag: Option<String> = None;
    let mut policy_target: Option<StorageLocation> = None;
    let mut last_error: Option<StorageError> = None;
    // Whole-resource digest state, fed across attempts so a resumed
    // transfer hashes the concatenation of every delivered byte.
    let mut running_digest: Option<DigestSet> = None;
    // Expected digests pinned from the first body-bearing response.
    let mut expected_digests: Vec<(ChecksumAlgorithm, String)> = Vec::new();
    // Absolute end offset of the transfer, pinned from content-length.
    let mut expected_total: Option<u64> = None;

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;

        if cancel.is_cancelled() {
            return Err(OperationError::new(StorageError::cancelled(), history));
        }

        let mut target = locked_location
            .or_else(|| policy_target.filter(|t| descriptor.location_mode.permits(*t)))
            .unwrap_or_else(|| descriptor.location_mode.location_for_attempt(attempt));
        if target == StorageLocation::Secondary && descriptor.secondary.is_none() {
            // SecondaryOnly without a secondary is rejected up front, so
            // the mode here also permits the primary.
            target = StorageLocation::Primary;
        }

        let mut ctx = AttemptContext {
            attempt,
            target,
            offset: original_offset + delivered,
            remaining: descriptor.length.map(|len| len.saturating_sub(delivered)),
            bytes_delivered: delivered,
            requested_checksums: descriptor.requested_checksums,
            locked_location,
            locked_etag: locked_etag.clone(),
        };

        if attempt > 1 {
            if let (Some(hook), Some(err)) = (descriptor.on_retry.as_mut(), last_error.as_ref()) {
                hook(err, &mut ctx);
                locked_location = ctx.locked_location;
                locked_etag = ctx.locked_etag.clone();
                if let Some(lock) = ctx.locked_location {
                    if lock == StorageLocation::Primary || descriptor.secondary.is_some() {
                        ctx.target = lock;
                    }
                }
            }
        }
        let target = ctx.target;

        let endpoint = match (target, descriptor.secondary.as_ref()) {
            (StorageLocation::Secondary, Some(secondary)) => secondary,
            _ => &descriptor.primary,
        };
        let request = (descriptor.build_request)(endpoint, &ctx);
        let started_at = Utc::now();
        tracing::debug!(
            attempt,
            target = %target,
            offset = ctx.offset,
            method = %request.method,
            "Sending attempt"
        );

        // Dropping the in-flight send future on cancellation releases the
        // connection; the transport also observes the token itself.
        let send_result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TransportError::Cancelled),
            result = transport.send(request, cancel) => result,
        };

        let mut bytes_this: u64 = 0;
        let end: AttemptEnd<T> = match send_result {
            Err(TransportError::Cancelled) => AttemptEnd::Cancelled,
            Err(err) => AttemptEnd::Fail(err.into_storage_error()),
            Ok(mut response) => 'attempt: {
                let head = response.head;

                if head.is_success() && descriptor.sink.is_some() {
                    if validating && delivered == 0 && expected_digests.is_empty() {
                        for alg in descriptor.validation_checksums.algorithms() {
                            match head.header(alg.header()) {
                                Some(value) => expected_digests.push((alg, value.to_string())),
                                None => {
                                    expected_digests.clear();
                                    break 'attempt AttemptEnd::Fail(StorageError::checksum_stale(
                                        alg.as_str(),
                                    ));
                                }
                            }
                        }
                    }
                    if expected_total.is_none() {
                        if let Some(len) = head.content_length() {
                            expected_total = Some(ctx.offset + len);
                        }
                    }
                    if locked_etag.is_none() {
                        locked_etag = head.etag().map(str::to_string);
                    }

                    // Created even when this response carries no body, so
                    // finalization below cannot be skipped and an empty
                    // delivery fails validation instead of passing silently.
                    if validating && running_digest.is_none() {
                        running_digest = Some(DigestSet::for_set(descriptor.validation_checksums));
                    }

                    if let (Some(body), Some(sink)) =
                        (response.body.take(), descriptor.sink.as_mut())
                    {
                        let copy_result = copier::copy_body(
                            body,
                            sink.as_mut(),
                            running_digest.as_mut(),
                            delivered,
                            descriptor.progress.as_ref(),
                            cancel,
                        )
                        .await;
                        match copy_result {
                            Ok(copied) => {
                                bytes_this = copied;
                                delivered += copied;
                            }
                            Err(err) => {
                                bytes_this = err.bytes_copied;
                                delivered += err.bytes_copied;
                                if bytes_this > 0 {
                                    locked_location = Some(target);
                                }
                                break 'attempt match err.kind {
                                    CopyErrorKind::Cancelled => AttemptEnd::Cancelled,
                                    CopyErrorKind::Read(te) => {
                                        AttemptEnd::Fail(te.into_storage_error())
                                    }
                                    CopyErrorKind::Write(io_err) => {
                                        AttemptEnd::Fail(StorageError::fatal(
                                            "SINK_WRITE",
                                            format!("destination sink write failed: {io_err}"),
                                        ))
                                    }
                                };
                            }
                        }
                    }
                    if bytes_this > 0 {
                        locked_location = Some(target);
                    }

                    if let Some(total) = expected_total {
                        let expected_delivered = total.saturating_sub(original_offset);
                        if delivered < expected_delivered {
                            break 'attempt AttemptEnd::Fail(StorageError::transient_transport(
                                "SHORT_READ",
                                format!(
                                    "body ended after {delivered} of {expected_delivered} bytes"
                                ),
                            ));
                        }
                        if delivered > expected_delivered {
                            break 'attempt AttemptEnd::Fail(StorageError::fatal(
                                "OVERLONG_BODY",
                                format!("received {delivered} bytes, expected {expected_delivered}"),
                            ));
                        }
                    }

                    if validating {
                        if let Some(state) = running_digest.take() {
                            let computed = state.finalize();
                            let mut mismatch = None;
                            for (alg, expected) in &expected_digests {
                                let actual = computed.get(*alg).unwrap_or("");
                                if !digest::digests_match(expected, actual) {
                                    mismatch = Some(StorageError::checksum_mismatch(
                                        alg.as_str(),
                                        expected.clone(),
                                        actual,
                                    ));
                                    break;
                                }
                            }
                            if let Some(err) = mismatch {
                                break 'attempt AttemptEnd::Fail(err);
                            }
                        }
                    }
                }

                match (descriptor.interpret_response)(&head, &ctx) {
                    Ok(value) => AttemptEnd::Done(value),
                    Err(err) => AttemptEnd::Fail(err),
                }
            }
        };

        let ended_at = Utc::now();
        match end {
            AttemptEnd::Done(value) => {
                history.push(record(
                    attempt,
                    target,
                    started_at,
                    ended_at,
                    AttemptOutcome::Success,
                    bytes_this,
                ));
                tracing::debug!(attempt, target = %target, bytes = bytes_this, "Attempt succeeded");
                return Ok(value);
            }
            AttemptEnd::Cancelled => {
                history.push(record(
                    attempt,
                    target,
                    started_at,
                    ended_at,
                    AttemptOutcome::Cancelled,
                    bytes_this,
                ));
                tracing::debug!(
                    attempt,
                    target = %target,
                    bytes = bytes_this,
                    "Operation cancelled mid-attempt"
                );
                return Err(OperationError::new(StorageError::cancelled(), history));
            }
            AttemptEnd::Fail(err) => {
                let retryable = err.is_retryable();
                history.push(record(
                    attempt,
                    target,
                    started_at,
                    ended_at,
                    AttemptOutcome::Failed {
                        class: err.class,
                        retryable,
                    },
                    bytes_this,
                ));

                if err.class == ErrorClass::Cancelled {
                    return Err(OperationError::new(err, history));
                }
                if !retryable {
                    tracing::error!(
                        attempt,
                        class = %err.class,
                        code = %err.code,
                        "Fatal failure, not retrying"
                    );
                    return Err(OperationError::new(err, history));
                }

                let decision = policy.decide(&history);
                if !decision.retry {
                    tracing::error!(
                        attempt,
                        class = %err.class,
                        code = %err.code,
                        "Retry budget exhausted, failing operation"
                    );
                    return Err(OperationError::new(err, history));
                }

                // A server-supplied retry-after wins over computed backoff.
                let backoff = err
                    .retry_after_ms
                    .map(Duration::from_millis)
                    .unwrap_or(decision.backoff);
                #[allow(clippy::cast_possible_truncation)]
                let delay_ms = backoff.as_millis() as u64;
                tracing::warn!(
                    attempt,
                    target = %target,
                    delay_ms,
                    class = %err.class,
                    code = %err.code,
                    "Retryable failure, will retry"
                );
                policy_target = decision.target;
                last_error = Some(err);

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        return Err(OperationError::new(StorageError::cancelled(), history));
                    }
                    () = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
}

fn check_configuration<T>(descriptor: &OperationDescriptor<T>) -> Result<(), StorageError> {
    if descriptor.location_mode == LocationMode::SecondaryOnly && descriptor.secondary.is_none() {
        return Err(StorageError::fatal(
            "NO_SECONDARY",
            "location mode targets only the secondary, but no secondary endpoint is configured",
        ));
    }
    if descriptor.validation_checksums.any() {
        if descriptor.sink.is_none() {
            return Err(StorageError::fatal(
                "VALIDATE_WITHOUT_SINK",
                "checksum validation requested but no destination sink is configured",
            ));
        }
        if descriptor.offset != 0 {
            return Err(StorageError::fatal(
                "VALIDATE_RANGED_READ",
                "whole-resource digests cannot validate a read that starts mid-resource",
            ));
        }
    }
    Ok(())
}

fn record(
    index: u32,
    target: StorageLocation,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    outcome: AttemptOutcome,
    bytes_transferred: u64,
) -> AttemptRecord {
    AttemptRecord {
        index,
        target,
        started_at,
        ended_at,
        outcome,
        bytes_transferred,
    }
}
