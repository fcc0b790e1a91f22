//! End-to-end executor tests against a scripted transport.

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use georep_engine::{
    execute, AttemptContext, ExponentialBackoff, OperationDescriptor, Request, Response,
    ResponseHead, RetryPolicy, Transport, TransportError,
};
use georep_types::{
    AttemptOutcome, AttemptRecord, ChecksumSet, Endpoint, ErrorClass, LocationMode, RetryDecision,
    StorageError, StorageLocation,
};

const PRIMARY: &str = "https://acct.blob.example.net";
const SECONDARY: &str = "https://acct-secondary.blob.example.net";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One scripted exchange: either fail below the protocol layer or return
/// a response with optional body chunks.
enum Step {
    Fail(TransportError),
    Respond {
        status: u16,
        headers: Vec<(&'static str, String)>,
        body: Option<Vec<Result<Bytes, TransportError>>>,
    },
}

impl Step {
    fn ok(body: &'static [u8]) -> Self {
        Step::Respond {
            status: 200,
            headers: vec![("content-length", body.len().to_string())],
            body: Some(vec![Ok(Bytes::from_static(body))]),
        }
    }

    fn status(status: u16) -> Self {
        Step::Respond {
            status,
            headers: Vec::new(),
            body: None,
        }
    }
}

struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<Request>>,
}

impl ScriptedTransport {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    fn send(
        &self,
        request: Request,
        _cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Response, TransportError>> + Send {
        self.requests.lock().unwrap().push(request);
        let step = self.script.lock().unwrap().pop_front();
        async move {
            match step {
                None => Err(TransportError::Other(anyhow::anyhow!("script exhausted"))),
                Some(Step::Fail(err)) => Err(err),
                Some(Step::Respond {
                    status,
                    headers,
                    body,
                }) => {
                    let mut head = ResponseHead::new(status);
                    for (name, value) in headers {
                        head = head.with_header(name, value);
                    }
                    let mut response = Response::new(head);
                    if let Some(chunks) = body {
                        response = response.with_body(Box::pin(futures_util::stream::iter(chunks)));
                    }
                    Ok(response)
                }
            }
        }
    }
}

/// In-memory sink the test can read back after the executor consumed it.
#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl AsyncWrite for SharedSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn build_request(endpoint: &Endpoint, ctx: &AttemptContext) -> Request {
    Request::get(format!("{endpoint}/container/report.bin"))
        .header("range", format!("bytes={}-", ctx.offset))
}

fn interpret(head: &ResponseHead, _ctx: &AttemptContext) -> Result<u16, StorageError> {
    match head.status {
        status if (200..300).contains(&status) => Ok(status),
        503 => {
            let retry_after_ms = head
                .header("retry-after")
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000);
            Err(StorageError::server_busy(
                "SERVER_BUSY",
                "server busy",
                retry_after_ms,
            ))
        }
        status => Err(StorageError::malformed(
            "HTTP_STATUS",
            format!("unexpected status {status}"),
        )),
    }
}

fn descriptor() -> OperationDescriptor<u16> {
    OperationDescriptor::new(Endpoint::new(PRIMARY), build_request, interpret)
}

fn fast_policy(max_attempts: u32) -> ExponentialBackoff {
    ExponentialBackoff {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        max_elapsed: None,
        jitter: 0.0,
    }
}

#[tokio::test]
async fn succeeds_on_first_attempt() {
    init_tracing();
    let transport = ScriptedTransport::new(vec![Step::ok(b"payload")]);
    let sink = SharedSink::default();
    let d = descriptor().with_sink(sink.clone());

    let status = execute(d, &transport, &fast_policy(3), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(status, 200);
    assert_eq!(sink.contents(), b"payload");
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn retries_transient_failures_until_success() {
    init_tracing();
    let transport = ScriptedTransport::new(vec![
        Step::Fail(TransportError::Timeout),
        Step::Fail(TransportError::ConnectionReset),
        Step::ok(b"payload"),
    ]);
    let d = descriptor().with_sink(SharedSink::default());

    let status = execute(d, &transport, &fast_policy(5), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(status, 200);
    assert_eq!(transport.requests().len(), 3);
}

#[tokio::test]
async fn resumes_from_delivered_offset_after_partial_body() {
    init_tracing();
    let transport = ScriptedTransport::new(vec![
        Step::Respond {
            status: 200,
            headers: vec![("content-length", "10".into())],
            body: Some(vec![
                Ok(Bytes::from_static(b"abcd")),
                Err(TransportError::ConnectionReset),
            ]),
        },
        Step::Respond {
            status: 206,
            headers: vec![("content-length", "6".into())],
            body: Some(vec![Ok(Bytes::from_static(b"efghij"))]),
        },
    ]);
    let sink = SharedSink::default();
    let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_cb = seen.clone();
    let d = descriptor()
        .with_sink(sink.clone())
        .with_progress(move |n| seen_cb.lock().unwrap().push(n));

    let status = execute(d, &transport, &fast_policy(5), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(status, 206);
    assert_eq!(sink.contents(), b"abcdefghij");

    let requests = transport.requests();
    assert_eq!(requests[0].header_value("range"), Some("bytes=0-"));
    assert_eq!(requests[1].header_value("range"), Some("bytes=4-"));

    // Progress is cumulative across the resumed attempt.
    let seen = seen.lock().unwrap();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(seen.last(), Some(&10));
}

#[tokio::test]
async fn resumed_request_carries_the_pinned_etag() {
    init_tracing();
    let transport = ScriptedTransport::new(vec![
        Step::Respond {
            status: 200,
            headers: vec![
                ("content-length", "9".into()),
                ("etag", "\"0x8DD\"".into()),
            ],
            body: Some(vec![
                Ok(Bytes::from_static(b"abcde")),
                Err(TransportError::Timeout),
            ]),
        },
        Step::Respond {
            status: 206,
            headers: Vec::new(),
            body: Some(vec![Ok(Bytes::from_static(b"fghi"))]),
        },
    ]);
    let sink = SharedSink::default();
    let d = OperationDescriptor::new(
        Endpoint::new(PRIMARY),
        |endpoint: &Endpoint, ctx: &AttemptContext| {
            let mut request = Request::get(format!("{endpoint}/container/report.bin"))
                .header("range", format!("bytes={}-", ctx.offset));
            if let Some(etag) = &ctx.locked_etag {
                request = request.header("if-match", etag.clone());
            }
            request
        },
        interpret,
    )
    .with_sink(sink.clone());

    execute(d, &transport, &fast_policy(5), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(sink.contents(), b"abcdefghi");

    // The etag from the first response conditions the resumed read, so two
    // different versions of the resource cannot be spliced together.
    let requests = transport.requests();
    assert_eq!(requests[0].header_value("if-match"), None);
    assert_eq!(requests[1].header_value("if-match"), Some("\"0x8DD\""));
}

#[tokio::test]
async fn request_builder_sees_the_requested_checksum_set() {
    init_tracing();
    let transport = ScriptedTransport::new(vec![Step::ok(b"payload")]);
    let d = OperationDescriptor::new(
        Endpoint::new(PRIMARY),
        |endpoint: &Endpoint, ctx: &AttemptContext| {
            let mut request = Request::get(format!("{endpoint}/container/report.bin"));
            for alg in ctx.requested_checksums.algorithms() {
                request = request.header("x-want-digest", alg.as_str());
            }
            request
        },
        interpret,
    )
    .with_sink(SharedSink::default())
    .request_checksums(ChecksumSet::md5());

    execute(d, &transport, &fast_policy(3), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        transport.requests()[0].header_value("x-want-digest"),
        Some("md5")
    );
}

#[tokio::test]
async fn partial_delivery_locks_the_endpoint() {
    init_tracing();
    // Alternation would send attempt 2 to the secondary, but bytes already
    // landed from the primary, so the retry must go back there.
    let transport = ScriptedTransport::new(vec![
        Step::Respond {
            status: 200,
            headers: vec![("content-length", "8".into())],
            body: Some(vec![
                Ok(Bytes::from_static(b"abcd")),
                Err(TransportError::Timeout),
            ]),
        },
        Step::Respond {
            status: 206,
            headers: Vec::new(),
            body: Some(vec![Ok(Bytes::from_static(b"efgh"))]),
        },
    ]);
    let sink = SharedSink::default();
    let d = descriptor()
        .with_secondary(Endpoint::new(SECONDARY))
        .with_location_mode(LocationMode::PrimaryThenSecondary)
        .with_sink(sink.clone());

    execute(d, &transport, &fast_policy(5), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(sink.contents(), b"abcdefgh");

    let requests = transport.requests();
    assert!(requests[0].url.starts_with(PRIMARY));
    assert!(requests[1].url.starts_with(PRIMARY));
}

#[tokio::test]
async fn fails_over_to_secondary_when_nothing_was_delivered() {
    init_tracing();
    let transport = ScriptedTransport::new(vec![
        Step::Fail(TransportError::ConnectionReset),
        Step::ok(b"payload"),
    ]);
    let d = descriptor()
        .with_secondary(Endpoint::new(SECONDARY))
        .with_location_mode(LocationMode::PrimaryThenSecondary)
        .with_sink(SharedSink::default());

    execute(d, &transport, &fast_policy(5), &CancellationToken::new())
        .await
        .unwrap();

    let requests = transport.requests();
    assert!(requests[0].url.starts_with(PRIMARY));
    assert!(requests[1].url.starts_with(SECONDARY));
}

#[tokio::test]
async fn fatal_response_fails_without_retry() {
    init_tracing();
    let transport = ScriptedTransport::new(vec![Step::status(400)]);

    let err = execute(
        descriptor(),
        &transport,
        &fast_policy(5),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.class, ErrorClass::FatalClient);
    assert_eq!(err.attempts(), 1);
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn exhausted_attempts_surface_full_history() {
    init_tracing();
    let transport = ScriptedTransport::new(vec![
        Step::Fail(TransportError::Timeout),
        Step::Fail(TransportError::Timeout),
        Step::Fail(TransportError::Timeout),
    ]);

    let err = execute(
        descriptor(),
        &transport,
        &fast_policy(3),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.class, ErrorClass::TransientTransport);
    assert_eq!(err.last_error.code, "TIMEOUT");
    assert_eq!(err.attempts(), 3);
    for (i, record) in err.history.iter().enumerate() {
        assert_eq!(record.index, i as u32 + 1);
        assert_eq!(record.target, StorageLocation::Primary);
        assert!(matches!(record.outcome, AttemptOutcome::Failed { .. }));
    }
}

#[tokio::test]
async fn checksum_validated_once_across_resumed_transfer() {
    init_tracing();
    // md5("hello world")
    let digest = "5eb63bbbe01eeed093cb22bb8f5acdc3";
    let transport = ScriptedTransport::new(vec![
        Step::Respond {
            status: 200,
            headers: vec![
                ("content-length", "11".into()),
                ("content-md5", digest.into()),
            ],
            body: Some(vec![
                Ok(Bytes::from_static(b"hello ")),
                Err(TransportError::Timeout),
            ]),
        },
        Step::Respond {
            status: 206,
            headers: vec![("content-md5", digest.into())],
            body: Some(vec![Ok(Bytes::from_static(b"world"))]),
        },
    ]);
    let sink = SharedSink::default();
    let d = descriptor()
        .with_sink(sink.clone())
        .validate_checksums(ChecksumSet::md5());

    let status = execute(d, &transport, &fast_policy(5), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(status, 206);
    assert_eq!(sink.contents(), b"hello world");
}

#[tokio::test]
async fn checksum_mismatch_is_fatal() {
    init_tracing();
    let transport = ScriptedTransport::new(vec![Step::Respond {
        status: 200,
        headers: vec![
            ("content-length", "7".into()),
            ("content-md5", "00000000000000000000000000000000".into()),
        ],
        body: Some(vec![Ok(Bytes::from_static(b"payload"))]),
    }]);
    let d = descriptor()
        .with_sink(SharedSink::default())
        .validate_checksums(ChecksumSet::md5());

    let err = execute(d, &transport, &fast_policy(5), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.class, ErrorClass::FatalClient);
    assert_eq!(err.last_error.code, "CHECKSUM_MISMATCH");
    assert_eq!(err.attempts(), 1);
}

#[tokio::test]
async fn empty_delivery_still_fails_digest_validation() {
    init_tracing();
    // 2xx with a pinned digest but no body at all: nothing was delivered,
    // so the computed digest is the empty-input digest and must mismatch
    // rather than skip validation.
    let transport = ScriptedTransport::new(vec![Step::Respond {
        status: 200,
        headers: vec![("content-md5", "5eb63bbbe01eeed093cb22bb8f5acdc3".into())],
        body: None,
    }]);
    let d = descriptor()
        .with_sink(SharedSink::default())
        .validate_checksums(ChecksumSet::md5());

    let err = execute(d, &transport, &fast_policy(3), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.class, ErrorClass::FatalClient);
    assert_eq!(err.last_error.code, "CHECKSUM_MISMATCH");
    assert_eq!(err.attempts(), 1);
}

#[tokio::test]
async fn missing_checksum_retries_once_then_fails() {
    init_tracing();
    let transport = ScriptedTransport::new(vec![Step::ok(b"payload"), Step::ok(b"payload")]);
    let d = descriptor()
        .with_sink(SharedSink::default())
        .validate_checksums(ChecksumSet::md5());

    let err = execute(d, &transport, &fast_policy(10), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.class, ErrorClass::ChecksumStale);
    assert_eq!(err.last_error.code, "CHECKSUM_ABSENT");
    assert_eq!(err.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn retry_after_hint_overrides_computed_backoff() {
    init_tracing();
    let transport = ScriptedTransport::new(vec![
        Step::Respond {
            status: 503,
            headers: vec![("retry-after", "2".into())],
            body: None,
        },
        Step::ok(b"payload"),
    ]);
    let d = descriptor().with_sink(SharedSink::default());

    let start = tokio::time::Instant::now();
    execute(d, &transport, &fast_policy(5), &CancellationToken::new())
        .await
        .unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(2), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "elapsed {elapsed:?}");
}

#[tokio::test]
async fn recovery_hook_observes_each_failure() {
    init_tracing();
    let transport = ScriptedTransport::new(vec![
        Step::Fail(TransportError::Timeout),
        Step::Fail(TransportError::ConnectionReset),
        Step::ok(b"payload"),
    ]);
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_cb = seen.clone();
    let d = descriptor()
        .with_sink(SharedSink::default())
        .on_retry(move |err, _ctx| seen_cb.lock().unwrap().push(err.code.clone()));

    execute(d, &transport, &fast_policy(5), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["TIMEOUT", "CONN_RESET"]);
}

/// Short first gap so attempt 2 runs promptly, long second gap so the test
/// can cancel mid-backoff without a timing race.
struct TwoStagePolicy;

impl RetryPolicy for TwoStagePolicy {
    fn decide(&self, history: &[AttemptRecord]) -> RetryDecision {
        let backoff = if history.len() < 2 {
            Duration::from_millis(10)
        } else {
            Duration::from_secs(30)
        };
        RetryDecision::retry_after(backoff, None)
    }
}

#[tokio::test]
async fn cancellation_during_backoff_preserves_history() {
    init_tracing();
    let transport = ScriptedTransport::new(vec![
        Step::Fail(TransportError::Timeout),
        Step::Fail(TransportError::Timeout),
    ]);
    let cancel = CancellationToken::new();

    let task_cancel = cancel.clone();
    let handle =
        tokio::spawn(async move { execute(descriptor(), &transport, &TwoStagePolicy, &task_cancel).await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();

    // Cancelled during the backoff between attempts 2 and 3: both failed
    // attempts stay in the history, and no third attempt is recorded.
    let err = handle.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.attempts(), 2);
    assert!(err.history.iter().all(|rec| matches!(
        rec.outcome,
        AttemptOutcome::Failed {
            class: ErrorClass::TransientTransport,
            ..
        }
    )));
}

#[tokio::test]
async fn pre_cancelled_token_skips_the_transport_entirely() {
    init_tracing();
    let transport = ScriptedTransport::new(vec![Step::ok(b"payload")]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = execute(descriptor(), &transport, &fast_policy(3), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(transport.requests().is_empty());
}
