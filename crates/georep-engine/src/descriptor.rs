//! Operation descriptors and per-attempt context.
//!
//! A descriptor captures one logical operation as plain data plus three
//! hooks: build the request, interpret the response, and recover between
//! attempts. It is constructed fresh per logical call, mutated only
//! through its own recovery hook, and never shared across operations.

use std::sync::Arc;

use tokio::io::AsyncWrite;

use georep_types::{ChecksumSet, Endpoint, LocationMode, StorageError, StorageLocation};

use crate::transport::{Request, ResponseHead};

/// Cumulative-bytes progress callback, invoked after each copied chunk.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

pub(crate) type BuildRequestFn = Box<dyn Fn(&Endpoint, &AttemptContext) -> Request + Send>;
pub(crate) type InterpretFn<T> =
    Box<dyn FnMut(&ResponseHead, &AttemptContext) -> Result<T, StorageError> + Send>;
pub(crate) type OnRetryFn = Box<dyn FnMut(&StorageError, &mut AttemptContext) + Send>;

/// Per-attempt state, rebuilt by the executor before every attempt rather
/// than mutated in place. The recovery hook may adjust it; the executor
/// carries any lock or pin it sets forward into later attempts.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    /// 1-based attempt index.
    pub attempt: u32,
    /// Replica this attempt targets.
    pub target: StorageLocation,
    /// Byte position this attempt's request starts from: the operation's
    /// original offset plus every byte already delivered to the sink.
    pub offset: u64,
    /// Bytes still to request, when the operation has a bounded length.
    pub remaining: Option<u64>,
    /// Bytes delivered to the sink across all prior attempts.
    pub bytes_delivered: u64,
    /// Digests the request builder should ask the server to include.
    pub requested_checksums: ChecksumSet,
    /// Replica all subsequent attempts must target, once set.
    pub locked_location: Option<StorageLocation>,
    /// ETag pinned from the first response, so a resumed read cannot
    /// splice together two different versions of the resource.
    pub locked_etag: Option<String>,
}

/// One logical operation: endpoints, targeting mode, checksum
/// requirements, destination sink, and the three behavior hooks.
pub struct OperationDescriptor<T> {
    pub(crate) primary: Endpoint,
    pub(crate) secondary: Option<Endpoint>,
    pub(crate) location_mode: LocationMode,
    pub(crate) offset: u64,
    pub(crate) length: Option<u64>,
    pub(crate) requested_checksums: ChecksumSet,
    pub(crate) validation_checksums: ChecksumSet,
    pub(crate) sink: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    pub(crate) progress: Option<ProgressFn>,
    pub(crate) build_request: BuildRequestFn,
    pub(crate) interpret_response: InterpretFn<T>,
    pub(crate) on_retry: Option<OnRetryFn>,
}

impl<T> OperationDescriptor<T> {
    pub fn new(
        primary: Endpoint,
        build_request: impl Fn(&Endpoint, &AttemptContext) -> Request + Send + 'static,
        interpret_response: impl FnMut(&ResponseHead, &AttemptContext) -> Result<T, StorageError>
            + Send
            + 'static,
    ) -> Self {
        Self {
            primary,
            secondary: None,
            location_mode: LocationMode::PrimaryOnly,
            offset: 0,
            length: None,
            requested_checksums: ChecksumSet::NONE,
            validation_checksums: ChecksumSet::NONE,
            sink: None,
            progress: None,
            build_request: Box::new(build_request),
            interpret_response: Box::new(interpret_response),
            on_retry: None,
        }
    }

    #[must_use]
    pub fn with_secondary(mut self, secondary: Endpoint) -> Self {
        self.secondary = Some(secondary);
        self
    }

    #[must_use]
    pub fn with_location_mode(mut self, mode: LocationMode) -> Self {
        self.location_mode = mode;
        self
    }

    /// Byte range of the resource this operation covers. `length` of
    /// `None` means "to the end".
    #[must_use]
    pub fn with_range(mut self, offset: u64, length: Option<u64>) -> Self {
        self.offset = offset;
        self.length = length;
        self
    }

    /// Where response-body bytes are streamed as they arrive.
    #[must_use]
    pub fn with_sink(mut self, sink: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Digests the request builder should ask the server to include.
    #[must_use]
    pub fn request_checksums(mut self, set: ChecksumSet) -> Self {
        self.requested_checksums = set;
        self
    }

    /// Digests to validate against the delivered body.
    #[must_use]
    pub fn validate_checksums(mut self, set: ChecksumSet) -> Self {
        self.validation_checksums = set;
        self
    }

    /// Recovery hook, invoked with the last failure and the freshly
    /// rebuilt context before the next attempt's request is built.
    #[must_use]
    pub fn on_retry(
        mut self,
        hook: impl FnMut(&StorageError, &mut AttemptContext) + Send + 'static,
    ) -> Self {
        self.on_retry = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn location_mode(&self) -> LocationMode {
        self.location_mode
    }

    #[must_use]
    pub fn requested_checksums(&self) -> ChecksumSet {
        self.requested_checksums
    }

    #[must_use]
    pub fn validation_checksums(&self) -> ChecksumSet {
        self.validation_checksums
    }
}
