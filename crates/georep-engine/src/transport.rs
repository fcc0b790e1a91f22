//! Transport abstraction: requests, responses, and the sender trait.
//!
//! The engine never talks to the network itself. A [`Transport`] performs
//! the exchange; request signing and URI construction happen inside the
//! caller-supplied request builder before the engine ever sees a request.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;
use tokio_util::sync::CancellationToken;

use georep_types::StorageError;

/// A fully-formed request, ready to send.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status line and headers of a received response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn etag(&self) -> Option<&str> {
        self.header("etag")
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length").and_then(|v| v.parse().ok())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Response body as a stream of chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// A received response: head plus an optional body stream.
pub struct Response {
    pub head: ResponseHead,
    pub body: Option<BodyStream>,
}

impl Response {
    pub fn new(head: ResponseHead) -> Self {
        Self { head, body: None }
    }

    #[must_use]
    pub fn with_body(mut self, body: BodyStream) -> Self {
        self.body = Some(body);
        self
    }
}

/// Failure below the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection reset by peer")]
    ConnectionReset,
    #[error("dns resolution failed: {0}")]
    Dns(String),
    #[error("transport i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
    #[error("send cancelled")]
    Cancelled,
}

impl TransportError {
    fn code(&self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::ConnectionReset => "CONN_RESET",
            Self::Dns(_) => "DNS",
            Self::Io(_) => "IO",
            Self::Other(_) => "TRANSPORT",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Classify for the retry loop. Everything below the protocol layer is
    /// transient except an observed cancellation.
    pub fn into_storage_error(self) -> StorageError {
        match self {
            Self::Cancelled => StorageError::cancelled(),
            other => StorageError::transient_transport(other.code(), other.to_string()),
        }
    }
}

/// Performs one network exchange. Connection pooling and reuse are the
/// transport's own business; the engine treats every send as a fresh
/// logical request.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Response, TransportError>> + Send;
}
