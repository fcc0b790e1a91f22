//! Execution engine for replicated storage operations.
//!
//! A caller builds an [`OperationDescriptor`] (how to build a request, how
//! to interpret a response, how to recover from a partial failure) and
//! hands it to [`execute`] together with a [`Transport`], a [`RetryPolicy`]
//! and a cancellation token. The engine drives the attempt loop: endpoint
//! selection, cancellable send, resumable body copy with single-pass digest
//! computation, failure classification, and backoff.

pub mod copier;
pub mod descriptor;
pub mod digest;
pub mod errors;
pub mod executor;
pub mod retry;
pub mod transport;

// Re-export public API for convenience
pub use descriptor::{AttemptContext, OperationDescriptor};
pub use errors::OperationError;
pub use executor::execute;
pub use retry::{ExponentialBackoff, RetryPolicy};
pub use transport::{BodyStream, Request, Response, ResponseHead, Transport, TransportError};
