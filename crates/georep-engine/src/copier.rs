//! Resumable stream copier.
//!
//! Copies response-body chunks into a destination sink while tracking the
//! exact byte count delivered, so the executor can compute a correct
//! resumption offset after an interruption. Digests are fed in the same
//! pass; a progress callback reports cumulative bytes after each chunk.

use std::io;

use futures_util::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::descriptor::ProgressFn;
use crate::digest::DigestSet;
use crate::transport::{BodyStream, TransportError};

/// Upper bound on how many bytes are written (and hashed, and reported)
/// at a time, keeping memory use constant regardless of chunk size.
const COPY_SLICE: usize = 64 * 1024;

/// Copy failure, preserving how many bytes made it into the sink.
#[derive(Debug, thiserror::Error)]
#[error("body copy failed after {bytes_copied} bytes: {kind}")]
pub struct CopyError {
    pub bytes_copied: u64,
    #[source]
    pub kind: CopyErrorKind,
}

#[derive(Debug, thiserror::Error)]
pub enum CopyErrorKind {
    #[error("source read: {0}")]
    Read(#[source] TransportError),
    #[error("sink write: {0}")]
    Write(#[source] io::Error),
    #[error("copy cancelled")]
    Cancelled,
}

/// Drain `body` into `sink`, returning the number of bytes copied.
///
/// `digests`, when present, observes every delivered byte. `base_offset`
/// is the cumulative count delivered by earlier attempts; the progress
/// callback receives `base_offset` plus bytes copied so far.
pub async fn copy_body(
    mut body: BodyStream,
    sink: &mut (dyn AsyncWrite + Send + Unpin),
    mut digests: Option<&mut DigestSet>,
    base_offset: u64,
    progress: Option<&ProgressFn>,
    cancel: &CancellationToken,
) -> Result<u64, CopyError> {
    let mut copied: u64 = 0;

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(CopyError {
                    bytes_copied: copied,
                    kind: CopyErrorKind::Cancelled,
                });
            }
            chunk = body.next() => chunk,
        };

        let chunk = match next {
            None => break,
            Some(Ok(chunk)) => chunk,
            Some(Err(err)) => {
                return Err(CopyError {
                    bytes_copied: copied,
                    kind: CopyErrorKind::Read(err),
                });
            }
        };

        for slice in chunk.chunks(COPY_SLICE) {
            if cancel.is_cancelled() {
                return Err(CopyError {
                    bytes_copied: copied,
                    kind: CopyErrorKind::Cancelled,
                });
            }
            sink.write_all(slice).await.map_err(|err| CopyError {
                bytes_copied: copied,
                kind: CopyErrorKind::Write(err),
            })?;
            if let Some(digests) = digests.as_deref_mut() {
                digests.update(slice);
            }
            copied += slice.len() as u64;
            if let Some(progress) = progress {
                progress(base_offset + copied);
            }
        }
    }

    sink.flush().await.map_err(|err| CopyError {
        bytes_copied: copied,
        kind: CopyErrorKind::Write(err),
    })?;

    Ok(copied)
}
