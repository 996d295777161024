//! Push-model delivery into any [`AsyncWrite`] sink.
//!
//! [`Ranged`](crate::Ranged) covers the axum path, where hyper pulls
//! chunks out of a [`RangedStream`](crate::RangedStream). Callers that
//! own the write side instead, a plain socket or a spooling file, use
//! [`serve`] and get told what was delivered via [`StreamOutcome`].

use std::cmp;
use std::io;
use std::pin::Pin;

use futures::future::poll_fn;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::range::{parse_range_header, ByteRange, RangeError, RangeSet};
use crate::{AsyncSeekStart, RangeBody};

// Bytes per read/write pair. Correctness only needs one byte; this is
// sized for I/O efficiency.
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// What a completed [`serve`] call delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The whole resource went out, status 200 semantics.
    Full { bytes_sent: u64 },
    /// The first requested range went out, status 206 semantics.
    Partial { range: ByteRange, bytes_sent: u64 },
}

impl StreamOutcome {
    pub fn bytes_sent(&self) -> u64 {
        match *self {
            StreamOutcome::Full { bytes_sent } => bytes_sent,
            StreamOutcome::Partial { bytes_sent, .. } => bytes_sent,
        }
    }
}

/// Failure while delivering resource bytes to a sink.
///
/// Apart from `Range`, everything here can surface after response
/// headers are committed, so callers must treat the connection as
/// unusable rather than retry.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The `Range` header did not survive parsing. Raised before any
    /// byte is written.
    #[error(transparent)]
    Range(#[from] RangeError),

    /// The sink accepted fewer bytes than offered in a single write.
    /// The response is corrupt from here on; abort the connection.
    #[error("sink accepted {accepted} of {offered} bytes")]
    ShortWrite { offered: usize, accepted: usize },

    /// Any other read, seek, or write failure, surfaced as-is.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Parses `range_header` against the resource size, then copies the
/// whole resource or the first requested range into `sink`.
pub async fn serve<B, W>(
    body: B,
    range_header: Option<&str>,
    sink: W,
) -> Result<StreamOutcome, ServeError>
where
    B: RangeBody + Unpin,
    W: AsyncWrite + Unpin,
{
    let ranges = parse_range_header(range_header, body.byte_size())?;
    serve_ranges(body, &ranges, sink).await
}

/// Copies the whole resource, or the first entry of `ranges`, into
/// `sink`.
///
/// Transfers exactly the requested byte count, never more. A resource
/// that ends early is not an error: the outcome carries the shorter
/// number of bytes actually sent.
pub async fn serve_ranges<B, W>(
    mut body: B,
    ranges: &RangeSet,
    mut sink: W,
) -> Result<StreamOutcome, ServeError>
where
    B: RangeBody + Unpin,
    W: AsyncWrite + Unpin,
{
    let total_bytes = body.byte_size();

    match ranges.first() {
        None => {
            seek_start(&mut body, 0).await?;
            let bytes_sent = copy_exact(&mut body, &mut sink, total_bytes).await?;
            Ok(StreamOutcome::Full { bytes_sent })
        }
        Some(&range) => {
            seek_start(&mut body, range.start).await?;
            let bytes_sent = copy_exact(&mut body, &mut sink, range.len()).await?;
            Ok(StreamOutcome::Partial { range, bytes_sent })
        }
    }
}

/// Drives an [`AsyncSeekStart`] to completion at `position`.
async fn seek_start<B: AsyncSeekStart + Unpin>(body: &mut B, position: u64) -> io::Result<()> {
    Pin::new(&mut *body).start_seek(position)?;
    poll_fn(|cx| Pin::new(&mut *body).poll_complete(cx)).await
}

/// Copies up to `count` bytes in bounded chunks, counting down as it
/// goes. Stops at zero or at end-of-data, whichever comes first.
async fn copy_exact<R, W>(source: &mut R, sink: &mut W, count: u64) -> Result<u64, ServeError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut sent: u64 = 0;

    while sent < count {
        let want = cmp::min(COPY_BUFFER_SIZE as u64, count - sent) as usize;

        let read = source.read(&mut buffer[..want]).await?;
        if read == 0 {
            // source ran dry before the counter did; the caller gets the
            // shorter transfer, not an error
            break;
        }

        let written = sink.write(&buffer[..read]).await?;
        sent += written as u64;
        if written < read {
            return Err(ServeError::ShortWrite {
                offered: read,
                accepted: written,
            });
        }
    }

    sink.flush().await?;
    Ok(sent)
}
