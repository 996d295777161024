//! # vidserve
//!
//! Range-aware HTTP media serving for [`axum`][1].
//!
//! The protocol core is generic over any body implementing the
//! [`RangeBody`] trait. Any type implementing both [`AsyncRead`] and
//! [`AsyncSeekStart`] can be used via the [`KnownSize`] adapter struct.
//! There is also special cased support for [`tokio::fs::File`], see the
//! [`KnownSize::file`] method.
//!
//! [`AsyncSeekStart`] is a trait defined by this crate which only allows
//! seeking from the start of a file. It is automatically implemented for
//! any type implementing [`AsyncSeek`].
//!
//! Incoming `Range` headers are parsed by [`parse_range_header`] into a
//! [`RangeSet`]. [`Ranged`] turns that into a 200 or 206 response body
//! for axum, and [`serve`] drives the same byte copy into any
//! [`AsyncWrite`](tokio::io::AsyncWrite) sink for callers outside an
//! HTTP framework.
//!
//! ```no_run
//! use axum::Router;
//! use axum::http::{header, HeaderMap};
//! use axum::routing::get;
//!
//! use vidserve::{KnownSize, Ranged};
//!
//! async fn media(headers: HeaderMap) -> Ranged<KnownSize<tokio::fs::File>> {
//!     let file = tokio::fs::File::open("movie.mp4").await.unwrap();
//!     let body = KnownSize::file(file).await.unwrap();
//!     let range = headers.get(header::RANGE).and_then(|value| value.to_str().ok());
//!     Ranged::new(range, body)
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Router::<()>::new().route("/movie", get(media));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```
//!
//! [1]: https://docs.rs/axum

mod file;
mod range;
mod sink;
mod stream;

pub mod app;
pub mod config;
pub mod library;
pub mod media;
pub mod upload;

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum_extra::headers::{AcceptRanges, ContentLength, ContentRange};
use axum_extra::TypedHeader;
use tokio::io::{AsyncRead, AsyncSeek};

pub use file::KnownSize;
pub use range::{parse_range_header, ByteRange, RangeError, RangeSet};
pub use sink::{serve, serve_ranges, ServeError, StreamOutcome};
pub use stream::RangedStream;

/// [`AsyncSeek`] narrowed to only allow seeking from start.
pub trait AsyncSeekStart {
    /// Same semantics as [`AsyncSeek::start_seek`], always passing position as the `SeekFrom::Start` variant.
    fn start_seek(self: Pin<&mut Self>, position: u64) -> io::Result<()>;

    /// Same semantics as [`AsyncSeek::poll_complete`], returning `()` instead of the new stream position.
    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>>;
}

impl<T: AsyncSeek> AsyncSeekStart for T {
    fn start_seek(self: Pin<&mut Self>, position: u64) -> io::Result<()> {
        AsyncSeek::start_seek(self, io::SeekFrom::Start(position))
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncSeek::poll_complete(self, cx).map_ok(|_| ())
    }
}

/// An [`AsyncRead`] and [`AsyncSeekStart`] with a fixed known byte size.
pub trait RangeBody: AsyncRead + AsyncSeekStart {
    /// The total size of the underlying resource.
    ///
    /// This should not change for the lifetime of the object once queried.
    /// Behaviour is not guaranteed if it does change.
    fn byte_size(&self) -> u64;
}

/// The main responder type. Implements [`IntoResponse`].
///
/// Holds the raw `Range` header value, if any. Parsing and validation
/// happen in [`try_respond`](Ranged::try_respond), so every failure is
/// reported before a single header or body byte is produced.
pub struct Ranged<B: RangeBody + Send + 'static> {
    header: Option<String>,
    body: B,
}

impl<B: RangeBody + Send + 'static> Ranged<B> {
    /// Construct a ranged response over any type implementing
    /// [`RangeBody`] and an optional raw `Range` header value.
    pub fn new(header: Option<&str>, body: B) -> Self {
        Ranged {
            header: header.map(str::to_owned),
            body,
        }
    }

    /// Responds to the request, returning headers and body as
    /// [`RangedResponse`]. Returns [`RangeError`] if the header was
    /// malformed or named a range outside the resource.
    pub fn try_respond(self) -> Result<RangedResponse<B>, RangeError> {
        let total_bytes = self.body.byte_size();
        let ranges = range::parse_range_header(self.header.as_deref(), total_bytes)?;

        match ranges.first() {
            None => {
                let content_length = ContentLength(total_bytes);
                let stream = RangedStream::new(self.body, 0, total_bytes);

                Ok(RangedResponse::Full {
                    content_length,
                    stream,
                })
            }
            Some(&range) => {
                // A request may name several ranges. Only the first is
                // answered; a 206 carrying fewer ranges than requested is
                // still a valid response.
                let content_range = ContentRange::bytes(range.start..=range.end, total_bytes)
                    .expect("ContentRange::bytes cannot panic in this usage");
                let content_length = ContentLength(range.len());
                let stream = RangedStream::new(self.body, range.start, range.len());

                Ok(RangedResponse::Partial {
                    content_range,
                    content_length,
                    stream,
                })
            }
        }
    }
}

impl<B: RangeBody + Send + 'static> IntoResponse for Ranged<B> {
    fn into_response(self) -> Response {
        match self.try_respond() {
            Ok(response) => response.into_response(),
            Err(err) => err.into_response(),
        }
    }
}

/// Data type containing computed headers and body for a range response.
/// Implements [`IntoResponse`].
///
/// Content type, disposition, and cache headers are deliberately not set
/// here. They depend on the resource's path and are the caller's concern.
pub enum RangedResponse<B> {
    /// The whole resource, status 200, no `Content-Range`.
    Full {
        content_length: ContentLength,
        stream: RangedStream<B>,
    },
    /// A single byte span, status 206.
    Partial {
        content_range: ContentRange,
        content_length: ContentLength,
        stream: RangedStream<B>,
    },
}

impl<B: RangeBody + Send + 'static> IntoResponse for RangedResponse<B> {
    fn into_response(self) -> Response {
        let accept_ranges = TypedHeader(AcceptRanges::bytes());

        match self {
            RangedResponse::Full {
                content_length,
                stream,
            } => (
                StatusCode::OK,
                accept_ranges,
                TypedHeader(content_length),
                stream,
            )
                .into_response(),
            RangedResponse::Partial {
                content_range,
                content_length,
                stream,
            } => (
                StatusCode::PARTIAL_CONTENT,
                accept_ranges,
                TypedHeader(content_range),
                TypedHeader(content_length),
                stream,
            )
                .into_response(),
        }
    }
}
