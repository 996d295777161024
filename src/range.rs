//! Parsing of the HTTP `Range` request header.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum_extra::headers::ContentRange;
use axum_extra::TypedHeader;
use thiserror::Error;

/// A single inclusive byte span within a resource.
///
/// Invariant: `start <= end < resource_size` for the size the range was
/// parsed against. Only [`parse_range_header`] constructs these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered, `end - start + 1`.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// The byte ranges requested by one header, in header order.
///
/// Empty when no `Range` header was present (or the header named no
/// spans at all), which means: serve the whole resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSet(Vec<ByteRange>);

impl RangeSet {
    /// The set produced in the absence of a `Range` header.
    pub fn empty() -> Self {
        RangeSet(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// First range in header order. Responses are built from this entry
    /// alone, even when more were requested.
    pub fn first(&self) -> Option<&ByteRange> {
        self.0.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ByteRange> {
        self.0.iter()
    }
}

/// Failure to turn a `Range` header into usable byte spans.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    /// Header present but syntactically unusable: wrong prefix, wrong
    /// arity, non-numeric bounds, or a start bound beyond the end bound.
    /// Maps to 400.
    #[error("invalid range header: {0:?}")]
    Malformed(String),

    /// Syntactically fine, but the first byte lies past the end of the
    /// resource. Maps to 416, carrying the resource size.
    #[error("range not satisfiable for resource of {0} bytes")]
    Unsatisfiable(u64),
}

impl IntoResponse for RangeError {
    fn into_response(self) -> Response {
        match self {
            err @ RangeError::Malformed(_) => {
                (StatusCode::BAD_REQUEST, err.to_string()).into_response()
            }
            RangeError::Unsatisfiable(size) => {
                let content_range = TypedHeader(ContentRange::unsatisfied_bytes(size));
                (StatusCode::RANGE_NOT_SATISFIABLE, content_range, ()).into_response()
            }
        }
    }
}

/// Parses a raw `Range` header value against a known resource size.
///
/// `None` yields an empty [`RangeSet`], the signal to serve the whole
/// resource. Comma-separated specifications come back in header order;
/// specifications that are empty after trimming are skipped, so stray
/// commas are tolerated. A single invalid specification fails the whole
/// parse.
///
/// An omitted start bound defaults to `0` and an omitted end bound to
/// `resource_size - 1`, so `bytes=-500` is read as bytes `0..=500`
/// rather than the RFC 9110 suffix form meaning the last 500 bytes. An
/// end bound past the resource is clamped to the final byte.
///
/// Pure function of its inputs; the same header and size always produce
/// the same set.
pub fn parse_range_header(
    header: Option<&str>,
    resource_size: u64,
) -> Result<RangeSet, RangeError> {
    let Some(header) = header else {
        return Ok(RangeSet::empty());
    };

    let Some(specs) = header.strip_prefix("bytes=") else {
        return Err(RangeError::Malformed(header.to_string()));
    };

    let mut ranges = Vec::new();

    for spec in specs.split(',') {
        let spec = spec.trim();
        if spec.is_empty() {
            continue;
        }

        let mut bounds = spec.split('-');
        let (start, end) = match (bounds.next(), bounds.next(), bounds.next()) {
            (Some(start), Some(end), None) => (start, end),
            _ => return Err(RangeError::Malformed(spec.to_string())),
        };

        let start = match start {
            "" => 0,
            s => s
                .parse::<u64>()
                .map_err(|_| RangeError::Malformed(spec.to_string()))?,
        };

        let end = match end {
            "" => None,
            e => Some(
                e.parse::<u64>()
                    .map_err(|_| RangeError::Malformed(spec.to_string()))?,
            ),
        };

        if start >= resource_size {
            return Err(RangeError::Unsatisfiable(resource_size));
        }

        // start < resource_size holds here, so resource_size - 1 is safe
        let end = match end {
            Some(end) => end.min(resource_size - 1),
            None => resource_size - 1,
        };

        if start > end {
            return Err(RangeError::Malformed(spec.to_string()));
        }

        ranges.push(ByteRange { start, end });
    }

    Ok(RangeSet(ranges))
}
