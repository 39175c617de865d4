// Byte-range handling for streamed responses whose size is declared up front.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use bytes::Bytes;
use futures::Stream;

/// Inclusive byte range `start..=end` within the declared size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn full(size: u64) -> Self {
        Self {
            start: 0,
            end: size.saturating_sub(1),
        }
    }

    /// Number of bytes covered; never zero.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// No (usable) range header: the whole resource, 200.
    Full,
    /// A satisfiable range, 206.
    Partial(ByteRange),
    /// `start` at or past the declared size, 416.
    Unsatisfiable,
}

/// Parse `bytes=start-end` / `bytes=start-`.
/// Suffix ranges and anything malformed yield `None` ("no range").
fn parse_range_header(value: &str) -> Option<(u64, Option<u64>)> {
    let rest = value.trim().strip_prefix("bytes=")?;
    // Multiple ranges are not supported.
    if rest.contains(',') {
        return None;
    }
    let (start_str, end_str) = rest.split_once('-')?;
    let start_str = start_str.trim();
    let end_str = end_str.trim();
    if start_str.is_empty() {
        return None;
    }
    let start: u64 = start_str.parse().ok()?;
    if end_str.is_empty() {
        return Some((start, None));
    }
    let end: u64 = end_str.parse().ok()?;
    if end < start {
        return None;
    }
    Some((start, Some(end)))
}

/// Resolve an optional `Range` header against the declared size.
pub fn resolve_range(header: Option<&str>, size: u64) -> RangeOutcome {
    let Some((start, end)) = header.and_then(parse_range_header) else {
        return RangeOutcome::Full;
    };
    if start >= size {
        return RangeOutcome::Unsatisfiable;
    }
    let last = size - 1;
    let end = end.map_or(last, |e| e.min(last));
    RangeOutcome::Partial(ByteRange { start, end })
}

/// Status and range headers for a response of declared `size`.
/// Returns the status and the byte range the body must cover.
pub fn apply_range_headers(
    outcome: RangeOutcome,
    size: u64,
    headers: &mut HeaderMap,
) -> (StatusCode, Option<ByteRange>) {
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    match outcome {
        RangeOutcome::Full => {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
            let range = (size > 0).then(|| ByteRange::full(size));
            (StatusCode::OK, range)
        }
        RangeOutcome::Partial(r) => {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(r.len()));
            if let Ok(v) = HeaderValue::from_str(&format!("bytes {}-{}/{}", r.start, r.end, size)) {
                headers.insert(header::CONTENT_RANGE, v);
            }
            (StatusCode::PARTIAL_CONTENT, Some(r))
        }
        RangeOutcome::Unsatisfiable => {
            if let Ok(v) = HeaderValue::from_str(&format!("bytes */{}", size)) {
                headers.insert(header::CONTENT_RANGE, v);
            }
            (StatusCode::RANGE_NOT_SATISFIABLE, None)
        }
    }
}

/// Passes through only the bytes of `range` from a stream that starts at
/// offset 0, and drops the inner stream as soon as the range is complete.
pub struct RangedBody<S> {
    inner: Option<S>,
    pos: u64,
    range: ByteRange,
}

impl<S> RangedBody<S> {
    pub fn new(inner: S, range: ByteRange) -> Self {
        Self {
            inner: Some(inner),
            pos: 0,
            range,
        }
    }
}

impl<S> Stream for RangedBody<S>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.pos > this.range.end {
                this.inner = None;
                return Poll::Ready(None);
            }
            let Some(inner) = this.inner.as_mut() else {
                return Poll::Ready(None);
            };
            let chunk = match Pin::new(inner).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    this.inner = None;
                    return Poll::Ready(None);
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(Some(Ok(chunk))) => chunk,
            };
            let chunk_start = this.pos;
            let chunk_end = chunk_start + chunk.len() as u64; // exclusive
            this.pos = chunk_end;
            if chunk_end <= this.range.start {
                continue;
            }
            let from = this.range.start.saturating_sub(chunk_start) as usize;
            let to = ((this.range.end + 1).min(chunk_end) - chunk_start) as usize;
            if from >= to {
                continue;
            }
            if this.pos > this.range.end {
                this.inner = None;
            }
            return Poll::Ready(Some(Ok(chunk.slice(from..to))));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn parse_explicit_and_open_ended() {
        assert_eq!(parse_range_header("bytes=0-1023"), Some((0, Some(1023))));
        assert_eq!(parse_range_header("bytes=500-"), Some((500, None)));
    }

    #[test]
    fn parse_rejects_suffix_and_garbage() {
        assert_eq!(parse_range_header("bytes=-1024"), None);
        assert_eq!(parse_range_header("invalid"), None);
        assert_eq!(parse_range_header("bytes=abc-def"), None);
        assert_eq!(parse_range_header("bytes=10-5"), None);
        assert_eq!(parse_range_header("bytes=0-1,5-9"), None);
    }

    #[test]
    fn end_is_clamped_to_size() {
        assert_eq!(
            resolve_range(Some("bytes=10-999999"), 100),
            RangeOutcome::Partial(ByteRange { start: 10, end: 99 })
        );
    }

    #[tokio::test]
    async fn ranged_body_slices_across_chunks() {
        let chunks: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"0123")),
            Ok(Bytes::from_static(b"4567")),
            Ok(Bytes::from_static(b"89ab")),
        ];
        let body = RangedBody::new(futures::stream::iter(chunks), ByteRange { start: 3, end: 8 });
        let out: Vec<Bytes> = body.map(|c| c.unwrap()).collect().await;
        let joined: Vec<u8> = out.iter().flat_map(|b| b.to_vec()).collect();
        assert_eq!(joined, b"345678");
    }
}
