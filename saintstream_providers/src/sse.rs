//! Server-sent event decoding for streamed completions.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;

use crate::error::ProviderError;

const DONE_MARKER: &str = "[DONE]";

/// Yields the `data:` payloads of an SSE byte stream.
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across network chunks decode correctly. The stream
/// ends at the `[DONE]` marker or when the body ends.
#[derive(Debug)]
pub struct SseStream<S> {
    inner: S,
    buffer: Vec<u8>,
    done: bool,
}

impl<S> SseStream<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    pub const fn new(stream: S) -> Self {
        Self {
            inner: stream,
            buffer: Vec::new(),
            done: false,
        }
    }

    fn next_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
        line.pop();
        Some(line)
    }

    /// Handle one raw line. `None` means the line carries no payload.
    fn decode_line(&mut self, line: &[u8]) -> Option<Result<String, ProviderError>> {
        let line = match std::str::from_utf8(line) {
            Ok(line) => line,
            Err(e) => return Some(Err(ProviderError::Payload(e.to_string()))),
        };
        let data = parse_sse_data(line)?;
        if is_done_marker(data) {
            self.done = true;
            return None;
        }
        Some(Ok(data.to_string()))
    }
}

/// Extract the payload of a `data:` line. Comments and other fields yield `None`.
#[must_use]
pub fn parse_sse_data(line: &str) -> Option<&str> {
    let trimmed = line.trim_end_matches('\r');
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }
    let data = trimmed.strip_prefix("data:")?;
    Some(data.strip_prefix(' ').unwrap_or(data))
}

#[must_use]
pub fn is_done_marker(data: &str) -> bool {
    data.trim() == DONE_MARKER
}

impl<S> Stream for SseStream<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<String, ProviderError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if self.done {
                return Poll::Ready(None);
            }

            if let Some(line) = self.next_line() {
                if let Some(item) = self.decode_line(&line) {
                    return Poll::Ready(Some(item));
                }
                continue;
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => self.buffer.extend_from_slice(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(ProviderError::from(e))));
                }
                Poll::Ready(None) => {
                    // Body ended without a trailing newline.
                    self.done = true;
                    if self.buffer.is_empty() {
                        return Poll::Ready(None);
                    }
                    let rest = std::mem::take(&mut self.buffer);
                    return Poll::Ready(self.decode_line(&rest));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    type ByteStream = futures::stream::Iter<std::vec::IntoIter<Result<Bytes, reqwest::Error>>>;

    fn sse(chunks: Vec<&'static [u8]>) -> SseStream<ByteStream> {
        let items: Vec<_> = chunks
            .into_iter()
            .map(|chunk| Ok(Bytes::from_static(chunk)))
            .collect();
        SseStream::new(futures::stream::iter(items))
    }

    async fn collect(stream: SseStream<ByteStream>) -> Vec<String> {
        stream
            .filter_map(|item| async move { item.ok() })
            .collect()
            .await
    }

    #[test]
    fn test_parse_sse_data() {
        assert_eq!(parse_sse_data("data: hello"), Some("hello"));
        assert_eq!(parse_sse_data("data:hello"), Some("hello"));
        assert_eq!(parse_sse_data("data: {\"a\":1}\r"), Some("{\"a\":1}"));
        assert_eq!(parse_sse_data(": keep-alive"), None);
        assert_eq!(parse_sse_data("event: message"), None);
        assert_eq!(parse_sse_data(""), None);
    }

    #[test]
    fn test_done_marker() {
        assert!(is_done_marker("[DONE]"));
        assert!(is_done_marker(" [DONE] "));
        assert!(!is_done_marker("{\"choices\":[]}"));
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let stream = sse(vec![&b"data: one\n\nda"[..], &b"ta: two\n"[..], &b"\ndata: three"[..]]);
        assert_eq!(collect(stream).await, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_multibyte_split_across_chunks() {
        // "é" is 0xC3 0xA9
        let stream = sse(vec![&b"data: caf\xC3"[..], &b"\xA9\n\n"[..]]);
        assert_eq!(collect(stream).await, vec!["café"]);
    }

    #[tokio::test]
    async fn test_stops_at_done_marker() {
        let stream = sse(vec![&b"data: a\n\ndata: [DONE]\n\ndata: late\n\n"[..]]);
        assert_eq!(collect(stream).await, vec!["a"]);
    }
}
