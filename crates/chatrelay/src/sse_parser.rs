//! Line and Server-Sent Events framing over a byte stream.
//!
//! Provider streams arrive as arbitrary byte chunks. `LineStream` splits them
//! on `\n` (tolerating `\r\n` and UTF-8 sequences split across chunks) and
//! `SseEventStream` groups `event:`/`data:` lines into events.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;

/// Yields complete lines (without the trailing newline) from a byte stream.
pub struct LineStream<S> {
    inner: S,
    buffer: Vec<u8>,
    done: bool,
}

impl<S> LineStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            done: false,
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self.buffer.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

impl<S> Stream for LineStream<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<String, reqwest::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(line) = self.take_line() {
                return Poll::Ready(Some(Ok(line)));
            }
            if self.done {
                if self.buffer.is_empty() {
                    return Poll::Ready(None);
                }
                // Trailing data without a final newline
                let rest = std::mem::take(&mut self.buffer);
                return Poll::Ready(Some(Ok(String::from_utf8_lossy(&rest).into_owned())));
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => self.buffer.extend_from_slice(&bytes),
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => self.done = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// A single Server-Sent Event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Groups SSE lines into events, emitting one event per blank-line boundary.
pub struct SseEventStream<S> {
    lines: LineStream<S>,
    pending: SseEvent,
    has_data: bool,
}

impl<S> SseEventStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            lines: LineStream::new(inner),
            pending: SseEvent::default(),
            has_data: false,
        }
    }

    fn flush(&mut self) -> Option<SseEvent> {
        if !self.has_data && self.pending.event.is_none() {
            return None;
        }
        self.has_data = false;
        Some(std::mem::take(&mut self.pending))
    }
}

impl<S> Stream for SseEventStream<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<SseEvent, reqwest::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.lines).poll_next(cx) {
                Poll::Ready(Some(Ok(line))) => {
                    if line.is_empty() {
                        if let Some(event) = self.flush() {
                            return Poll::Ready(Some(Ok(event)));
                        }
                        continue;
                    }
                    if line.starts_with(':') {
                        continue;
                    }
                    let (field, value) = match line.split_once(':') {
                        Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                        None => (line.as_str(), ""),
                    };
                    match field {
                        "event" => self.pending.event = Some(value.to_string()),
                        "data" => {
                            if self.has_data {
                                self.pending.data.push('\n');
                            }
                            self.pending.data.push_str(value);
                            self.has_data = true;
                        }
                        _ => {}
                    }
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => return Poll::Ready(self.flush().map(Ok)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn byte_stream(
        parts: &[&'static [u8]],
    ) -> impl Stream<Item = Result<Bytes, reqwest::Error>> + Unpin {
        futures::stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn lines_split_across_chunks() {
        let chunks: [&'static [u8]; 4] = [b"hel", b"lo\r\nwor", b"ld\n", b"tail"];
        let lines: Vec<String> = LineStream::new(byte_stream(&chunks))
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(lines, ["hello", "world", "tail"]);
    }

    #[tokio::test]
    async fn lines_keep_multibyte_chars_split_across_chunks() {
        // "é" is 0xC3 0xA9
        let lines: Vec<String> = LineStream::new(byte_stream(&[b"caf\xC3", b"\xA9\n"]))
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(lines, ["café"]);
    }

    #[tokio::test]
    async fn sse_events_group_fields() {
        let events: Vec<SseEvent> = SseEventStream::new(byte_stream(&[
            b": keep-alive\n\n",
            b"event: content_block_delta\ndata: {\"a\":1}\n\n",
            b"data: first\ndata: second\n\n",
            b"data: [DONE]",
        ]))
        .map(|e| e.unwrap())
        .collect()
        .await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event.as_deref(), Some("content_block_delta"));
        assert_eq!(events[0].data, "{\"a\":1}");
        assert_eq!(events[1].event, None);
        assert_eq!(events[1].data, "first\nsecond");
        assert_eq!(events[2].data, "[DONE]");
    }
}
