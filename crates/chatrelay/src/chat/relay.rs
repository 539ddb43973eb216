//! Relays provider text chunks to a chunked HTTP body.
//!
//! The relay is a small state machine: it stays in `Streaming` while chunks
//! arrive, ends in `ClosedOk` when the provider finishes, and ends in
//! `ClosedError` after writing one trailing error line when the provider
//! fails, goes idle, or the request deadline passes. Chunks are pulled one at
//! a time, so a slow client slows the upstream read and dropping the relay
//! drops the upstream call.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use tokio::time::{Instant, Sleep};
use tracing::warn;

use super::error::upstream_message;
use crate::llm::{ChunkStream, LLMError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Streaming,
    ClosedOk,
    ClosedError,
}

/// Why the upstream stopped early.
enum RelayError {
    Upstream(LLMError),
    Idle,
}

type InnerStream = Pin<Box<dyn Stream<Item = Result<String, RelayError>> + Send>>;

/// Text appended to the body when a stream ends in error.
pub fn stream_error_text(message: &str) -> String {
    format!("\n\nError: {message}")
}

/// Start relaying `chunks`.
pub fn relay(chunks: ChunkStream) -> Relay {
    Relay {
        inner: Box::pin(tokio_stream::StreamExt::map(chunks, |r| {
            r.map_err(RelayError::Upstream)
        })),
        deadline: None,
        state: RelayState::Streaming,
    }
}

pub struct Relay {
    inner: InnerStream,
    deadline: Option<Pin<Box<Sleep>>>,
    state: RelayState,
}

impl Relay {
    /// Fail the stream when no chunk arrives for `idle`.
    pub fn idle_timeout(self, idle: Duration) -> Self {
        let timed = tokio_stream::StreamExt::timeout(self.inner, idle);
        let flattened = tokio_stream::StreamExt::map(timed, |result| match result {
            Ok(item) => item,
            Err(_elapsed) => Err(RelayError::Idle),
        });
        Self {
            inner: Box::pin(flattened),
            ..self
        }
    }

    /// Fail the stream once `deadline` passes, wherever it is.
    pub fn deadline(self, deadline: Instant) -> Self {
        Self {
            deadline: Some(Box::pin(tokio::time::sleep_until(deadline))),
            ..self
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    fn close_with_error(&mut self, message: &str) -> Poll<Option<Result<Bytes, Infallible>>> {
        self.state = RelayState::ClosedError;
        Poll::Ready(Some(Ok(Bytes::from(stream_error_text(message)))))
    }
}

impl Stream for Relay {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.state != RelayState::Streaming {
            return Poll::Ready(None);
        }

        if let Some(deadline) = self.deadline.as_mut()
            && deadline.as_mut().poll(cx).is_ready()
        {
            warn!("request deadline reached while streaming");
            return self.close_with_error("request timed out");
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                // Empty chunks carry nothing and would read as end-of-body.
                Poll::Ready(Some(Ok(chunk))) if chunk.is_empty() => continue,
                Poll::Ready(Some(Ok(chunk))) => return Poll::Ready(Some(Ok(Bytes::from(chunk)))),
                Poll::Ready(Some(Err(RelayError::Upstream(e)))) => {
                    warn!(error = %e, "upstream stream failed");
                    let message = upstream_message(&e);
                    return self.close_with_error(&message);
                }
                Poll::Ready(Some(Err(RelayError::Idle))) => {
                    warn!("upstream stream went idle");
                    return self.close_with_error("stream idle timeout");
                }
                Poll::Ready(None) => {
                    self.state = RelayState::ClosedOk;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
