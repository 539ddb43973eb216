//! Anthropic LLM provider with native API format.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use reqwest::Client;

use super::error::{LLMError, into_api_error};
use super::provider::LLMProvider;
use super::types::{ChunkStream, ProviderInput, RawChatResult, Role};
use crate::sse_parser::SseEventStream;

/// Anthropic provider with native API format.
pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: String,
    api_version: String,
}

impl AnthropicProvider {
    pub const DEFAULT_API_VERSION: &'static str = "2023-06-01";
    pub const DEFAULT_MAX_TOKENS: u32 = 4096;

    #[must_use]
    pub fn new(client: Client, api_key: String, base_url: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
            api_version: Self::DEFAULT_API_VERSION.to_string(),
        }
    }

    fn build_request(&self, body: &Request) -> reqwest::RequestBuilder {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        self.client
            .post(url)
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .json(body)
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn chat(&self, input: &ProviderInput) -> Result<RawChatResult, LLMError> {
        let response = self.build_request(&to_request(input, None)).send().await?;

        if !response.status().is_success() {
            return Err(into_api_error(response).await);
        }

        let anthropic_response: Response = response.json().await?;
        Ok(from_response(anthropic_response))
    }

    async fn chat_stream(&self, input: &ProviderInput) -> Result<ChunkStream, LLMError> {
        let response = self
            .build_request(&to_request(input, Some(true)))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(into_api_error(response).await);
        }

        let sse_stream = SseEventStream::new(response.bytes_stream());
        Ok(Box::pin(AnthropicStreamAdapter::new(sse_stream)))
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(serde::Serialize)]
struct Request {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<RequestMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(serde::Serialize)]
struct RequestMessage {
    role: &'static str,
    content: String,
}

#[derive(serde::Deserialize)]
struct Response {
    content: Vec<ResponseContent>,
}

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContent {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

// ============================================================================
// Conversions
// ============================================================================

fn to_request(input: &ProviderInput, stream: Option<bool>) -> Request {
    let mut messages: Vec<RequestMessage> = input
        .turns
        .iter()
        .map(|turn| RequestMessage {
            role: match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: turn.content.clone(),
        })
        .collect();

    merge_consecutive_messages(&mut messages);

    Request {
        model: input.model.clone(),
        max_tokens: input.max_tokens.unwrap_or(AnthropicProvider::DEFAULT_MAX_TOKENS),
        system: (!input.system_prompt.is_empty()).then(|| input.system_prompt.clone()),
        messages,
        temperature: input.temperature,
        stream,
    }
}

/// Merge consecutive messages with the same role into single messages.
///
/// The Anthropic API requires strict user/assistant alternation. Context
/// selection can leave two turns of the same role next to each other.
fn merge_consecutive_messages(messages: &mut Vec<RequestMessage>) {
    if messages.len() < 2 {
        return;
    }

    let mut merged: Vec<RequestMessage> = Vec::with_capacity(messages.len());

    for msg in messages.drain(..) {
        if let Some(last) = merged.last_mut()
            && last.role == msg.role
        {
            if msg.content.is_empty() {
                continue;
            }
            if !last.content.is_empty() {
                last.content.push_str("\n\n");
            }
            last.content.push_str(&msg.content);
        } else {
            merged.push(msg);
        }
    }

    *messages = merged;
}

fn from_response(response: Response) -> RawChatResult {
    let content = response
        .content
        .into_iter()
        .filter_map(|block| match block {
            ResponseContent::Text { text } => Some(text),
            ResponseContent::Other => None,
        })
        .collect::<Vec<_>>()
        .join("");

    RawChatResult::single(content)
}

// ============================================================================
// Streaming
// ============================================================================

/// Adapter that converts Anthropic SSE events into text chunks.
struct AnthropicStreamAdapter<S> {
    inner: SseEventStream<S>,
    done: bool,
}

impl<S> AnthropicStreamAdapter<S> {
    fn new(inner: SseEventStream<S>) -> Self {
        Self { inner, done: false }
    }
}

impl<S> Stream for AnthropicStreamAdapter<S>
where
    S: Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<String, LLMError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    if event.data.is_empty() {
                        continue;
                    }

                    match serde_json::from_str::<AnthropicStreamEvent>(&event.data) {
                        Ok(AnthropicStreamEvent::ContentBlockDelta { delta }) => {
                            if let Some(text) = delta.text
                                && !text.is_empty()
                            {
                                return Poll::Ready(Some(Ok(text)));
                            }
                        }
                        Ok(AnthropicStreamEvent::MessageStop) => {
                            self.done = true;
                            return Poll::Ready(None);
                        }
                        Ok(AnthropicStreamEvent::Error) => {
                            self.done = true;
                            return Poll::Ready(Some(Err(LLMError::Stream {
                                message: event.data,
                            })));
                        }
                        Ok(AnthropicStreamEvent::Other) => {}
                        Err(e) => {
                            tracing::debug!(
                                data = %event.data,
                                error = %e,
                                "failed to parse Anthropic SSE event"
                            );
                        }
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(LLMError::Request(e))));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Anthropic SSE stream events this adapter cares about.
#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamEvent {
    ContentBlockDelta {
        delta: Delta,
    },
    MessageStop,
    /// The raw event body is kept whole for message extraction.
    Error,
    #[serde(other)]
    Other,
}

#[derive(serde::Deserialize)]
struct Delta {
    text: Option<String>,
}
