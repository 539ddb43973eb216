//! OpenAI-compatible LLM provider.
//!
//! Works with OpenAI, Azure OpenAI, Mistral and self-hosted vLLM servers.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use reqwest::{Client, RequestBuilder};

use super::error::{LLMError, into_api_error};
use super::provider::LLMProvider;
use super::types::{ChunkStream, ProviderInput, RawChatResult, Role};
use crate::sse_parser::SseEventStream;

/// Where and how requests are authenticated.
enum Auth {
    Bearer(String),
    /// Azure's `api-key` header.
    ApiKey(String),
    None,
}

enum Endpoint {
    /// `{base}/chat/completions`
    Base(String),
    /// `https://{resource}.openai.azure.com/openai/deployments/{model}/chat/completions`
    Azure {
        resource_name: String,
        api_version: String,
    },
}

/// OpenAI-compatible provider (works for OpenAI, Azure, Mistral, vLLM).
pub struct OpenAICompatibleProvider {
    client: Client,
    endpoint: Endpoint,
    auth: Auth,
}

impl OpenAICompatibleProvider {
    /// Bearer-authenticated provider rooted at `base_url` (OpenAI, Mistral).
    pub fn new(client: Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            endpoint: Endpoint::Base(base_url),
            auth: Auth::Bearer(api_key),
        }
    }

    pub fn azure(
        client: Client,
        resource_name: String,
        api_version: String,
        api_key: String,
    ) -> Self {
        Self {
            client,
            endpoint: Endpoint::Azure {
                resource_name,
                api_version,
            },
            auth: Auth::ApiKey(api_key),
        }
    }

    /// Unauthenticated vLLM server; `base_url` is the server root.
    pub fn vllm(client: Client, base_url: &str) -> Self {
        Self {
            client,
            endpoint: Endpoint::Base(format!("{}/v1", base_url.trim_end_matches('/'))),
            auth: Auth::None,
        }
    }

    fn url(&self, model: &str) -> String {
        match &self.endpoint {
            Endpoint::Base(base) => format!("{}/chat/completions", base.trim_end_matches('/')),
            Endpoint::Azure {
                resource_name,
                api_version,
            } => format!(
                "https://{resource_name}.openai.azure.com/openai/deployments/{model}/chat/completions?api-version={api_version}"
            ),
        }
    }

    fn build_request(&self, input: &ProviderInput, body: &Request) -> RequestBuilder {
        let mut builder = self
            .client
            .post(self.url(&input.model))
            .header("Content-Type", "application/json");

        builder = match &self.auth {
            Auth::Bearer(key) => builder.header("Authorization", format!("Bearer {}", key)),
            Auth::ApiKey(key) => builder.header("api-key", key),
            Auth::None => builder,
        };

        builder.json(body)
    }
}

#[async_trait]
impl LLMProvider for OpenAICompatibleProvider {
    async fn chat(&self, input: &ProviderInput) -> Result<RawChatResult, LLMError> {
        let body = to_request(input, None);
        let response = self.build_request(input, &body).send().await?;

        if !response.status().is_success() {
            return Err(into_api_error(response).await);
        }

        let response: Response = response.json().await?;
        Ok(from_response(response))
    }

    async fn chat_stream(&self, input: &ProviderInput) -> Result<ChunkStream, LLMError> {
        let body = to_request(input, Some(true));
        let response = self.build_request(input, &body).send().await?;

        if !response.status().is_success() {
            return Err(into_api_error(response).await);
        }

        let sse_stream = SseEventStream::new(response.bytes_stream());
        Ok(Box::pin(StreamAdapter::new(sse_stream)))
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(serde::Serialize)]
struct Request {
    model: String,
    messages: Vec<RequestMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
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
    choices: Vec<Choice>,
}

#[derive(serde::Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(serde::Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

// ============================================================================
// Conversions
// ============================================================================

fn to_request(input: &ProviderInput, stream: Option<bool>) -> Request {
    let mut messages = Vec::with_capacity(input.turns.len() + 1);
    if !input.system_prompt.is_empty() {
        messages.push(RequestMessage {
            role: "system",
            content: input.system_prompt.clone(),
        });
    }
    for turn in &input.turns {
        messages.push(RequestMessage {
            role: match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: turn.content.clone(),
        });
    }

    Request {
        model: input.model.clone(),
        messages,
        temperature: input.temperature,
        max_tokens: input.max_tokens,
        stream,
    }
}

fn from_response(response: Response) -> RawChatResult {
    RawChatResult {
        candidates: response
            .choices
            .into_iter()
            .map(|c| c.message.content.unwrap_or_default())
            .collect(),
        references: None,
    }
}

// ============================================================================
// Streaming
// ============================================================================

/// Adapter that turns `chat.completion.chunk` events into text chunks.
struct StreamAdapter<S> {
    inner: SseEventStream<S>,
    done: bool,
}

impl<S> StreamAdapter<S> {
    fn new(inner: SseEventStream<S>) -> Self {
        Self { inner, done: false }
    }
}

impl<S> Stream for StreamAdapter<S>
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
                    if event.data == "[DONE]" {
                        self.done = true;
                        return Poll::Ready(None);
                    }
                    if event.data.is_empty() {
                        continue;
                    }

                    match serde_json::from_str::<StreamChunk>(&event.data) {
                        Ok(chunk) => {
                            if let Some(error) = chunk.error {
                                self.done = true;
                                return Poll::Ready(Some(Err(LLMError::Stream {
                                    message: serde_json::json!({ "error": error }).to_string(),
                                })));
                            }
                            if let Some(choice) = chunk.choices.into_iter().next()
                                && let Some(content) = choice.delta.content
                                && !content.is_empty()
                            {
                                return Poll::Ready(Some(Ok(content)));
                            }
                        }
                        Err(e) => {
                            tracing::debug!(
                                data = %event.data,
                                error = %e,
                                "failed to parse chat completion chunk"
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

#[derive(serde::Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(serde::Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(serde::Deserialize)]
struct StreamDelta {
    content: Option<String>,
}
