//! Cohere chat provider.
//!
//! Cohere takes the newest message separately from the chat history, and
//! streams newline-delimited JSON rather than SSE.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use reqwest::Client;

use super::error::{LLMError, into_api_error};
use super::provider::LLMProvider;
use super::types::{ChunkStream, ProviderInput, RawChatResult, Role};
use crate::sse_parser::LineStream;

pub struct CohereProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl CohereProvider {
    pub fn new(client: Client, api_key: String, base_url: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }

    fn build_request(&self, body: &Request) -> reqwest::RequestBuilder {
        let url = format!("{}/chat", self.base_url.trim_end_matches('/'));
        self.client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
    }
}

#[async_trait]
impl LLMProvider for CohereProvider {
    async fn chat(&self, input: &ProviderInput) -> Result<RawChatResult, LLMError> {
        let response = self.build_request(&to_request(input, None)).send().await?;

        if !response.status().is_success() {
            return Err(into_api_error(response).await);
        }

        let response: Response = response.json().await?;
        Ok(RawChatResult::single(response.text))
    }

    async fn chat_stream(&self, input: &ProviderInput) -> Result<ChunkStream, LLMError> {
        let response = self
            .build_request(&to_request(input, Some(true)))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(into_api_error(response).await);
        }

        let lines = LineStream::new(response.bytes_stream());
        Ok(Box::pin(StreamAdapter::new(lines)))
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(serde::Serialize)]
struct Request {
    model: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    preamble: Option<String>,
    chat_history: Vec<HistoryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(serde::Serialize)]
struct HistoryEntry {
    role: &'static str,
    message: String,
}

#[derive(serde::Deserialize)]
struct Response {
    text: String,
}

fn to_request(input: &ProviderInput, stream: Option<bool>) -> Request {
    let (message, history) = match input.turns.split_last() {
        Some((last, history)) => (last.content.clone(), history),
        None => (String::new(), &input.turns[..]),
    };

    Request {
        model: input.model.clone(),
        message,
        preamble: (!input.system_prompt.is_empty()).then(|| input.system_prompt.clone()),
        chat_history: history
            .iter()
            .map(|turn| HistoryEntry {
                role: match turn.role {
                    Role::User => "USER",
                    Role::Assistant => "CHATBOT",
                },
                message: turn.content.clone(),
            })
            .collect(),
        temperature: input.temperature,
        max_tokens: input.max_tokens,
        stream,
    }
}

// ============================================================================
// Streaming
// ============================================================================

struct StreamAdapter<S> {
    inner: LineStream<S>,
    done: bool,
}

impl<S> StreamAdapter<S> {
    fn new(inner: LineStream<S>) -> Self {
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
                Poll::Ready(Some(Ok(line))) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<StreamEvent>(line) {
                        Ok(event) => match event.event_type.as_str() {
                            "text-generation" => {
                                if let Some(text) = event.text
                                    && !text.is_empty()
                                {
                                    return Poll::Ready(Some(Ok(text)));
                                }
                            }
                            "stream-end" => {
                                self.done = true;
                                if event.finish_reason.as_deref() == Some("ERROR") {
                                    return Poll::Ready(Some(Err(LLMError::Stream {
                                        message: line.to_string(),
                                    })));
                                }
                                return Poll::Ready(None);
                            }
                            _ => {}
                        },
                        Err(e) => {
                            tracing::debug!(
                                data = %line,
                                error = %e,
                                "failed to parse Cohere stream line"
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
struct StreamEvent {
    event_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::InputShape;
    use bytes::Bytes;
    use futures::StreamExt;

    #[test]
    fn request_splits_latest_message_from_history() {
        let mut input = ProviderInput::new(InputShape::Cohere, "command", "Be kind.");
        input.add_user_turn("Hi");
        input.add_assistant_turn("Hello");
        input.add_user_turn("Tell me a joke");

        let json = serde_json::to_value(to_request(&input, None)).unwrap();
        assert_eq!(json["message"], "Tell me a joke");
        assert_eq!(json["preamble"], "Be kind.");
        assert_eq!(
            json["chat_history"],
            serde_json::json!([
                {"role": "USER", "message": "Hi"},
                {"role": "CHATBOT", "message": "Hello"}
            ])
        );
    }

    #[test]
    fn request_with_no_turns_is_empty_message() {
        let input = ProviderInput::new(InputShape::Cohere, "command", "");
        let json = serde_json::to_value(to_request(&input, Some(true))).unwrap();
        assert_eq!(json["message"], "");
        assert!(json.get("preamble").is_none());
        assert_eq!(json["stream"], true);
    }

    #[tokio::test]
    async fn stream_adapter_reads_ndjson() {
        let body: &'static [u8] = b"{\"is_finished\":false,\"event_type\":\"stream-start\",\"generation_id\":\"g\"}\n\
{\"is_finished\":false,\"event_type\":\"text-generation\",\"text\":\"Hel\"}\n\
{\"is_finished\":false,\"event_type\":\"text-generation\",\"text\":\"lo\"}\n\
{\"is_finished\":true,\"event_type\":\"stream-end\",\"finish_reason\":\"COMPLETE\"}\n";
        let bytes = futures::stream::iter(vec![Ok::<_, reqwest::Error>(Bytes::from_static(body))]);
        let chunks: Vec<String> = StreamAdapter::new(LineStream::new(bytes))
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, ["Hel", "lo"]);
    }

    #[tokio::test]
    async fn stream_adapter_reports_error_finish() {
        let body: &'static [u8] = b"{\"event_type\":\"text-generation\",\"text\":\"Hel\"}\n\
{\"is_finished\":true,\"event_type\":\"stream-end\",\"finish_reason\":\"ERROR\"}\n";
        let bytes = futures::stream::iter(vec![Ok::<_, reqwest::Error>(Bytes::from_static(body))]);
        let items: Vec<Result<String, LLMError>> =
            StreamAdapter::new(LineStream::new(bytes)).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }
}
