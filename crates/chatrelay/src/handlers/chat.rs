//! POST /api/chat

use std::collections::HashMap;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, timeout_at};
use tracing::{Instrument, info, info_span, warn};
use ulid::Ulid;

use crate::chat::{ChatError, ChatRequest, ChatResult, Dispatched, ProviderSettings, relay};
use crate::config::ChatConfig;
use crate::llm::{Message, ProviderId, ValidationError};
use crate::response;
use crate::server::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub providers: HashMap<String, ProviderBody>,
    #[serde(default)]
    pub system_message: Option<String>,
    #[serde(default)]
    pub with_context: bool,
    #[serde(default)]
    pub stream: bool,
    /// Context window size.
    #[serde(default)]
    pub n: Option<usize>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub intellinode_data: bool,
    #[serde(default)]
    pub one_key: Option<String>,
}

/// Per-provider settings as sent by the browser.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderBody {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub embedding_name: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: Vec<String>,
    pub references: Option<Vec<String>>,
}

impl From<ChatResult> for ChatResponse {
    fn from(result: ChatResult) -> Self {
        Self {
            response: vec![result.text],
            references: result.references,
        }
    }
}

impl ChatBody {
    /// Apply defaults and flatten the per-provider map into a request.
    pub fn into_request(self, defaults: &ChatConfig) -> Result<ChatRequest, ChatError> {
        if self.messages.is_empty() {
            return Err(ValidationError::new("messages", "must not be empty").into());
        }
        if self.n == Some(0) {
            return Err(ValidationError::new("n", "must be at least 1").into());
        }
        if let Some(t) = self.temperature
            && !(t.is_finite() && t >= 0.0)
        {
            return Err(
                ValidationError::new("temperature", "must be a non-negative number").into(),
            );
        }
        if self.max_tokens == Some(0) {
            return Err(ValidationError::new("maxTokens", "must be at least 1").into());
        }

        let provider = self
            .provider
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| defaults.default_provider.clone());
        let selected = self.providers.get(&provider).cloned().unwrap_or_default();

        let model = selected
            .model
            .filter(|m| !m.trim().is_empty())
            .or_else(|| {
                ProviderId::parse(&provider)
                    .and_then(|id| id.descriptor().default_model())
                    .map(str::to_string)
            })
            .unwrap_or_default();

        let system_prompt = self
            .system_message
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| defaults.default_system_message.clone());

        let credentials = self
            .providers
            .into_iter()
            .filter_map(|(id, body)| body.api_key.map(|key| (id, key)))
            .collect();

        Ok(ChatRequest {
            provider,
            model,
            system_prompt,
            conversation: self.messages,
            credentials,
            settings: ProviderSettings {
                resource_name: selected.resource_name,
                embedding_name: selected.embedding_name,
                base_url: selected.base_url,
            },
            context_window: self.n.unwrap_or(defaults.default_context_window),
            use_context: self.with_context,
            stream_requested: self.stream,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            platform_key: self.one_key,
            platform_data: self.intellinode_data,
        })
    }
}

// ============================================================================
// Handler
// ============================================================================

/// POST /api/chat
///
/// Answers with `{response: [text], references}` or, when streaming is
/// negotiated, a `text/event-stream` body of raw text chunks.
pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Response {
    let request_id = Ulid::new();
    let span = info_span!("chat", %request_id);

    async move {
        let Json(body) = match body {
            Ok(body) => body,
            Err(rejection) => {
                warn!(error = %rejection, "rejected chat body");
                return response::bad_request(rejection.body_text());
            }
        };

        let request = match body.into_request(&state.chat) {
            Ok(request) => request,
            Err(e) => return response::chat_error(&e),
        };
        info!(provider = %request.provider, model = %request.model, "chat request");

        let deadline = Instant::now() + state.request_timeout;
        let dispatched = timeout_at(
            deadline,
            state.dispatcher.dispatch(request, accepts_stream(&headers)),
        )
        .await
        .unwrap_or(Err(ChatError::Timeout));

        match dispatched {
            Ok(Dispatched::Complete(result)) => {
                (StatusCode::OK, Json(ChatResponse::from(result))).into_response()
            }
            Ok(Dispatched::Stream(chunks)) => {
                let relay = relay(chunks)
                    .idle_timeout(state.idle_timeout)
                    .deadline(deadline);
                (
                    StatusCode::OK,
                    [(CONTENT_TYPE, "text/event-stream"), (CACHE_CONTROL, "no-cache")],
                    Body::from_stream(relay),
                )
                    .into_response()
            }
            Err(e) => {
                warn!(error = %e, "chat request failed");
                response::chat_error(&e)
            }
        }
    }
    .instrument(span)
    .await
}

fn accepts_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("text/event-stream"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::chat::{Credentials, stream_error_text};
    use crate::config::Config;
    use crate::llm::{
        ChunkStream, Connection, Connector, DocumentSearch, Embedder, EmbeddingTarget, LLMError,
        LLMProvider, Passage, ProviderInput, RawChatResult,
    };
    use crate::server::{AppState, build_app};

    enum Behaviour {
        Answer,
        Fail,
        Hang,
    }

    struct StubProvider(Behaviour);

    #[async_trait]
    impl LLMProvider for StubProvider {
        async fn chat(&self, input: &ProviderInput) -> Result<RawChatResult, LLMError> {
            match self.0 {
                Behaviour::Answer => Ok(RawChatResult::single(format!(
                    "echo: {}",
                    input.last_turn().map(|m| m.content.as_str()).unwrap_or_default()
                ))),
                Behaviour::Fail => Err(LLMError::Api {
                    status: 401,
                    message: r#"{"error":{"message":"Incorrect API key provided"}}"#.into(),
                }),
                Behaviour::Hang => futures::future::pending().await,
            }
        }

        async fn chat_stream(&self, _input: &ProviderInput) -> Result<ChunkStream, LLMError> {
            let items: Vec<Result<String, LLMError>> = match self.0 {
                Behaviour::Fail => vec![
                    Ok("Hel".into()),
                    Err(LLMError::Stream {
                        message: r#"{"error":{"message":"overloaded"}}"#.into(),
                    }),
                ],
                _ => vec![Ok("Hel".into()), Ok("lo".into()), Ok(" world".into())],
            };
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LLMError> {
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
    }

    struct StubSearch;

    #[async_trait]
    impl DocumentSearch for StubSearch {
        async fn search(&self, _: &str, _: &str, _: usize) -> Result<Vec<Passage>, LLMError> {
            Ok(Vec::new())
        }
    }

    struct StubConnector(Arc<StubProvider>);

    impl Connector for StubConnector {
        fn chat_provider(&self, _connection: &Connection) -> Arc<dyn LLMProvider> {
            self.0.clone()
        }

        fn embedder(&self, _target: &EmbeddingTarget) -> Arc<dyn Embedder> {
            Arc::new(StubEmbedder)
        }

        fn document_search(&self) -> Arc<dyn DocumentSearch> {
            Arc::new(StubSearch)
        }
    }

    fn app_with(behaviour: Behaviour, vars: &[(&str, &str)], timeout: Duration) -> axum::Router {
        let config = Config::default();
        let connector = Arc::new(StubConnector(Arc::new(StubProvider(behaviour))));
        let mut state = AppState::new(
            &config,
            Credentials::from_parts(vars.iter().copied()),
            connector,
        );
        state.request_timeout = timeout;
        build_app(state)
    }

    fn app(behaviour: Behaviour) -> axum::Router {
        app_with(behaviour, &[], Duration::from_secs(30))
    }

    fn post_chat(body: serde_json::Value, accept: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, accept)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read_body(response: Response) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec()
    }

    async fn read_json(response: Response) -> serde_json::Value {
        serde_json::from_slice(&read_body(response).await).unwrap()
    }

    #[tokio::test]
    async fn test_openai_chat_returns_response_array() {
        let body = serde_json::json!({
            "provider": "openai",
            "providers": {"openai": {"model": "gpt-4", "apiKey": "sk-test"}},
            "messages": [{"role": "user", "content": "Hi"}],
            "withContext": false,
            "stream": false
        });

        let response = app(Behaviour::Answer)
            .oneshot(post_chat(body, "application/json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = read_json(response).await;
        assert_eq!(json["response"], serde_json::json!(["echo: Hi"]));
        assert!(json["references"].is_null());
    }

    #[tokio::test]
    async fn test_defaults_apply_when_fields_missing() {
        // Provider defaults to openai, model to its first listed model.
        let body = serde_json::json!({"messages": [{"role": "user", "content": "Hi"}]});
        let app = app_with(
            Behaviour::Answer,
            &[("OPENAI_API_KEY", "sk-env")],
            Duration::from_secs(30),
        );
        let response = app
            .oneshot(post_chat(body, "*/*"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stream_negotiated_returns_raw_chunks() {
        let body = serde_json::json!({
            "provider": "openai",
            "providers": {"openai": {"model": "gpt-4o", "apiKey": "sk-test"}},
            "messages": [{"role": "user", "content": "Hi"}],
            "stream": true
        });

        let response = app(Behaviour::Answer)
            .oneshot(post_chat(body, "text/event-stream"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/event-stream");
        assert_eq!(read_body(response).await, b"Hello world");
    }

    #[tokio::test]
    async fn test_stream_without_accept_header_is_json() {
        let body = serde_json::json!({
            "provider": "openai",
            "providers": {"openai": {"model": "gpt-4o", "apiKey": "sk-test"}},
            "messages": [{"role": "user", "content": "Hi"}],
            "stream": true
        });

        let response = app(Behaviour::Answer)
            .oneshot(post_chat(body, "application/json"))
            .await
            .unwrap();
        let json = read_json(response).await;
        assert_eq!(json["response"][0], "echo: Hi");
    }

    #[tokio::test]
    async fn test_stream_error_becomes_trailing_chunk() {
        let body = serde_json::json!({
            "provider": "anthropic",
            "providers": {"anthropic": {"model": "claude-3-opus-20240229", "apiKey": "k"}},
            "messages": [{"role": "user", "content": "Hi"}],
            "stream": true
        });

        let response = app(Behaviour::Fail)
            .oneshot(post_chat(body, "text/event-stream"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let text = String::from_utf8(read_body(response).await).unwrap();
        assert_eq!(text, format!("Hel{}", stream_error_text("overloaded")));
    }

    #[tokio::test]
    async fn test_upstream_error_message_is_surfaced() {
        let body = serde_json::json!({
            "provider": "openai",
            "providers": {"openai": {"model": "gpt-4", "apiKey": "sk-bad"}},
            "messages": [{"role": "user", "content": "Hi"}]
        });

        let response = app(Behaviour::Fail)
            .oneshot(post_chat(body, "application/json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = read_json(response).await;
        assert_eq!(json["error"], "Incorrect API key provided");
    }

    #[tokio::test]
    async fn test_missing_key_is_bad_request() {
        let body = serde_json::json!({
            "provider": "cohere",
            "messages": [{"role": "user", "content": "Hi"}]
        });

        let response = app(Behaviour::Answer)
            .oneshot(post_chat(body, "application/json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = read_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("Cohere"));
    }

    #[tokio::test]
    async fn test_invalid_body_is_bad_request() {
        let body = serde_json::json!({"messages": [{"role": "system", "content": "x"}]});
        let response = app(Behaviour::Answer)
            .oneshot(post_chat(body, "application/json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(read_json(response).await["error"].is_string());

        let response = app(Behaviour::Answer)
            .oneshot(post_chat(serde_json::json!({"messages": []}), "application/json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            read_json(response).await["error"],
            "messages: must not be empty"
        );
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let body = serde_json::json!({
            "providers": {"openai": {"model": "gpt-4", "apiKey": "sk"}},
            "messages": [{"role": "user", "content": "Hi"}]
        });

        let response = app_with(Behaviour::Hang, &[], Duration::from_millis(50))
            .oneshot(post_chat(body, "application/json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(read_json(response).await["error"], "Request timed out");
    }

    #[tokio::test]
    async fn test_keys_reports_configured_providers() {
        let app = app_with(
            Behaviour::Answer,
            &[("MISTRAL_API_KEY", "mi")],
            Duration::from_secs(30),
        );
        let response = app
            .oneshot(Request::get("/api/keys").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = read_json(response).await;
        assert_eq!(json["mistral"], true);
        assert_eq!(json["openai"], false);
        assert_eq!(json.as_object().unwrap().len(), ProviderId::ALL.len());
    }

    #[tokio::test]
    async fn test_providers_lists_descriptor_table() {
        let response = app(Behaviour::Answer)
            .oneshot(Request::get("/api/providers").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let json = read_json(response).await;
        let ids: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["id"].as_str().unwrap())
            .collect();
        assert_eq!(
            ids,
            ["openai", "azure", "replicate", "cohere", "google", "mistral", "anthropic", "vllm"]
        );
    }

    #[tokio::test]
    async fn test_health_and_version() {
        let response = app(Behaviour::Answer)
            .oneshot(Request::get("/livez").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app(Behaviour::Answer)
            .oneshot(Request::get("/version").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(read_json(response).await["name"], "chatrelay");
    }

    #[test]
    fn test_into_request_defaults() {
        let body: ChatBody = serde_json::from_value(serde_json::json!({
            "messages": [{"role": "user", "content": "Hi"}],
            "systemMessage": "   ",
            "providers": {
                "azure": {"apiKey": "az", "resourceName": "acme"},
                "openai": {"apiKey": "sk"}
            },
            "oneKey": "in_tok"
        }))
        .unwrap();

        let defaults = ChatConfig::default();
        let request = body.into_request(&defaults).unwrap();
        assert_eq!(request.provider, "openai");
        assert_eq!(request.model, "gpt-3.5-turbo");
        assert_eq!(request.system_prompt, defaults.default_system_message);
        assert_eq!(request.context_window, 2);
        assert_eq!(request.credentials.get("azure").map(String::as_str), Some("az"));
        assert_eq!(request.credentials.get("openai").map(String::as_str), Some("sk"));
        assert_eq!(request.platform_key.as_deref(), Some("in_tok"));
        assert!(request.settings.resource_name.is_none());
    }

    #[test]
    fn test_into_request_rejects_zero_window() {
        let body: ChatBody = serde_json::from_value(serde_json::json!({
            "messages": [{"role": "user", "content": "Hi"}],
            "n": 0
        }))
        .unwrap();
        let err = body.into_request(&ChatConfig::default()).unwrap_err();
        assert_eq!(err.client_message(), "n: must be at least 1");
    }

    #[test]
    fn test_into_request_accepts_huge_window() {
        let body: ChatBody = serde_json::from_value(serde_json::json!({
            "messages": [{"role": "user", "content": "Hi"}],
            "n": u64::MAX
        }))
        .unwrap();
        let request = body.into_request(&ChatConfig::default()).unwrap();
        let turns = crate::chat::raw_window(&request.conversation, request.context_window);
        assert_eq!(turns, request.conversation);
    }

    #[test]
    fn test_into_request_generation_options() {
        let body: ChatBody = serde_json::from_value(serde_json::json!({
            "messages": [{"role": "user", "content": "Hi"}],
            "temperature": 0.2,
            "maxTokens": 128
        }))
        .unwrap();
        let request = body.into_request(&ChatConfig::default()).unwrap();
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.max_tokens, Some(128));

        let body: ChatBody = serde_json::from_value(serde_json::json!({
            "messages": [{"role": "user", "content": "Hi"}],
            "temperature": -1.0
        }))
        .unwrap();
        let err = body.into_request(&ChatConfig::default()).unwrap_err();
        assert_eq!(err.client_message(), "temperature: must be a non-negative number");

        let body: ChatBody = serde_json::from_value(serde_json::json!({
            "messages": [{"role": "user", "content": "Hi"}],
            "maxTokens": 0
        }))
        .unwrap();
        let err = body.into_request(&ChatConfig::default()).unwrap_err();
        assert_eq!(err.client_message(), "maxTokens: must be at least 1");
    }

    #[test]
    fn test_accepts_stream() {
        let mut headers = HeaderMap::new();
        assert!(!accepts_stream(&headers));
        headers.insert(ACCEPT, "text/event-stream, */*".parse().unwrap());
        assert!(accepts_stream(&headers));
    }
}
