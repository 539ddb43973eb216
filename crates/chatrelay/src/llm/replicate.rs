//! Replicate predictions for hosted Llama models.
//!
//! Predictions are created with `Prefer: wait`; if the prediction is still
//! running when the server returns, its `get` URL is polled until it settles.
//! The caller's request deadline bounds the polling.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::error::{LLMError, into_api_error};
use super::provider::LLMProvider;
use super::types::{ProviderInput, RawChatResult, Role};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_MAX_NEW_TOKENS: u32 = 1024;

/// Map a client-facing model alias to the hosted model path.
pub fn model_path(alias: &str) -> Option<&'static str> {
    match alias {
        "70b-chat" => Some("meta/llama-2-70b-chat"),
        "13b-chat" => Some("meta/llama-2-13b-chat"),
        "34b-code" => Some("meta/codellama-34b-instruct"),
        "34b-python" => Some("meta/codellama-34b-python"),
        "13b-code-instruct" => Some("meta/codellama-13b-instruct"),
        _ => None,
    }
}

pub struct ReplicateProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ReplicateProvider {
    pub fn new(client: Client, api_key: String, base_url: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }

    async fn poll(&self, mut prediction: Prediction) -> Result<Prediction, LLMError> {
        while !prediction.status.is_terminal() {
            let Some(get_url) = prediction.urls.as_ref().and_then(|u| u.get.clone()) else {
                return Err(LLMError::InvalidResponse(
                    "running prediction has no status url".to_string(),
                ));
            };
            tokio::time::sleep(POLL_INTERVAL).await;

            let response = self
                .client
                .get(&get_url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(into_api_error(response).await);
            }
            prediction = response.json().await?;
            tracing::debug!(id = %prediction.id, status = ?prediction.status, "polled prediction");
        }
        Ok(prediction)
    }
}

#[async_trait]
impl LLMProvider for ReplicateProvider {
    async fn chat(&self, input: &ProviderInput) -> Result<RawChatResult, LLMError> {
        let path = model_path(&input.model).unwrap_or(input.model.as_str());
        let url = format!(
            "{}/models/{}/predictions",
            self.base_url.trim_end_matches('/'),
            path
        );

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Prefer", "wait")
            .json(&to_request(input))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(into_api_error(response).await);
        }

        let prediction: Prediction = response.json().await?;
        let prediction = self.poll(prediction).await?;
        from_prediction(prediction)
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(serde::Serialize)]
struct Request {
    input: PredictionInput,
}

#[derive(serde::Serialize)]
struct PredictionInput {
    prompt: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    system_prompt: String,
    max_new_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, serde::Deserialize)]
struct Prediction {
    #[serde(default)]
    id: String,
    status: PredictionStatus,
    #[serde(default)]
    output: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    urls: Option<PredictionUrls>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl PredictionStatus {
    fn is_terminal(self) -> bool {
        matches!(
            self,
            PredictionStatus::Succeeded | PredictionStatus::Failed | PredictionStatus::Canceled
        )
    }
}

#[derive(Debug, serde::Deserialize)]
struct PredictionUrls {
    get: Option<String>,
}

// ============================================================================
// Conversions
// ============================================================================

/// Render turns in Llama-2 chat format. The system prompt travels separately.
fn render_prompt(input: &ProviderInput) -> String {
    input
        .turns
        .iter()
        .map(|turn| match turn.role {
            Role::User => format!("[INST] {} [/INST]", turn.content),
            Role::Assistant => turn.content.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn to_request(input: &ProviderInput) -> Request {
    Request {
        input: PredictionInput {
            prompt: render_prompt(input),
            system_prompt: input.system_prompt.clone(),
            max_new_tokens: input.max_tokens.unwrap_or(DEFAULT_MAX_NEW_TOKENS),
            temperature: input.temperature,
        },
    }
}

fn from_prediction(prediction: Prediction) -> Result<RawChatResult, LLMError> {
    match prediction.status {
        PredictionStatus::Succeeded => {}
        PredictionStatus::Canceled => {
            return Err(LLMError::Prediction("prediction was canceled".to_string()));
        }
        _ => {
            let reason = match prediction.error {
                Some(serde_json::Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => "unknown error".to_string(),
            };
            return Err(LLMError::Prediction(reason));
        }
    }

    let text = match prediction.output {
        // Language models return the generated tokens as an array
        Some(serde_json::Value::Array(tokens)) => tokens
            .iter()
            .filter_map(|t| t.as_str())
            .collect::<String>(),
        Some(serde_json::Value::String(s)) => s,
        Some(other) => {
            return Err(LLMError::InvalidResponse(format!(
                "unexpected prediction output: {other}"
            )));
        }
        None => String::new(),
    };

    Ok(RawChatResult::single(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::InputShape;

    #[test]
    fn aliases_map_to_hosted_models() {
        assert_eq!(model_path("70b-chat"), Some("meta/llama-2-70b-chat"));
        assert_eq!(model_path("34b-python"), Some("meta/codellama-34b-python"));
        assert_eq!(model_path("gpt-4"), None);
    }

    #[test]
    fn prompt_renders_turns_in_order() {
        let mut input = ProviderInput::new(InputShape::Replicate, "13b-chat", "You are terse.");
        input.add_user_turn("Hi");
        input.add_assistant_turn("Hello");
        input.add_user_turn("Bye");

        let json = serde_json::to_value(to_request(&input)).unwrap();
        assert_eq!(
            json["input"]["prompt"],
            "[INST] Hi [/INST]\nHello\n[INST] Bye [/INST]"
        );
        assert_eq!(json["input"]["system_prompt"], "You are terse.");
        assert_eq!(json["input"]["max_new_tokens"], 1024);
    }

    #[test]
    fn succeeded_prediction_joins_tokens() {
        let prediction: Prediction = serde_json::from_str(
            r#"{"id":"p1","status":"succeeded","output":["Hel","lo"," world"]}"#,
        )
        .unwrap();
        assert_eq!(from_prediction(prediction).unwrap().candidates, ["Hello world"]);
    }

    #[test]
    fn failed_prediction_surfaces_error() {
        let prediction: Prediction = serde_json::from_str(
            r#"{"id":"p1","status":"failed","error":"CUDA out of memory"}"#,
        )
        .unwrap();
        match from_prediction(prediction) {
            Err(LLMError::Prediction(msg)) => assert_eq!(msg, "CUDA out of memory"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn running_status_is_not_terminal() {
        assert!(!PredictionStatus::Starting.is_terminal());
        assert!(!PredictionStatus::Processing.is_terminal());
        assert!(PredictionStatus::Canceled.is_terminal());
    }
}
