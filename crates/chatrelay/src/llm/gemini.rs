//! Google Gemini provider (`generateContent`).

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use super::error::{LLMError, into_api_error};
use super::provider::LLMProvider;
use super::types::{ProviderInput, RawChatResult, Role};

/// Model name used when clients pick the generic `gemini` entry.
const DEFAULT_MODEL: &str = "gemini-pro";

pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GeminiProvider {
    pub fn new(client: Client, api_key: String, base_url: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }

    fn url(&self, model: &str) -> Result<Url, LLMError> {
        let model = if model == "gemini" { DEFAULT_MODEL } else { model };
        let raw = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            model
        );
        Url::parse_with_params(&raw, [("key", self.api_key.as_str())])
            .map_err(|e| LLMError::InvalidResponse(format!("bad gemini url {raw}: {e}")))
    }
}

#[async_trait]
impl LLMProvider for GeminiProvider {
    async fn chat(&self, input: &ProviderInput) -> Result<RawChatResult, LLMError> {
        let response = self
            .client
            .post(self.url(&input.model)?)
            .header("Content-Type", "application/json")
            .json(&to_request(input))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(into_api_error(response).await);
        }

        let response: Response = response.json().await?;
        from_response(response)
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(serde::Deserialize)]
struct Response {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(serde::Deserialize)]
struct Candidate {
    content: Option<Content>,
}

fn to_request(input: &ProviderInput) -> Request {
    let text_content = |role: Option<&str>, text: &str| Content {
        role: role.map(str::to_string),
        parts: vec![Part {
            text: text.to_string(),
        }],
    };

    Request {
        contents: input
            .turns
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                };
                text_content(Some(role), &turn.content)
            })
            .collect(),
        system_instruction: (!input.system_prompt.is_empty())
            .then(|| text_content(None, &input.system_prompt)),
        generation_config: GenerationConfig {
            temperature: input.temperature,
            max_output_tokens: input.max_tokens,
        },
    }
}

fn from_response(response: Response) -> Result<RawChatResult, LLMError> {
    if response.candidates.is_empty() {
        return Err(LLMError::InvalidResponse(
            "gemini returned no candidates".to_string(),
        ));
    }

    let candidates = response
        .candidates
        .into_iter()
        .map(|c| {
            c.content
                .map(|content| {
                    content
                        .parts
                        .into_iter()
                        .map(|p| p.text)
                        .collect::<Vec<_>>()
                        .join("")
                })
                .unwrap_or_default()
        })
        .collect();

    Ok(RawChatResult {
        candidates,
        references: None,
    })
}
