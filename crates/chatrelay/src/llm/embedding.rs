//! Text embeddings used to rank conversation context.

use async_trait::async_trait;
use reqwest::Client;

use super::error::{LLMError, into_api_error};

/// Default OpenAI embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";

/// Something that can turn texts into vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed every text; the result has one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LLMError>;
}

/// Where embeddings come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingTarget {
    OpenAI {
        api_key: String,
    },
    Azure {
        api_key: String,
        resource_name: String,
        deployment: String,
    },
}

/// `/embeddings` client for OpenAI and Azure OpenAI.
pub struct OpenAIEmbedder {
    client: Client,
    url: String,
    auth_header: (&'static str, String),
    model: Option<String>,
}

impl OpenAIEmbedder {
    pub fn openai(client: Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            url: format!("{}/embeddings", base_url.trim_end_matches('/')),
            auth_header: ("Authorization", format!("Bearer {}", api_key)),
            model: Some(DEFAULT_EMBEDDING_MODEL.to_string()),
        }
    }

    pub fn azure(
        client: Client,
        resource_name: &str,
        deployment: &str,
        api_version: &str,
        api_key: &str,
    ) -> Self {
        Self {
            client,
            url: format!(
                "https://{resource_name}.openai.azure.com/openai/deployments/{deployment}/embeddings?api-version={api_version}"
            ),
            auth_header: ("api-key", api_key.to_string()),
            model: None,
        }
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LLMError> {
        let body = Request {
            model: self.model.as_deref(),
            input: texts,
        };

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header(self.auth_header.0, &self.auth_header.1)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(into_api_error(response).await);
        }

        let response: Response = response.json().await?;
        from_response(response, texts.len())
    }
}

#[derive(serde::Serialize)]
struct Request<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    input: &'a [String],
}

#[derive(serde::Deserialize)]
struct Response {
    data: Vec<EmbeddingData>,
}

#[derive(serde::Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

fn from_response(mut response: Response, expected: usize) -> Result<Vec<Vec<f32>>, LLMError> {
    if response.data.len() != expected {
        return Err(LLMError::InvalidResponse(format!(
            "expected {expected} embeddings, got {}",
            response.data.len()
        )));
    }
    response.data.sort_by_key(|d| d.index);
    Ok(response.data.into_iter().map(|d| d.embedding).collect())
}
