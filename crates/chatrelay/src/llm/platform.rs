//! Platform document search used for grounded answers.

use async_trait::async_trait;
use reqwest::Client;

use super::error::{LLMError, into_api_error};

/// A passage returned by document search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Passage {
    /// Name of the source document; used as the reference identifier.
    pub document: String,
    pub text: String,
}

/// Searches the caller's uploaded documents on the platform.
#[async_trait]
pub trait DocumentSearch: Send + Sync {
    async fn search(&self, platform_key: &str, query: &str, k: usize)
    -> Result<Vec<Passage>, LLMError>;
}

/// HTTP client for the platform's `semantic_search` endpoint.
pub struct PlatformSearch {
    client: Client,
    base_url: String,
}

impl PlatformSearch {
    pub fn new(client: Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl DocumentSearch for PlatformSearch {
    async fn search(
        &self,
        platform_key: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<Passage>, LLMError> {
        let url = format!("{}/semantic_search/", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-API-KEY", platform_key)
            .json(&Request {
                pivot_item: query,
                k,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(into_api_error(response).await);
        }

        let response: Response = response.json().await?;
        Ok(from_response(response))
    }
}

#[derive(serde::Serialize)]
struct Request<'a> {
    pivot_item: &'a str,
    k: usize,
}

#[derive(serde::Deserialize)]
struct Response {
    #[serde(default)]
    data: Vec<DocumentHits>,
}

#[derive(serde::Deserialize)]
struct DocumentHits {
    document_name: String,
    #[serde(default)]
    data: Vec<Hit>,
}

#[derive(serde::Deserialize)]
struct Hit {
    text: String,
}

fn from_response(response: Response) -> Vec<Passage> {
    response
        .data
        .into_iter()
        .flat_map(|doc| {
            let name = doc.document_name;
            doc.data.into_iter().map(move |hit| Passage {
                document: name.clone(),
                text: hit.text,
            })
        })
        .collect()
}

/// Render passages as a grounding block for the system prompt.
pub fn grounding_prompt(passages: &[Passage]) -> String {
    if passages.is_empty() {
        return String::new();
    }
    let mut prompt =
        String::from("Use the following excerpts from the user's documents when relevant:");
    for passage in passages {
        prompt.push_str(&format!("\n[{}] {}", passage.document, passage.text));
    }
    prompt
}
