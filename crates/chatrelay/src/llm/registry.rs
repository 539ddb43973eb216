//! Provider registry and the connector that builds provider clients.

use std::sync::Arc;

use reqwest::Client;
use thiserror::Error;
use tracing::debug;

use super::anthropic::AnthropicProvider;
use super::cohere::CohereProvider;
use super::embedding::{Embedder, EmbeddingTarget, OpenAIEmbedder};
use super::gemini::GeminiProvider;
use super::openai::OpenAICompatibleProvider;
use super::platform::{DocumentSearch, PlatformSearch};
use super::provider::{CredentialField, LLMProvider, ModelCatalog, ProviderDescriptor, ProviderId};
use super::replicate::ReplicateProvider;
use crate::config::EndpointsConfig;

/// A request field failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Per-request values checked against a descriptor's `requires_fields`.
///
/// `api_key` holds the key after credential resolution, so an environment or
/// platform key counts as present.
#[derive(Debug, Clone, Default)]
pub struct CredentialFields {
    pub api_key: Option<String>,
    pub resource_name: Option<String>,
    pub base_url: Option<String>,
}

impl CredentialFields {
    fn get(&self, field: CredentialField) -> Option<&str> {
        match field {
            CredentialField::ApiKey => self.api_key.as_deref(),
            CredentialField::ResourceName => self.resource_name.as_deref(),
            CredentialField::BaseUrl => self.base_url.as_deref(),
        }
    }
}

/// Read-only view over the provider descriptor table.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderRegistry;

impl ProviderRegistry {
    pub fn new() -> Self {
        Self
    }

    pub fn describe(&self, provider_id: &str) -> Option<&'static ProviderDescriptor> {
        ProviderId::parse(provider_id).map(ProviderId::descriptor)
    }

    /// Check provider, model and required fields.
    pub fn validate(
        &self,
        provider_id: &str,
        model: &str,
        fields: &CredentialFields,
    ) -> Result<&'static ProviderDescriptor, ValidationError> {
        let descriptor = self.describe(provider_id).ok_or_else(|| {
            ValidationError::new("provider", format!("unknown provider '{provider_id}'"))
        })?;

        match descriptor.models {
            ModelCatalog::Fixed(models) => {
                if !models.contains(&model) {
                    return Err(ValidationError::new(
                        "model",
                        format!(
                            "'{model}' is not a supported {} model",
                            descriptor.display_name
                        ),
                    ));
                }
            }
            ModelCatalog::FreeForm => {
                if model.trim().is_empty() {
                    return Err(ValidationError::new("model", "is required"));
                }
            }
        }

        for field in descriptor.requires_fields {
            if fields.get(*field).is_none_or(|v| v.trim().is_empty()) {
                return Err(ValidationError::new(field.as_str(), "is required"));
            }
        }

        Ok(descriptor)
    }
}

/// Everything needed to open a chat client for one request.
#[derive(Debug, Clone)]
pub struct Connection {
    pub provider: ProviderId,
    pub api_key: Option<String>,
    pub resource_name: Option<String>,
    pub base_url: Option<String>,
}

/// Builds provider clients for a request.
pub trait Connector: Send + Sync {
    fn chat_provider(&self, connection: &Connection) -> Arc<dyn LLMProvider>;
    fn embedder(&self, target: &EmbeddingTarget) -> Arc<dyn Embedder>;
    fn document_search(&self) -> Arc<dyn DocumentSearch>;
}

/// Connector backed by real HTTP clients sharing one connection pool.
#[derive(Clone)]
pub struct HttpConnector {
    client: Client,
    endpoints: EndpointsConfig,
    platform_base_url: String,
}

impl HttpConnector {
    pub fn new(client: Client, endpoints: EndpointsConfig, platform_base_url: String) -> Self {
        Self {
            client,
            endpoints,
            platform_base_url,
        }
    }
}

impl Connector for HttpConnector {
    fn chat_provider(&self, connection: &Connection) -> Arc<dyn LLMProvider> {
        let client = self.client.clone();
        let api_key = connection.api_key.clone().unwrap_or_default();
        debug!(provider = %connection.provider, "building provider client");

        match connection.provider {
            ProviderId::OpenAI => Arc::new(OpenAICompatibleProvider::new(
                client,
                self.endpoints.openai.clone(),
                api_key,
            )),
            ProviderId::Azure => Arc::new(OpenAICompatibleProvider::azure(
                client,
                connection.resource_name.clone().unwrap_or_default(),
                self.endpoints.azure_api_version.clone(),
                api_key,
            )),
            ProviderId::Mistral => Arc::new(OpenAICompatibleProvider::new(
                client,
                self.endpoints.mistral.clone(),
                api_key,
            )),
            ProviderId::Vllm => {
                let base_url = connection
                    .base_url
                    .as_deref()
                    .or(self.endpoints.vllm.as_deref())
                    .unwrap_or_default();
                Arc::new(OpenAICompatibleProvider::vllm(client, base_url))
            }
            ProviderId::Anthropic => Arc::new(AnthropicProvider::new(
                client,
                api_key,
                self.endpoints.anthropic.clone(),
            )),
            ProviderId::Cohere => Arc::new(CohereProvider::new(
                client,
                api_key,
                self.endpoints.cohere.clone(),
            )),
            ProviderId::Google => Arc::new(GeminiProvider::new(
                client,
                api_key,
                self.endpoints.gemini.clone(),
            )),
            ProviderId::Replicate => Arc::new(ReplicateProvider::new(
                client,
                api_key,
                self.endpoints.replicate.clone(),
            )),
        }
    }

    fn embedder(&self, target: &EmbeddingTarget) -> Arc<dyn Embedder> {
        match target {
            EmbeddingTarget::OpenAI { api_key } => Arc::new(OpenAIEmbedder::openai(
                self.client.clone(),
                &self.endpoints.openai,
                api_key,
            )),
            EmbeddingTarget::Azure {
                api_key,
                resource_name,
                deployment,
            } => Arc::new(OpenAIEmbedder::azure(
                self.client.clone(),
                resource_name,
                deployment,
                &self.endpoints.azure_api_version,
                api_key,
            )),
        }
    }

    fn document_search(&self) -> Arc<dyn DocumentSearch> {
        Arc::new(PlatformSearch::new(
            self.client.clone(),
            self.platform_base_url.clone(),
        ))
    }
}
