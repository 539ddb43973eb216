//! Provider identifiers, the descriptor table and the provider trait.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use super::error::LLMError;
use super::types::{ChunkStream, InputShape, ProviderInput, RawChatResult};

/// Trait for LLM providers with different API formats.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Make a chat completion request and wait for the full result.
    async fn chat(&self, input: &ProviderInput) -> Result<RawChatResult, LLMError>;

    /// Start a streaming chat completion.
    async fn chat_stream(&self, input: &ProviderInput) -> Result<ChunkStream, LLMError> {
        let _ = input;
        Err(LLMError::StreamingUnsupported)
    }
}

/// Supported LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenAI,
    Azure,
    Replicate,
    Cohere,
    Google,
    Mistral,
    Anthropic,
    Vllm,
}

impl ProviderId {
    pub const ALL: [ProviderId; 8] = [
        ProviderId::OpenAI,
        ProviderId::Azure,
        ProviderId::Replicate,
        ProviderId::Cohere,
        ProviderId::Google,
        ProviderId::Mistral,
        ProviderId::Anthropic,
        ProviderId::Vllm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenAI => "openai",
            ProviderId::Azure => "azure",
            ProviderId::Replicate => "replicate",
            ProviderId::Cohere => "cohere",
            ProviderId::Google => "google",
            ProviderId::Mistral => "mistral",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Vllm => "vllm",
        }
    }

    /// Parse a provider identifier as sent by clients.
    pub fn parse(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == id)
    }

    /// The descriptor for this provider.
    pub fn descriptor(self) -> &'static ProviderDescriptor {
        &DESCRIPTORS[self as usize]
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-request field a provider needs before it can be called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CredentialField {
    ApiKey,
    ResourceName,
    BaseUrl,
}

impl CredentialField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialField::ApiKey => "apiKey",
            CredentialField::ResourceName => "resourceName",
            CredentialField::BaseUrl => "baseUrl",
        }
    }
}

/// How a provider treats relevance-ranked conversation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextPolicy {
    /// Context is never attempted; the raw window is always used.
    Unsupported,
    /// Missing grounding credentials fall back to the raw window.
    Optional,
    /// Missing grounding credentials fail the request.
    Required,
}

/// Models a provider accepts.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(untagged)]
pub enum ModelCatalog {
    Fixed(&'static [&'static str]),
    /// Any non-empty name (deployment names, self-hosted models).
    FreeForm,
}

/// Static description of one provider.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    pub display_name: &'static str,
    pub models: ModelCatalog,
    pub requires_fields: &'static [CredentialField],
    pub supports_streaming: bool,
    pub context: ContextPolicy,
    #[serde(skip)]
    pub shape: InputShape,
    /// Environment variable holding the operator's key.
    #[serde(skip)]
    pub env_key: Option<&'static str>,
    /// Environment variable holding the platform shared key.
    #[serde(skip)]
    pub platform_env_key: Option<&'static str>,
}

impl ProviderDescriptor {
    pub fn supports_context(&self) -> bool {
        self.context != ContextPolicy::Unsupported
    }

    pub fn requires(&self, field: CredentialField) -> bool {
        self.requires_fields.contains(&field)
    }

    /// Model used when the caller does not name one.
    pub fn default_model(&self) -> Option<&'static str> {
        match self.models {
            ModelCatalog::Fixed(models) => models.first().copied(),
            ModelCatalog::FreeForm => None,
        }
    }
}

const API_KEY: &[CredentialField] = &[CredentialField::ApiKey];

/// Provider table, indexed by `ProviderId as usize`.
static DESCRIPTORS: [ProviderDescriptor; 8] = [
    ProviderDescriptor {
        id: ProviderId::OpenAI,
        display_name: "OpenAI",
        models: ModelCatalog::Fixed(&[
            "gpt-3.5-turbo",
            "gpt-4",
            "gpt-4-turbo-preview",
            "gpt-4o",
            "gpt-4o-mini",
        ]),
        requires_fields: API_KEY,
        supports_streaming: true,
        context: ContextPolicy::Optional,
        shape: InputShape::OpenAICompatible,
        env_key: Some("OPENAI_API_KEY"),
        platform_env_key: Some("INTELLI_OPENAI_API_KEY"),
    },
    ProviderDescriptor {
        id: ProviderId::Azure,
        display_name: "Azure OpenAI",
        models: ModelCatalog::FreeForm,
        requires_fields: &[CredentialField::ApiKey, CredentialField::ResourceName],
        supports_streaming: true,
        context: ContextPolicy::Required,
        shape: InputShape::OpenAICompatible,
        env_key: Some("AZURE_API_KEY"),
        platform_env_key: Some("INTELLI_AZURE_API_KEY"),
    },
    ProviderDescriptor {
        id: ProviderId::Replicate,
        display_name: "Replicate",
        models: ModelCatalog::Fixed(&[
            "70b-chat",
            "13b-chat",
            "34b-code",
            "34b-python",
            "13b-code-instruct",
        ]),
        requires_fields: API_KEY,
        supports_streaming: false,
        context: ContextPolicy::Optional,
        shape: InputShape::Replicate,
        env_key: Some("REPLICATE_API_KEY"),
        platform_env_key: Some("INTELLI_REPLICATE_API_KEY"),
    },
    ProviderDescriptor {
        id: ProviderId::Cohere,
        display_name: "Cohere",
        models: ModelCatalog::Fixed(&["command"]),
        requires_fields: API_KEY,
        supports_streaming: true,
        context: ContextPolicy::Optional,
        shape: InputShape::Cohere,
        env_key: Some("COHERE_API_KEY"),
        platform_env_key: Some("INTELLI_COHERE_API_KEY"),
    },
    ProviderDescriptor {
        id: ProviderId::Google,
        display_name: "Google Gemini",
        models: ModelCatalog::Fixed(&["gemini"]),
        requires_fields: API_KEY,
        supports_streaming: false,
        context: ContextPolicy::Optional,
        shape: InputShape::Gemini,
        env_key: Some("GOOGLE_API_KEY"),
        platform_env_key: Some("INTELLI_GOOGLE_API_KEY"),
    },
    ProviderDescriptor {
        id: ProviderId::Mistral,
        display_name: "Mistral",
        models: ModelCatalog::Fixed(&["mistral-tiny", "mistral-medium"]),
        requires_fields: API_KEY,
        supports_streaming: true,
        context: ContextPolicy::Optional,
        shape: InputShape::Mistral,
        env_key: Some("MISTRAL_API_KEY"),
        platform_env_key: Some("INTELLI_MISTRAL_API_KEY"),
    },
    ProviderDescriptor {
        id: ProviderId::Anthropic,
        display_name: "Anthropic",
        models: ModelCatalog::Fixed(&["claude-3-sonnet-20240229", "claude-3-opus-20240229"]),
        requires_fields: API_KEY,
        supports_streaming: true,
        context: ContextPolicy::Optional,
        shape: InputShape::Anthropic,
        env_key: Some("ANTHROPIC_API_KEY"),
        platform_env_key: Some("INTELLI_ANTHROPIC_API_KEY"),
    },
    ProviderDescriptor {
        id: ProviderId::Vllm,
        display_name: "vLLM",
        models: ModelCatalog::FreeForm,
        requires_fields: &[CredentialField::BaseUrl],
        supports_streaming: true,
        context: ContextPolicy::Unsupported,
        shape: InputShape::Vllm,
        env_key: None,
        platform_env_key: None,
    },
];

/// All provider descriptors in declaration order.
pub fn descriptors() -> &'static [ProviderDescriptor] {
    &DESCRIPTORS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_table_matches_ids() {
        for id in ProviderId::ALL {
            assert_eq!(id.descriptor().id, id);
        }
        assert_eq!(descriptors().len(), ProviderId::ALL.len());
    }

    #[test]
    fn parse_round_trips_every_id() {
        for id in ProviderId::ALL {
            assert_eq!(ProviderId::parse(id.as_str()), Some(id));
            assert_eq!(
                serde_json::to_string(&id).unwrap(),
                format!("\"{}\"", id.as_str())
            );
        }
        assert_eq!(ProviderId::parse("OpenAI"), None);
        assert_eq!(ProviderId::parse("bard"), None);
    }

    #[test]
    fn azure_shares_openai_shape() {
        assert_eq!(
            ProviderId::Azure.descriptor().shape,
            ProviderId::OpenAI.descriptor().shape
        );
    }

    #[test]
    fn default_model_is_first_fixed_model() {
        assert_eq!(
            ProviderId::OpenAI.descriptor().default_model(),
            Some("gpt-3.5-turbo")
        );
        assert_eq!(ProviderId::Vllm.descriptor().default_model(), None);
    }

    #[test]
    fn descriptor_serializes_public_fields() {
        let json = serde_json::to_value(ProviderId::Azure.descriptor()).unwrap();
        assert_eq!(json["id"], "azure");
        assert_eq!(json["displayName"], "Azure OpenAI");
        assert!(json["models"].is_null());
        assert_eq!(
            json["requiresFields"],
            serde_json::json!(["apiKey", "resourceName"])
        );
        assert_eq!(json["context"], "required");
        assert!(json.get("envKey").is_none());
    }

    #[test]
    fn every_keyed_provider_has_env_names() {
        for descriptor in descriptors() {
            if descriptor.requires(CredentialField::ApiKey) {
                assert!(descriptor.env_key.is_some(), "{}", descriptor.id);
                assert!(descriptor.platform_env_key.is_some(), "{}", descriptor.id);
            }
        }
    }
}
