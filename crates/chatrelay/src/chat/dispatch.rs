//! Turns a validated chat request into one provider call.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::assemble::assemble;
use super::context::{raw_window, select_context};
use super::credentials::KeyResolver;
use super::error::ChatError;
use super::input::{append_messages, build_input};
use super::{ChatRequest, ChatResult};
use crate::llm::{
    ChunkStream, Connection, Connector, ContextPolicy, CredentialField, CredentialFields, Embedder,
    EmbeddingTarget, Message, ProviderDescriptor, ProviderId, ProviderInput, ProviderRegistry,
    ValidationError, grounding_prompt,
};

/// Outcome of a dispatch: a full answer or a live chunk stream.
pub enum Dispatched {
    Complete(ChatResult),
    Stream(ChunkStream),
}

impl std::fmt::Debug for Dispatched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatched::Complete(result) => f.debug_tuple("Complete").field(result).finish(),
            Dispatched::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Streaming is used only when the provider, the caller and the transport all agree.
pub fn should_stream(descriptor: &ProviderDescriptor, requested: bool, accepts: bool) -> bool {
    descriptor.supports_streaming && requested && accepts
}

pub struct Dispatcher {
    registry: ProviderRegistry,
    keys: KeyResolver,
    connector: Arc<dyn Connector>,
    search_k: usize,
}

impl Dispatcher {
    pub fn new(keys: KeyResolver, connector: Arc<dyn Connector>, search_k: usize) -> Self {
        Self {
            registry: ProviderRegistry::new(),
            keys,
            connector,
            search_k,
        }
    }

    pub fn keys(&self) -> &KeyResolver {
        &self.keys
    }

    /// Run one chat request. No retries.
    pub async fn dispatch(
        &self,
        request: ChatRequest,
        accepts_stream: bool,
    ) -> Result<Dispatched, ChatError> {
        let descriptor = self
            .registry
            .describe(&request.provider)
            .ok_or_else(|| ChatError::UnsupportedProvider(request.provider.clone()))?;
        let provider = descriptor.id;

        if request.conversation.is_empty() {
            return Err(ValidationError::new("messages", "must not be empty").into());
        }

        let api_key = self.resolve_api_key(descriptor, &request)?;
        let base_url = non_blank(request.settings.base_url.as_deref())
            .or_else(|| match provider {
                ProviderId::Vllm => self.keys.credentials().vllm_base_url(),
                _ => None,
            })
            .map(str::to_string);
        let resource_name =
            non_blank(request.settings.resource_name.as_deref()).map(str::to_string);

        let fields = CredentialFields {
            api_key: api_key.clone(),
            resource_name: resource_name.clone(),
            base_url: base_url.clone(),
        };
        self.registry
            .validate(provider.as_str(), &request.model, &fields)?;

        let mut input = build_input(provider.as_str(), &request.model, &request.system_prompt)?;
        let messages = self
            .select_messages(descriptor, &request, api_key.as_deref())
            .await?;
        append_messages(&mut input, &messages);
        input.temperature = request.temperature;
        input.max_tokens = request.max_tokens;

        let references = if request.platform_data {
            self.ground(&mut input, request.platform_key.as_deref())
                .await?
        } else {
            None
        };

        let streaming = should_stream(descriptor, request.stream_requested, accepts_stream);
        info!(
            provider = %provider,
            model = %request.model,
            turns = input.turns.len(),
            streaming,
            "dispatching chat request"
        );

        let client = self.connector.chat_provider(&Connection {
            provider,
            api_key,
            resource_name,
            base_url,
        });

        if streaming {
            let stream = client.chat_stream(&input).await?;
            return Ok(Dispatched::Stream(stream));
        }

        let mut raw = client.chat(&input).await?;
        if references.is_some() {
            raw.references = references;
        }
        Ok(Dispatched::Complete(assemble(raw)))
    }

    fn resolve_api_key(
        &self,
        descriptor: &ProviderDescriptor,
        request: &ChatRequest,
    ) -> Result<Option<String>, ChatError> {
        let explicit = request
            .credentials
            .get(descriptor.id.as_str())
            .map(String::as_str);

        if !descriptor.requires(CredentialField::ApiKey) {
            return Ok(non_blank(explicit).map(str::to_string));
        }

        let resolved = self
            .keys
            .resolve(descriptor.id, explicit, request.platform_key.as_deref())?;
        debug!(provider = %descriptor.id, source = ?resolved.source, "resolved api key");
        Ok(Some(resolved.value))
    }

    /// Context-selected messages when asked for and possible, else the raw window.
    async fn select_messages(
        &self,
        descriptor: &ProviderDescriptor,
        request: &ChatRequest,
        api_key: Option<&str>,
    ) -> Result<Vec<Message>, ChatError> {
        let conversation = &request.conversation;
        let window = request.context_window;

        if !request.use_context || !descriptor.supports_context() {
            return Ok(raw_window(conversation, window));
        }

        let selected = match self.embedder_for(descriptor, request, api_key) {
            Some(embedder) => select_context(conversation, window, Some(embedder.as_ref())).await,
            None => Err(ChatError::ContextUnavailable(format!(
                "no embedding credentials for {}",
                descriptor.display_name
            ))),
        };

        match selected {
            Ok(messages) => Ok(messages),
            Err(ChatError::ContextUnavailable(reason))
                if descriptor.context == ContextPolicy::Optional =>
            {
                warn!(
                    provider = %descriptor.id,
                    %reason,
                    "context unavailable, using recent messages"
                );
                Ok(raw_window(conversation, window))
            }
            Err(e) => Err(e),
        }
    }

    /// Azure embeds through its own deployment; everyone else uses an OpenAI key.
    fn embedder_for(
        &self,
        descriptor: &ProviderDescriptor,
        request: &ChatRequest,
        api_key: Option<&str>,
    ) -> Option<Arc<dyn Embedder>> {
        let target = match descriptor.id {
            ProviderId::Azure => EmbeddingTarget::Azure {
                api_key: api_key?.to_string(),
                resource_name: non_blank(request.settings.resource_name.as_deref())?.to_string(),
                deployment: non_blank(request.settings.embedding_name.as_deref())?.to_string(),
            },
            ProviderId::OpenAI => EmbeddingTarget::OpenAI {
                api_key: api_key?.to_string(),
            },
            _ => {
                let explicit = request
                    .credentials
                    .get(ProviderId::OpenAI.as_str())
                    .map(String::as_str);
                let key = self
                    .keys
                    .resolve(ProviderId::OpenAI, explicit, request.platform_key.as_deref())
                    .ok()?;
                EmbeddingTarget::OpenAI { api_key: key.value }
            }
        };
        Some(self.connector.embedder(&target))
    }

    /// Extend the system prompt with the caller's documents. Returns their names.
    async fn ground(
        &self,
        input: &mut ProviderInput,
        platform_key: Option<&str>,
    ) -> Result<Option<Vec<String>>, ChatError> {
        let Some(token) = platform_key.filter(|t| self.keys.platform().recognizes(Some(t))) else {
            warn!("platform data requested without a recognized platform key");
            return Ok(None);
        };
        let query = input
            .last_turn()
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let passages = self
            .connector
            .document_search()
            .search(token, &query, self.search_k)
            .await?;
        debug!(passages = passages.len(), "platform search finished");
        if passages.is_empty() {
            return Ok(None);
        }

        input.extend_system_prompt(&grounding_prompt(&passages));
        Ok(Some(passages.into_iter().map(|p| p.document).collect()))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
