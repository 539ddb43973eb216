//! LLM provider clients for chat completions, embeddings and document search.

mod anthropic;
mod cohere;
mod embedding;
mod error;
mod gemini;
mod openai;
mod platform;
mod provider;
mod registry;
mod replicate;
mod types;

pub use anthropic::AnthropicProvider;
pub use cohere::CohereProvider;
pub use embedding::{DEFAULT_EMBEDDING_MODEL, Embedder, EmbeddingTarget, OpenAIEmbedder};
pub use error::LLMError;
pub use gemini::GeminiProvider;
pub use openai::OpenAICompatibleProvider;
pub use platform::{DocumentSearch, Passage, PlatformSearch, grounding_prompt};
pub use provider::{
    ContextPolicy, CredentialField, LLMProvider, ModelCatalog, ProviderDescriptor, ProviderId,
    descriptors,
};
pub use registry::{
    Connection, Connector, CredentialFields, HttpConnector, ProviderRegistry, ValidationError,
};
pub use replicate::{ReplicateProvider, model_path};
pub use types::{ChunkStream, InputShape, Message, ProviderInput, RawChatResult, Role};
