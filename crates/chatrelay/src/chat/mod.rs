//! Multi-provider chat orchestration.
//!
//! A [`ChatRequest`] flows through credential resolution, validation, input
//! building and optional context selection in the [`Dispatcher`], then leaves
//! either as an assembled [`ChatResult`] or as a chunk stream for the relay.

mod assemble;
mod context;
mod credentials;
mod dispatch;
mod error;
mod input;
mod relay;

use std::collections::HashMap;

use serde::Serialize;

use crate::llm::Message;

pub use assemble::assemble;
pub use context::{cosine_similarity, raw_window, select_context};
pub use credentials::{
    Credentials, KeyResolver, KeySource, PlatformPolicy, ResolvedKey, VLLM_BASE_URL_VAR,
};
pub use dispatch::{Dispatched, Dispatcher, should_stream};
pub use error::{ChatError, GENERIC_UPSTREAM_MESSAGE, upstream_message};
pub use input::{append_messages, build_input};
pub use relay::{Relay, RelayState, relay, stream_error_text};

/// One chat call, built per HTTP request and never stored.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub provider: String,
    pub model: String,
    pub system_prompt: String,
    pub conversation: Vec<Message>,
    /// Explicit API keys by provider id.
    pub credentials: HashMap<String, String>,
    pub settings: ProviderSettings,
    /// Earlier messages sent along with the newest one.
    pub context_window: usize,
    pub use_context: bool,
    pub stream_requested: bool,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Caller's platform token (`oneKey`).
    pub platform_key: Option<String>,
    /// Ground the answer in the caller's platform documents.
    pub platform_data: bool,
}

/// Provider settings that are not keys.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub resource_name: Option<String>,
    /// Azure deployment used for embeddings.
    pub embedding_name: Option<String>,
    pub base_url: Option<String>,
}

/// Final answer of a non-streaming call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatResult {
    pub text: String,
    pub references: Option<Vec<String>>,
}
