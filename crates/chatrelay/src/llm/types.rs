//! Common types shared by every provider client.

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use super::error::LLMError;

/// A message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The role of a message sender.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Wire shape a provider expects its chat input in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputShape {
    /// `/chat/completions` style (OpenAI and Azure OpenAI).
    OpenAICompatible,
    Replicate,
    Cohere,
    Gemini,
    Mistral,
    Anthropic,
    Vllm,
}

/// Provider input accumulated before a single dispatch.
///
/// Turns are recorded in the order they are added; provider clients render
/// them into their own wire format without reordering.
#[derive(Debug, Clone)]
pub struct ProviderInput {
    pub shape: InputShape,
    pub model: String,
    pub system_prompt: String,
    pub turns: Vec<Message>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ProviderInput {
    pub fn new(
        shape: InputShape,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            shape,
            model: model.into(),
            system_prompt: system_prompt.into(),
            turns: Vec::new(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn add_user_turn(&mut self, content: impl Into<String>) {
        self.turns.push(Message::user(content));
    }

    pub fn add_assistant_turn(&mut self, content: impl Into<String>) {
        self.turns.push(Message::assistant(content));
    }

    /// Append grounding text to the system prompt.
    pub fn extend_system_prompt(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if !self.system_prompt.is_empty() {
            self.system_prompt.push_str("\n\n");
        }
        self.system_prompt.push_str(text);
    }

    /// Content of the most recent turn, if any.
    pub fn last_turn(&self) -> Option<&Message> {
        self.turns.last()
    }
}

/// Unprocessed output of a non-streaming chat call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawChatResult {
    pub candidates: Vec<String>,
    /// Source identifiers, possibly repeated.
    pub references: Option<Vec<String>>,
}

impl RawChatResult {
    pub fn single(text: impl Into<String>) -> Self {
        Self {
            candidates: vec![text.into()],
            references: None,
        }
    }
}

/// Lazy, single-pass sequence of text chunks from a streaming call.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, LLMError>> + Send>>;
