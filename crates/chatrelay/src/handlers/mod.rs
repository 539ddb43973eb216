//! HTTP request handlers.

mod chat;
mod health;
mod providers;
mod version;

pub use chat::{ChatBody, ChatResponse, ProviderBody, chat};
pub use health::{livez, readyz};
pub use providers::{keys, list_providers};
pub use version::version;
