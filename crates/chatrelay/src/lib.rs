//! Chatrelay - one HTTP endpoint in front of many LLM chat providers.

pub mod chat;
pub mod config;
pub mod handlers;
pub mod llm;
pub mod response;
pub mod server;
pub mod sse_parser;
