//! Chat orchestration errors and their client-facing text.

use axum::http::StatusCode;
use thiserror::Error;

use crate::llm::{LLMError, ProviderId, ValidationError};

/// Message shown when an upstream failure carries nothing readable.
pub const GENERIC_UPSTREAM_MESSAGE: &str = "invalid api key or provider";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("no api key available for {provider}")]
    MissingCredential { provider: ProviderId },

    #[error("context unavailable: {0}")]
    ContextUnavailable(String),

    #[error("unsupported provider '{0}'")]
    UnsupportedProvider(String),

    #[error("upstream provider failed: {0}")]
    Upstream(#[from] LLMError),

    #[error("request timed out")]
    Timeout,
}

impl ChatError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ChatError::Timeout => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Text returned to the caller. Never includes internal error chains.
    pub fn client_message(&self) -> String {
        match self {
            ChatError::Validation(e) => e.to_string(),
            ChatError::MissingCredential { provider } => format!(
                "Missing API key for {}. Provide one in the request or configure it on the server.",
                provider.descriptor().display_name
            ),
            ChatError::ContextUnavailable(reason) => format!("Context unavailable: {reason}"),
            ChatError::UnsupportedProvider(id) => format!("Unsupported provider '{id}'"),
            ChatError::Upstream(e) => upstream_message(e),
            ChatError::Timeout => "Request timed out".to_string(),
        }
    }
}

/// Convert an upstream failure into human-readable text.
///
/// A structured error body with a message is surfaced verbatim; anything else
/// collapses to [`GENERIC_UPSTREAM_MESSAGE`].
pub fn upstream_message(error: &LLMError) -> String {
    if let LLMError::Prediction(reason) = error
        && !reason.trim().is_empty()
    {
        return reason.clone();
    }

    error
        .body()
        .and_then(extract_message)
        .unwrap_or_else(|| GENERIC_UPSTREAM_MESSAGE.to_string())
}

fn extract_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;

    let candidates = [
        value.pointer("/error/message"),
        value.get("message"),
        value.get("error"),
        value.get("detail"),
    ];

    candidates
        .into_iter()
        .flatten()
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(body: &str) -> LLMError {
        LLMError::Api {
            status: 401,
            message: body.to_string(),
        }
    }

    #[test]
    fn openai_style_error_message_is_surfaced() {
        let err = api(
            r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#,
        );
        assert_eq!(upstream_message(&err), "Incorrect API key provided");
    }

    #[test]
    fn flat_message_fields_are_surfaced() {
        assert_eq!(
            upstream_message(&api(r#"{"message":"invalid api token"}"#)),
            "invalid api token"
        );
        assert_eq!(
            upstream_message(&api(r#"{"error":"quota exceeded"}"#)),
            "quota exceeded"
        );
        assert_eq!(
            upstream_message(&api(r#"{"detail":"Authentication credentials were not provided."}"#)),
            "Authentication credentials were not provided."
        );
    }

    #[test]
    fn unreadable_bodies_fall_back_to_generic() {
        assert_eq!(upstream_message(&api("<html>502</html>")), GENERIC_UPSTREAM_MESSAGE);
        assert_eq!(upstream_message(&api(r#"{"error":{"code":7}}"#)), GENERIC_UPSTREAM_MESSAGE);
        assert_eq!(upstream_message(&api(r#"{"message":"  "}"#)), GENERIC_UPSTREAM_MESSAGE);
        assert_eq!(
            upstream_message(&LLMError::RateLimit { retry_after: None }),
            GENERIC_UPSTREAM_MESSAGE
        );
        assert_eq!(
            upstream_message(&LLMError::InvalidResponse("no choices".into())),
            GENERIC_UPSTREAM_MESSAGE
        );
    }

    #[test]
    fn stream_error_body_is_parsed() {
        let err = LLMError::Stream {
            message: r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#.into(),
        };
        assert_eq!(upstream_message(&err), "Overloaded");
    }

    #[test]
    fn failed_prediction_reason_is_surfaced() {
        let err = LLMError::Prediction("CUDA out of memory".into());
        assert_eq!(upstream_message(&err), "CUDA out of memory");
    }

    #[test]
    fn status_codes() {
        assert_eq!(ChatError::Timeout.status_code(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(
            ChatError::UnsupportedProvider("bard".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ChatError::Upstream(api("{}")).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn client_messages_do_not_leak_internals() {
        let err = ChatError::Upstream(api(r#"{"error":{"message":"bad key"}}"#));
        assert_eq!(err.client_message(), "bad key");

        let err = ChatError::MissingCredential {
            provider: ProviderId::Cohere,
        };
        assert!(err.client_message().contains("Cohere"));

        let err = ChatError::Validation(ValidationError::new("model", "is required"));
        assert_eq!(err.client_message(), "model: is required");
    }
}
