//! LLM error types.

use thiserror::Error;

/// Check an HTTP response for rate-limit errors, returning `RateLimit` for 429.
pub fn check_response_error(response: &reqwest::Response) -> Option<LLMError> {
    if response.status().is_success() {
        return None;
    }
    if response.status().as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        return Some(LLMError::RateLimit { retry_after });
    }
    None
}

/// Turn a non-success response into an `LLMError`, keeping the body for message extraction.
pub async fn into_api_error(response: reqwest::Response) -> LLMError {
    if let Some(err) = check_response_error(&response) {
        return err;
    }
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    LLMError::Api { status, message }
}

/// Errors that can occur when making LLM API calls.
#[derive(Debug, Error)]
pub enum LLMError {
    /// HTTP request failed
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// API returned an error response
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Rate limited (429)
    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimit { retry_after: Option<u64> },

    /// The provider reported an error in the middle of a stream
    #[error("stream error: {message}")]
    Stream { message: String },

    /// An asynchronous prediction finished in a failed state
    #[error("prediction failed: {0}")]
    Prediction(String),

    /// The response body did not have the expected shape
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The provider has no incremental output
    #[error("streaming is not supported by this provider")]
    StreamingUnsupported,
}

impl LLMError {
    /// Raw error body as returned by the provider, if there was one.
    pub fn body(&self) -> Option<&str> {
        match self {
            LLMError::Api { message, .. } | LLMError::Stream { message } => Some(message),
            _ => None,
        }
    }
}
