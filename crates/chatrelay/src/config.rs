use std::io::ErrorKind;
use std::path::Path;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Ok(serde_saphyr::from_str(&contents)?)
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Wall-clock ceiling for one chat request, streaming included.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Longest gap between two streamed chunks.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    300
}

fn default_idle_timeout() -> u64 {
    60
}

// ============================================================================
// ChatConfig
// ============================================================================

/// Defaults applied to chat requests that leave fields out.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_provider")]
    pub default_provider: String,
    #[serde(default = "default_system_message")]
    pub default_system_message: String,
    /// Number of earlier messages sent along with the newest one.
    #[serde(default = "default_context_window")]
    pub default_context_window: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            default_system_message: default_system_message(),
            default_context_window: default_context_window(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_system_message() -> String {
    "You are a helpful assistant. Format response in Markdown where needed.".to_string()
}

fn default_context_window() -> usize {
    2
}

// ============================================================================
// PlatformConfig
// ============================================================================

/// Platform shared key and document search.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    /// Shared keys are only honoured when this is on.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_platform_base_url")]
    pub base_url: String,
    /// Passages requested per document search.
    #[serde(default = "default_search_k")]
    pub search_k: usize,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            key_prefix: default_key_prefix(),
            base_url: default_platform_base_url(),
            search_k: default_search_k(),
        }
    }
}

fn default_key_prefix() -> String {
    "in".to_string()
}

fn default_platform_base_url() -> String {
    "https://api.intellinode.ai".to_string()
}

fn default_search_k() -> usize {
    3
}

// ============================================================================
// EndpointsConfig
// ============================================================================

/// Provider base URLs. Overridable for proxies and tests.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_openai_url")]
    pub openai: String,
    #[serde(default = "default_azure_api_version")]
    pub azure_api_version: String,
    #[serde(default = "default_replicate_url")]
    pub replicate: String,
    #[serde(default = "default_cohere_url")]
    pub cohere: String,
    #[serde(default = "default_gemini_url")]
    pub gemini: String,
    #[serde(default = "default_mistral_url")]
    pub mistral: String,
    #[serde(default = "default_anthropic_url")]
    pub anthropic: String,
    /// Default vLLM server when requests carry no `baseUrl`.
    #[serde(default)]
    pub vllm: Option<String>,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            openai: default_openai_url(),
            azure_api_version: default_azure_api_version(),
            replicate: default_replicate_url(),
            cohere: default_cohere_url(),
            gemini: default_gemini_url(),
            mistral: default_mistral_url(),
            anthropic: default_anthropic_url(),
            vllm: None,
        }
    }
}

fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_azure_api_version() -> String {
    "2023-05-15".to_string()
}

fn default_replicate_url() -> String {
    "https://api.replicate.com/v1".to_string()
}

fn default_cohere_url() -> String {
    "https://api.cohere.ai/v1".to_string()
}

fn default_gemini_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_mistral_url() -> String {
    "https://api.mistral.ai/v1".to_string()
}

fn default_anthropic_url() -> String {
    "https://api.anthropic.com".to_string()
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.request_timeout_seconds, 300);
        assert_eq!(config.server.idle_timeout_seconds, 60);
        assert_eq!(config.chat.default_provider, "openai");
        assert_eq!(config.chat.default_context_window, 2);
        assert!(!config.platform.enabled);
        assert_eq!(config.platform.key_prefix, "in");
        assert_eq!(config.endpoints.openai, "https://api.openai.com/v1");
        assert!(config.endpoints.vllm.is_none());
    }

    #[tokio::test]
    async fn test_load_missing_file_returns_defaults() {
        let tmp_dir = TempDir::new().unwrap();
        let missing_path = tmp_dir.path().join("missing-config.yaml");
        let config = Config::load(&missing_path).await.unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
    }

    #[tokio::test]
    async fn test_load_valid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server:
  host: "127.0.0.1"
  port: 3000
  request_timeout_seconds: 60
  idle_timeout_seconds: 20
chat:
  default_provider: cohere
  default_context_window: 4
platform:
  enabled: true
  key_prefix: "pk_"
endpoints:
  openai: "http://localhost:9999/v1"
  vllm: "http://gpu-box:8000"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.request_timeout_seconds, 60);
        assert_eq!(config.server.idle_timeout_seconds, 20);
        assert_eq!(config.chat.default_provider, "cohere");
        assert_eq!(config.chat.default_context_window, 4);
        assert!(config.platform.enabled);
        assert_eq!(config.platform.key_prefix, "pk_");
        assert_eq!(config.endpoints.openai, "http://localhost:9999/v1");
        assert_eq!(config.endpoints.vllm.as_deref(), Some("http://gpu-box:8000"));
    }

    #[tokio::test]
    async fn test_load_partial_yaml_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server:
  port: 9000
"#
        )
        .unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert_eq!(config.server.host, "0.0.0.0"); // default
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.request_timeout_seconds, 300); // default
        assert_eq!(
            config.chat.default_system_message,
            "You are a helpful assistant. Format response in Markdown where needed."
        );
        assert_eq!(config.endpoints.anthropic, "https://api.anthropic.com"); // default
    }

    #[tokio::test]
    async fn test_load_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load(file.path()).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_config_error_display() {
        let io_error = ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "test",
        ));
        assert!(io_error.to_string().contains("failed to read config file"));
    }
}
