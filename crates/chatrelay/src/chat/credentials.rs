//! Credential resolution: explicit key, then environment key, then platform key.

use std::collections::HashMap;

use tracing::{info, warn};

use super::error::ChatError;
use crate::llm::{ProviderId, descriptors};

/// Environment variable naming the default vLLM server.
pub const VLLM_BASE_URL_VAR: &str = "VLLM_BASE_URL";

/// Operator keys captured once at startup. Read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    vars: HashMap<String, String>,
}

impl Credentials {
    /// Capture every provider and platform key present in the environment.
    pub fn from_env() -> Self {
        let mut names: Vec<&str> = descriptors()
            .iter()
            .flat_map(|d| [d.env_key, d.platform_env_key])
            .flatten()
            .collect();
        names.push(VLLM_BASE_URL_VAR);

        let credentials = Self::from_parts(
            names
                .into_iter()
                .filter_map(|name| std::env::var(name).ok().map(|value| (name, value))),
        );

        let configured: Vec<&str> = credentials
            .configured()
            .into_iter()
            .filter(|(_, present)| *present)
            .map(|(id, _)| id.as_str())
            .collect();
        if configured.is_empty() {
            warn!("No provider keys configured; requests must carry their own apiKey");
        } else {
            info!(providers = ?configured, "Loaded provider keys from environment");
        }

        credentials
    }

    /// Build from `(variable, value)` pairs. Blank values are ignored.
    pub fn from_parts<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();
        Self { vars }
    }

    fn var(&self, name: Option<&str>) -> Option<&str> {
        name.and_then(|n| self.vars.get(n)).map(String::as_str)
    }

    pub fn env_key(&self, provider: ProviderId) -> Option<&str> {
        self.var(provider.descriptor().env_key)
    }

    pub fn platform_key(&self, provider: ProviderId) -> Option<&str> {
        self.var(provider.descriptor().platform_env_key)
    }

    pub fn vllm_base_url(&self) -> Option<&str> {
        self.var(Some(VLLM_BASE_URL_VAR))
    }

    /// Whether the operator configured each provider, in table order.
    pub fn configured(&self) -> Vec<(ProviderId, bool)> {
        ProviderId::ALL
            .into_iter()
            .map(|id| {
                let present = match id {
                    ProviderId::Vllm => self.vllm_base_url().is_some(),
                    _ => self.env_key(id).is_some(),
                };
                (id, present)
            })
            .collect()
    }
}

/// When the platform shared key may stand in for a provider key.
#[derive(Debug, Clone)]
pub struct PlatformPolicy {
    pub enabled: bool,
    pub key_prefix: String,
}

impl PlatformPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            key_prefix: String::new(),
        }
    }

    /// True when the platform is on and `token` carries the recognized prefix.
    pub fn recognizes(&self, token: Option<&str>) -> bool {
        self.enabled
            && token.is_some_and(|t| !self.key_prefix.is_empty() && t.starts_with(&self.key_prefix))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Explicit,
    Environment,
    Platform,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKey {
    pub value: String,
    pub source: KeySource,
}

/// Applies the resolution order to one request.
#[derive(Debug, Clone)]
pub struct KeyResolver {
    credentials: Credentials,
    platform: PlatformPolicy,
}

impl KeyResolver {
    pub fn new(credentials: Credentials, platform: PlatformPolicy) -> Self {
        Self {
            credentials,
            platform,
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn platform(&self) -> &PlatformPolicy {
        &self.platform
    }

    /// First non-empty key wins; none at all is a missing credential.
    pub fn resolve(
        &self,
        provider: ProviderId,
        explicit: Option<&str>,
        platform_token: Option<&str>,
    ) -> Result<ResolvedKey, ChatError> {
        if let Some(key) = explicit.map(str::trim).filter(|k| !k.is_empty()) {
            return Ok(ResolvedKey {
                value: key.to_string(),
                source: KeySource::Explicit,
            });
        }

        if let Some(key) = self.credentials.env_key(provider) {
            return Ok(ResolvedKey {
                value: key.to_string(),
                source: KeySource::Environment,
            });
        }

        if self.platform.recognizes(platform_token)
            && let Some(key) = self.credentials.platform_key(provider)
        {
            return Ok(ResolvedKey {
                value: key.to_string(),
                source: KeySource::Platform,
            });
        }

        Err(ChatError::MissingCredential { provider })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform_on() -> PlatformPolicy {
        PlatformPolicy {
            enabled: true,
            key_prefix: "in".to_string(),
        }
    }

    fn resolver(vars: &[(&str, &str)], platform: PlatformPolicy) -> KeyResolver {
        KeyResolver::new(Credentials::from_parts(vars.iter().copied()), platform)
    }

    #[test]
    fn env_key_used_when_no_explicit_key() {
        let r = resolver(&[("OPENAI_API_KEY", "sk-env")], PlatformPolicy::disabled());
        let key = r.resolve(ProviderId::OpenAI, None, None).unwrap();
        assert_eq!(key.value, "sk-env");
        assert_eq!(key.source, KeySource::Environment);
    }

    #[test]
    fn explicit_key_beats_env_key() {
        let r = resolver(&[("OPENAI_API_KEY", "sk-env")], PlatformPolicy::disabled());
        let key = r.resolve(ProviderId::OpenAI, Some("sk-mine"), None).unwrap();
        assert_eq!(key.value, "sk-mine");
        assert_eq!(key.source, KeySource::Explicit);
    }

    #[test]
    fn nothing_configured_is_missing_credential() {
        let r = resolver(&[], PlatformPolicy::disabled());
        let err = r.resolve(ProviderId::OpenAI, None, None).unwrap_err();
        assert!(matches!(
            err,
            ChatError::MissingCredential {
                provider: ProviderId::OpenAI
            }
        ));
    }

    #[test]
    fn blank_explicit_key_counts_as_absent() {
        let r = resolver(&[("COHERE_API_KEY", "co-env")], PlatformPolicy::disabled());
        let key = r.resolve(ProviderId::Cohere, Some("   "), None).unwrap();
        assert_eq!(key.source, KeySource::Environment);

        let r = Credentials::from_parts([("COHERE_API_KEY", "")]);
        assert!(r.env_key(ProviderId::Cohere).is_none());
    }

    #[test]
    fn platform_key_needs_enabled_platform_and_prefixed_token() {
        let vars = [("INTELLI_MISTRAL_API_KEY", "shared")];

        let key = resolver(&vars, platform_on())
            .resolve(ProviderId::Mistral, None, Some("in_abc"))
            .unwrap();
        assert_eq!(key.value, "shared");
        assert_eq!(key.source, KeySource::Platform);

        // wrong prefix
        assert!(
            resolver(&vars, platform_on())
                .resolve(ProviderId::Mistral, None, Some("xx_abc"))
                .is_err()
        );
        // no token
        assert!(
            resolver(&vars, platform_on())
                .resolve(ProviderId::Mistral, None, None)
                .is_err()
        );
        // platform disabled
        let disabled = PlatformPolicy {
            enabled: false,
            key_prefix: "in".to_string(),
        };
        assert!(
            resolver(&vars, disabled)
                .resolve(ProviderId::Mistral, None, Some("in_abc"))
                .is_err()
        );
    }

    #[test]
    fn env_key_beats_platform_key() {
        let r = resolver(
            &[
                ("ANTHROPIC_API_KEY", "env"),
                ("INTELLI_ANTHROPIC_API_KEY", "shared"),
            ],
            platform_on(),
        );
        let key = r.resolve(ProviderId::Anthropic, None, Some("in_tok")).unwrap();
        assert_eq!(key.source, KeySource::Environment);
    }

    #[test]
    fn configured_reports_each_provider() {
        let creds = Credentials::from_parts([
            ("GOOGLE_API_KEY", "g"),
            ("VLLM_BASE_URL", "http://localhost:8000"),
        ]);
        let configured = creds.configured();
        assert_eq!(configured.len(), ProviderId::ALL.len());
        assert!(configured.contains(&(ProviderId::Google, true)));
        assert!(configured.contains(&(ProviderId::Vllm, true)));
        assert!(configured.contains(&(ProviderId::OpenAI, false)));
    }
}
