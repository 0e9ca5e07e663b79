/// LLM provider trait and supporting types
///
/// Every configured provider speaks the OpenAI-compatible chat completions API;
/// gemini, openai and ollama differ only in base URL, model and API key.
/// `ProviderRegistry` owns the configured providers and resolves them by name.

pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::LlmConfig;
use crate::retry::{retry_with_backoff, RetryPolicy};

/// Names of the provider presets this service knows how to build.
pub const KNOWN_PROVIDERS: [&str; 3] = ["gemini", "openai", "ollama"];

/// Errors that can occur while talking to an LLM.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Transport failure or unusable response body
    #[error("Generation error: {0}")]
    Generation(String),

    /// API provider returned an HTTP error
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Provider not configured (e.g., missing API key)
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// Requested provider name is not registered
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    /// Model output could not be parsed as the expected JSON
    #[error("Invalid model response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Transport errors, rate limits and server errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Generation(_) | LlmError::InvalidResponse(_) => true,
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            LlmError::NotConfigured(_) | LlmError::ProviderNotFound(_) => false,
        }
    }
}

/// A single system + user exchange sent to the model.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub user_message: String,
    /// Ask the provider for a JSON object reply
    pub json_mode: bool,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    pub fn json(system_prompt: impl Into<String>, user_message: impl Into<String>) -> Self {
        LlmRequest {
            system_prompt: system_prompt.into(),
            user_message: user_message.into(),
            json_mode: true,
            temperature: 0.3,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Raw model reply.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
}

/// Core trait for chat-style text generation.
///
/// Implementations must be Send + Sync to support use in async contexts
/// and across thread boundaries (e.g., Arc<dyn LlmProvider>).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Registry name, e.g. "gemini".
    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Cheap reachability probe. Ok means the provider accepted our credentials.
    async fn health_check(&self) -> Result<(), LlmError>;
}

/// Parse model output as JSON, tolerating a surrounding markdown code fence.
pub fn parse_json_content(content: &str) -> Result<serde_json::Value, LlmError> {
    let mut text = content.trim();
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        text = rest.find("```").map(|end| &rest[..end]).unwrap_or(rest).trim();
    } else if let Some(start) = text.find("```") {
        let rest = &text[start + 3..];
        text = rest.find("```").map(|end| &rest[..end]).unwrap_or(rest).trim();
    }

    serde_json::from_str(text).map_err(|e| {
        let preview: String = text.chars().take(200).collect();
        LlmError::InvalidResponse(format!("{} (content: {})", e, preview))
    })
}

/// Call `provider.generate` and `parse` the reply, retrying retryable failures
/// with exponential backoff.
///
/// A reply that `parse` rejects with `InvalidResponse` counts as retryable.
pub async fn generate_with_retry<T, F>(
    provider: &dyn LlmProvider,
    request: &LlmRequest,
    policy: RetryPolicy,
    parse: F,
) -> Result<(T, LlmResponse), LlmError>
where
    F: Fn(&LlmResponse) -> Result<T, LlmError>,
{
    let parse = &parse;
    retry_with_backoff(policy, provider.provider_name(), LlmError::is_retryable, |_| async move {
        let response = provider.generate(request).await?;
        let parsed = parse(&response)?;
        Ok((parsed, response))
    })
    .await
}

/// Health summary for one registered provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub model: String,
    pub available: bool,
    pub is_default: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Configured LLM providers keyed by preset name.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn LlmProvider>>,
    default_provider: String,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>, default_provider: impl Into<String>) -> Self {
        ProviderRegistry {
            providers,
            default_provider: default_provider.into(),
        }
    }

    /// Build every preset whose credentials are present.
    ///
    /// Presets that cannot be built are logged and skipped; the default provider
    /// must be among the built ones.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let mut providers: Vec<Arc<dyn LlmProvider>> = Vec::new();

        for name in KNOWN_PROVIDERS {
            match openai::ChatCompletionsProvider::from_preset(name, config, timeout) {
                Ok(p) => providers.push(Arc::new(p)),
                Err(e) => {
                    tracing::debug!(provider = name, error = %e, "LLM provider not available");
                }
            }
        }

        let default_provider = config.provider.to_lowercase();
        if !providers.iter().any(|p| p.provider_name() == default_provider) {
            return Err(if KNOWN_PROVIDERS.contains(&default_provider.as_str()) {
                LlmError::NotConfigured(format!(
                    "Default LLM provider '{}' is missing its API key. \
                     Set HALA_LLM__{}_API_KEY or llm.{}_api_key in hala.toml",
                    default_provider,
                    default_provider.to_uppercase(),
                    default_provider
                ))
            } else {
                LlmError::ProviderNotFound(default_provider)
            });
        }

        Ok(ProviderRegistry::new(providers, default_provider))
    }

    pub fn default_name(&self) -> &str {
        &self.default_provider
    }

    /// Names of configured providers, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|p| p.provider_name().to_string())
            .collect()
    }

    /// Resolve a provider by name; `None` means the default.
    pub fn get(&self, name: Option<&str>) -> Result<Arc<dyn LlmProvider>, LlmError> {
        let wanted = name
            .map(|n| n.to_lowercase())
            .unwrap_or_else(|| self.default_provider.clone());
        self.providers
            .iter()
            .find(|p| p.provider_name() == wanted)
            .cloned()
            .ok_or(LlmError::ProviderNotFound(wanted))
    }

    /// Probe every provider and report which ones respond.
    pub async fn statuses(&self) -> Vec<ProviderStatus> {
        let mut out = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            let result = provider.health_check().await;
            out.push(ProviderStatus {
                name: provider.provider_name().to_string(),
                model: provider.model_name().to_string(),
                available: result.is_ok(),
                is_default: provider.provider_name() == self.default_provider,
                error: result.err().map(|e| e.to_string()),
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticProvider {
        name: &'static str,
        healthy: bool,
    }

    #[async_trait]
    impl LlmProvider for StaticProvider {
        fn provider_name(&self) -> &str {
            self.name
        }

        fn model_name(&self) -> &str {
            "static-model"
        }

        async fn generate(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            Ok(LlmResponse {
                content: "{}".to_string(),
                model: "static-model".to_string(),
                usage: None,
                finish_reason: None,
            })
        }

        async fn health_check(&self) -> Result<(), LlmError> {
            if self.healthy {
                Ok(())
            } else {
                Err(LlmError::Api { status: 401, message: "bad key".to_string() })
            }
        }
    }

    #[test]
    fn test_parse_plain_json() {
        let v = parse_json_content(r#"{"goal": "pray"}"#).unwrap();
        assert_eq!(v["goal"], "pray");
    }

    #[test]
    fn test_parse_fenced_json() {
        let v = parse_json_content("Here you go:\n```json\n{\"total_days\": 7}\n```\nEnjoy").unwrap();
        assert_eq!(v["total_days"], 7);
        let v = parse_json_content("```\n[1, 2]\n```").unwrap();
        assert_eq!(v[1], 2);
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(matches!(
            parse_json_content("not json at all"),
            Err(LlmError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(LlmError::Api { status: 503, message: String::new() }.is_retryable());
        assert!(LlmError::Api { status: 429, message: String::new() }.is_retryable());
        assert!(!LlmError::Api { status: 400, message: String::new() }.is_retryable());
        assert!(!LlmError::NotConfigured("x".to_string()).is_retryable());
    }

    #[test]
    fn test_registry_from_config_requires_default_key() {
        let config = LlmConfig::default();
        assert!(matches!(
            ProviderRegistry::from_config(&config),
            Err(LlmError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_registry_from_config_ollama_needs_no_key() {
        let config = LlmConfig {
            provider: "ollama".to_string(),
            ..LlmConfig::default()
        };
        let registry = ProviderRegistry::from_config(&config).unwrap();
        assert_eq!(registry.names(), vec!["ollama".to_string()]);
        assert_eq!(registry.default_name(), "ollama");
    }

    #[test]
    fn test_registry_unknown_default() {
        let config = LlmConfig {
            provider: "claude".to_string(),
            ..LlmConfig::default()
        };
        assert!(matches!(
            ProviderRegistry::from_config(&config),
            Err(LlmError::ProviderNotFound(_))
        ));
    }

    #[test]
    fn test_registry_get_by_name() {
        let registry = ProviderRegistry::new(
            vec![
                Arc::new(StaticProvider { name: "gemini", healthy: true }),
                Arc::new(StaticProvider { name: "ollama", healthy: false }),
            ],
            "gemini",
        );
        assert_eq!(registry.get(None).unwrap().provider_name(), "gemini");
        assert_eq!(registry.get(Some("OLLAMA")).unwrap().provider_name(), "ollama");
        assert!(matches!(
            registry.get(Some("openai")),
            Err(LlmError::ProviderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_registry_statuses() {
        let registry = ProviderRegistry::new(
            vec![
                Arc::new(StaticProvider { name: "gemini", healthy: true }),
                Arc::new(StaticProvider { name: "ollama", healthy: false }),
            ],
            "gemini",
        );
        let statuses = registry.statuses().await;
        assert_eq!(statuses.len(), 2);
        assert!(statuses[0].available && statuses[0].is_default);
        assert!(!statuses[1].available);
        assert!(statuses[1].error.as_deref().unwrap_or("").contains("401"));
    }

    /// Fails with the given status until `failures` calls have been made.
    struct FlakyProvider {
        failures: u32,
        status: u16,
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        fn provider_name(&self) -> &str {
            "openai"
        }

        fn model_name(&self) -> &str {
            "flaky"
        }

        async fn generate(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call < self.failures {
                return Err(LlmError::Api { status: self.status, message: "busy".to_string() });
            }
            Ok(LlmResponse {
                content: "{}".to_string(),
                model: "flaky".to_string(),
                usage: None,
                finish_reason: None,
            })
        }

        async fn health_check(&self) -> Result<(), LlmError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_generate_with_retry_recovers() {
        let provider = FlakyProvider { failures: 2, status: 503, calls: Default::default() };
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let (_, response) = generate_with_retry(&provider, &LlmRequest::json("sys", "user"), policy, |_| Ok(()))
            .await
            .unwrap();
        assert_eq!(response.model, "flaky");
        assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_generate_with_retry_retries_unparseable_reply() {
        let provider = FlakyProvider { failures: 0, status: 503, calls: Default::default() };
        let rejected = std::sync::atomic::AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let (value, _) = generate_with_retry(&provider, &LlmRequest::json("sys", "user"), policy, |r| {
            if rejected.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                Err(LlmError::InvalidResponse("truncated".to_string()))
            } else {
                parse_json_content(&r.content)
            }
        })
        .await
        .unwrap();
        assert!(value.is_object());
        assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_generate_with_retry_stops_on_client_error() {
        let provider = FlakyProvider { failures: 5, status: 400, calls: Default::default() };
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result = generate_with_retry(&provider, &LlmRequest::json("sys", "user"), policy, |_| Ok(())).await;
        assert!(matches!(result, Err(LlmError::Api { status: 400, .. })));
        assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
