/// OpenAI-compatible chat completions provider
///
/// POSTs to `{base_url}/chat/completions` with `response_format: json_object` in JSON mode.
/// Gemini is reached through its OpenAI-compatible endpoint, Ollama through `/v1`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{LlmError, LlmProvider, LlmRequest, LlmResponse, TokenUsage};
use crate::config::LlmConfig;

/// Request body for the Chat Completions API
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<FormatSpec>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct FormatSpec {
    #[serde(rename = "type")]
    format_type: &'static str,
}

/// Response from the Chat Completions API
#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

/// Chat completions client bound to one preset.
pub struct ChatCompletionsProvider {
    client: reqwest::Client,
    name: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl ChatCompletionsProvider {
    /// Create a provider.
    ///
    /// # Errors
    /// Returns `LlmError::NotConfigured` if the HTTP client cannot be built.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::NotConfigured(format!("Failed to build HTTP client: {}", e)))?;

        Ok(ChatCompletionsProvider {
            client,
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.into(),
        })
    }

    /// Build one of the gemini/openai/ollama presets from config.
    ///
    /// # Errors
    /// `NotConfigured` when the preset needs an API key that is missing,
    /// `ProviderNotFound` for an unknown preset name.
    pub fn from_preset(name: &str, config: &LlmConfig, timeout: Duration) -> Result<Self, LlmError> {
        let (base_url, api_key, model, key_required) = match name {
            "gemini" => (&config.gemini_base_url, &config.gemini_api_key, &config.gemini_model, true),
            "openai" => (&config.openai_base_url, &config.openai_api_key, &config.openai_model, true),
            "ollama" => (&config.ollama_base_url, &None, &config.ollama_model, false),
            other => return Err(LlmError::ProviderNotFound(other.to_string())),
        };

        let has_key = api_key.as_deref().map(|k| !k.trim().is_empty()).unwrap_or(false);
        if key_required && !has_key {
            return Err(LlmError::NotConfigured(format!(
                "{} API key is not set (HALA_LLM__{}_API_KEY)",
                name,
                name.to_uppercase()
            )));
        }

        Self::new(name, base_url.clone(), api_key.clone(), model.clone(), timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }
}

#[async_trait]
impl LlmProvider for ChatCompletionsProvider {
    fn provider_name(&self) -> &str {
        &self.name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: &request.system_prompt },
                ChatMessage { role: "user", content: &request.user_message },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request
                .json_mode
                .then_some(FormatSpec { format_type: "json_object" }),
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .authorize(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Generation(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(LlmError::Api { status, message: body });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Generation(format!("Failed to parse {} response: {}", self.name, e)))?;

        let usage = chat_response.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });
        let model = chat_response.model.unwrap_or_else(|| self.model.clone());

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Generation(format!("{} returned empty choices list", self.name)))?;

        let content = choice
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| LlmError::InvalidResponse(format!("{} returned empty content", self.name)))?;

        tracing::debug!(
            provider = %self.name,
            model = %model,
            finish_reason = ?choice.finish_reason,
            total_tokens = usage.as_ref().map(|u| u.total_tokens),
            "LLM generation complete"
        );

        Ok(LlmResponse {
            content,
            model,
            usage,
            finish_reason: choice.finish_reason,
        })
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| LlmError::Generation(format!("HTTP request failed: {}", e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            Err(LlmError::Api { status, message: body })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_requires_key() {
        let config = LlmConfig::default();
        let err = ChatCompletionsProvider::from_preset("gemini", &config, Duration::from_secs(5));
        assert!(matches!(err, Err(LlmError::NotConfigured(_))));
    }

    #[test]
    fn test_preset_uses_configured_values() {
        let config = LlmConfig {
            openai_api_key: Some("sk-test".to_string()),
            openai_base_url: "https://proxy.local/v1/".to_string(),
            ..LlmConfig::default()
        };
        let p = ChatCompletionsProvider::from_preset("openai", &config, Duration::from_secs(5)).unwrap();
        assert_eq!(p.provider_name(), "openai");
        assert_eq!(p.model_name(), "gpt-4o-mini");
        assert_eq!(p.base_url(), "https://proxy.local/v1");
    }

    #[test]
    fn test_unknown_preset() {
        let config = LlmConfig::default();
        let err = ChatCompletionsProvider::from_preset("anthropic", &config, Duration::from_secs(5));
        assert!(matches!(err, Err(LlmError::ProviderNotFound(_))));
    }

    #[test]
    fn test_json_request_serialization() {
        let body = ChatRequest {
            model: "m",
            messages: vec![ChatMessage { role: "user", content: "hi" }],
            temperature: 0.3,
            max_tokens: None,
            response_format: Some(FormatSpec { format_type: "json_object" }),
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["response_format"]["type"], "json_object");
        assert!(v.get("max_tokens").is_none());
    }
}
