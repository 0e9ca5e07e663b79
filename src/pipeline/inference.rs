/// Layer 5: prompt enrichment and LLM inference.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::journey::Journey;
use super::prompt::{build_user_prompt, format_references, JOURNEY_PLANNER_SYSTEM_PROMPT};
use super::{LayerOutcome, PipelineContext, PipelineLayer};
use crate::config::{LlmConfig, PipelineConfig};
use crate::errors::{ErrorCode, Rejection};
use crate::llm::{generate_with_retry, parse_json_content, LlmError, LlmRequest, ProviderRegistry, KNOWN_PROVIDERS};
use crate::retry::RetryPolicy;

/// Rejection for a provider name the registry does not hold.
pub fn provider_not_found(name: &str) -> Rejection {
    Rejection::new(
        ErrorCode::ProviderNotFound,
        format!("Penyedia LLM '{}' tidak tersedia.", name),
        format!("LLM provider '{}' is not available.", name),
        format!("Use one of: {}", KNOWN_PROVIDERS.join(", ")),
    )
}

pub struct InferenceLayer {
    registry: Arc<ProviderRegistry>,
    temperature: f32,
    max_tokens: u32,
    retry: RetryPolicy,
    knowledge_max_distance: f64,
}

impl InferenceLayer {
    pub fn new(registry: Arc<ProviderRegistry>, llm: &LlmConfig, pipeline: &PipelineConfig) -> Self {
        InferenceLayer {
            registry,
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
            retry: RetryPolicy::new(llm.max_retries, Duration::from_millis(llm.retry_base_delay_ms)),
            knowledge_max_distance: pipeline.knowledge_max_distance,
        }
    }

    /// Prompt pair for the current context.
    pub fn build_request(&self, ctx: &PipelineContext) -> LlmRequest {
        let retrieved = ctx.retrieved.clone().unwrap_or_default();
        let references = format_references(&retrieved, &ctx.language, self.knowledge_max_distance);
        let user_prompt = build_user_prompt(
            &ctx.processed_input,
            &references,
            retrieved.best_template.as_ref(),
            &ctx.language,
        );
        LlmRequest::json(JOURNEY_PLANNER_SYSTEM_PROMPT, user_prompt)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }
}

#[async_trait]
impl PipelineLayer for InferenceLayer {
    fn name(&self) -> &'static str {
        "llm_inference"
    }

    fn order(&self) -> u8 {
        5
    }

    async fn process(&self, ctx: &mut PipelineContext) -> LayerOutcome {
        let provider = match self.registry.get(ctx.requested_provider.as_deref()) {
            Ok(p) => p,
            Err(LlmError::ProviderNotFound(name)) => {
                return LayerOutcome::Rejected(provider_not_found(&name));
            }
            Err(e) => return LayerOutcome::Failed(e.to_string()),
        };

        let request = self.build_request(ctx);

        // Invalid JSON or journey shape is retried like a transport error.
        let result = generate_with_retry(provider.as_ref(), &request, self.retry, |response| {
            Journey::from_value(parse_json_content(&response.content)?)
        })
        .await;

        match result {
            Ok((journey, response)) => {
                tracing::info!(
                    request_id = %ctx.request_id,
                    provider = provider.provider_name(),
                    model = %response.model,
                    total_tokens = response.usage.as_ref().map(|u| u.total_tokens),
                    tasks = journey.journey.len(),
                    total_days = journey.total_days,
                    "Journey generated"
                );
                ctx.llm_provider_used = Some(provider.provider_name().to_string());
                ctx.llm_model_used = Some(response.model);
                ctx.llm_usage = response.usage;
                ctx.llm_finish_reason = response.finish_reason;
                ctx.journey = Some(journey);
                LayerOutcome::Passed
            }
            Err(e) => LayerOutcome::Failed(format!("LLM inference error: {}", e)),
        }
    }

    fn failure_code(&self) -> ErrorCode {
        ErrorCode::LlmFailure
    }
}
