/// Journey generation and input validation entry points.
///
/// `JourneyService` wires the five layers into three orchestrators: full
/// generation (1-5), fast validation (1) and screening validation (1-3).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use super::inference::{provider_not_found, InferenceLayer};
use super::journey::{Journey, JourneyRequest};
use super::retrieval::RetrievalLayer;
use super::safety::SafetyLayer;
use super::sanitize::SanitizeLayer;
use super::semantic::SemanticLayer;
use super::{LayerFailure, Orchestrator, PipelineContext, PipelineLayer};
use crate::config::{LlmConfig, PipelineConfig};
use crate::embedding::EmbeddingProvider;
use crate::errors::{BilingualMessage, ErrorCode, HalaError, Rejection};
use crate::llm::{LlmError, ProviderRegistry, TokenUsage};
use crate::vector::VectorStore;

/// Metadata returned with a generated journey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneyMeta {
    pub request_id: String,
    pub detected_scope: Option<String>,
    pub semantic_scores: BTreeMap<String, f32>,
    pub documents_retrieved: usize,
    pub template_used: bool,
    pub template_similarity: Option<f64>,
    pub llm_provider: Option<String>,
    pub llm_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    pub total_time_ms: f64,
    pub layer_timings: BTreeMap<String, f64>,
}

/// Metadata returned with a failed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMeta {
    pub request_id: String,
    pub failed_at_layer: String,
    pub total_time_ms: f64,
    pub layer_timings: BTreeMap<String, f64>,
}

/// Result of `JourneyService::generate`, tagged by `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JourneyResponse {
    Success {
        data: Journey,
        meta: JourneyMeta,
    },
    Error {
        code: ErrorCode,
        message: BilingualMessage,
        suggested_action: Option<String>,
        meta: ErrorMeta,
    },
}

impl JourneyResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, JourneyResponse::Success { .. })
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            JourneyResponse::Success { .. } => None,
            JourneyResponse::Error { code, .. } => Some(*code),
        }
    }

    fn error(layer: &str, rejection: Rejection, ctx: &PipelineContext, total_time_ms: f64) -> Self {
        JourneyResponse::Error {
            code: rejection.code,
            message: rejection.message,
            suggested_action: rejection.suggested_action,
            meta: ErrorMeta {
                request_id: ctx.request_id.clone(),
                failed_at_layer: layer.to_string(),
                total_time_ms,
                layer_timings: ctx.layer_timings.clone(),
            },
        }
    }
}

/// Outcome of validating an input without generating a journey.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub fast_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at_layer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<BilingualMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_scope: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub semantic_scores: BTreeMap<String, f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub safety_flags: Vec<String>,
    pub layer_timings: BTreeMap<String, f64>,
}

pub struct JourneyService {
    semantic: Arc<SemanticLayer>,
    generation: Orchestrator,
    fast_validation: Orchestrator,
    screening: Orchestrator,
    registry: Arc<ProviderRegistry>,
}

impl JourneyService {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorStore>,
        registry: Arc<ProviderRegistry>,
        pipeline: &PipelineConfig,
        llm: &LlmConfig,
    ) -> Result<Self, HalaError> {
        let sanitize: Arc<dyn PipelineLayer> = Arc::new(SanitizeLayer::new(pipeline)?);
        let semantic = Arc::new(SemanticLayer::new(Arc::clone(&embedder), pipeline));
        let safety: Arc<dyn PipelineLayer> = Arc::new(SafetyLayer::new()?);
        let retrieval: Arc<dyn PipelineLayer> =
            Arc::new(RetrievalLayer::new(Arc::clone(&embedder), vectors, pipeline));
        let inference: Arc<dyn PipelineLayer> =
            Arc::new(InferenceLayer::new(Arc::clone(&registry), llm, pipeline));

        let semantic_layer: Arc<dyn PipelineLayer> = semantic.clone();
        let generation = Orchestrator::new(vec![
            Arc::clone(&sanitize),
            Arc::clone(&semantic_layer),
            Arc::clone(&safety),
            retrieval,
            inference,
        ]);
        let fast_validation = Orchestrator::new(vec![Arc::clone(&sanitize)]);
        let screening = Orchestrator::new(vec![sanitize, semantic_layer, safety]);

        tracing::debug!(layers = ?generation.layer_names(), "Journey pipeline ready");

        Ok(JourneyService { semantic, generation, fast_validation, screening, registry })
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Compute scope embeddings ahead of the first request.
    pub async fn warm_up(&self) -> Result<(), HalaError> {
        self.semantic.scope_embeddings().await?;
        Ok(())
    }

    /// Reject a request that names an unregistered provider before any layer runs.
    fn check_provider(&self, ctx: &PipelineContext) -> Result<(), LayerFailure> {
        self.registry
            .get(ctx.requested_provider.as_deref())
            .map(|_| ())
            .map_err(|e| {
                let rejection = match e {
                    LlmError::ProviderNotFound(name) => provider_not_found(&name),
                    other => Rejection::internal(ErrorCode::LlmFailure, &other.to_string()),
                };
                LayerFailure { layer: "llm_inference", rejection }
            })
    }

    /// Run all five layers and build the response.
    pub async fn generate(&self, request: &JourneyRequest) -> JourneyResponse {
        let start = Instant::now();
        let mut ctx = PipelineContext::from_request(request);
        tracing::info!(
            request_id = %ctx.request_id,
            user_id = ?ctx.user_id,
            session_id = ?ctx.session_id,
            language = %ctx.language,
            provider = ?ctx.requested_provider,
            "Journey requested"
        );

        let outcome = match self.check_provider(&ctx) {
            Ok(()) => self.generation.run(&mut ctx).await,
            Err(failure) => Err(failure),
        };
        let total_time_ms = start.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Err(LayerFailure { layer, rejection }) => {
                JourneyResponse::error(layer, rejection, &ctx, total_time_ms)
            }
            Ok(()) => {
                let Some(journey) = ctx.journey.take() else {
                    let rejection = Rejection::internal(ErrorCode::LlmFailure, "no journey produced");
                    return JourneyResponse::error("llm_inference", rejection, &ctx, total_time_ms);
                };
                let retrieved = ctx.retrieved.take().unwrap_or_default();
                tracing::info!(
                    request_id = %ctx.request_id,
                    total_time_ms,
                    total_days = journey.total_days,
                    "Journey request completed"
                );
                JourneyResponse::Success {
                    data: journey,
                    meta: JourneyMeta {
                        request_id: ctx.request_id,
                        detected_scope: ctx.detected_scope,
                        semantic_scores: ctx.semantic_scores,
                        documents_retrieved: retrieved.documents_retrieved(),
                        template_used: retrieved.best_template.is_some(),
                        template_similarity: retrieved.template_similarity(),
                        llm_provider: ctx.llm_provider_used,
                        llm_model: ctx.llm_model_used,
                        token_usage: ctx.llm_usage,
                        finish_reason: ctx.llm_finish_reason,
                        total_time_ms,
                        layer_timings: ctx.layer_timings,
                    },
                }
            }
        }
    }

    /// Check an input without generating. `fast` runs sanitization only.
    ///
    /// The requested provider is checked in both modes.
    pub async fn validate(&self, request: &JourneyRequest, fast: bool) -> ValidationReport {
        let mut ctx = PipelineContext::from_request(request);
        let orchestrator = if fast { &self.fast_validation } else { &self.screening };
        let outcome = match self.check_provider(&ctx) {
            Ok(()) => orchestrator.run(&mut ctx).await,
            Err(failure) => Err(failure),
        };

        let mut report = ValidationReport {
            is_valid: outcome.is_ok(),
            fast_mode: fast,
            detected_language: ctx.detected_language,
            detected_scope: ctx.detected_scope,
            semantic_scores: ctx.semantic_scores,
            safety_flags: ctx.safety_flags,
            layer_timings: ctx.layer_timings,
            ..ValidationReport::default()
        };
        if let Err(LayerFailure { layer, rejection }) = outcome {
            report.failed_at_layer = Some(layer.to_string());
            report.error_code = Some(rejection.code);
            report.message = Some(rejection.message);
            report.suggested_action = rejection.suggested_action;
        }
        report
    }
}
