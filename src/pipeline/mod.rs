/// Layered request pipeline for journey generation.
///
/// A request flows through ordered layers that share a mutable `PipelineContext`:
/// sanitize (1) -> semantic scope (2) -> safety (3) -> retrieval (4) -> inference (5).
/// The first layer that rejects or fails stops the run.

pub mod inference;
pub mod journey;
pub mod prompt;
pub mod retrieval;
pub mod safety;
pub mod sanitize;
pub mod semantic;
pub mod service;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::errors::{ErrorCode, Rejection};
use crate::llm::TokenUsage;

pub use journey::{Journey, JourneyRequest};
pub use service::{JourneyResponse, JourneyService, ValidationReport};

/// State shared by all layers of one request.
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    pub request_id: String,
    pub raw_input: String,
    /// Cleaned input; layers after sanitize read this
    pub processed_input: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    /// Requested response language ("id" or "en")
    pub language: String,
    pub detected_language: Option<String>,
    /// LLM preset to use instead of the default
    pub requested_provider: Option<String>,

    pub semantic_scores: BTreeMap<String, f32>,
    pub detected_scope: Option<String>,
    pub safety_flags: Vec<String>,

    pub retrieved: Option<retrieval::RetrievedContext>,

    pub journey: Option<Journey>,
    pub llm_provider_used: Option<String>,
    pub llm_model_used: Option<String>,
    pub llm_usage: Option<TokenUsage>,
    pub llm_finish_reason: Option<String>,

    /// Milliseconds spent in each executed layer
    pub layer_timings: BTreeMap<String, f64>,
}

impl PipelineContext {
    pub fn new(raw_input: impl Into<String>, language: impl Into<String>) -> Self {
        let raw_input = raw_input.into();
        PipelineContext {
            request_id: uuid::Uuid::new_v4().to_string(),
            processed_input: raw_input.clone(),
            raw_input,
            language: language.into(),
            ..PipelineContext::default()
        }
    }

    pub fn from_request(request: &JourneyRequest) -> Self {
        let mut ctx = PipelineContext::new(&request.prompt, &request.language);
        ctx.user_id = request.user_id.clone();
        ctx.session_id = request.session_id.clone();
        ctx.requested_provider = request.provider.clone();
        ctx
    }
}

/// Result of running one layer.
#[derive(Debug, Clone)]
pub enum LayerOutcome {
    Passed,
    /// The input is not acceptable; shown to the user as-is
    Rejected(Rejection),
    /// The layer could not do its job (provider down, store unreachable)
    Failed(String),
}

#[async_trait]
pub trait PipelineLayer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Position in the pipeline, lowest first.
    fn order(&self) -> u8;

    async fn process(&self, ctx: &mut PipelineContext) -> LayerOutcome;

    /// Code reported when `process` returns `Failed`.
    fn failure_code(&self) -> ErrorCode {
        ErrorCode::InternalError
    }
}

/// The layer that stopped a run and why.
#[derive(Debug, Clone)]
pub struct LayerFailure {
    pub layer: &'static str,
    pub rejection: Rejection,
}

/// Runs layers in order and records per-layer timings.
#[derive(Clone)]
pub struct Orchestrator {
    layers: Vec<Arc<dyn PipelineLayer>>,
}

impl Orchestrator {
    pub fn new(mut layers: Vec<Arc<dyn PipelineLayer>>) -> Self {
        layers.sort_by_key(|l| l.order());
        Orchestrator { layers }
    }

    pub fn layer_names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|l| l.name()).collect()
    }

    pub async fn run(&self, ctx: &mut PipelineContext) -> Result<(), LayerFailure> {
        for layer in &self.layers {
            let start = Instant::now();
            let outcome = layer.process(ctx).await;
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            ctx.layer_timings.insert(layer.name().to_string(), elapsed_ms);

            match outcome {
                LayerOutcome::Passed => {
                    tracing::debug!(
                        request_id = %ctx.request_id,
                        layer = layer.name(),
                        elapsed_ms,
                        "Layer passed"
                    );
                }
                LayerOutcome::Rejected(rejection) => {
                    tracing::info!(
                        request_id = %ctx.request_id,
                        layer = layer.name(),
                        code = %rejection.code,
                        "Request rejected"
                    );
                    return Err(LayerFailure { layer: layer.name(), rejection });
                }
                LayerOutcome::Failed(detail) => {
                    tracing::error!(
                        request_id = %ctx.request_id,
                        layer = layer.name(),
                        error = %detail,
                        "Layer failed"
                    );
                    return Err(LayerFailure {
                        layer: layer.name(),
                        rejection: Rejection::internal(layer.failure_code(), &detail),
                    });
                }
            }
        }
        Ok(())
    }
}
