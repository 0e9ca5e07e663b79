/// MCP tool surface over journey generation and knowledge sync.

use rmcp::{
    ServerHandler,
    tool,
    model::{ServerCapabilities, Implementation, ProtocolVersion, CallToolResult},
    handler::server::wrapper::Parameters,
    ErrorData as McpError,
};
use serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use crate::errors::HalaError;
use crate::pipeline::{JourneyRequest, JourneyService};
use crate::sync::{RecordSyncOutcome, SyncMode, SyncService};

pub struct HalaService {
    journeys: Arc<JourneyService>,
    sync: Arc<SyncService>,
    /// Held for the duration of a sync run; a second run_sync call is refused.
    sync_lock: Mutex<()>,
    start_time: Instant,
}

impl HalaService {
    pub fn new(journeys: Arc<JourneyService>, sync: Arc<SyncService>) -> Self {
        Self {
            journeys,
            sync,
            sync_lock: Mutex::new(()),
            start_time: Instant::now(),
        }
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

// Parameter structs

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct ValidateInputParams {
    /// User input to check (required)
    pub prompt: String,
    /// Response language: "id" or "en" (default: "id")
    pub language: Option<String>,
    /// Run sanitization only, skipping semantic and safety checks (default: false)
    #[serde(default)]
    pub fast: bool,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct RunSyncParams {
    /// "full" re-embeds everything, "incremental" only rows changed since the last run (default: "incremental")
    pub mode: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct RecordIdParams {
    /// Source record ID (required)
    pub id: String,
}

// Helper: convert HalaError to CallToolResult with isError: true
fn hala_error_to_result(err: HalaError) -> CallToolResult {
    match err {
        HalaError::NotFound { id } => {
            CallToolResult::structured_error(json!({
                "isError": true,
                "error": format!("Record not found: {}", id),
            }))
        }
        HalaError::Validation { message, field } => {
            let mut obj = json!({
                "isError": true,
                "error": message,
            });
            if let Some(f) = field {
                obj["field"] = json!(f);
            }
            CallToolResult::structured_error(obj)
        }
        HalaError::Storage(msg) => {
            CallToolResult::structured_error(json!({
                "isError": true,
                "error": format!("Storage error: {}", msg)
            }))
        }
        other => {
            CallToolResult::structured_error(json!({
                "isError": true,
                "error": other.to_string()
            }))
        }
    }
}

fn required_field(value: &str, field: &str) -> Option<CallToolResult> {
    if value.trim().is_empty() {
        Some(CallToolResult::structured_error(json!({
            "isError": true,
            "error": format!("Field '{}' is required and cannot be empty", field),
            "field": field
        })))
    } else {
        None
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, McpError> {
    serde_json::to_value(value).map_err(|e| McpError::internal_error(e.to_string(), None))
}

/// A missing source row is reported as a tool error.
fn record_result(id: &str, outcome: RecordSyncOutcome) -> CallToolResult {
    if outcome == RecordSyncOutcome::NotFound {
        return hala_error_to_result(HalaError::NotFound { id: id.to_string() });
    }
    CallToolResult::structured(json!({
        "id": id,
        "outcome": outcome,
    }))
}

// Tool implementations
#[rmcp::tool_router]
impl HalaService {
    #[tool(description = "Generate a personalized Islamic spiritual journey from a user goal. Runs sanitization, scope validation, safety checks, retrieval and LLM generation. Returns status 'success' with data and meta, or status 'error' with a code and bilingual message.")]
    async fn generate_journey(
        &self,
        Parameters(request): Parameters<JourneyRequest>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(
            tool = "generate_journey",
            language = %request.language,
            provider = ?request.provider,
            "Tool called"
        );

        if let Some(err) = required_field(&request.prompt, "prompt") {
            return Ok(err);
        }

        let response = self.journeys.generate(&request).await;
        let body = to_json(&response)?;
        if response.is_success() {
            Ok(CallToolResult::structured(body))
        } else {
            Ok(CallToolResult::structured_error(body))
        }
    }

    #[tool(description = "Check whether a user input would be accepted, without generating a journey. fast=true runs sanitization only; otherwise sanitization, scope and safety checks run.")]
    async fn validate_input(
        &self,
        Parameters(params): Parameters<ValidateInputParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "validate_input", fast = params.fast, "Tool called");

        if let Some(err) = required_field(&params.prompt, "prompt") {
            return Ok(err);
        }

        let mut request = JourneyRequest::new(params.prompt);
        if let Some(language) = params.language {
            request = request.with_language(language);
        }
        let report = self.journeys.validate(&request, params.fast).await;
        Ok(CallToolResult::structured(to_json(&report)?))
    }

    #[tool(description = "Sync KnowledgeReference and JourneyTemplate rows into the vector store. mode: 'incremental' (default) or 'full'. Only one sync runs at a time.")]
    async fn run_sync(
        &self,
        Parameters(params): Parameters<RunSyncParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "run_sync", mode = ?params.mode, "Tool called");

        let mode = match params.mode.as_deref().map(str::parse::<SyncMode>) {
            None => SyncMode::Incremental,
            Some(Ok(mode)) => mode,
            Some(Err(e)) => return Ok(hala_error_to_result(e)),
        };

        let Ok(_guard) = self.sync_lock.try_lock() else {
            return Ok(CallToolResult::structured_error(json!({
                "isError": true,
                "error": "A sync is already running",
                "hint": "Use sync_stats to follow its progress"
            })));
        };

        match self.sync.sync_all(mode).await {
            Ok(stats) => Ok(CallToolResult::structured(to_json(&stats)?)),
            Err(e) => Ok(hala_error_to_result(e)),
        }
    }

    #[tool(description = "Re-sync a single KnowledgeReference by ID. Upserts it, or removes it from the vector store when archived, rejected or deleted.")]
    async fn sync_knowledge_reference(
        &self,
        Parameters(params): Parameters<RecordIdParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "sync_knowledge_reference", id = %params.id, "Tool called");

        if let Some(err) = required_field(&params.id, "id") {
            return Ok(err);
        }

        match self.sync.sync_knowledge_reference(&params.id).await {
            Ok(outcome) => Ok(record_result(&params.id, outcome)),
            Err(e) => Ok(hala_error_to_result(e)),
        }
    }

    #[tool(description = "Re-sync a single JourneyTemplate by ID. Upserts it, or removes it from the vector store when archived or deleted.")]
    async fn sync_journey_template(
        &self,
        Parameters(params): Parameters<RecordIdParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "sync_journey_template", id = %params.id, "Tool called");

        if let Some(err) = required_field(&params.id, "id") {
            return Ok(err);
        }

        match self.sync.sync_journey_template(&params.id).await {
            Ok(outcome) => Ok(record_result(&params.id, outcome)),
            Err(e) => Ok(hala_error_to_result(e)),
        }
    }

    #[tool(description = "Document counts, watermarks and last run times for each vector collection.")]
    async fn sync_stats(
        &self,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "sync_stats", "Tool called");

        match self.sync.collection_stats().await {
            Ok(collections) => Ok(CallToolResult::structured(json!({
                "collections": to_json(&collections)?,
                "sync_running": self.sync_lock.try_lock().is_err(),
            }))),
            Err(e) => Ok(hala_error_to_result(e)),
        }
    }

    #[tool(description = "List configured LLM providers, which one is the default, and whether each responds.")]
    async fn list_providers(
        &self,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "list_providers", "Tool called");

        let registry = self.journeys.registry();
        let statuses = registry.statuses().await;
        Ok(CallToolResult::structured(json!({
            "default_provider": registry.default_name(),
            "providers": to_json(&statuses)?,
        })))
    }

    #[tool(description = "Check server health: source database, vector store and LLM providers")]
    async fn health_check(
        &self,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "health_check", "Tool called");

        let source = match self.sync.source().ping().await {
            Ok(()) => json!({"status": "ok"}),
            Err(e) => json!({"status": "error", "error": e.to_string()}),
        };
        let vectors = match self.sync.collection_stats().await {
            Ok(collections) => json!({
                "status": "ok",
                "collections": collections
                    .iter()
                    .map(|c| (c.collection.clone(), json!(c.documents)))
                    .collect::<serde_json::Map<_, _>>(),
            }),
            Err(e) => json!({"status": "error", "error": e.to_string()}),
        };
        let providers = self.journeys.registry().statuses().await;
        let healthy = source["status"] == "ok"
            && vectors["status"] == "ok"
            && providers.iter().any(|p| p.available);

        Ok(CallToolResult::structured(json!({
            "status": if healthy { "ok" } else { "degraded" },
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": self.uptime_seconds(),
            "source_database": source,
            "vector_store": vectors,
            "llm_providers": to_json(&providers)?,
        })))
    }
}

// ServerHandler implementation
#[rmcp::tool_handler(router = Self::tool_router())]
impl ServerHandler for HalaService {
    fn get_info(&self) -> rmcp::model::InitializeResult {
        rmcp::model::InitializeResult {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .build(),
            server_info: Implementation {
                name: "hala".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some("Islamic spiritual journey generation with RAG over a synced knowledge base".to_string()),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Journey planner for the Hala app. Tools: generate_journey, validate_input, run_sync, sync_knowledge_reference, sync_journey_template, sync_stats, list_providers, health_check.".to_string()
            ),
        }
    }
}
