//! Fakes shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use hala_ai::embedding::{EmbeddingError, EmbeddingProvider};
use hala_ai::errors::HalaError;
use hala_ai::llm::{LlmError, LlmProvider, LlmRequest, LlmResponse, TokenUsage};
use hala_ai::source::{JourneyTemplate, KnowledgeReference, LocalizedText, SourceStore};

pub fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, d, 0, 0, 0).unwrap()
}

pub fn reference(id: &str, category: &str, content: &str, updated: u32) -> KnowledgeReference {
    KnowledgeReference {
        id: id.to_string(),
        category: category.to_string(),
        source: Some("QS. Al-Baqarah: 153".to_string()),
        title: LocalizedText { id: Some(format!("Judul {}", id)), en: None },
        content: LocalizedText { id: Some(content.to_string()), en: None },
        content_ar: None,
        tags: vec!["sabar".to_string()],
        language: "id".to_string(),
        status: "PUBLISHED".to_string(),
        created_at: day(1),
        updated_at: day(updated),
    }
}

pub fn template(id: &str, goal_keyword: &str, updated: u32) -> JourneyTemplate {
    JourneyTemplate {
        id: id.to_string(),
        goal_keyword: goal_keyword.to_string(),
        tags: vec!["prayer".to_string()],
        language: "en".to_string(),
        full_json: serde_json::json!({
            "goal": "Pray tahajjud every night",
            "total_days": 14,
            "introduction": {"id": "Mari mulai", "en": "Let's begin"},
            "journey": []
        }),
        status: "ACTIVE".to_string(),
        is_active: true,
        match_count: 0,
        created_at: day(1),
        updated_at: day(updated),
    }
}

/// Source tables held in memory, with the same filtering rules as the database.
#[derive(Default)]
pub struct FakeSource {
    pub references: Mutex<Vec<KnowledgeReference>>,
    pub templates: Mutex<Vec<JourneyTemplate>>,
}

impl FakeSource {
    pub fn new(references: Vec<KnowledgeReference>, templates: Vec<JourneyTemplate>) -> Self {
        FakeSource {
            references: Mutex::new(references),
            templates: Mutex::new(templates),
        }
    }

    /// Replace a reference with the same id, or add it.
    pub fn put_reference(&self, reference: KnowledgeReference) {
        let mut rows = self.references.lock().unwrap();
        rows.retain(|r| r.id != reference.id);
        rows.push(reference);
    }
}

fn select<T: Clone>(
    rows: &[T],
    since: Option<DateTime<Utc>>,
    include_excluded: bool,
    updated_at: impl Fn(&T) -> DateTime<Utc>,
    excluded: impl Fn(&T) -> bool,
) -> Vec<T> {
    let mut out: Vec<T> = rows
        .iter()
        .filter(|r| since.map(|s| updated_at(r) > s).unwrap_or(true))
        .filter(|r| include_excluded || !excluded(r))
        .cloned()
        .collect();
    out.sort_by_key(|r| updated_at(r));
    out
}

#[async_trait]
impl SourceStore for FakeSource {
    async fn knowledge_references(
        &self,
        since: Option<DateTime<Utc>>,
        include_excluded: bool,
    ) -> Result<Vec<KnowledgeReference>, HalaError> {
        let rows = self.references.lock().unwrap();
        Ok(select(&rows, since, include_excluded, |r| r.updated_at, KnowledgeReference::is_excluded))
    }

    async fn knowledge_reference(&self, id: &str) -> Result<Option<KnowledgeReference>, HalaError> {
        Ok(self.references.lock().unwrap().iter().find(|r| r.id == id).cloned())
    }

    async fn journey_templates(
        &self,
        since: Option<DateTime<Utc>>,
        include_excluded: bool,
    ) -> Result<Vec<JourneyTemplate>, HalaError> {
        let rows = self.templates.lock().unwrap();
        Ok(select(&rows, since, include_excluded, |t| t.updated_at, JourneyTemplate::is_excluded))
    }

    async fn journey_template(&self, id: &str) -> Result<Option<JourneyTemplate>, HalaError> {
        Ok(self.templates.lock().unwrap().iter().find(|t| t.id == id).cloned())
    }

    async fn ping(&self) -> Result<(), HalaError> {
        Ok(())
    }
}

/// Counts marker substrings; text containing "poison" fails to embed.
pub struct MarkerEmbedder {
    markers: Vec<&'static str>,
    calls: AtomicUsize,
}

impl MarkerEmbedder {
    pub fn new(markers: Vec<&'static str>) -> Self {
        MarkerEmbedder { markers, calls: AtomicUsize::new(0) }
    }

    /// Number of `embed` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Markers chosen so only the worship scope description has a non-zero vector.
    pub fn worship() -> Self {
        Self::new(vec!["sholat", "prayer", "tilawah", "football", "judul"])
    }
}

#[async_trait]
impl EmbeddingProvider for MarkerEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let lower = text.to_lowercase();
        if lower.contains("poison") {
            return Err(EmbeddingError::Generation("poisoned input".to_string()));
        }
        let mut vector: Vec<f32> = self
            .markers
            .iter()
            .map(|m| lower.matches(m).count() as f32)
            .collect();
        // keep every vector non-zero so the store accepts it
        vector.push(0.01);
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        "marker"
    }

    fn dimension(&self) -> usize {
        self.markers.len() + 1
    }
}

/// Replies with queued contents, repeating the last one.
pub struct ScriptedLlm {
    name: &'static str,
    replies: Mutex<Vec<String>>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(name: &'static str, replies: &[&str]) -> Self {
        ScriptedLlm {
            name,
            replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn provider_name(&self) -> &str {
        self.name
    }

    fn model_name(&self) -> &str {
        "scripted-1"
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.prompts.lock().unwrap().push(request.user_message.clone());
        let mut replies = self.replies.lock().unwrap();
        let content = if replies.len() > 1 {
            replies.pop().unwrap_or_default()
        } else {
            replies.last().cloned().unwrap_or_default()
        };
        Ok(LlmResponse {
            content,
            model: "scripted-1".to_string(),
            usage: Some(TokenUsage { prompt_tokens: 900, completion_tokens: 600, total_tokens: 1500 }),
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        Ok(())
    }
}
