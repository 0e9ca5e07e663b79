/// Source records read from the application database.
///
/// `KnowledgeReference` and `JourneyTemplate` are owned by the main application;
/// this service only reads them. `SourceStore` is the read interface, with a
/// PostgreSQL implementation in `postgres`.

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::HalaError;

/// KnowledgeReference statuses that never reach the vector store.
pub const KNOWLEDGE_EXCLUDED_STATUSES: [&str; 2] = ["ARCHIVED", "REJECTED"];

/// JourneyTemplate statuses that never reach the vector store.
pub const TEMPLATE_EXCLUDED_STATUSES: [&str; 1] = ["ARCHIVED"];

/// Text available in Indonesian and/or English.
///
/// Stored columns hold either a JSON object `{"id": "...", "en": "..."}` or plain
/// text written in the row's language.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedText {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub en: Option<String>,
}

impl LocalizedText {
    /// Decode a stored column value. `language` decides where plain text goes.
    pub fn parse(raw: &str, language: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with('{') {
            if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(trimmed) {
                let pick = |key: &str| {
                    map.get(key)
                        .and_then(|v| v.as_str())
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                };
                let text = LocalizedText { id: pick("id"), en: pick("en") };
                if !text.is_empty() {
                    return text;
                }
            }
        }
        Self::from_value(trimmed, language)
    }

    /// Build from a JSON value that is either a string or an `{id, en}` object.
    pub fn from_json(value: &serde_json::Value, language: &str) -> Self {
        match value {
            serde_json::Value::String(s) => Self::parse(s, language),
            serde_json::Value::Object(_) => {
                serde_json::from_value::<LocalizedText>(value.clone()).unwrap_or_default()
            }
            _ => LocalizedText::default(),
        }
    }

    fn from_value(text: &str, language: &str) -> Self {
        if text.is_empty() {
            return LocalizedText::default();
        }
        if language.eq_ignore_ascii_case("en") {
            LocalizedText { id: None, en: Some(text.to_string()) }
        } else {
            LocalizedText { id: Some(text.to_string()), en: None }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.en.is_none()
    }

    /// Text in `language`, falling back to the other language.
    pub fn get(&self, language: &str) -> Option<&str> {
        let (first, second) = if language.eq_ignore_ascii_case("en") {
            (&self.en, &self.id)
        } else {
            (&self.id, &self.en)
        };
        first.as_deref().or(second.as_deref())
    }

    /// All present translations, Indonesian first.
    pub fn parts(&self) -> Vec<&str> {
        self.id.iter().chain(self.en.iter()).map(String::as_str).collect()
    }
}

/// A verse, hadith, doa, strategy or story curated by the content team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeReference {
    pub id: String,
    /// VERSE, HADITH, DOA, STRATEGY, STORY
    pub category: String,
    pub source: Option<String>,
    pub title: LocalizedText,
    pub content: LocalizedText,
    pub content_ar: Option<String>,
    pub tags: Vec<String>,
    pub language: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeReference {
    pub fn is_excluded(&self) -> bool {
        is_excluded_status(&self.status, &KNOWLEDGE_EXCLUDED_STATUSES)
    }
}

/// A previously generated journey kept as a reusable base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneyTemplate {
    pub id: String,
    pub goal_keyword: String,
    pub tags: Vec<String>,
    pub language: String,
    pub full_json: serde_json::Value,
    pub status: String,
    pub is_active: bool,
    pub match_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JourneyTemplate {
    pub fn is_excluded(&self) -> bool {
        is_excluded_status(&self.status, &TEMPLATE_EXCLUDED_STATUSES)
    }
}

fn is_excluded_status(status: &str, excluded: &[&str]) -> bool {
    excluded.iter().any(|s| s.eq_ignore_ascii_case(status.trim()))
}

/// Read access to the source tables.
///
/// List methods return rows ordered by `updated_at` ascending. With
/// `include_excluded` false, archived/rejected rows are filtered out.
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn knowledge_references(
        &self,
        since: Option<DateTime<Utc>>,
        include_excluded: bool,
    ) -> Result<Vec<KnowledgeReference>, HalaError>;

    async fn knowledge_reference(&self, id: &str) -> Result<Option<KnowledgeReference>, HalaError>;

    async fn journey_templates(
        &self,
        since: Option<DateTime<Utc>>,
        include_excluded: bool,
    ) -> Result<Vec<JourneyTemplate>, HalaError>;

    async fn journey_template(&self, id: &str) -> Result<Option<JourneyTemplate>, HalaError>;

    /// Round-trip to the database.
    async fn ping(&self) -> Result<(), HalaError>;
}
