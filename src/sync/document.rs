/// Projection of source rows into vector documents.
///
/// Each record kind defines its collection, its searchable text and the metadata
/// kept alongside the embedding. `metadata.full_document` holds the whole record
/// so retrieval never has to go back to the source database.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::errors::HalaError;
use crate::source::{JourneyTemplate, KnowledgeReference, LocalizedText};
use crate::vector::{JOURNEY_TEMPLATES, KNOWLEDGE_REFERENCES};

/// A source row that can be synced into the vector store.
pub trait SyncRecord: Send + Sync {
    const COLLECTION: &'static str;

    fn record_id(&self) -> &str;

    fn updated_at(&self) -> DateTime<Utc>;

    /// Archived/rejected rows must not be present in the vector store.
    fn is_excluded(&self) -> bool;

    /// Text that gets embedded.
    fn searchable_text(&self) -> String;

    fn metadata(&self) -> Result<Value, HalaError>;
}

fn join_non_empty<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn full_document<T: serde::Serialize>(record: &T) -> Result<Value, HalaError> {
    serde_json::to_value(record)
        .map_err(|e| HalaError::Internal(format!("Failed to serialize record: {}", e)))
}

impl SyncRecord for KnowledgeReference {
    const COLLECTION: &'static str = KNOWLEDGE_REFERENCES;

    fn record_id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn is_excluded(&self) -> bool {
        KnowledgeReference::is_excluded(self)
    }

    fn searchable_text(&self) -> String {
        let tags = self.tags.join(" ");
        join_non_empty(
            self.title
                .parts()
                .into_iter()
                .chain(self.content.parts())
                .chain([tags.as_str(), self.category.as_str()]),
        )
    }

    fn metadata(&self) -> Result<Value, HalaError> {
        Ok(json!({
            "type": "knowledge_reference",
            "category": self.category,
            "source": self.source.clone().unwrap_or_default(),
            "status": self.status,
            "language": self.language,
            "tags": self.tags,
            "updated_at": self.updated_at.to_rfc3339(),
            "full_document": full_document(self)?,
        }))
    }
}

impl SyncRecord for JourneyTemplate {
    const COLLECTION: &'static str = JOURNEY_TEMPLATES;

    fn record_id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn is_excluded(&self) -> bool {
        JourneyTemplate::is_excluded(self)
    }

    fn searchable_text(&self) -> String {
        let tags = self.tags.join(" ");
        let introduction = self
            .full_json
            .get("introduction")
            .map(|v| LocalizedText::from_json(v, &self.language))
            .unwrap_or_default();
        let goal = self
            .full_json
            .get("goal")
            .and_then(Value::as_str)
            .unwrap_or("");

        join_non_empty(
            [self.goal_keyword.as_str(), tags.as_str()]
                .into_iter()
                .chain(introduction.parts())
                .chain([goal]),
        )
    }

    fn metadata(&self) -> Result<Value, HalaError> {
        Ok(json!({
            "type": "journey_template",
            "goal_keyword": self.goal_keyword,
            "status": self.status,
            "language": self.language,
            "is_active": self.is_active,
            "match_count": self.match_count,
            "tags": self.tags,
            "updated_at": self.updated_at.to_rfc3339(),
            "full_document": full_document(self)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reference() -> KnowledgeReference {
        KnowledgeReference {
            id: "kr-1".to_string(),
            category: "VERSE".to_string(),
            source: Some("QS. Al-Baqarah: 153".to_string()),
            title: LocalizedText { id: Some("Sabar".to_string()), en: Some("Patience".to_string()) },
            content: LocalizedText { id: Some("Mohonlah pertolongan dengan sabar".to_string()), en: None },
            content_ar: None,
            tags: vec!["sabar".to_string(), "ujian".to_string()],
            language: "id".to_string(),
            status: "PUBLISHED".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        }
    }

    fn template(full_json: Value) -> JourneyTemplate {
        JourneyTemplate {
            id: "jt-1".to_string(),
            goal_keyword: "morning-prayer".to_string(),
            tags: vec!["prayer".to_string(), "discipline".to_string()],
            language: "en".to_string(),
            full_json,
            status: "PUBLISHED".to_string(),
            is_active: true,
            match_count: 4,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_knowledge_searchable_text() {
        let text = reference().searchable_text();
        assert_eq!(
            text,
            "Sabar Patience Mohonlah pertolongan dengan sabar sabar ujian VERSE"
        );
    }

    #[test]
    fn test_knowledge_metadata_has_full_document() {
        let meta = reference().metadata().unwrap();
        assert_eq!(meta["category"], "VERSE");
        assert_eq!(meta["tags"][1], "ujian");
        assert_eq!(meta["full_document"]["title"]["en"], "Patience");
        assert_eq!(meta["full_document"]["updated_at"], "2024-02-01T00:00:00Z");
    }

    #[test]
    fn test_template_text_with_bilingual_introduction() {
        let t = template(json!({
            "goal": "Pray fajr on time",
            "introduction": {"id": "Mari mulai", "en": "Let's begin"}
        }));
        assert_eq!(
            t.searchable_text(),
            "morning-prayer prayer discipline Mari mulai Let's begin Pray fajr on time"
        );
    }

    #[test]
    fn test_template_text_with_string_introduction_and_missing_goal() {
        let t = template(json!({"introduction": "A gentle start"}));
        assert_eq!(t.searchable_text(), "morning-prayer prayer discipline A gentle start");
        let meta = t.metadata().unwrap();
        assert_eq!(meta["is_active"], true);
        assert_eq!(meta["match_count"], 4);
    }
}
