/// Vector store abstraction for synced documents.
///
/// Documents live in named collections and carry a searchable text, a JSON
/// metadata object and an embedding. Search returns cosine distances (0 = identical).
/// Each collection also keeps a sync watermark: the newest source `updated_at`
/// known to be reflected in the store.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::HalaError;

/// Collection holding KnowledgeReference projections.
pub const KNOWLEDGE_REFERENCES: &str = "knowledge_references";

/// Collection holding JourneyTemplate projections.
pub const JOURNEY_TEMPLATES: &str = "journey_templates";

/// A document ready to be written to the store.
#[derive(Debug, Clone)]
pub struct VectorDocument {
    pub collection: String,
    pub id: String,
    pub text: String,
    pub metadata: serde_json::Value,
    pub embedding: Vec<f32>,
    pub model: String,
    pub source_updated_at: Option<DateTime<Utc>>,
}

/// A search hit.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredDocument {
    pub id: String,
    pub text: String,
    pub metadata: serde_json::Value,
    /// Cosine distance to the query embedding
    pub distance: f64,
}

impl ScoredDocument {
    pub fn similarity(&self) -> f64 {
        1.0 - self.distance
    }

    /// The projected source record stored under `metadata.full_document`.
    pub fn full_document(&self) -> Option<&serde_json::Value> {
        self.metadata.get("full_document")
    }
}

/// Metadata containment filter: a document matches when its metadata contains
/// every key/value pair of the filter (PostgreSQL `@>` semantics).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter(serde_json::Map<String, serde_json::Value>);

impl MetadataFilter {
    pub fn new() -> Self {
        MetadataFilter::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(self.0.clone())
    }

    /// In-process equivalent of `metadata @> filter`.
    pub fn matches(&self, metadata: &serde_json::Value) -> bool {
        json_contains(metadata, &self.to_json())
    }
}

/// JSONB containment: objects match key-wise, arrays match when every needle
/// element is contained in some haystack element, scalars must be equal.
pub fn json_contains(haystack: &serde_json::Value, needle: &serde_json::Value) -> bool {
    use serde_json::Value;
    match (haystack, needle) {
        (Value::Object(h), Value::Object(n)) => n
            .iter()
            .all(|(k, nv)| h.get(k).map(|hv| json_contains(hv, nv)).unwrap_or(false)),
        (Value::Array(h), Value::Array(n)) => n
            .iter()
            .all(|nv| h.iter().any(|hv| json_contains(hv, nv))),
        (Value::Array(h), scalar) if !scalar.is_object() => h.iter().any(|hv| hv == scalar),
        (h, n) => h == n,
    }
}

/// Per-collection counts and sync bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub collection: String,
    pub documents: u64,
    pub watermark: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Storage interface for embedded documents.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace a document by (collection, id).
    async fn upsert(&self, document: VectorDocument) -> Result<(), HalaError>;

    /// Remove a document. Returns whether it existed.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, HalaError>;

    /// Nearest neighbours by cosine distance, closest first.
    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredDocument>, HalaError>;

    async fn count(&self, collection: &str) -> Result<u64, HalaError>;

    /// Remove every document in a collection. Returns the number removed.
    async fn clear(&self, collection: &str) -> Result<u64, HalaError>;

    async fn watermark(&self, collection: &str) -> Result<Option<DateTime<Utc>>, HalaError>;

    /// Record the outcome of a sync run. The watermark is stored as given.
    async fn save_watermark(
        &self,
        collection: &str,
        watermark: Option<DateTime<Utc>>,
        stats: &serde_json::Value,
    ) -> Result<(), HalaError>;

    async fn stats(&self, collection: &str) -> Result<CollectionStats, HalaError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_matches_scalars() {
        let filter = MetadataFilter::new().with("category", "STORY").with("is_active", true);
        assert!(filter.matches(&json!({"category": "STORY", "is_active": true, "x": 1})));
        assert!(!filter.matches(&json!({"category": "VERSE", "is_active": true})));
        assert!(!filter.matches(&json!({"category": "STORY"})));
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(MetadataFilter::new().matches(&json!({"a": 1})));
    }

    #[test]
    fn test_json_contains_arrays() {
        let meta = json!({"tags": ["sabar", "doa", "pagi"]});
        assert!(json_contains(&meta, &json!({"tags": ["doa"]})));
        assert!(json_contains(&meta, &json!({"tags": ["pagi", "sabar"]})));
        assert!(!json_contains(&meta, &json!({"tags": ["malam"]})));
    }

    #[test]
    fn test_similarity_from_distance() {
        let doc = ScoredDocument {
            id: "a".to_string(),
            text: String::new(),
            metadata: json!({"full_document": {"id": "a"}}),
            distance: 0.12,
        };
        assert!((doc.similarity() - 0.88).abs() < 1e-9);
        assert_eq!(doc.full_document().unwrap()["id"], "a");
    }
}
