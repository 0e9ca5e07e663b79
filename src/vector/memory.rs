/// In-memory vector store.
///
/// Brute-force cosine search over a `HashMap`. Used for tests and dry runs;
/// contents are lost when the process exits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{CollectionStats, MetadataFilter, ScoredDocument, VectorDocument, VectorStore};
use crate::embedding::cosine_similarity;
use crate::errors::HalaError;

#[derive(Debug, Clone, Default)]
struct SyncState {
    watermark: Option<DateTime<Utc>>,
    last_run_at: Option<DateTime<Utc>>,
    last_stats: serde_json::Value,
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, HashMap<String, VectorDocument>>>,
    state: RwLock<HashMap<String, SyncState>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a stored document by id.
    pub async fn get(&self, collection: &str, id: &str) -> Option<VectorDocument> {
        self.collections
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    /// Stats object saved with the most recent watermark.
    pub async fn last_stats(&self, collection: &str) -> Option<serde_json::Value> {
        self.state
            .read()
            .await
            .get(collection)
            .map(|s| s.last_stats.clone())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, document: VectorDocument) -> Result<(), HalaError> {
        if document.embedding.is_empty() {
            return Err(HalaError::validation("embedding", "Embedding must not be empty"));
        }
        let mut collections = self.collections.write().await;
        collections
            .entry(document.collection.clone())
            .or_default()
            .insert(document.id.clone(), document);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, HalaError> {
        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(collection)
            .map(|docs| docs.remove(id).is_some())
            .unwrap_or(false))
    }

    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredDocument>, HalaError> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<ScoredDocument> = docs
            .values()
            .filter(|d| filter.map(|f| f.matches(&d.metadata)).unwrap_or(true))
            .map(|d| ScoredDocument {
                id: d.id.clone(),
                text: d.text.clone(),
                metadata: d.metadata.clone(),
                distance: 1.0 - cosine_similarity(embedding, &d.embedding) as f64,
            })
            .collect();

        scored.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn count(&self, collection: &str) -> Result<u64, HalaError> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|docs| docs.len() as u64)
            .unwrap_or(0))
    }

    async fn clear(&self, collection: &str) -> Result<u64, HalaError> {
        Ok(self
            .collections
            .write()
            .await
            .remove(collection)
            .map(|docs| docs.len() as u64)
            .unwrap_or(0))
    }

    async fn watermark(&self, collection: &str) -> Result<Option<DateTime<Utc>>, HalaError> {
        Ok(self
            .state
            .read()
            .await
            .get(collection)
            .and_then(|s| s.watermark))
    }

    async fn save_watermark(
        &self,
        collection: &str,
        watermark: Option<DateTime<Utc>>,
        stats: &serde_json::Value,
    ) -> Result<(), HalaError> {
        self.state.write().await.insert(
            collection.to_string(),
            SyncState {
                watermark,
                last_run_at: Some(Utc::now()),
                last_stats: stats.clone(),
            },
        );
        Ok(())
    }

    async fn stats(&self, collection: &str) -> Result<CollectionStats, HalaError> {
        let documents = self.count(collection).await?;
        let state = self.state.read().await.get(collection).cloned().unwrap_or_default();
        Ok(CollectionStats {
            collection: collection.to_string(),
            documents,
            watermark: state.watermark,
            last_run_at: state.last_run_at,
        })
    }
}
