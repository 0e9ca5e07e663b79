/// Layer 4: retrieval from the vector store.
///
/// One query embedding is used for three searches: active journey templates,
/// knowledge references, and `STORY` references so the prompt can always
/// carry a story. Empty results are not an error.

use async_trait::async_trait;
use std::sync::Arc;

use super::{LayerOutcome, PipelineContext, PipelineLayer};
use crate::config::PipelineConfig;
use crate::embedding::EmbeddingProvider;
use crate::errors::{ErrorCode, HalaError};
use crate::vector::{MetadataFilter, ScoredDocument, VectorStore, JOURNEY_TEMPLATES, KNOWLEDGE_REFERENCES};

/// Everything layer 4 found for one request.
#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub query: String,
    pub templates: Vec<ScoredDocument>,
    pub knowledge: Vec<ScoredDocument>,
    pub stories: Vec<ScoredDocument>,
    /// Nearest template when it is similar enough to base the journey on
    pub best_template: Option<ScoredDocument>,
}

impl RetrievedContext {
    pub fn template_similarity(&self) -> Option<f64> {
        self.best_template.as_ref().map(ScoredDocument::similarity)
    }

    pub fn documents_retrieved(&self) -> usize {
        self.knowledge.len()
    }
}

/// Query text sent to the embedder: the detected scope prefixes the input.
pub fn build_query(scope: Option<&str>, input: &str) -> String {
    match scope {
        Some(scope) => format!("{}: {}", scope, input),
        None => input.to_string(),
    }
}

pub struct RetrievalLayer {
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorStore>,
    knowledge_top_k: usize,
    template_top_k: usize,
    story_top_k: usize,
    template_threshold: f64,
}

impl RetrievalLayer {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorStore>,
        config: &PipelineConfig,
    ) -> Self {
        RetrievalLayer {
            embedder,
            vectors,
            knowledge_top_k: config.rag_top_k,
            template_top_k: config.template_top_k,
            story_top_k: config.story_top_k,
            template_threshold: config.template_similarity_threshold,
        }
    }

    pub async fn retrieve(&self, scope: Option<&str>, input: &str) -> Result<RetrievedContext, HalaError> {
        let query = build_query(scope, input);
        let embedding = self.embedder.embed(&query).await?;

        let active = MetadataFilter::new().with("is_active", true);
        let templates = self
            .vectors
            .search(JOURNEY_TEMPLATES, &embedding, self.template_top_k, Some(&active))
            .await?;

        let knowledge = self
            .vectors
            .search(KNOWLEDGE_REFERENCES, &embedding, self.knowledge_top_k, None)
            .await?;

        let stories_only = MetadataFilter::new().with("category", "STORY");
        let stories = self
            .vectors
            .search(KNOWLEDGE_REFERENCES, &embedding, self.story_top_k, Some(&stories_only))
            .await?;

        let best_template = templates
            .first()
            .filter(|t| t.similarity() >= self.template_threshold)
            .cloned();

        match templates.first() {
            Some(top) if best_template.is_some() => {
                tracing::info!(template_id = %top.id, similarity = top.similarity(), "Using journey template");
            }
            Some(top) => {
                tracing::debug!(similarity = top.similarity(), "No template above threshold");
            }
            None => {}
        }

        Ok(RetrievedContext { query, templates, knowledge, stories, best_template })
    }
}

#[async_trait]
impl PipelineLayer for RetrievalLayer {
    fn name(&self) -> &'static str {
        "rag_retrieval"
    }

    fn order(&self) -> u8 {
        4
    }

    async fn process(&self, ctx: &mut PipelineContext) -> LayerOutcome {
        match self.retrieve(ctx.detected_scope.as_deref(), &ctx.processed_input).await {
            Ok(retrieved) => {
                tracing::debug!(
                    request_id = %ctx.request_id,
                    templates = retrieved.templates.len(),
                    knowledge = retrieved.knowledge.len(),
                    stories = retrieved.stories.len(),
                    "Context retrieved"
                );
                ctx.retrieved = Some(retrieved);
                LayerOutcome::Passed
            }
            Err(e) => LayerOutcome::Failed(format!("RAG retrieval error: {}", e)),
        }
    }

    fn failure_code(&self) -> ErrorCode {
        ErrorCode::RagFailure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingError;
    use crate::vector::memory::InMemoryVectorStore;
    use crate::vector::VectorDocument;
    use serde_json::json;

    /// Embeds every text to the same axis so distances come from stored vectors alone.
    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0, 0.0])
        }

        fn model_name(&self) -> &str {
            "fixed"
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn doc(collection: &str, id: &str, embedding: Vec<f32>, metadata: serde_json::Value) -> VectorDocument {
        VectorDocument {
            collection: collection.to_string(),
            id: id.to_string(),
            text: id.to_string(),
            metadata,
            embedding,
            model: "fixed".to_string(),
            source_updated_at: None,
        }
    }

    async fn store() -> Arc<InMemoryVectorStore> {
        let store = Arc::new(InMemoryVectorStore::new());
        store
            .upsert(doc(JOURNEY_TEMPLATES, "tpl-close", vec![1.0, 0.1], json!({"is_active": true})))
            .await
            .unwrap();
        store
            .upsert(doc(JOURNEY_TEMPLATES, "tpl-inactive", vec![1.0, 0.0], json!({"is_active": false})))
            .await
            .unwrap();
        store
            .upsert(doc(KNOWLEDGE_REFERENCES, "verse", vec![1.0, 0.2], json!({"category": "VERSE"})))
            .await
            .unwrap();
        store
            .upsert(doc(KNOWLEDGE_REFERENCES, "story", vec![0.2, 1.0], json!({"category": "STORY"})))
            .await
            .unwrap();
        store
    }

    #[test]
    fn test_build_query() {
        assert_eq!(build_query(Some("worship"), "pray more"), "worship: pray more");
        assert_eq!(build_query(None, "pray more"), "pray more");
    }

    #[tokio::test]
    async fn test_retrieve_filters_and_picks_template() {
        let layer = RetrievalLayer::new(Arc::new(FixedEmbedder), store().await, &PipelineConfig::default());
        let ctx = layer.retrieve(Some("worship"), "pray more").await.unwrap();

        assert_eq!(ctx.query, "worship: pray more");
        assert_eq!(ctx.templates.len(), 1);
        assert_eq!(ctx.templates[0].id, "tpl-close");
        assert_eq!(ctx.best_template.as_ref().map(|t| t.id.as_str()), Some("tpl-close"));
        assert!(ctx.template_similarity().unwrap() > 0.99);

        assert_eq!(ctx.knowledge.len(), 2);
        assert_eq!(ctx.knowledge[0].id, "verse");
        assert_eq!(ctx.stories.len(), 1);
        assert_eq!(ctx.stories[0].id, "story");
        assert_eq!(ctx.documents_retrieved(), 2);
    }

    #[tokio::test]
    async fn test_template_below_threshold_is_not_used() {
        let config = PipelineConfig { template_similarity_threshold: 0.9999, ..PipelineConfig::default() };
        let layer = RetrievalLayer::new(Arc::new(FixedEmbedder), store().await, &config);
        let ctx = layer.retrieve(None, "pray more").await.unwrap();
        assert_eq!(ctx.templates.len(), 1);
        assert!(ctx.best_template.is_none());
        assert!(ctx.template_similarity().is_none());
    }

    #[tokio::test]
    async fn test_empty_store_passes() {
        let layer = RetrievalLayer::new(
            Arc::new(FixedEmbedder),
            Arc::new(InMemoryVectorStore::new()),
            &PipelineConfig::default(),
        );
        let mut ctx = PipelineContext::new("pray more", "en");
        assert!(matches!(layer.process(&mut ctx).await, LayerOutcome::Passed));
        let retrieved = ctx.retrieved.unwrap();
        assert!(retrieved.knowledge.is_empty());
        assert!(retrieved.best_template.is_none());
    }
}
