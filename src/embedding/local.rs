/// Local embedding provider using fastembed
///
/// Provides offline embedding generation using all-MiniLM-L6-v2 (384 dimensions) by default.
/// No API key required. Model weights are downloaded and cached locally.
/// All CPU-bound fastembed calls are wrapped in spawn_blocking to avoid blocking async runtime.

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::task;

use super::{EmbeddingError, EmbeddingProvider};

/// Local embedding provider backed by fastembed.
///
/// fastembed is synchronous, so embed() uses spawn_blocking internally.
pub struct LocalEmbeddingProvider {
    model: Arc<Mutex<TextEmbedding>>,
    name: String,
    dim: usize,
}

/// Map a configured model name to a fastembed model and its output dimension.
fn resolve_model(name: &str) -> Result<(EmbeddingModel, usize), EmbeddingError> {
    match name.to_lowercase().as_str() {
        "all-minilm-l6-v2" => Ok((EmbeddingModel::AllMiniLML6V2, 384)),
        "paraphrase-multilingual-minilm-l12-v2" => Ok((EmbeddingModel::ParaphraseMLMiniLML12V2, 384)),
        "bge-small-en-v1.5" => Ok((EmbeddingModel::BGESmallENV15, 384)),
        "multilingual-e5-small" => Ok((EmbeddingModel::MultilingualE5Small, 384)),
        "multilingual-e5-base" => Ok((EmbeddingModel::MultilingualE5Base, 768)),
        other => Err(EmbeddingError::ModelInit(format!(
            "Unsupported local embedding model '{}'",
            other
        ))),
    }
}

impl LocalEmbeddingProvider {
    /// Create a new LocalEmbeddingProvider, downloading model weights if not cached.
    ///
    /// # Arguments
    /// * `model_name` - Model identifier, e.g. "all-MiniLM-L6-v2"
    /// * `cache_dir` - Directory to cache model weights (fastembed downloads on first use)
    pub async fn new(model_name: &str, cache_dir: &str) -> Result<Self, EmbeddingError> {
        let (model, dim) = resolve_model(model_name)?;
        let cache_path = PathBuf::from(cache_dir);

        tracing::info!(model = model_name, cache_dir = %cache_path.display(), "Loading local embedding model");

        let embedding = task::spawn_blocking(move || {
            std::fs::create_dir_all(&cache_path)
                .map_err(|e| EmbeddingError::ModelInit(format!("Failed to create cache dir: {}", e)))?;
            TextEmbedding::try_new(
                InitOptions::new(model)
                    .with_cache_dir(cache_path)
                    .with_show_download_progress(false),
            )
            .map_err(|e| EmbeddingError::ModelInit(e.to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::ModelInit(e.to_string()))??;

        Ok(LocalEmbeddingProvider {
            model: Arc::new(Mutex::new(embedding)),
            name: model_name.to_string(),
            dim,
        })
    }

    async fn run(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let model = Arc::clone(&self.model);
        task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|_| EmbeddingError::Generation("Embedding model lock poisoned".to_string()))?;
            guard
                .embed(texts, None)
                .map_err(|e| EmbeddingError::Generation(e.to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::Generation(e.to_string()))?
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.run(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Generation("Model returned no embedding".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.run(texts.to_vec()).await
    }

    fn model_name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_model_is_case_insensitive() {
        let (_, dim) = resolve_model("all-MiniLM-L6-v2").unwrap();
        assert_eq!(dim, 384);
        let (_, dim) = resolve_model("Multilingual-E5-Base").unwrap();
        assert_eq!(dim, 768);
    }

    #[test]
    fn test_resolve_model_rejects_unknown() {
        assert!(matches!(
            resolve_model("word2vec"),
            Err(EmbeddingError::ModelInit(_))
        ));
    }
}
