/// Configuration management using figment
///
/// Loads configuration with this precedence (highest wins):
/// 1. Defaults (hardcoded)
/// 2. TOML file: hala.toml (in working directory)
/// 3. Environment variables: prefixed HALA_ (e.g., HALA_LOG_LEVEL=debug).
///    Nested sections use a double underscore: HALA_LLM__PROVIDER=openai

use figment::{
    Figment,
    providers::{Env, Format, Toml, Serialized},
};
use serde::{Deserialize, Serialize};
use crate::errors::HalaError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional file path for log output (in addition to stderr)
    #[serde(default)]
    pub log_file: Option<String>,

    /// PostgreSQL URL of the source database holding KnowledgeReference and JourneyTemplate.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// PostgreSQL URL (with pgvector) for the vector store. Defaults to database_url.
    #[serde(default)]
    pub vector_database_url: Option<String>,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_database_url() -> String {
    "postgres://postgres@localhost:5432/hala_ai".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            log_file: None,
            database_url: default_database_url(),
            vector_database_url: None,
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            pipeline: PipelineConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, TOML file, and environment variables
    ///
    /// Environment variables override TOML file values.
    /// Example: HALA_LOG_LEVEL=debug overrides log_level in hala.toml
    pub fn load() -> Result<Config, HalaError> {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("hala.toml"))
            .merge(Env::prefixed("HALA_").split("__"))
            .extract()
            .map_err(|e| HalaError::Config(format!("Failed to load config: {}", e)))
    }

    /// The URL used for the vector store connection.
    pub fn vector_url(&self) -> &str {
        self.vector_database_url.as_deref().unwrap_or(&self.database_url)
    }
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "local" (fastembed, default) or "openai"
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// Local model name (e.g., "all-MiniLM-L6-v2", "paraphrase-multilingual-MiniLM-L12-v2")
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Directory where fastembed caches model weights
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    #[serde(default)]
    pub openai_api_key: Option<String>,

    #[serde(default = "default_openai_embedding_model")]
    pub openai_model: String,

    /// Base URL of an OpenAI-compatible embeddings API
    #[serde(default = "default_openai_embedding_base_url")]
    pub openai_base_url: String,
}

fn default_embedding_provider() -> String {
    "local".to_string()
}

fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_cache_dir() -> String {
    dirs::cache_dir()
        .map(|d| d.join("hala").join("models"))
        .unwrap_or_else(|| std::path::PathBuf::from(".fastembed_cache"))
        .to_string_lossy()
        .into_owned()
}

fn default_openai_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_openai_embedding_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            cache_dir: default_cache_dir(),
            openai_api_key: None,
            openai_model: default_openai_embedding_model(),
            openai_base_url: default_openai_embedding_base_url(),
        }
    }
}

/// LLM provider settings. `provider` selects one of the gemini/openai/ollama presets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    #[serde(default)]
    pub gemini_api_key: Option<String>,
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,
    #[serde(default = "default_gemini_base_url")]
    pub gemini_base_url: String,

    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    #[serde(default = "default_ollama_model")]
    pub ollama_model: String,
    #[serde(default = "default_ollama_base_url")]
    pub ollama_base_url: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Extra attempts after the first failed generation
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,

    /// First backoff delay between generation attempts; doubles on every retry
    #[serde(default = "default_llm_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_llm_provider() -> String {
    "gemini".to_string()
}

fn default_gemini_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/openai".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ollama_model() -> String {
    "llama3.2".to_string()
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_llm_max_retries() -> u32 {
    2
}

fn default_llm_retry_base_delay_ms() -> u64 {
    1000
}

fn default_llm_timeout_secs() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            provider: default_llm_provider(),
            gemini_api_key: None,
            gemini_model: default_gemini_model(),
            gemini_base_url: default_gemini_base_url(),
            openai_api_key: None,
            openai_model: default_openai_model(),
            openai_base_url: default_openai_base_url(),
            ollama_model: default_ollama_model(),
            ollama_base_url: default_ollama_base_url(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_retries: default_llm_max_retries(),
            retry_base_delay_ms: default_llm_retry_base_delay_ms(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

/// Thresholds and limits for the five pipeline layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_min_input_length")]
    pub min_input_length: usize,
    #[serde(default = "default_max_input_length")]
    pub max_input_length: usize,
    /// Minimum best-scope cosine similarity for an input to be in scope
    #[serde(default = "default_semantic_threshold")]
    pub semantic_similarity_threshold: f32,
    /// Below this score an input also needs a platform keyword to pass
    #[serde(default = "default_keyword_fallback_threshold")]
    pub keyword_fallback_threshold: f32,
    #[serde(default = "default_rag_top_k")]
    pub rag_top_k: usize,
    #[serde(default = "default_template_top_k")]
    pub template_top_k: usize,
    #[serde(default = "default_story_top_k")]
    pub story_top_k: usize,
    /// Similarity at which a synced journey template becomes the base of a new journey
    #[serde(default = "default_template_similarity_threshold")]
    pub template_similarity_threshold: f64,
    /// Knowledge references farther than this cosine distance are left out of the prompt
    #[serde(default = "default_knowledge_max_distance")]
    pub knowledge_max_distance: f64,
}

fn default_min_input_length() -> usize {
    10
}

fn default_max_input_length() -> usize {
    500
}

fn default_semantic_threshold() -> f32 {
    0.45
}

fn default_keyword_fallback_threshold() -> f32 {
    0.50
}

fn default_rag_top_k() -> usize {
    5
}

fn default_template_top_k() -> usize {
    3
}

fn default_story_top_k() -> usize {
    3
}

fn default_template_similarity_threshold() -> f64 {
    0.85
}

fn default_knowledge_max_distance() -> f64 {
    0.7
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            min_input_length: default_min_input_length(),
            max_input_length: default_max_input_length(),
            semantic_similarity_threshold: default_semantic_threshold(),
            keyword_fallback_threshold: default_keyword_fallback_threshold(),
            rag_top_k: default_rag_top_k(),
            template_top_k: default_template_top_k(),
            story_top_k: default_story_top_k(),
            template_similarity_threshold: default_template_similarity_threshold(),
            knowledge_max_distance: default_knowledge_max_distance(),
        }
    }
}

/// Postgres -> vector store synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Only sync rows in this language ("id" or "en"); all languages when unset
    #[serde(default)]
    pub language: Option<String>,
    /// Extra attempts per record after a failed embed/upsert
    #[serde(default = "default_sync_max_retries")]
    pub max_retries: u32,
    /// First backoff delay; doubles on every retry
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Interval between incremental runs in `sync watch`
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_sync_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_poll_interval_secs() -> u64 {
    300
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            language: None,
            max_retries: default_sync_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_file, None);
        assert_eq!(config.llm.provider, "gemini");
        assert_eq!(config.embedding.provider, "local");
        assert_eq!(config.pipeline.min_input_length, 10);
        assert_eq!(config.pipeline.max_input_length, 500);
        assert!((config.pipeline.semantic_similarity_threshold - 0.45).abs() < f32::EPSILON);
        assert_eq!(config.pipeline.rag_top_k, 5);
        assert_eq!(config.sync.max_retries, 3);
    }

    #[test]
    fn test_vector_url_falls_back_to_database_url() {
        let mut config = Config::default();
        assert_eq!(config.vector_url(), config.database_url);
        config.vector_database_url = Some("postgres://vectors".to_string());
        assert_eq!(config.vector_url(), "postgres://vectors");
    }

    #[test]
    fn test_nested_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("HALA_LLM__PROVIDER", "ollama");
            jail.set_env("HALA_PIPELINE__RAG_TOP_K", "7");
            let config = Config::load().expect("config should load");
            assert_eq!(config.llm.provider, "ollama");
            assert_eq!(config.pipeline.rag_top_k, 7);
            Ok(())
        });
    }
}
