/// Layer 2: semantic scope validation.
///
/// The cleaned input is embedded and compared against one description per
/// supported guidance scope. Scope embeddings are computed once per layer and
/// reused for every request.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::{LayerOutcome, PipelineContext, PipelineLayer};
use crate::config::PipelineConfig;
use crate::embedding::{cosine_similarity, EmbeddingError, EmbeddingProvider};
use crate::errors::{ErrorCode, Rejection};

/// A guidance scope and the text its embedding is built from.
#[derive(Debug, Clone)]
pub struct Scope {
    pub name: String,
    pub description: String,
}

impl Scope {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Scope { name: name.into(), description: description.into() }
    }
}

const OFFICIAL_SCOPES: [(&str, &str); 6] = [
    (
        "worship",
        "Saya ingin meningkatkan ibadah harian: sholat lima waktu, tahajjud, dhuha, puasa sunnah, \
         doa, zikir, sholawat dan tilawah Al-Quran dengan konsisten dan khusyuk. \
         I want to improve my daily worship: prayer, fasting, Quran recitation, morning and \
         evening adhkar, dhikr and preparing for Ramadan.",
    ),
    (
        "mental_health",
        "Saya sedang berduka, sedih, cemas, gelisah, overthinking, stres dan burnout. Saya butuh \
         ketenangan batin dan ingin sembuh dari trauma dan luka batin. \
         I am grieving a loss, struggling with anxiety, stress, loneliness and depression, and \
         I need inner peace and emotional healing.",
    ),
    (
        "productivity",
        "Saya ingin sukses dan kaya secara halal, produktif, disiplin mengatur waktu, fokus pada \
         karir dan bisnis, dan berhenti menunda pekerjaan. \
         I want to be productive and financially successful through halal means, manage my time, \
         stop procrastinating and reach my career goals as a Muslim professional.",
    ),
    (
        "marriage_family",
        "Saya ingin segera menikah dan mendapat jodoh yang sholeh, mempersiapkan taaruf, dan \
         memperbaiki hubungan dengan orang tua, suami, istri dan anak. \
         I want to find a righteous spouse, prepare for marriage, be a better parent and keep \
         harmony with my family and parents.",
    ),
    (
        "character_building",
        "Saya ingin memperbaiki akhlak, menjadi lebih sabar, syukur, jujur dan rendah hati, dan \
         menemukan jati diri sebagai Muslim. \
         I want to improve my character and morals, grow in humility, gratitude, sincerity, \
         self-control and integrity.",
    ),
    (
        "spiritual_growth",
        "Saya ingin bertaubat, hijrah, meninggalkan kebiasaan buruk, maksiat dan kecanduan, dan \
         kembali ke jalan yang benar. \
         I want to repent and seek Allah's forgiveness, overcome bad habits and addiction, \
         strengthen my iman and tawakkal and follow the sunnah.",
    ),
];

/// Domain keywords per category. A hit in any category counts as one match.
const PLATFORM_KEYWORDS: &[(&str, &[&str])] = &[
    ("islamic", &[
        "sholat", "doa", "ibadah", "quran", "tilawah", "zikir", "dhikr", "tahajjud", "dhuha",
        "sunnah", "islam", "muslim", "allah", "niat", "ikhlas", "taubat", "hijrah", "iman",
        "tawakkal", "dosa", "maksiat", "halal", "haram", "sholeh", "sholehah", "taaruf", "nikah",
        "pernikahan", "jodoh", "akhlaq", "akhlak", "adab", "istighfar", "forgiveness", "prayer",
        "worship", "spiritual", "faith", "prophet", "ramadan", "fasting", "hajj",
    ]),
    ("mental_health", &[
        "cemas", "gelisah", "khawatir", "worry", "anxiety", "stress", "sedih", "sad",
        "depression", "depresi", "trauma", "duka", "berduka", "grief", "heartbroken", "hancur",
        "terpuruk", "kehilangan", "meninggal", "wafat", "kesepian", "loneliness", "curhat",
        "burnout", "overthinking", "ketenangan", "peace", "inner", "healing", "sembuh", "batin",
        "jiwa",
    ]),
    ("productivity", &[
        "produktif", "produktivitas", "sukses", "successful", "kaya", "wealthy", "rezeki",
        "wealth", "bisnis", "business", "karir", "career", "kerja", "work", "entrepreneur",
        "waktu", "time", "fokus", "focus", "disiplin", "discipline", "kebiasaan", "habit",
        "tujuan", "goal", "efficient", "procrastination", "menunda",
    ]),
    ("relationships", &[
        "nikah", "menikah", "marriage", "jodoh", "pasangan", "spouse", "suami", "istri",
        "husband", "wife", "keluarga", "family", "orang tua", "parents", "anak", "children",
        "hubungan", "relationship", "taaruf", "keharmonisan", "harmony", "parenting",
    ]),
    ("character", &[
        "akhlaq", "akhlak", "karakter", "character", "diri", "self", "pertumbuhan", "growth",
        "pengembangan", "development", "perbaikan", "improvement", "sabar", "patience", "syukur",
        "gratitude", "rendah hati", "humble", "jujur", "honest", "ikhlas", "sincere", "amanah",
        "integrity", "identitas", "identity",
    ]),
    ("recovery", &[
        "taubat", "repentance", "hijrah", "berhenti", "stop", "kecanduan", "addiction",
        "maksiat", "sin", "dosa", "kebiasaan buruk", "bad habits", "memperbaiki", "improve",
        "kembali", "return", "jalan yang benar", "right path", "iman", "faith",
    ]),
];

/// The six guidance scopes the service answers for.
pub fn official_scopes() -> Vec<Scope> {
    OFFICIAL_SCOPES
        .iter()
        .map(|(name, description)| Scope::new(*name, *description))
        .collect()
}

/// Number of keyword categories with at least one substring hit in `text`.
pub fn keyword_categories_matched(text: &str) -> usize {
    let lower = text.to_lowercase();
    PLATFORM_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .count()
}

pub struct SemanticLayer {
    embedder: Arc<dyn EmbeddingProvider>,
    scopes: Vec<Scope>,
    scope_embeddings: OnceCell<Vec<Vec<f32>>>,
    threshold: f32,
    keyword_threshold: f32,
}

impl SemanticLayer {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, config: &PipelineConfig) -> Self {
        Self::with_scopes(embedder, config, official_scopes())
    }

    pub fn with_scopes(
        embedder: Arc<dyn EmbeddingProvider>,
        config: &PipelineConfig,
        scopes: Vec<Scope>,
    ) -> Self {
        SemanticLayer {
            embedder,
            scopes,
            scope_embeddings: OnceCell::new(),
            threshold: config.semantic_similarity_threshold,
            keyword_threshold: config.keyword_fallback_threshold,
        }
    }

    /// Embed the scope descriptions on first use.
    pub async fn scope_embeddings(&self) -> Result<&[Vec<f32>], EmbeddingError> {
        let embeddings = self
            .scope_embeddings
            .get_or_try_init(|| async {
                let texts: Vec<String> = self.scopes.iter().map(|s| s.description.clone()).collect();
                let embeddings = self.embedder.embed_batch(&texts).await?;
                if embeddings.len() != texts.len() {
                    return Err(EmbeddingError::Generation(format!(
                        "Expected {} scope embeddings, got {}",
                        texts.len(),
                        embeddings.len()
                    )));
                }
                tracing::info!(
                    scopes = texts.len(),
                    model = self.embedder.model_name(),
                    "Scope embeddings computed"
                );
                Ok(embeddings)
            })
            .await?;
        Ok(embeddings.as_slice())
    }

    fn out_of_scope() -> Rejection {
        Rejection::new(
            ErrorCode::OutOfScope,
            "Maaf, permintaanmu berada di luar jangkauan bimbingan Hala Journal.",
            "Sorry, your request is outside the scope of Hala Journal guidance.",
            "Try asking about spiritual habits, worship, mental health, or productivity.",
        )
    }
}

#[async_trait]
impl PipelineLayer for SemanticLayer {
    fn name(&self) -> &'static str {
        "semantic_validation"
    }

    fn order(&self) -> u8 {
        2
    }

    async fn process(&self, ctx: &mut PipelineContext) -> LayerOutcome {
        let scope_embeddings = match self.scope_embeddings().await {
            Ok(e) => e,
            Err(e) => return LayerOutcome::Failed(format!("Scope embeddings unavailable: {}", e)),
        };
        let input_embedding = match self.embedder.embed(&ctx.processed_input).await {
            Ok(e) => e,
            Err(e) => return LayerOutcome::Failed(format!("Failed to embed input: {}", e)),
        };

        let mut best: Option<(&str, f32)> = None;
        for (scope, embedding) in self.scopes.iter().zip(scope_embeddings) {
            let score = cosine_similarity(&input_embedding, embedding);
            ctx.semantic_scores.insert(scope.name.clone(), score);
            if best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((scope.name.as_str(), score));
            }
        }

        let Some((scope, score)) = best else {
            return LayerOutcome::Rejected(Self::out_of_scope());
        };

        tracing::debug!(request_id = %ctx.request_id, scope, score, "Best scope match");

        if score < self.threshold {
            return LayerOutcome::Rejected(Self::out_of_scope());
        }
        if score < self.keyword_threshold && keyword_categories_matched(&ctx.processed_input) == 0 {
            return LayerOutcome::Rejected(Self::out_of_scope());
        }

        ctx.detected_scope = Some(scope.to_string());
        LayerOutcome::Passed
    }
}
