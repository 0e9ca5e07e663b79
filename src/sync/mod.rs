/// Source database -> vector store synchronization.
///
/// Full runs clear each collection and re-embed every live row. Incremental runs
/// read rows changed after the collection's watermark, upsert live ones and drop
/// ones that moved into an excluded status. A failing record is counted and
/// skipped; it does not abort the run and is picked up again next time because
/// the watermark never moves past it.

pub mod document;

use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::SyncConfig;
use crate::embedding::EmbeddingProvider;
use crate::errors::HalaError;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::source::SourceStore;
use crate::vector::{CollectionStats, VectorDocument, VectorStore, JOURNEY_TEMPLATES, KNOWLEDGE_REFERENCES};

pub use document::SyncRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Full,
    Incremental,
}

impl std::str::FromStr for SyncMode {
    type Err = HalaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "full" => Ok(SyncMode::Full),
            "incremental" => Ok(SyncMode::Incremental),
            other => Err(HalaError::validation(
                "mode",
                &format!("Unknown sync mode '{}', expected 'full' or 'incremental'", other),
            )),
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Full => write!(f, "full"),
            SyncMode::Incremental => write!(f, "incremental"),
        }
    }
}

/// Outcome of one sync run across both collections.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStats {
    pub mode: SyncMode,
    pub knowledge_references_synced: u64,
    pub journey_templates_synced: u64,
    /// Documents deleted because their source row became excluded or disappeared
    pub removed: u64,
    pub errors: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

/// Outcome of syncing a single record by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSyncOutcome {
    Upserted,
    Removed,
    NotFound,
}

/// Per-collection tally.
#[derive(Debug, Default)]
struct CollectionRun {
    synced: u64,
    removed: u64,
    errors: u64,
}

/// Newest timestamp that is safe to resume from.
///
/// `updated` must be in processing (ascending) order. Everything strictly older
/// than the first failed row is known to be synced; with no failure every row is.
/// Never moves backwards from `previous`.
pub fn compute_watermark(
    previous: Option<DateTime<Utc>>,
    updated: &[DateTime<Utc>],
    first_failed: Option<usize>,
) -> Option<DateTime<Utc>> {
    let cutoff = first_failed.and_then(|i| updated.get(i).copied());
    let newest = updated
        .iter()
        .copied()
        .filter(|ts| cutoff.map(|c| *ts < c).unwrap_or(true))
        .max();

    match (previous, newest) {
        (Some(p), Some(n)) => Some(p.max(n)),
        (p, n) => p.or(n),
    }
}

pub struct SyncService {
    source: Arc<dyn SourceStore>,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
    progress: ProgressBar,
}

impl SyncService {
    pub fn new(
        source: Arc<dyn SourceStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &SyncConfig,
    ) -> Self {
        SyncService {
            source,
            vectors,
            embedder,
            retry: RetryPolicy::new(config.max_retries, Duration::from_millis(config.retry_base_delay_ms)),
            progress: ProgressBar::hidden(),
        }
    }

    /// Report per-record progress on the given bar.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn source(&self) -> &Arc<dyn SourceStore> {
        &self.source
    }

    /// Sync both collections.
    pub async fn sync_all(&self, mode: SyncMode) -> Result<SyncStats, HalaError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        tracing::info!(mode = %mode, "Starting sync");

        let knowledge = match self.fetch_knowledge(mode).await {
            Ok(rows) => self.sync_collection(rows, mode).await?,
            Err(e) => {
                tracing::error!(collection = KNOWLEDGE_REFERENCES, error = %e, "Failed to read source rows");
                CollectionRun { errors: 1, ..CollectionRun::default() }
            }
        };

        let templates = match self.fetch_templates(mode).await {
            Ok(rows) => self.sync_collection(rows, mode).await?,
            Err(e) => {
                tracing::error!(collection = JOURNEY_TEMPLATES, error = %e, "Failed to read source rows");
                CollectionRun { errors: 1, ..CollectionRun::default() }
            }
        };

        let stats = SyncStats {
            mode,
            knowledge_references_synced: knowledge.synced,
            journey_templates_synced: templates.synced,
            removed: knowledge.removed + templates.removed,
            errors: knowledge.errors + templates.errors,
            started_at,
            finished_at: Utc::now(),
            duration_seconds: clock.elapsed().as_secs_f64(),
        };

        tracing::info!(
            mode = %mode,
            knowledge_references = stats.knowledge_references_synced,
            journey_templates = stats.journey_templates_synced,
            removed = stats.removed,
            errors = stats.errors,
            duration_seconds = stats.duration_seconds,
            "Sync finished"
        );
        Ok(stats)
    }

    async fn fetch_knowledge(&self, mode: SyncMode) -> Result<Vec<crate::source::KnowledgeReference>, HalaError> {
        match mode {
            SyncMode::Full => self.source.knowledge_references(None, false).await,
            SyncMode::Incremental => {
                let since = self.vectors.watermark(KNOWLEDGE_REFERENCES).await?;
                self.source.knowledge_references(since, true).await
            }
        }
    }

    async fn fetch_templates(&self, mode: SyncMode) -> Result<Vec<crate::source::JourneyTemplate>, HalaError> {
        match mode {
            SyncMode::Full => self.source.journey_templates(None, false).await,
            SyncMode::Incremental => {
                let since = self.vectors.watermark(JOURNEY_TEMPLATES).await?;
                self.source.journey_templates(since, true).await
            }
        }
    }

    /// Write `rows` into their collection and advance its watermark.
    ///
    /// Only vector store bookkeeping failures (clear, watermark) abort the run.
    async fn sync_collection<R: SyncRecord>(&self, mut rows: Vec<R>, mode: SyncMode) -> Result<CollectionRun, HalaError> {
        let collection = R::COLLECTION;
        rows.sort_by(|a, b| a.updated_at().cmp(&b.updated_at()).then_with(|| a.record_id().cmp(b.record_id())));

        let previous = match mode {
            SyncMode::Full => {
                let cleared = self.vectors.clear(collection).await?;
                tracing::info!(collection, cleared, "Cleared collection for full sync");
                None
            }
            SyncMode::Incremental => self.vectors.watermark(collection).await?,
        };

        self.progress.set_length(rows.len() as u64);
        self.progress.set_position(0);

        let mut run = CollectionRun::default();
        let mut first_failed = None;

        for (index, row) in rows.iter().enumerate() {
            self.progress.set_message(format!("{} {}", collection, row.record_id()));

            let result = if row.is_excluded() {
                self.remove_record(collection, row.record_id()).await.map(|existed| {
                    if existed {
                        run.removed += 1;
                    }
                })
            } else {
                self.upsert_record(row).await.map(|_| run.synced += 1)
            };

            if let Err(e) = result {
                tracing::warn!(collection, record_id = %row.record_id(), error = %e, "Failed to sync record");
                run.errors += 1;
                first_failed.get_or_insert(index);
            }
            self.progress.inc(1);
        }

        let updated: Vec<DateTime<Utc>> = rows.iter().map(|r| r.updated_at()).collect();
        let watermark = compute_watermark(previous, &updated, first_failed);
        let run_stats = serde_json::json!({
            "mode": mode,
            "synced": run.synced,
            "removed": run.removed,
            "errors": run.errors,
        });
        self.vectors.save_watermark(collection, watermark, &run_stats).await?;

        tracing::info!(
            collection,
            synced = run.synced,
            removed = run.removed,
            errors = run.errors,
            watermark = ?watermark,
            "Collection synced"
        );
        Ok(run)
    }

    /// Embed and upsert one record, retrying each step with backoff.
    async fn upsert_record<R: SyncRecord>(&self, record: &R) -> Result<(), HalaError> {
        let text = record.searchable_text();
        if text.is_empty() {
            return Err(HalaError::validation("text", "Record has no searchable text"));
        }
        let metadata = record.metadata()?;

        let embedding = retry_with_backoff(self.retry, "embed", |_| true, |_| self.embedder.embed(&text))
            .await
            .map_err(HalaError::from)?;

        let document = VectorDocument {
            collection: R::COLLECTION.to_string(),
            id: record.record_id().to_string(),
            text: text.clone(),
            metadata,
            embedding,
            model: self.embedder.model_name().to_string(),
            source_updated_at: Some(record.updated_at()),
        };

        retry_with_backoff(self.retry, "upsert", |_| true, |_| self.vectors.upsert(document.clone())).await
    }

    async fn remove_record(&self, collection: &str, id: &str) -> Result<bool, HalaError> {
        retry_with_backoff(self.retry, "delete", |_| true, |_| self.vectors.delete(collection, id)).await
    }

    async fn sync_one<R: SyncRecord>(&self, id: &str, record: Option<R>) -> Result<RecordSyncOutcome, HalaError> {
        let outcome = match record {
            Some(r) if !r.is_excluded() => {
                self.upsert_record(&r).await?;
                RecordSyncOutcome::Upserted
            }
            Some(_) => {
                self.remove_record(R::COLLECTION, id).await?;
                RecordSyncOutcome::Removed
            }
            None => {
                if self.remove_record(R::COLLECTION, id).await? {
                    RecordSyncOutcome::Removed
                } else {
                    RecordSyncOutcome::NotFound
                }
            }
        };
        tracing::info!(collection = R::COLLECTION, record_id = %id, outcome = ?outcome, "Record synced");
        Ok(outcome)
    }

    /// Sync one KnowledgeReference by id. Does not touch the watermark.
    pub async fn sync_knowledge_reference(&self, id: &str) -> Result<RecordSyncOutcome, HalaError> {
        let record = self.source.knowledge_reference(id).await?;
        self.sync_one(id, record).await
    }

    /// Sync one JourneyTemplate by id. Does not touch the watermark.
    pub async fn sync_journey_template(&self, id: &str) -> Result<RecordSyncOutcome, HalaError> {
        let record = self.source.journey_template(id).await?;
        self.sync_one(id, record).await
    }

    /// Document counts and sync bookkeeping for both collections.
    pub async fn collection_stats(&self) -> Result<Vec<CollectionStats>, HalaError> {
        Ok(vec![
            self.vectors.stats(KNOWLEDGE_REFERENCES).await?,
            self.vectors.stats(JOURNEY_TEMPLATES).await?,
        ])
    }

    /// Run an incremental sync every `every` until `shutdown` resolves.
    ///
    /// Failed runs are logged and retried on the next tick.
    pub async fn watch<F>(&self, every: Duration, shutdown: F) -> Result<(), HalaError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_secs = every.as_secs(), "Watching for source changes");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Sync watcher received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sync_all(SyncMode::Incremental).await {
                        tracing::error!(error = %e, "Incremental sync failed");
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_watermark_advances_to_newest_when_all_succeed() {
        assert_eq!(compute_watermark(Some(ts(1)), &[ts(2), ts(3), ts(5)], None), Some(ts(5)));
    }

    #[test]
    fn test_watermark_unchanged_without_rows() {
        assert_eq!(compute_watermark(Some(ts(4)), &[], None), Some(ts(4)));
        assert_eq!(compute_watermark(None, &[], None), None);
    }

    #[test]
    fn test_watermark_stops_before_first_failure() {
        assert_eq!(compute_watermark(Some(ts(1)), &[ts(2), ts(3), ts(5)], Some(1)), Some(ts(2)));
    }

    #[test]
    fn test_watermark_excludes_rows_sharing_failed_timestamp() {
        // rows 0 and 1 share a timestamp; row 1 failed so neither may be skipped next time
        assert_eq!(compute_watermark(Some(ts(1)), &[ts(3), ts(3), ts(4)], Some(1)), Some(ts(1)));
    }

    #[test]
    fn test_watermark_first_row_failed_keeps_previous() {
        assert_eq!(compute_watermark(Some(ts(1)), &[ts(2), ts(3)], Some(0)), Some(ts(1)));
        assert_eq!(compute_watermark(None, &[ts(2), ts(3)], Some(0)), None);
    }

    #[test]
    fn test_sync_mode_display_and_serde() {
        assert_eq!(SyncMode::Incremental.to_string(), "incremental");
        assert_eq!(serde_json::to_string(&SyncMode::Full).unwrap(), "\"full\"");
        assert_eq!(serde_json::to_string(&RecordSyncOutcome::NotFound).unwrap(), "\"not_found\"");
    }

    #[test]
    fn test_sync_mode_from_str() {
        assert_eq!("Full".parse::<SyncMode>().unwrap(), SyncMode::Full);
        assert_eq!(" incremental ".parse::<SyncMode>().unwrap(), SyncMode::Incremental);
        assert!(matches!("weekly".parse::<SyncMode>(), Err(HalaError::Validation { .. })));
    }
}
