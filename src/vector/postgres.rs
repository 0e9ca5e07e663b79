/// pgvector-backed implementation of VectorStore
///
/// Documents are stored in `vector_documents` with a `vector` column and searched
/// with the cosine distance operator `<=>`. Metadata filters use JSONB `@>`.
/// Sync watermarks live in `sync_state`. Schema is created by embedded migrations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPool, PgPoolOptions},
    Row,
};
use std::time::Duration;

use super::{CollectionStats, MetadataFilter, ScoredDocument, VectorDocument, VectorStore};
use crate::errors::HalaError;

pub struct PgVectorStore {
    pool: PgPool,
}

impl PgVectorStore {
    /// Connect to the vector database. If run_migrations is true, pending
    /// migrations are applied before returning.
    pub async fn new(database_url: &str, run_migrations: bool) -> Result<Self, HalaError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await
            .map_err(|e| HalaError::Storage(format!("Failed to connect to vector database: {}", e)))?;

        let store = PgVectorStore { pool };
        if run_migrations {
            store.migrate().await?;
        }
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        PgVectorStore { pool }
    }

    /// Apply embedded migrations.
    pub async fn migrate(&self) -> Result<(), HalaError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn storage(e: sqlx::Error) -> HalaError {
    HalaError::Storage(e.to_string())
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn upsert(&self, document: VectorDocument) -> Result<(), HalaError> {
        if document.embedding.is_empty() {
            return Err(HalaError::validation("embedding", "Embedding must not be empty"));
        }
        let embedding = ::pgvector::Vector::from(document.embedding);

        sqlx::query(
            "INSERT INTO vector_documents \
             (collection, id, text, metadata, embedding, model, source_updated_at, synced_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, now()) \
             ON CONFLICT (collection, id) DO UPDATE SET \
             text = EXCLUDED.text, metadata = EXCLUDED.metadata, embedding = EXCLUDED.embedding, \
             model = EXCLUDED.model, source_updated_at = EXCLUDED.source_updated_at, synced_at = now()",
        )
        .bind(&document.collection)
        .bind(&document.id)
        .bind(&document.text)
        .bind(&document.metadata)
        .bind(&embedding)
        .bind(&document.model)
        .bind(document.source_updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| HalaError::Storage(format!("Failed to upsert document {}: {}", document.id, e)))?;

        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, HalaError> {
        let result = sqlx::query("DELETE FROM vector_documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| HalaError::Storage(format!("Failed to delete document {}: {}", id, e)))?;
        Ok(result.rows_affected() > 0)
    }

    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredDocument>, HalaError> {
        let query_vec = ::pgvector::Vector::from(embedding.to_vec());
        let filter_json = filter
            .map(|f| f.to_json())
            .unwrap_or_else(|| serde_json::json!({}));

        let rows = sqlx::query(
            "SELECT id, text, metadata, (embedding <=> $1)::float8 AS distance \
             FROM vector_documents \
             WHERE collection = $2 AND metadata @> $3 \
             ORDER BY embedding <=> $1 \
             LIMIT $4",
        )
        .bind(&query_vec)
        .bind(collection)
        .bind(&filter_json)
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HalaError::Storage(format!("Vector search failed: {}", e)))?;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            results.push(ScoredDocument {
                id: row.try_get("id").map_err(storage)?,
                text: row.try_get("text").map_err(storage)?,
                metadata: row.try_get("metadata").map_err(storage)?,
                distance: row.try_get("distance").map_err(storage)?,
            });
        }
        Ok(results)
    }

    async fn count(&self, collection: &str) -> Result<u64, HalaError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM vector_documents WHERE collection = $1")
            .bind(collection)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| HalaError::Storage(format!("Failed to count documents: {}", e)))?;
        let count: i64 = row.try_get("count").map_err(storage)?;
        Ok(count as u64)
    }

    async fn clear(&self, collection: &str) -> Result<u64, HalaError> {
        let result = sqlx::query("DELETE FROM vector_documents WHERE collection = $1")
            .bind(collection)
            .execute(&self.pool)
            .await
            .map_err(|e| HalaError::Storage(format!("Failed to clear collection {}: {}", collection, e)))?;
        Ok(result.rows_affected())
    }

    async fn watermark(&self, collection: &str) -> Result<Option<DateTime<Utc>>, HalaError> {
        let row = sqlx::query("SELECT watermark FROM sync_state WHERE collection = $1")
            .bind(collection)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| HalaError::Storage(format!("Failed to read watermark: {}", e)))?;
        match row {
            Some(row) => row.try_get("watermark").map_err(storage),
            None => Ok(None),
        }
    }

    async fn save_watermark(
        &self,
        collection: &str,
        watermark: Option<DateTime<Utc>>,
        stats: &serde_json::Value,
    ) -> Result<(), HalaError> {
        sqlx::query(
            "INSERT INTO sync_state (collection, watermark, last_run_at, last_stats) \
             VALUES ($1, $2, now(), $3) \
             ON CONFLICT (collection) DO UPDATE SET \
             watermark = EXCLUDED.watermark, last_run_at = now(), last_stats = EXCLUDED.last_stats",
        )
        .bind(collection)
        .bind(watermark)
        .bind(stats)
        .execute(&self.pool)
        .await
        .map_err(|e| HalaError::Storage(format!("Failed to save watermark: {}", e)))?;
        Ok(())
    }

    async fn stats(&self, collection: &str) -> Result<CollectionStats, HalaError> {
        let documents = self.count(collection).await?;
        let row = sqlx::query("SELECT watermark, last_run_at FROM sync_state WHERE collection = $1")
            .bind(collection)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| HalaError::Storage(format!("Failed to read sync state: {}", e)))?;

        let (watermark, last_run_at) = match row {
            Some(row) => (
                row.try_get("watermark").map_err(storage)?,
                Some(row.try_get("last_run_at").map_err(storage)?),
            ),
            None => (None, None),
        };

        Ok(CollectionStats {
            collection: collection.to_string(),
            documents,
            watermark,
            last_run_at,
        })
    }
}
