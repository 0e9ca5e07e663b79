/// PostgreSQL-backed implementation of SourceStore
///
/// Reads the application's "KnowledgeReference" and "JourneyTemplate" tables.
/// Enum and timestamp columns are cast in SQL so rows map onto plain Rust types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPool, PgPoolOptions, PgRow},
    Row,
};
use std::time::Duration;

use crate::errors::HalaError;
use crate::source::{
    JourneyTemplate, KnowledgeReference, LocalizedText, SourceStore, KNOWLEDGE_EXCLUDED_STATUSES,
    TEMPLATE_EXCLUDED_STATUSES,
};

const KNOWLEDGE_COLUMNS: &str = r#"
    id::text AS id,
    category::text AS category,
    source,
    title::text AS title,
    content::text AS content,
    "contentAr" AS content_ar,
    COALESCE(tags, ARRAY[]::text[]) AS tags,
    COALESCE(language::text, 'id') AS language,
    status::text AS status,
    "createdAt"::timestamptz AS created_at,
    "updatedAt"::timestamptz AS updated_at
"#;

const TEMPLATE_COLUMNS: &str = r#"
    id::text AS id,
    goal_keyword,
    COALESCE(tags, ARRAY[]::text[]) AS tags,
    COALESCE(language::text, 'id') AS language,
    COALESCE(full_json::jsonb, '{}'::jsonb) AS full_json,
    status::text AS status,
    COALESCE(is_active, TRUE) AS is_active,
    COALESCE(match_count, 0)::int AS match_count,
    "createdAt"::timestamptz AS created_at,
    "updatedAt"::timestamptz AS updated_at
"#;

/// Read-only access to the application database.
pub struct PgSourceStore {
    pool: PgPool,
    language: Option<String>,
}

impl PgSourceStore {
    /// Connect to the source database.
    ///
    /// `language` restricts list queries to rows in that language.
    pub async fn connect(database_url: &str, language: Option<String>) -> Result<Self, HalaError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await
            .map_err(|e| HalaError::Storage(format!("Failed to connect to source database: {}", e)))?;

        Ok(PgSourceStore { pool, language })
    }

    pub fn from_pool(pool: PgPool, language: Option<String>) -> Self {
        PgSourceStore { pool, language }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_rows(
        &self,
        table: &str,
        columns: &str,
        excluded: &[&str],
        since: Option<DateTime<Utc>>,
        include_excluded: bool,
    ) -> Result<Vec<PgRow>, HalaError> {
        let (sql, bind_since, bind_language) =
            build_list_query(table, columns, excluded, since.is_some(), self.language.is_some(), include_excluded);

        let mut query = sqlx::query(&sql);
        if bind_since {
            query = query.bind(since);
        }
        if bind_language {
            query = query.bind(self.language.as_deref());
        }

        query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| HalaError::Storage(format!("Failed to read {}: {}", table, e)))
    }
}

/// Build a list query with `$n` placeholders for the optional filters.
///
/// Returns the SQL plus whether the since/language parameters must be bound, in that order.
fn build_list_query(
    table: &str,
    columns: &str,
    excluded: &[&str],
    has_since: bool,
    has_language: bool,
    include_excluded: bool,
) -> (String, bool, bool) {
    let mut sql = format!("SELECT {} FROM \"{}\" WHERE TRUE", columns, table);
    let mut param = 0;

    if !include_excluded && !excluded.is_empty() {
        let list = excluded
            .iter()
            .map(|s| format!("'{}'", s))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(" AND UPPER(status::text) NOT IN ({})", list));
    }
    if has_since {
        param += 1;
        sql.push_str(&format!(" AND \"updatedAt\"::timestamptz > ${}", param));
    }
    if has_language {
        param += 1;
        sql.push_str(&format!(" AND language::text = ${}", param));
    }
    sql.push_str(" ORDER BY \"updatedAt\" ASC, id ASC");

    (sql, has_since, has_language)
}

fn storage(e: sqlx::Error) -> HalaError {
    HalaError::Storage(e.to_string())
}

/// Map a sqlx PgRow to a KnowledgeReference.
fn row_to_knowledge(row: &PgRow) -> Result<KnowledgeReference, HalaError> {
    let language: String = row.try_get("language").map_err(storage)?;
    let title: Option<String> = row.try_get("title").map_err(storage)?;
    let content: Option<String> = row.try_get("content").map_err(storage)?;

    Ok(KnowledgeReference {
        id: row.try_get("id").map_err(storage)?,
        category: row.try_get("category").map_err(storage)?,
        source: row.try_get("source").map_err(storage)?,
        title: LocalizedText::parse(title.as_deref().unwrap_or(""), &language),
        content: LocalizedText::parse(content.as_deref().unwrap_or(""), &language),
        content_ar: row.try_get("content_ar").map_err(storage)?,
        tags: row.try_get("tags").map_err(storage)?,
        status: row.try_get("status").map_err(storage)?,
        created_at: row.try_get("created_at").map_err(storage)?,
        updated_at: row.try_get("updated_at").map_err(storage)?,
        language,
    })
}

/// Map a sqlx PgRow to a JourneyTemplate.
fn row_to_template(row: &PgRow) -> Result<JourneyTemplate, HalaError> {
    Ok(JourneyTemplate {
        id: row.try_get("id").map_err(storage)?,
        goal_keyword: row.try_get("goal_keyword").map_err(storage)?,
        tags: row.try_get("tags").map_err(storage)?,
        language: row.try_get("language").map_err(storage)?,
        full_json: row.try_get("full_json").map_err(storage)?,
        status: row.try_get("status").map_err(storage)?,
        is_active: row.try_get("is_active").map_err(storage)?,
        match_count: row.try_get("match_count").map_err(storage)?,
        created_at: row.try_get("created_at").map_err(storage)?,
        updated_at: row.try_get("updated_at").map_err(storage)?,
    })
}

#[async_trait]
impl SourceStore for PgSourceStore {
    async fn knowledge_references(
        &self,
        since: Option<DateTime<Utc>>,
        include_excluded: bool,
    ) -> Result<Vec<KnowledgeReference>, HalaError> {
        let rows = self
            .fetch_rows("KnowledgeReference", KNOWLEDGE_COLUMNS, &KNOWLEDGE_EXCLUDED_STATUSES, since, include_excluded)
            .await?;
        rows.iter().map(row_to_knowledge).collect()
    }

    async fn knowledge_reference(&self, id: &str) -> Result<Option<KnowledgeReference>, HalaError> {
        let sql = format!("SELECT {} FROM \"KnowledgeReference\" WHERE id::text = $1", KNOWLEDGE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| HalaError::Storage(format!("Failed to read KnowledgeReference {}: {}", id, e)))?;
        row.as_ref().map(row_to_knowledge).transpose()
    }

    async fn journey_templates(
        &self,
        since: Option<DateTime<Utc>>,
        include_excluded: bool,
    ) -> Result<Vec<JourneyTemplate>, HalaError> {
        let rows = self
            .fetch_rows("JourneyTemplate", TEMPLATE_COLUMNS, &TEMPLATE_EXCLUDED_STATUSES, since, include_excluded)
            .await?;
        rows.iter().map(row_to_template).collect()
    }

    async fn journey_template(&self, id: &str) -> Result<Option<JourneyTemplate>, HalaError> {
        let sql = format!("SELECT {} FROM \"JourneyTemplate\" WHERE id::text = $1", TEMPLATE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| HalaError::Storage(format!("Failed to read JourneyTemplate {}: {}", id, e)))?;
        row.as_ref().map(row_to_template).transpose()
    }

    async fn ping(&self) -> Result<(), HalaError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| HalaError::Storage(format!("Source database unreachable: {}", e)))?;
        Ok(())
    }
}
