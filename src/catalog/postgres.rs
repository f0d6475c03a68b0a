use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{Json, ToSql};
use tokio_postgres::Row;
use uuid::Uuid;

use super::query::{contains_pattern, Predicate};
use super::store::{CatalogStore, EntryEdit};
use super::{Description, MediaEntry, MediaType};
use crate::database::PgPool;
use crate::error::MediaError;

type BoxedParam = Box<dyn ToSql + Sync + Send>;

const SELECT_COLUMNS: &str = "id, url, media_type, filename, size, mimetype, descriptions, \
                              is_added_to_library, created_at, updated_at";

pub struct PgCatalogStore {
    pool: Arc<PgPool>,
}

impl PgCatalogStore {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn initialize_schema(&self) -> Result<(), MediaError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        client
            .batch_execute(
                r"
                CREATE TABLE IF NOT EXISTS media (
                    id UUID PRIMARY KEY,
                    url TEXT NOT NULL UNIQUE,
                    media_type TEXT NOT NULL,
                    filename TEXT NOT NULL DEFAULT '',
                    size BIGINT NOT NULL DEFAULT 0,
                    mimetype TEXT NOT NULL DEFAULT '',
                    descriptions JSONB NOT NULL DEFAULT '[]'::jsonb,
                    is_added_to_library BOOLEAN NOT NULL DEFAULT TRUE,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );
                CREATE INDEX IF NOT EXISTS media_created_at_idx ON media (created_at DESC);
                ",
            )
            .await
            .map_err(query_error)?;
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn insert(&self, entry: &MediaEntry) -> Result<bool, MediaError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let inserted = client
            .execute(
                r"
                INSERT INTO media (id, url, media_type, filename, size, mimetype, descriptions,
                                   is_added_to_library, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (url) DO NOTHING
                ",
                &[
                    &entry.id,
                    &entry.url,
                    &entry.media_type.as_str(),
                    &entry.filename,
                    &entry.size,
                    &entry.mimetype,
                    &Json(&entry.descriptions),
                    &entry.is_added_to_library,
                    &entry.created_at,
                    &entry.updated_at,
                ],
            )
            .await
            .map_err(query_error)?;
        Ok(inserted == 1)
    }

    async fn update_with(
        &self,
        id: Uuid,
        edit: &EntryEdit<'_>,
    ) -> Result<Option<MediaEntry>, MediaError> {
        let mut client = self.pool.get().await.map_err(pool_error)?;
        let tx = client.transaction().await.map_err(query_error)?;

        // The row lock serializes concurrent edits of the same entry.
        let Some(row) = tx
            .query_opt(
                &format!("SELECT {SELECT_COLUMNS} FROM media WHERE id = $1 FOR UPDATE"),
                &[&id],
            )
            .await
            .map_err(query_error)?
        else {
            return Ok(None);
        };
        let current = entry_from_row(&row)?;
        let mut entry = current.clone();
        if !edit(&mut entry)? {
            return Ok(Some(current));
        }
        entry.updated_at = Utc::now();

        tx.execute(
            r"
            UPDATE media
            SET url = $2, media_type = $3, filename = $4, size = $5, mimetype = $6,
                descriptions = $7, is_added_to_library = $8, updated_at = $9
            WHERE id = $1
            ",
            &[
                &entry.id,
                &entry.url,
                &entry.media_type.as_str(),
                &entry.filename,
                &entry.size,
                &entry.mimetype,
                &Json(&entry.descriptions),
                &entry.is_added_to_library,
                &entry.updated_at,
            ],
        )
        .await
        .map_err(|err| {
            if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                MediaError::validation(format!("url {} is already catalogued", entry.url))
            } else {
                query_error(err)
            }
        })?;
        tx.commit().await.map_err(query_error)?;
        Ok(Some(entry))
    }

    async fn get(&self, id: Uuid) -> Result<Option<MediaEntry>, MediaError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_opt(
                &format!("SELECT {SELECT_COLUMNS} FROM media WHERE id = $1"),
                &[&id],
            )
            .await
            .map_err(query_error)?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn find(
        &self,
        filter: &Predicate,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<MediaEntry>, MediaError> {
        let mut sql = SqlWhere::default();
        let clause = sql.clause(filter);
        let offset = sql.bind(i64::try_from(skip).unwrap_or(i64::MAX));
        let limit = sql.bind(i64::try_from(limit).unwrap_or(i64::MAX));
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM media WHERE {clause} \
             ORDER BY created_at DESC, id OFFSET {offset} LIMIT {limit}"
        );

        let client = self.pool.get().await.map_err(pool_error)?;
        let rows = client
            .query(&query, &sql.param_refs())
            .await
            .map_err(query_error)?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn count(&self, filter: &Predicate) -> Result<u64, MediaError> {
        let mut sql = SqlWhere::default();
        let clause = sql.clause(filter);
        let query = format!("SELECT COUNT(*) FROM media WHERE {clause}");

        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_one(&query, &sql.param_refs())
            .await
            .map_err(query_error)?;
        let count: i64 = row.get(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn delete(&self, id: Uuid) -> Result<Option<MediaEntry>, MediaError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_opt(
                &format!("DELETE FROM media WHERE id = $1 RETURNING {SELECT_COLUMNS}"),
                &[&id],
            )
            .await
            .map_err(query_error)?;
        row.as_ref().map(entry_from_row).transpose()
    }
}

/// Positional-parameter WHERE clause built from a [`Predicate`].
#[derive(Default)]
struct SqlWhere {
    params: Vec<BoxedParam>,
}

impl SqlWhere {
    fn bind<T: ToSql + Sync + Send + 'static>(&mut self, value: T) -> String {
        self.params.push(Box::new(value));
        format!("${}", self.params.len())
    }

    fn clause(&mut self, predicate: &Predicate) -> String {
        match predicate {
            Predicate::All => "TRUE".to_string(),
            Predicate::UrlEq(url) => format!("url = {}", self.bind(url.clone())),
            Predicate::UrlIn(urls) if urls.is_empty() => "FALSE".to_string(),
            Predicate::UrlIn(urls) => format!("url = ANY({})", self.bind(urls.clone())),
            Predicate::TypeEq(t) => {
                format!("media_type = {}", self.bind(t.as_str().to_string()))
            }
            Predicate::FilenameEq(name) => format!("filename = {}", self.bind(name.clone())),
            Predicate::MimeTypeEq(mime) => format!("mimetype = {}", self.bind(mime.clone())),
            Predicate::AddedToLibrary(flag) => {
                format!("is_added_to_library = {}", self.bind(*flag))
            }
            Predicate::DescriptionContains(keyword) => format!(
                "EXISTS (SELECT 1 FROM jsonb_array_elements(descriptions) AS d \
                 WHERE d->>'text' ILIKE {} ESCAPE '\\')",
                self.bind(contains_pattern(keyword))
            ),
            Predicate::And(parts) if parts.is_empty() => "TRUE".to_string(),
            Predicate::Or(parts) if parts.is_empty() => "FALSE".to_string(),
            Predicate::And(parts) => self.join(parts, " AND "),
            Predicate::Or(parts) => self.join(parts, " OR "),
        }
    }

    fn join(&mut self, parts: &[Predicate], op: &str) -> String {
        let clauses: Vec<String> = parts.iter().map(|p| self.clause(p)).collect();
        format!("({})", clauses.join(op))
    }

    fn param_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect()
    }
}

fn entry_from_row(row: &Row) -> Result<MediaEntry, MediaError> {
    let media_type: String = row.get("media_type");
    let Json(descriptions): Json<Vec<Description>> = row.get("descriptions");
    Ok(MediaEntry {
        id: row.get("id"),
        url: row.get("url"),
        media_type: MediaType::parse(&media_type).map_err(|_| {
            MediaError::CatalogUnavailable(format!("stored media_type {media_type:?} is unknown"))
        })?,
        filename: row.get("filename"),
        size: row.get("size"),
        mimetype: row.get("mimetype"),
        descriptions,
        is_added_to_library: row.get("is_added_to_library"),
        created_at: row.get::<_, DateTime<Utc>>("created_at"),
        updated_at: row.get::<_, DateTime<Utc>>("updated_at"),
    })
}

fn pool_error(err: impl std::fmt::Display) -> MediaError {
    MediaError::CatalogUnavailable(format!("failed to get a pooled connection: {err}"))
}

fn query_error(err: tokio_postgres::Error) -> MediaError {
    MediaError::CatalogUnavailable(format!("query failed: {err}"))
}
