//! Persistence seam for the media catalog.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::query::Predicate;
use super::MediaEntry;
use crate::error::MediaError;

/// In-place edit of one entry, run while the store holds it exclusively.
/// Returns whether anything changed; an error aborts the edit and leaves the
/// stored entry untouched.
pub type EntryEdit<'a> = dyn Fn(&mut MediaEntry) -> Result<bool, MediaError> + Send + Sync + 'a;

/// Document-style storage for [`MediaEntry`] rows. Each call is atomic per
/// entry; `url` is unique.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Insert `entry`. Returns `false` (and stores nothing) when its URL is
    /// already present.
    async fn insert(&self, entry: &MediaEntry) -> Result<bool, MediaError>;

    /// Apply `edit` to the entry with `id` as one atomic read-modify-write and
    /// return the result. A changed entry gets a fresh `updated_at`; `None`
    /// when the entry is gone.
    async fn update_with(
        &self,
        id: Uuid,
        edit: &EntryEdit<'_>,
    ) -> Result<Option<MediaEntry>, MediaError>;

    async fn get(&self, id: Uuid) -> Result<Option<MediaEntry>, MediaError>;

    /// Matching entries, newest `created_at` first.
    async fn find(
        &self,
        filter: &Predicate,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<MediaEntry>, MediaError>;

    async fn count(&self, filter: &Predicate) -> Result<u64, MediaError>;

    /// Remove and return the entry.
    async fn delete(&self, id: Uuid) -> Result<Option<MediaEntry>, MediaError>;
}

/// Process-local store, used by tests and for running without a database.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<Uuid, MediaEntry>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn insert(&self, entry: &MediaEntry) -> Result<bool, MediaError> {
        let mut entries = self.entries.write().await;
        if entries.values().any(|e| e.url == entry.url) {
            return Ok(false);
        }
        entries.insert(entry.id, entry.clone());
        Ok(true)
    }

    async fn update_with(
        &self,
        id: Uuid,
        edit: &EntryEdit<'_>,
    ) -> Result<Option<MediaEntry>, MediaError> {
        let mut entries = self.entries.write().await;
        let Some(current) = entries.get(&id) else {
            return Ok(None);
        };
        let mut entry = current.clone();
        if !edit(&mut entry)? {
            return Ok(Some(current.clone()));
        }
        if entries.values().any(|e| e.url == entry.url && e.id != id) {
            return Err(MediaError::validation(format!(
                "url {} is already catalogued",
                entry.url
            )));
        }
        entry.updated_at = Utc::now();
        entries.insert(id, entry.clone());
        Ok(Some(entry))
    }

    async fn get(&self, id: Uuid) -> Result<Option<MediaEntry>, MediaError> {
        Ok(self.entries.read().await.get(&id).cloned())
    }

    async fn find(
        &self,
        filter: &Predicate,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<MediaEntry>, MediaError> {
        let entries = self.entries.read().await;
        let mut matched: Vec<&MediaEntry> = entries.values().filter(|e| filter.matches(e)).collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(matched
            .into_iter()
            .skip(usize::try_from(skip).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn count(&self, filter: &Predicate) -> Result<u64, MediaError> {
        let entries = self.entries.read().await;
        Ok(entries.values().filter(|e| filter.matches(e)).count() as u64)
    }

    async fn delete(&self, id: Uuid) -> Result<Option<MediaEntry>, MediaError> {
        Ok(self.entries.write().await.remove(&id))
    }
}
