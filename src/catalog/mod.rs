//! The media catalog: persisted entries keyed by canonical URL, each carrying
//! an ordered list of descriptions and a library-membership flag.

pub mod postgres;
pub mod query;
pub mod store;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MediaError;
use crate::path_guard::{GuardOptions, PathGuard};
use crate::url_canon::UrlCanonicalizer;
use query::Predicate;
use store::{CatalogStore, EntryEdit};

/// Upper bound on entries pulled in for a description match-set.
pub const MATCH_SET_CAP: u64 = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, MediaError> {
        match raw.trim() {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "" => Err(MediaError::validation("type is required")),
            other => Err(MediaError::validation(format!(
                "type must be \"image\" or \"video\", got {other:?}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Description {
    pub id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Description {
    fn new(text: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            text,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaEntry {
    pub id: Uuid,
    /// Canonical storage key; unique across the catalog.
    pub url: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub filename: String,
    pub size: i64,
    pub mimetype: String,
    pub descriptions: Vec<Description>,
    pub is_added_to_library: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input to [`MediaCatalog::create`]. Fields are kept loose so that a batch
/// can report a bad `type` per item instead of failing to deserialize.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMedia {
    #[serde(rename = "type", default)]
    pub media_type: String,
    #[serde(default)]
    pub url: String,
    pub filename: Option<String>,
    pub size: Option<i64>,
    pub mimetype: Option<String>,
    #[serde(default)]
    pub descriptions: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPatch {
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub url: Option<String>,
    pub filename: Option<String>,
    pub size: Option<i64>,
    pub mimetype: Option<String>,
    pub is_added_to_library: Option<bool>,
}

/// One item of a batch description add.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptionInput {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure<I> {
    pub item: I,
    pub error: String,
}

/// Per-item outcome of a batch; the order of `success` and `failed` follows
/// the input order.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult<T, I> {
    pub success: Vec<T>,
    pub failed: Vec<BatchFailure<I>>,
    pub total: usize,
    pub success_count: usize,
    pub fail_count: usize,
}

impl<T, I> Default for BatchResult<T, I> {
    fn default() -> Self {
        Self {
            success: Vec::new(),
            failed: Vec::new(),
            total: 0,
            success_count: 0,
            fail_count: 0,
        }
    }
}

impl<T, I> BatchResult<T, I> {
    pub fn record(&mut self, item: I, outcome: Result<T, MediaError>) {
        self.total += 1;
        match outcome {
            Ok(value) => {
                self.success.push(value);
                self.success_count += 1;
            }
            Err(err) => {
                self.failed.push(BatchFailure {
                    item,
                    error: err.to_string(),
                });
                self.fail_count += 1;
            }
        }
    }

    #[must_use]
    pub const fn all_succeeded(&self) -> bool {
        self.fail_count == 0
    }
}

/// Result of removing an entry. The catalog row is always gone; the backing
/// file removal is best-effort and reported here.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveOutcome {
    pub entry: MediaEntry,
    pub file_deleted: bool,
    pub file_warning: Option<String>,
}

pub struct MediaCatalog {
    store: Arc<dyn CatalogStore>,
    canon: UrlCanonicalizer,
    guard: PathGuard,
    query_timeout: Duration,
}

impl MediaCatalog {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        canon: UrlCanonicalizer,
        guard: PathGuard,
        query_timeout: Duration,
    ) -> Self {
        Self {
            store,
            canon,
            guard,
            query_timeout,
        }
    }

    #[must_use]
    pub fn canonicalizer(&self) -> &UrlCanonicalizer {
        &self.canon
    }

    async fn bounded<T>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T, MediaError>>,
    ) -> Result<T, MediaError> {
        tokio::time::timeout(self.query_timeout, fut)
            .await
            .map_err(|_| {
                MediaError::CatalogUnavailable(format!(
                    "{what} timed out after {}s",
                    self.query_timeout.as_secs()
                ))
            })?
    }

    /// Upsert-with-merge keyed by canonical URL.
    ///
    /// An existing entry absorbs changed scalar fields and any description
    /// text it does not already hold; nothing recorded earlier is dropped.
    pub async fn create(&self, data: NewMedia) -> Result<MediaEntry, MediaError> {
        let media_type = MediaType::parse(&data.media_type)?;
        if data.url.trim().is_empty() {
            return Err(MediaError::validation("url is required"));
        }
        let url = self.canon.storage_key(&data.url);

        if let Some(existing) = self.find_by_url(&url).await? {
            return self.merge_into(existing.id, media_type, &data).await;
        }

        let now = Utc::now();
        let mut entry = MediaEntry {
            id: Uuid::new_v4(),
            url,
            media_type,
            filename: data.filename.clone().unwrap_or_default(),
            size: data.size.unwrap_or(0).max(0),
            mimetype: data.mimetype.clone().unwrap_or_default(),
            descriptions: Vec::new(),
            is_added_to_library: true,
            created_at: now,
            updated_at: now,
        };
        append_new_descriptions(&mut entry.descriptions, &data.descriptions);

        if self.bounded("insert", self.store.insert(&entry)).await? {
            tracing::info!(media_id = %entry.id, url = %entry.url, "catalogued new media");
            return Ok(entry);
        }

        // Lost an insert race for the same URL: fold into the winner.
        let existing = self
            .find_by_url(&entry.url)
            .await?
            .ok_or_else(|| MediaError::not_found(format!("media {}", entry.url)))?;
        self.merge_into(existing.id, media_type, &data).await
    }

    async fn merge_into(
        &self,
        id: Uuid,
        media_type: MediaType,
        data: &NewMedia,
    ) -> Result<MediaEntry, MediaError> {
        let merge = |entry: &mut MediaEntry| -> Result<bool, MediaError> {
            Ok(merge_fields(entry, media_type, data))
        };
        let entry = self.modify(id, &merge).await?;
        tracing::debug!(media_id = %entry.id, url = %entry.url, "create merged into existing media");
        Ok(entry)
    }

    /// Atomic read-modify-write of one entry through the store.
    async fn modify(&self, id: Uuid, edit: &EntryEdit<'_>) -> Result<MediaEntry, MediaError> {
        self.bounded("update", self.store.update_with(id, edit))
            .await?
            .ok_or_else(|| MediaError::not_found(format!("media {id}")))
    }

    /// Lookup by any textual form of the URL (absolute, proxy-prefixed, with
    /// or without leading slash).
    pub async fn find_by_url(&self, url: &str) -> Result<Option<MediaEntry>, MediaError> {
        let key = self.canon.storage_key(url);
        let mut found = self
            .bounded("find_by_url", self.store.find(&Predicate::UrlEq(key), 0, 1))
            .await?;
        Ok(found.pop())
    }

    /// Entries for a set of URLs, keyed by canonical URL.
    pub async fn find_by_urls(
        &self,
        urls: &[String],
    ) -> Result<HashMap<String, MediaEntry>, MediaError> {
        let keys: Vec<String> = urls
            .iter()
            .map(|u| self.canon.storage_key(u))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let limit = keys.len() as u64;
        let entries = self
            .bounded("find_by_urls", self.store.find(&Predicate::UrlIn(keys), 0, limit))
            .await?;
        Ok(entries.into_iter().map(|e| (e.url.clone(), e)).collect())
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<MediaEntry, MediaError> {
        self.bounded("get", self.store.get(id))
            .await?
            .ok_or_else(|| MediaError::not_found(format!("media {id}")))
    }

    /// One page (1-based) of matching entries, newest first.
    pub async fn find(
        &self,
        filter: &Predicate,
        page: u64,
        limit: u64,
    ) -> Result<Vec<MediaEntry>, MediaError> {
        let page = page.max(1);
        let skip = (page - 1).saturating_mul(limit);
        self.bounded("find", self.store.find(filter, skip, limit)).await
    }

    pub async fn count(&self, filter: &Predicate) -> Result<u64, MediaError> {
        self.bounded("count", self.store.count(filter)).await
    }

    pub async fn update(&self, id: Uuid, patch: MediaPatch) -> Result<MediaEntry, MediaError> {
        let media_type = patch.media_type.as_deref().map(MediaType::parse).transpose()?;
        let url = match patch.url.as_deref() {
            Some(url) if url.trim().is_empty() => {
                return Err(MediaError::validation("url must not be empty"))
            }
            Some(url) => Some(self.canon.storage_key(url)),
            None => None,
        };
        if patch.size.is_some_and(|size| size < 0) {
            return Err(MediaError::validation("size must not be negative"));
        }

        let apply = |entry: &mut MediaEntry| -> Result<bool, MediaError> {
            if let Some(media_type) = media_type {
                entry.media_type = media_type;
            }
            if let Some(url) = &url {
                entry.url.clone_from(url);
            }
            if let Some(filename) = &patch.filename {
                entry.filename.clone_from(filename);
            }
            if let Some(size) = patch.size {
                entry.size = size;
            }
            if let Some(mimetype) = &patch.mimetype {
                entry.mimetype.clone_from(mimetype);
            }
            if let Some(flag) = patch.is_added_to_library {
                entry.is_added_to_library = flag;
            }
            Ok(true)
        };
        self.modify(id, &apply).await
    }

    /// Delete the catalog row, then try to delete the backing file. A file
    /// that cannot be removed leaves a warning on the outcome, never an error.
    pub async fn remove(&self, id: Uuid) -> Result<RemoveOutcome, MediaError> {
        let entry = self
            .bounded("delete", self.store.delete(id))
            .await?
            .ok_or_else(|| MediaError::not_found(format!("media {id}")))?;

        let file_result = match self.guard.resolve(&entry.url, GuardOptions::default()) {
            Ok(path) => tokio::fs::remove_file(&path)
                .await
                .map_err(|err| MediaError::io(format!("removing {}", path.display()), err)),
            Err(err) => Err(err),
        };

        let (file_deleted, file_warning) = match file_result {
            Ok(()) => (true, None),
            Err(err) => {
                tracing::warn!(
                    media_id = %entry.id,
                    url = %entry.url,
                    error = %err,
                    "catalog entry removed but backing file was not"
                );
                (false, Some(err.to_string()))
            }
        };

        Ok(RemoveOutcome {
            entry,
            file_deleted,
            file_warning,
        })
    }

    /// Drop the catalog row for `url`, leaving the filesystem alone. Used after
    /// the file has already been deleted explicitly.
    pub async fn remove_by_url(&self, url: &str) -> Result<Option<MediaEntry>, MediaError> {
        match self.find_by_url(url).await? {
            Some(entry) => self.bounded("delete", self.store.delete(entry.id)).await,
            None => Ok(None),
        }
    }

    pub async fn add_description(&self, id: Uuid, text: &str) -> Result<MediaEntry, MediaError> {
        let text = required_text(text)?;
        let push = |entry: &mut MediaEntry| -> Result<bool, MediaError> {
            entry.descriptions.push(Description::new(text.clone()));
            Ok(true)
        };
        self.modify(id, &push).await
    }

    pub async fn update_description(
        &self,
        id: Uuid,
        description_id: Uuid,
        text: &str,
    ) -> Result<MediaEntry, MediaError> {
        let text = required_text(text)?;
        let rewrite = |entry: &mut MediaEntry| -> Result<bool, MediaError> {
            let description = entry
                .descriptions
                .iter_mut()
                .find(|d| d.id == description_id)
                .ok_or_else(|| MediaError::not_found(format!("description {description_id}")))?;
            description.text.clone_from(&text);
            Ok(true)
        };
        self.modify(id, &rewrite).await
    }

    pub async fn remove_description(
        &self,
        id: Uuid,
        description_id: Uuid,
    ) -> Result<MediaEntry, MediaError> {
        let drop_one = |entry: &mut MediaEntry| -> Result<bool, MediaError> {
            let before = entry.descriptions.len();
            entry.descriptions.retain(|d| d.id != description_id);
            if entry.descriptions.len() == before {
                return Err(MediaError::not_found(format!("description {description_id}")));
            }
            Ok(true)
        };
        self.modify(id, &drop_one).await
    }

    /// Items are processed one after another; a failing item is recorded
    /// and the batch carries on.
    pub async fn batch_create(&self, items: Vec<NewMedia>) -> BatchResult<MediaEntry, NewMedia> {
        let mut result = BatchResult::default();
        for item in items {
            let outcome = self.create(item.clone()).await;
            result.record(item, outcome);
        }
        tracing::info!(
            succeeded = result.success_count,
            failed = result.fail_count,
            "batch create finished"
        );
        result
    }

    pub async fn batch_add_description(
        &self,
        items: Vec<DescriptionInput>,
    ) -> BatchResult<MediaEntry, DescriptionInput> {
        let mut result = BatchResult::default();
        for item in items {
            let outcome = match parse_id(&item.id) {
                Ok(id) => self.add_description(id, &item.text).await,
                Err(err) => Err(err),
            };
            result.record(item, outcome);
        }
        tracing::info!(
            succeeded = result.success_count,
            failed = result.fail_count,
            "batch description add finished"
        );
        result
    }

    /// Rewrite stored URLs that are not in canonical form. When the canonical
    /// URL is already taken, the descriptions are folded into that entry and
    /// the duplicate row is dropped. Returns the number of rows touched.
    pub async fn migrate_canonical_urls(&self) -> Result<usize, MediaError> {
        let all = self
            .bounded("scan", self.store.find(&Predicate::All, 0, u64::MAX))
            .await?;
        let mut touched = 0;

        for entry in all {
            let key = self.canon.storage_key(&entry.url);
            if key == entry.url {
                continue;
            }

            match self.find_by_url(&key).await? {
                Some(target) if target.id != entry.id => {
                    let texts: Vec<String> =
                        entry.descriptions.iter().map(|d| d.text.clone()).collect();
                    let fold = |target: &mut MediaEntry| -> Result<bool, MediaError> {
                        Ok(append_new_descriptions(&mut target.descriptions, &texts) > 0)
                    };
                    self.modify(target.id, &fold).await?;
                    self.bounded("delete", self.store.delete(entry.id)).await?;
                    tracing::info!(from = %entry.url, into = %target.id, "merged non-canonical media row");
                }
                _ => {
                    tracing::info!(from = %entry.url, to = %key, "canonicalised media url");
                    let rekey = |stored: &mut MediaEntry| -> Result<bool, MediaError> {
                        stored.url.clone_from(&key);
                        Ok(true)
                    };
                    self.modify(entry.id, &rekey).await?;
                }
            }
            touched += 1;
        }

        Ok(touched)
    }
}

/// Fold a repeated `create` into an existing entry. Returns whether anything
/// changed; descriptions are only ever added.
fn merge_fields(entry: &mut MediaEntry, media_type: MediaType, data: &NewMedia) -> bool {
    let mut changed = false;

    if entry.media_type != media_type {
        entry.media_type = media_type;
        changed = true;
    }
    if let Some(filename) = data.filename.as_ref().filter(|f| !f.is_empty()) {
        if entry.filename != *filename {
            entry.filename.clone_from(filename);
            changed = true;
        }
    }
    if let Some(size) = data.size.filter(|s| *s > 0) {
        if entry.size != size {
            entry.size = size;
            changed = true;
        }
    }
    if let Some(mimetype) = data.mimetype.as_ref().filter(|m| !m.is_empty()) {
        if entry.mimetype != *mimetype {
            entry.mimetype.clone_from(mimetype);
            changed = true;
        }
    }
    if !entry.is_added_to_library {
        entry.is_added_to_library = true;
        changed = true;
    }
    if append_new_descriptions(&mut entry.descriptions, &data.descriptions) > 0 {
        changed = true;
    }
    changed
}

/// Append each trimmed, non-empty text that is not already present.
/// Returns how many were added.
fn append_new_descriptions(descriptions: &mut Vec<Description>, texts: &[String]) -> usize {
    let mut seen: HashSet<String> = descriptions.iter().map(|d| d.text.clone()).collect();
    let mut added = 0;
    for text in texts {
        let text = text.trim();
        if text.is_empty() || !seen.insert(text.to_string()) {
            continue;
        }
        descriptions.push(Description::new(text.to_string()));
        added += 1;
    }
    added
}

fn required_text(text: &str) -> Result<String, MediaError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(MediaError::validation("description text is required"));
    }
    Ok(text.to_string())
}

pub fn parse_id(raw: &str) -> Result<Uuid, MediaError> {
    if raw.trim().is_empty() {
        return Err(MediaError::validation("id is required"));
    }
    Uuid::parse_str(raw.trim()).map_err(|_| MediaError::validation(format!("invalid id {raw:?}")))
}
