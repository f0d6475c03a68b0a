//! Read-time join of the files on disk with the media catalog.
//!
//! Files and catalog entries are associated only by canonical path. Either
//! side may exist without the other; the listing shows files, annotated with
//! whatever the catalog knows about them.

use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::catalog::query::Predicate;
use crate::catalog::{Description, MediaCatalog, MATCH_SET_CAP};
use crate::classifier::Category;
use crate::error::MediaError;
use crate::scanner::{self, FileRecord};

pub const DEFAULT_PAGE_SIZE: u64 = 10;
pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Clone, Debug, Default)]
pub struct ListQuery {
    pub page: u64,
    pub limit: u64,
    pub file_type: Option<Category>,
    /// Free text; `|` separates alternative keywords.
    pub description: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotatedFile {
    #[serde(flatten)]
    pub record: FileRecord,
    pub media_id: Option<Uuid>,
    pub is_added_to_library: bool,
    pub descriptions: Vec<Description>,
}

#[derive(Clone, Debug)]
pub struct ListPage {
    pub records: Vec<AnnotatedFile>,
    pub total: usize,
    pub page: u64,
    pub limit: u64,
    pub pages: u64,
    pub total_size: u64,
}

pub struct ReconciliationEngine {
    catalog: Arc<MediaCatalog>,
    uploads_dir: PathBuf,
}

impl ReconciliationEngine {
    pub fn new(catalog: Arc<MediaCatalog>, uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            catalog,
            uploads_dir: uploads_dir.into(),
        }
    }

    pub async fn list(&self, query: ListQuery) -> Result<ListPage, MediaError> {
        let page = query.page.max(1);
        let limit = query.limit.clamp(1, MAX_PAGE_SIZE);

        let mut records = scanner::scan(&self.uploads_dir).await;

        if let Some(file_type) = query.file_type {
            records.retain(|r| r.file_type == file_type);
        }

        if let Some(filter) = query
            .description
            .as_deref()
            .and_then(Predicate::any_description_keyword)
        {
            let match_set = self.description_match_set(&filter).await?;
            let canon = self.catalog.canonicalizer();
            records.retain(|r| {
                match_set.contains(&canon.canonicalize(&r.path, true))
                    || match_set.contains(&canon.canonicalize(&r.path, false))
            });
        }

        let total = records.len();
        let total_size = records.iter().map(|r| r.size).sum();
        let pages = (total as u64).div_ceil(limit);

        let skip = usize::try_from((page - 1).saturating_mul(limit)).unwrap_or(usize::MAX);
        let window: Vec<FileRecord> = records
            .into_iter()
            .skip(skip)
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect();

        let records = self.annotate(window).await?;
        tracing::debug!(total, page, limit, returned = records.len(), "listed uploads");

        Ok(ListPage {
            records,
            total,
            page,
            limit,
            pages,
            total_size,
        })
    }

    /// Canonical URLs (both slash forms) of every catalog entry whose
    /// descriptions match `filter`.
    async fn description_match_set(&self, filter: &Predicate) -> Result<HashSet<String>, MediaError> {
        let entries = self.catalog.find(filter, 1, MATCH_SET_CAP).await?;
        if entries.len() as u64 == MATCH_SET_CAP {
            tracing::warn!(cap = MATCH_SET_CAP, "description match-set hit its cap, results may be incomplete");
        }
        let canon = self.catalog.canonicalizer();
        Ok(entries
            .iter()
            .flat_map(|e| canon.slash_variants(&e.url))
            .collect())
    }

    /// Catalog lookups are limited to the page window.
    async fn annotate(&self, window: Vec<FileRecord>) -> Result<Vec<AnnotatedFile>, MediaError> {
        if window.is_empty() {
            return Ok(Vec::new());
        }
        let urls: Vec<String> = window.iter().map(|r| r.path.clone()).collect();
        let mut by_url = self.catalog.find_by_urls(&urls).await?;
        let canon = self.catalog.canonicalizer();

        Ok(window
            .into_iter()
            .map(|record| match by_url.remove(&canon.storage_key(&record.path)) {
                Some(entry) => AnnotatedFile {
                    record,
                    media_id: Some(entry.id),
                    is_added_to_library: entry.is_added_to_library,
                    descriptions: entry.descriptions,
                },
                None => AnnotatedFile {
                    record,
                    media_id: None,
                    is_added_to_library: false,
                    descriptions: Vec::new(),
                },
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::store::MemoryStore;
    use crate::catalog::NewMedia;
    use crate::path_guard::PathGuard;
    use crate::url_canon::UrlCanonicalizer;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        uploads: PathBuf,
        catalog: Arc<MediaCatalog>,
        engine: ReconciliationEngine,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let uploads = dir.path().join("uploads");
        let catalog = Arc::new(MediaCatalog::new(
            Arc::new(MemoryStore::new()),
            UrlCanonicalizer::default(),
            PathGuard::new(dir.path()),
            Duration::from_secs(5),
        ));
        let engine = ReconciliationEngine::new(catalog.clone(), &uploads);
        Fixture {
            _dir: dir,
            uploads,
            catalog,
            engine,
        }
    }

    fn put(uploads: &std::path::Path, relative: &str, bytes: &[u8]) {
        let path = uploads.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    fn image(url: &str) -> NewMedia {
        NewMedia {
            media_type: "image".into(),
            url: url.into(),
            ..NewMedia::default()
        }
    }

    fn query(description: Option<&str>) -> ListQuery {
        ListQuery {
            page: 1,
            limit: 10,
            file_type: None,
            description: description.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn description_filter_tracks_catalog_descriptions() {
        let f = fixture();
        put(&f.uploads, "images/cat.jpg", b"meow");
        put(&f.uploads, "images/dog.jpg", b"woof");
        let entry = f.catalog.create(image("/uploads/images/cat.jpg")).await.unwrap();

        let page = f.engine.list(query(Some("orange"))).await.unwrap();
        assert_eq!(page.total, 0);
        assert!(page.records.is_empty());

        f.catalog.add_description(entry.id, "An Orange tabby").await.unwrap();

        let page = f.engine.list(query(Some("orange"))).await.unwrap();
        assert_eq!(page.total, 1);
        let hit = &page.records[0];
        assert_eq!(hit.record.path, "/uploads/images/cat.jpg");
        assert!(hit.is_added_to_library);
        assert_eq!(hit.media_id, Some(entry.id));
        assert_eq!(hit.descriptions[0].text, "An Orange tabby");
    }

    #[tokio::test]
    async fn unmatched_description_filter_is_not_ignored() {
        let f = fixture();
        put(&f.uploads, "images/a.png", b"a");
        put(&f.uploads, "texts/b.txt", b"b");
        let page = f.engine.list(query(Some("nothing-matches"))).await.unwrap();
        assert_eq!(page.total, 0);
        assert_eq!(page.total_size, 0);

        let page = f.engine.list(query(Some(" | "))).await.unwrap();
        assert_eq!(page.total, 2);
    }

    #[tokio::test]
    async fn keyword_alternatives_and_legacy_slashless_rows() {
        let f = fixture();
        put(&f.uploads, "images/a.png", b"a");
        put(&f.uploads, "videos/b.mp4", b"bb");
        put(&f.uploads, "images/c.png", b"ccc");
        let a = f.catalog.create(image("/uploads/images/a.png")).await.unwrap();
        let b = f.catalog.create(image("uploads/videos/b.mp4")).await.unwrap();
        f.catalog.add_description(a.id, "sunset").await.unwrap();
        f.catalog.add_description(b.id, "Beach day").await.unwrap();

        let page = f.engine.list(query(Some("SUNSET|beach"))).await.unwrap();
        let mut paths: Vec<&str> = page.records.iter().map(|r| r.record.path.as_str()).collect();
        paths.sort_unstable();
        assert_eq!(paths, vec!["/uploads/images/a.png", "/uploads/videos/b.mp4"]);
        assert_eq!(page.total_size, 3);
    }

    #[tokio::test]
    async fn type_filter_and_pagination() {
        let f = fixture();
        for i in 0..5 {
            put(&f.uploads, &format!("images/{i}.jpg"), b"12");
        }
        put(&f.uploads, "documents/report.pdf", b"pdf");
        put(&f.uploads, "legacy.gif", b"gif");

        let mut q = query(None);
        q.file_type = Some(Category::Images);
        q.limit = 4;
        let first = f.engine.list(q.clone()).await.unwrap();
        assert_eq!(first.total, 6);
        assert_eq!(first.pages, 2);
        assert_eq!(first.records.len(), 4);
        assert_eq!(first.total_size, 13);

        q.page = 2;
        let second = f.engine.list(q.clone()).await.unwrap();
        assert_eq!(second.records.len(), 2);

        q.page = 9;
        assert!(f.engine.list(q).await.unwrap().records.is_empty());
    }

    #[tokio::test]
    async fn files_without_catalog_entries_get_defaults() {
        let f = fixture();
        put(&f.uploads, "archives/bundle.zip", b"zip");
        f.catalog.create(image("/uploads/images/dangling.jpg")).await.unwrap();

        let page = f.engine.list(query(None)).await.unwrap();
        assert_eq!(page.total, 1);
        let only = &page.records[0];
        assert_eq!(only.media_id, None);
        assert!(!only.is_added_to_library);
        assert!(only.descriptions.is_empty());
    }

    #[tokio::test]
    async fn paging_arguments_are_clamped() {
        let f = fixture();
        put(&f.uploads, "images/a.jpg", b"a");
        let page = f
            .engine
            .list(ListQuery {
                page: 0,
                limit: 1_000,
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, MAX_PAGE_SIZE);
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn missing_uploads_dir_lists_nothing() {
        let f = fixture();
        let page = f.engine.list(query(None)).await.unwrap();
        assert_eq!(page.total, 0);
        assert_eq!(page.pages, 0);
    }
}
