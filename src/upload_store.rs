//! Writing uploads into their category directory and removing them again on
//! explicit request.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::classifier::{self, Category};
use crate::error::MediaError;
use crate::path_guard::{GuardOptions, PathGuard, UPLOADS_PREFIX};
use crate::url_canon::UrlCanonicalizer;

const MAX_STEM_LEN: usize = 64;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub original_name: String,
    pub filename: String,
    pub path: String,
    pub size: u64,
    pub mimetype: String,
    pub file_type: Category,
    pub upload_time: DateTime<Utc>,
}

/// What to delete: a path under `/uploads/` (preferred) or a bare filename.
#[derive(Clone, Debug, Default)]
pub struct DeleteTarget {
    pub filename: Option<String>,
    pub file_path: Option<String>,
}

impl DeleteTarget {
    /// Label for error reports.
    #[must_use]
    pub fn label(&self) -> String {
        self.file_path
            .as_deref()
            .or(self.filename.as_deref())
            .unwrap_or_default()
            .to_string()
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedFile {
    pub filename: String,
    pub path: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSuccess {
    pub index: usize,
    pub filename: String,
    pub path: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFailure {
    pub index: usize,
    pub filename: String,
    pub error: String,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleteResult {
    pub success: Vec<DeleteSuccess>,
    pub failed: Vec<DeleteFailure>,
    pub total: usize,
    pub success_count: usize,
    pub fail_count: usize,
}

pub struct UploadStore {
    guard: PathGuard,
    canon: UrlCanonicalizer,
}

impl UploadStore {
    pub fn new(guard: PathGuard, canon: UrlCanonicalizer) -> Self {
        Self { guard, canon }
    }

    #[must_use]
    pub fn uploads_dir(&self) -> &Path {
        self.guard.uploads_dir()
    }

    /// Store `bytes` under the category chosen from the MIME type and the
    /// original name's extension.
    pub async fn save(
        &self,
        original_name: &str,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<StoredFile, MediaError> {
        let extension = classifier::extension_of(original_name);
        let category = classifier::classify(content_type, extension.as_deref());
        let filename = generate_stored_name(original_name);

        let dir = self.guard.uploads_dir().join(category.dir_name());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|err| MediaError::io(format!("creating {}", dir.display()), err))?;

        let target = dir.join(&filename);
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|err| MediaError::io(format!("writing {}", target.display()), err))?;

        let mimetype = match content_type.map(str::trim) {
            Some(mime) if !mime.is_empty() => mime.to_string(),
            _ => extension.as_deref().map_or_else(
                || "application/octet-stream".to_string(),
                classifier::mime_for_extension,
            ),
        };

        tracing::info!(
            original = original_name,
            stored = %target.display(),
            size = bytes.len(),
            category = %category,
            "stored upload"
        );

        Ok(StoredFile {
            original_name: original_name.to_string(),
            path: format!("{UPLOADS_PREFIX}{}/{filename}", category.dir_name()),
            filename,
            size: bytes.len() as u64,
            mimetype,
            file_type: category,
            upload_time: Utc::now(),
        })
    }

    /// Remove a file stored by [`save`](Self::save). Used to undo a partially
    /// accepted upload request.
    pub async fn discard(&self, stored: &StoredFile) {
        match self.guard.resolve(&stored.path, GuardOptions::strict()) {
            Ok(path) => {
                if let Err(err) = tokio::fs::remove_file(&path).await {
                    tracing::warn!(path = %path.display(), error = %err, "failed to discard upload");
                }
            }
            Err(err) => tracing::warn!(path = %stored.path, error = %err, "refusing to discard upload"),
        }
    }

    pub async fn delete(&self, target: &DeleteTarget) -> Result<DeletedFile, MediaError> {
        let absolute = self.locate(target)?;
        tokio::fs::remove_file(&absolute)
            .await
            .map_err(|err| MediaError::io(format!("deleting {}", absolute.display()), err))?;

        let deleted = DeletedFile {
            filename: absolute
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string(),
            path: public_path(&absolute),
        };
        tracing::info!(path = %deleted.path, "deleted upload");
        Ok(deleted)
    }

    /// Items are deleted in order; one failure does not stop the rest.
    pub async fn delete_many(&self, targets: &[DeleteTarget]) -> BatchDeleteResult {
        let mut result = BatchDeleteResult {
            total: targets.len(),
            ..BatchDeleteResult::default()
        };
        for (index, target) in targets.iter().enumerate() {
            match self.delete(target).await {
                Ok(deleted) => result.success.push(DeleteSuccess {
                    index,
                    filename: deleted.filename,
                    path: deleted.path,
                }),
                Err(err) => {
                    tracing::warn!(index, target = %target.label(), error = %err, "batch delete item failed");
                    result.failed.push(DeleteFailure {
                        index,
                        filename: target.label(),
                        error: err.to_string(),
                    });
                }
            }
        }
        result.success_count = result.success.len();
        result.fail_count = result.failed.len();
        result
    }

    fn locate(&self, target: &DeleteTarget) -> Result<PathBuf, MediaError> {
        if let Some(raw) = target.file_path.as_deref().filter(|p| !p.trim().is_empty()) {
            let canonical = self.canon.storage_key(raw);
            let path = self.guard.resolve(&canonical, GuardOptions::strict())?;
            if !path.is_file() {
                return Err(MediaError::not_found(format!("file {canonical}")));
            }
            return Ok(path);
        }
        match target.filename.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => self.guard.locate_by_filename(name),
            _ => Err(MediaError::validation("filename or filePath is required")),
        }
    }
}

/// `/uploads/<category>/<name>` for files in a category directory, else the
/// legacy `/uploads/<name>`.
fn public_path(absolute: &Path) -> String {
    let name = absolute
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let category = absolute
        .parent()
        .and_then(Path::file_name)
        .and_then(|n| n.to_str())
        .and_then(Category::from_dir_name);
    match category {
        Some(category) => format!("{UPLOADS_PREFIX}{}/{name}", category.dir_name()),
        None => format!("{UPLOADS_PREFIX}{name}"),
    }
}

/// `<stem>_<unix-millis>_<random><.ext>` with stem and extension reduced to
/// `[A-Za-z0-9_-]`.
fn generate_stored_name(original_name: &str) -> String {
    let base = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_name);
    let (stem, ext) = match base.rfind('.') {
        Some(idx) if idx > 0 => (&base[..idx], Some(&base[idx + 1..])),
        _ => (base, None),
    };

    let mut stem = sanitize_component(stem);
    if stem.is_empty() {
        stem.push_str("file");
    }
    if stem.len() > MAX_STEM_LEN {
        stem.truncate(MAX_STEM_LEN);
    }

    let millis = Utc::now().timestamp_millis();
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
    let ext = ext
        .map(|e| sanitize_component(e).to_ascii_lowercase())
        .filter(|e| !e.is_empty() && !e.contains('-') && !e.contains('_'));

    match ext {
        Some(ext) => format!("{stem}_{millis}_{suffix}.{ext}"),
        None => format!("{stem}_{millis}_{suffix}"),
    }
}

fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_guard::validate_filename;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> UploadStore {
        UploadStore::new(PathGuard::new(dir.path()), UrlCanonicalizer::default())
    }

    #[test]
    fn stored_names_pass_filename_validation() {
        for original in [
            "cat.jpg",
            "My Holiday Photo (1).JPEG",
            "../../etc/passwd.txt",
            "照片.png",
            ".hidden",
            "archive.tar.gz",
        ] {
            let name = generate_stored_name(original);
            if original == ".hidden" {
                assert!(name.starts_with("_hidden_"), "{name}");
                continue;
            }
            assert!(validate_filename(&name).is_ok(), "{original} -> {name}");
        }
        let name = generate_stored_name("My Holiday Photo (1).JPEG");
        assert!(name.starts_with("My_Holiday_Photo__1__"));
        assert!(name.ends_with(".jpeg"));
    }

    #[tokio::test]
    async fn save_places_file_in_category_dir() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let stored = store.save("cat.jpg", Some("image/jpeg"), b"meow").await.unwrap();

        assert_eq!(stored.file_type, Category::Images);
        assert!(stored.path.starts_with("/uploads/images/cat_"));
        assert_eq!(stored.size, 4);
        assert!(dir.path().join("uploads/images").join(&stored.filename).is_file());

        let doc = store.save("notes.md", None, b"# hi").await.unwrap();
        assert_eq!(doc.file_type, Category::Texts);
        let other = store
            .save("blob.xyz", Some("application/octet-stream"), b"?")
            .await
            .unwrap();
        assert_eq!(other.file_type, Category::Others);
        assert_eq!(other.mimetype, "application/octet-stream");
    }

    #[tokio::test]
    async fn delete_by_path_and_by_filename() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let a = store.save("a.png", Some("image/png"), b"a").await.unwrap();
        let b = store.save("b.pdf", Some("application/pdf"), b"b").await.unwrap();

        let deleted = store
            .delete(&DeleteTarget {
                filename: Some("ignored.png".into()),
                file_path: Some(format!("http://example.com/api{}?t=1", a.path)),
            })
            .await
            .unwrap();
        assert_eq!(deleted.path, a.path);

        let deleted = store
            .delete(&DeleteTarget {
                filename: Some(b.filename.clone()),
                file_path: None,
            })
            .await
            .unwrap();
        assert_eq!(deleted.path, b.path);
        assert_eq!(deleted.filename, b.filename);
    }

    #[tokio::test]
    async fn delete_rejects_unsafe_and_missing_targets() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::create_dir_all(dir.path().join("uploads")).unwrap();
        std::fs::write(dir.path().join("uploads/legacy.txt"), b"x").unwrap();

        let by_path = |p: &str| DeleteTarget {
            filename: None,
            file_path: Some(p.to_string()),
        };
        assert!(matches!(
            store.delete(&by_path("/uploads/../../etc/passwd")).await,
            Err(MediaError::InvalidPath(_))
        ));
        // Legacy files can be reached by filename but not by a category-less path.
        assert!(matches!(
            store.delete(&by_path("/uploads/legacy.txt")).await,
            Err(MediaError::InvalidPath(_))
        ));
        assert!(matches!(
            store.delete(&by_path("/uploads/images/missing.png")).await,
            Err(MediaError::NotFound(_))
        ));
        assert!(matches!(
            store.delete(&DeleteTarget::default()).await,
            Err(MediaError::Validation(_))
        ));

        let legacy = store
            .delete(&DeleteTarget {
                filename: Some("legacy.txt".into()),
                file_path: None,
            })
            .await
            .unwrap();
        assert_eq!(legacy.path, "/uploads/legacy.txt");
    }

    #[tokio::test]
    async fn batch_delete_reports_per_item() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let a = store.save("a.png", Some("image/png"), b"a").await.unwrap();
        let targets = vec![
            DeleteTarget {
                filename: Some(a.filename.clone()),
                file_path: None,
            },
            DeleteTarget {
                filename: Some("nope.png".into()),
                file_path: None,
            },
            DeleteTarget {
                filename: Some("../escape.png".into()),
                file_path: None,
            },
        ];
        let result = store.delete_many(&targets).await;
        assert_eq!(result.total, 3);
        assert_eq!(result.success_count, 1);
        assert_eq!(result.fail_count, 2);
        assert_eq!(result.failed[0].index, 1);
        assert_eq!(result.failed[1].filename, "../escape.png");
    }

    #[tokio::test]
    async fn discard_removes_saved_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let stored = store.save("clip.mp4", Some("video/mp4"), b"v").await.unwrap();
        store.discard(&stored).await;
        assert!(!dir.path().join("uploads/videos").join(&stored.filename).exists());
    }
}
