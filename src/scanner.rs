//! Enumeration of stored uploads across the category directories and the
//! legacy flat directory.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::path::Path;
use std::time::SystemTime;
use tokio::fs;

use crate::classifier::{self, Category};
use crate::path_guard::UPLOADS_PREFIX;

/// A file as found on disk. Rebuilt on every scan; identity is `path`.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub filename: String,
    pub original_name: String,
    /// `/uploads/<category>/<filename>`, or `/uploads/<filename>` for legacy files.
    pub path: String,
    pub size: u64,
    pub upload_time: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub file_type: Category,
    pub mimetype: String,
}

/// Scan every category directory concurrently, then the legacy root, and
/// return the records newest first.
pub async fn scan(uploads_dir: &Path) -> Vec<FileRecord> {
    let category_scans = Category::ALL.iter().map(|&category| {
        let dir = uploads_dir.join(category.dir_name());
        async move { scan_directory(&dir, Some(category)).await }
    });

    let (per_category, legacy) = tokio::join!(
        join_all(category_scans),
        scan_directory(uploads_dir, None)
    );

    let mut records: Vec<FileRecord> = per_category.into_iter().flatten().collect();
    records.extend(legacy);
    sort_newest_first(&mut records);
    records
}

/// Newest `upload_time` first; ties fall back to the path so the order is stable.
pub fn sort_newest_first(records: &mut [FileRecord]) {
    records.sort_by(|a, b| {
        b.upload_time
            .cmp(&a.upload_time)
            .then_with(|| a.path.cmp(&b.path))
    });
}

/// Regular files directly inside `dir`. A missing or unreadable directory
/// yields no records; sub-directories are skipped.
async fn scan_directory(dir: &Path, category: Option<Category>) -> Vec<FileRecord> {
    let mut records = Vec::new();

    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return records,
        Err(err) => {
            tracing::warn!(dir = %dir.display(), error = %err, "failed to read upload directory");
            return records;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(dir = %dir.display(), error = %err, "failed to read directory entry");
                break;
            }
        };

        let path = entry.path();
        // fs::metadata follows symlinks, so a link to a directory is skipped too.
        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
            tracing::debug!(path = %path.display(), "skipping non UTF-8 filename");
            continue;
        };

        records.push(build_record(filename, category, &metadata, &path));
    }

    records
}

fn build_record(
    filename: String,
    category: Option<Category>,
    metadata: &std::fs::Metadata,
    path: &Path,
) -> FileRecord {
    let ext = classifier::extension_of(&filename);
    let (relative_path, file_type) = match category {
        Some(category) => (
            format!("{UPLOADS_PREFIX}{}/{filename}", category.dir_name()),
            category,
        ),
        None => (
            format!("{UPLOADS_PREFIX}{filename}"),
            ext.as_deref()
                .map_or(Category::Others, classifier::category_from_extension),
        ),
    };

    let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    let created = metadata.created().unwrap_or(modified);
    tracing::trace!(path = %path.display(), "scanned file");

    FileRecord {
        original_name: filename.clone(),
        filename,
        path: relative_path,
        size: metadata.len(),
        upload_time: DateTime::<Utc>::from(created),
        last_modified: DateTime::<Utc>::from(modified),
        file_type,
        mimetype: ext
            .as_deref()
            .map_or_else(|| "application/octet-stream".to_string(), classifier::mime_for_extension),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn record(path: &str, secs: i64) -> FileRecord {
        let time = DateTime::<Utc>::from_timestamp(secs, 0).unwrap();
        FileRecord {
            filename: path.rsplit('/').next().unwrap().to_string(),
            original_name: String::new(),
            path: path.to_string(),
            size: 1,
            upload_time: time,
            last_modified: time,
            file_type: Category::Others,
            mimetype: String::new(),
        }
    }

    #[tokio::test]
    async fn missing_uploads_dir_yields_nothing() {
        let dir = TempDir::new().unwrap();
        assert!(scan(&dir.path().join("uploads")).await.is_empty());
    }

    #[tokio::test]
    async fn scans_categories_and_legacy_root() {
        let dir = TempDir::new().unwrap();
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(uploads.join("images")).unwrap();
        std::fs::create_dir_all(uploads.join("documents/nested")).unwrap();
        std::fs::write(uploads.join("images/cat.jpg"), b"meow").unwrap();
        std::fs::write(uploads.join("documents/report.pdf"), b"%PDF-1.4").unwrap();
        std::fs::write(uploads.join("documents/nested/skip.txt"), b"x").unwrap();
        std::fs::write(uploads.join("old-logo.png"), b"png").unwrap();

        let records = scan(&uploads).await;
        let mut paths: Vec<&str> = records.iter().map(|r| r.path.as_str()).collect();
        paths.sort_unstable();
        assert_eq!(
            paths,
            vec![
                "/uploads/documents/report.pdf",
                "/uploads/images/cat.jpg",
                "/uploads/old-logo.png",
            ]
        );

        let cat = records.iter().find(|r| r.filename == "cat.jpg").unwrap();
        assert_eq!(cat.file_type, Category::Images);
        assert_eq!(cat.mimetype, "image/jpeg");
        assert_eq!(cat.size, 4);

        let legacy = records.iter().find(|r| r.filename == "old-logo.png").unwrap();
        assert_eq!(legacy.file_type, Category::Images);
    }

    #[tokio::test]
    async fn scan_output_is_newest_first() {
        let dir = TempDir::new().unwrap();
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(uploads.join("texts")).unwrap();
        for name in ["a.txt", "b.txt", "c.txt"] {
            std::fs::write(uploads.join("texts").join(name), name).unwrap();
        }
        let records = scan(&uploads).await;
        assert_eq!(records.len(), 3);
        assert!(records
            .windows(2)
            .all(|pair| pair[0].upload_time >= pair[1].upload_time));
    }

    #[test]
    fn sort_is_descending_by_upload_time() {
        let mut records = vec![
            record("/uploads/a", 10),
            record("/uploads/b", 30),
            record("/uploads/c", 20),
            record("/uploads/d", 30),
        ];
        sort_newest_first(&mut records);
        let order: Vec<&str> = records.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(order, vec!["/uploads/b", "/uploads/d", "/uploads/c", "/uploads/a"]);
        assert!(records[0].upload_time - records[3].upload_time == Duration::seconds(20));
    }

    #[test]
    fn record_serializes_in_camel_case() {
        let json = serde_json::to_value(record("/uploads/images/x.jpg", 0)).unwrap();
        assert!(json.get("uploadTime").is_some());
        assert!(json.get("lastModified").is_some());
        assert_eq!(json["fileType"], "other");
    }
}
