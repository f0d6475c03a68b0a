//! File categorisation: which of the six storage directories an upload
//! belongs in, and the file-type tag shown to clients.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "image")]
    Images,
    #[serde(rename = "video")]
    Videos,
    #[serde(rename = "document")]
    Documents,
    #[serde(rename = "archive")]
    Archives,
    #[serde(rename = "text")]
    Texts,
    #[serde(rename = "other")]
    Others,
}

impl Category {
    /// Probe order used whenever a bare filename has to be located on disk.
    pub const ALL: [Self; 6] = [
        Self::Images,
        Self::Videos,
        Self::Documents,
        Self::Archives,
        Self::Texts,
        Self::Others,
    ];

    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Images => "images",
            Self::Videos => "videos",
            Self::Documents => "documents",
            Self::Archives => "archives",
            Self::Texts => "texts",
            Self::Others => "others",
        }
    }

    /// Singular tag used by file records and the `fileType` filter.
    #[must_use]
    pub const fn file_type(self) -> &'static str {
        match self {
            Self::Images => "image",
            Self::Videos => "video",
            Self::Documents => "document",
            Self::Archives => "archive",
            Self::Texts => "text",
            Self::Others => "other",
        }
    }

    #[must_use]
    pub fn from_dir_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.dir_name() == name)
    }

    #[must_use]
    pub fn from_file_type(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.file_type() == tag)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_type())
    }
}

const IMAGE_EXTS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "svg", "ico", "tiff", "tif", "heic", "heif",
    "avif", "jfif", "jp2", "jpx", "j2k", "j2c", "psd", "raw", "cr2", "nef", "orf", "sr2",
];
const VIDEO_EXTS: &[&str] = &["mp4", "webm", "ogg", "mov", "avi", "wmv", "flv", "mkv"];
const DOCUMENT_EXTS: &[&str] = &["pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx"];
const ARCHIVE_EXTS: &[&str] = &["zip", "rar", "7z", "tar", "gz"];
const TEXT_EXTS: &[&str] = &["txt", "csv", "json", "xml", "md"];

const DOCUMENT_MIME_HINTS: &[&str] = &[
    "pdf",
    "document",
    "word",
    "spreadsheet",
    "excel",
    "presentation",
    "powerpoint",
];
const ARCHIVE_MIME_HINTS: &[&str] = &["zip", "rar", "7z", "compressed"];

/// Category from the MIME type alone; `Others` when nothing matches.
#[must_use]
pub fn category_from_mime(mime: &str) -> Category {
    let mime = mime.trim().to_ascii_lowercase();
    if mime.starts_with("image/") {
        return Category::Images;
    }
    if mime.starts_with("video/") {
        return Category::Videos;
    }
    if mime.starts_with("text/") {
        return Category::Texts;
    }
    if DOCUMENT_MIME_HINTS.iter().any(|hint| mime.contains(hint)) {
        return Category::Documents;
    }
    if ARCHIVE_MIME_HINTS.iter().any(|hint| mime.contains(hint)) {
        return Category::Archives;
    }
    Category::Others
}

/// Category from the extension alone (with or without the dot, any case).
#[must_use]
pub fn category_from_extension(ext: &str) -> Category {
    let ext = normalize_extension(ext);
    let ext = ext.as_str();
    if IMAGE_EXTS.contains(&ext) {
        Category::Images
    } else if VIDEO_EXTS.contains(&ext) {
        Category::Videos
    } else if DOCUMENT_EXTS.contains(&ext) {
        Category::Documents
    } else if ARCHIVE_EXTS.contains(&ext) {
        Category::Archives
    } else if TEXT_EXTS.contains(&ext) {
        Category::Texts
    } else {
        Category::Others
    }
}

/// MIME rules win; the extension is consulted when the MIME type is absent
/// or says nothing useful (e.g. `application/octet-stream`).
#[must_use]
pub fn classify(mime: Option<&str>, ext: Option<&str>) -> Category {
    if let Some(mime) = mime.filter(|m| !m.trim().is_empty()) {
        let from_mime = category_from_mime(mime);
        if from_mime != Category::Others {
            return from_mime;
        }
    }
    ext.map_or(Category::Others, category_from_extension)
}

/// MIME type guessed from an extension, `application/octet-stream` if unknown.
#[must_use]
pub fn mime_for_extension(ext: &str) -> String {
    mime_guess::from_ext(&normalize_extension(ext))
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Lower-cased extension of `filename` without the dot, if any.
#[must_use]
pub fn extension_of(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(normalize_extension)
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_rules_take_precedence() {
        assert_eq!(classify(Some("image/jpeg"), Some("pdf")), Category::Images);
        assert_eq!(classify(Some("video/mp4"), None), Category::Videos);
        assert_eq!(classify(Some("text/plain"), Some("zip")), Category::Texts);
        assert_eq!(classify(Some("application/pdf"), None), Category::Documents);
        assert_eq!(
            classify(
                Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
                None
            ),
            Category::Documents
        );
        assert_eq!(classify(Some("application/vnd.ms-excel"), None), Category::Documents);
        assert_eq!(classify(Some("application/x-7z-compressed"), None), Category::Archives);
        assert_eq!(classify(Some("application/zip"), Some("txt")), Category::Archives);
    }

    #[test]
    fn extension_is_the_fallback() {
        assert_eq!(
            classify(Some("application/octet-stream"), Some(".PNG")),
            Category::Images
        );
        assert_eq!(classify(None, Some("mkv")), Category::Videos);
        assert_eq!(classify(Some("  "), Some("docx")), Category::Documents);
        assert_eq!(classify(None, Some("tar")), Category::Archives);
        assert_eq!(classify(None, Some("md")), Category::Texts);
    }

    #[test]
    fn unknown_inputs_land_in_others() {
        assert_eq!(classify(None, None), Category::Others);
        assert_eq!(classify(Some("application/x-unknown"), None), Category::Others);
        assert_eq!(classify(Some("application/octet-stream"), Some("bin")), Category::Others);
        assert_eq!(classify(None, Some("")), Category::Others);
    }

    #[test]
    fn classification_is_total_and_stable() {
        let mimes = [
            None,
            Some(""),
            Some("image/png"),
            Some("video/webm"),
            Some("audio/mpeg"),
            Some("application/octet-stream"),
            Some("application/json"),
            Some("application/gzip"),
            Some("text/csv"),
            Some("garbage"),
        ];
        let exts = [
            None,
            Some(""),
            Some("jpg"),
            Some(".MOV"),
            Some("pdf"),
            Some("gz"),
            Some("json"),
            Some("exe"),
            Some("..."),
        ];
        for mime in mimes {
            for ext in exts {
                let first = classify(mime, ext);
                assert!(Category::ALL.contains(&first));
                for _ in 0..3 {
                    assert_eq!(classify(mime, ext), first, "unstable for {mime:?}/{ext:?}");
                }
            }
        }
    }

    #[test]
    fn every_category_has_one_directory_and_tag() {
        for category in Category::ALL {
            assert_eq!(Category::from_dir_name(category.dir_name()), Some(category));
            assert_eq!(Category::from_file_type(category.file_type()), Some(category));
        }
        assert_eq!(Category::from_dir_name("image"), None);
        assert_eq!(Category::from_file_type("images"), None);
    }

    #[test]
    fn category_serializes_as_file_type_tag() {
        let json = serde_json::to_string(&Category::Archives).unwrap();
        assert_eq!(json, "\"archive\"");
    }

    #[test]
    fn guesses_mime_types() {
        assert_eq!(mime_for_extension(".jpg"), "image/jpeg");
        assert_eq!(mime_for_extension("PDF"), "application/pdf");
        assert_eq!(mime_for_extension("nope-not-real"), "application/octet-stream");
        assert_eq!(extension_of("cat.JPG").as_deref(), Some("jpg"));
        assert_eq!(extension_of("README"), None);
    }
}
