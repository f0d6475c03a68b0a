//! Confinement of client-supplied paths to the uploads directory.
//!
//! Every path that reaches the filesystem from a request goes through
//! [`PathGuard::resolve`] or [`PathGuard::locate_by_filename`]. Validation is
//! done twice: once on the raw string, and once on the resolved absolute path
//! (after following symlinks of whatever part already exists on disk).

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Component, Path, PathBuf};

use crate::classifier::Category;
use crate::error::MediaError;

pub const UPLOADS_PREFIX: &str = "/uploads/";
pub const UPLOADS_DIR_NAME: &str = "uploads";

static FILENAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+\.[A-Za-z0-9]+$").unwrap());

#[derive(Clone, Copy, Debug)]
pub struct GuardOptions {
    /// Path must start with `/uploads/`.
    pub require_prefix: bool,
    /// Path must continue with one of the category directories.
    pub require_category: bool,
}

impl Default for GuardOptions {
    fn default() -> Self {
        Self {
            require_prefix: true,
            require_category: false,
        }
    }
}

impl GuardOptions {
    #[must_use]
    pub const fn strict() -> Self {
        Self {
            require_prefix: true,
            require_category: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PathGuard {
    public_root: PathBuf,
    uploads_dir: PathBuf,
}

impl PathGuard {
    /// `public_root` is the directory that `/uploads/...` paths are relative to.
    #[must_use]
    pub fn new(public_root: impl Into<PathBuf>) -> Self {
        let public_root = public_root.into();
        let uploads_dir = public_root.join(UPLOADS_DIR_NAME);
        Self {
            public_root,
            uploads_dir,
        }
    }

    #[must_use]
    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    /// Syntactic checks on the raw client string.
    pub fn validate(&self, relative: &str, opts: GuardOptions) -> Result<(), MediaError> {
        if relative.trim().is_empty() {
            return Err(MediaError::InvalidPath("path must not be empty".into()));
        }
        if relative.contains('\0') {
            return Err(MediaError::InvalidPath("path contains a NUL byte".into()));
        }
        if relative.contains("../") || relative.contains("..\\") {
            return Err(MediaError::InvalidPath("path traversal detected".into()));
        }
        if relative.contains("//") {
            return Err(MediaError::InvalidPath("path contains a double slash".into()));
        }
        if Path::new(relative)
            .components()
            .any(|c| matches!(c, Component::ParentDir))
            || relative.split('\\').any(|seg| seg == "..")
        {
            return Err(MediaError::InvalidPath(
                "path traversal detected after normalisation".into(),
            ));
        }
        if opts.require_prefix && !relative.starts_with(UPLOADS_PREFIX) {
            return Err(MediaError::InvalidPath(format!(
                "path must start with {UPLOADS_PREFIX}"
            )));
        }
        if opts.require_category && !has_category_segment(relative) {
            let allowed: Vec<&str> = Category::ALL.iter().map(|c| c.dir_name()).collect();
            return Err(MediaError::InvalidPath(format!(
                "path must be inside one of: {}",
                allowed.join(", ")
            )));
        }
        Ok(())
    }

    /// Validate `relative` and resolve it to an absolute path inside the uploads dir.
    pub fn resolve(&self, relative: &str, opts: GuardOptions) -> Result<PathBuf, MediaError> {
        self.validate(relative, opts)?;

        let joined = self.public_root.join(relative.trim_start_matches('/'));
        let resolved = resolve_through_existing(&normalize_lexically(&joined));
        let allowed = resolve_through_existing(&normalize_lexically(&self.uploads_dir));

        if resolved == allowed || !resolved.starts_with(&allowed) {
            return Err(MediaError::InvalidPath(
                "path resolves outside the uploads directory".into(),
            ));
        }
        Ok(resolved)
    }

    /// Find a bare filename in the category directories (fixed order), then
    /// in the legacy flat directory.
    pub fn locate_by_filename(&self, filename: &str) -> Result<PathBuf, MediaError> {
        validate_filename(filename)?;

        let candidates = Category::ALL
            .iter()
            .map(|c| format!("{UPLOADS_PREFIX}{}/{filename}", c.dir_name()))
            .chain(std::iter::once(format!("{UPLOADS_PREFIX}{filename}")));

        for candidate in candidates {
            let path = self.resolve(&candidate, GuardOptions::default())?;
            if path.is_file() {
                return Ok(path);
            }
        }
        Err(MediaError::not_found(format!("file {filename}")))
    }
}

/// `name.ext` made of alphanumerics, `_`, `-` and `.` only.
pub fn validate_filename(filename: &str) -> Result<(), MediaError> {
    if filename.is_empty() {
        return Err(MediaError::InvalidPath("filename must not be empty".into()));
    }
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        return Err(MediaError::InvalidPath(
            "filename contains illegal characters".into(),
        ));
    }
    if !FILENAME_REGEX.is_match(filename) {
        return Err(MediaError::InvalidPath("invalid filename format".into()));
    }
    Ok(())
}

fn has_category_segment(relative: &str) -> bool {
    relative
        .strip_prefix(UPLOADS_PREFIX)
        .and_then(|rest| rest.split_once('/'))
        .is_some_and(|(dir, file)| !file.is_empty() && Category::from_dir_name(dir).is_some())
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalise the deepest existing ancestor (following symlinks) and append
/// the components that do not exist yet.
fn resolve_through_existing(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut missing = Vec::new();
    loop {
        if let Ok(real) = existing.canonicalize() {
            let mut out = real;
            for part in missing.iter().rev() {
                out.push(part);
            }
            return out;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}
