//! Reduction of stored locations (absolute URLs, proxy-prefixed paths, bare
//! paths) to one canonical storage key.

use once_cell::sync::Lazy;
use regex::Regex;

static SCHEME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://").unwrap());
static SCHEME_HOST_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://[^/?]*").unwrap());
static PERCENT_ESCAPE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%[0-9A-Fa-f]{2}").unwrap());

pub const DEFAULT_PROXY_PREFIX: &str = "/api";

#[derive(Clone, Debug)]
pub struct UrlCanonicalizer {
    proxy_prefix: String,
}

impl Default for UrlCanonicalizer {
    fn default() -> Self {
        Self::new(DEFAULT_PROXY_PREFIX)
    }
}

impl UrlCanonicalizer {
    /// `proxy_prefix` is normalised to `/segment` form; an empty prefix disables stripping.
    #[must_use]
    pub fn new(proxy_prefix: &str) -> Self {
        let trimmed = proxy_prefix.trim().trim_end_matches('/');
        let proxy_prefix = if trimmed.is_empty() || trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        };
        Self { proxy_prefix }
    }

    /// Canonical form of `raw`: scheme and host removed, proxy prefix removed,
    /// query string dropped, percent-escapes decoded, optionally forced to
    /// start with `/`.
    ///
    /// Idempotent for both values of `ensure_leading_slash`.
    #[must_use]
    pub fn canonicalize(&self, raw: &str, ensure_leading_slash: bool) -> String {
        let normalized = self.normalize(raw, ensure_leading_slash);
        self.percent_decoded(normalized, ensure_leading_slash)
    }

    /// Decodes escapes so `/uploads/a%20b.jpg` and `/uploads/a b.jpg` agree.
    /// The escaped form is kept when decoding would leave more escapes or
    /// produce something `normalize` would rewrite (a `?`, a proxy prefix).
    fn percent_decoded(&self, path: String, ensure_leading_slash: bool) -> String {
        if !PERCENT_ESCAPE_REGEX.is_match(&path) {
            return path;
        }
        match urlencoding::decode(&path) {
            Ok(decoded)
                if !PERCENT_ESCAPE_REGEX.is_match(&decoded)
                    && self.normalize(&decoded, ensure_leading_slash) == decoded =>
            {
                decoded.into_owned()
            }
            _ => path,
        }
    }

    fn normalize(&self, raw: &str, ensure_leading_slash: bool) -> String {
        let mut normalized = raw.trim().to_string();
        if normalized.is_empty() {
            return if ensure_leading_slash {
                "/".to_string()
            } else {
                String::new()
            };
        }

        if SCHEME_REGEX.is_match(&normalized) {
            normalized = match url::Url::parse(&normalized) {
                Ok(parsed) if !parsed.cannot_be_a_base() => parsed.path().to_string(),
                _ => SCHEME_HOST_REGEX.replace(&normalized, "").into_owned(),
            };
        }

        if let Some(idx) = normalized.find('?') {
            normalized.truncate(idx);
            normalized.truncate(normalized.trim_end().len());
        }

        if ensure_leading_slash && !normalized.starts_with('/') {
            normalized.insert(0, '/');
        }

        while let Some(rest) = self.strip_proxy_prefix(&normalized) {
            normalized = rest.to_string();
        }

        if ensure_leading_slash && !normalized.starts_with('/') {
            normalized.insert(0, '/');
        }

        normalized
    }

    /// Shorthand for the form used as the catalog key.
    #[must_use]
    pub fn storage_key(&self, raw: &str) -> String {
        self.canonicalize(raw, true)
    }

    /// Both slash variants of a key, as historical rows may hold either.
    #[must_use]
    pub fn slash_variants(&self, raw: &str) -> [String; 2] {
        let with_slash = self.storage_key(raw);
        let without = with_slash.trim_start_matches('/').to_string();
        [with_slash, without]
    }

    fn strip_proxy_prefix<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.proxy_prefix.is_empty() {
            return None;
        }
        let rest = path.strip_prefix(self.proxy_prefix.as_str())?;
        // Only a whole segment counts: "/api/x" strips, "/apiary/x" does not.
        if rest.is_empty() || rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }
}

/// Absolute URL for a stored path, rooted at `base_url`.
#[must_use]
pub fn file_url(base_url: &str, path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base_url.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon() -> UrlCanonicalizer {
        UrlCanonicalizer::default()
    }

    #[test]
    fn strips_scheme_host_prefix_and_query() {
        let c = canon();
        assert_eq!(
            c.canonicalize("http://example.com/api/uploads/image.jpg?size=100", false),
            "/uploads/image.jpg"
        );
        assert_eq!(
            c.canonicalize("https://cdn.example.com:8443/uploads/images/a.png", true),
            "/uploads/images/a.png"
        );
        assert_eq!(
            c.canonicalize("/api/uploads/image.jpg", true),
            "/uploads/image.jpg"
        );
    }

    #[test]
    fn leading_slash_is_optional() {
        let c = canon();
        assert_eq!(c.canonicalize("uploads/a.jpg", false), "uploads/a.jpg");
        assert_eq!(c.canonicalize("uploads/a.jpg", true), "/uploads/a.jpg");
        assert_eq!(c.canonicalize("  /uploads/a.jpg ", false), "/uploads/a.jpg");
    }

    #[test]
    fn prefix_is_stripped_only_as_a_segment() {
        let c = canon();
        assert_eq!(c.canonicalize("/apiary/x.jpg", true), "/apiary/x.jpg");
        assert_eq!(c.canonicalize("/api/api/x.jpg", true), "/x.jpg");
        assert_eq!(c.canonicalize("/api", true), "/");
        assert_eq!(c.canonicalize("api/uploads/x.jpg", true), "/uploads/x.jpg");
    }

    #[test]
    fn custom_and_disabled_prefix() {
        let c = UrlCanonicalizer::new("backend/");
        assert_eq!(c.canonicalize("/backend/uploads/a.jpg", true), "/uploads/a.jpg");
        assert_eq!(c.canonicalize("/api/uploads/a.jpg", true), "/api/uploads/a.jpg");

        let none = UrlCanonicalizer::new("");
        assert_eq!(none.canonicalize("/api/uploads/a.jpg", true), "/api/uploads/a.jpg");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let c = canon();
        let inputs = [
            "",
            "/",
            "a.jpg",
            "api/a.jpg",
            "/api",
            "/api?x=1",
            "/api/api/api/uploads/x.png",
            "http://host",
            "http://host/api",
            "https://host/api/uploads/images/cat.jpg?v=2#frag",
            "ftp://files.example.org/uploads/b.zip",
            "weird+scheme://[bad/uploads/x",
            "/uploads/images/cat.jpg",
            "uploads/images/cat.jpg?",
            "/apiary",
            "/uploads/a.jpg ?v=1",
            "http://h/uploads/a b.jpg",
            "/uploads/a%20b.jpg",
            "/uploads/%2541.jpg",
            "/uploads/a%3Fb.jpg",
            "%2Fapi/x.jpg",
            "/uploads/trailing%20",
            "/uploads/100%25.jpg",
        ];
        for input in inputs {
            for ensure in [false, true] {
                let once = c.canonicalize(input, ensure);
                let twice = c.canonicalize(&once, ensure);
                assert_eq!(once, twice, "not idempotent for {input:?} (ensure={ensure})");
                assert!(!once.contains('?'), "query survived for {input:?}");
            }
        }
    }

    #[test]
    fn percent_escapes_decode_the_same_for_every_form() {
        let c = canon();
        assert_eq!(c.storage_key("http://h/uploads/a b.jpg"), "/uploads/a b.jpg");
        assert_eq!(c.storage_key("/uploads/a%20b.jpg"), "/uploads/a b.jpg");
        assert_eq!(c.storage_key("/uploads/a b.jpg"), "/uploads/a b.jpg");
        assert_eq!(
            c.storage_key("https://h/api/uploads/images/gato%C3%B1o.png"),
            "/uploads/images/gatoño.png"
        );
        assert_eq!(
            c.storage_key("https://h/uploads/images/gatoño.png"),
            "/uploads/images/gatoño.png"
        );
        assert_eq!(c.storage_key("/uploads/100%25.jpg"), "/uploads/100%.jpg");
    }

    #[test]
    fn escapes_that_would_change_meaning_are_kept() {
        let c = canon();
        assert_eq!(c.storage_key("/uploads/%2541.jpg"), "/uploads/%2541.jpg");
        assert_eq!(c.storage_key("/uploads/a%3Fb.jpg"), "/uploads/a%3Fb.jpg");
        assert_eq!(c.storage_key("/api%2Fuploads/a.jpg"), "/api%2Fuploads/a.jpg");
        assert_eq!(c.storage_key("/uploads/bad%FF.jpg"), "/uploads/bad%FF.jpg");
    }

    #[test]
    fn unparsable_url_falls_back_to_regex_strip() {
        let c = canon();
        assert_eq!(c.canonicalize("http://[::1/uploads/a.jpg", true), "/uploads/a.jpg");
    }

    #[test]
    fn slash_variants_cover_both_forms() {
        let c = canon();
        let [with, without] = c.slash_variants("http://h/api/uploads/a.jpg");
        assert_eq!(with, "/uploads/a.jpg");
        assert_eq!(without, "uploads/a.jpg");
    }

    #[test]
    fn builds_full_urls() {
        assert_eq!(
            file_url("https://example.com/", "/uploads/a.jpg"),
            "https://example.com/uploads/a.jpg"
        );
        assert_eq!(
            file_url("https://example.com", "uploads/a.jpg"),
            "https://example.com/uploads/a.jpg"
        );
        assert_eq!(file_url("https://x", "http://y/z"), "http://y/z");
        assert_eq!(file_url("https://x", ""), "");
    }
}
