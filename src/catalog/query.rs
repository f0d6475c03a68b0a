//! Typed catalog filters. Stores translate a [`Predicate`] into their own
//! query language; the in-memory store evaluates it directly.

use super::{MediaEntry, MediaType};

/// Separator that turns a description search into OR-of-keywords mode.
pub const KEYWORD_SEPARATOR: char = '|';

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Predicate {
    All,
    UrlEq(String),
    UrlIn(Vec<String>),
    TypeEq(MediaType),
    FilenameEq(String),
    MimeTypeEq(String),
    AddedToLibrary(bool),
    /// Case-insensitive substring over description texts. The keyword is kept
    /// raw; translation to a pattern language must go through [`escape_like`].
    DescriptionContains(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::All, p) | (p, Self::All) => p,
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), p) => {
                left.push(p);
                Self::And(left)
            }
            (p, Self::And(mut right)) => {
                right.insert(0, p);
                Self::And(right)
            }
            (l, r) => Self::And(vec![l, r]),
        }
    }

    /// OR over the `|`-separated keywords of `search`. Blank keywords are
    /// dropped; `None` when nothing is left to search for.
    #[must_use]
    pub fn any_description_keyword(search: &str) -> Option<Self> {
        let mut keywords: Vec<Self> = search
            .split(KEYWORD_SEPARATOR)
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| Self::DescriptionContains(k.to_string()))
            .collect();
        match keywords.len() {
            0 => None,
            1 => keywords.pop(),
            _ => Some(Self::Or(keywords)),
        }
    }

    #[must_use]
    pub fn matches(&self, entry: &MediaEntry) -> bool {
        match self {
            Self::All => true,
            Self::UrlEq(url) => entry.url == *url,
            Self::UrlIn(urls) => urls.iter().any(|u| *u == entry.url),
            Self::TypeEq(t) => entry.media_type == *t,
            Self::FilenameEq(name) => entry.filename == *name,
            Self::MimeTypeEq(mime) => entry.mimetype == *mime,
            Self::AddedToLibrary(flag) => entry.is_added_to_library == *flag,
            Self::DescriptionContains(keyword) => {
                let needle = keyword.to_lowercase();
                entry
                    .descriptions
                    .iter()
                    .any(|d| d.text.to_lowercase().contains(&needle))
            }
            Self::And(parts) => parts.iter().all(|p| p.matches(entry)),
            Self::Or(parts) => parts.iter().any(|p| p.matches(entry)),
        }
    }
}

/// Escape a keyword for use inside a `LIKE`/`ILIKE` pattern with `ESCAPE '\'`.
#[must_use]
pub fn escape_like(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len());
    for ch in keyword.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// `%keyword%` with the keyword escaped.
#[must_use]
pub fn contains_pattern(keyword: &str) -> String {
    format!("%{}%", escape_like(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Description;
    use chrono::Utc;
    use uuid::Uuid;

    fn entry(texts: &[&str]) -> MediaEntry {
        let now = Utc::now();
        MediaEntry {
            id: Uuid::new_v4(),
            url: "/uploads/images/cat.jpg".into(),
            media_type: MediaType::Image,
            filename: "cat.jpg".into(),
            size: 10,
            mimetype: "image/jpeg".into(),
            descriptions: texts
                .iter()
                .map(|t| Description {
                    id: Uuid::new_v4(),
                    text: (*t).to_string(),
                    created_at: now,
                })
                .collect(),
            is_added_to_library: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn single_keyword_is_not_wrapped_in_or() {
        assert_eq!(
            Predicate::any_description_keyword("  orange "),
            Some(Predicate::DescriptionContains("orange".into()))
        );
        assert_eq!(Predicate::any_description_keyword(" | |"), None);
    }

    #[test]
    fn separator_builds_or_of_keywords() {
        let p = Predicate::any_description_keyword("orange|tabby | ").unwrap();
        assert_eq!(
            p,
            Predicate::Or(vec![
                Predicate::DescriptionContains("orange".into()),
                Predicate::DescriptionContains("tabby".into()),
            ])
        );
        assert!(p.matches(&entry(&["A Tabby cat"])));
        assert!(!p.matches(&entry(&["black cat"])));
    }

    #[test]
    fn keyword_matching_is_literal_and_case_insensitive() {
        let e = entry(&["Sale: 50% off (a+b)*"]);
        assert!(Predicate::DescriptionContains("50%".into()).matches(&e));
        assert!(Predicate::DescriptionContains("(A+B)*".into()).matches(&e));
        assert!(!Predicate::DescriptionContains(".*".into()).matches(&e));
    }

    #[test]
    fn combinators() {
        let e = entry(&["orange"]);
        let p = Predicate::TypeEq(MediaType::Image)
            .and(Predicate::All)
            .and(Predicate::AddedToLibrary(true));
        assert!(p.matches(&e));
        assert!(!p.clone().and(Predicate::TypeEq(MediaType::Video)).matches(&e));
        assert!(!Predicate::Or(vec![]).matches(&e));
        assert!(Predicate::And(vec![]).matches(&e));
        assert!(Predicate::UrlIn(vec!["/x".into(), e.url.clone()]).matches(&e));
    }

    #[test]
    fn escapes_like_metacharacters() {
        assert_eq!(escape_like(r"100%_a\b"), r"100\%\_a\\b");
        assert_eq!(contains_pattern("cat"), "%cat%");
    }
}
