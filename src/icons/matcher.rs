//! Best-match icon lookup for an arbitrary URL.
//!
//! Candidate keys are tried most specific first:
//! 1. host + path prefixes, longest first
//! 2. host alone
//! 3. for hosts with more than two labels, the same again with the
//!    registered parent domain (last two labels)
//!
//! so a table can hold both site-wide icons and per-path overrides.

use std::collections::HashMap;

use url::Url;

use crate::db::IconLookupEntry;

/// In-memory lookup table keyed by normalized website string.
///
/// Loaded once per full data fetch and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct LookupTable {
    entries: HashMap<String, String>,
}

impl LookupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from stored rows. Keys are normalized; rows with an empty key
    /// are dropped and later rows win on duplicate keys.
    pub fn from_entries<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = IconLookupEntry>,
    {
        let mut table = Self::new();
        for row in rows {
            table.insert(&row.website, row.icon);
        }
        table
    }

    pub fn insert(&mut self, website: &str, icon: impl Into<String>) {
        let key = normalize_key(website);
        if !key.is_empty() {
            self.entries.insert(key, icon.into());
        }
    }

    /// Icon stored under an already-normalized key. Empty icons never match.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .map(String::as_str)
            .filter(|icon| !icon.is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lowercase and strip trailing slashes.
pub fn normalize_key(website: &str) -> String {
    website.trim_end_matches('/').to_lowercase()
}

/// Ordered lookup keys for `url`, or `None` if it cannot be parsed (no host,
/// or a path segment that does not percent-decode to UTF-8).
pub fn candidate_keys(url: &str) -> Option<Vec<String>> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str().filter(|h| !h.is_empty())?.to_lowercase();

    let segments = parsed
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| urlencoding::decode(s).map(|d| d.to_lowercase()))
        .collect::<Result<Vec<_>, _>>()
        .ok()?;

    let mut keys = Vec::with_capacity((segments.len() + 1) * 2);
    push_descending(&mut keys, &host, &segments);

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() > 2 {
        let parent_domain = labels[labels.len() - 2..].join(".");
        push_descending(&mut keys, &parent_domain, &segments);
    }

    Some(keys)
}

fn push_descending(keys: &mut Vec<String>, base: &str, segments: &[String]) {
    for len in (1..=segments.len()).rev() {
        keys.push(format!("{}/{}", base, segments[..len].join("/")));
    }
    keys.push(base.to_string());
}

/// First lookup hit for `url`. Unparseable URLs and misses both give `None`.
pub fn match_icon<'a>(url: &str, lookup: &'a LookupTable) -> Option<&'a str> {
    candidate_keys(url)?.iter().find_map(|key| lookup.get(key))
}

/// Hostname of `url`, or an empty string if it cannot be parsed.
pub fn domain_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(String::from))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[(&str, &str)]) -> LookupTable {
        let mut t = LookupTable::new();
        for (website, icon) in rows {
            t.insert(website, *icon);
        }
        t
    }

    #[test]
    fn test_empty_table_never_matches() {
        let empty = LookupTable::new();
        for url in ["https://example.com", "https://a.b.example.com/x/y", "http://localhost:8080/"] {
            assert_eq!(match_icon(url, &empty), None);
        }
    }

    #[test]
    fn test_exact_path_match() {
        let t = table(&[("sub.example.com/a/b", "X")]);
        assert_eq!(match_icon("https://sub.example.com/a/b", &t), Some("X"));
    }

    #[test]
    fn test_host_match() {
        let t = table(&[("sub.example.com", "Y")]);
        assert_eq!(match_icon("https://sub.example.com/a/b", &t), Some("Y"));
    }

    #[test]
    fn test_parent_domain_match() {
        let t = table(&[("example.com", "Z")]);
        assert_eq!(match_icon("https://sub.example.com/a/b", &t), Some("Z"));
    }

    #[test]
    fn test_two_label_host_has_no_parent_fallback() {
        assert_eq!(match_icon("https://example.com", &LookupTable::new()), None);
        let keys = candidate_keys("https://example.com").unwrap();
        assert_eq!(keys, vec!["example.com"]);
    }

    #[test]
    fn test_candidate_order() {
        let keys = candidate_keys("https://Docs.Example.com/Guide/Intro/").unwrap();
        assert_eq!(
            keys,
            vec![
                "docs.example.com/guide/intro",
                "docs.example.com/guide",
                "docs.example.com",
                "example.com/guide/intro",
                "example.com/guide",
                "example.com",
            ]
        );
    }

    #[test]
    fn test_specific_beats_general() {
        let t = table(&[
            ("example.com", "parent"),
            ("sub.example.com", "host"),
            ("example.com/a", "parent-path"),
            ("sub.example.com/a", "host-path"),
        ]);
        assert_eq!(match_icon("https://sub.example.com/a/b", &t), Some("host-path"));
        assert_eq!(match_icon("https://sub.example.com/other", &t), Some("host"));
        assert_eq!(match_icon("https://other.example.com/a", &t), Some("parent-path"));
    }

    #[test]
    fn test_path_segments_are_decoded() {
        let t = table(&[("example.com/my docs", "D")]);
        assert_eq!(match_icon("https://example.com/My%20Docs/page", &t), Some("D"));
    }

    #[test]
    fn test_invalid_input_degrades_to_none() {
        let t = table(&[("example.com", "Z")]);
        assert_eq!(match_icon("not a url", &t), None);
        assert_eq!(match_icon("", &t), None);
        assert_eq!(match_icon("https://example.com/%FF", &t), None);
    }

    #[test]
    fn test_keys_are_normalized_on_insert() {
        let t = table(&[("GitHub.com/Rust-Lang//", "R"), ("/", "ignored")]);
        assert_eq!(t.len(), 1);
        assert_eq!(match_icon("https://github.com/rust-lang/rust", &t), Some("R"));
    }

    #[test]
    fn test_empty_icon_is_not_a_match() {
        let t = table(&[("sub.example.com", ""), ("example.com", "Z")]);
        assert_eq!(match_icon("https://sub.example.com", &t), Some("Z"));
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(domain_of("https://News.Example.org/x"), "news.example.org");
        assert_eq!(domain_of("nope"), "");
    }
}
