//! Candidate icons for a bookmark being added or edited.
//!
//! Order: lookup-table match, each configured favicon service, then the
//! initial-letter glyph. Duplicates are dropped (first occurrence wins),
//! image candidates are probed concurrently and only those that load are
//! kept. Glyphs are always valid, so a non-empty URL always yields at least
//! one option.

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use super::matcher::{domain_of, match_icon, LookupTable};
use super::probe::IconProbe;
use crate::db::{Bookmark, GLYPH_PREFIX};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IconKind {
    Image,
    Glyph,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconCandidate {
    #[serde(rename = "type")]
    pub kind: IconKind,
    pub value: String,
}

impl IconCandidate {
    pub fn image(value: impl Into<String>) -> Self {
        Self { kind: IconKind::Image, value: value.into() }
    }

    pub fn glyph(value: impl Into<String>) -> Self {
        Self { kind: IconKind::Glyph, value: value.into() }
    }

    /// First letter of `name` uppercased, `?` when the name is blank.
    pub fn glyph_for(name: &str) -> Self {
        let letter = name
            .trim()
            .chars()
            .next()
            .map(|c| c.to_uppercase().collect::<String>())
            .unwrap_or_else(|| "?".to_string());
        Self::glyph(letter)
    }

    /// The string persisted in `bookmark.icon`.
    pub fn to_stored(&self) -> String {
        match self.kind {
            IconKind::Glyph => format!("{}{}", GLYPH_PREFIX, self.value),
            IconKind::Image => self.value.clone(),
        }
    }

    pub fn from_stored(stored: &str) -> Self {
        match stored.strip_prefix(GLYPH_PREFIX) {
            Some(glyph) => Self::glyph(glyph),
            None => Self::image(stored),
        }
    }
}

/// Validated options plus the default selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconChoices {
    pub options: Vec<IconCandidate>,
    pub selected: Option<usize>,
}

impl IconChoices {
    /// No URL yet: the caller hides icon selection.
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn selected_icon(&self) -> Option<&IconCandidate> {
        self.selected.and_then(|i| self.options.get(i))
    }
}

/// Index of the default option.
///
/// A non-empty `preselected` selects the option whose stored form equals it
/// exactly, or nothing if none does (the caller keeps its stored icon).
/// Without a preselection the first option is the default.
pub fn default_selection(options: &[IconCandidate], preselected: Option<&str>) -> Option<usize> {
    match preselected.filter(|p| !p.is_empty()) {
        Some(stored) => options.iter().position(|c| c.to_stored() == stored),
        None if options.is_empty() => None,
        None => Some(0),
    }
}

/// The icon to render for an existing bookmark.
pub fn display_icon(bookmark: &Bookmark, lookup: &LookupTable) -> IconCandidate {
    if let Some(stored) = bookmark.icon.as_deref().filter(|s| !s.is_empty()) {
        return IconCandidate::from_stored(stored);
    }
    match match_icon(&bookmark.url, lookup) {
        Some(icon) => IconCandidate::image(icon),
        None => IconCandidate::glyph_for(&bookmark.name),
    }
}

pub struct IconResolver<P> {
    probe: P,
    services: Vec<String>,
}

impl<P: IconProbe> IconResolver<P> {
    /// `services` are URL templates with a `{domain}` placeholder.
    pub fn new(probe: P, services: Vec<String>) -> Self {
        Self { probe, services }
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Deduplicated, unvalidated candidates in priority order.
    pub fn candidates(&self, name: &str, url: &str, lookup: &LookupTable) -> Vec<IconCandidate> {
        if url.trim().is_empty() {
            return Vec::new();
        }

        let mut raw = Vec::with_capacity(self.services.len() + 2);
        if let Some(icon) = match_icon(url, lookup) {
            // Lookup rows may hold a glyph marker as well as an image
            raw.push(IconCandidate::from_stored(icon));
        }
        let domain = domain_of(url);
        if !domain.is_empty() {
            raw.extend(
                self.services
                    .iter()
                    .map(|template| IconCandidate::image(template.replace("{domain}", &domain))),
            );
        }
        raw.push(IconCandidate::glyph_for(name));

        let mut unique: Vec<IconCandidate> = Vec::with_capacity(raw.len());
        for candidate in raw {
            if !unique.iter().any(|c| c.to_stored() == candidate.to_stored()) {
                unique.push(candidate);
            }
        }
        unique
    }

    /// Probe every image candidate and keep those that load.
    pub async fn resolve(
        &self,
        name: &str,
        url: &str,
        lookup: &LookupTable,
        preselected: Option<&str>,
    ) -> IconChoices {
        let candidates = self.candidates(name, url, lookup);
        if candidates.is_empty() {
            return IconChoices::default();
        }

        let checks = candidates.iter().map(|candidate| async move {
            match candidate.kind {
                IconKind::Glyph => true,
                IconKind::Image => self.probe.probe(&candidate.value).await,
            }
        });
        let valid = join_all(checks).await;

        let options: Vec<IconCandidate> = candidates
            .into_iter()
            .zip(valid)
            .filter_map(|(candidate, ok)| ok.then_some(candidate))
            .collect();
        let selected = default_selection(&options, preselected);
        IconChoices { options, selected }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    const DUCK: &str = "https://icons.duckduckgo.com/ip1/{domain}.ico";
    const CLEARBIT: &str = "https://logo.clearbit.com/{domain}";

    /// Probe that accepts a fixed set of URLs and records every call.
    #[derive(Default)]
    struct ScriptedProbe {
        loads: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedProbe {
        fn accepting(urls: &[&str]) -> Self {
            Self { loads: urls.iter().map(|u| u.to_string()).collect(), calls: Mutex::new(Vec::new()) }
        }
    }

    impl IconProbe for ScriptedProbe {
        async fn probe(&self, url: &str) -> bool {
            self.calls.lock().unwrap().push(url.to_string());
            self.loads.contains(url)
        }
    }

    fn resolver(probe: ScriptedProbe) -> IconResolver<ScriptedProbe> {
        IconResolver::new(probe, vec![DUCK.to_string(), CLEARBIT.to_string()])
    }

    #[tokio::test]
    async fn test_empty_url_gives_empty_list() {
        let r = resolver(ScriptedProbe::default());
        let choices = r.resolve("Acme", "", &LookupTable::new(), None).await;
        assert!(choices.is_empty());
        assert_eq!(choices.selected, None);
        assert!(r.probe().calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_all_probes_fail_leaves_glyph_selected() {
        let r = resolver(ScriptedProbe::default());
        let choices = r.resolve("Acme", "https://acme.test", &LookupTable::new(), None).await;
        assert_eq!(choices.options, vec![IconCandidate::glyph("A")]);
        assert_eq!(choices.selected_icon(), Some(&IconCandidate::glyph("A")));
        assert_eq!(r.probe().calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_candidate_order_and_validation() {
        let mut lookup = LookupTable::new();
        lookup.insert("acme.test", "https://cdn.acme.test/logo.png");
        let r = resolver(ScriptedProbe::accepting(&[
            "https://cdn.acme.test/logo.png",
            "https://logo.clearbit.com/acme.test",
        ]));
        let choices = r.resolve("acme", "https://acme.test/home", &lookup, None).await;
        assert_eq!(
            choices.options,
            vec![
                IconCandidate::image("https://cdn.acme.test/logo.png"),
                IconCandidate::image("https://logo.clearbit.com/acme.test"),
                IconCandidate::glyph("A"),
            ]
        );
        assert_eq!(choices.selected, Some(0));
    }

    #[tokio::test]
    async fn test_lookup_duplicate_of_service_url_appears_once() {
        let mut lookup = LookupTable::new();
        lookup.insert("acme.test", "https://logo.clearbit.com/acme.test");
        let r = resolver(ScriptedProbe::accepting(&["https://logo.clearbit.com/acme.test"]));
        let candidates = r.candidates("Acme", "https://acme.test", &lookup);
        assert_eq!(candidates.len(), 3);

        let choices = r.resolve("Acme", "https://acme.test", &lookup, None).await;
        let hits = choices
            .options
            .iter()
            .filter(|c| c.value == "https://logo.clearbit.com/acme.test")
            .count();
        assert_eq!(hits, 1);
        assert_eq!(r.probe().calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_glyph_lookup_entry_is_kept_without_fetching() {
        let mut lookup = LookupTable::new();
        lookup.insert("acme.test", "text:A");
        let r = resolver(ScriptedProbe::default());

        let candidates = r.candidates("Acme", "https://acme.test", &lookup);
        assert_eq!(candidates[0], IconCandidate::glyph("A"));
        assert_eq!(candidates.iter().filter(|c| c.kind == IconKind::Glyph).count(), 1);

        let choices = r.resolve("Acme", "https://acme.test", &lookup, None).await;
        assert_eq!(choices.options, vec![IconCandidate::glyph("A")]);
        assert_eq!(choices.selected, Some(0));
        assert!(!r.probe().calls.lock().unwrap().iter().any(|u| u.starts_with("text:")));
    }

    #[tokio::test]
    async fn test_preselected_matches_stored_form() {
        let r = resolver(ScriptedProbe::accepting(&["https://icons.duckduckgo.com/ip1/acme.test.ico"]));
        let choices = r
            .resolve("Acme", "https://acme.test", &LookupTable::new(), Some("text:A"))
            .await;
        assert_eq!(choices.options.len(), 2);
        assert_eq!(choices.selected, Some(1));
    }

    #[tokio::test]
    async fn test_unmatched_preselection_selects_nothing() {
        let r = resolver(ScriptedProbe::default());
        let choices = r
            .resolve("Acme", "https://acme.test", &LookupTable::new(), Some("data:image/png;base64,AAAA"))
            .await;
        assert_eq!(choices.options.len(), 1);
        assert_eq!(choices.selected, None);
    }

    #[test]
    fn test_unparseable_url_still_offers_glyph() {
        let r = resolver(ScriptedProbe::default());
        let candidates = r.candidates("", "not a url", &LookupTable::new());
        assert_eq!(candidates, vec![IconCandidate::glyph("?")]);
    }

    #[test]
    fn test_stored_round_trip_of_glyph_marker() {
        let glyph = IconCandidate::glyph_for("  zebra");
        assert_eq!(glyph.to_stored(), "text:Z");
        assert_eq!(IconCandidate::from_stored("text:Z"), glyph);
        assert_eq!(IconCandidate::from_stored("https://x/y.png").kind, IconKind::Image);
    }

    #[test]
    fn test_candidate_serializes_with_type_tag() {
        let json = serde_json::to_value(IconCandidate::glyph("A")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "glyph", "value": "A"}));
    }

    #[test]
    fn test_display_icon_precedence() {
        let mut lookup = LookupTable::new();
        lookup.insert("example.com", "https://example.com/icon.png");
        let mut bookmark = Bookmark {
            id: "1".into(),
            name: "example".into(),
            url: "https://www.example.com".into(),
            icon: Some("text:Q".into()),
            group_id: None,
            rank: 1,
        };
        assert_eq!(display_icon(&bookmark, &lookup), IconCandidate::glyph("Q"));

        bookmark.icon = None;
        assert_eq!(display_icon(&bookmark, &lookup), IconCandidate::image("https://example.com/icon.png"));

        bookmark.url = "https://unknown.test".into();
        assert_eq!(display_icon(&bookmark, &lookup), IconCandidate::glyph("E"));
    }
}
