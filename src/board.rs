//! Board service: the user actions of the bookmark board over the table store.
//!
//! Shared by the server and CLI binaries. Every mutation either completes or
//! returns an error without touching local state; callers re-fetch with
//! [`Board::load`] after any failure instead of trusting optimistic changes.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::db::{Bookmark, Database, Group, GLYPH_PREFIX};
use crate::error::{Error, Result};
use crate::icons::{display_icon, HttpProbe, IconCandidate, IconChoices, IconInliner, IconProbe, IconResolver, LookupTable};
use crate::ordering::{self, BookmarkMove, Layout, RankStore, SiblingList};
use crate::settings::Settings;

#[derive(Debug, Clone, Serialize)]
pub struct BookmarkView {
    #[serde(flatten)]
    pub bookmark: Bookmark,
    pub display_icon: IconCandidate,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupView {
    #[serde(flatten)]
    pub group: Group,
    pub bookmarks: Vec<BookmarkView>,
}

/// Result of one full fetch. Holds the lookup table used for this session.
#[derive(Debug, Clone, Serialize)]
pub struct BoardSnapshot {
    pub groups: Vec<GroupView>,
    /// Bookmarks whose group is missing (saved before groups existed)
    pub orphans: Vec<BookmarkView>,
    #[serde(skip)]
    pub lookup: Arc<LookupTable>,
}

impl BoardSnapshot {
    pub fn layout(&self) -> Layout {
        Layout::new(
            self.groups
                .iter()
                .map(|g| SiblingList {
                    parent_id: g.group.id.clone(),
                    items: g.bookmarks.iter().map(|b| b.bookmark.id.clone()).collect(),
                })
                .collect(),
        )
    }

    pub fn group_order(&self) -> Vec<String> {
        self.groups.iter().map(|g| g.group.id.clone()).collect()
    }

    pub fn bookmark_count(&self) -> usize {
        self.groups.iter().map(|g| g.bookmarks.len()).sum::<usize>() + self.orphans.len()
    }
}

pub struct Board<P = HttpProbe> {
    db: Database,
    settings: Settings,
    resolver: IconResolver<P>,
}

impl Board<HttpProbe> {
    pub fn open(db: Database, settings: Settings) -> Result<Self> {
        let probe = HttpProbe::new(settings.probe_timeout())?;
        Ok(Self::with_probe(db, settings, probe))
    }
}

impl<P: IconProbe + IconInliner> Board<P> {
    pub fn with_probe(db: Database, settings: Settings, probe: P) -> Self {
        let resolver = IconResolver::new(probe, settings.favicon_services.clone());
        Self { db, settings, resolver }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // ==================== Reads ====================

    /// Current lookup table. A failed fetch degrades to an empty table.
    pub fn lookup_table(&self) -> LookupTable {
        match self.db.get_icon_lookup() {
            Ok(rows) => LookupTable::from_entries(rows),
            Err(e) => {
                warn!(error = %e, "[Board] failed to fetch icon_lookup, continuing without it");
                LookupTable::new()
            }
        }
    }

    /// Full fetch: lookup table, groups by rank, bookmarks by rank.
    pub fn load(&self) -> Result<BoardSnapshot> {
        let lookup = Arc::new(self.lookup_table());
        let groups = self.db.get_groups()?;
        let bookmarks = self.db.get_bookmarks()?;

        let mut views: Vec<GroupView> = groups
            .into_iter()
            .map(|group| GroupView { group, bookmarks: Vec::new() })
            .collect();
        let mut orphans = Vec::new();

        for bookmark in bookmarks {
            let view = BookmarkView {
                display_icon: display_icon(&bookmark, &lookup),
                bookmark,
            };
            let slot = view
                .bookmark
                .group_id
                .as_deref()
                .and_then(|gid| views.iter_mut().find(|g| g.group.id == gid));
            match slot {
                Some(group) => group.bookmarks.push(view),
                None => orphans.push(view),
            }
        }

        Ok(BoardSnapshot { groups: views, orphans, lookup })
    }

    /// Persisted ordering of every group's bookmarks.
    pub fn layout(&self) -> Result<Layout> {
        let groups = self.db.get_groups()?;
        let bookmarks = self.db.get_bookmarks()?;
        let lists = groups
            .into_iter()
            .map(|group| SiblingList {
                items: bookmarks
                    .iter()
                    .filter(|b| b.group_id.as_deref() == Some(group.id.as_str()))
                    .map(|b| b.id.clone())
                    .collect(),
                parent_id: group.id,
            })
            .collect();
        Ok(Layout::new(lists))
    }

    // ==================== Groups ====================

    pub fn add_group(&self, name: &str) -> Result<Group> {
        let name = required(name, "Group name")?;
        let group = Group {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            rank: self.db.max_group_rank()? + 1,
        };
        self.db.insert_group(&group)?;
        info!(id = %group.id, rank = group.rank, "[Board] added group '{}'", group.name);
        Ok(group)
    }

    pub fn rename_group(&self, id: &str, name: &str) -> Result<Group> {
        let name = required(name, "Group name")?;
        if self.db.rename_group(id, name)? == 0 {
            return Err(Error::not_found("group", id));
        }
        info!(id, "[Board] renamed group to '{}'", name);
        self.db.get_group(id)?.ok_or_else(|| Error::not_found("group", id))
    }

    /// Delete a group and its bookmarks. Returns the number of bookmarks removed.
    pub fn remove_group(&self, id: &str) -> Result<usize> {
        if self.db.get_group(id)?.is_none() {
            return Err(Error::not_found("group", id));
        }
        let removed = self.db.delete_bookmarks_in_group(id)?;
        self.db.delete_group(id)?;
        info!(id, bookmarks = removed, "[Board] removed group");
        Ok(removed)
    }

    /// Persist a final group order and re-fetch.
    ///
    /// `ordered_ids` must list every group exactly once.
    pub fn reorder_groups(&self, ordered_ids: &[String]) -> Result<BoardSnapshot> {
        let current: HashSet<String> = self.db.get_groups()?.into_iter().map(|g| g.id).collect();
        let listed = unique_ids(ordered_ids)?;
        if listed.len() != current.len() || !current.iter().all(|id| listed.contains(id.as_str())) {
            return Err(Error::invalid("Group order must list every group exactly once"));
        }
        let slots: Vec<Option<&str>> = ordered_ids.iter().map(|id| Some(id.as_str())).collect();
        let updates = ordering::reconcile_groups(&slots);
        let applied = self.db.apply_group_batch(&updates)?;
        info!(applied, "[Board] group order saved");
        self.load()
    }

    /// Move one group to `to_index` and re-fetch.
    pub fn move_group(&self, group_id: &str, to_index: usize) -> Result<BoardSnapshot> {
        let mut order: Vec<String> = self.db.get_groups()?.into_iter().map(|g| g.id).collect();
        let updates = ordering::plan_group_move(&mut order, group_id, to_index)?;
        let applied = self.db.apply_group_batch(&updates)?;
        info!(group_id, to_index, applied, "[Board] group moved");
        self.load()
    }

    // ==================== Bookmarks ====================

    /// Add a bookmark at the end of `group_id`.
    pub async fn add_bookmark(
        &self,
        group_id: Option<&str>,
        name: &str,
        url: &str,
        icon: Option<&str>,
    ) -> Result<Bookmark> {
        let name = required(name, "Name")?;
        let url = required(url, "URL")?;
        let group_id = group_id
            .filter(|g| !g.is_empty())
            .ok_or_else(|| Error::invalid("Please select a group to save the bookmark in."))?;
        if self.db.get_group(group_id)?.is_none() {
            return Err(Error::not_found("group", group_id));
        }

        let icon = self.prepare_icon(icon).await;
        let bookmark = Bookmark {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            url: url.to_string(),
            icon,
            group_id: Some(group_id.to_string()),
            rank: self.db.max_bookmark_rank(group_id)? + 1,
        };
        self.db.insert_bookmark(&bookmark)?;
        info!(id = %bookmark.id, group_id, rank = bookmark.rank, "[Board] added bookmark '{}'", bookmark.name);
        Ok(bookmark)
    }

    /// Update name, URL and icon. Group and rank are left to reordering.
    pub async fn edit_bookmark(&self, id: &str, name: &str, url: &str, icon: Option<&str>) -> Result<Bookmark> {
        let name = required(name, "Name")?;
        let url = required(url, "URL")?;
        if self.db.get_bookmark(id)?.is_none() {
            return Err(Error::not_found("bookmark", id));
        }

        let icon = self.prepare_icon(icon).await;
        if self.db.update_bookmark(id, name, url, icon.as_deref())? == 0 {
            return Err(Error::not_found("bookmark", id));
        }
        info!(id, "[Board] edited bookmark '{}'", name);
        self.db.get_bookmark(id)?.ok_or_else(|| Error::not_found("bookmark", id))
    }

    pub fn remove_bookmark(&self, id: &str) -> Result<()> {
        if self.db.delete_bookmark(id)? == 0 {
            return Err(Error::not_found("bookmark", id));
        }
        info!(id, "[Board] removed bookmark");
        Ok(())
    }

    /// Persist one completed drag and re-fetch.
    ///
    /// Only the source and destination lists are rewritten.
    pub fn move_bookmark(&self, mv: &BookmarkMove) -> Result<BoardSnapshot> {
        let mut layout = self.layout()?;
        let updates = ordering::plan_move(&mut layout, mv)?;
        let applied = self.db.apply_bookmark_batch(&updates)?;
        info!(
            bookmark_id = %mv.bookmark_id,
            to_group_id = %mv.to_group_id,
            to_index = mv.to_index,
            applied,
            "[Board] bookmark moved"
        );
        self.load()
    }

    /// Persist the final visual order of one group's list and re-fetch.
    ///
    /// Every listed bookmark joins `group_id`, so this also records a move
    /// into the group when the UI reports the destination list only. Every
    /// current member of the group must be listed.
    pub fn reorder_bookmarks(&self, group_id: &str, ordered_ids: &[String]) -> Result<BoardSnapshot> {
        if self.db.get_group(group_id)?.is_none() {
            return Err(Error::not_found("group", group_id));
        }
        let listed = unique_ids(ordered_ids)?;
        let missing = self
            .db
            .get_bookmarks_in_group(group_id)?
            .into_iter()
            .filter(|b| !listed.contains(b.id.as_str()))
            .count();
        if missing > 0 {
            return Err(Error::invalid(format!(
                "Bookmark order leaves out {} bookmark(s) of the group",
                missing
            )));
        }
        let slots: Vec<Option<&str>> = ordered_ids.iter().map(|id| Some(id.as_str())).collect();
        let updates = ordering::reconcile_list(&slots, Some(group_id));
        let applied = self.db.apply_bookmark_batch(&updates)?;
        info!(group_id, applied, "[Board] bookmark order saved");
        self.load()
    }

    // ==================== Icons ====================

    /// Validated icon options for the add/edit form.
    pub async fn resolve_icons(
        &self,
        lookup: &LookupTable,
        name: &str,
        url: &str,
        preselected: Option<&str>,
    ) -> IconChoices {
        self.resolver.resolve(name.trim(), url.trim(), lookup, preselected).await
    }

    /// Normalize the chosen icon for storage, inlining image URLs if enabled.
    /// A failed download keeps the URL.
    async fn prepare_icon(&self, icon: Option<&str>) -> Option<String> {
        let icon = icon.map(str::trim).filter(|s| !s.is_empty())?;
        if !self.settings.inline_icons || icon.starts_with("data:") || icon.starts_with(GLYPH_PREFIX) {
            return Some(icon.to_string());
        }
        match self.resolver.probe().inline(icon).await {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(error = %e, "[Board] could not inline icon, storing URL");
                Some(icon.to_string())
            }
        }
    }
}

/// Web search URL for `query`, or `None` for a blank query.
pub fn search_url(settings: &Settings, query: &str) -> Option<String> {
    let query = query.trim();
    if query.is_empty() {
        return None;
    }
    Some(format!("{}{}", settings.search_url, urlencoding::encode(query)))
}

/// Set of listed ids, rejecting duplicates.
fn unique_ids(ids: &[String]) -> Result<HashSet<&str>> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(Error::invalid(format!("'{}' is listed more than once", id)));
        }
    }
    Ok(seen)
}

fn required<'a>(value: &'a str, field: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(Error::invalid(format!("{} is required", field)))
    } else {
        Ok(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::IconLookupEntry;
    use crate::icons::IconKind;

    /// Probe that never touches the network.
    struct OfflineProbe {
        inline_ok: bool,
    }

    impl IconProbe for OfflineProbe {
        async fn probe(&self, url: &str) -> bool {
            url.starts_with("https://ok.")
        }
    }

    impl IconInliner for OfflineProbe {
        async fn inline(&self, url: &str) -> Result<String> {
            if self.inline_ok {
                Ok(format!("data:image/png;base64,{}", url.len()))
            } else {
                Err(Error::Probe("offline".into()))
            }
        }
    }

    fn board(inline_ok: bool) -> Board<OfflineProbe> {
        Board::with_probe(Database::in_memory().unwrap(), Settings::default(), OfflineProbe { inline_ok })
    }

    fn ids(snapshot: &BoardSnapshot, group: usize) -> Vec<String> {
        snapshot.groups[group].bookmarks.iter().map(|b| b.bookmark.name.clone()).collect()
    }

    #[tokio::test]
    async fn test_add_appends_to_target_group() {
        let b = board(true);
        let g1 = b.add_group("Work").unwrap();
        let g2 = b.add_group("Home").unwrap();
        assert_eq!((g1.rank, g2.rank), (1, 2));

        b.add_bookmark(Some(&g1.id), "a", "https://a.test", None).await.unwrap();
        b.add_bookmark(Some(&g1.id), "b", "https://b.test", None).await.unwrap();
        let c = b.add_bookmark(Some(&g2.id), "c", "https://c.test", None).await.unwrap();
        assert_eq!(c.rank, 1);

        let snap = b.load().unwrap();
        assert_eq!(ids(&snap, 0), vec!["a", "b"]);
        assert_eq!(ids(&snap, 1), vec!["c"]);
        assert_eq!(snap.bookmark_count(), 3);
    }

    #[tokio::test]
    async fn test_add_requires_fields_and_group() {
        let b = board(true);
        assert!(matches!(b.add_bookmark(None, "a", "https://a.test", None).await, Err(Error::Invalid(_))));
        assert!(matches!(b.add_bookmark(Some("nope"), "a", "https://a.test", None).await, Err(Error::NotFound { .. })));
        let g = b.add_group("G").unwrap();
        assert!(matches!(b.add_bookmark(Some(&g.id), "  ", "https://a.test", None).await, Err(Error::Invalid(_))));
        assert!(matches!(b.add_group(""), Err(Error::Invalid(_))));
    }

    #[tokio::test]
    async fn test_icons_are_inlined_on_save() {
        let b = board(true);
        let g = b.add_group("G").unwrap();
        let glyph = b.add_bookmark(Some(&g.id), "a", "https://a.test", Some("text:A")).await.unwrap();
        assert_eq!(glyph.icon.as_deref(), Some("text:A"));

        let image = b.add_bookmark(Some(&g.id), "b", "https://b.test", Some("https://ok.b.test/i.png")).await.unwrap();
        assert!(image.icon.unwrap().starts_with("data:image/png"));
    }

    #[tokio::test]
    async fn test_failed_inline_keeps_url() {
        let b = board(false);
        let g = b.add_group("G").unwrap();
        let saved = b.add_bookmark(Some(&g.id), "b", "https://b.test", Some("https://ok.b.test/i.png")).await.unwrap();
        assert_eq!(saved.icon.as_deref(), Some("https://ok.b.test/i.png"));
    }

    #[tokio::test]
    async fn test_edit_keeps_group_and_rank() {
        let b = board(true);
        let g = b.add_group("G").unwrap();
        let a = b.add_bookmark(Some(&g.id), "a", "https://a.test", None).await.unwrap();
        let edited = b.edit_bookmark(&a.id, "renamed", "https://r.test", Some("text:R")).await.unwrap();
        assert_eq!(edited.name, "renamed");
        assert_eq!(edited.group_id, a.group_id);
        assert_eq!(edited.rank, a.rank);
        assert!(matches!(b.edit_bookmark("ghost", "x", "y", None).await, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_remove_group_cascades() {
        let b = board(true);
        let g1 = b.add_group("A").unwrap();
        let g2 = b.add_group("B").unwrap();
        b.add_bookmark(Some(&g1.id), "a", "https://a.test", None).await.unwrap();
        b.add_bookmark(Some(&g1.id), "b", "https://b.test", None).await.unwrap();
        b.add_bookmark(Some(&g2.id), "c", "https://c.test", None).await.unwrap();

        assert_eq!(b.remove_group(&g1.id).unwrap(), 2);
        let snap = b.load().unwrap();
        assert_eq!(snap.groups.len(), 1);
        assert_eq!(snap.bookmark_count(), 1);
        assert!(matches!(b.remove_group(&g1.id), Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_move_bookmark_across_groups() {
        let b = board(true);
        let ga = b.add_group("A").unwrap();
        let gb = b.add_group("B").unwrap();
        let gc = b.add_group("C").unwrap();
        let mut a = Vec::new();
        for name in ["a1", "a2", "a3"] {
            a.push(b.add_bookmark(Some(&ga.id), name, "https://a.test", None).await.unwrap());
        }
        for name in ["b1", "b2"] {
            b.add_bookmark(Some(&gb.id), name, "https://b.test", None).await.unwrap();
        }
        let c1 = b.add_bookmark(Some(&gc.id), "c1", "https://c.test", None).await.unwrap();

        let mv = BookmarkMove { bookmark_id: a[1].id.clone(), to_group_id: gb.id.clone(), to_index: 1 };
        let snap = b.move_bookmark(&mv).unwrap();

        assert_eq!(ids(&snap, 0), vec!["a1", "a3"]);
        assert_eq!(ids(&snap, 1), vec!["b1", "a2", "b2"]);
        let ranks: Vec<i64> = snap.groups[1].bookmarks.iter().map(|v| v.bookmark.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
        assert_eq!(b.db().get_bookmark(&c1.id).unwrap().unwrap(), c1);
    }

    #[tokio::test]
    async fn test_replaying_an_order_is_idempotent() {
        let b = board(true);
        let g = b.add_group("G").unwrap();
        let x = b.add_bookmark(Some(&g.id), "x", "https://x.test", None).await.unwrap();
        let y = b.add_bookmark(Some(&g.id), "y", "https://y.test", None).await.unwrap();
        let order = vec![y.id.clone(), x.id.clone()];

        let first = b.reorder_bookmarks(&g.id, &order).unwrap();
        let second = b.reorder_bookmarks(&g.id, &order).unwrap();
        assert_eq!(ids(&first, 0), vec!["y", "x"]);
        assert_eq!(ids(&first, 0), ids(&second, 0));
    }

    #[tokio::test]
    async fn test_failed_reorder_leaves_store_untouched() {
        let b = board(true);
        let g = b.add_group("G").unwrap();
        let x = b.add_bookmark(Some(&g.id), "x", "https://x.test", None).await.unwrap();
        let order = vec!["ghost".to_string(), x.id.clone()];
        assert!(matches!(b.reorder_bookmarks(&g.id, &order), Err(Error::Reorder(_))));
        assert_eq!(b.db().get_bookmark(&x.id).unwrap().unwrap().rank, 1);
    }

    #[test]
    fn test_group_reordering() {
        let b = board(true);
        let a = b.add_group("A").unwrap();
        let c = b.add_group("C").unwrap();
        let snap = b.reorder_groups(&[c.id.clone(), a.id.clone()]).unwrap();
        assert_eq!(snap.group_order(), vec![c.id.clone(), a.id.clone()]);

        let snap = b.move_group(&c.id, 5).unwrap();
        assert_eq!(snap.group_order(), vec![a.id, c.id]);
    }

    #[test]
    fn test_partial_group_order_is_rejected() {
        let b = board(true);
        let a = b.add_group("A").unwrap();
        let gb = b.add_group("B").unwrap();
        let c = b.add_group("C").unwrap();

        assert!(matches!(b.reorder_groups(&[c.id.clone(), a.id.clone()]), Err(Error::Invalid(_))));
        assert!(matches!(
            b.reorder_groups(&[c.id.clone(), a.id.clone(), a.id.clone()]),
            Err(Error::Invalid(_))
        ));
        let ranks: Vec<i64> = b.db().get_groups().unwrap().iter().map(|g| g.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
        assert_eq!(b.load().unwrap().group_order(), vec![a.id, gb.id, c.id]);
    }

    #[tokio::test]
    async fn test_partial_bookmark_order_is_rejected() {
        let b = board(true);
        let g = b.add_group("G").unwrap();
        let other = b.add_group("Other").unwrap();
        let x = b.add_bookmark(Some(&g.id), "x", "https://x.test", None).await.unwrap();
        let y = b.add_bookmark(Some(&g.id), "y", "https://y.test", None).await.unwrap();
        let z = b.add_bookmark(Some(&other.id), "z", "https://z.test", None).await.unwrap();

        assert!(matches!(b.reorder_bookmarks(&g.id, &[y.id.clone()]), Err(Error::Invalid(_))));
        assert_eq!(ids(&b.load().unwrap(), 0), vec!["x", "y"]);

        // a moved-in bookmark may be listed in addition to the members
        let snap = b.reorder_bookmarks(&g.id, &[y.id.clone(), z.id.clone(), x.id.clone()]).unwrap();
        assert_eq!(ids(&snap, 0), vec!["y", "z", "x"]);
        assert!(snap.groups[1].bookmarks.is_empty());
    }

    #[test]
    fn test_orphans_and_display_icons() {
        let b = board(true);
        b.db()
            .upsert_icon_lookup(&IconLookupEntry { website: "Example.com/".into(), icon: "https://i/e.png".into() })
            .unwrap();
        b.db()
            .insert_bookmark(&Bookmark {
                id: "legacy".into(),
                name: "old".into(),
                url: "https://www.example.com/x".into(),
                icon: None,
                group_id: None,
                rank: 1,
            })
            .unwrap();

        let snap = b.load().unwrap();
        assert_eq!(snap.orphans.len(), 1);
        assert_eq!(snap.orphans[0].display_icon, IconCandidate::image("https://i/e.png"));
        assert_eq!(snap.lookup.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_icons_uses_session_lookup() {
        let b = board(true);
        let mut lookup = LookupTable::new();
        lookup.insert("site.test", "https://ok.cdn/site.png");
        let choices = b.resolve_icons(&lookup, " site ", "https://site.test", None).await;
        assert_eq!(choices.options[0], IconCandidate::image("https://ok.cdn/site.png"));
        assert_eq!(choices.options.last().map(|c| c.kind), Some(IconKind::Glyph));
        assert_eq!(choices.selected, Some(0));
    }

    #[test]
    fn test_search_url() {
        let settings = Settings::default();
        assert_eq!(
            search_url(&settings, " rust lang "),
            Some("https://www.google.com/search?q=rust%20lang".to_string())
        );
        assert_eq!(search_url(&settings, "   "), None);
    }
}
