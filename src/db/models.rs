use serde::{Deserialize, Serialize};

/// Marker prefix for icons stored as a single text glyph (`text:A`).
pub const GLYPH_PREFIX: &str = "text:";

// Ordering: `rank` orders a bookmark within its group_id partition and a group
// within the single global partition. Lower ranks sort first. Duplicate ranks
// are tolerated on read (tie-break by insertion order) and rewritten densely
// by the next reconciliation pass.

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bookmark {
    pub id: String,
    pub name: String,
    pub url: String,
    pub icon: Option<String>,     // `text:X` glyph marker, image URL or data: URI
    pub group_id: Option<String>, // None only for bookmarks saved before groups existed
    pub rank: i64,
}

impl Bookmark {
    /// Stored glyph character, if the icon is a `text:` marker.
    pub fn glyph(&self) -> Option<&str> {
        self.icon.as_deref().and_then(|icon| icon.strip_prefix(GLYPH_PREFIX))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub rank: i64,
}

/// Reference row mapping a site key (host or host/path) to a known-good icon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IconLookupEntry {
    pub website: String,
    pub icon: String,
}
