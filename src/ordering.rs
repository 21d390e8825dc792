//! Rank reconciliation for drag-and-drop reorderings.
//!
//! After a drag completes the UI knows the final visual order of the list(s)
//! it touched. This module turns that order into rank/parent updates and
//! applies them through a [`RankStore`]:
//!
//! - a move yields updates only for the touched lists (source and
//!   destination, or one list for an in-place permutation)
//! - every touched list is rewritten to a dense 1..N sequence, so replaying
//!   the same final order is idempotent
//! - writes are issued in ascending final rank and the batch stops at the
//!   first failure; the caller must re-fetch before trusting any state

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankUpdate {
    pub id: String,
    pub rank: i64,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRankUpdate {
    pub id: String,
    pub rank: i64,
}

/// A reorder batch stopped before completing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("update for '{failed_id}' failed after {applied} persisted writes: {message}")]
pub struct ApplyError {
    /// Writes from this batch that remain persisted.
    pub applied: usize,
    pub failed_id: String,
    pub message: String,
}

/// Rank updates for one list, given its final visual order.
///
/// Rank is the 1-based position in `ordered_ids`. Slots without an id (for
/// example a placeholder element) still occupy a position but emit nothing.
pub fn reconcile_list<S: AsRef<str>>(
    ordered_ids: &[Option<S>],
    new_parent_id: Option<&str>,
) -> Vec<RankUpdate> {
    ordered_ids
        .iter()
        .enumerate()
        .filter_map(|(index, id)| {
            id.as_ref().map(|id| RankUpdate {
                id: id.as_ref().to_string(),
                rank: index as i64 + 1,
                parent_id: new_parent_id.map(str::to_string),
            })
        })
        .collect()
}

/// Rank updates for the single global group partition.
pub fn reconcile_groups<S: AsRef<str>>(ordered_group_ids: &[Option<S>]) -> Vec<GroupRankUpdate> {
    ordered_group_ids
        .iter()
        .enumerate()
        .filter_map(|(index, id)| {
            id.as_ref().map(|id| GroupRankUpdate {
                id: id.as_ref().to_string(),
                rank: index as i64 + 1,
            })
        })
        .collect()
}

// ==================== Layout & moves ====================

/// One ordered sibling list (a group's bookmarks).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiblingList {
    pub parent_id: String,
    pub items: Vec<String>,
}

/// Current ordered state of every bookmark list, in group order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub lists: Vec<SiblingList>,
}

impl Layout {
    pub fn new(lists: Vec<SiblingList>) -> Self {
        Self { lists }
    }

    fn position_of(&self, item_id: &str) -> Option<(usize, usize)> {
        self.lists.iter().enumerate().find_map(|(list_idx, list)| {
            list.items
                .iter()
                .position(|id| id == item_id)
                .map(|item_idx| (list_idx, item_idx))
        })
    }

    fn list_index(&self, parent_id: &str) -> Option<usize> {
        self.lists.iter().position(|list| list.parent_id == parent_id)
    }
}

/// A completed drag of one bookmark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkMove {
    pub bookmark_id: String,
    pub to_group_id: String,
    /// 0-based index in the destination list after the move (clamped).
    pub to_index: usize,
}

/// Apply `mv` to `layout` and return the updates for the touched lists only.
///
/// Source-list updates come before destination-list updates. `layout` is
/// left holding the post-move order.
pub fn plan_move(layout: &mut Layout, mv: &BookmarkMove) -> Result<Vec<RankUpdate>> {
    let (from_list, from_idx) = layout
        .position_of(&mv.bookmark_id)
        .ok_or_else(|| Error::not_found("bookmark", mv.bookmark_id.as_str()))?;
    let to_list = layout
        .list_index(&mv.to_group_id)
        .ok_or_else(|| Error::not_found("group", mv.to_group_id.as_str()))?;

    let item = layout.lists[from_list].items.remove(from_idx);
    let dest = &mut layout.lists[to_list].items;
    let at = mv.to_index.min(dest.len());
    dest.insert(at, item);

    let mut updates = Vec::new();
    if from_list != to_list {
        updates.extend(list_updates(&layout.lists[from_list]));
    }
    updates.extend(list_updates(&layout.lists[to_list]));
    Ok(updates)
}

/// Move one group to `to_index` in the global order and re-rank every group.
pub fn plan_group_move(
    order: &mut Vec<String>,
    group_id: &str,
    to_index: usize,
) -> Result<Vec<GroupRankUpdate>> {
    let from = order
        .iter()
        .position(|id| id == group_id)
        .ok_or_else(|| Error::not_found("group", group_id))?;
    let id = order.remove(from);
    let at = to_index.min(order.len());
    order.insert(at, id);

    let slots: Vec<Option<&str>> = order.iter().map(|id| Some(id.as_str())).collect();
    Ok(reconcile_groups(&slots))
}

fn list_updates(list: &SiblingList) -> Vec<RankUpdate> {
    let slots: Vec<Option<&str>> = list.items.iter().map(|id| Some(id.as_str())).collect();
    reconcile_list(&slots, Some(list.parent_id.as_str()))
}

// ==================== Applying batches ====================

/// Persistence seam for rank writes.
///
/// The provided batch methods issue one write per item in ascending final
/// rank and stop at the first failure. Stores that support transactions
/// override them to make a batch all-or-nothing.
pub trait RankStore {
    fn write_bookmark_position(&self, update: &RankUpdate) -> Result<()>;

    fn write_group_rank(&self, update: &GroupRankUpdate) -> Result<()>;

    fn apply_bookmark_batch(&self, updates: &[RankUpdate]) -> std::result::Result<usize, ApplyError> {
        apply_in_order(updates, |u| u.rank, |u| u.id.as_str(), |u| self.write_bookmark_position(u))
    }

    fn apply_group_batch(&self, updates: &[GroupRankUpdate]) -> std::result::Result<usize, ApplyError> {
        apply_in_order(updates, |u| u.rank, |u| u.id.as_str(), |u| self.write_group_rank(u))
    }
}

/// Stable sort by final rank; ties keep their planned order.
pub fn write_order<T>(updates: &[T], rank: impl Fn(&T) -> i64) -> Vec<&T> {
    let mut ordered: Vec<&T> = updates.iter().collect();
    ordered.sort_by_key(|u| rank(*u));
    ordered
}

fn apply_in_order<T>(
    updates: &[T],
    rank: impl Fn(&T) -> i64,
    id: impl Fn(&T) -> &str,
    mut write: impl FnMut(&T) -> Result<()>,
) -> std::result::Result<usize, ApplyError> {
    let mut applied = 0;
    for update in write_order(updates, rank) {
        if let Err(e) = write(update) {
            return Err(ApplyError {
                applied,
                failed_id: id(update).to_string(),
                message: e.to_string(),
            });
        }
        applied += 1;
    }
    Ok(applied)
}
