use rusqlite::{params, Connection, OptionalExtension, Result};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

use super::models::{Bookmark, Group, IconLookupEntry};
use crate::error::Error;
use crate::ordering::{write_order, ApplyError, GroupRankUpdate, RankStore, RankUpdate};

pub struct Database {
    conn: Mutex<Connection>,
    path: String,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let conn = Connection::open(&path)?;
        let db = Database { conn: Mutex::new(conn), path: path_str };
        db.init()?;
        Ok(db)
    }

    pub fn get_path(&self) -> String {
        self.path.clone()
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn: Mutex::new(conn), path: ":memory:".to_string() };
        db.init()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init(&self) -> Result<()> {
        let conn = self.conn();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS icon_lookup (
                website TEXT PRIMARY KEY,   -- normalized: lowercase, no trailing slash
                icon TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS "group" (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                rank INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS bookmark (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                icon TEXT,
                group_id TEXT,   -- no FK: group removal cascades in the service layer
                rank INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_group_rank ON "group"(rank);
            "#,
        )?;

        // Migration: the first schema had a flat bookmark list with no icon or group
        let has_icon: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM pragma_table_info('bookmark') WHERE name = 'icon'",
            [],
            |row| row.get(0),
        ).unwrap_or(false);

        if !has_icon {
            conn.execute("ALTER TABLE bookmark ADD COLUMN icon TEXT", [])?;
            info!("Migration: added icon column to bookmark");
        }

        let has_group_id: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM pragma_table_info('bookmark') WHERE name = 'group_id'",
            [],
            |row| row.get(0),
        ).unwrap_or(false);

        if !has_group_id {
            conn.execute("ALTER TABLE bookmark ADD COLUMN group_id TEXT", [])?;
            warn!("Migration: added group_id column; existing bookmarks are ungrouped until moved");
        }

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_bookmark_group_rank ON bookmark(group_id, rank)",
            [],
        )?;

        Ok(())
    }

    // ==================== Icon lookup ====================

    pub fn get_icon_lookup(&self) -> Result<Vec<IconLookupEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT website, icon FROM icon_lookup ORDER BY website")?;
        let rows = stmt
            .query_map([], |row| Ok(IconLookupEntry { website: row.get(0)?, icon: row.get(1)? }))?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn upsert_icon_lookup(&self, entry: &IconLookupEntry) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO icon_lookup (website, icon) VALUES (?1, ?2)
             ON CONFLICT(website) DO UPDATE SET icon = excluded.icon",
            params![entry.website, entry.icon],
        )?;
        Ok(())
    }

    pub fn delete_icon_lookup(&self, website: &str) -> Result<usize> {
        let conn = self.conn();
        conn.execute("DELETE FROM icon_lookup WHERE website = ?1", params![website])
    }

    // ==================== Groups ====================

    fn row_to_group(row: &rusqlite::Row) -> Result<Group> {
        Ok(Group { id: row.get(0)?, name: row.get(1)?, rank: row.get(2)? })
    }

    /// All groups by rank; equal ranks fall back to insertion order.
    pub fn get_groups(&self) -> Result<Vec<Group>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(r#"SELECT id, name, rank FROM "group" ORDER BY rank, rowid"#)?;
        let groups = stmt.query_map([], Self::row_to_group)?.collect::<Result<Vec<_>>>()?;
        Ok(groups)
    }

    pub fn get_group(&self, id: &str) -> Result<Option<Group>> {
        let conn = self.conn();
        conn.query_row(
            r#"SELECT id, name, rank FROM "group" WHERE id = ?1"#,
            params![id],
            Self::row_to_group,
        )
        .optional()
    }

    pub fn insert_group(&self, group: &Group) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            r#"INSERT INTO "group" (id, name, rank) VALUES (?1, ?2, ?3)"#,
            params![group.id, group.name, group.rank],
        )?;
        Ok(())
    }

    pub fn rename_group(&self, id: &str, name: &str) -> Result<usize> {
        let conn = self.conn();
        conn.execute(r#"UPDATE "group" SET name = ?2 WHERE id = ?1"#, params![id, name])
    }

    pub fn update_group_rank(&self, id: &str, rank: i64) -> Result<usize> {
        let conn = self.conn();
        conn.execute(r#"UPDATE "group" SET rank = ?2 WHERE id = ?1"#, params![id, rank])
    }

    pub fn delete_group(&self, id: &str) -> Result<usize> {
        let conn = self.conn();
        conn.execute(r#"DELETE FROM "group" WHERE id = ?1"#, params![id])
    }

    /// Highest group rank, 0 when there are no groups.
    pub fn max_group_rank(&self) -> Result<i64> {
        let conn = self.conn();
        conn.query_row(r#"SELECT COALESCE(MAX(rank), 0) FROM "group""#, [], |row| row.get(0))
    }

    // ==================== Bookmarks ====================

    const BOOKMARK_COLUMNS: &'static str = "id, name, url, icon, group_id, rank";

    fn row_to_bookmark(row: &rusqlite::Row) -> Result<Bookmark> {
        Ok(Bookmark {
            id: row.get(0)?,
            name: row.get(1)?,
            url: row.get(2)?,
            icon: row.get(3)?,
            group_id: row.get(4)?,
            rank: row.get(5)?,
        })
    }

    pub fn get_bookmarks(&self) -> Result<Vec<Bookmark>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM bookmark ORDER BY rank, rowid",
            Self::BOOKMARK_COLUMNS
        ))?;
        let bookmarks = stmt.query_map([], Self::row_to_bookmark)?.collect::<Result<Vec<_>>>()?;
        Ok(bookmarks)
    }

    pub fn get_bookmarks_in_group(&self, group_id: &str) -> Result<Vec<Bookmark>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM bookmark WHERE group_id = ?1 ORDER BY rank, rowid",
            Self::BOOKMARK_COLUMNS
        ))?;
        let bookmarks = stmt
            .query_map(params![group_id], Self::row_to_bookmark)?
            .collect::<Result<Vec<_>>>()?;
        Ok(bookmarks)
    }

    pub fn get_bookmark(&self, id: &str) -> Result<Option<Bookmark>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {} FROM bookmark WHERE id = ?1", Self::BOOKMARK_COLUMNS),
            params![id],
            Self::row_to_bookmark,
        )
        .optional()
    }

    pub fn insert_bookmark(&self, bookmark: &Bookmark) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO bookmark (id, name, url, icon, group_id, rank) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                bookmark.id,
                bookmark.name,
                bookmark.url,
                bookmark.icon,
                bookmark.group_id,
                bookmark.rank,
            ],
        )?;
        Ok(())
    }

    /// Edit the user-facing fields; rank and group are owned by reordering.
    pub fn update_bookmark(&self, id: &str, name: &str, url: &str, icon: Option<&str>) -> Result<usize> {
        let conn = self.conn();
        conn.execute(
            "UPDATE bookmark SET name = ?2, url = ?3, icon = ?4 WHERE id = ?1",
            params![id, name, url, icon],
        )
    }

    pub fn update_bookmark_position(&self, id: &str, rank: i64, group_id: Option<&str>) -> Result<usize> {
        let conn = self.conn();
        conn.execute(
            "UPDATE bookmark SET rank = ?2, group_id = ?3 WHERE id = ?1",
            params![id, rank, group_id],
        )
    }

    pub fn delete_bookmark(&self, id: &str) -> Result<usize> {
        let conn = self.conn();
        conn.execute("DELETE FROM bookmark WHERE id = ?1", params![id])
    }

    pub fn delete_bookmarks_in_group(&self, group_id: &str) -> Result<usize> {
        let conn = self.conn();
        conn.execute("DELETE FROM bookmark WHERE group_id = ?1", params![group_id])
    }

    /// Highest rank inside one group, 0 for an empty group.
    pub fn max_bookmark_rank(&self, group_id: &str) -> Result<i64> {
        let conn = self.conn();
        conn.query_row(
            "SELECT COALESCE(MAX(rank), 0) FROM bookmark WHERE group_id = ?1",
            params![group_id],
            |row| row.get(0),
        )
    }
}

// ==================== Rank batches ====================

fn missing_row(entity: &'static str, id: &str, changed: usize) -> crate::Result<()> {
    if changed == 0 {
        Err(Error::not_found(entity, id))
    } else {
        Ok(())
    }
}

/// SQLite can make each batch atomic, so the provided ordered-with-abort
/// batch methods are replaced by one transaction per batch. On failure the
/// transaction rolls back and `applied` is 0.
impl RankStore for Database {
    fn write_bookmark_position(&self, update: &RankUpdate) -> crate::Result<()> {
        let changed = self.update_bookmark_position(&update.id, update.rank, update.parent_id.as_deref())?;
        missing_row("bookmark", &update.id, changed)
    }

    fn write_group_rank(&self, update: &GroupRankUpdate) -> crate::Result<()> {
        let changed = self.update_group_rank(&update.id, update.rank)?;
        missing_row("group", &update.id, changed)
    }

    fn apply_bookmark_batch(&self, updates: &[RankUpdate]) -> std::result::Result<usize, ApplyError> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(|e| batch_error(updates.first().map(|u| u.id.as_str()), e))?;
        let mut applied = 0;
        let mut last_written = None;
        for update in write_order(updates, |u| u.rank) {
            let result = tx
                .execute(
                    "UPDATE bookmark SET rank = ?2, group_id = ?3 WHERE id = ?1",
                    params![update.id, update.rank, update.parent_id],
                )
                .map_err(Error::from)
                .and_then(|changed| missing_row("bookmark", &update.id, changed));
            if let Err(e) = result {
                warn!(id = %update.id, attempted = applied, "[Store] bookmark rank batch rolled back");
                return Err(batch_error(Some(&update.id), e));
            }
            applied += 1;
            last_written = Some(update.id.as_str());
        }
        tx.commit().map_err(|e| commit_error(last_written, applied, e))?;
        Ok(applied)
    }

    fn apply_group_batch(&self, updates: &[GroupRankUpdate]) -> std::result::Result<usize, ApplyError> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(|e| batch_error(updates.first().map(|u| u.id.as_str()), e))?;
        let mut applied = 0;
        let mut last_written = None;
        for update in write_order(updates, |u| u.rank) {
            let result = tx
                .execute(r#"UPDATE "group" SET rank = ?2 WHERE id = ?1"#, params![update.id, update.rank])
                .map_err(Error::from)
                .and_then(|changed| missing_row("group", &update.id, changed));
            if let Err(e) = result {
                warn!(id = %update.id, attempted = applied, "[Store] group rank batch rolled back");
                return Err(batch_error(Some(&update.id), e));
            }
            applied += 1;
            last_written = Some(update.id.as_str());
        }
        tx.commit().map_err(|e| commit_error(last_written, applied, e))?;
        Ok(applied)
    }
}

fn batch_error(failed_id: Option<&str>, e: impl std::fmt::Display) -> ApplyError {
    ApplyError {
        applied: 0,
        failed_id: failed_id.unwrap_or_default().to_string(),
        message: e.to_string(),
    }
}

/// A failed commit rolls back every write; blame the last one issued.
fn commit_error(last_written: Option<&str>, writes: usize, e: impl std::fmt::Display) -> ApplyError {
    ApplyError {
        applied: 0,
        failed_id: last_written.unwrap_or("<empty batch>").to_string(),
        message: format!("commit of {} writes failed: {}", writes, e),
    }
}
