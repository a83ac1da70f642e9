use super::CardStore;
use crate::{
    error::{EngineError, EngineResult},
    types::UserId,
};
use rusqlite::params;

fn checked_tag(tag: &str) -> EngineResult<&str> {
    let tag = tag.trim();
    if tag.is_empty() || tag.contains(',') {
        return Err(EngineError::InvalidCategory(tag.to_string()));
    }
    Ok(tag)
}

impl CardStore {
    // ── Category selection ────────────────────────────────────────

    /// Follow `tag`. Returns false when it was already selected.
    pub fn select_category(&self, user_id: UserId, tag: &str) -> EngineResult<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO category_selection (user_id, category_tag) VALUES (?1, ?2)",
            params![user_id, checked_tag(tag)?],
        )?;
        Ok(changed > 0)
    }

    pub fn unselect_category(&self, user_id: UserId, tag: &str) -> EngineResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM category_selection WHERE user_id = ?1 AND category_tag = ?2",
            params![user_id, tag.trim()],
        )?;
        Ok(changed > 0)
    }

    /// Selected tags in tag order.
    pub fn category_selections(&self, user_id: UserId) -> EngineResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT category_tag FROM category_selection WHERE user_id = ?1 ORDER BY category_tag ASC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
