use super::{to_micros, CardStore};
use crate::{
    error::EngineResult,
    event::{EngineEvent, EventLogEntry},
    types::UserId,
};
use chrono::{DateTime, Utc};
use rusqlite::params;

impl CardStore {
    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, user_id: UserId, event: &EngineEvent, at: DateTime<Utc>) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (user_id, event_type, payload, created_at_us)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, event.event_type(), serde_json::to_string(event)?, to_micros(at)],
        )?;
        Ok(())
    }

    pub fn events_for_user(&self, user_id: UserId) -> EngineResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, event_type, payload FROM event_log
             WHERE user_id = ?1 ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![user_id], |row| {
                Ok(EventLogEntry {
                    id:         Some(row.get(0)?),
                    user_id:    row.get(1)?,
                    event_type: row.get(2)?,
                    payload:    row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
