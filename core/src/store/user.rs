use super::CardStore;
use crate::{error::EngineResult, model::UserProfile, types::UserId};
use rusqlite::{params, OptionalExtension};

impl CardStore {
    // ── User profile ──────────────────────────────────────────────

    pub fn insert_user(&self, username: &str, timezone: Option<&str>) -> EngineResult<UserProfile> {
        self.conn.execute(
            "INSERT INTO user_profile (username, timezone) VALUES (?1, ?2)",
            params![username, timezone],
        )?;
        Ok(UserProfile {
            user_id:  self.conn.last_insert_rowid(),
            username: username.to_string(),
            timezone: timezone.map(str::to_string),
        })
    }

    pub fn user(&self, user_id: UserId) -> EngineResult<Option<UserProfile>> {
        let user = self
            .conn
            .query_row(
                "SELECT user_id, username, timezone FROM user_profile WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(UserProfile {
                        user_id:  row.get(0)?,
                        username: row.get(1)?,
                        timezone: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    pub fn user_by_username(&self, username: &str) -> EngineResult<Option<UserProfile>> {
        let user = self
            .conn
            .query_row(
                "SELECT user_id, username, timezone FROM user_profile WHERE username = ?1",
                params![username],
                |row| {
                    Ok(UserProfile {
                        user_id:  row.get(0)?,
                        username: row.get(1)?,
                        timezone: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    pub fn set_user_timezone(&self, user_id: UserId, timezone: Option<&str>) -> EngineResult<()> {
        self.conn.execute(
            "UPDATE user_profile SET timezone = ?1 WHERE user_id = ?2",
            params![timezone, user_id],
        )?;
        Ok(())
    }
}
