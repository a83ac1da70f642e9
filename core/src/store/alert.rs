use super::{cents_col, decimal_col, instant_col, to_cents, to_micros, year_month_col, CardStore};
use crate::{
    error::EngineResult,
    model::{AlertEvent, AlertStatus, Budget},
    types::{AlertId, BudgetId, UserId},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, OptionalExtension, Row};
use rust_decimal::Decimal;

const ALERT_COLUMNS: &str = "alert_id, user_id, budget_id, year_month, threshold, spend_cents,
                             fired_at_us, channel, status";

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<AlertEvent> {
    let status_raw: String = row.get(8)?;
    let status = AlertStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            8,
            Type::Text,
            format!("unknown alert status '{status_raw}'").into(),
        )
    })?;
    Ok(AlertEvent {
        alert_id:      row.get(0)?,
        user_id:       row.get(1)?,
        budget_id:     row.get(2)?,
        year_month:    year_month_col(row, 3)?,
        threshold:     decimal_col(row, 4)?,
        spend_at_fire: cents_col(row, 5)?,
        fired_at:      instant_col(row, 6)?,
        channel:       row.get(7)?,
        status,
    })
}

impl CardStore {
    // ── Alert ─────────────────────────────────────────────────────

    pub fn insert_alert(
        &self,
        budget: &Budget,
        threshold: Decimal,
        spend_at_fire: Decimal,
        fired_at: DateTime<Utc>,
    ) -> EngineResult<AlertEvent> {
        self.conn.execute(
            "INSERT INTO alert_event (user_id, budget_id, year_month, threshold, spend_cents,
                                      fired_at_us, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending')",
            params![
                budget.user_id,
                budget.budget_id,
                budget.year_month.to_string(),
                threshold.normalize().to_string(),
                to_cents(spend_at_fire)?,
                to_micros(fired_at),
            ],
        )?;
        Ok(AlertEvent {
            alert_id:      self.conn.last_insert_rowid(),
            user_id:       budget.user_id,
            budget_id:     budget.budget_id,
            year_month:    budget.year_month,
            threshold,
            spend_at_fire,
            fired_at,
            channel:       None,
            status:        AlertStatus::Pending,
        })
    }

    pub fn alert(&self, alert_id: AlertId) -> EngineResult<Option<AlertEvent>> {
        let alert = self
            .conn
            .query_row(
                &format!("SELECT {ALERT_COLUMNS} FROM alert_event WHERE alert_id = ?1"),
                params![alert_id],
                alert_from_row,
            )
            .optional()?;
        Ok(alert)
    }

    /// Alerts for a user, most recent first.
    pub fn alerts_for_user(&self, user_id: UserId) -> EngineResult<Vec<AlertEvent>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ALERT_COLUMNS} FROM alert_event WHERE user_id = ?1
             ORDER BY fired_at_us DESC, alert_id DESC"
        ))?;
        let rows = stmt.query_map(params![user_id], alert_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Alerts for one budget, in firing order.
    pub fn alerts_for_budget(&self, budget_id: BudgetId) -> EngineResult<Vec<AlertEvent>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ALERT_COLUMNS} FROM alert_event WHERE budget_id = ?1 ORDER BY alert_id ASC"
        ))?;
        let rows = stmt.query_map(params![budget_id], alert_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn pending_alert_count(&self, user_id: UserId) -> EngineResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM alert_event WHERE user_id = ?1 AND status = 'pending'",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    /// Mark an alert acknowledged. Only ever moves pending → acknowledged.
    /// Returns `None` when the alert does not exist or belongs to someone else.
    pub fn acknowledge_alert(&self, user_id: UserId, alert_id: AlertId) -> EngineResult<Option<AlertEvent>> {
        self.conn.execute(
            "UPDATE alert_event SET status = 'acknowledged'
             WHERE alert_id = ?1 AND user_id = ?2 AND status = 'pending'",
            params![alert_id, user_id],
        )?;
        Ok(self.alert(alert_id)?.filter(|a| a.user_id == user_id))
    }
}
