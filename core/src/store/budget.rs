use super::{
    cents_col, decimals_col, encode_decimals, instant_col, to_cents, to_micros, validate_amount,
    year_month_col, CardStore,
};
use crate::{
    error::{EngineError, EngineResult},
    model::Budget,
    threshold::validate_thresholds,
    types::{BudgetId, UserId, YearMonth},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use rust_decimal::Decimal;

const BUDGET_COLUMNS: &str =
    "budget_id, user_id, year_month, amount_cents, thresholds, fired, created_at_us, updated_at_us";

fn budget_from_row(row: &Row<'_>) -> rusqlite::Result<Budget> {
    Ok(Budget {
        budget_id:  row.get(0)?,
        user_id:    row.get(1)?,
        year_month: year_month_col(row, 2)?,
        amount:     cents_col(row, 3)?,
        thresholds: decimals_col(row, 4)?,
        fired:      decimals_col(row, 5)?,
        created_at: instant_col(row, 6)?,
        updated_at: instant_col(row, 7)?,
    })
}

fn validate_budget_amount(amount: Decimal) -> EngineResult<()> {
    validate_amount(amount)?;
    if amount.is_zero() {
        return Err(EngineError::InvalidAmount {
            amount: amount.to_string(),
            reason: "budget must be positive",
        });
    }
    Ok(())
}

impl CardStore {
    // ── Budget ────────────────────────────────────────────────────

    pub fn insert_budget(
        &self,
        user_id: UserId,
        year_month: YearMonth,
        amount: Decimal,
        thresholds: &[Decimal],
        now: DateTime<Utc>,
    ) -> EngineResult<Budget> {
        validate_budget_amount(amount)?;
        validate_thresholds(thresholds)?;
        if self.budget_for(user_id, year_month)?.is_some() {
            return Err(EngineError::DuplicateBudget {
                user_id,
                year_month: year_month.to_string(),
            });
        }
        self.conn.execute(
            "INSERT INTO budget (user_id, year_month, amount_cents, thresholds, fired,
                                 created_at_us, updated_at_us)
             VALUES (?1, ?2, ?3, ?4, '[]', ?5, ?5)",
            params![
                user_id,
                year_month.to_string(),
                to_cents(amount)?,
                encode_decimals(thresholds)?,
                to_micros(now),
            ],
        )?;
        Ok(Budget {
            budget_id:  self.conn.last_insert_rowid(),
            user_id,
            year_month,
            amount,
            thresholds: thresholds.to_vec(),
            fired:      Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn budget_for(&self, user_id: UserId, year_month: YearMonth) -> EngineResult<Option<Budget>> {
        let budget = self
            .conn
            .query_row(
                &format!("SELECT {BUDGET_COLUMNS} FROM budget WHERE user_id = ?1 AND year_month = ?2"),
                params![user_id, year_month.to_string()],
                budget_from_row,
            )
            .optional()?;
        Ok(budget)
    }

    pub fn budget_by_id(&self, budget_id: BudgetId) -> EngineResult<Option<Budget>> {
        let budget = self
            .conn
            .query_row(
                &format!("SELECT {BUDGET_COLUMNS} FROM budget WHERE budget_id = ?1"),
                params![budget_id],
                budget_from_row,
            )
            .optional()?;
        Ok(budget)
    }

    /// All budgets for a user, newest month first.
    pub fn budgets_for_user(&self, user_id: UserId) -> EngineResult<Vec<Budget>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {BUDGET_COLUMNS} FROM budget WHERE user_id = ?1 ORDER BY year_month DESC"
        ))?;
        let rows = stmt.query_map(params![user_id], budget_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Replace amount and thresholds. Does not touch the fired set.
    pub fn update_budget_config(
        &self,
        budget_id: BudgetId,
        amount: Decimal,
        thresholds: &[Decimal],
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        validate_budget_amount(amount)?;
        validate_thresholds(thresholds)?;
        let changed = self.conn.execute(
            "UPDATE budget SET amount_cents = ?1, thresholds = ?2, updated_at_us = ?3
             WHERE budget_id = ?4",
            params![to_cents(amount)?, encode_decimals(thresholds)?, to_micros(now), budget_id],
        )?;
        if changed == 0 {
            return Err(EngineError::NotFound { entity: "budget", id: budget_id });
        }
        Ok(())
    }

    pub fn set_budget_fired(&self, budget_id: BudgetId, fired: &[Decimal]) -> EngineResult<()> {
        let changed = self.conn.execute(
            "UPDATE budget SET fired = ?1 WHERE budget_id = ?2",
            params![encode_decimals(fired)?, budget_id],
        )?;
        if changed == 0 {
            return Err(EngineError::NotFound { entity: "budget", id: budget_id });
        }
        Ok(())
    }

    /// Delete a budget together with its alerts.
    pub fn delete_budget(&self, budget_id: BudgetId) -> EngineResult<bool> {
        self.write_txn(|store| {
            store.conn.execute(
                "DELETE FROM alert_event WHERE budget_id = ?1",
                params![budget_id],
            )?;
            let changed = store
                .conn
                .execute("DELETE FROM budget WHERE budget_id = ?1", params![budget_id])?;
            Ok(changed > 0)
        })
    }
}
