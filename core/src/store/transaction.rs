use super::{cents_col, instant_col, to_cents, to_micros, validate_amount, CardStore};
use crate::{
    error::{EngineError, EngineResult},
    model::TransactionRecord,
    types::{TransactionId, UserId},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use rust_decimal::Decimal;

const TXN_COLUMNS: &str = "transaction_id, user_id, card_used_id, recommended_card_id,
                           merchant, amount_cents, category, created_at_us, notes";

fn txn_from_row(row: &Row<'_>) -> rusqlite::Result<TransactionRecord> {
    Ok(TransactionRecord {
        transaction_id:      row.get(0)?,
        user_id:             row.get(1)?,
        card_used_id:        row.get(2)?,
        recommended_card_id: row.get(3)?,
        merchant:            row.get(4)?,
        amount:              cents_col(row, 5)?,
        category:            row.get(6)?,
        created_at:          instant_col(row, 7)?,
        notes:               row.get(8)?,
    })
}

impl CardStore {
    // ── Transaction ───────────────────────────────────────────────

    /// Write-boundary checks. A card reference must name a stored card.
    fn validate_record(&self, record: &TransactionRecord) -> EngineResult<()> {
        validate_amount(record.amount)?;
        if record.category.trim().is_empty() {
            return Err(EngineError::InvalidCategory(record.category.clone()));
        }
        for card_id in [record.card_used_id, record.recommended_card_id].into_iter().flatten() {
            if self.card(card_id)?.is_none() {
                return Err(EngineError::NotFound { entity: "card", id: card_id });
            }
        }
        Ok(())
    }

    /// Persist a new transaction. `transaction_id` on the input is ignored.
    pub fn insert_transaction(
        &self,
        record: &TransactionRecord,
        now: DateTime<Utc>,
    ) -> EngineResult<TransactionRecord> {
        self.validate_record(record)?;
        self.conn.execute(
            "INSERT INTO card_transaction (
                user_id, card_used_id, recommended_card_id, merchant, amount_cents,
                category, created_at_us, updated_at_us, notes
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.user_id,
                record.card_used_id,
                record.recommended_card_id,
                &record.merchant,
                to_cents(record.amount)?,
                &record.category,
                to_micros(record.created_at),
                to_micros(now),
                &record.notes,
            ],
        )?;
        Ok(TransactionRecord {
            transaction_id: self.conn.last_insert_rowid(),
            ..record.clone()
        })
    }

    pub fn transaction(&self, transaction_id: TransactionId) -> EngineResult<Option<TransactionRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {TXN_COLUMNS} FROM card_transaction WHERE transaction_id = ?1"),
                params![transaction_id],
                txn_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn update_transaction(&self, record: &TransactionRecord, now: DateTime<Utc>) -> EngineResult<()> {
        self.validate_record(record)?;
        let changed = self.conn.execute(
            "UPDATE card_transaction SET
                card_used_id = ?1, recommended_card_id = ?2, merchant = ?3,
                amount_cents = ?4, category = ?5, created_at_us = ?6,
                updated_at_us = ?7, notes = ?8
             WHERE transaction_id = ?9",
            params![
                record.card_used_id,
                record.recommended_card_id,
                &record.merchant,
                to_cents(record.amount)?,
                &record.category,
                to_micros(record.created_at),
                to_micros(now),
                &record.notes,
                record.transaction_id,
            ],
        )?;
        if changed == 0 {
            return Err(EngineError::NotFound { entity: "transaction", id: record.transaction_id });
        }
        Ok(())
    }

    pub fn delete_transaction(&self, transaction_id: TransactionId) -> EngineResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM card_transaction WHERE transaction_id = ?1",
            params![transaction_id],
        )?;
        Ok(changed > 0)
    }

    /// Sum of amounts with `start <= created_at <= end`.
    pub fn sum_spend_between(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<Decimal> {
        let cents: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(amount_cents), 0) FROM card_transaction
             WHERE user_id = ?1 AND created_at_us >= ?2 AND created_at_us <= ?3",
            params![user_id, to_micros(start), to_micros(end)],
            |row| row.get(0),
        )?;
        Ok(super::from_cents(cents))
    }

    /// Transactions for a user, oldest first, optionally bounded (inclusive).
    pub fn transactions_for_user(
        &self,
        user_id: UserId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<TransactionRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TXN_COLUMNS} FROM card_transaction
             WHERE user_id = ?1
               AND created_at_us >= ?2
               AND created_at_us <= ?3
             ORDER BY created_at_us ASC, transaction_id ASC"
        ))?;
        let lo = start.map(to_micros).unwrap_or(i64::MIN);
        let hi = end.map(to_micros).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![user_id, lo, hi], txn_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
