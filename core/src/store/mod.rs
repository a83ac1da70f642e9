//! SQLite persistence layer.
//!
//! RULE: Only store/ talks to the database.
//! Engine components call store methods. They never execute SQL directly.
//!
//! Storage encodings:
//!   - money        INTEGER cents (exact SUM)
//!   - multipliers  TEXT decimal
//!   - thresholds   TEXT JSON array of decimal strings
//!   - instants     INTEGER microseconds since the epoch, UTC

mod alert;
mod budget;
mod card;
mod event;
mod selection;
mod transaction;
mod user;
mod wallet;

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use rusqlite::{types::Type, Connection, Row, Transaction, TransactionBehavior};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Largest storable amount: ten digits, two of them decimal places.
// 9_999_999_999 = (2 << 32) + 0x540B_E3FF; scale 2 => 99_999_999.99
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0x540B_E3FF, 2, 0, false, 2);

pub struct CardStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl CardStore {
    pub fn open(path: &str) -> EngineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> EngineResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    /// For file-based databases, this opens the same file.
    pub fn reopen(&self) -> EngineResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    pub fn set_busy_timeout(&self, ms: u64) -> EngineResult<()> {
        self.conn.busy_timeout(Duration::from_millis(ms))?;
        Ok(())
    }

    /// Apply all schema migrations in order. Safe to run more than once.
    pub fn migrate(&self) -> EngineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_catalog.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_transactions.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_budgets.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_category_selection.sql"))?;
        Ok(())
    }

    /// Run `f` inside one `BEGIN IMMEDIATE` transaction.
    ///
    /// IMMEDIATE takes the database write lock up front, so a read inside
    /// `f` cannot be invalidated by another connection before `f` writes.
    /// Any error rolls everything back. Calls made while a transaction is
    /// already open on this connection join it instead of nesting.
    pub fn write_txn<T>(&self, f: impl FnOnce(&Self) -> EngineResult<T>) -> EngineResult<T> {
        if !self.conn.is_autocommit() {
            return f(self);
        }
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let out = f(self)?;
        tx.commit()?;
        Ok(out)
    }
}

// ── Column encodings ──────────────────────────────────────────

pub(crate) fn to_cents(amount: Decimal) -> EngineResult<i64> {
    amount
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|cents| cents.to_i64())
        .ok_or_else(|| EngineError::InvalidAmount {
            amount: amount.to_string(),
            reason: "out of range",
        })
}

pub(crate) fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

pub(crate) fn to_micros(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_micros()
}

/// Amounts are non-negative, at most [`MAX_AMOUNT`], with at most two
/// decimal places.
pub(crate) fn validate_amount(amount: Decimal) -> EngineResult<()> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(EngineError::InvalidAmount {
            amount: amount.to_string(),
            reason: "must be non-negative",
        });
    }
    if amount > MAX_AMOUNT {
        return Err(EngineError::InvalidAmount {
            amount: amount.to_string(),
            reason: "out of range",
        });
    }
    if amount.normalize().scale() > 2 {
        return Err(EngineError::InvalidAmount {
            amount: amount.to_string(),
            reason: "more than two decimal places",
        });
    }
    Ok(())
}

/// Canonical category set from a stored value.
///
/// Rules written by this store hold a JSON array. Older rows may hold a
/// comma-joined string; both decode to the same set here and nowhere else.
pub(crate) fn decode_categories(raw: &str) -> BTreeSet<String> {
    let trimmed = raw.trim();
    let tags: Vec<String> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).unwrap_or_default()
    } else {
        trimmed.split(',').map(str::to_string).collect()
    };
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

pub(crate) fn encode_categories(tags: &BTreeSet<String>) -> EngineResult<String> {
    Ok(serde_json::to_string(tags)?)
}

pub(crate) fn encode_decimals(values: &[Decimal]) -> EngineResult<String> {
    let strings: Vec<String> = values.iter().map(|d| d.normalize().to_string()).collect();
    Ok(serde_json::to_string(&strings)?)
}

fn conversion_error(idx: usize, ty: Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, msg.into())
}

pub(crate) fn decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(raw.trim()).map_err(|e| conversion_error(idx, Type::Text, e.to_string()))
}

pub(crate) fn cents_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    Ok(from_cents(row.get::<_, i64>(idx)?))
}

pub(crate) fn opt_cents_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    Ok(row.get::<_, Option<i64>>(idx)?.map(from_cents))
}

pub(crate) fn instant_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let us: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(us)
        .ok_or_else(|| conversion_error(idx, Type::Integer, format!("timestamp {us} out of range")))
}

pub(crate) fn decimals_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<Decimal>> {
    let raw: String = row.get(idx)?;
    let strings: Vec<String> = serde_json::from_str(&raw)
        .map_err(|e| conversion_error(idx, Type::Text, e.to_string()))?;
    strings
        .iter()
        .map(|s| Decimal::from_str(s).map_err(|e| conversion_error(idx, Type::Text, e.to_string())))
        .collect()
}

pub(crate) fn year_month_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<crate::types::YearMonth> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: EngineError| conversion_error(idx, Type::Text, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::FixedClock, threshold::ThresholdEvaluator, types::YearMonth};
    use chrono::TimeZone;

    fn budget_store() -> (CardStore, crate::model::Budget, DateTime<Utc>) {
        let store = CardStore::in_memory().unwrap();
        store.migrate().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        let user = store.insert_user("olga", None).unwrap();
        let ym = YearMonth::new(2024, 3).unwrap();
        let budget = store
            .insert_budget(user.user_id, ym, Decimal::new(100, 0), &[Decimal::new(5, 1)], now)
            .unwrap();
        (store, budget, now)
    }

    #[test]
    fn failed_fired_set_write_rolls_back_alerts_and_events() {
        let (store, mut budget, now) = budget_store();
        store
            .conn
            .execute_batch(
                "CREATE TRIGGER reject_fired BEFORE UPDATE OF fired ON budget
                 BEGIN SELECT RAISE(ABORT, 'boom'); END;",
            )
            .unwrap();
        let clock = FixedClock::at(now);

        let err = ThresholdEvaluator::new(&store, &clock)
            .evaluate(&mut budget, Decimal::new(80, 0))
            .unwrap_err();
        assert!(err.to_string().contains("boom"), "{err}");

        assert!(store.alerts_for_user(budget.user_id).unwrap().is_empty());
        assert!(store.events_for_user(budget.user_id).unwrap().is_empty());
        assert!(store.budget_by_id(budget.budget_id).unwrap().unwrap().fired.is_empty());
        assert!(budget.fired.is_empty());
        assert!(store.conn.is_autocommit());
    }

    #[test]
    fn second_budget_for_same_month_is_a_duplicate() {
        let (store, budget, now) = budget_store();
        let err = store
            .insert_budget(budget.user_id, budget.year_month, Decimal::new(250, 0), &[Decimal::new(5, 1)], now)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::DuplicateBudget { ref year_month, .. } if year_month == "2024-03"
        ));
        assert_eq!(store.budgets_for_user(budget.user_id).unwrap().len(), 1);
        assert_eq!(
            store.budget_by_id(budget.budget_id).unwrap().unwrap().amount,
            Decimal::new(100, 0)
        );
    }

    #[test]
    fn legacy_comma_joined_categories_normalize() {
        let a = decode_categories("DINING, GROCERIES ,");
        let b = decode_categories(r#"["GROCERIES","DINING"]"#);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn cents_round_trip_two_places() {
        assert_eq!(to_cents(Decimal::new(12345, 2)).unwrap(), 12345);
        assert_eq!(from_cents(12345), Decimal::new(12345, 2));
    }

    #[test]
    fn amount_validation() {
        assert!(validate_amount(Decimal::new(1050, 3)).is_ok()); // 1.050
        assert!(validate_amount(Decimal::new(1055, 3)).is_err());
        assert!(validate_amount(Decimal::new(-1, 0)).is_err());
        assert!(validate_amount(Decimal::ZERO).is_ok());
    }

    #[test]
    fn oversized_amounts_are_errors_not_panics() {
        assert!(validate_amount(MAX_AMOUNT).is_ok());
        assert!(validate_amount(MAX_AMOUNT + Decimal::new(1, 2)).is_err());
        assert!(validate_amount(Decimal::from_i128_with_scale(10_i128.pow(27), 0)).is_err());
        assert!(matches!(
            to_cents(Decimal::MAX),
            Err(EngineError::InvalidAmount { reason: "out of range", .. })
        ));
        assert_eq!(to_cents(MAX_AMOUNT).unwrap(), 9_999_999_999);
    }
}
