//! Budget recomputation after a transaction write.
//!
//! The transaction write path calls `on_transaction_mutated` right after its
//! own commit. For every (user, local month) touched by the new and the
//! previous version of the transaction, MTD spend is recomputed and the
//! month's budget (if any) re-evaluated.

use crate::{
    clock::Clock,
    error::{EngineError, EngineResult},
    event::EngineEvent,
    model::{AlertEvent, TransactionRecord, UserProfile},
    month_window::local_year_month,
    spend::SpendAggregator,
    store::CardStore,
    threshold::fire_crossings,
    types::{UserId, YearMonth},
};
use std::collections::BTreeSet;

pub struct RecomputeTrigger<'a> {
    store: &'a CardStore,
    clock: &'a dyn Clock,
}

impl<'a> RecomputeTrigger<'a> {
    pub fn new(store: &'a CardStore, clock: &'a dyn Clock) -> Self {
        Self { store, clock }
    }

    /// `transaction` is the current row (or the pre-delete snapshot);
    /// `previous` is the row as it was before an edit.
    pub fn on_transaction_mutated(
        &self,
        transaction: &TransactionRecord,
        previous: Option<&TransactionRecord>,
    ) -> EngineResult<Vec<AlertEvent>> {
        let mut months: BTreeSet<(UserId, YearMonth)> = BTreeSet::new();
        for txn in std::iter::once(transaction).chain(previous) {
            let user = self.user(txn.user_id)?;
            months.insert((user.user_id, local_year_month(&user, txn.created_at)));
        }

        let mut alerts = Vec::new();
        for (user_id, year_month) in months {
            let user = self.user(user_id)?;
            alerts.extend(self.recompute_month(&user, year_month)?);
        }
        Ok(alerts)
    }

    /// Re-evaluate one month's budget against current spend. No budget, no-op.
    pub fn recompute_month(&self, user: &UserProfile, year_month: YearMonth) -> EngineResult<Vec<AlertEvent>> {
        if self.store.budget_for(user.user_id, year_month)?.is_none() {
            log::debug!("user={} {year_month}: no budget, skipping recompute", user.user_id);
            return Ok(Vec::new());
        }

        // Spend is summed under the same write lock as the fired-set check,
        // so two concurrent imports cannot both see "not yet fired".
        self.store.write_txn(|store| {
            let Some(budget) = store.budget_for(user.user_id, year_month)? else {
                return Ok(Vec::new());
            };
            let mtd = SpendAggregator::new(store).mtd_spend(user, year_month)?;
            store.append_event(
                user.user_id,
                &EngineEvent::MonthRecomputed {
                    budget_id: budget.budget_id,
                    year_month,
                    mtd_spend: mtd,
                },
                self.clock.now(),
            )?;
            let (_, alerts) = fire_crossings(store, self.clock, budget.budget_id, mtd)?;
            log::debug!(
                "user={} {year_month}: mtd={mtd}, {} new alert(s)",
                user.user_id,
                alerts.len()
            );
            Ok(alerts)
        })
    }

    fn user(&self, user_id: UserId) -> EngineResult<UserProfile> {
        self.store
            .user(user_id)?
            .ok_or(EngineError::NotFound { entity: "user", id: user_id })
    }
}
