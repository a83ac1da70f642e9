//! Budget threshold evaluation.
//!
//! Per threshold `t`: not_fired → fired when `mtd >= t × amount` and `t` is
//! not already in the fired set. Nothing ever moves back to not_fired except
//! an explicit threshold-list replacement, which clears the whole set.
//!
//! RULE: the fired-set check, the alert inserts and the fired-set write run
//! in one IMMEDIATE transaction against a freshly read budget row. A stale
//! caller copy can never cause a second alert for the same threshold.

use crate::{
    clock::Clock,
    error::{EngineError, EngineResult},
    event::EngineEvent,
    model::{AlertEvent, Budget},
    store::CardStore,
    types::BudgetId,
};
use rust_decimal::Decimal;

/// Thresholds must be strictly ascending fractions in (0, 1].
pub fn validate_thresholds(thresholds: &[Decimal]) -> EngineResult<()> {
    let fail = |reason| EngineError::InvalidThresholds {
        thresholds: thresholds.iter().map(|t| t.to_string()).collect(),
        reason,
    };
    if thresholds.iter().any(|t| *t <= Decimal::ZERO || *t > Decimal::ONE) {
        return Err(fail("each threshold must be in (0, 1]"));
    }
    if thresholds.windows(2).any(|w| w[0] >= w[1]) {
        return Err(fail("thresholds must be strictly ascending"));
    }
    Ok(())
}

/// Thresholds crossed by `mtd` that have not fired yet, in list order.
pub fn newly_crossed(amount: Decimal, thresholds: &[Decimal], fired: &[Decimal], mtd: Decimal) -> Vec<Decimal> {
    if amount <= Decimal::ZERO {
        return Vec::new();
    }
    thresholds
        .iter()
        .copied()
        .filter(|t| mtd >= *t * amount && !fired.contains(t))
        .collect()
}

/// The lowest threshold that is neither crossed nor fired.
pub fn next_threshold(budget: &Budget, mtd: Decimal) -> Option<Decimal> {
    if budget.amount <= Decimal::ZERO {
        return budget.thresholds.iter().copied().find(|t| !budget.has_fired(*t));
    }
    budget
        .thresholds
        .iter()
        .copied()
        .find(|t| mtd < *t * budget.amount && !budget.has_fired(*t))
}

pub struct ThresholdEvaluator<'a> {
    store: &'a CardStore,
    clock: &'a dyn Clock,
}

impl<'a> ThresholdEvaluator<'a> {
    pub fn new(store: &'a CardStore, clock: &'a dyn Clock) -> Self {
        Self { store, clock }
    }

    /// Fire every newly crossed threshold of `budget` for `mtd`.
    ///
    /// On success `budget.fired` mirrors the stored fired set. On error
    /// nothing was written and `budget` is untouched.
    pub fn evaluate(&self, budget: &mut Budget, mtd: Decimal) -> EngineResult<Vec<AlertEvent>> {
        let (fresh, alerts) = self
            .store
            .write_txn(|store| fire_crossings(store, self.clock, budget.budget_id, mtd))?;
        *budget = fresh;
        Ok(alerts)
    }

    /// Clear the fired set, store the new list, then evaluate from `mtd`.
    /// All in one transaction.
    pub fn replace_thresholds(
        &self,
        budget: &mut Budget,
        amount: Decimal,
        thresholds: &[Decimal],
        mtd: Decimal,
    ) -> EngineResult<Vec<AlertEvent>> {
        let now = self.clock.now();
        let (fresh, alerts) = self.store.write_txn(|store| {
            store.update_budget_config(budget.budget_id, amount, thresholds, now)?;
            store.set_budget_fired(budget.budget_id, &[])?;
            store.append_event(
                budget.user_id,
                &EngineEvent::ThresholdsReplaced {
                    budget_id:  budget.budget_id,
                    year_month: budget.year_month,
                    thresholds: thresholds.to_vec(),
                },
                now,
            )?;
            fire_crossings(store, self.clock, budget.budget_id, mtd)
        })?;
        *budget = fresh;
        Ok(alerts)
    }
}

/// Body of the evaluation. Must run inside a write transaction.
pub(crate) fn fire_crossings(
    store: &CardStore,
    clock: &dyn Clock,
    budget_id: BudgetId,
    mtd: Decimal,
) -> EngineResult<(Budget, Vec<AlertEvent>)> {
    let mut budget = store
        .budget_by_id(budget_id)?
        .ok_or(EngineError::NotFound { entity: "budget", id: budget_id })?;

    let crossed = newly_crossed(budget.amount, &budget.thresholds, &budget.fired, mtd);
    if crossed.is_empty() {
        return Ok((budget, Vec::new()));
    }

    let now = clock.now();
    let mut alerts = Vec::with_capacity(crossed.len());
    for threshold in crossed {
        let alert = store.insert_alert(&budget, threshold, mtd, now)?;
        store.append_event(
            budget.user_id,
            &EngineEvent::ThresholdFired {
                alert_id:      alert.alert_id,
                budget_id:     budget.budget_id,
                year_month:    budget.year_month,
                threshold,
                spend_at_fire: mtd,
            },
            now,
        )?;
        log::info!(
            "user={} {} crossed {}% of {} (mtd {mtd})",
            budget.user_id,
            budget.year_month,
            threshold * Decimal::ONE_HUNDRED,
            budget.amount
        );
        budget.fired.push(threshold);
        alerts.push(alert);
    }
    store.set_budget_fired(budget.budget_id, &budget.fired)?;
    Ok((budget, alerts))
}
