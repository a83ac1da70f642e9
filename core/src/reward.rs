//! Per-purchase reward calculation.
//!
//! Category rules win. A card's base rate ("OTHER") applies only when no
//! rule for the purchase category pays anything. Reward is
//! `amount × multiplier / 100`, rounded half-up to cents.

use crate::{
    error::{EngineError, EngineResult},
    model::{RewardRule, TransactionRecord},
    store::CardStore,
    types::{CardId, UserId},
};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which card a transaction's reward is credited to.
///
/// Whether an un-carded purchase earns anything is the caller's call, not
/// a calculator default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardBasis {
    /// Only the card actually used. No card, no reward.
    CardUsed,
    /// The card used, or the recommended card when none was recorded.
    RecommendedIfUnused,
}

impl RewardBasis {
    pub fn card_for(&self, txn: &TransactionRecord) -> Option<CardId> {
        match self {
            Self::CardUsed => txn.card_used_id,
            Self::RecommendedIfUnused => txn.card_used_id.or(txn.recommended_card_id),
        }
    }
}

/// Highest positive multiplier among rules covering `category`.
pub fn category_multiplier(rules: &[RewardRule], category: &str) -> Option<Decimal> {
    rules
        .iter()
        .filter(|r| r.covers(category))
        .map(|r| r.multiplier)
        .filter(|m| *m > Decimal::ZERO)
        .max()
}

/// Highest positive base-rate multiplier.
pub fn base_multiplier(rules: &[RewardRule]) -> Option<Decimal> {
    rules
        .iter()
        .filter(|r| r.is_base_rate())
        .map(|r| r.multiplier)
        .filter(|m| *m > Decimal::ZERO)
        .max()
}

pub fn effective_multiplier(rules: &[RewardRule], category: &str) -> Option<Decimal> {
    let category = category.trim();
    if category.is_empty() {
        return None;
    }
    category_multiplier(rules, category).or_else(|| base_multiplier(rules))
}

/// Overflow is an `InvalidAmount` error, never a panic.
pub fn reward_from_rules(rules: &[RewardRule], amount: Decimal, category: &str) -> EngineResult<Decimal> {
    if amount <= Decimal::ZERO {
        return Ok(Decimal::ZERO);
    }
    let Some(m) = effective_multiplier(rules, category) else {
        return Ok(Decimal::ZERO);
    };
    amount
        .checked_mul(m)
        .and_then(|points| points.checked_div(Decimal::ONE_HUNDRED))
        .map(|r| r.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
        .ok_or_else(|| out_of_range(amount))
}

fn out_of_range(amount: Decimal) -> EngineError {
    EngineError::InvalidAmount {
        amount: amount.to_string(),
        reason: "out of range",
    }
}

pub struct RewardCalculator<'a> {
    store: &'a CardStore,
}

impl<'a> RewardCalculator<'a> {
    pub fn new(store: &'a CardStore) -> Self {
        Self { store }
    }

    /// Reward for spending `amount` in `category` on `card`. Reads only.
    pub fn reward_for(&self, card: Option<CardId>, amount: Decimal, category: &str) -> EngineResult<Decimal> {
        let Some(card_id) = card else {
            return Ok(Decimal::ZERO);
        };
        if category.trim().is_empty() || amount <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }
        let rules = self.store.rules_for_card(card_id)?;
        reward_from_rules(&rules, amount, category)
    }

    pub fn reward_for_transaction(&self, txn: &TransactionRecord, basis: RewardBasis) -> EngineResult<Decimal> {
        self.reward_for(basis.card_for(txn), txn.amount, &txn.category)
    }

    /// Rewards summed per card over `[start, end]` (either bound optional).
    pub fn rewards_by_card(
        &self,
        user_id: UserId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        basis: RewardBasis,
    ) -> EngineResult<BTreeMap<CardId, Decimal>> {
        let txns = self.store.transactions_for_user(user_id, start, end)?;
        let mut rules_cache: BTreeMap<CardId, Vec<RewardRule>> = BTreeMap::new();
        let mut totals: BTreeMap<CardId, Decimal> = BTreeMap::new();

        for txn in &txns {
            let Some(card_id) = basis.card_for(txn) else {
                continue;
            };
            if !rules_cache.contains_key(&card_id) {
                rules_cache.insert(card_id, self.store.rules_for_card(card_id)?);
            }
            let rules = rules_cache.get(&card_id).map(Vec::as_slice).unwrap_or(&[]);
            let reward = reward_from_rules(rules, txn.amount, &txn.category)?;
            let total = totals.entry(card_id).or_insert(Decimal::ZERO);
            *total = total.checked_add(reward).ok_or_else(|| out_of_range(txn.amount))?;
        }
        Ok(totals)
    }

    pub fn total_rewards(
        &self,
        user_id: UserId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        basis: RewardBasis,
    ) -> EngineResult<Decimal> {
        let by_card = self.rewards_by_card(user_id, start, end, basis)?;
        Ok(by_card.values().copied().sum::<Decimal>().round_dp(2))
    }
}
