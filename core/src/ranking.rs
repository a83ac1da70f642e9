//! Best-card recommendation for a purchase category.
//!
//! RANKING ORDER (fixed, every key explicit):
//!   1. multiplier      descending
//!   2. cap             descending, uncapped first
//!   3. annual fee      ascending
//!   4. issuer          ascending
//!   5. card name       ascending
//!   6. card id         ascending (total order, never reached for distinct cards
//!                      unless two catalog entries share issuer and name)
//!
//! Fallback chain: category rules → each card's best base ("OTHER") rule →
//! cheapest active card at the fallback multiplier.

use crate::{
    error::EngineResult,
    model::{Card, RewardRule},
    store::CardStore,
    types::{CardId, UserId},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

const MAX_ALTERNATIVES: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRef {
    pub id:           CardId,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alternative {
    pub id:           CardId,
    pub display_name: String,
    pub multiplier:   Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    EmptyWallet,
    CategoryRule,
    BaseRate,
    NoRateData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub best_card:    Option<CardRef>,
    pub multiplier:   Decimal,
    pub rationale:    String,
    pub alternatives: Vec<Alternative>,
    pub source:       RecommendationSource,
}

#[derive(Debug, Clone)]
struct Candidate<'c> {
    card:       &'c Card,
    multiplier: Decimal,
    cap:        Option<Decimal>,
}

/// Uncapped sorts above any finite cap.
fn cap_key(cap: Option<Decimal>) -> (bool, Decimal) {
    match cap {
        None => (true, Decimal::ZERO),
        Some(c) => (false, c),
    }
}

fn rank_order(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    b.multiplier
        .cmp(&a.multiplier)
        .then_with(|| cap_key(b.cap).cmp(&cap_key(a.cap)))
        .then_with(|| a.card.annual_fee.cmp(&b.card.annual_fee))
        .then_with(|| a.card.issuer.cmp(&b.card.issuer))
        .then_with(|| a.card.name.cmp(&b.card.name))
        .then_with(|| a.card.card_id.cmp(&b.card.card_id))
}

/// Multiplier as shown to users: `3.0`, `1.5`, `2.25`.
pub fn format_multiplier(m: Decimal) -> String {
    let n = m.normalize();
    if n.scale() == 0 {
        format!("{n}.0")
    } else {
        n.to_string()
    }
}

/// One candidate per card: its best qualifying rule.
/// A higher multiplier wins; equal multipliers keep the larger cap.
fn best_rule_per_card<'c>(
    cards: &'c [Card],
    rules: &[RewardRule],
    qualifies: impl Fn(&RewardRule) -> bool,
) -> Vec<Candidate<'c>> {
    let by_id: BTreeMap<CardId, &Card> = cards.iter().map(|c| (c.card_id, c)).collect();
    let mut best: BTreeMap<CardId, Candidate<'c>> = BTreeMap::new();

    for rule in rules.iter().filter(|r| !r.is_aggregate() && qualifies(r)) {
        let Some(&card) = by_id.get(&rule.card_id) else {
            continue;
        };
        let candidate = Candidate {
            card,
            multiplier: rule.multiplier,
            cap: rule.cap_amount,
        };
        let replace = match best.get(&rule.card_id) {
            None => true,
            Some(cur) => {
                (candidate.multiplier, cap_key(candidate.cap)) > (cur.multiplier, cap_key(cur.cap))
            }
        };
        if replace {
            best.insert(rule.card_id, candidate);
        }
    }
    best.into_values().collect()
}

fn card_ref(card: &Card) -> CardRef {
    CardRef {
        id:           card.card_id,
        display_name: card.display_name(),
    }
}

/// Sort candidates and split into (winner, tied runner-ups).
fn pick(mut candidates: Vec<Candidate<'_>>) -> Option<(CardRef, Decimal, Vec<Alternative>)> {
    candidates.sort_by(rank_order);
    let (top, rest) = candidates.split_first()?;
    let alternatives = rest
        .iter()
        .filter(|c| c.multiplier == top.multiplier)
        .take(MAX_ALTERNATIVES)
        .map(|c| Alternative {
            id:           c.card.card_id,
            display_name: c.card.display_name(),
            multiplier:   c.multiplier,
        })
        .collect();
    Some((card_ref(top.card), top.multiplier, alternatives))
}

/// Pure ranking over an already-loaded wallet.
///
/// `active_cards` are the user's active wallet cards; `rules` may include
/// rules for other cards, which are ignored.
pub fn rank_for_category(
    category: &str,
    active_cards: &[Card],
    rules: &[RewardRule],
    fallback_multiplier: Decimal,
) -> Recommendation {
    let category = category.trim();

    if active_cards.is_empty() {
        return Recommendation {
            best_card:    None,
            multiplier:   fallback_multiplier,
            rationale:    format!(
                "You have no active cards. Showing baseline {}× recommendation.",
                format_multiplier(fallback_multiplier)
            ),
            alternatives: Vec::new(),
            source:       RecommendationSource::EmptyWallet,
        };
    }

    let primary = if category.is_empty() {
        Vec::new()
    } else {
        best_rule_per_card(active_cards, rules, |r| r.covers(category))
    };
    if let Some((best, multiplier, alternatives)) = pick(primary) {
        return Recommendation {
            rationale: format!(
                "{}× on {category} (from your wallet).",
                format_multiplier(multiplier)
            ),
            best_card: Some(best),
            multiplier,
            alternatives,
            source: RecommendationSource::CategoryRule,
        };
    }

    let base = best_rule_per_card(active_cards, rules, RewardRule::is_base_rate);
    if let Some((best, multiplier, alternatives)) = pick(base) {
        let shown = if category.is_empty() { "category" } else { category };
        return Recommendation {
            rationale: format!(
                "No {shown} bonus among your cards. Showing your best base rate (OTHER): {}×.",
                format_multiplier(multiplier)
            ),
            best_card: Some(best),
            multiplier,
            alternatives,
            source: RecommendationSource::BaseRate,
        };
    }

    let cheapest = active_cards.iter().min_by(|a, b| {
        a.annual_fee
            .cmp(&b.annual_fee)
            .then_with(|| a.issuer.cmp(&b.issuer))
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.card_id.cmp(&b.card_id))
    });
    Recommendation {
        rationale:    format!(
            "No base (OTHER) rates found for your cards. Showing baseline {}×{}.",
            format_multiplier(fallback_multiplier),
            cheapest.map(|c| format!(" on {}", c.name)).unwrap_or_default()
        ),
        best_card:    cheapest.map(card_ref),
        multiplier:   fallback_multiplier,
        alternatives: Vec::new(),
        source:       RecommendationSource::NoRateData,
    }
}

pub struct CardRanker<'a> {
    store:               &'a CardStore,
    fallback_multiplier: Decimal,
}

impl<'a> CardRanker<'a> {
    pub fn new(store: &'a CardStore, fallback_multiplier: Decimal) -> Self {
        Self { store, fallback_multiplier }
    }

    pub fn best_card_for_category(&self, category: &str, user_id: UserId) -> EngineResult<Recommendation> {
        let cards = self.store.active_wallet_cards(user_id)?;
        let ids: Vec<CardId> = cards.iter().map(|c| c.card_id).collect();
        let rules = self.store.rules_for_cards(&ids)?;
        let rec = rank_for_category(category, &cards, &rules, self.fallback_multiplier);
        log::debug!(
            "user={user_id} category={category} → {:?} at {} ({:?}, {} alt)",
            rec.best_card.as_ref().map(|c| c.id),
            rec.multiplier,
            rec.source,
            rec.alternatives.len()
        );
        Ok(rec)
    }
}
