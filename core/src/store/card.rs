use super::{decode_categories, encode_categories, opt_cents_col, to_cents, CardStore};
use crate::{
    error::{EngineError, EngineResult},
    model::{Card, NewCard, RewardRule},
    types::{CardId, RuleId, BASE_RATE_TAG},
};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::collections::BTreeSet;

const CARD_COLUMNS: &str = "card_id, issuer, name, annual_fee_cents, foreign_txn_fee";
const RULE_COLUMNS: &str = "rule_id, card_id, categories, multiplier, cap_cents";

fn card_from_row(row: &Row<'_>) -> rusqlite::Result<Card> {
    Ok(Card {
        card_id:    row.get(0)?,
        issuer:     row.get(1)?,
        name:       row.get(2)?,
        annual_fee: super::cents_col(row, 3)?,
        foreign_transaction_fee: row.get::<_, i32>(4)? != 0,
    })
}

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<RewardRule> {
    Ok(RewardRule {
        rule_id:    row.get(0)?,
        card_id:    row.get(1)?,
        categories: decode_categories(&row.get::<_, String>(2)?),
        multiplier: super::decimal_col(row, 3)?,
        cap_amount: opt_cents_col(row, 4)?,
    })
}

impl CardStore {
    // ── Card ──────────────────────────────────────────────────────

    pub fn insert_card(&self, card: &NewCard) -> EngineResult<Card> {
        super::validate_amount(card.annual_fee)?;
        self.conn.execute(
            "INSERT INTO card (issuer, name, annual_fee_cents, foreign_txn_fee)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                &card.issuer,
                &card.name,
                to_cents(card.annual_fee)?,
                if card.foreign_transaction_fee { 1 } else { 0 }
            ],
        )?;
        Ok(Card {
            card_id:    self.conn.last_insert_rowid(),
            issuer:     card.issuer.clone(),
            name:       card.name.clone(),
            annual_fee: card.annual_fee,
            foreign_transaction_fee: card.foreign_transaction_fee,
        })
    }

    pub fn card(&self, card_id: CardId) -> EngineResult<Option<Card>> {
        let card = self
            .conn
            .query_row(
                &format!("SELECT {CARD_COLUMNS} FROM card WHERE card_id = ?1"),
                params![card_id],
                card_from_row,
            )
            .optional()?;
        Ok(card)
    }

    pub fn all_cards(&self) -> EngineResult<Vec<Card>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {CARD_COLUMNS} FROM card ORDER BY card_id ASC"))?;
        let rows = stmt.query_map([], card_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── Reward rule ───────────────────────────────────────────────

    pub fn insert_reward_rule(
        &self,
        card_id: CardId,
        categories: &BTreeSet<String>,
        multiplier: Decimal,
        cap_amount: Option<Decimal>,
    ) -> EngineResult<RuleId> {
        if categories.is_empty() {
            return Err(EngineError::InvalidCategory(String::new()));
        }
        if let Some(bad) = categories.iter().find(|c| c.trim().is_empty() || c.contains(',')) {
            return Err(EngineError::InvalidCategory(bad.clone()));
        }
        if multiplier.is_sign_negative() && !multiplier.is_zero() {
            return Err(EngineError::InvalidAmount {
                amount: multiplier.to_string(),
                reason: "multiplier must be non-negative",
            });
        }
        let cap_cents = match cap_amount {
            Some(cap) => {
                super::validate_amount(cap)?;
                Some(to_cents(cap)?)
            }
            None => None,
        };
        self.conn.execute(
            "INSERT INTO reward_rule (card_id, categories, multiplier, cap_cents)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                card_id,
                encode_categories(categories)?,
                multiplier.to_string(),
                cap_cents
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn rules_for_card(&self, card_id: CardId) -> EngineResult<Vec<RewardRule>> {
        self.rules_for_cards(&[card_id])
    }

    /// Rules for every card in `card_ids`, ordered by rule id.
    pub fn rules_for_cards(&self, card_ids: &[CardId]) -> EngineResult<Vec<RewardRule>> {
        if card_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; card_ids.len()].join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RULE_COLUMNS} FROM reward_rule
             WHERE card_id IN ({placeholders})
             ORDER BY rule_id ASC"
        ))?;
        let rows = stmt.query_map(params_from_iter(card_ids.iter()), rule_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Cards that carry no base-rate rule at all.
    pub fn cards_without_base_rule(&self) -> EngineResult<Vec<Card>> {
        let cards = self.all_cards()?;
        let ids: Vec<CardId> = cards.iter().map(|c| c.card_id).collect();
        let with_base: BTreeSet<CardId> = self
            .rules_for_cards(&ids)?
            .into_iter()
            .filter(|r| r.covers(BASE_RATE_TAG))
            .map(|r| r.card_id)
            .collect();
        Ok(cards
            .into_iter()
            .filter(|c| !with_base.contains(&c.card_id))
            .collect())
    }
}
