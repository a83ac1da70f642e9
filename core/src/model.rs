//! Domain records shared by the store and the engine components.
//!
//! Every record here is plain data. Validation happens at the write
//! boundary (store/*), ranking and firing logic live in their own modules.

use crate::types::{
    AlertId, BudgetId, CardId, RuleId, TransactionId, UserId, YearMonth, AGGREGATE_TAG,
    BASE_RATE_TAG,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id:  UserId,
    pub username: String,
    /// IANA zone name. `None` means UTC.
    pub timezone: Option<String>,
}

// ── Catalog ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub card_id:    CardId,
    pub issuer:     String,
    pub name:       String,
    pub annual_fee: Decimal,
    pub foreign_transaction_fee: bool,
}

impl Card {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.issuer, self.name)
    }
}

#[derive(Debug, Clone)]
pub struct NewCard {
    pub issuer:     String,
    pub name:       String,
    pub annual_fee: Decimal,
    pub foreign_transaction_fee: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardRule {
    pub rule_id:    RuleId,
    pub card_id:    CardId,
    pub categories: BTreeSet<String>,
    pub multiplier: Decimal,
    /// Annual spend cap for the bonus rate. `None` = uncapped.
    pub cap_amount: Option<Decimal>,
}

impl RewardRule {
    pub fn covers(&self, category: &str) -> bool {
        self.categories.contains(category)
    }

    pub fn is_base_rate(&self) -> bool {
        self.covers(BASE_RATE_TAG)
    }

    pub fn is_aggregate(&self) -> bool {
        self.covers(AGGREGATE_TAG)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletEntry {
    pub user_id: UserId,
    pub card_id: CardId,
    pub active:  bool,
    pub notes:   Option<String>,
}

// ── Transactions ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id:      TransactionId,
    pub user_id:             UserId,
    pub card_used_id:        Option<CardId>,
    pub recommended_card_id: Option<CardId>,
    pub merchant:            String,
    pub amount:              Decimal,
    pub category:            String,
    pub created_at:          DateTime<Utc>,
    pub notes:               Option<String>,
}

/// Input for the transaction write path.
#[derive(Debug, Clone, Default)]
pub struct NewTransaction {
    pub user_id:      UserId,
    pub card_used_id: Option<CardId>,
    pub merchant:     String,
    pub amount:       Decimal,
    pub category:     String,
    pub notes:        Option<String>,
    /// Imported rows carry their own timestamp. `None` means "now".
    pub created_at:   Option<DateTime<Utc>>,
}

/// Partial edit. Fields left `None` are unchanged.
#[derive(Debug, Clone, Default)]
pub struct TransactionEdit {
    pub amount:       Option<Decimal>,
    pub category:     Option<String>,
    pub merchant:     Option<String>,
    /// `Some(None)` clears the card.
    pub card_used_id: Option<Option<CardId>>,
    pub notes:        Option<Option<String>>,
    pub created_at:   Option<DateTime<Utc>>,
}

// ── Budgets and alerts ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub budget_id:  BudgetId,
    pub user_id:    UserId,
    pub year_month: YearMonth,
    pub amount:     Decimal,
    /// Ascending fractions in (0, 1].
    pub thresholds: Vec<Decimal>,
    /// Thresholds already alerted, in firing order.
    pub fired:      Vec<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Budget {
    pub fn has_fired(&self, threshold: Decimal) -> bool {
        self.fired.contains(&threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Pending,
    Acknowledged,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending      => "pending",
            Self::Acknowledged => "acknowledged",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending"      => Some(Self::Pending),
            "acknowledged" => Some(Self::Acknowledged),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub alert_id:      AlertId,
    pub user_id:       UserId,
    pub budget_id:     BudgetId,
    pub year_month:    YearMonth,
    pub threshold:     Decimal,
    pub spend_at_fire: Decimal,
    pub fired_at:      DateTime<Utc>,
    pub channel:       Option<String>,
    pub status:        AlertStatus,
}
