//! Engine events: the audit trail of everything the engine decided.
//!
//! RULE: An event is appended in the same database transaction as the
//! state change it describes. Variants are only ever added.

use crate::types::{AlertId, BudgetId, TransactionId, UserId, YearMonth};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    // ── Transaction write path ─────────────────────
    TransactionRecorded {
        transaction_id: TransactionId,
        year_month:     YearMonth,
        amount:         Decimal,
    },
    TransactionEdited {
        transaction_id: TransactionId,
        from_month:     YearMonth,
        to_month:       YearMonth,
    },
    TransactionDeleted {
        transaction_id: TransactionId,
        year_month:     YearMonth,
    },

    // ── Budget evaluation ──────────────────────────
    MonthRecomputed {
        budget_id:  BudgetId,
        year_month: YearMonth,
        mtd_spend:  Decimal,
    },
    ThresholdFired {
        alert_id:      AlertId,
        budget_id:     BudgetId,
        year_month:    YearMonth,
        threshold:     Decimal,
        spend_at_fire: Decimal,
    },
    ThresholdsReplaced {
        budget_id:  BudgetId,
        year_month: YearMonth,
        thresholds: Vec<Decimal>,
    },
    AlertAcknowledged {
        alert_id: AlertId,
    },
}

impl EngineEvent {
    /// Stable name for the event_type column.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TransactionRecorded { .. } => "transaction_recorded",
            Self::TransactionEdited { .. }   => "transaction_edited",
            Self::TransactionDeleted { .. }  => "transaction_deleted",
            Self::MonthRecomputed { .. }     => "month_recomputed",
            Self::ThresholdFired { .. }      => "threshold_fired",
            Self::ThresholdsReplaced { .. }  => "thresholds_replaced",
            Self::AlertAcknowledged { .. }   => "alert_acknowledged",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:         Option<i64>,
    pub user_id:    UserId,
    pub event_type: String,
    pub payload:    String, // JSON-serialized EngineEvent
}
