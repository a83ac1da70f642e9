//! The engine facade: every operation collaborators are allowed to call.
//!
//! WRITE PATH (fixed order, never reordered):
//!   1. validate input
//!   2. persist the transaction row + its event (one DB transaction)
//!   3. commit
//!   4. RecomputeTrigger for every affected (user, local month)
//!
//! Reads (ranking, MTD, rewards, status) never write.

use crate::{
    clock::{Clock, SystemClock},
    config::{CardCatalog, EngineConfig},
    error::{EngineError, EngineResult},
    event::{EngineEvent, EventLogEntry},
    model::{
        AlertEvent, AlertStatus, Budget, Card, NewCard, NewTransaction, TransactionEdit, TransactionRecord,
        UserProfile, WalletEntry,
    },
    month_window::{self, MonthWindow},
    ranking::{CardRanker, Recommendation},
    recompute::RecomputeTrigger,
    reward::{RewardBasis, RewardCalculator},
    spend::SpendAggregator,
    store::CardStore,
    threshold::{next_threshold, ThresholdEvaluator},
    types::{AlertId, CardId, TransactionId, UserId, YearMonth},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct TransactionOutcome {
    pub transaction: TransactionRecord,
    pub alerts:      Vec<AlertEvent>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub imported: Vec<TransactionId>,
    /// (row index, reason) for rows rejected by validation.
    pub rejected: Vec<(usize, String)>,
    pub alerts:   Vec<AlertEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetOutcome {
    pub budget:  Budget,
    pub created: bool,
    pub alerts:  Vec<AlertEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub year_month:     YearMonth,
    pub budget:         Option<Decimal>,
    pub mtd:            Decimal,
    /// Fraction of the budget spent, 0 when there is no budget.
    pub percent_used:   Decimal,
    pub next_threshold: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSummary {
    pub budget_id:    i64,
    pub year_month:   YearMonth,
    pub amount:       Decimal,
    pub spent:        Decimal,
    pub remaining:    Decimal,
    pub percent_used: Decimal,
    pub thresholds:   Vec<Decimal>,
    pub fired:        Vec<Decimal>,
}

/// One followed category with its current recommendation.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryRecommendation {
    pub category:       String,
    #[serde(flatten)]
    pub recommendation: Recommendation,
}

/// This local month at a glance.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    pub year_month:          YearMonth,
    pub spent_this_month:    Decimal,
    pub rewards_this_month:  Decimal,
    /// Budgets for this month or later.
    pub active_budgets:      usize,
    pub pending_alerts:      i64,
    pub budget:              Option<BudgetSummary>,
    /// Newest first, at most [`RECENT_TRANSACTIONS`].
    pub recent_transactions: Vec<TransactionRecord>,
}

pub const RECENT_TRANSACTIONS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetHistoryItem {
    pub year_month:    YearMonth,
    pub budget_amount: Option<Decimal>,
    pub actual_spend:  Decimal,
    pub percent_used:  Decimal,
}

fn percent_used(mtd: Decimal, amount: Option<Decimal>) -> Decimal {
    match amount {
        Some(a) if a > Decimal::ZERO => (mtd / a).round_dp(4),
        _ => Decimal::ZERO,
    }
}

fn summarize(budget: Budget, spent: Decimal) -> BudgetSummary {
    BudgetSummary {
        budget_id:    budget.budget_id,
        year_month:   budget.year_month,
        amount:       budget.amount,
        spent,
        remaining:    budget.amount - spent,
        percent_used: percent_used(spent, Some(budget.amount)),
        thresholds:   budget.thresholds,
        fired:        budget.fired,
    }
}

/// Validation failures are per-row outcomes during import, not aborts.
fn is_rejection(err: &EngineError) -> bool {
    matches!(
        err,
        EngineError::InvalidAmount { .. }
            | EngineError::InvalidCategory(_)
            | EngineError::NotFound { .. }
    )
}

pub struct CardEngine {
    store:  CardStore,
    config: EngineConfig,
    clock:  Arc<dyn Clock>,
}

impl CardEngine {
    pub fn new(store: CardStore, config: EngineConfig, clock: Arc<dyn Clock>) -> EngineResult<Self> {
        store.set_busy_timeout(config.busy_timeout_ms)?;
        Ok(Self { store, config, clock })
    }

    /// Open (or create) a database at `path`, migrate it and wire an engine.
    pub fn open(path: &str, config: EngineConfig, clock: Arc<dyn Clock>) -> EngineResult<Self> {
        let store = CardStore::open(path)?;
        store.migrate()?;
        Self::new(store, config, clock)
    }

    pub fn open_system(path: &str, config: EngineConfig) -> EngineResult<Self> {
        Self::open(path, config, Arc::new(SystemClock))
    }

    /// In-memory engine with test config and the given clock.
    pub fn build_test(clock: Arc<dyn Clock>) -> EngineResult<Self> {
        let store = CardStore::in_memory()?;
        store.migrate()?;
        Self::new(store, EngineConfig::default_test(), clock)
    }

    pub fn store(&self) -> &CardStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn user(&self, user_id: UserId) -> EngineResult<UserProfile> {
        self.store
            .user(user_id)?
            .ok_or(EngineError::NotFound { entity: "user", id: user_id })
    }

    fn ranker(&self) -> CardRanker<'_> {
        CardRanker::new(&self.store, self.config.fallback_multiplier)
    }

    fn trigger(&self) -> RecomputeTrigger<'_> {
        RecomputeTrigger::new(&self.store, &*self.clock)
    }

    fn evaluator(&self) -> ThresholdEvaluator<'_> {
        ThresholdEvaluator::new(&self.store, &*self.clock)
    }

    // ── Users, catalog, wallet ────────────────────────────────────

    pub fn create_user(&self, username: &str, timezone: Option<&str>) -> EngineResult<UserProfile> {
        self.store.insert_user(username, timezone)
    }

    pub fn user_by_username(&self, username: &str) -> EngineResult<Option<UserProfile>> {
        self.store.user_by_username(username)
    }

    pub fn set_user_timezone(&self, user_id: UserId, timezone: Option<&str>) -> EngineResult<()> {
        self.store.set_user_timezone(user_id, timezone)
    }

    pub fn add_card(&self, card: &NewCard) -> EngineResult<Card> {
        self.store.insert_card(card)
    }

    pub fn cards(&self) -> EngineResult<Vec<Card>> {
        self.store.all_cards()
    }

    pub fn add_reward_rule(
        &self,
        card_id: CardId,
        categories: &[&str],
        multiplier: Decimal,
        cap_amount: Option<Decimal>,
    ) -> EngineResult<i64> {
        let tags: BTreeSet<String> = categories.iter().map(|c| c.trim().to_string()).collect();
        self.store.insert_reward_rule(card_id, &tags, multiplier, cap_amount)
    }

    pub fn add_to_wallet(&self, user_id: UserId, card_id: CardId, active: bool) -> EngineResult<()> {
        self.store.upsert_wallet_entry(&WalletEntry {
            user_id,
            card_id,
            active,
            notes: None,
        })
    }

    pub fn set_wallet_active(&self, user_id: UserId, card_id: CardId, active: bool) -> EngineResult<()> {
        self.store.set_wallet_active(user_id, card_id, active)
    }

    /// Insert every card and rule of a catalog. Returns the stored cards.
    pub fn load_catalog(&self, catalog: &CardCatalog) -> EngineResult<Vec<Card>> {
        self.store.write_txn(|store| {
            let mut cards = Vec::with_capacity(catalog.cards.len());
            for entry in &catalog.cards {
                let card = store.insert_card(&NewCard {
                    issuer:     entry.issuer.clone(),
                    name:       entry.name.clone(),
                    annual_fee: entry.annual_fee,
                    foreign_transaction_fee: entry.foreign_transaction_fee,
                })?;
                for rule in &entry.rules {
                    let tags: BTreeSet<String> =
                        rule.categories.iter().map(|c| c.trim().to_string()).collect();
                    store.insert_reward_rule(card.card_id, &tags, rule.multiplier, rule.cap_amount)?;
                }
                cards.push(card);
            }
            Ok(cards)
        })
    }

    /// Give each card lacking a base rate a default "OTHER" rule.
    /// With `dry_run` nothing is written. Returns the affected cards.
    pub fn ensure_default_base_rules(&self, dry_run: bool) -> EngineResult<Vec<Card>> {
        let missing = self.store.cards_without_base_rule()?;
        if dry_run {
            for card in &missing {
                log::info!("[dry run] would add base rate to {}", card.display_name());
            }
            return Ok(missing);
        }
        let tags: BTreeSet<String> = [crate::types::BASE_RATE_TAG.to_string()].into();
        self.store.write_txn(|store| {
            for card in &missing {
                store.insert_reward_rule(card.card_id, &tags, self.config.default_base_multiplier, None)?;
                log::info!("added base rate to {}", card.display_name());
            }
            Ok(())
        })?;
        Ok(missing)
    }

    // ── Core operations ───────────────────────────────────────────

    pub fn resolve_month_window(&self, user_id: UserId, instant: DateTime<Utc>) -> EngineResult<MonthWindow> {
        Ok(month_window::resolve_month_window(&self.user(user_id)?, instant))
    }

    pub fn mtd_spend(&self, user_id: UserId, year_month: YearMonth) -> EngineResult<Decimal> {
        SpendAggregator::new(&self.store).mtd_spend(&self.user(user_id)?, year_month)
    }

    pub fn evaluate_thresholds(&self, budget: &mut Budget, mtd: Decimal) -> EngineResult<Vec<AlertEvent>> {
        self.evaluator().evaluate(budget, mtd)
    }

    pub fn best_card_for_category(&self, category: &str, user_id: UserId) -> EngineResult<Recommendation> {
        self.ranker().best_card_for_category(category, user_id)
    }

    pub fn reward_for(&self, card: Option<CardId>, amount: Decimal, category: &str) -> EngineResult<Decimal> {
        RewardCalculator::new(&self.store).reward_for(card, amount, category)
    }

    pub fn on_transaction_mutated(
        &self,
        transaction: &TransactionRecord,
        previous: Option<&TransactionRecord>,
    ) -> EngineResult<Vec<AlertEvent>> {
        self.trigger().on_transaction_mutated(transaction, previous)
    }

    // ── Transaction write path ────────────────────────────────────

    pub fn create_transaction(&self, input: NewTransaction) -> EngineResult<TransactionOutcome> {
        let user = self.user(input.user_id)?;
        let now = self.clock.now();
        let recommended = self
            .ranker()
            .best_card_for_category(&input.category, user.user_id)?
            .best_card
            .map(|c| c.id);
        let draft = TransactionRecord {
            transaction_id:      0,
            user_id:             user.user_id,
            card_used_id:        input.card_used_id,
            recommended_card_id: recommended,
            merchant:            input.merchant,
            amount:              input.amount,
            category:            input.category.trim().to_string(),
            created_at:          input.created_at.unwrap_or(now),
            notes:               input.notes,
        };

        let saved = self.store.write_txn(|store| {
            let saved = store.insert_transaction(&draft, now)?;
            store.append_event(
                user.user_id,
                &EngineEvent::TransactionRecorded {
                    transaction_id: saved.transaction_id,
                    year_month:     month_window::local_year_month(&user, saved.created_at),
                    amount:         saved.amount,
                },
                now,
            )?;
            Ok(saved)
        })?;

        let alerts = self.on_transaction_mutated(&saved, None)?;
        Ok(TransactionOutcome { transaction: saved, alerts })
    }

    pub fn update_transaction(&self, transaction_id: TransactionId, edit: TransactionEdit) -> EngineResult<TransactionOutcome> {
        let previous = self
            .store
            .transaction(transaction_id)?
            .ok_or(EngineError::NotFound { entity: "transaction", id: transaction_id })?;
        let user = self.user(previous.user_id)?;
        let now = self.clock.now();

        let mut updated = previous.clone();
        if let Some(amount) = edit.amount {
            updated.amount = amount;
        }
        if let Some(category) = edit.category {
            updated.category = category.trim().to_string();
        }
        if let Some(merchant) = edit.merchant {
            updated.merchant = merchant;
        }
        if let Some(card) = edit.card_used_id {
            updated.card_used_id = card;
        }
        if let Some(notes) = edit.notes {
            updated.notes = notes;
        }
        if let Some(created_at) = edit.created_at {
            updated.created_at = created_at;
        }

        self.store.write_txn(|store| {
            store.update_transaction(&updated, now)?;
            store.append_event(
                user.user_id,
                &EngineEvent::TransactionEdited {
                    transaction_id,
                    from_month: month_window::local_year_month(&user, previous.created_at),
                    to_month:   month_window::local_year_month(&user, updated.created_at),
                },
                now,
            )
        })?;

        let alerts = self.on_transaction_mutated(&updated, Some(&previous))?;
        Ok(TransactionOutcome { transaction: updated, alerts })
    }

    /// Delete and recompute the vacated month. Returns the removed row.
    pub fn delete_transaction(&self, transaction_id: TransactionId) -> EngineResult<TransactionOutcome> {
        let snapshot = self
            .store
            .transaction(transaction_id)?
            .ok_or(EngineError::NotFound { entity: "transaction", id: transaction_id })?;
        let user = self.user(snapshot.user_id)?;
        let now = self.clock.now();

        self.store.write_txn(|store| {
            store.delete_transaction(transaction_id)?;
            store.append_event(
                user.user_id,
                &EngineEvent::TransactionDeleted {
                    transaction_id,
                    year_month: month_window::local_year_month(&user, snapshot.created_at),
                },
                now,
            )
        })?;

        let alerts = self.on_transaction_mutated(&snapshot, None)?;
        Ok(TransactionOutcome { transaction: snapshot, alerts })
    }

    /// Bulk entry (e.g. parsed CSV rows). Each row goes through the write
    /// path on its own; rows failing validation are reported, not fatal.
    pub fn import_transactions(&self, rows: Vec<NewTransaction>) -> EngineResult<ImportSummary> {
        let mut summary = ImportSummary::default();
        for (idx, row) in rows.into_iter().enumerate() {
            match self.create_transaction(row) {
                Ok(outcome) => {
                    summary.imported.push(outcome.transaction.transaction_id);
                    summary.alerts.extend(outcome.alerts);
                }
                Err(e) if is_rejection(&e) => {
                    log::warn!("import row {idx} rejected: {e}");
                    summary.rejected.push((idx, e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(summary)
    }

    // ── Budgets ───────────────────────────────────────────────────

    fn current_year_month(&self, user: &UserProfile) -> YearMonth {
        month_window::local_year_month(user, self.clock.now())
    }

    /// Create or update the budget for `year_month` (default: current local
    /// month). A changed threshold list resets the fired set first.
    pub fn upsert_budget(
        &self,
        user_id: UserId,
        year_month: Option<YearMonth>,
        amount: Decimal,
        thresholds: Option<Vec<Decimal>>,
    ) -> EngineResult<BudgetOutcome> {
        let user = self.user(user_id)?;
        let year_month = year_month.unwrap_or_else(|| self.current_year_month(&user));
        let now = self.clock.now();
        let spend = SpendAggregator::new(&self.store);

        match self.store.budget_for(user_id, year_month)? {
            None => {
                let thresholds = thresholds.unwrap_or_else(|| self.config.default_thresholds.clone());
                let mut budget = self.store.insert_budget(user_id, year_month, amount, &thresholds, now)?;
                let mtd = spend.mtd_spend(&user, year_month)?;
                let alerts = self.evaluator().evaluate(&mut budget, mtd)?;
                Ok(BudgetOutcome { budget, created: true, alerts })
            }
            Some(mut budget) => {
                let mtd = spend.mtd_spend(&user, year_month)?;
                let alerts = match thresholds {
                    Some(new) if new != budget.thresholds => {
                        self.evaluator().replace_thresholds(&mut budget, amount, &new, mtd)?
                    }
                    _ => self.store.write_txn(|store| {
                        store.update_budget_config(budget.budget_id, amount, &budget.thresholds, now)?;
                        self.evaluator().evaluate(&mut budget, mtd)
                    })?,
                };
                Ok(BudgetOutcome { budget, created: false, alerts })
            }
        }
    }

    pub fn budget(&self, user_id: UserId, year_month: YearMonth) -> EngineResult<Option<Budget>> {
        self.store.budget_for(user_id, year_month)
    }

    /// Remove a month's budget and its alerts.
    pub fn delete_budget(&self, user_id: UserId, year_month: YearMonth) -> EngineResult<bool> {
        match self.store.budget_for(user_id, year_month)? {
            Some(budget) => self.store.delete_budget(budget.budget_id),
            None => Ok(false),
        }
    }

    pub fn budget_status(&self, user_id: UserId, year_month: YearMonth) -> EngineResult<BudgetStatus> {
        let user = self.user(user_id)?;
        let mtd = SpendAggregator::new(&self.store).mtd_spend(&user, year_month)?;
        let budget = self.store.budget_for(user_id, year_month)?;
        let next = match &budget {
            Some(b) => next_threshold(b, mtd),
            None => self.config.default_thresholds.first().copied(),
        };
        Ok(BudgetStatus {
            year_month,
            budget: budget.as_ref().map(|b| b.amount),
            mtd,
            percent_used: percent_used(mtd, budget.as_ref().map(|b| b.amount)),
            next_threshold: next,
        })
    }

    pub fn current_budget_status(&self, user_id: UserId) -> EngineResult<BudgetStatus> {
        let user = self.user(user_id)?;
        self.budget_status(user_id, self.current_year_month(&user))
    }

    /// Every budget the user has, newest month first, with spend so far.
    pub fn budget_summaries(&self, user_id: UserId) -> EngineResult<Vec<BudgetSummary>> {
        let user = self.user(user_id)?;
        let spend = SpendAggregator::new(&self.store);
        self.store
            .budgets_for_user(user_id)?
            .into_iter()
            .map(|b| {
                let spent = spend.mtd_spend(&user, b.year_month)?;
                Ok(summarize(b, spent))
            })
            .collect()
    }

    /// Budget vs actual for the last `limit` local months, current first.
    pub fn budget_history(&self, user_id: UserId, limit: Option<u32>) -> EngineResult<Vec<BudgetHistoryItem>> {
        let user = self.user(user_id)?;
        let spend = SpendAggregator::new(&self.store);
        let limit = limit.unwrap_or(self.config.history_months);
        let mut month = self.current_year_month(&user);
        let mut history = Vec::with_capacity(limit as usize);
        for _ in 0..limit {
            let budget_amount = self.store.budget_for(user_id, month)?.map(|b| b.amount);
            let actual_spend = spend.mtd_spend(&user, month)?;
            history.push(BudgetHistoryItem {
                year_month: month,
                budget_amount,
                actual_spend,
                percent_used: percent_used(actual_spend, budget_amount),
            });
            month = month.prev();
        }
        Ok(history)
    }

    /// Spend, rewards, budgets, alerts and latest purchases for the
    /// user's current local month.
    pub fn dashboard_summary(&self, user_id: UserId, basis: RewardBasis) -> EngineResult<DashboardSummary> {
        let user = self.user(user_id)?;
        let year_month = self.current_year_month(&user);
        let window = month_window::window_for_year_month(month_window::user_timezone(&user), year_month);

        let spent = SpendAggregator::new(&self.store).mtd_spend(&user, year_month)?;
        let rewards = RewardCalculator::new(&self.store).total_rewards(
            user_id,
            Some(window.start),
            Some(window.end),
            basis,
        )?;
        let budgets = self.store.budgets_for_user(user_id)?;
        let active_budgets = budgets.iter().filter(|b| b.year_month >= year_month).count();
        let budget = budgets
            .into_iter()
            .find(|b| b.year_month == year_month)
            .map(|b| summarize(b, spent));

        let mut recent = self
            .store
            .transactions_for_user(user_id, Some(window.start), Some(window.end))?;
        recent.reverse();
        recent.truncate(RECENT_TRANSACTIONS);

        Ok(DashboardSummary {
            year_month,
            spent_this_month: spent,
            rewards_this_month: rewards,
            active_budgets,
            pending_alerts: self.store.pending_alert_count(user_id)?,
            budget,
            recent_transactions: recent,
        })
    }

    // ── Optimizer selections ──────────────────────────────────────

    pub fn select_category(&self, user_id: UserId, category: &str) -> EngineResult<bool> {
        self.user(user_id)?;
        self.store.select_category(user_id, category)
    }

    pub fn unselect_category(&self, user_id: UserId, category: &str) -> EngineResult<bool> {
        self.store.unselect_category(user_id, category)
    }

    pub fn category_selections(&self, user_id: UserId) -> EngineResult<Vec<String>> {
        self.store.category_selections(user_id)
    }

    /// The best card for every category the user follows, in tag order.
    pub fn optimizer_dashboard(&self, user_id: UserId) -> EngineResult<Vec<CategoryRecommendation>> {
        let ranker = self.ranker();
        self.store
            .category_selections(user_id)?
            .into_iter()
            .map(|category| {
                let recommendation = ranker.best_card_for_category(&category, user_id)?;
                Ok(CategoryRecommendation { category, recommendation })
            })
            .collect()
    }

    // ── Alerts ────────────────────────────────────────────────────

    pub fn alerts(&self, user_id: UserId) -> EngineResult<Vec<AlertEvent>> {
        self.store.alerts_for_user(user_id)
    }

    pub fn pending_alert_count(&self, user_id: UserId) -> EngineResult<i64> {
        self.store.pending_alert_count(user_id)
    }

    /// pending → acknowledged. Acknowledging twice is harmless.
    pub fn acknowledge_alert(&self, user_id: UserId, alert_id: AlertId) -> EngineResult<Option<AlertEvent>> {
        let now = self.clock.now();
        self.store.write_txn(|store| {
            let was_pending = store
                .alert(alert_id)?
                .is_some_and(|a| a.user_id == user_id && a.status == AlertStatus::Pending);
            let alert = store.acknowledge_alert(user_id, alert_id)?;
            if was_pending {
                store.append_event(user_id, &EngineEvent::AlertAcknowledged { alert_id }, now)?;
            }
            Ok(alert)
        })
    }

    pub fn events(&self, user_id: UserId) -> EngineResult<Vec<EventLogEntry>> {
        self.store.events_for_user(user_id)
    }

    // ── Rewards ───────────────────────────────────────────────────

    pub fn total_rewards(
        &self,
        user_id: UserId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        basis: RewardBasis,
    ) -> EngineResult<Decimal> {
        RewardCalculator::new(&self.store).total_rewards(user_id, start, end, basis)
    }

    pub fn rewards_by_card(
        &self,
        user_id: UserId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        basis: RewardBasis,
    ) -> EngineResult<BTreeMap<CardId, Decimal>> {
        RewardCalculator::new(&self.store).rewards_by_card(user_id, start, end, basis)
    }
}
