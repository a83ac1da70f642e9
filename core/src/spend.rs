//! Month-to-date spend aggregation.

use crate::{
    error::EngineResult,
    model::UserProfile,
    month_window::{user_timezone, window_for_year_month, MonthWindow},
    store::CardStore,
    types::YearMonth,
};
use rust_decimal::Decimal;

pub struct SpendAggregator<'a> {
    store: &'a CardStore,
}

impl<'a> SpendAggregator<'a> {
    pub fn new(store: &'a CardStore) -> Self {
        Self { store }
    }

    /// Total spend for `year_month` on the user's local calendar.
    /// Zero when there is nothing to sum. Read-only.
    pub fn mtd_spend(&self, user: &UserProfile, year_month: YearMonth) -> EngineResult<Decimal> {
        let window = window_for_year_month(user_timezone(user), year_month);
        self.spend_in_window(user, &window)
    }

    pub fn spend_in_window(&self, user: &UserProfile, window: &MonthWindow) -> EngineResult<Decimal> {
        let total = self
            .store
            .sum_spend_between(user.user_id, window.start, window.end)?;
        log::trace!(
            "user={} spend {}..{} = {total}",
            user.user_id,
            window.start,
            window.end
        );
        Ok(total)
    }
}
