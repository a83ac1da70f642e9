//! Month-to-date spend against local calendar months.

use cardwise_core::{
    clock::FixedClock,
    engine::CardEngine,
    model::NewTransaction,
    types::{UserId, YearMonth},
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn ym(s: &str) -> YearMonth {
    s.parse().unwrap()
}

fn build(tz: Option<&str>) -> (CardEngine, UserId) {
    let clock = Arc::new(FixedClock::at(utc("2024-03-15T12:00:00Z")));
    let engine = CardEngine::build_test(clock).unwrap();
    let user = engine.create_user("erin", tz).unwrap();
    (engine, user.user_id)
}

fn record_at(engine: &CardEngine, user_id: UserId, amount: Decimal, at: DateTime<Utc>) {
    engine
        .create_transaction(NewTransaction {
            user_id,
            merchant: "Shop".into(),
            amount,
            category: "GROCERIES".into(),
            created_at: Some(at),
            ..NewTransaction::default()
        })
        .unwrap();
}

#[test]
fn no_transactions_is_zero() {
    let (engine, user) = build(None);
    assert_eq!(engine.mtd_spend(user, ym("2024-03")).unwrap(), Decimal::ZERO);
}

#[test]
fn window_bounds_are_inclusive_and_nothing_leaks() {
    let (engine, user) = build(None);
    let window = engine
        .resolve_month_window(user, utc("2024-03-15T00:00:00Z"))
        .unwrap();

    record_at(&engine, user, dec!(1.00), window.start);
    record_at(&engine, user, dec!(2.00), window.end);
    record_at(&engine, user, dec!(40.00), window.start - Duration::seconds(1));
    record_at(&engine, user, dec!(80.00), window.end + Duration::seconds(1));

    assert_eq!(engine.mtd_spend(user, ym("2024-03")).unwrap(), dec!(3.00));
    assert_eq!(engine.mtd_spend(user, ym("2024-02")).unwrap(), dec!(40.00));
    assert_eq!(engine.mtd_spend(user, ym("2024-04")).unwrap(), dec!(80.00));
}

#[test]
fn purchases_bucket_by_the_users_calendar() {
    let (engine, user) = build(Some("America/New_York"));
    // 2024-03-01 02:00 UTC is the evening of Feb 29th in New York.
    record_at(&engine, user, dec!(25.50), utc("2024-03-01T02:00:00Z"));
    // 2024-03-01 06:00 UTC is 01:00 on March 1st in New York.
    record_at(&engine, user, dec!(10.25), utc("2024-03-01T06:00:00Z"));

    assert_eq!(engine.mtd_spend(user, ym("2024-02")).unwrap(), dec!(25.50));
    assert_eq!(engine.mtd_spend(user, ym("2024-03")).unwrap(), dec!(10.25));
}

#[test]
fn sums_are_exact_at_cent_precision() {
    let (engine, user) = build(None);
    for _ in 0..10 {
        record_at(&engine, user, dec!(0.10), utc("2024-03-05T10:00:00Z"));
    }
    record_at(&engine, user, dec!(0.20), utc("2024-03-05T10:00:00Z"));
    assert_eq!(engine.mtd_spend(user, ym("2024-03")).unwrap(), dec!(1.20));
}

#[test]
fn repeated_reads_agree() {
    let (engine, user) = build(Some("Europe/Berlin"));
    record_at(&engine, user, dec!(99.99), utc("2024-03-31T21:30:00Z"));
    let first = engine.mtd_spend(user, ym("2024-03")).unwrap();
    for _ in 0..5 {
        assert_eq!(engine.mtd_spend(user, ym("2024-03")).unwrap(), first);
    }
    // 23:30 in Berlin on the 31st (CEST, UTC+2) is still March.
    assert_eq!(first, dec!(99.99));
}

#[test]
fn invalid_amounts_never_reach_the_store() {
    let (engine, user) = build(None);
    for bad in [dec!(-1.00), dec!(1.005)] {
        let result = engine.create_transaction(NewTransaction {
            user_id: user,
            amount: bad,
            category: "GAS".into(),
            ..NewTransaction::default()
        });
        assert!(result.is_err(), "{bad} should be rejected");
    }
    let blank = engine.create_transaction(NewTransaction {
        user_id: user,
        amount: dec!(5),
        category: "   ".into(),
        ..NewTransaction::default()
    });
    assert!(blank.is_err());
    assert_eq!(engine.mtd_spend(user, ym("2024-03")).unwrap(), Decimal::ZERO);
}

#[test]
fn unknown_timezone_is_treated_as_utc() {
    let (engine, user) = build(Some("Not/A_Zone"));
    let window = engine
        .resolve_month_window(user, utc("2024-03-15T00:00:00Z"))
        .unwrap();
    assert_eq!(window.start, utc("2024-03-01T00:00:00Z"));
    assert_eq!(window.end, utc("2024-03-31T23:59:59.999999Z"));
}
