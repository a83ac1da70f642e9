//! Budget threshold firing through the full write path.
//!
//! Every threshold fires at most once per budget, and nothing un-fires
//! except an explicit threshold-list replacement.

use cardwise_core::{
    clock::FixedClock,
    engine::CardEngine,
    model::NewTransaction,
    store::CardStore,
    threshold::ThresholdEvaluator,
    types::{UserId, YearMonth},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn may() -> YearMonth {
    "2024-05".parse().unwrap()
}

fn build() -> (CardEngine, UserId) {
    let clock = Arc::new(FixedClock::at(utc("2024-05-10T12:00:00Z")));
    let engine = CardEngine::build_test(clock).expect("engine");
    let user = engine.create_user("alice", None).expect("user");
    (engine, user.user_id)
}

fn spend(engine: &CardEngine, user_id: UserId, amount: Decimal) -> cardwise_core::engine::TransactionOutcome {
    engine
        .create_transaction(NewTransaction {
            user_id,
            merchant: "Somewhere".into(),
            amount,
            category: "DINING".into(),
            ..NewTransaction::default()
        })
        .expect("create transaction")
}

#[test]
fn thousand_dollar_budget_fires_each_threshold_once() {
    let (engine, user) = build();
    let created = engine
        .upsert_budget(user, Some(may()), dec!(1000.00), None)
        .expect("budget");
    assert!(created.created);
    assert!(created.alerts.is_empty());
    assert_eq!(created.budget.thresholds, vec![dec!(0.5), dec!(0.7), dec!(0.9)]);

    let first = spend(&engine, user, dec!(500.00));
    assert_eq!(first.alerts.len(), 1);
    assert_eq!(first.alerts[0].threshold, dec!(0.5));
    assert_eq!(first.alerts[0].spend_at_fire, dec!(500.00));

    let budget = engine.budget(user, may()).unwrap().unwrap();
    assert_eq!(budget.fired, vec![dec!(0.5)]);

    let second = spend(&engine, user, dec!(200.00));
    assert_eq!(second.alerts.len(), 1);
    assert_eq!(second.alerts[0].threshold, dec!(0.7));
    assert_eq!(second.alerts[0].spend_at_fire, dec!(700.00));

    let budget = engine.budget(user, may()).unwrap().unwrap();
    assert_eq!(budget.fired, vec![dec!(0.5), dec!(0.7)]);
    assert_eq!(engine.alerts(user).unwrap().len(), 2);
    assert_eq!(engine.pending_alert_count(user).unwrap(), 2);
}

#[test]
fn deleting_spend_does_not_retract_fired_thresholds() {
    let (engine, user) = build();
    engine.upsert_budget(user, Some(may()), dec!(1000), None).unwrap();
    let big = spend(&engine, user, dec!(500.00));
    spend(&engine, user, dec!(200.00));

    let removed = engine
        .delete_transaction(big.transaction.transaction_id)
        .expect("delete");
    assert!(removed.alerts.is_empty());

    assert_eq!(engine.mtd_spend(user, may()).unwrap(), dec!(200.00));
    let budget = engine.budget(user, may()).unwrap().unwrap();
    assert_eq!(budget.fired, vec![dec!(0.5), dec!(0.7)]);
    assert_eq!(engine.alerts(user).unwrap().len(), 2);

    // Climbing back past 50% must not fire it a second time.
    let again = spend(&engine, user, dec!(350.00));
    assert!(again.alerts.is_empty());
}

#[test]
fn one_purchase_can_cross_several_thresholds() {
    let (engine, user) = build();
    engine.upsert_budget(user, Some(may()), dec!(1000), None).unwrap();

    let outcome = spend(&engine, user, dec!(950.00));
    let fired: Vec<Decimal> = outcome.alerts.iter().map(|a| a.threshold).collect();
    assert_eq!(fired, vec![dec!(0.5), dec!(0.7), dec!(0.9)]);
    assert!(outcome.alerts.iter().all(|a| a.spend_at_fire == dec!(950.00)));
}

#[test]
fn re_evaluating_same_spend_is_idempotent() {
    let (engine, user) = build();
    engine.upsert_budget(user, Some(may()), dec!(1000), None).unwrap();
    spend(&engine, user, dec!(750.00));

    let mut budget = engine.budget(user, may()).unwrap().unwrap();
    let mtd = engine.mtd_spend(user, may()).unwrap();
    for _ in 0..3 {
        assert!(engine.evaluate_thresholds(&mut budget, mtd).unwrap().is_empty());
    }
    assert_eq!(engine.alerts(user).unwrap().len(), 2);
}

#[test]
fn replacing_thresholds_resets_and_refires() {
    let (engine, user) = build();
    engine.upsert_budget(user, Some(may()), dec!(1000), None).unwrap();
    spend(&engine, user, dec!(700.00));
    assert_eq!(engine.alerts(user).unwrap().len(), 2);

    let replaced = engine
        .upsert_budget(user, Some(may()), dec!(1000), Some(vec![dec!(0.6), dec!(0.8)]))
        .expect("replace thresholds");
    assert!(!replaced.created);
    assert_eq!(replaced.alerts.len(), 1);
    assert_eq!(replaced.alerts[0].threshold, dec!(0.6));
    assert_eq!(replaced.budget.fired, vec![dec!(0.6)]);
    assert_eq!(engine.alerts(user).unwrap().len(), 3);

    // Same list again: nothing resets, nothing fires.
    let unchanged = engine
        .upsert_budget(user, Some(may()), dec!(1000), Some(vec![dec!(0.6), dec!(0.8)]))
        .unwrap();
    assert!(unchanged.alerts.is_empty());
    assert_eq!(unchanged.budget.fired, vec![dec!(0.6)]);
}

#[test]
fn lowering_the_amount_fires_against_existing_spend() {
    let (engine, user) = build();
    engine.upsert_budget(user, Some(may()), dec!(1000), None).unwrap();
    spend(&engine, user, dec!(400.00));
    assert!(engine.alerts(user).unwrap().is_empty());

    let lowered = engine.upsert_budget(user, Some(may()), dec!(500), None).unwrap();
    let fired: Vec<Decimal> = lowered.alerts.iter().map(|a| a.threshold).collect();
    assert_eq!(fired, vec![dec!(0.5), dec!(0.7)]);
}

#[test]
fn invalid_budget_configuration_is_rejected() {
    let (engine, user) = build();
    assert!(engine.upsert_budget(user, Some(may()), Decimal::ZERO, None).is_err());
    assert!(engine.upsert_budget(user, Some(may()), dec!(-5), None).is_err());
    assert!(engine
        .upsert_budget(user, Some(may()), dec!(100), Some(vec![dec!(0.9), dec!(0.5)]))
        .is_err());
    assert!(engine
        .upsert_budget(user, Some(may()), dec!(100), Some(vec![dec!(1.5)]))
        .is_err());
    assert!(engine.budget(user, may()).unwrap().is_none());
}

#[test]
fn acknowledging_is_one_way() {
    let (engine, user) = build();
    engine.upsert_budget(user, Some(may()), dec!(1000), None).unwrap();
    let alert = spend(&engine, user, dec!(600.00)).alerts.remove(0);

    let acked = engine.acknowledge_alert(user, alert.alert_id).unwrap().unwrap();
    assert_eq!(acked.status, cardwise_core::model::AlertStatus::Acknowledged);
    assert_eq!(engine.pending_alert_count(user).unwrap(), 0);

    let again = engine.acknowledge_alert(user, alert.alert_id).unwrap().unwrap();
    assert_eq!(again.status, cardwise_core::model::AlertStatus::Acknowledged);

    let acks = engine
        .events(user)
        .unwrap()
        .into_iter()
        .filter(|e| e.event_type == "alert_acknowledged")
        .count();
    assert_eq!(acks, 1);

    let other = engine.create_user("mallory", None).unwrap();
    assert!(engine.acknowledge_alert(other.user_id, alert.alert_id).unwrap().is_none());
}

#[test]
fn deleting_a_budget_removes_its_alerts() {
    let (engine, user) = build();
    engine.upsert_budget(user, Some(may()), dec!(1000), None).unwrap();
    spend(&engine, user, dec!(800.00));
    assert_eq!(engine.alerts(user).unwrap().len(), 2);

    assert!(engine.delete_budget(user, may()).unwrap());
    assert!(engine.alerts(user).unwrap().is_empty());
    assert!(!engine.delete_budget(user, may()).unwrap());
}

// ── Concurrent writers ────────────────────────────────────────────

fn temp_db(name: &str) -> String {
    let path = std::env::temp_dir().join(format!("cardwise-{name}-{}.db", std::process::id()));
    let path = path.to_string_lossy().into_owned();
    cleanup(&path);
    path
}

fn cleanup(path: &str) {
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{path}{suffix}"));
    }
}

#[test]
fn stale_budget_copy_cannot_double_fire() {
    let path = temp_db("stale");
    let store_a = CardStore::open(&path).unwrap();
    store_a.migrate().unwrap();
    let store_b = store_a.reopen().unwrap();
    let clock = FixedClock::at(utc("2024-05-10T12:00:00Z"));

    let user = store_a.insert_user("bob", None).unwrap();
    let mut fresh = store_a
        .insert_budget(user.user_id, may(), dec!(1000), &[dec!(0.5), dec!(0.7)], utc("2024-05-01T00:00:00Z"))
        .unwrap();
    let mut stale = fresh.clone();

    let a = ThresholdEvaluator::new(&store_a, &clock);
    let b = ThresholdEvaluator::new(&store_b, &clock);

    assert_eq!(a.evaluate(&mut fresh, dec!(600)).unwrap().len(), 1);
    // `stale` still believes nothing has fired.
    assert!(stale.fired.is_empty());
    assert!(b.evaluate(&mut stale, dec!(600)).unwrap().is_empty());
    assert_eq!(stale.fired, vec![dec!(0.5)]);
    assert_eq!(store_a.alerts_for_budget(fresh.budget_id).unwrap().len(), 1);

    drop(a);
    drop(b);
    drop(store_a);
    drop(store_b);
    cleanup(&path);
}

#[test]
fn racing_writers_fire_each_threshold_once() {
    let path = temp_db("race");
    let setup = CardStore::open(&path).unwrap();
    setup.migrate().unwrap();
    let user = setup.insert_user("carol", None).unwrap();
    let budget = setup
        .insert_budget(user.user_id, may(), dec!(1000), &[dec!(0.5), dec!(0.7), dec!(0.9)], utc("2024-05-01T00:00:00Z"))
        .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let path = path.clone();
            let mut copy = budget.clone();
            std::thread::spawn(move || {
                let store = CardStore::open(&path).unwrap();
                let clock = FixedClock::at(utc("2024-05-10T12:00:00Z"));
                ThresholdEvaluator::new(&store, &clock)
                    .evaluate(&mut copy, dec!(950))
                    .unwrap()
                    .len()
            })
        })
        .collect();
    let fired: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(fired, 3);
    assert_eq!(setup.alerts_for_budget(budget.budget_id).unwrap().len(), 3);
    drop(setup);
    cleanup(&path);
}
