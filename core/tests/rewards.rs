use cardwise_core::{
    clock::FixedClock,
    engine::CardEngine,
    model::{NewCard, NewTransaction, RewardRule},
    reward::{reward_from_rules, RewardBasis},
    types::{CardId, UserId},
};
use chrono::{TimeZone, Utc};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

struct Fixture {
    engine: CardEngine,
    user:   UserId,
    gold:   CardId,
    cash:   CardId,
}

fn build() -> Fixture {
    let clock = Arc::new(FixedClock::at(Utc.with_ymd_and_hms(2024, 7, 4, 15, 0, 0).unwrap()));
    let engine = CardEngine::build_test(clock).unwrap();
    let user = engine.create_user("frank", None).unwrap().user_id;

    let new_card = |issuer: &str, name: &str| NewCard {
        issuer:     issuer.into(),
        name:       name.into(),
        annual_fee: Decimal::ZERO,
        foreign_transaction_fee: false,
    };
    let gold = engine.add_card(&new_card("Amex", "Gold")).unwrap().card_id;
    engine.add_reward_rule(gold, &["DINING", "GROCERIES"], dec!(4), None).unwrap();
    engine.add_reward_rule(gold, &["OTHER"], dec!(1), None).unwrap();
    let cash = engine.add_card(&new_card("Citi", "Double Cash")).unwrap().card_id;
    engine.add_reward_rule(cash, &["OTHER"], dec!(2), None).unwrap();
    engine.add_to_wallet(user, gold, true).unwrap();
    engine.add_to_wallet(user, cash, true).unwrap();

    Fixture { engine, user, gold, cash }
}

#[test]
fn category_rule_then_base_rate() {
    let f = build();
    assert_eq!(f.engine.reward_for(Some(f.gold), dec!(100), "DINING").unwrap(), dec!(4.00));
    assert_eq!(f.engine.reward_for(Some(f.gold), dec!(100), "GAS").unwrap(), dec!(1.00));
    assert_eq!(f.engine.reward_for(Some(f.cash), dec!(100), "DINING").unwrap(), dec!(2.00));
}

#[test]
fn degenerate_inputs_earn_zero() {
    let f = build();
    assert_eq!(f.engine.reward_for(None, dec!(100), "DINING").unwrap(), Decimal::ZERO);
    assert_eq!(f.engine.reward_for(Some(f.gold), Decimal::ZERO, "DINING").unwrap(), Decimal::ZERO);
    assert_eq!(f.engine.reward_for(Some(f.gold), dec!(100), "").unwrap(), Decimal::ZERO);
    // Unknown card: no rules, no reward.
    assert_eq!(f.engine.reward_for(Some(9_999), dec!(100), "DINING").unwrap(), Decimal::ZERO);
}

#[test]
fn huge_amounts_are_rejected_without_panicking() {
    let f = build();
    assert!(f.engine.reward_for(Some(f.gold), Decimal::MAX, "DINING").is_err());

    let too_big = f.engine.create_transaction(NewTransaction {
        user_id: f.user,
        merchant: "Yacht".into(),
        amount: Decimal::from_i128_with_scale(10_i128.pow(27), 0),
        category: "TRAVEL".into(),
        ..NewTransaction::default()
    });
    assert!(too_big.is_err());

    let largest = f
        .engine
        .create_transaction(NewTransaction {
            user_id: f.user,
            merchant: "Yacht".into(),
            amount: dec!(99999999.99),
            category: "TRAVEL".into(),
            ..NewTransaction::default()
        })
        .unwrap();
    assert_eq!(largest.transaction.amount, dec!(99999999.99));
    assert!(f
        .engine
        .create_transaction(NewTransaction {
            user_id: f.user,
            merchant: "Yacht".into(),
            amount: dec!(100000000.00),
            category: "TRAVEL".into(),
            ..NewTransaction::default()
        })
        .is_err());
}

#[test]
fn basis_decides_uncarded_purchases() {
    let f = build();
    let paid = |card: Option<CardId>, amount: Decimal, category: &str| {
        f.engine
            .create_transaction(NewTransaction {
                user_id: f.user,
                card_used_id: card,
                merchant: "M".into(),
                amount,
                category: category.into(),
                ..NewTransaction::default()
            })
            .unwrap()
            .transaction
    };
    paid(Some(f.gold), dec!(50.00), "DINING"); // 2.00 on gold
    paid(Some(f.cash), dec!(30.00), "GAS"); // 0.60 on cash
    let uncarded = paid(None, dec!(25.00), "GROCERIES");
    // The recommendation for groceries is the gold card.
    assert_eq!(uncarded.recommended_card_id, Some(f.gold));

    let used = f.engine.rewards_by_card(f.user, None, None, RewardBasis::CardUsed).unwrap();
    assert_eq!(used.get(&f.gold), Some(&dec!(2.00)));
    assert_eq!(used.get(&f.cash), Some(&dec!(0.60)));
    assert_eq!(f.engine.total_rewards(f.user, None, None, RewardBasis::CardUsed).unwrap(), dec!(2.60));

    let with_rec = f
        .engine
        .total_rewards(f.user, None, None, RewardBasis::RecommendedIfUnused)
        .unwrap();
    assert_eq!(with_rec, dec!(3.60));
}

#[test]
fn reward_is_monotonic_in_amount() {
    let rules = vec![
        RewardRule {
            rule_id:    1,
            card_id:    1,
            categories: ["DINING".to_string()].into(),
            multiplier: dec!(3),
            cap_amount: None,
        },
        RewardRule {
            rule_id:    2,
            card_id:    1,
            categories: ["OTHER".to_string()].into(),
            multiplier: dec!(1.5),
            cap_amount: None,
        },
    ];
    let mut rng = Pcg64Mcg::seed_from_u64(0xC0FFEE);
    for _ in 0..500 {
        let a = Decimal::new(rng.gen_range(0..1_000_000), 2);
        let b = a + Decimal::new(rng.gen_range(0..10_000), 2);
        for category in ["DINING", "TRAVEL"] {
            let ra = reward_from_rules(&rules, a, category).unwrap();
            let rb = reward_from_rules(&rules, b, category).unwrap();
            assert!(ra <= rb, "{category}: reward({a})={ra} > reward({b})={rb}");
            assert!(ra >= Decimal::ZERO);
        }
    }
}
