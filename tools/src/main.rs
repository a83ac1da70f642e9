//! cardwise-runner: headless driver for the cardwise engine.
//!
//! Usage:
//!   cardwise-runner --seed 12345 --days 30 --db run.db
//!   cardwise-runner --ipc-mode --db run.db
//!
//! Batch mode seeds a demo user from the catalog, replays a month of
//! synthetic purchases on a pinned clock and prints the resulting budget
//! state. IPC mode reads one JSON command per stdin line and answers with
//! one JSON line.

use anyhow::Result;
use cardwise_core::{
    clock::FixedClock,
    config::{CardCatalog, EngineConfig},
    engine::CardEngine,
    model::{NewTransaction, UserProfile},
    reward::RewardBasis,
    types::{AlertId, CardId, UserId},
};
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use rust_decimal::Decimal;
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

const CATEGORIES: [&str; 6] = ["DINING", "GROCERIES", "TRAVEL", "GAS", "RENT", "ENTERTAINMENT"];
const MERCHANTS: [&str; 6] = ["Corner Bistro", "FreshMart", "SkyAir", "QuickFuel", "Landlord LLC", "CinePlex"];

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Recommend {
        category: String,
    },
    Record {
        category: String,
        amount:   Decimal,
        #[serde(default)]
        merchant: String,
        #[serde(default)]
        card_id:  Option<CardId>,
    },
    SetBudget {
        amount: Decimal,
        #[serde(default)]
        thresholds: Option<Vec<Decimal>>,
    },
    Status,
    Alerts,
    Ack {
        alert_id: AlertId,
    },
    Advance {
        hours: i64,
    },
    Quit,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let days = parse_arg(&args, "--days", 30u32);
    let per_day = parse_arg(&args, "--per-day", 3u32);
    let budget = parse_arg(&args, "--budget", Decimal::new(2_000, 0));
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = str_arg(&args, "--db", ":memory:");
    let data_dir = str_arg(&args, "--data-dir", "./data");
    let timezone = str_arg(&args, "--timezone", "America/New_York");

    let config = EngineConfig::load(data_dir).unwrap_or_else(|e| {
        log::warn!("{e}; using built-in defaults");
        EngineConfig::default_test()
    });
    let catalog = CardCatalog::load(data_dir)?;

    if !ipc_mode {
        println!("cardwise-runner");
        println!("  seed:      {seed}");
        println!("  days:      {days} × {per_day}");
        println!("  budget:    {budget}");
        println!("  db:        {db}");
        println!("  data_dir:  {data_dir}");
        println!();
    }

    let now = Utc::now();
    let month_start = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 12, 0, 0)
        .single()
        .unwrap_or(now);
    let clock = Arc::new(FixedClock::at(month_start));

    let engine = CardEngine::open(db, config, clock.clone())?;

    let user = seed_demo(&engine, &catalog, seed, timezone, budget)?;

    if ipc_mode {
        run_ipc_loop(&engine, &clock, user.user_id)
    } else {
        replay_month(&engine, &clock, &user, seed, days, per_day)?;
        print_summary(&engine, &user)
    }
}

/// Catalog, demo user, full wallet and this month's budget. Anything
/// already in the database is reused, so reruns against one file work.
fn seed_demo(
    engine: &CardEngine,
    catalog: &CardCatalog,
    seed: u64,
    timezone: &str,
    budget: Decimal,
) -> Result<UserProfile> {
    let stored = engine.cards()?;
    let cards = if stored.is_empty() {
        engine.load_catalog(catalog)?
    } else {
        log::info!("reusing {} stored cards", stored.len());
        stored
    };

    let username = format!("demo-{seed}");
    let user = match engine.user_by_username(&username)? {
        Some(existing) => existing,
        None => engine.create_user(&username, Some(timezone))?,
    };
    for card in &cards {
        engine.add_to_wallet(user.user_id, card.card_id, true)?;
    }
    engine.upsert_budget(user.user_id, None, budget, None)?;
    Ok(user)
}

fn replay_month(
    engine: &CardEngine,
    clock: &FixedClock,
    user: &UserProfile,
    seed: u64,
    days: u32,
    per_day: u32,
) -> Result<()> {
    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let spacing = Duration::hours(24 / i64::from(per_day.max(1)));

    for _ in 0..days {
        for _ in 0..per_day {
            let pick = rng.gen_range(0..CATEGORIES.len());
            let category = CATEGORIES[pick];
            let rec = engine.best_card_for_category(category, user.user_id)?;
            let outcome = engine.create_transaction(NewTransaction {
                user_id:      user.user_id,
                card_used_id: rec.best_card.map(|c| c.id),
                merchant:     MERCHANTS[pick].to_string(),
                amount:       Decimal::new(rng.gen_range(500..15_000), 2),
                category:     category.to_string(),
                ..NewTransaction::default()
            })?;
            for alert in &outcome.alerts {
                println!(
                    "  [{}] alert: {}% of budget crossed at {}",
                    alert.fired_at.format("%Y-%m-%d %H:%M"),
                    alert.threshold * Decimal::ONE_HUNDRED,
                    alert.spend_at_fire
                );
            }
            clock.advance(spacing);
        }
    }
    Ok(())
}

fn run_ipc_loop(engine: &CardEngine, clock: &FixedClock, user_id: UserId) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        if handle.read_line(&mut buffer)? == 0 {
            break; // EOF
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        let reply = match handle_command(engine, clock, user_id, cmd) {
            Ok(v) => v,
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        };
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(
    engine: &CardEngine,
    clock: &FixedClock,
    user_id: UserId,
    cmd: IpcCommand,
) -> Result<serde_json::Value> {
    let value = match cmd {
        IpcCommand::Recommend { category } => {
            serde_json::to_value(engine.best_card_for_category(&category, user_id)?)?
        }
        IpcCommand::Record { category, amount, merchant, card_id } => {
            let outcome = engine.create_transaction(NewTransaction {
                user_id,
                card_used_id: card_id,
                merchant,
                amount,
                category,
                ..NewTransaction::default()
            })?;
            serde_json::to_value(outcome)?
        }
        IpcCommand::SetBudget { amount, thresholds } => {
            serde_json::to_value(engine.upsert_budget(user_id, None, amount, thresholds)?)?
        }
        IpcCommand::Status => serde_json::to_value(engine.current_budget_status(user_id)?)?,
        IpcCommand::Alerts => serde_json::to_value(engine.alerts(user_id)?)?,
        IpcCommand::Ack { alert_id } => serde_json::to_value(engine.acknowledge_alert(user_id, alert_id)?)?,
        IpcCommand::Advance { hours } => {
            let now: DateTime<Utc> = clock.advance(Duration::hours(hours));
            serde_json::json!({ "now": now })
        }
        IpcCommand::Quit => serde_json::Value::Null,
    };
    Ok(value)
}

fn print_summary(engine: &CardEngine, user: &UserProfile) -> Result<()> {
    let status = engine.current_budget_status(user.user_id)?;
    let rewards = engine.rewards_by_card(user.user_id, None, None, RewardBasis::CardUsed)?;
    let total = engine.total_rewards(user.user_id, None, None, RewardBasis::CardUsed)?;

    println!();
    println!("=== MONTH SUMMARY ({}) ===", status.year_month);
    println!("  user:           {} ({})", user.username, user.timezone.as_deref().unwrap_or("UTC"));
    println!("  spend:          {}", status.mtd);
    match (status.budget, status.next_threshold) {
        (None, _) => println!("  budget:         (none)"),
        (Some(b), next) => {
            println!("  budget:         {b} ({}% used)", status.percent_used * Decimal::ONE_HUNDRED);
            match next {
                Some(t) => println!("  next alert at:  {}%", t * Decimal::ONE_HUNDRED),
                None => println!("  next alert at:  (all thresholds fired)"),
            }
        }
    }
    println!("  pending alerts: {}", engine.pending_alert_count(user.user_id)?);

    println!();
    println!("=== REWARDS ===");
    for (card_id, amount) in &rewards {
        let name = engine
            .store()
            .card(*card_id)?
            .map(|c| c.display_name())
            .unwrap_or_else(|| format!("card {card_id}"));
        println!("  {name:<28} {amount}");
    }
    println!("  {:<28} {total}", "total");
    println!();
    println!("  clock: {}", engine.now());
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn str_arg<'a>(args: &'a [String], flag: &str, default: &'a str) -> &'a str {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
        .unwrap_or(default)
}
