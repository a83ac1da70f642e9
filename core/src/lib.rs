//! cardwise-core: card recommendation, reward and monthly budget engine.
//!
//! `engine::CardEngine` is the entry point. Everything else is exposed for
//! tests and tooling that need a single component in isolation.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod model;
pub mod month_window;
pub mod ranking;
pub mod recompute;
pub mod reward;
pub mod spend;
pub mod store;
pub mod threshold;
pub mod types;
