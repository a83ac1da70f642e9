//! Wall clock. The single source of "now" for the engine.
//!
//! RULE: Nothing in the engine calls `Utc::now()` directly.
//! Transaction creation and alert firing read time through a Clock,
//! so tests can pin it.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually driven clock for tests and replay tooling.
#[derive(Debug)]
pub struct FixedClock {
    current: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self { current: Mutex::new(instant) }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        let mut guard = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *guard = instant;
    }

    /// Move forward by `delta`. Returns the new time.
    pub fn advance(&self, delta: Duration) -> DateTime<Utc> {
        let mut guard = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *guard += delta;
        *guard
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}
