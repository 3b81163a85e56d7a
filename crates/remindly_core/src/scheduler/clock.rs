//! Wall-clock source for the scheduler.
//!
//! The loop's *waiting* runs on tokio time; the instant a due-scan compares
//! against comes from a `Clock` so passes can be driven deterministically.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use std::sync::Mutex;

pub trait Clock: Send + Sync {
    /// Current instant in the operating offset.
    fn now(&self) -> DateTime<FixedOffset>;
}

/// Reads the system clock and projects it onto a fixed operating offset.
pub struct SystemClock {
    zone: FixedOffset,
}

impl SystemClock {
    pub fn new(zone: FixedOffset) -> Self {
        Self { zone }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.zone)
    }
}

/// Manually driven clock for tests and replays.
pub struct ManualClock {
    now: Mutex<DateTime<FixedOffset>>,
}

impl ManualClock {
    pub fn new(start: DateTime<FixedOffset>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, instant: DateTime<FixedOffset>) {
        let mut guard = self.now.lock().unwrap_or_else(|poison| poison.into_inner());
        *guard = instant;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|poison| poison.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<FixedOffset> {
        *self.now.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}
