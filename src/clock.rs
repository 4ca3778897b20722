// src/clock.rs
//! Injectable time for the limiter and pool.
//!
//! Quota windows are pure arithmetic over "seconds since some origin", so the
//! whole admission path can run against a hand-advanced clock in tests.

use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Time provider used by the limiter and pool.
///
/// `now()` is a monotonic offset from an arbitrary origin (window math).
/// `unix_now()` is wall-clock unix seconds (persisted state, cache TTLs).
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Duration;
    fn unix_now(&self) -> u64;
}

/// Production clock: monotonic `Instant` plus the system wall clock.
#[derive(Debug)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn unix_now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// Hand-advanced clock for tests and simulations. Public on purpose so
/// integration tests in `tests/` can drive window resets without sleeping.
#[derive(Debug)]
pub struct ManualTimeSource {
    offset: Mutex<Duration>,
    unix_base: u64,
}

impl ManualTimeSource {
    pub fn new() -> Self {
        Self::starting_at(1_700_000_000)
    }

    /// Start the wall clock at a fixed unix second so TTL tests are stable.
    pub fn starting_at(unix_base: u64) -> Self {
        Self {
            offset: Mutex::new(Duration::ZERO),
            unix_base,
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut o = self.offset.lock().expect("manual clock mutex poisoned");
        *o += by;
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }
}

impl Default for ManualTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Duration {
        *self.offset.lock().expect("manual clock mutex poisoned")
    }

    fn unix_now(&self) -> u64 {
        self.unix_base + self.now().as_secs()
    }
}
