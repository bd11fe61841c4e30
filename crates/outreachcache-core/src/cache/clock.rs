use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

const MICROS_PER_SEC: f64 = 1_000_000.0;

/// Source of "now" for cache ages and activity windows.
///
/// Times are seconds since the Unix epoch, fractional allowed, which is also
/// the unit persisted in cache entries.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;

    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros((self.now() * MICROS_PER_SEC) as i64)
            .unwrap_or_else(Utc::now)
    }
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        Utc::now().timestamp_micros() as f64 / MICROS_PER_SEC
    }
}

/// Clock that only moves when told to. Used to simulate entry ages.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicI64,
}

impl ManualClock {
    pub fn new(start_secs: f64) -> Self {
        Self {
            micros: AtomicI64::new((start_secs * MICROS_PER_SEC) as i64),
        }
    }

    /// Start at the given instant.
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self {
            micros: AtomicI64::new(instant.timestamp_micros()),
        }
    }

    pub fn advance(&self, secs: f64) {
        self.micros
            .fetch_add((secs * MICROS_PER_SEC) as i64, Ordering::SeqCst);
    }

    pub fn set(&self, secs: f64) {
        self.micros
            .store((secs * MICROS_PER_SEC) as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / MICROS_PER_SEC
    }
}
