//! Wall-clock abstraction.
//!
//! All instants in this crate are epoch milliseconds (`i64`). The shard
//! context never reads the system clock directly; it goes through a
//! [`TimeSource`] so that tests can drive time by hand.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Monotonic-enough wall clock, in epoch milliseconds.
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Current time in epoch milliseconds from the system clock.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// [`TimeSource`] backed by the real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> i64 {
        now_epoch_ms()
    }
}

/// Hand-driven [`TimeSource`] for tests.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    now_ms: AtomicI64,
}

impl ManualTimeSource {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_time_source_advances() {
        let ts = ManualTimeSource::new(1_000);
        assert_eq!(ts.now_ms(), 1_000);
        ts.advance(250);
        assert_eq!(ts.now_ms(), 1_250);
        ts.set(99);
        assert_eq!(ts.now_ms(), 99);
    }

    #[test]
    fn system_time_source_is_past_epoch() {
        assert!(SystemTimeSource.now_ms() > 0);
    }
}
