//! Clock provider for frame timestamps.
//!
//! Control frames are stamped with wall-clock seconds. Tests use a
//! [`MockClock`] so stamps are deterministic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of wall-clock time.
pub trait ClockProvider: Send + Sync {
    /// Seconds since the UNIX epoch.
    fn now_secs(&self) -> f64;

    /// Check if this is a mock clock.
    fn is_mock(&self) -> bool {
        false
    }
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ClockProvider for SystemClock {
    fn now_secs(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct MockClock {
    /// Current time in nanoseconds since the epoch.
    nanos: AtomicU64,
}

impl MockClock {
    /// Create a mock clock at the epoch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock clock at `secs` seconds.
    pub fn at_secs(secs: f64) -> Self {
        Self {
            nanos: AtomicU64::new((secs * 1e9) as u64),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        self.nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Set the clock to `secs` seconds.
    pub fn set_secs(&self, secs: f64) {
        self.nanos.store((secs * 1e9) as u64, Ordering::SeqCst);
    }
}

impl ClockProvider for MockClock {
    fn now_secs(&self) -> f64 {
        self.nanos.load(Ordering::SeqCst) as f64 / 1e9
    }

    fn is_mock(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_clock_advances() {
        let clock = MockClock::at_secs(10.0);
        assert_eq!(clock.now_secs(), 10.0);
        clock.advance(Duration::from_millis(500));
        assert!((clock.now_secs() - 10.5).abs() < 1e-9);
        clock.set_secs(3.0);
        assert_eq!(clock.now_secs(), 3.0);
        assert!(clock.is_mock());
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_secs() > 1_577_836_800.0);
        assert!(!SystemClock.is_mock());
    }
}
