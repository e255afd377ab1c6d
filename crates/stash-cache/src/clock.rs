//! Time sources used for freshness decisions

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

/// Wall-clock time source.
///
/// The cache reads it once per operation so that a single `resolve` or
/// `clear_stale` classifies every entry against the same instant.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> SystemTime;
}

/// Real system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> SystemTime {
        (**self).now()
    }
}

/// Manually driven clock for tests and simulations.
///
/// Clones share the same elapsed time, so a clone handed to a cache can be
/// advanced from the test body.
///
/// ```
/// use std::time::Duration;
///
/// use stash_cache::{Clock, ManualClock};
///
/// let clock = ManualClock::new();
/// let start = clock.now();
/// clock.advance(Duration::from_millis(1500));
/// assert_eq!(clock.now().duration_since(start).unwrap(), Duration::from_millis(1500));
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: SystemTime,
    elapsed: Arc<Mutex<Duration>>,
}

impl ManualClock {
    /// Start at the current system time
    pub fn new() -> Self {
        Self::starting_at(SystemTime::now())
    }

    /// Start at a fixed instant
    pub fn starting_at(base: SystemTime) -> Self {
        Self {
            base,
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    /// Set the total elapsed time since the starting instant
    pub fn set_elapsed(&self, elapsed: Duration) {
        *self.elapsed.lock() = elapsed;
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        self.base + self.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(42);
        let clock = ManualClock::starting_at(base);
        assert_eq!(clock.now(), base);

        clock.advance(Duration::from_secs(3));
        assert_eq!(clock.now(), base + Duration::from_secs(3));
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let shared = clock.clone();

        clock.set_elapsed(Duration::from_millis(1200));
        assert_eq!(shared.elapsed(), Duration::from_millis(1200));
        assert_eq!(shared.now(), clock.now());
    }
}
