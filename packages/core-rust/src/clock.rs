//! Exchange clocks.
//!
//! Every exchange carries an [`ExchangeClock`] that records when the current
//! routing cycle began. Pooled exchanges reset their clock on reuse, so elapsed
//! time always refers to the current cycle rather than the instance lifetime.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Abstraction over the time source for dependency injection.
///
/// Allows deterministic testing by replacing the real clock with a [`ManualClock`].
pub trait ClockSource: Send + Sync {
    /// Returns the current time as milliseconds since Unix epoch.
    fn now(&self) -> u64;
}

/// Default clock source that reads the real system time.
///
/// Wall-clock readings are anchored to a monotonic [`Instant`] taken at
/// construction, so the clock never moves backwards.
#[derive(Debug, Clone)]
pub struct SystemClock {
    epoch_millis: u64,
    anchor: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        let epoch_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        Self {
            epoch_millis,
            anchor: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for SystemClock {
    fn now(&self) -> u64 {
        let elapsed = u64::try_from(self.anchor.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.epoch_millis.saturating_add(elapsed)
    }
}

/// Manually advanced clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(start_millis),
        }
    }

    /// Moves the clock forward by `millis`.
    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::Relaxed);
    }
}

impl ClockSource for ManualClock {
    fn now(&self) -> u64 {
        self.millis.load(Ordering::Relaxed)
    }
}

/// Per-exchange clock: the start of the current routing cycle.
#[derive(Clone)]
pub struct ExchangeClock {
    created_millis: u64,
    source: Arc<dyn ClockSource>,
}

impl ExchangeClock {
    /// Starts a clock at the source's current time.
    #[must_use]
    pub fn start(source: Arc<dyn ClockSource>) -> Self {
        Self {
            created_millis: source.now(),
            source,
        }
    }

    /// Milliseconds since Unix epoch at which the current cycle started.
    #[must_use]
    pub fn created(&self) -> u64 {
        self.created_millis
    }

    /// Milliseconds elapsed since the current cycle started.
    #[must_use]
    pub fn elapsed(&self) -> u64 {
        self.source.now().saturating_sub(self.created_millis)
    }

    /// Restarts the clock at the source's current time.
    pub fn reset(&mut self) {
        self.created_millis = self.source.now();
    }

    /// The time source driving this clock.
    #[must_use]
    pub fn source(&self) -> &Arc<dyn ClockSource> {
        &self.source
    }
}

impl fmt::Debug for ExchangeClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeClock")
            .field("created_millis", &self.created_millis)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_returns_nonzero() {
        let clock = SystemClock::new();
        assert!(clock.now() > 0);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn exchange_clock_measures_elapsed() {
        let source = Arc::new(ManualClock::new(1_000));
        let clock = ExchangeClock::start(source.clone());
        source.advance(250);

        assert_eq!(clock.created(), 1_000);
        assert_eq!(clock.elapsed(), 250);
    }

    #[test]
    fn exchange_clock_reset_restarts_cycle() {
        let source = Arc::new(ManualClock::new(1_000));
        let mut clock = ExchangeClock::start(source.clone());
        source.advance(500);

        clock.reset();

        assert_eq!(clock.created(), 1_500);
        assert_eq!(clock.elapsed(), 0);
    }
}
