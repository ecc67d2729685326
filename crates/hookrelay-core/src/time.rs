//! Clock abstraction for deterministic scheduling and timestamps.
//!
//! Backoff deadlines, envelope timestamps and sweep cutoffs all read the
//! injected clock, so tests can pin and advance time instead of waiting.

use std::{
    fmt::Debug,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, TimeZone, Utc};

/// Source of wall-clock time and delays.
///
/// Production code uses `RealClock`; tests inject `TestClock`.
pub trait Clock: Send + Sync + Debug {
    /// Returns the current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Sleeps for the specified duration.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Returns the current time as milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// Clock backed by the system time and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock instance.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Manually driven clock.
///
/// Clones share the same time. `sleep` advances the clock by the requested
/// duration and yields instead of waiting, so timers scheduled against a
/// `TestClock` fire immediately in virtual time.
#[derive(Debug, Clone)]
pub struct TestClock {
    micros: Arc<AtomicI64>,
}

impl TestClock {
    /// Creates a test clock starting at the current system time.
    pub fn new() -> Self {
        Self::with_start_time(Utc::now())
    }

    /// Creates a test clock starting at a specific time.
    pub fn with_start_time(start: DateTime<Utc>) -> Self {
        Self { micros: Arc::new(AtomicI64::new(start.timestamp_micros())) }
    }

    /// Advances the clock by the specified duration.
    pub fn advance(&self, duration: Duration) {
        let delta = i64::try_from(duration.as_micros()).unwrap_or(i64::MAX);
        self.micros.fetch_add(delta, Ordering::AcqRel);
    }

    /// Sets the clock to a specific time, forwards or backwards.
    pub fn set(&self, time: DateTime<Utc>) {
        self.micros.store(time.timestamp_micros(), Ordering::Release);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        let micros = self.micros.load(Ordering::Acquire);
        Utc.timestamp_micros(micros).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = TestClock::with_start_time(start);

        clock.advance(Duration::from_secs(60));

        assert_eq!(clock.now(), start + chrono::Duration::seconds(60));
        assert_eq!(clock.now_millis(), start.timestamp_millis() + 60_000);
    }

    #[test]
    fn clones_share_time() {
        let clock = TestClock::new();
        let other = clock.clone();

        other.advance(Duration::from_millis(1500));

        assert_eq!(clock.now(), other.now());
    }

    #[test]
    fn set_moves_backwards() {
        let clock = TestClock::new();
        let earlier = Utc.with_ymd_and_hms(2020, 6, 1, 12, 0, 0).unwrap();

        clock.set(earlier);

        assert_eq!(clock.now(), earlier);
    }

    #[tokio::test]
    async fn sleep_advances_virtual_time() {
        let clock = TestClock::new();
        let start = clock.now();

        clock.sleep(Duration::from_secs(5)).await;

        assert_eq!(clock.now() - start, chrono::Duration::seconds(5));
    }
}
