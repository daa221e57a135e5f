//! Time source used for event timestamps and retry backoff.
//!
//! Delivery code never calls `tokio::time::sleep` or `Utc::now` directly so
//! that retry schedules can be asserted without waiting in real time.

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};

/// Clock abstraction for timestamps and sleeps.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Sleeps for the given duration.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// System clock backed by tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock.
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

/// Virtual clock for tests.
///
/// Sleeping advances the clock instantly and records the requested duration,
/// so a test can assert the exact backoff schedule a delivery used.
#[derive(Debug, Clone)]
pub struct TestClock {
    inner: Arc<Mutex<TestClockState>>,
}

#[derive(Debug)]
struct TestClockState {
    now: DateTime<Utc>,
    sleeps: Vec<Duration>,
}

impl TestClock {
    /// Creates a test clock frozen at the current time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Creates a test clock frozen at `start`.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self { inner: Arc::new(Mutex::new(TestClockState { now: start, sleeps: Vec::new() })) }
    }

    /// Moves the clock forward.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.lock();
        state.now += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
    }

    /// Returns every duration passed to [`Clock::sleep`], in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    /// Returns the sum of all recorded sleeps.
    pub fn total_slept(&self) -> Duration {
        self.lock().sleeps.iter().sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TestClockState> {
        // A poisoned lock only means another test thread panicked mid-update.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        {
            let mut state = self.lock();
            state.sleeps.push(duration);
        }
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[tokio::test]
    async fn test_clock_records_sleeps_and_advances() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let clock = TestClock::starting_at(start);

        clock.sleep(Duration::from_millis(100)).await;
        clock.sleep(Duration::from_millis(250)).await;

        assert_eq!(clock.sleeps(), vec![Duration::from_millis(100), Duration::from_millis(250)]);
        assert_eq!(clock.total_slept(), Duration::from_millis(350));
        assert_eq!(clock.now(), start + chrono::Duration::milliseconds(350));
    }

    #[test]
    fn clones_share_state() {
        let clock = TestClock::new();
        let other = clock.clone();
        let before = clock.now();

        other.advance(Duration::from_secs(5));

        assert_eq!(clock.now() - before, chrono::Duration::seconds(5));
    }
}
