//! Deterministic clocks.

use boxoffice_core::environment::Clock;
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

/// Fixed clock for deterministic tests
///
/// Always returns the same time, making tests reproducible.
///
/// # Example
///
/// ```
/// use boxoffice_testing::FixedClock;
/// use boxoffice_core::environment::Clock;
/// use chrono::Utc;
///
/// let clock = FixedClock::new(Utc::now());
/// assert_eq!(clock.now(), clock.now());
/// ```
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a new fixed clock with the given time
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same time, so a test can keep one handle and give
/// another to the environment.
///
/// ```
/// use boxoffice_testing::ManualClock;
/// use boxoffice_core::environment::Clock;
/// use chrono::Duration;
///
/// let clock = ManualClock::starting_at(boxoffice_testing::epoch());
/// let handle = clock.clone();
/// handle.advance(Duration::minutes(11));
/// assert_eq!(clock.now(), boxoffice_testing::epoch() + Duration::minutes(11));
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    time: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Start at `time`.
    #[must_use]
    pub fn starting_at(time: DateTime<Utc>) -> Self {
        Self {
            time: Arc::new(Mutex::new(time)),
        }
    }

    /// Move time forward (or backward for a negative `by`).
    #[allow(clippy::unwrap_used)]
    pub fn advance(&self, by: Duration) {
        let mut time = self.time.lock().unwrap();
        *time += by;
    }

    /// Jump to `time`.
    #[allow(clippy::unwrap_used)]
    pub fn set(&self, time: DateTime<Utc>) {
        *self.time.lock().unwrap() = time;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_at(epoch())
    }
}

impl Clock for ManualClock {
    #[allow(clippy::unwrap_used)]
    fn now(&self) -> DateTime<Utc> {
        *self.time.lock().unwrap()
    }
}

/// 2025-01-01 00:00:00 UTC, the start of time in tests.
#[must_use]
pub fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default()
}

/// A [`FixedClock`] at [`epoch`].
#[must_use]
pub fn test_clock() -> FixedClock {
    FixedClock::new(epoch())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::default();
        let other = clock.clone();
        other.advance(Duration::seconds(30));
        assert_eq!(clock.now(), epoch() + Duration::seconds(30));

        clock.set(epoch());
        assert_eq!(other.now(), epoch());
    }
}
