//! Bounded retry with exponential backoff and jitter.
//!
//! Every optimistic-concurrency write in the engine is wrapped in one of these
//! helpers. A conflict means someone else won the race, so the operation is
//! recomputed from a freshly read snapshot after a short randomized pause.
//!
//! # Example
//!
//! ```rust
//! use boxoffice_runtime::retry::{RetryPolicy, retry_with_predicate};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(3)
//!     .initial_delay(Duration::from_millis(25))
//!     .max_delay(Duration::from_millis(500))
//!     .build();
//!
//! let value = retry_with_predicate(
//!     &policy,
//!     || async { Ok::<_, String>(42) },
//!     |err: &String| err.contains("conflict"),
//! )
//! .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_attempts`: 3 (the first call plus two retries)
/// - `initial_delay`: 25ms
/// - `max_delay`: 500ms
/// - `multiplier`: 2.0
/// - `jitter`: on
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of calls, the first one included
    pub max_attempts: u32,
    /// Delay before the second call
    pub initial_delay: Duration,
    /// Cap for exponential backoff
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Scale each delay by a random factor in `[0.5, 1.0]`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_attempts: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
            jitter: None,
        }
    }

    /// Backoff before retry number `retry` (0-based), before jitter.
    ///
    /// `initial_delay * multiplier^retry`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled.max(0.0))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.5..=1.0);
        delay.mul_f64(factor)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_attempts: Option<u32>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
    jitter: Option<bool>,
}

impl RetryPolicyBuilder {
    /// Set the total number of calls (values below 1 are treated as 1).
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(3).max(1),
            initial_delay: self.initial_delay.unwrap_or(Duration::from_millis(25)),
            max_delay: self.max_delay.unwrap_or(Duration::from_millis(500)),
            multiplier: self.multiplier.unwrap_or(2.0),
            jitter: self.jitter.unwrap_or(true),
        }
    }
}

/// Retry an async operation while `is_retryable` accepts the error.
///
/// A rejected error is returned immediately without sleeping.
///
/// # Errors
///
/// The first non-retryable error, or the last error once attempts run out.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt: u32 = 1;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    return Err(err);
                }

                if attempt >= policy.max_attempts {
                    tracing::warn!(
                        attempt,
                        error = %err,
                        "Operation failed after max attempts"
                    );
                    return Err(err);
                }

                let delay = policy.jittered(policy.delay_for_retry(attempt - 1));
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Operation failed, retrying"
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(max_attempts)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(2))
            .build()
    }

    #[test]
    fn test_delay_grows_exponentially_up_to_cap() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .multiplier(2.0)
            .max_delay(Duration::from_millis(500))
            .build();

        assert_eq!(policy.delay_for_retry(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_retry(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for_retry(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_half_to_full_delay() {
        let policy = RetryPolicy::default();
        let base = Duration::from_millis(200);
        for _ in 0..100 {
            let d = policy.jittered(base);
            assert!(d >= Duration::from_millis(100) && d <= base, "{d:?}");
        }
    }

    #[test]
    fn test_zero_attempts_still_calls_once() {
        assert_eq!(RetryPolicy::builder().max_attempts(0).build().max_attempts, 1);
    }

    #[test]
    fn test_succeeds_on_first_try() {
        let calls = AtomicU32::new(0);
        let result = tokio_test::block_on(retry_with_predicate(
            &fast(3),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, String>(42) }
            },
            |_| true,
        ));

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeds_on_last_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);

        let result = retry_with_predicate(
            &fast(3),
            || {
                let c = Arc::clone(&c);
                async move {
                    let attempt = c.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 { Err(format!("attempt {attempt}")) } else { Ok(7) }
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_total_calls() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);

        let result = retry_with_predicate(
            &fast(3),
            || {
                let c = Arc::clone(&c);
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(format!("failure {n}"))
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result, Err("failure 2".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_predicate_stops_on_non_retryable() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);

        let result = retry_with_predicate(
            &fast(5),
            || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>("permanent error")
                }
            },
            |err: &&str| err.contains("conflict"),
        )
        .await;

        assert_eq!(result, Err("permanent error"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
