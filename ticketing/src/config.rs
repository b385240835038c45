//! Configuration management for the ticketing engine.
//!
//! Loads configuration from environment variables with sensible defaults.

use boxoffice_core::order::DEFAULT_MAX_TICKETS_PER_ORDER;
use boxoffice_core::queue::MAX_DELIVERY_DELAY;
use boxoffice_runtime::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Longest long-poll a queue receive may ask for.
pub const MAX_QUEUE_WAIT: Duration = Duration::from_secs(20);

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Reservation holds and order size
    pub reservation: ReservationConfig,
    /// Optimistic-concurrency retry
    pub retry: RetryConfig,
    /// Asynchronous order processing
    pub processing: ProcessingConfig,
    /// Expiration reaper
    pub reaper: ReaperConfig,
    /// Order queue consumer
    pub queue: QueueConfig,
}

/// Reservation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationConfig {
    /// How long a hold lasts before the reaper may reclaim it
    pub hold_ttl: Duration,
    /// Cap on tickets per order
    pub max_tickets_per_order: u32,
}

/// Retry configuration for conditional writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    /// Backoff before the first retry
    pub initial_delay: Duration,
    /// Backoff cap
    pub max_delay: Duration,
}

/// Order processing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Processing attempts before an order is failed
    pub max_retries: u32,
}

/// Reaper configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Time between sweeps
    pub interval: Duration,
    /// Also reclaim `RESERVED` holds, not only `PENDING_CONFIRMATION` ones
    pub sweep_reserved: bool,
}

/// Queue consumer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Messages per receive
    pub batch_size: usize,
    /// Long-poll wait per receive
    pub wait_time: Duration,
    /// How long a received message stays invisible
    pub visibility_timeout: Duration,
    /// Window in which duplicate publishes are dropped
    pub dedup_window: Duration,
    /// Pause after a failed receive
    pub poll_retry_delay: Duration,
}

/// Invalid configuration value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A value that must be positive is zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// A value is above its allowed maximum.
    #[error("{name} is {value:?}, above the maximum of {max:?}")]
    TooLarge {
        /// Setting name
        name: &'static str,
        /// Configured value
        value: Duration,
        /// Allowed maximum
        max: Duration,
    },
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |key: &str, default: u64| parse_or(&lookup, key, default);

        Self {
            reservation: ReservationConfig {
                hold_ttl: Duration::from_secs(number("RESERVATION_HOLD_SECONDS", 600)),
                max_tickets_per_order: parse_or(
                    &lookup,
                    "MAX_TICKETS_PER_ORDER",
                    DEFAULT_MAX_TICKETS_PER_ORDER,
                ),
            },
            retry: RetryConfig {
                max_attempts: parse_or(&lookup, "OCC_MAX_ATTEMPTS", 3),
                initial_delay: Duration::from_millis(number("OCC_RETRY_DELAY_MS", 25)),
                max_delay: Duration::from_millis(number("OCC_RETRY_MAX_DELAY_MS", 500)),
            },
            processing: ProcessingConfig {
                max_retries: parse_or(&lookup, "ORDER_MAX_RETRIES", 3),
            },
            reaper: ReaperConfig {
                interval: Duration::from_secs(number("REAPER_INTERVAL_SECONDS", 60)),
                sweep_reserved: parse_or(&lookup, "REAPER_SWEEP_RESERVED", true),
            },
            queue: QueueConfig {
                batch_size: parse_or(&lookup, "QUEUE_BATCH_SIZE", 10),
                wait_time: Duration::from_secs(number("QUEUE_WAIT_SECONDS", 20)),
                visibility_timeout: Duration::from_secs(number(
                    "QUEUE_VISIBILITY_TIMEOUT_SECONDS",
                    30,
                )),
                dedup_window: Duration::from_secs(number("QUEUE_DEDUP_WINDOW_SECONDS", 300)),
                poll_retry_delay: Duration::from_secs(number("QUEUE_RETRY_DELAY_SECONDS", 5)),
            },
        }
    }

    /// Check that every value is usable.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] for the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reservation.hold_ttl.is_zero() {
            return Err(ConfigError::Zero("RESERVATION_HOLD_SECONDS"));
        }
        if self.reservation.max_tickets_per_order == 0 {
            return Err(ConfigError::Zero("MAX_TICKETS_PER_ORDER"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Zero("OCC_MAX_ATTEMPTS"));
        }
        if self.processing.max_retries == 0 {
            return Err(ConfigError::Zero("ORDER_MAX_RETRIES"));
        }
        if self.reaper.interval.is_zero() {
            return Err(ConfigError::Zero("REAPER_INTERVAL_SECONDS"));
        }
        if self.queue.batch_size == 0 {
            return Err(ConfigError::Zero("QUEUE_BATCH_SIZE"));
        }
        if self.queue.visibility_timeout.is_zero() {
            return Err(ConfigError::Zero("QUEUE_VISIBILITY_TIMEOUT_SECONDS"));
        }
        if self.queue.wait_time > MAX_QUEUE_WAIT {
            return Err(ConfigError::TooLarge {
                name: "QUEUE_WAIT_SECONDS",
                value: self.queue.wait_time,
                max: MAX_QUEUE_WAIT,
            });
        }
        if self.queue.visibility_timeout > MAX_DELIVERY_DELAY {
            return Err(ConfigError::TooLarge {
                name: "QUEUE_VISIBILITY_TIMEOUT_SECONDS",
                value: self.queue.visibility_timeout,
                max: MAX_DELIVERY_DELAY,
            });
        }
        Ok(())
    }

    /// Retry policy for optimistic-concurrency writes.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(self.retry.max_attempts)
            .initial_delay(self.retry.initial_delay)
            .max_delay(self.retry.max_delay)
            .build()
    }

    /// Hold duration as a calendar duration for timestamp arithmetic.
    #[must_use]
    pub fn hold_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.reservation.hold_ttl)
            .unwrap_or_else(|_| chrono::Duration::minutes(10))
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.reservation.hold_ttl, Duration::from_secs(600));
        assert_eq!(config.reservation.max_tickets_per_order, 10);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.processing.max_retries, 3);
        assert_eq!(config.reaper.interval, Duration::from_secs(60));
        assert!(config.reaper.sweep_reserved);
        assert_eq!(config.queue.batch_size, 10);
        assert_eq!(config.queue.wait_time, Duration::from_secs(20));
        assert_eq!(config.hold_ttl(), chrono::Duration::minutes(10));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn overrides_and_bad_values() {
        let config = from_pairs(&[
            ("MAX_TICKETS_PER_ORDER", "4"),
            ("REAPER_SWEEP_RESERVED", "false"),
            ("OCC_MAX_ATTEMPTS", "not-a-number"),
        ]);
        assert_eq!(config.reservation.max_tickets_per_order, 4);
        assert!(!config.reaper.sweep_reserved);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry_policy().max_attempts, 3);
    }

    #[test]
    fn validation_rejects_zero_and_unbounded_values() {
        assert_eq!(
            from_pairs(&[("ORDER_MAX_RETRIES", "0")]).validate(),
            Err(ConfigError::Zero("ORDER_MAX_RETRIES"))
        );
        assert!(matches!(
            from_pairs(&[("QUEUE_WAIT_SECONDS", "21")]).validate(),
            Err(ConfigError::TooLarge { name: "QUEUE_WAIT_SECONDS", .. })
        ));
    }
}
