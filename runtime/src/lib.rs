//! # Boxoffice Runtime
//!
//! The imperative shell around `boxoffice-core`: everything that sleeps,
//! loops or spawns.
//!
//! - [`retry`]: bounded exponential backoff used by every optimistic-concurrency write
//! - [`consumer`]: the order queue consumer loop (receive, handle, acknowledge)
//! - [`scheduler`]: fixed-interval background jobs such as the expiration reaper
//!
//! Background loops stop when a `tokio::sync::broadcast` shutdown signal fires,
//! so one sender can stop every worker of an application.

pub mod consumer;
pub mod retry;
pub mod scheduler;

pub use consumer::{ConsumerBuildError, MessageHandler, PollOutcome, QueueConsumer, QueueConsumerBuilder};
pub use retry::{RetryPolicy, RetryPolicyBuilder, retry_with_predicate};
pub use scheduler::{PeriodicJob, PeriodicTask};

/// Boxed error returned by handlers and jobs.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
