//! Application wiring and lifecycle.
//!
//! [`TicketingApp`] assembles every service over one [`TicketingEnvironment`]
//! and owns the two background workers:
//!
//! 1. **Startup**: spawn the order queue consumer and the expiration reaper
//! 2. **Runtime**: callers use the services directly
//! 3. **Shutdown**: broadcast the signal, then give each worker 10s to stop

use crate::complimentary::ComplimentaryService;
use crate::config::{Config, ConfigError};
use crate::environment::TicketingEnvironment;
use crate::handlers::OrderProcessingHandler;
use crate::inventory::InventoryService;
use crate::orders::OrderService;
use crate::reaper::ExpirationReaper;
use crate::reservation::ReservationService;
use boxoffice_core::environment::Clock;
use boxoffice_runtime::{ConsumerBuildError, PeriodicTask, QueueConsumer};
use boxoffice_testing::{InMemoryEventStore, InMemoryOrderQueue, InMemoryOrderStore, InMemoryTicketStore};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// How long each worker gets to stop after the shutdown signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Application errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration rejected
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Queue consumer could not be assembled
    #[error("Consumer error: {0}")]
    Consumer(#[from] ConsumerBuildError),

    /// Workers already running
    #[error("Application already started")]
    AlreadyStarted,
}

/// Ticketing engine with its background workers.
pub struct TicketingApp {
    config: Config,
    env: TicketingEnvironment,
    /// Event creation, reads and counter updates
    pub inventory: InventoryService,
    /// Ticket reservation
    pub reservations: ReservationService,
    /// Order lifecycle
    pub orders: OrderService,
    /// Complimentary grants
    pub complimentary: ComplimentaryService,
    /// Expiration reaper
    pub reaper: ExpirationReaper,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl TicketingApp {
    /// Wire every service over `env`.
    ///
    /// # Errors
    ///
    /// [`AppError::Config`] if `config` does not validate.
    pub fn new(config: Config, env: TicketingEnvironment) -> Result<Self, AppError> {
        config.validate()?;

        let retry = config.retry_policy();
        let inventory = InventoryService::new(env.clone(), retry.clone());
        let reservations = ReservationService::new(env.clone(), inventory.clone(), &config);
        let orders = OrderService::new(env.clone(), inventory.clone(), reservations.clone(), &config);
        let complimentary = ComplimentaryService::new(env.clone(), inventory.clone(), retry.clone());
        let reaper = ExpirationReaper::new(env.clone(), inventory.clone(), retry, &config.reaper);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            env,
            inventory,
            reservations,
            orders,
            complimentary,
            reaper,
            shutdown_tx,
            handles: Vec::new(),
        })
    }

    /// Wire the engine over fresh in-memory stores and queue.
    ///
    /// # Errors
    ///
    /// [`AppError::Config`] if `config` does not validate.
    pub fn in_memory(config: Config, clock: Arc<dyn Clock>) -> Result<Self, AppError> {
        let queue = InMemoryOrderQueue::new(Arc::clone(&clock))
            .with_visibility_timeout(config.queue.visibility_timeout)
            .with_dedup_window(config.queue.dedup_window);
        let env = TicketingEnvironment::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryTicketStore::new()),
            Arc::new(InMemoryOrderStore::new()),
            Arc::new(queue),
            clock,
        );
        Self::new(config, env)
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Environment the services run against.
    #[must_use]
    pub const fn environment(&self) -> &TicketingEnvironment {
        &self.env
    }

    /// Build an order queue consumer that stops with this application.
    ///
    /// # Errors
    ///
    /// [`AppError::Consumer`] if the queue settings are out of range.
    pub fn consumer(&self) -> Result<QueueConsumer, AppError> {
        Ok(QueueConsumer::builder()
            .name("order-processing")
            .queue(Arc::clone(&self.env.queue))
            .handler(Arc::new(OrderProcessingHandler::new(self.orders.clone())))
            .shutdown(self.shutdown_tx.subscribe())
            .batch_size(self.config.queue.batch_size)
            .wait_time(self.config.queue.wait_time)
            .retry_delay(self.config.queue.poll_retry_delay)
            .build()?)
    }

    /// Spawn the queue consumer and the expiration reaper.
    ///
    /// # Errors
    ///
    /// - [`AppError::AlreadyStarted`] on a second call
    /// - [`AppError::Consumer`] if the consumer cannot be built
    pub fn start(&mut self) -> Result<(), AppError> {
        if !self.handles.is_empty() {
            return Err(AppError::AlreadyStarted);
        }

        let consumer = self.consumer()?;
        let reaper = PeriodicTask::new(
            Arc::new(self.reaper.clone()),
            self.config.reaper.interval,
            self.shutdown_tx.subscribe(),
        );

        self.handles.push(("order-processing", consumer.spawn()));
        self.handles.push(("expiration-reaper", reaper.spawn()));

        info!(
            workers = self.handles.len(),
            reaper_interval = ?self.config.reaper.interval,
            "Ticketing workers started"
        );
        Ok(())
    }

    /// Signal every worker to stop and wait for them.
    pub async fn shutdown(self) {
        info!("Shutting down ticketing workers");
        // No receivers just means nothing was started.
        let _ = self.shutdown_tx.send(());

        for (worker, handle) in self.handles {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => info!(worker, "Worker stopped gracefully"),
                Ok(Err(e)) => warn!(worker, error = %e, "Worker task failed"),
                Err(_) => warn!(worker, "Worker shutdown timed out"),
            }
        }

        info!("Graceful shutdown complete");
    }
}
