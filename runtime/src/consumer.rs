//! Long-polling order queue consumer.
//!
//! `QueueConsumer` owns the receive-handle-acknowledge loop so the
//! application only has to implement [`MessageHandler`]:
//!
//! ```text
//! loop {
//!     receive(batch_size, wait_time)      // bounded long poll
//!     for each delivery:
//!         handler.handle(message)
//!         ok  → acknowledge
//!         err → leave it; redelivered after the visibility timeout
//!     on receive error: log, sleep retry_delay
//!     on shutdown signal: exit
//! }
//! ```
//!
//! Deliveries of one batch are handled sequentially, which keeps the queue's
//! per-order ordering intact.

use crate::BoxError;
use async_trait::async_trait;
use boxoffice_core::queue::{Delivery, OrderMessage, OrderQueue, QueueError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Processes one order message.
///
/// Returning `Ok` acknowledges the delivery. Returning `Err` leaves it on the
/// queue, so implementations must be idempotent.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle a single message.
    ///
    /// # Errors
    ///
    /// Any error; the message will be redelivered.
    async fn handle(&self, message: &OrderMessage) -> Result<(), BoxError>;
}

/// Errors raised when assembling a [`QueueConsumer`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerBuildError {
    /// A required builder field was not set.
    #[error("Queue consumer is missing required field `{0}`")]
    MissingField(&'static str),

    /// A numeric setting is out of range.
    #[error("Invalid queue consumer setting: {0}")]
    Invalid(String),
}

/// Outcome of one receive round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Deliveries received
    pub received: usize,
    /// Deliveries handled and acknowledged
    pub acknowledged: usize,
    /// Deliveries left for redelivery
    pub failed: usize,
}

/// Queue consumer.
///
/// # Lifecycle
///
/// 1. Created via `builder()`
/// 2. Spawned via `spawn()`, or driven manually with `poll_once()`
/// 3. Runs until the shutdown signal fires
pub struct QueueConsumer {
    name: String,
    queue: Arc<dyn OrderQueue>,
    handler: Arc<dyn MessageHandler>,
    shutdown: broadcast::Receiver<()>,
    batch_size: usize,
    wait_time: Duration,
    retry_delay: Duration,
}

impl QueueConsumer {
    /// Create a builder for configuring a consumer.
    #[must_use]
    pub fn builder() -> QueueConsumerBuilder {
        QueueConsumerBuilder::default()
    }

    /// Consumer name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the consumer as a background task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the loop until shutdown.
    pub async fn run(&mut self) {
        info!(consumer = %self.name, "Queue consumer started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Queue consumer received shutdown signal");
                    break;
                }
                received = self.queue.receive(self.batch_size, self.wait_time) => {
                    match received {
                        Ok(deliveries) => {
                            self.process_batch(deliveries).await;
                        }
                        Err(e) => {
                            error!(
                                consumer = %self.name,
                                error = %e,
                                "Failed to receive from queue, retrying in {:?}",
                                self.retry_delay
                            );
                            tokio::select! {
                                _ = self.shutdown.recv() => break,
                                () = tokio::time::sleep(self.retry_delay) => {}
                            }
                        }
                    }
                }
            }
        }

        info!(consumer = %self.name, "Queue consumer stopped");
    }

    /// Receive one batch and handle it.
    ///
    /// # Errors
    ///
    /// [`QueueError`] if the receive call itself fails.
    pub async fn poll_once(&self) -> Result<PollOutcome, QueueError> {
        let deliveries = self.queue.receive(self.batch_size, self.wait_time).await?;
        Ok(self.process_batch(deliveries).await)
    }

    async fn process_batch(&self, deliveries: Vec<Delivery>) -> PollOutcome {
        let mut outcome = PollOutcome {
            received: deliveries.len(),
            ..PollOutcome::default()
        };

        for delivery in deliveries {
            let order_id = delivery.message.order_id;
            match self.handler.handle(&delivery.message).await {
                Ok(()) => match self.queue.acknowledge(delivery.receipt).await {
                    Ok(()) => {
                        debug!(consumer = %self.name, %order_id, "Message acknowledged");
                        outcome.acknowledged += 1;
                    }
                    Err(e) => {
                        // Handled but not deleted: the redelivery hits the idempotent path.
                        warn!(consumer = %self.name, %order_id, error = %e, "Failed to acknowledge message");
                        outcome.failed += 1;
                    }
                },
                Err(e) => {
                    warn!(
                        consumer = %self.name,
                        %order_id,
                        receive_count = delivery.receive_count,
                        error = %e,
                        "Message handling failed, leaving for redelivery"
                    );
                    outcome.failed += 1;
                }
            }
        }

        outcome
    }
}

/// Builder for configuring a [`QueueConsumer`].
#[derive(Default)]
pub struct QueueConsumerBuilder {
    name: Option<String>,
    queue: Option<Arc<dyn OrderQueue>>,
    handler: Option<Arc<dyn MessageHandler>>,
    shutdown: Option<broadcast::Receiver<()>>,
    batch_size: Option<usize>,
    wait_time: Option<Duration>,
    retry_delay: Option<Duration>,
}

impl QueueConsumerBuilder {
    /// Set consumer name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the queue to consume from.
    #[must_use]
    pub fn queue(mut self, queue: Arc<dyn OrderQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Set message handler.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Set shutdown signal receiver.
    #[must_use]
    pub fn shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Maximum messages per receive (default: 10).
    #[must_use]
    pub const fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Long-poll wait per receive (default: 20 seconds).
    #[must_use]
    pub const fn wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = Some(wait_time);
        self
    }

    /// Pause after a failed receive (default: 5 seconds).
    #[must_use]
    pub const fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Build the `QueueConsumer`.
    ///
    /// # Errors
    ///
    /// [`ConsumerBuildError`] if a required field is missing or the batch size is zero.
    pub fn build(self) -> Result<QueueConsumer, ConsumerBuildError> {
        let batch_size = self.batch_size.unwrap_or(10);
        if batch_size == 0 {
            return Err(ConsumerBuildError::Invalid("batch size must be at least 1".to_string()));
        }

        Ok(QueueConsumer {
            name: self.name.ok_or(ConsumerBuildError::MissingField("name"))?,
            queue: self.queue.ok_or(ConsumerBuildError::MissingField("queue"))?,
            handler: self.handler.ok_or(ConsumerBuildError::MissingField("handler"))?,
            shutdown: self.shutdown.ok_or(ConsumerBuildError::MissingField("shutdown"))?,
            batch_size,
            wait_time: self.wait_time.unwrap_or(Duration::from_secs(20)),
            retry_delay: self.retry_delay.unwrap_or(Duration::from_secs(5)),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use boxoffice_core::ids::OrderId;
    use boxoffice_core::queue::{QueueFuture, ReceiptHandle};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Hands out a fixed script of batches and records acknowledgements.
    #[derive(Default)]
    struct ScriptedQueue {
        batches: Mutex<VecDeque<Vec<Delivery>>>,
        acked: Mutex<Vec<ReceiptHandle>>,
    }

    impl OrderQueue for ScriptedQueue {
        fn publish(&self, _message: OrderMessage, _delay: Duration) -> QueueFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }

        fn receive(&self, _max: usize, _wait: Duration) -> QueueFuture<'_, Vec<Delivery>> {
            let batch = self.batches.lock().unwrap().pop_front().unwrap_or_default();
            Box::pin(async move { Ok(batch) })
        }

        fn acknowledge(&self, receipt: ReceiptHandle) -> QueueFuture<'_, ()> {
            self.acked.lock().unwrap().push(receipt);
            Box::pin(async { Ok(()) })
        }
    }

    struct FailFor(OrderId);

    #[async_trait]
    impl MessageHandler for FailFor {
        async fn handle(&self, message: &OrderMessage) -> Result<(), BoxError> {
            if message.order_id == self.0 {
                Err("boom".into())
            } else {
                Ok(())
            }
        }
    }

    fn delivery(order_id: OrderId, receipt: &str) -> Delivery {
        Delivery {
            message: OrderMessage::new(order_id),
            receipt: ReceiptHandle::new(receipt),
            receive_count: 1,
        }
    }

    #[tokio::test]
    async fn acknowledges_only_successful_deliveries() {
        let good = OrderId::new();
        let bad = OrderId::new();
        let queue = Arc::new(ScriptedQueue::default());
        queue
            .batches
            .lock()
            .unwrap()
            .push_back(vec![delivery(good, "r-good"), delivery(bad, "r-bad")]);

        let (_tx, rx) = broadcast::channel(1);
        let consumer = QueueConsumer::builder()
            .name("orders")
            .queue(Arc::clone(&queue) as Arc<dyn OrderQueue>)
            .handler(Arc::new(FailFor(bad)))
            .shutdown(rx)
            .build()
            .unwrap();

        let outcome = consumer.poll_once().await.unwrap();

        assert_eq!(
            outcome,
            PollOutcome {
                received: 2,
                acknowledged: 1,
                failed: 1
            }
        );
        assert_eq!(*queue.acked.lock().unwrap(), vec![ReceiptHandle::new("r-good")]);
    }

    #[tokio::test]
    async fn stops_on_shutdown_signal() {
        let (tx, rx) = broadcast::channel(1);
        let consumer = QueueConsumer::builder()
            .name("orders")
            .queue(Arc::new(ScriptedQueue::default()))
            .handler(Arc::new(FailFor(OrderId::new())))
            .shutdown(rx)
            .wait_time(Duration::from_millis(1))
            .build()
            .unwrap();

        let handle = consumer.spawn();
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn builder_reports_missing_fields() {
        let err = QueueConsumer::builder().name("x").build().err();
        assert_eq!(err, Some(ConsumerBuildError::MissingField("queue")));
    }
}
