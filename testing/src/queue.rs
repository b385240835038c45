//! In-memory order queue with FIFO-group, visibility and dedup semantics.
//!
//! Behaves like a FIFO message queue keyed by order id:
//!
//! - a message published with a delay is invisible until the delay passes
//! - a received message is invisible for the visibility timeout; if it is not
//!   acknowledged by then it is delivered again with a fresh receipt
//! - while a message of an order is in flight, later messages of the same
//!   order are held back
//! - publishing the same order again within the dedup window is a no-op
//!
//! Time comes from the injected [`Clock`], so tests drive redelivery by
//! advancing a `ManualClock`.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use boxoffice_core::environment::Clock;
use boxoffice_core::ids::OrderId;
use boxoffice_core::queue::{
    Delivery, OrderMessage, OrderQueue, QueueError, QueueFuture, ReceiptHandle, validate_delay,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
struct StoredMessage {
    seq: u64,
    group: String,
    body: Vec<u8>,
    visible_at: DateTime<Utc>,
    receive_count: u32,
    receipt: Option<String>,
}

#[derive(Default)]
struct QueueState {
    messages: Vec<StoredMessage>,
    published: Vec<OrderMessage>,
    dedup: HashMap<String, DateTime<Utc>>,
    next_seq: u64,
    publish_failures: usize,
    receive_failures: usize,
}

/// In-memory [`OrderQueue`].
#[derive(Clone)]
pub struct InMemoryOrderQueue {
    state: Arc<Mutex<QueueState>>,
    clock: Arc<dyn Clock>,
    visibility_timeout: Duration,
    dedup_window: Duration,
}

impl InMemoryOrderQueue {
    /// Create a queue with a 30 second visibility timeout and a 5 minute dedup window.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            clock,
            visibility_timeout: Duration::from_secs(30),
            dedup_window: Duration::from_secs(300),
        }
    }

    /// Override the visibility timeout.
    #[must_use]
    pub const fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Override the dedup window (zero disables dedup).
    #[must_use]
    pub const fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    /// Fail the next `n` publishes.
    pub fn inject_publish_failures(&self, n: usize) {
        self.state.lock().unwrap().publish_failures = n;
    }

    /// Fail the next `n` receives.
    pub fn inject_receive_failures(&self, n: usize) {
        self.state.lock().unwrap().receive_failures = n;
    }

    /// Every message accepted by `publish`, dedup drops excluded.
    #[must_use]
    pub fn published(&self) -> Vec<OrderMessage> {
        self.state.lock().unwrap().published.clone()
    }

    /// Messages not yet acknowledged, in flight or not.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.state.lock().unwrap().messages.len()
    }

    /// Messages received and neither acknowledged nor timed out.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        let now = self.clock.now();
        self.state
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.receipt.is_some() && m.visible_at > now)
            .count()
    }

    fn to_chrono(duration: Duration) -> chrono::Duration {
        chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(52))
    }

    fn publish_now(&self, message: OrderMessage, delay: Duration) -> Result<(), QueueError> {
        validate_delay(delay)?;
        let body = message.to_bytes()?;
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();

        if state.publish_failures > 0 {
            state.publish_failures -= 1;
            return Err(QueueError::PublishFailed {
                order_id: message.order_id,
                reason: "injected publish failure".to_string(),
            });
        }

        let dedup_key = message.group_key();
        let window = Self::to_chrono(self.dedup_window);
        if let Some(first_seen) = state.dedup.get(&dedup_key) {
            if now < *first_seen + window {
                return Ok(());
            }
        }
        state.dedup.insert(dedup_key.clone(), now);

        let seq = state.next_seq;
        state.next_seq += 1;
        state.messages.push(StoredMessage {
            seq,
            group: dedup_key,
            body,
            visible_at: now + Self::to_chrono(delay),
            receive_count: 0,
            receipt: None,
        });
        state.published.push(message);
        Ok(())
    }

    fn receive_now(&self, max_messages: usize) -> Result<Vec<Delivery>, QueueError> {
        let now = self.clock.now();
        let timeout = Self::to_chrono(self.visibility_timeout);
        let mut state = self.state.lock().unwrap();

        if state.receive_failures > 0 {
            state.receive_failures -= 1;
            return Err(QueueError::ReceiveFailed("injected receive failure".to_string()));
        }

        // A group whose oldest message is in flight blocks the rest of the group.
        let mut blocked: HashSet<String> = HashSet::new();
        let mut picked = Vec::new();
        state.messages.sort_by_key(|m| m.seq);
        for message in &mut state.messages {
            if picked.len() >= max_messages {
                break;
            }
            if blocked.contains(&message.group) {
                continue;
            }
            blocked.insert(message.group.clone());
            if message.visible_at > now {
                continue;
            }
            message.receive_count += 1;
            message.visible_at = now + timeout;
            let receipt = format!("{}-{}", message.seq, message.receive_count);
            message.receipt = Some(receipt.clone());
            picked.push((message.body.clone(), receipt, message.receive_count));
        }
        drop(state);

        picked
            .into_iter()
            .map(|(body, receipt, receive_count)| {
                Ok(Delivery {
                    message: OrderMessage::from_bytes(&body)?,
                    receipt: ReceiptHandle::new(receipt),
                    receive_count,
                })
            })
            .collect()
    }

    fn acknowledge_now(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        let position = state
            .messages
            .iter()
            .position(|m| m.receipt.as_deref() == Some(receipt.as_str()));
        match position {
            Some(index) => {
                state.messages.remove(index);
                Ok(())
            }
            None => Err(QueueError::AcknowledgeFailed(format!(
                "unknown or expired receipt {receipt}"
            ))),
        }
    }

    /// Whether a message for `order_id` is still queued.
    #[must_use]
    pub fn contains(&self, order_id: OrderId) -> bool {
        let group = order_id.to_string();
        self.state.lock().unwrap().messages.iter().any(|m| m.group == group)
    }
}

impl OrderQueue for InMemoryOrderQueue {
    fn publish(&self, message: OrderMessage, delay: Duration) -> QueueFuture<'_, ()> {
        let result = self.publish_now(message, delay);
        Box::pin(async move { result })
    }

    fn receive(&self, max_messages: usize, wait: Duration) -> QueueFuture<'_, Vec<Delivery>> {
        Box::pin(async move {
            let first = self.receive_now(max_messages)?;
            if !first.is_empty() || wait.is_zero() {
                return Ok(first);
            }
            // Nothing visible: hold the long poll briefly instead of the full wait.
            tokio::time::sleep(wait.min(Duration::from_millis(20))).await;
            self.receive_now(max_messages)
        })
    }

    fn acknowledge(&self, receipt: ReceiptHandle) -> QueueFuture<'_, ()> {
        let result = self.acknowledge_now(&receipt);
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn queue() -> (InMemoryOrderQueue, ManualClock) {
        let clock = ManualClock::default();
        (InMemoryOrderQueue::new(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn unacknowledged_messages_are_redelivered_after_timeout() {
        let (queue, clock) = queue();
        let order_id = OrderId::new();
        queue.publish(OrderMessage::new(order_id), Duration::ZERO).await.unwrap();

        let first = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].receive_count, 1);
        assert!(queue.receive(10, Duration::ZERO).await.unwrap().is_empty());

        clock.advance(chrono::Duration::seconds(31));
        let second = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(second[0].message.order_id, order_id);
        assert_eq!(second[0].receive_count, 2);

        // The stale receipt no longer deletes the message.
        assert!(queue.acknowledge(first[0].receipt.clone()).await.is_err());
        queue.acknowledge(second[0].receipt.clone()).await.unwrap();
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn delayed_messages_wait() {
        let (queue, clock) = queue();
        queue
            .publish(OrderMessage::new(OrderId::new()), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(queue.receive(10, Duration::ZERO).await.unwrap().is_empty());

        clock.advance(chrono::Duration::seconds(60));
        assert_eq!(queue.receive(10, Duration::ZERO).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delay_over_fifteen_minutes_is_rejected() {
        let (queue, _) = queue();
        let err = queue
            .publish(OrderMessage::new(OrderId::new()), Duration::from_secs(901))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidDelay(_)));
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn duplicate_publishes_inside_window_are_dropped() {
        let (queue, clock) = queue();
        let order_id = OrderId::new();
        queue.publish(OrderMessage::new(order_id), Duration::ZERO).await.unwrap();
        queue.publish(OrderMessage::new(order_id), Duration::ZERO).await.unwrap();
        assert_eq!(queue.depth(), 1);

        clock.advance(chrono::Duration::minutes(6));
        queue.publish(OrderMessage::new(order_id), Duration::ZERO).await.unwrap();
        assert_eq!(queue.depth(), 2);
        assert_eq!(queue.published().len(), 2);
    }

    #[tokio::test]
    async fn in_flight_message_blocks_its_group_only() {
        let (queue, clock) = queue();
        let a = OrderId::new();
        let b = OrderId::new();
        queue.publish(OrderMessage::new(a), Duration::ZERO).await.unwrap();
        clock.advance(chrono::Duration::minutes(6));
        queue.publish(OrderMessage::new(a), Duration::ZERO).await.unwrap();
        queue.publish(OrderMessage::new(b), Duration::ZERO).await.unwrap();

        let batch = queue.receive(10, Duration::ZERO).await.unwrap();
        let ids: Vec<OrderId> = batch.iter().map(|d| d.message.order_id).collect();
        assert_eq!(ids, vec![a, b]);
        assert_eq!(queue.in_flight(), 2);
    }

    #[tokio::test]
    async fn injected_publish_failure_surfaces() {
        let (queue, _) = queue();
        queue.inject_publish_failures(1);
        let err = queue
            .publish(OrderMessage::new(OrderId::new()), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::PublishFailed { .. }));
    }
}
