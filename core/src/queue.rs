//! Message queue contract for handing orders to asynchronous processing.
//!
//! The queue carries nothing but order identifiers. Delivery is at-least-once
//! and ordered per order, so consumers must be idempotent:
//!
//! ```text
//! create_order ──publish──► queue ──receive──► process_order ──ok──► acknowledge
//!                                   ▲                          │
//!                                   └── visibility timeout ◄───┘ err (no ack)
//! ```
//!
//! A message that is received but not acknowledged becomes visible again once
//! its visibility timeout passes. That redelivery is the retry mechanism for
//! order processing.

use crate::ids::OrderId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Longest delivery delay a publisher may ask for.
pub const MAX_DELIVERY_DELAY: Duration = Duration::from_secs(900);

/// Boxed future returned by every queue method.
pub type QueueFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, QueueError>> + Send + 'a>>;

/// Errors that can occur during queue operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Requested delivery delay is outside `0..=900` seconds.
    #[error("Invalid delivery delay {0:?}: must be at most 900 seconds")]
    InvalidDelay(Duration),

    /// Failed to publish a message.
    #[error("Publish failed for order {order_id}: {reason}")]
    PublishFailed {
        /// Order the message referred to
        order_id: OrderId,
        /// The reason for failure
        reason: String,
    },

    /// Failed to receive messages.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Failed to acknowledge a message.
    #[error("Acknowledge failed: {0}")]
    AcknowledgeFailed(String),

    /// A message body could not be encoded or decoded.
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

/// Body of an order-processing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderMessage {
    /// Order to process
    pub order_id: OrderId,
}

impl OrderMessage {
    /// Create a message for an order.
    #[must_use]
    pub const fn new(order_id: OrderId) -> Self {
        Self { order_id }
    }

    /// Key that orders deliveries: all messages for one order share it.
    #[must_use]
    pub fn group_key(&self) -> String {
        self.order_id.to_string()
    }

    /// Encode as the JSON wire body (`{"orderId": "…"}`).
    ///
    /// # Errors
    ///
    /// [`QueueError::Serialization`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, QueueError> {
        serde_json::to_vec(self).map_err(|e| QueueError::Serialization(e.to_string()))
    }

    /// Decode a JSON wire body.
    ///
    /// # Errors
    ///
    /// [`QueueError::Serialization`] if the body is not a valid message.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, QueueError> {
        serde_json::from_slice(bytes).map_err(|e| QueueError::Serialization(e.to_string()))
    }
}

/// Opaque token that identifies one delivery of a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    /// Wrap a backend receipt token.
    #[must_use]
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// The raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One delivery of a message to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Decoded message
    pub message: OrderMessage,
    /// Token to acknowledge this delivery with
    pub receipt: ReceiptHandle,
    /// How many times the message has been delivered, this one included
    pub receive_count: u32,
}

/// Queue carrying order identifiers to the processing pipeline.
///
/// # Dyn Compatibility
///
/// Explicit `Pin<Box<dyn Future>>` returns keep the trait usable as
/// `Arc<dyn OrderQueue>`.
pub trait OrderQueue: Send + Sync {
    /// Publish a message, delivered no earlier than `delay` from now.
    ///
    /// # Errors
    ///
    /// - [`QueueError::InvalidDelay`] if `delay` exceeds [`MAX_DELIVERY_DELAY`]
    /// - [`QueueError::PublishFailed`] if the backend rejects the message
    fn publish(&self, message: OrderMessage, delay: Duration) -> QueueFuture<'_, ()>;

    /// Receive up to `max_messages`, waiting at most `wait` for the first one.
    ///
    /// Received messages stay invisible to other consumers until they are
    /// acknowledged or their visibility timeout passes.
    ///
    /// # Errors
    ///
    /// [`QueueError::ReceiveFailed`] if the backend fails.
    fn receive(&self, max_messages: usize, wait: Duration) -> QueueFuture<'_, Vec<Delivery>>;

    /// Delete a delivered message so it is never redelivered.
    ///
    /// # Errors
    ///
    /// [`QueueError::AcknowledgeFailed`] if the receipt is unknown or expired.
    fn acknowledge(&self, receipt: ReceiptHandle) -> QueueFuture<'_, ()>;
}

/// Validate a requested delivery delay.
///
/// # Errors
///
/// [`QueueError::InvalidDelay`] if `delay` exceeds [`MAX_DELIVERY_DELAY`].
pub const fn validate_delay(delay: Duration) -> Result<(), QueueError> {
    if delay.as_secs() > MAX_DELIVERY_DELAY.as_secs()
        || (delay.as_secs() == MAX_DELIVERY_DELAY.as_secs() && delay.subsec_nanos() > 0)
    {
        Err(QueueError::InvalidDelay(delay))
    } else {
        Ok(())
    }
}
