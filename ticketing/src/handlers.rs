//! Queue message handlers.

use crate::orders::OrderService;
use async_trait::async_trait;
use boxoffice_core::error::TicketingError;
use boxoffice_core::queue::OrderMessage;
use boxoffice_runtime::{BoxError, MessageHandler};
use tracing::{debug, warn};

/// Runs [`OrderService::process_order`] for each delivered order message.
///
/// A message for an order that no longer exists is acknowledged, since no
/// redelivery could ever succeed.
#[derive(Clone)]
pub struct OrderProcessingHandler {
    orders: OrderService,
}

impl OrderProcessingHandler {
    /// Create a handler.
    #[must_use]
    pub const fn new(orders: OrderService) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl MessageHandler for OrderProcessingHandler {
    async fn handle(&self, message: &OrderMessage) -> Result<(), BoxError> {
        let order_id = message.order_id;
        match self.orders.process_order(order_id).await {
            Ok(order) => {
                debug!(%order_id, status = %order.status, "Order message handled");
                Ok(())
            }
            Err(e @ TicketingError::NotFound { .. }) => {
                warn!(%order_id, error = %e, "Dropping message for unknown order");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
