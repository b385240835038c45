//! Granting a single complimentary ticket outside the purchase flow.

use crate::environment::TicketingEnvironment;
use crate::inventory::InventoryService;
use boxoffice_core::error::{Result, TicketingError};
use boxoffice_core::ids::{CustomerId, EventId, OrderId};
use boxoffice_core::order::Order;
use boxoffice_core::store::TicketQuery;
use boxoffice_core::ticket::{Ticket, TicketStatus};
use boxoffice_runtime::retry::{RetryPolicy, retry_with_predicate};
use tracing::{error, info};

/// Complimentary ticket service.
#[derive(Clone)]
pub struct ComplimentaryService {
    env: TicketingEnvironment,
    inventory: InventoryService,
    retry: RetryPolicy,
}

impl ComplimentaryService {
    /// Create the service.
    #[must_use]
    pub const fn new(env: TicketingEnvironment, inventory: InventoryService, retry: RetryPolicy) -> Self {
        Self {
            env,
            inventory,
            retry,
        }
    }

    /// Give one available ticket to `customer_id` for free.
    ///
    /// The ticket goes straight from `AVAILABLE` to `COMPLIMENTARY` and is
    /// recorded under a new order that is confirmed from the start.
    ///
    /// # Errors
    ///
    /// - [`TicketingError::Validation`] for a blank customer id or reason
    /// - [`TicketingError::NotFound`] if the event does not exist
    /// - [`TicketingError::InsufficientTickets`] if nothing is available
    /// - [`TicketingError::ConcurrentModification`] if every claim lost a race
    pub async fn assign(
        &self,
        event_id: EventId,
        customer_id: &CustomerId,
        reason: &str,
    ) -> Result<Order> {
        if customer_id.is_blank() {
            return Err(TicketingError::validation("customer id must not be blank"));
        }
        if reason.trim().is_empty() {
            return Err(TicketingError::validation("complimentary reason must not be blank"));
        }

        let order_id = OrderId::new();
        let ticket = retry_with_predicate(
            &self.retry,
            move || self.claim(event_id, customer_id, order_id),
            TicketingError::is_concurrent_modification,
        )
        .await?;

        self.inventory
            .update_counters(event_id, |event, now| event.assign_complimentary(1, now))
            .await
            .inspect_err(|e| {
                error!(
                    %event_id,
                    ticket_id = %ticket.ticket_id,
                    error = %e,
                    "Complimentary ticket granted but counters not updated"
                );
            })?;

        let now = self.env.clock.now();
        let order = Order::confirmed(
            order_id,
            event_id,
            customer_id.clone(),
            vec![ticket.ticket_id],
            now,
        )?;
        let order = self.env.orders.put(order).await?;

        info!(
            %event_id,
            %order_id,
            %customer_id,
            ticket_id = %ticket.ticket_id,
            reason,
            "Complimentary ticket assigned"
        );
        Ok(order)
    }

    async fn claim(&self, event_id: EventId, customer_id: &CustomerId, order_id: OrderId) -> Result<Ticket> {
        let event = self.inventory.get_event(event_id).await?;
        if event.available_tickets == 0 {
            return Err(TicketingError::InsufficientTickets {
                requested: 1,
                available: 0,
            });
        }

        let candidate = self
            .env
            .tickets
            .query(TicketQuery::ByEventAndStatus {
                event_id,
                status: TicketStatus::Available,
                limit: Some(1),
            })
            .await?
            .into_iter()
            .next()
            .ok_or(TicketingError::InsufficientTickets {
                requested: 1,
                available: 0,
            })?;

        let granted = candidate.grant_complimentary(customer_id, order_id, self.env.clock.now())?;
        Ok(self
            .env
            .tickets
            .put_conditional(granted, candidate.version)
            .await?)
    }
}
