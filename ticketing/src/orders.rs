//! Order lifecycle: creation, asynchronous processing, confirmation and cancellation.
//!
//! ```text
//!  create_order ─┬─ reserve tickets ─ persist PENDING ─ stamp tickets ─ publish {orderId}
//!                │
//!  queue ────────┴─► process_order: PROCESSING, tickets RESERVED → PENDING_CONFIRMATION
//!                        │ error with retries left: returned, message redelivered
//!                        │ error with retries exhausted: holds released, order FAILED
//!                        ▼
//!  payment signal ─► confirm_order: counters confirmSale, tickets → SOLD, order CONFIRMED
//! ```
//!
//! Processing must tolerate duplicate and late deliveries, so every step
//! short-circuits when it finds its work already done.

use crate::config::Config;
use crate::environment::TicketingEnvironment;
use crate::inventory::InventoryService;
use crate::reservation::ReservationService;
use boxoffice_core::error::{EntityKind, Result, StateError, TicketingError};
use boxoffice_core::event::Event;
use boxoffice_core::ids::{CustomerId, EventId, OrderId};
use boxoffice_core::order::{Order, OrderStatus};
use boxoffice_core::queue::OrderMessage;
use boxoffice_core::store::{ConditionalWrite, OrderQuery, TicketQuery};
use boxoffice_core::ticket::{Ticket, TicketStatus};
use boxoffice_runtime::retry::{RetryPolicy, retry_with_predicate};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Failure reason recorded when an order runs out of processing attempts.
pub const MAX_RETRIES_EXCEEDED: &str = "Maximum retry attempts exceeded";

/// How a confirmed order's tickets are settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Sale,
    Complimentary,
}

impl Settlement {
    const fn final_status(self) -> TicketStatus {
        match self {
            Self::Sale => TicketStatus::Sold,
            Self::Complimentary => TicketStatus::Complimentary,
        }
    }

    fn settle_ticket(self, ticket: &Ticket, now: DateTime<Utc>) -> std::result::Result<Ticket, StateError> {
        match self {
            Self::Sale => ticket.mark_sold(now),
            Self::Complimentary => ticket.mark_complimentary(now),
        }
    }

    fn settle_counters(
        self,
        event: &Event,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> std::result::Result<Event, StateError> {
        match self {
            Self::Sale => event.confirm_sale(quantity, now),
            Self::Complimentary => event.confirm_complimentary(quantity, now),
        }
    }

    fn revert_counters(
        self,
        event: &Event,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> std::result::Result<Event, StateError> {
        match self {
            Self::Sale => event.revert_sale(quantity, now),
            Self::Complimentary => event.revert_complimentary(quantity, now),
        }
    }
}

/// Order service.
#[derive(Clone)]
pub struct OrderService {
    env: TicketingEnvironment,
    inventory: InventoryService,
    reservations: ReservationService,
    retry: RetryPolicy,
    hold_ttl: chrono::Duration,
    max_retries: u32,
}

impl OrderService {
    /// Create the service.
    #[must_use]
    pub fn new(
        env: TicketingEnvironment,
        inventory: InventoryService,
        reservations: ReservationService,
        config: &Config,
    ) -> Self {
        Self {
            env,
            inventory,
            reservations,
            retry: config.retry_policy(),
            hold_ttl: config.hold_ttl(),
            max_retries: config.processing.max_retries,
        }
    }

    /// Reserve tickets, record a `PENDING` order and hand it to the queue.
    ///
    /// # Errors
    ///
    /// - [`TicketingError::Validation`] for a blank customer id
    /// - [`TicketingError::MaxTicketsExceeded`] for an out-of-range quantity
    /// - [`TicketingError::NotFound`] if the event does not exist
    /// - any reservation error (see [`ReservationService::reserve`])
    /// - [`TicketingError::Queue`] if the hand-off fails; the holds then lapse to the reaper
    pub async fn create_order(
        &self,
        event_id: EventId,
        customer_id: CustomerId,
        quantity: u32,
    ) -> Result<Order> {
        if customer_id.is_blank() {
            return Err(TicketingError::validation("customer id must not be blank"));
        }
        self.reservations.check_quantity(quantity)?;
        self.inventory.get_event(event_id).await?;

        let order_id = OrderId::new();
        let tickets = self
            .reservations
            .reserve(event_id, &customer_id, quantity, order_id)
            .await?;

        let now = self.env.clock.now();
        let ticket_ids = tickets.iter().map(|t| t.ticket_id).collect();
        let order = Order::pending(order_id, event_id, customer_id, ticket_ids, now)?;
        let order = match self.env.orders.put(order).await {
            Ok(order) => order,
            Err(e) => {
                error!(%order_id, error = %e, "Failed to persist order, releasing reservation");
                if let Err(release) = self.reservations.release_holds(event_id, &tickets).await {
                    error!(%order_id, error = %release, "Failed to release reservation of unsaved order");
                }
                return Err(e.into());
            }
        };

        self.stamp_tickets(&order, &tickets, now).await;

        self.env
            .queue
            .publish(OrderMessage::new(order_id), Duration::ZERO)
            .await
            .inspect_err(|e| {
                error!(%order_id, error = %e, "Failed to publish order for processing");
            })?;

        info!(
            %order_id,
            %event_id,
            customer_id = %order.customer_id,
            quantity,
            "Order created"
        );
        Ok(order)
    }

    /// Re-stamp the reserved tickets with the persisted order's id.
    ///
    /// The reservation already wrote the same id, so a failure here leaves the
    /// tickets correctly attributed and is only logged.
    async fn stamp_tickets(&self, order: &Order, tickets: &[Ticket], now: DateTime<Utc>) {
        let writes = tickets
            .iter()
            .map(|t| -> Result<ConditionalWrite<Ticket>> {
                Ok(ConditionalWrite::new(t.assign_order(order.order_id, now)?, t.version))
            })
            .collect::<Result<Vec<_>>>();

        let outcome = match writes {
            Ok(writes) => self
                .env
                .tickets
                .batch_put_conditional(writes)
                .await
                .map_err(TicketingError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            warn!(order_id = %order.order_id, error = %e, "Failed to re-stamp tickets with order id");
        }
    }

    /// Move an order's tickets into `PENDING_CONFIRMATION`.
    ///
    /// Safe to call any number of times for the same order:
    /// terminal orders are returned unchanged, and so is an order whose
    /// tickets are already pending confirmation or sold.
    ///
    /// # Errors
    ///
    /// - [`TicketingError::NotFound`] if the order does not exist
    /// - the processing error while attempts remain, so the message is redelivered
    ///
    /// Once attempts run out the order is failed and returned as `Ok`.
    pub async fn process_order(&self, order_id: OrderId) -> Result<Order> {
        let order = self.get_order(order_id).await?;
        if order.is_terminal() {
            debug!(%order_id, status = %order.status, "Order already terminal, skipping");
            return Ok(order);
        }

        let now = self.env.clock.now();
        if !order.has_retries_remaining(self.max_retries) {
            warn!(%order_id, retry_count = order.retry_count, "Order out of processing attempts");
            let failed = order.fail(MAX_RETRIES_EXCEEDED, now)?;
            return Ok(self.env.orders.put_conditional(failed, order.version).await?);
        }

        let tickets = self.tickets_of(order_id).await?;
        if order.status == OrderStatus::Processing && covers_order(&order, &tickets) && all_confirming(&tickets) {
            debug!(%order_id, "Tickets already pending confirmation, skipping");
            return Ok(order);
        }

        let processing = order.start_processing(now)?;
        let processing = self
            .env
            .orders
            .put_conditional(processing, order.version)
            .await?;

        match self.begin_confirmation(&processing, &tickets, now).await {
            Ok(()) => {
                info!(%order_id, attempt = processing.retry_count, "Order processing");
                Ok(processing)
            }
            Err(e) if processing.has_retries_remaining(self.max_retries) => {
                warn!(
                    %order_id,
                    attempt = processing.retry_count,
                    error = %e,
                    "Order processing failed, leaving for redelivery"
                );
                Err(e)
            }
            Err(e) => self.exhaust(processing, &e).await,
        }
    }

    async fn begin_confirmation(
        &self,
        order: &Order,
        tickets: &[Ticket],
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !covers_order(order, tickets) {
            return Err(TicketingError::InsufficientTickets {
                requested: order.total_tickets,
                available: u32::try_from(tickets.len()).unwrap_or(u32::MAX),
            });
        }
        if all_confirming(tickets) {
            return Ok(());
        }
        if let Some(stray) = tickets.iter().find(|t| {
            !matches!(
                t.status,
                TicketStatus::Reserved | TicketStatus::PendingConfirmation | TicketStatus::Sold
            )
        }) {
            return Err(TicketingError::InvalidStateTransition {
                entity: EntityKind::Ticket,
                current: stray.status.to_string(),
                operation: "begin confirmation".to_string(),
            });
        }

        let writes = tickets
            .iter()
            .filter(|t| t.status == TicketStatus::Reserved)
            .map(|t| -> Result<ConditionalWrite<Ticket>> {
                Ok(ConditionalWrite::new(t.begin_confirmation(now, self.hold_ttl)?, t.version))
            })
            .collect::<Result<Vec<_>>>()?;
        self.env.tickets.batch_put_conditional(writes).await?;
        Ok(())
    }

    /// Give up on an order: release its holds, roll the counters back, fail it.
    async fn exhaust(&self, processing: Order, cause: &TicketingError) -> Result<Order> {
        let order_id = processing.order_id;
        error!(
            %order_id,
            attempts = processing.retry_count,
            error = %cause,
            "Order processing attempts exhausted, failing order"
        );

        let now = self.env.clock.now();
        let failed = processing.fail(cause.to_string(), now)?;

        match self.tickets_of(order_id).await {
            Ok(tickets) => {
                if let Err(e) = self.reservations.release_holds(processing.event_id, &tickets).await {
                    error!(%order_id, error = %e, "Failed to release holds of failed order");
                }
            }
            Err(e) => error!(%order_id, error = %e, "Failed to load tickets of failed order"),
        }

        Ok(self
            .env
            .orders
            .put_conditional(failed, processing.version)
            .await?)
    }

    /// Settle a processing order as a sale.
    ///
    /// # Errors
    ///
    /// - [`TicketingError::NotFound`] if the order does not exist
    /// - [`TicketingError::InvalidStateTransition`] unless the order is processing
    ///   and every ticket is pending confirmation or sold
    pub async fn confirm_order(&self, order_id: OrderId) -> Result<Order> {
        self.settle(order_id, Settlement::Sale).await
    }

    /// Settle a processing order with every ticket complimentary.
    ///
    /// # Errors
    ///
    /// Same as [`OrderService::confirm_order`].
    pub async fn confirm_order_as_complimentary(&self, order_id: OrderId) -> Result<Order> {
        self.settle(order_id, Settlement::Complimentary).await
    }

    async fn settle(&self, order_id: OrderId, settlement: Settlement) -> Result<Order> {
        let order = self.get_order(order_id).await?;
        if order.status == OrderStatus::Confirmed {
            debug!(%order_id, "Order already confirmed");
            return Ok(order);
        }
        if order.status != OrderStatus::Processing {
            return Err(TicketingError::InvalidStateTransition {
                entity: EntityKind::Order,
                current: order.status.to_string(),
                operation: "confirm".to_string(),
            });
        }

        let tickets = self.tickets_of(order_id).await?;
        if !covers_order(&order, &tickets) {
            return Err(TicketingError::InsufficientTickets {
                requested: order.total_tickets,
                available: u32::try_from(tickets.len()).unwrap_or(u32::MAX),
            });
        }
        let target = settlement.final_status();
        if let Some(stray) = tickets
            .iter()
            .find(|t| t.status != TicketStatus::PendingConfirmation && t.status != target)
        {
            return Err(TicketingError::InvalidStateTransition {
                entity: EntityKind::Ticket,
                current: stray.status.to_string(),
                operation: "confirm".to_string(),
            });
        }

        // Tickets already settled by an earlier call carry their counter change with them.
        let pending: Vec<&Ticket> = tickets
            .iter()
            .filter(|t| t.status == TicketStatus::PendingConfirmation)
            .collect();
        if !pending.is_empty() {
            self.settle_tickets(&order, &pending, settlement).await?;
        }

        let now = self.env.clock.now();
        let confirmed = order.confirm(now)?;
        let confirmed = self
            .env
            .orders
            .put_conditional(confirmed, order.version)
            .await?;

        info!(
            %order_id,
            event_id = %confirmed.event_id,
            tickets = confirmed.total_tickets,
            settlement = ?settlement,
            "Order confirmed"
        );
        Ok(confirmed)
    }

    /// Move the counters, then the tickets, undoing the counters if the
    /// ticket batch does not land.
    async fn settle_tickets(&self, order: &Order, pending: &[&Ticket], settlement: Settlement) -> Result<()> {
        let event_id = order.event_id;
        let quantity = u32::try_from(pending.len()).unwrap_or(u32::MAX);
        self.inventory
            .update_counters(event_id, |event, now| {
                settlement.settle_counters(event, quantity, now)
            })
            .await?;

        let now = self.env.clock.now();
        let writes = pending
            .iter()
            .map(|t| -> Result<ConditionalWrite<Ticket>> {
                Ok(ConditionalWrite::new(settlement.settle_ticket(t, now)?, t.version))
            })
            .collect::<Result<Vec<_>>>();
        let written = match writes {
            Ok(writes) => self
                .env
                .tickets
                .batch_put_conditional(writes)
                .await
                .map_err(TicketingError::from),
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            warn!(
                order_id = %order.order_id,
                quantity,
                error = %e,
                "Ticket settlement failed, reverting counters"
            );
            if let Err(revert) = self
                .inventory
                .update_counters(event_id, |event, now| {
                    settlement.revert_counters(event, quantity, now)
                })
                .await
            {
                error!(
                    order_id = %order.order_id,
                    %event_id,
                    quantity,
                    error = %revert,
                    "Counter revert failed, counters need reconciliation"
                );
            }
            return Err(e);
        }
        Ok(())
    }

    /// Cancel a pending or processing order and put its held tickets back on sale.
    ///
    /// Cancelling an already cancelled order returns it unchanged.
    ///
    /// # Errors
    ///
    /// - [`TicketingError::Validation`] for a blank reason
    /// - [`TicketingError::NotFound`] if the order does not exist
    /// - [`TicketingError::InvalidStateTransition`] for a confirmed or failed order
    pub async fn cancel_order(&self, order_id: OrderId, reason: &str) -> Result<Order> {
        if reason.trim().is_empty() {
            return Err(TicketingError::validation("cancellation reason must not be blank"));
        }

        let order = self.get_order(order_id).await?;
        if order.status == OrderStatus::Cancelled {
            return Ok(order);
        }

        let now = self.env.clock.now();
        let cancelled = order.cancel(reason, now)?;

        let tickets = self.tickets_of(order_id).await?;
        let released = self
            .reservations
            .release_holds(order.event_id, &tickets)
            .await?;

        let (read, next) = (&order, &cancelled);
        let cancelled = retry_with_predicate(
            &self.retry,
            move || self.persist_cancellation(read, next, reason),
            TicketingError::is_concurrent_modification,
        )
        .await?;

        info!(%order_id, released, reason, "Order cancelled");
        Ok(cancelled)
    }

    /// Write a cancellation, re-deriving it if the order moved on meanwhile.
    async fn persist_cancellation(&self, read: &Order, cancelled: &Order, reason: &str) -> Result<Order> {
        let current = self.get_order(read.order_id).await?;
        if current.version == read.version {
            return Ok(self
                .env
                .orders
                .put_conditional(cancelled.clone(), read.version)
                .await?);
        }
        if current.status == OrderStatus::Cancelled {
            return Ok(current);
        }
        let next = current.cancel(reason, self.env.clock.now())?;
        Ok(self.env.orders.put_conditional(next, current.version).await?)
    }

    /// Load an order.
    ///
    /// # Errors
    ///
    /// [`TicketingError::NotFound`] if the order does not exist.
    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.env
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| TicketingError::not_found(EntityKind::Order, order_id))
    }

    /// Orders placed by a customer, oldest first.
    ///
    /// # Errors
    ///
    /// [`TicketingError::Validation`] for a blank customer id.
    pub async fn orders_for_customer(&self, customer_id: &CustomerId) -> Result<Vec<Order>> {
        if customer_id.is_blank() {
            return Err(TicketingError::validation("customer id must not be blank"));
        }
        Ok(self
            .env
            .orders
            .query(OrderQuery::ByCustomer(customer_id.clone()))
            .await?)
    }

    async fn tickets_of(&self, order_id: OrderId) -> Result<Vec<Ticket>> {
        Ok(self.env.tickets.query(TicketQuery::ByOrder(order_id)).await?)
    }
}

fn covers_order(order: &Order, tickets: &[Ticket]) -> bool {
    u32::try_from(tickets.len()).is_ok_and(|n| n == order.total_tickets)
}

fn all_confirming(tickets: &[Ticket]) -> bool {
    tickets
        .iter()
        .all(|t| matches!(t.status, TicketStatus::PendingConfirmation | TicketStatus::Sold))
}
