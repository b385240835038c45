//! Claiming tickets for a customer.
//!
//! A reservation is two steps with no lock between them:
//!
//! 1. move `quantity` from `available` to `reserved` on the event (conditional)
//! 2. claim `quantity` physical tickets from `AVAILABLE` to `RESERVED`, one
//!    conditional write per ticket
//!
//! The counter hold in step 1 entitles the reserver to `quantity` rows, so a
//! ticket lost to a competing reserver is skipped and another one is claimed
//! in its place. If step 2 cannot complete, the tickets claimed so far are
//! put back and step 1 is undone by releasing the counters again.

use crate::config::Config;
use crate::environment::TicketingEnvironment;
use crate::inventory::InventoryService;
use boxoffice_core::error::{Result, TicketingError};
use boxoffice_core::ids::{CustomerId, EventId, OrderId};
use boxoffice_core::store::{ConditionalWrite, TicketQuery};
use boxoffice_core::ticket::{Ticket, TicketStatus};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, trace, warn};

/// Fresh reads of the free pool one claim may make before giving up.
const MAX_CLAIM_ROUNDS: u32 = 16;

/// Reservation service.
#[derive(Clone)]
pub struct ReservationService {
    env: TicketingEnvironment,
    inventory: InventoryService,
    hold_ttl: chrono::Duration,
    max_tickets_per_order: u32,
}

impl ReservationService {
    /// Create the service.
    #[must_use]
    pub fn new(env: TicketingEnvironment, inventory: InventoryService, config: &Config) -> Self {
        Self {
            env,
            inventory,
            hold_ttl: config.hold_ttl(),
            max_tickets_per_order: config.reservation.max_tickets_per_order,
        }
    }

    /// Reject quantities outside `1..=max_tickets_per_order`.
    ///
    /// # Errors
    ///
    /// [`TicketingError::MaxTicketsExceeded`] for an out-of-range quantity.
    pub fn check_quantity(&self, quantity: u32) -> Result<()> {
        if quantity == 0 || quantity > self.max_tickets_per_order {
            return Err(TicketingError::MaxTicketsExceeded {
                requested: quantity,
                max: self.max_tickets_per_order,
            });
        }
        Ok(())
    }

    /// Reserve `quantity` tickets of an event for `customer_id` under `order_id`.
    ///
    /// Returns the reserved tickets, each `RESERVED` until `now + hold_ttl`.
    ///
    /// # Errors
    ///
    /// - [`TicketingError::MaxTicketsExceeded`] for an out-of-range quantity
    /// - [`TicketingError::NotFound`] if the event does not exist
    /// - [`TicketingError::InsufficientTickets`] if the counters or the ticket pool run short
    /// - [`TicketingError::ConcurrentModification`] if the counter hold kept losing races
    pub async fn reserve(
        &self,
        event_id: EventId,
        customer_id: &CustomerId,
        quantity: u32,
        order_id: OrderId,
    ) -> Result<Vec<Ticket>> {
        self.check_quantity(quantity)?;

        self.inventory
            .update_counters(event_id, |event, now| event.reserve(quantity, now))
            .await?;
        debug!(%event_id, quantity, "Event counters reserved");

        let now = self.env.clock.now();
        let tickets = match self.claim_tickets(event_id, customer_id, quantity, order_id, now).await {
            Ok(tickets) => tickets,
            Err(e) => {
                self.compensate(event_id, quantity, &e).await;
                return Err(e);
            }
        };

        info!(
            %event_id,
            %customer_id,
            %order_id,
            quantity,
            "Tickets reserved"
        );
        Ok(tickets)
    }

    /// Claim `quantity` free tickets, topping up after every lost row.
    ///
    /// On failure nothing stays claimed.
    async fn claim_tickets(
        &self,
        event_id: EventId,
        customer_id: &CustomerId,
        quantity: u32,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Ticket>> {
        let wanted = usize::try_from(quantity).unwrap_or(usize::MAX);
        let mut claimed: Vec<Ticket> = Vec::with_capacity(wanted);

        for _ in 0..MAX_CLAIM_ROUNDS {
            let outcome = self
                .claim_round(event_id, customer_id, order_id, wanted, &mut claimed, now)
                .await;
            match outcome {
                Ok(()) if claimed.len() == wanted => return Ok(claimed),
                Ok(()) => debug!(%event_id, claimed = claimed.len(), quantity, "Tickets lost to competing reservations, re-reading pool"),
                Err(e) => {
                    self.unclaim(event_id, &claimed).await;
                    return Err(e);
                }
            }
        }

        warn!(%event_id, claimed = claimed.len(), quantity, "Free pool kept draining under the claim");
        self.unclaim(event_id, &claimed).await;
        Err(TicketingError::InsufficientTickets {
            requested: quantity,
            available: u32::try_from(claimed.len()).unwrap_or(u32::MAX),
        })
    }

    /// One pass over the currently free tickets.
    async fn claim_round(
        &self,
        event_id: EventId,
        customer_id: &CustomerId,
        order_id: OrderId,
        wanted: usize,
        claimed: &mut Vec<Ticket>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let candidates = self
            .env
            .tickets
            .query(TicketQuery::ByEventAndStatus {
                event_id,
                status: TicketStatus::Available,
                limit: None,
            })
            .await?;

        let found = claimed.len().saturating_add(candidates.len());
        if found < wanted {
            return Err(TicketingError::InsufficientTickets {
                requested: u32::try_from(wanted).unwrap_or(u32::MAX),
                available: u32::try_from(found).unwrap_or(u32::MAX),
            });
        }

        for candidate in candidates {
            if claimed.len() == wanted {
                break;
            }
            let reserved = candidate.reserve(customer_id, order_id, now, self.hold_ttl)?;
            match self
                .env
                .tickets
                .put_conditional(reserved, candidate.version)
                .await
                .map_err(TicketingError::from)
            {
                Ok(ticket) => claimed.push(ticket),
                Err(e) if e.is_concurrent_modification() => {
                    trace!(ticket_id = %candidate.ticket_id, "Ticket taken by a competing reservation");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Put partially claimed tickets back on sale.
    async fn unclaim(&self, event_id: EventId, claimed: &[Ticket]) {
        if claimed.is_empty() {
            return;
        }
        let now = self.env.clock.now();
        let writes = claimed
            .iter()
            .map(|t| -> Result<ConditionalWrite<Ticket>> {
                Ok(ConditionalWrite::new(t.release(now)?, t.version))
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
            error!(
                %event_id,
                tickets = claimed.len(),
                error = %e,
                "Failed to return partially claimed tickets"
            );
        }
    }

    /// Undo the counter half of a reservation after the ticket half failed.
    async fn compensate(&self, event_id: EventId, quantity: u32, cause: &TicketingError) {
        warn!(
            %event_id,
            quantity,
            error = %cause,
            "Ticket claim failed, releasing reserved counters"
        );
        if let Err(e) = self
            .inventory
            .update_counters(event_id, |event, now| event.release(quantity, now))
            .await
        {
            error!(
                %event_id,
                quantity,
                error = %e,
                "Compensating release failed, counters need reconciliation"
            );
        }
    }

    /// Put held tickets back on sale and release their event counters.
    ///
    /// Only tickets still `RESERVED` or `PENDING_CONFIRMATION` are touched;
    /// the counters move by the number actually released, which is returned.
    ///
    /// # Errors
    ///
    /// - [`TicketingError::ConcurrentModification`] if a ticket changed since it was read
    /// - any error from the counter update, after the tickets were released
    pub async fn release_holds(&self, event_id: EventId, tickets: &[Ticket]) -> Result<u32> {
        let now = self.env.clock.now();
        let writes = tickets
            .iter()
            .filter(|t| t.status.is_held())
            .map(|t| -> Result<ConditionalWrite<Ticket>> {
                Ok(ConditionalWrite::new(t.release(now)?, t.version))
            })
            .collect::<Result<Vec<_>>>()?;

        if writes.is_empty() {
            return Ok(0);
        }

        let released = self.env.tickets.batch_put_conditional(writes).await?;
        let count = u32::try_from(released.len()).unwrap_or(u32::MAX);

        self.inventory
            .update_counters(event_id, |event, now| event.release(count, now))
            .await
            .inspect_err(|e| {
                error!(
                    %event_id,
                    count,
                    error = %e,
                    "Tickets released but counter rollback failed"
                );
            })?;

        debug!(%event_id, count, "Holds released");
        Ok(count)
    }
}
