//! Event creation, inventory reads, teardown and the shared counter update.
//!
//! Every change to an event's counters in the engine goes through
//! [`InventoryService::update_counters`]: read the event, apply one pure
//! transition, write it back conditionally, and start over from a fresh read
//! if someone else wrote first.

use crate::environment::TicketingEnvironment;
use boxoffice_core::error::{EntityKind, Result, StateError, TicketingError};
use boxoffice_core::event::{Event, InventorySummary};
use boxoffice_core::ids::{CustomerId, EventId};
use boxoffice_core::store::{StoreError, TicketQuery};
use boxoffice_core::ticket::Ticket;
use boxoffice_runtime::retry::{RetryPolicy, retry_with_predicate};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, trace};

/// Competing counter commits absorbed by one attempt of
/// [`InventoryService::update_counters`] before it counts as a conflict.
pub const MAX_COMPETING_COMMITS: u32 = 256;

/// Inventory service.
#[derive(Clone)]
pub struct InventoryService {
    env: TicketingEnvironment,
    retry: RetryPolicy,
}

impl InventoryService {
    /// Create the service.
    #[must_use]
    pub const fn new(env: TicketingEnvironment, retry: RetryPolicy) -> Self {
        Self { env, retry }
    }

    /// Create an event and one `AVAILABLE` ticket per unit of capacity.
    ///
    /// # Errors
    ///
    /// - [`TicketingError::Validation`] for a blank name or location or a zero capacity
    /// - [`TicketingError::Store`] if a write fails; a half-created event is removed
    pub async fn create_event(
        &self,
        name: &str,
        date: DateTime<Utc>,
        location: &str,
        capacity: u32,
    ) -> Result<Event> {
        let now = self.env.clock.now();
        let event = Event::new(EventId::new(), name, date, location, capacity, now).map_err(
            |e| match e {
                StateError::InvalidQuantity(_) => {
                    TicketingError::validation("capacity must be at least 1")
                }
                other => other.into(),
            },
        )?;
        let event = self.env.events.put(event).await?;

        let tickets: Vec<Ticket> = (0..capacity)
            .map(|_| Ticket::available(event.event_id, now))
            .collect();
        if let Err(e) = self.env.tickets.batch_put(tickets).await {
            error!(event_id = %event.event_id, error = %e, "Failed to create tickets, removing event");
            if let Err(cleanup) = self.env.events.delete(event.event_id).await {
                error!(event_id = %event.event_id, error = %cleanup, "Failed to remove half-created event");
            }
            return Err(e.into());
        }

        info!(
            event_id = %event.event_id,
            name = %event.name,
            capacity,
            "Event created"
        );
        Ok(event)
    }

    /// Load an event.
    ///
    /// # Errors
    ///
    /// [`TicketingError::NotFound`] if the event does not exist.
    pub async fn get_event(&self, event_id: EventId) -> Result<Event> {
        self.env
            .events
            .get(event_id)
            .await?
            .ok_or_else(|| TicketingError::not_found(EntityKind::Event, event_id))
    }

    /// Counter summary of an event.
    ///
    /// # Errors
    ///
    /// [`TicketingError::NotFound`] if the event does not exist.
    pub async fn availability(&self, event_id: EventId) -> Result<InventorySummary> {
        Ok(self.get_event(event_id).await?.summary())
    }

    /// Tickets a customer holds or owns, across events.
    ///
    /// # Errors
    ///
    /// [`TicketingError::Validation`] for a blank customer id.
    pub async fn tickets_for_customer(&self, customer_id: &CustomerId) -> Result<Vec<Ticket>> {
        if customer_id.is_blank() {
            return Err(TicketingError::validation("customer id must not be blank"));
        }
        Ok(self
            .env
            .tickets
            .query(TicketQuery::ByCustomer(customer_id.clone()))
            .await?)
    }

    /// Delete an event and all of its tickets, returning how many tickets were removed.
    ///
    /// # Errors
    ///
    /// - [`TicketingError::NotFound`] if the event does not exist
    /// - [`TicketingError::InvalidStateTransition`] while any ticket is held
    pub async fn teardown_event(&self, event_id: EventId) -> Result<usize> {
        let event = self.get_event(event_id).await?;
        let tickets = self.env.tickets.query(TicketQuery::ByEvent(event_id)).await?;

        let held = tickets.iter().filter(|t| t.status.is_held()).count();
        if held > 0 {
            return Err(TicketingError::InvalidStateTransition {
                entity: EntityKind::Event,
                current: format!("{held} tickets held"),
                operation: "tear down".to_string(),
            });
        }

        for ticket in &tickets {
            self.env.tickets.delete(ticket.ticket_id).await?;
        }
        self.env.events.delete(event.event_id).await?;

        info!(%event_id, tickets = tickets.len(), "Event torn down");
        Ok(tickets.len())
    }

    /// Apply one counter transition to an event under optimistic concurrency.
    ///
    /// A conflict caused by a competing commit (the stored version moved on)
    /// is recomputed at once from a fresh read, up to
    /// [`MAX_COMPETING_COMMITS`] times per attempt. Any other conflict uses up
    /// one of the configured attempts and backs off.
    ///
    /// # Errors
    ///
    /// - [`TicketingError::NotFound`] if the event does not exist
    /// - whatever `apply` rejects, converted from [`StateError`]
    /// - [`TicketingError::ConcurrentModification`] once attempts run out
    pub async fn update_counters<F>(&self, event_id: EventId, apply: F) -> Result<Event>
    where
        F: Fn(&Event, DateTime<Utc>) -> std::result::Result<Event, StateError>,
    {
        let apply = &apply;
        let updated = retry_with_predicate(
            &self.retry,
            move || self.apply_counters(event_id, apply),
            TicketingError::is_concurrent_modification,
        )
        .await?;

        debug!(
            %event_id,
            version = %updated.version,
            available = updated.available_tickets,
            reserved = updated.reserved_tickets,
            complimentary = updated.complimentary_tickets,
            "Event counters updated"
        );
        Ok(updated)
    }

    async fn apply_counters<F>(&self, event_id: EventId, apply: &F) -> Result<Event>
    where
        F: Fn(&Event, DateTime<Utc>) -> std::result::Result<Event, StateError>,
    {
        let mut competing = 0;
        loop {
            let now = self.env.clock.now();
            let current = self.get_event(event_id).await?;
            let next = apply(&current, now)?;
            match self.env.events.put_conditional(next, current.version).await {
                Ok(written) => return Ok(written),
                Err(StoreError::ConcurrentModification {
                    actual: Some(actual),
                    ..
                }) if actual != current.version && competing < MAX_COMPETING_COMMITS => {
                    competing += 1;
                    trace!(%event_id, read = %current.version, stored = %actual, "Counters moved on, re-reading");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
