//! Shared fixture for the ticketing integration tests.

#![allow(dead_code)] // Not every test binary uses every helper
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use boxoffice_core::{
    Clock, CustomerId, DateTime, Event, EventId, Order, OrderId, Ticket, TicketQuery,
    TicketStatus, TicketStore, Utc,
};
use boxoffice_runtime::{PollOutcome, QueueConsumer};
use boxoffice_testing::{
    InMemoryEventStore, InMemoryOrderQueue, InMemoryOrderStore, InMemoryTicketStore, ManualClock,
    epoch,
};
use std::sync::Arc;
use std::time::Duration;
use ticketing::{Config, TicketingApp, TicketingEnvironment};

/// Application over in-memory backends, with handles on every backend.
pub struct Fixture {
    pub app: TicketingApp,
    pub clock: ManualClock,
    pub events: InMemoryEventStore,
    pub tickets: InMemoryTicketStore,
    pub orders: InMemoryOrderStore,
    pub queue: InMemoryOrderQueue,
}

/// Defaults with near-zero OCC backoff so retry paths stay fast.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.retry.initial_delay = Duration::from_millis(1);
    config.retry.max_delay = Duration::from_millis(2);
    config.queue.wait_time = Duration::ZERO;
    config
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        Self::build(config, false)
    }

    /// Stores that yield on every call, so concurrent tasks interleave.
    pub fn interleaving(config: Config) -> Self {
        Self::build(config, true)
    }

    fn build(config: Config, interleave: bool) -> Self {
        let clock = ManualClock::starting_at(epoch());
        let (mut events, mut tickets, mut orders) = (
            InMemoryEventStore::new(),
            InMemoryTicketStore::new(),
            InMemoryOrderStore::new(),
        );
        if interleave {
            events = events.yield_on_access();
            tickets = tickets.yield_on_access();
            orders = orders.yield_on_access();
        }
        let queue = InMemoryOrderQueue::new(Arc::new(clock.clone()))
            .with_visibility_timeout(config.queue.visibility_timeout)
            .with_dedup_window(config.queue.dedup_window);

        let env = TicketingEnvironment::new(
            Arc::new(events.clone()),
            Arc::new(tickets.clone()),
            Arc::new(orders.clone()),
            Arc::new(queue.clone()),
            Arc::new(clock.clone()),
        );
        let app = TicketingApp::new(config, env).unwrap();

        Self {
            app,
            clock,
            events,
            tickets,
            orders,
            queue,
        }
    }

    /// Create an event with `capacity` tickets.
    pub async fn event(&self, capacity: u32) -> Event {
        self.app
            .inventory
            .create_event("Concert", epoch() + chrono::Duration::days(30), "Main Hall", capacity)
            .await
            .unwrap()
    }

    /// Current stored event row.
    pub fn event_row(&self, event_id: EventId) -> Event {
        self.events.row(event_id).unwrap()
    }

    /// Current stored order row.
    pub fn order_row(&self, order_id: OrderId) -> Order {
        self.orders.row(order_id).unwrap()
    }

    /// Tickets referencing an order.
    pub async fn tickets_of(&self, order_id: OrderId) -> Vec<Ticket> {
        self.tickets.query(TicketQuery::ByOrder(order_id)).await.unwrap()
    }

    /// Tickets of an event in one status.
    pub fn count_status(&self, event_id: EventId, status: TicketStatus) -> u32 {
        let n = self
            .tickets
            .for_event(event_id)
            .iter()
            .filter(|t| t.status == status)
            .count();
        u32::try_from(n).unwrap()
    }

    /// Create an order and run it through processing.
    pub async fn processed_order(&self, event_id: EventId, customer: &str, quantity: u32) -> Order {
        let order = self
            .app
            .orders
            .create_order(event_id, CustomerId::from(customer), quantity)
            .await
            .unwrap();
        self.app.orders.process_order(order.order_id).await.unwrap()
    }

    /// Current fixture time.
    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Move time past the reservation hold.
    pub fn expire_holds(&self) {
        self.clock
            .advance(self.app.config().hold_ttl() + chrono::Duration::seconds(1));
    }

    /// One receive round of the order processing consumer.
    pub async fn poll(&self) -> PollOutcome {
        self.consumer().poll_once().await.unwrap()
    }

    pub fn consumer(&self) -> QueueConsumer {
        self.app.consumer().unwrap()
    }

    /// Assert that the event counters agree with its ticket rows.
    pub fn assert_consistent(&self, event_id: EventId) {
        let event = self.event_row(event_id);
        assert!(event.is_consistent(), "counters out of range: {event:?}");

        let tickets = self.tickets.for_event(event_id);
        assert_eq!(u32::try_from(tickets.len()).unwrap(), event.total_capacity);
        assert!(tickets.iter().all(Ticket::is_consistent));

        let held = self.count_status(event_id, TicketStatus::Reserved)
            + self.count_status(event_id, TicketStatus::PendingConfirmation);
        assert_eq!(event.available_tickets, self.count_status(event_id, TicketStatus::Available));
        assert_eq!(event.reserved_tickets, held);
        assert_eq!(
            event.complimentary_tickets,
            self.count_status(event_id, TicketStatus::Complimentary)
        );
        assert_eq!(event.sold_tickets(), self.count_status(event_id, TicketStatus::Sold));
    }
}
