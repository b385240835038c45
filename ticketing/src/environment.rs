//! Injected dependencies shared by every service.

use boxoffice_core::environment::Clock;
use boxoffice_core::queue::OrderQueue;
use boxoffice_core::store::{EventStore, OrderStore, TicketStore};
use std::sync::Arc;

/// Stores, queue and clock the engine runs against.
///
/// Cloning is cheap: every field is an `Arc`.
#[derive(Clone)]
pub struct TicketingEnvironment {
    /// Event records and their counters
    pub events: Arc<dyn EventStore>,
    /// Ticket records
    pub tickets: Arc<dyn TicketStore>,
    /// Order records
    pub orders: Arc<dyn OrderStore>,
    /// Order processing queue
    pub queue: Arc<dyn OrderQueue>,
    /// Source of every timestamp
    pub clock: Arc<dyn Clock>,
}

impl TicketingEnvironment {
    /// Assemble an environment.
    #[must_use]
    pub fn new(
        events: Arc<dyn EventStore>,
        tickets: Arc<dyn TicketStore>,
        orders: Arc<dyn OrderStore>,
        queue: Arc<dyn OrderQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            events,
            tickets,
            orders,
            queue,
            clock,
        }
    }
}
