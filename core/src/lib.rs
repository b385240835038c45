//! # Boxoffice Core
//!
//! Records, pure transitions and environment traits for the boxoffice
//! ticket inventory engine.
//!
//! This crate holds no I/O. Everything here is either a plain snapshot type,
//! a function from one snapshot to the next, or a trait that the imperative
//! shell (`boxoffice-runtime`, `ticketing`) implements or consumes.
//!
//! ## Core Concepts
//!
//! - **Snapshot**: an immutable [`Event`], [`Ticket`] or [`Order`] read from a store
//! - **Transition**: a method returning the next snapshot (at the next [`Version`]) or a [`StateError`]
//! - **Conditional write**: a store write that applies only if the stored version is unchanged
//! - **Environment**: injected dependencies ([`EventStore`], [`TicketStore`], [`OrderStore`], [`OrderQueue`], [`Clock`])
//!
//! ## Example
//!
//! ```
//! use boxoffice_core::{Event, EventId, Utc};
//!
//! let now = Utc::now();
//! let event = Event::new(EventId::new(), "Concert", now, "Main Hall", 10, now)?;
//! let held = event.reserve(3, now)?;
//! assert_eq!(held.available_tickets, 7);
//! assert_eq!(held.reserved_tickets, 3);
//!
//! let sold = held.confirm_sale(3, now)?;
//! assert_eq!(sold.sold_tickets(), 3);
//! # Ok::<(), boxoffice_core::StateError>(())
//! ```

pub mod error;
pub mod event;
pub mod ids;
pub mod order;
pub mod queue;
pub mod store;
pub mod ticket;
pub mod version;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub use environment::{Clock, SystemClock};
pub use error::{EntityKind, Result, StateError, TicketingError};
pub use event::{Event, InventorySummary};
pub use ids::{CustomerId, EventId, OrderId, ParseIdError, TicketId};
pub use order::{DEFAULT_MAX_TICKETS_PER_ORDER, Order, OrderStatus};
pub use queue::{Delivery, MAX_DELIVERY_DELAY, OrderMessage, OrderQueue, QueueError, ReceiptHandle};
pub use store::{
    ConditionalWrite, EventStore, OrderQuery, OrderStore, StoreError, TicketQuery, TicketStore,
};
pub use ticket::{Ticket, TicketStatus};
pub use version::Version;

/// Environment module - injected dependencies that are not stores.
///
/// Every timestamp the engine writes comes from a [`Clock`], so tests can pin
/// or advance time and check hold expiry deterministically.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use boxoffice_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = chrono::Utc::now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
