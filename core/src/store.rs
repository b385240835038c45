//! Persistence contracts for events, tickets and orders.
//!
//! Each store is key-addressed with secondary-index queries, and supports a
//! conditional write that succeeds only if the stored version still equals the
//! version the caller read. That conditional write is the engine's only
//! concurrency control: no operation ever takes a lock across steps.
//!
//! # Implementations
//!
//! - `InMemoryEventStore`, `InMemoryTicketStore`, `InMemoryOrderStore`
//!   (in `boxoffice-testing`): fast, deterministic, with fault injection
//!
//! # Dyn Compatibility
//!
//! Methods return explicit `Pin<Box<dyn Future>>` instead of using `async fn`
//! so the stores can be shared as `Arc<dyn TicketStore>` inside services.

use crate::error::EntityKind;
use crate::event::Event;
use crate::ids::{CustomerId, EventId, OrderId, TicketId};
use crate::order::Order;
use crate::ticket::{Ticket, TicketStatus};
use crate::version::Version;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by every store method.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors that can occur during store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Optimistic concurrency conflict: the stored version is not the expected one.
    #[error("Concurrency conflict on {entity} {id}: expected version {expected}, found {actual:?}")]
    ConcurrentModification {
        /// Record kind
        entity: EntityKind,
        /// Record identifier
        id: String,
        /// Version the writer expected
        expected: Version,
        /// Version actually stored (`None` if absent)
        actual: Option<Version>,
    },

    /// The backend could not serve the request.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether this is an optimistic-lock conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}

/// A record to write together with the version the writer read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalWrite<T> {
    /// New snapshot
    pub record: T,
    /// Version that must still be stored for the write to apply
    pub expected_version: Version,
}

impl<T> ConditionalWrite<T> {
    /// Pair a new snapshot with the version it was derived from.
    #[must_use]
    pub const fn new(record: T, expected_version: Version) -> Self {
        Self {
            record,
            expected_version,
        }
    }
}

/// Secondary-index lookups on the ticket store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketQuery {
    /// Every ticket of an event
    ByEvent(EventId),
    /// Tickets of an event in one status, optionally capped
    ByEventAndStatus {
        /// Event to scan
        event_id: EventId,
        /// Status to match
        status: TicketStatus,
        /// Maximum number of rows to return
        limit: Option<usize>,
    },
    /// Tickets held or owned by a customer
    ByCustomer(CustomerId),
    /// Tickets referencing an order
    ByOrder(OrderId),
    /// Held tickets in one of `statuses` whose hold lapsed strictly before `cutoff`
    ExpiringBefore {
        /// Statuses to sweep
        statuses: Vec<TicketStatus>,
        /// Expiry cutoff (exclusive)
        cutoff: DateTime<Utc>,
    },
}

/// Secondary-index lookups on the order store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderQuery {
    /// Orders placed by a customer
    ByCustomer(CustomerId),
}

/// Storage for [`Event`] snapshots.
pub trait EventStore: Send + Sync {
    /// Load an event.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the backend fails.
    fn get(&self, event_id: EventId) -> StoreFuture<'_, Option<Event>>;

    /// Write an event unconditionally (creation).
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the backend fails.
    fn put(&self, event: Event) -> StoreFuture<'_, Event>;

    /// Write an event only if the stored version equals `expected`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ConcurrentModification`] on a version mismatch or a missing record
    /// - [`StoreError::Unavailable`] if the backend fails
    fn put_conditional(&self, event: Event, expected: Version) -> StoreFuture<'_, Event>;

    /// Delete an event.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the backend fails.
    fn delete(&self, event_id: EventId) -> StoreFuture<'_, ()>;
}

/// Storage for [`Ticket`] snapshots.
pub trait TicketStore: Send + Sync {
    /// Load a ticket.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the backend fails.
    fn get(&self, ticket_id: TicketId) -> StoreFuture<'_, Option<Ticket>>;

    /// Write a ticket unconditionally.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the backend fails.
    fn put(&self, ticket: Ticket) -> StoreFuture<'_, Ticket>;

    /// Write a ticket only if the stored version equals `expected`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ConcurrentModification`] on a version mismatch or a missing record
    /// - [`StoreError::Unavailable`] if the backend fails
    fn put_conditional(&self, ticket: Ticket, expected: Version) -> StoreFuture<'_, Ticket>;

    /// Run a secondary-index query.
    ///
    /// Results are ordered by ticket id so callers see a stable order.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the backend fails.
    fn query(&self, query: TicketQuery) -> StoreFuture<'_, Vec<Ticket>>;

    /// Write many new tickets unconditionally (event creation).
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the backend fails.
    fn batch_put(&self, tickets: Vec<Ticket>) -> StoreFuture<'_, Vec<Ticket>>;

    /// Write many tickets, each conditional on its expected version.
    ///
    /// All-or-nothing: if any record's version does not match, nothing is
    /// written and the first conflict is returned.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ConcurrentModification`] for the first mismatching record
    /// - [`StoreError::Unavailable`] if the backend fails
    fn batch_put_conditional(
        &self,
        writes: Vec<ConditionalWrite<Ticket>>,
    ) -> StoreFuture<'_, Vec<Ticket>>;

    /// Delete a ticket.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the backend fails.
    fn delete(&self, ticket_id: TicketId) -> StoreFuture<'_, ()>;
}

/// Storage for [`Order`] snapshots.
pub trait OrderStore: Send + Sync {
    /// Load an order.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the backend fails.
    fn get(&self, order_id: OrderId) -> StoreFuture<'_, Option<Order>>;

    /// Write an order unconditionally (creation).
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the backend fails.
    fn put(&self, order: Order) -> StoreFuture<'_, Order>;

    /// Write an order only if the stored version equals `expected`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ConcurrentModification`] on a version mismatch or a missing record
    /// - [`StoreError::Unavailable`] if the backend fails
    fn put_conditional(&self, order: Order, expected: Version) -> StoreFuture<'_, Order>;

    /// Run a secondary-index query, ordered by creation time.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the backend fails.
    fn query(&self, query: OrderQuery) -> StoreFuture<'_, Vec<Order>>;

    /// Delete an order.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the backend fails.
    fn delete(&self, order_id: OrderId) -> StoreFuture<'_, ()>;
}
