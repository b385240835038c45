//! Error taxonomy for the inventory and order engine.
//!
//! Two layers:
//!
//! - [`StateError`] is returned by the pure transition functions on
//!   [`Event`](crate::event::Event), [`Ticket`](crate::ticket::Ticket) and
//!   [`Order`](crate::order::Order). It never involves I/O.
//! - [`TicketingError`] is what service operations return. Callers match on
//!   it explicitly; only [`TicketingError::ConcurrentModification`] is ever
//!   retried locally.

use crate::queue::QueueError;
use crate::store::StoreError;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, TicketingError>;

/// The kind of record an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// A ticketed event (the inventory counters).
    Event,
    /// A single ticket.
    Ticket,
    /// An order.
    Order,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Event => "Event",
            Self::Ticket => "Ticket",
            Self::Order => "Order",
        };
        f.write_str(name)
    }
}

/// Failure of a pure state transition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Quantity must be strictly positive.
    #[error("Quantity must be positive, got {0}")]
    InvalidQuantity(u32),

    /// Not enough available tickets on the event counters.
    #[error("Insufficient available tickets: requested {requested}, available {available}")]
    InsufficientAvailable {
        /// Requested quantity
        requested: u32,
        /// Currently available
        available: u32,
    },

    /// Not enough reserved tickets on the event counters.
    #[error("Insufficient reserved tickets: requested {requested}, reserved {reserved}")]
    InsufficientReserved {
        /// Requested quantity
        requested: u32,
        /// Currently reserved
        reserved: u32,
    },

    /// Counter arithmetic would push the event past its capacity.
    #[error("Capacity exceeded: {attempted} tickets accounted for, capacity {capacity}")]
    CapacityExceeded {
        /// Sum of counters the transition would produce
        attempted: u64,
        /// Total capacity of the event
        capacity: u32,
    },

    /// The transition is not legal from the current state.
    #[error("Cannot {operation} {entity} in state {current}")]
    InvalidTransition {
        /// Record kind
        entity: EntityKind,
        /// Current state, rendered for diagnostics
        current: String,
        /// Attempted operation
        operation: &'static str,
    },

    /// The snapshot would violate a structural invariant.
    #[error("Invalid {entity}: {reason}")]
    Invariant {
        /// Record kind
        entity: EntityKind,
        /// What is wrong
        reason: String,
    },
}

impl StateError {
    pub(crate) fn invalid_transition(
        entity: EntityKind,
        current: impl fmt::Display,
        operation: &'static str,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            current: current.to_string(),
            operation,
        }
    }
}

/// Errors surfaced by engine operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TicketingError {
    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Record kind
        entity: EntityKind,
        /// Identifier that was looked up
        id: String,
    },

    /// More tickets requested than are available.
    #[error("Insufficient tickets: requested {requested}, available {available}")]
    InsufficientTickets {
        /// Requested quantity
        requested: u32,
        /// Available at the time of the check
        available: u32,
    },

    /// The per-order ticket cap was exceeded (or the quantity was not positive).
    #[error("Ticket quantity {requested} outside 1..={max}")]
    MaxTicketsExceeded {
        /// Requested quantity
        requested: u32,
        /// Configured cap
        max: u32,
    },

    /// Optimistic lock lost: the record changed since it was read.
    #[error("Concurrent modification of {entity} {id}: expected version {expected}, found {}", display_version(.actual))]
    ConcurrentModification {
        /// Record kind
        entity: EntityKind,
        /// Record identifier
        id: String,
        /// Version the writer read
        expected: Version,
        /// Version found in the store (`None` if the record is gone)
        actual: Option<Version>,
    },

    /// An illegal state transition was attempted.
    #[error("Invalid state transition on {entity}: cannot {operation} from {current}")]
    InvalidStateTransition {
        /// Record kind
        entity: EntityKind,
        /// Current state
        current: String,
        /// Attempted operation
        operation: String,
    },

    /// Malformed input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Backend failure other than a version conflict.
    #[error("Store error: {0}")]
    Store(String),

    /// Message queue failure.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

fn display_version(version: &Option<Version>) -> String {
    version.map_or_else(|| "none".to_string(), |v| v.to_string())
}

impl TicketingError {
    /// Shorthand for a [`TicketingError::NotFound`].
    pub fn not_found(entity: EntityKind, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Shorthand for a [`TicketingError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether this error is an optimistic-lock loss (the only retryable kind).
    #[must_use]
    pub const fn is_concurrent_modification(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}

impl From<StateError> for TicketingError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::InsufficientAvailable {
                requested,
                available,
            } => Self::InsufficientTickets {
                requested,
                available,
            },
            StateError::InvalidQuantity(quantity) => {
                Self::Validation(format!("Quantity must be positive, got {quantity}"))
            }
            StateError::InvalidTransition {
                entity,
                current,
                operation,
            } => Self::InvalidStateTransition {
                entity,
                current,
                operation: operation.to_string(),
            },
            StateError::InsufficientReserved {
                requested,
                reserved,
            } => Self::InvalidStateTransition {
                entity: EntityKind::Event,
                current: format!("reserved={reserved}"),
                operation: format!("release {requested} reserved tickets"),
            },
            StateError::CapacityExceeded {
                attempted,
                capacity,
            } => Self::InvalidStateTransition {
                entity: EntityKind::Event,
                current: format!("capacity={capacity}"),
                operation: format!("account for {attempted} tickets"),
            },
            StateError::Invariant { reason, .. } => Self::Validation(reason),
        }
    }
}

impl From<StoreError> for TicketingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConcurrentModification {
                entity,
                id,
                expected,
                actual,
            } => Self::ConcurrentModification {
                entity,
                id,
                expected,
                actual,
            },
            StoreError::Unavailable(reason) => Self::Store(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_available_maps_to_insufficient_tickets() {
        let err: TicketingError = StateError::InsufficientAvailable {
            requested: 4,
            available: 1,
        }
        .into();
        assert_eq!(
            err,
            TicketingError::InsufficientTickets {
                requested: 4,
                available: 1
            }
        );
    }

    #[test]
    fn store_conflict_is_retryable() {
        let err: TicketingError = StoreError::ConcurrentModification {
            entity: EntityKind::Event,
            id: "e-1".to_string(),
            expected: Version::new(3),
            actual: Some(Version::new(4)),
        }
        .into();
        assert!(err.is_concurrent_modification());
        assert_eq!(
            err.to_string(),
            "Concurrent modification of Event e-1: expected version 3, found 4"
        );
    }

    #[test]
    fn invalid_transition_keeps_context() {
        let err: TicketingError =
            StateError::invalid_transition(EntityKind::Ticket, "SOLD", "release").into();
        match err {
            TicketingError::InvalidStateTransition {
                entity,
                current,
                operation,
            } => {
                assert_eq!(entity, EntityKind::Ticket);
                assert_eq!(current, "SOLD");
                assert_eq!(operation, "release");
            }
            other => unreachable!("unexpected error {other:?}"),
        }
    }
}
