//! Orders and their lifecycle.
//!
//! ```text
//! PENDING ──start_processing──► PROCESSING ──confirm──► CONFIRMED
//!    │                            │   ▲  │
//!    │                            │   └──┘ start_processing (redelivery)
//!    │                            └──fail──► FAILED
//!    └────────cancel──────────────┴────────► CANCELLED
//! ```
//!
//! `CONFIRMED`, `FAILED` and `CANCELLED` are terminal.

use crate::error::{EntityKind, StateError};
use crate::ids::{CustomerId, EventId, OrderId, TicketId};
use crate::version::Version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Default cap on the number of tickets in one order.
pub const DEFAULT_MAX_TICKETS_PER_ORDER: u32 = 10;

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created, tickets reserved, waiting for the processing pipeline
    Pending,
    /// Picked up by the processing pipeline
    Processing,
    /// Tickets sold or comped (terminal)
    Confirmed,
    /// Processing gave up (terminal)
    Failed,
    /// Cancelled by the customer or by hold expiry (terminal)
    Cancelled,
}

impl OrderStatus {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Confirmed => "CONFIRMED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Snapshot of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Order identifier
    pub order_id: OrderId,
    /// Event the tickets belong to
    pub event_id: EventId,
    /// Purchasing customer
    pub customer_id: CustomerId,
    /// Tickets held or owned by this order
    pub ticket_ids: Vec<TicketId>,
    /// Lifecycle status
    pub status: OrderStatus,
    /// Always `ticket_ids.len()`
    pub total_tickets: u32,
    /// Number of processing attempts so far
    pub retry_count: u32,
    /// Optimistic concurrency token
    pub version: Version,
    /// Why the order failed or was cancelled
    pub failure_reason: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last successful write
    pub updated_at: DateTime<Utc>,
    /// When the order was confirmed
    pub processed_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Create a `PENDING` order over reserved tickets.
    ///
    /// # Errors
    ///
    /// [`StateError::Invariant`] if `ticket_ids` is empty or has duplicates.
    pub fn pending(
        order_id: OrderId,
        event_id: EventId,
        customer_id: CustomerId,
        ticket_ids: Vec<TicketId>,
        now: DateTime<Utc>,
    ) -> Result<Self, StateError> {
        Self::build(order_id, event_id, customer_id, ticket_ids, OrderStatus::Pending, now)
    }

    /// Create an order that is `CONFIRMED` from the start (complimentary grants).
    ///
    /// # Errors
    ///
    /// [`StateError::Invariant`] if `ticket_ids` is empty or has duplicates.
    pub fn confirmed(
        order_id: OrderId,
        event_id: EventId,
        customer_id: CustomerId,
        ticket_ids: Vec<TicketId>,
        now: DateTime<Utc>,
    ) -> Result<Self, StateError> {
        let mut order =
            Self::build(order_id, event_id, customer_id, ticket_ids, OrderStatus::Confirmed, now)?;
        order.processed_at = Some(now);
        Ok(order)
    }

    fn build(
        order_id: OrderId,
        event_id: EventId,
        customer_id: CustomerId,
        ticket_ids: Vec<TicketId>,
        status: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<Self, StateError> {
        if ticket_ids.is_empty() {
            return Err(StateError::Invariant {
                entity: EntityKind::Order,
                reason: "an order needs at least one ticket".to_string(),
            });
        }
        let distinct: HashSet<_> = ticket_ids.iter().collect();
        if distinct.len() != ticket_ids.len() {
            return Err(StateError::Invariant {
                entity: EntityKind::Order,
                reason: "ticket ids must be distinct".to_string(),
            });
        }
        let total_tickets = u32::try_from(ticket_ids.len()).map_err(|_| StateError::Invariant {
            entity: EntityKind::Order,
            reason: "too many tickets".to_string(),
        })?;

        Ok(Self {
            order_id,
            event_id,
            customer_id,
            ticket_ids,
            status,
            total_tickets,
            retry_count: 0,
            version: Version::INITIAL,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
        })
    }

    /// `PENDING | PROCESSING → PROCESSING`, counting one more attempt.
    ///
    /// Re-entering `PROCESSING` is how a redelivered message records a retry.
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidTransition`] from a terminal status.
    pub fn start_processing(&self, now: DateTime<Utc>) -> Result<Self, StateError> {
        if self.status.is_terminal() {
            return Err(self.illegal("start processing"));
        }
        let mut next = self.advance(now);
        next.status = OrderStatus::Processing;
        next.retry_count = self.retry_count.saturating_add(1);
        Ok(next)
    }

    /// `PROCESSING → CONFIRMED`, stamping `processed_at`.
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidTransition`] unless the order is processing.
    pub fn confirm(&self, now: DateTime<Utc>) -> Result<Self, StateError> {
        if self.status != OrderStatus::Processing {
            return Err(self.illegal("confirm"));
        }
        let mut next = self.advance(now);
        next.status = OrderStatus::Confirmed;
        next.processed_at = Some(now);
        Ok(next)
    }

    /// `PROCESSING → FAILED` with a reason.
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidTransition`] unless the order is processing.
    pub fn fail(&self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<Self, StateError> {
        if self.status != OrderStatus::Processing {
            return Err(self.illegal("fail"));
        }
        let mut next = self.advance(now);
        next.status = OrderStatus::Failed;
        next.failure_reason = Some(reason.into());
        Ok(next)
    }

    /// `PENDING | PROCESSING → CANCELLED` with a reason.
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidTransition`] from a terminal status.
    pub fn cancel(&self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<Self, StateError> {
        if self.status.is_terminal() {
            return Err(self.illegal("cancel"));
        }
        let mut next = self.advance(now);
        next.status = OrderStatus::Cancelled;
        next.failure_reason = Some(reason.into());
        Ok(next)
    }

    /// Whether the order is in a terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether another processing attempt is allowed under `max_retries`.
    #[must_use]
    pub const fn has_retries_remaining(&self, max_retries: u32) -> bool {
        self.retry_count < max_retries
    }

    fn illegal(&self, operation: &'static str) -> StateError {
        StateError::invalid_transition(EntityKind::Order, self.status, operation)
    }

    fn advance(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.version = self.version.next();
        next.updated_at = now;
        next
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn pending(n: usize) -> Order {
        let tickets = (0..n).map(|_| TicketId::new()).collect();
        Order::pending(
            OrderId::new(),
            EventId::new(),
            CustomerId::new("cust-1"),
            tickets,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn pending_order_counts_tickets() {
        let order = pending(3);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total_tickets, 3);
        assert_eq!(order.retry_count, 0);
        assert!(order.version.is_initial());
    }

    #[test]
    fn empty_or_duplicate_tickets_are_rejected() {
        let now = Utc::now();
        let dup = TicketId::new();
        assert!(Order::pending(OrderId::new(), EventId::new(), CustomerId::new("c"), vec![], now).is_err());
        assert!(
            Order::pending(OrderId::new(), EventId::new(), CustomerId::new("c"), vec![dup, dup], now)
                .is_err()
        );
    }

    #[test]
    fn processing_increments_retry_count_each_time() {
        let now = Utc::now();
        let first = pending(1).start_processing(now).unwrap();
        let second = first.start_processing(now).unwrap();
        assert_eq!(first.status, OrderStatus::Processing);
        assert_eq!(first.retry_count, 1);
        assert_eq!(second.retry_count, 2);
        assert_eq!(second.version, Version::new(2));
        assert!(second.has_retries_remaining(3));
        assert!(!second.start_processing(now).unwrap().has_retries_remaining(3));
    }

    #[test]
    fn confirm_requires_processing() {
        let now = Utc::now();
        assert!(pending(1).confirm(now).is_err());

        let confirmed = pending(1).start_processing(now).unwrap().confirm(now).unwrap();
        assert_eq!(confirmed.status, OrderStatus::Confirmed);
        assert_eq!(confirmed.processed_at, Some(now));
    }

    #[test]
    fn fail_requires_processing() {
        let now = Utc::now();
        assert!(pending(1).fail("boom", now).is_err());

        let failed = pending(1).start_processing(now).unwrap().fail("boom", now).unwrap();
        assert_eq!(failed.status, OrderStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("boom"));
    }

    #[test]
    fn terminal_orders_stay_terminal() {
        let now = Utc::now();
        let cancelled = pending(2).cancel("Reservation expired", now).unwrap();
        assert!(cancelled.is_terminal());
        assert!(cancelled.start_processing(now).is_err());
        assert!(cancelled.cancel("again", now).is_err());
        assert!(cancelled.confirm(now).is_err());
        assert!(cancelled.fail("x", now).is_err());
    }

    #[test]
    fn complimentary_orders_start_confirmed() {
        let now = Utc::now();
        let order = Order::confirmed(
            OrderId::new(),
            EventId::new(),
            CustomerId::new("vip"),
            vec![TicketId::new()],
            now,
        )
        .unwrap();
        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(order.processed_at, Some(now));
    }
}
