//! Individual tickets and their lifecycle.
//!
//! ```text
//!                 reserve                begin_confirmation
//!   AVAILABLE ─────────────► RESERVED ─────────────────────► PENDING_CONFIRMATION
//!      ▲   │                    │                               │        │
//!      │   │ grant_complimentary│ release                 mark_sold  mark_complimentary
//!      │   ▼                    ▼                               ▼        ▼
//!      │ COMPLIMENTARY      AVAILABLE ◄──── release ────────   SOLD   COMPLIMENTARY
//! ```
//!
//! `SOLD` and `COMPLIMENTARY` are terminal. Every transition bumps the version.

use crate::error::{EntityKind, StateError};
use crate::ids::{CustomerId, EventId, OrderId, TicketId};
use crate::version::Version;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    /// On sale
    Available,
    /// Held by an order that has not been processed yet
    Reserved,
    /// Held by an order that is waiting for confirmation
    PendingConfirmation,
    /// Sold (terminal)
    Sold,
    /// Given away (terminal)
    Complimentary,
}

impl TicketStatus {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Sold | Self::Complimentary)
    }

    /// Whether the ticket is held by a reservation that can expire.
    #[must_use]
    pub const fn is_held(self) -> bool {
        matches!(self, Self::Reserved | Self::PendingConfirmation)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Available => "AVAILABLE",
            Self::Reserved => "RESERVED",
            Self::PendingConfirmation => "PENDING_CONFIRMATION",
            Self::Sold => "SOLD",
            Self::Complimentary => "COMPLIMENTARY",
        };
        f.write_str(s)
    }
}

/// Snapshot of a single ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    /// Ticket identifier
    pub ticket_id: TicketId,
    /// Owning event
    pub event_id: EventId,
    /// Lifecycle status
    pub status: TicketStatus,
    /// Holder or owner; set whenever the status is not `AVAILABLE`
    pub customer_id: Option<CustomerId>,
    /// Order holding or owning the ticket
    pub order_id: Option<OrderId>,
    /// When the current hold started
    pub reserved_at: Option<DateTime<Utc>>,
    /// When the current hold lapses; set while `RESERVED`/`PENDING_CONFIRMATION`
    pub reservation_expires_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token
    pub version: Version,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last successful write
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    /// Create an available ticket for an event.
    #[must_use]
    pub fn available(event_id: EventId, now: DateTime<Utc>) -> Self {
        Self {
            ticket_id: TicketId::new(),
            event_id,
            status: TicketStatus::Available,
            customer_id: None,
            order_id: None,
            reserved_at: None,
            reservation_expires_at: None,
            version: Version::INITIAL,
            created_at: now,
            updated_at: now,
        }
    }

    /// `AVAILABLE → RESERVED` for `customer_id` under `order_id`, held for `ttl`.
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidTransition`] unless the ticket is available.
    pub fn reserve(
        &self,
        customer_id: &CustomerId,
        order_id: OrderId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Self, StateError> {
        self.require(TicketStatus::Available, "reserve")?;
        let mut next = self.advance(now);
        next.status = TicketStatus::Reserved;
        next.customer_id = Some(customer_id.clone());
        next.order_id = Some(order_id);
        next.reserved_at = Some(now);
        next.reservation_expires_at = Some(now + ttl);
        Ok(next)
    }

    /// `RESERVED → PENDING_CONFIRMATION`, refreshing the hold to `now + ttl`.
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidTransition`] unless the ticket is reserved.
    pub fn begin_confirmation(&self, now: DateTime<Utc>, ttl: Duration) -> Result<Self, StateError> {
        self.require(TicketStatus::Reserved, "begin confirmation of")?;
        let mut next = self.advance(now);
        next.status = TicketStatus::PendingConfirmation;
        next.reservation_expires_at = Some(now + ttl);
        Ok(next)
    }

    /// `PENDING_CONFIRMATION → SOLD`.
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidTransition`] unless the ticket is pending confirmation.
    pub fn mark_sold(&self, now: DateTime<Utc>) -> Result<Self, StateError> {
        self.require(TicketStatus::PendingConfirmation, "sell")?;
        let mut next = self.advance(now);
        next.status = TicketStatus::Sold;
        next.reservation_expires_at = None;
        Ok(next)
    }

    /// `PENDING_CONFIRMATION → COMPLIMENTARY`.
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidTransition`] unless the ticket is pending confirmation.
    pub fn mark_complimentary(&self, now: DateTime<Utc>) -> Result<Self, StateError> {
        self.require(TicketStatus::PendingConfirmation, "comp")?;
        let mut next = self.advance(now);
        next.status = TicketStatus::Complimentary;
        next.reservation_expires_at = None;
        Ok(next)
    }

    /// `RESERVED | PENDING_CONFIRMATION → AVAILABLE`, dropping the holder.
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidTransition`] from `AVAILABLE` or a terminal status.
    pub fn release(&self, now: DateTime<Utc>) -> Result<Self, StateError> {
        if !self.status.is_held() {
            return Err(StateError::invalid_transition(
                EntityKind::Ticket,
                self.status,
                "release",
            ));
        }
        let mut next = self.advance(now);
        next.status = TicketStatus::Available;
        next.customer_id = None;
        next.order_id = None;
        next.reserved_at = None;
        next.reservation_expires_at = None;
        Ok(next)
    }

    /// `AVAILABLE → COMPLIMENTARY` directly, bypassing the reservation hold.
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidTransition`] unless the ticket is available.
    pub fn grant_complimentary(
        &self,
        customer_id: &CustomerId,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<Self, StateError> {
        self.require(TicketStatus::Available, "grant")?;
        let mut next = self.advance(now);
        next.status = TicketStatus::Complimentary;
        next.customer_id = Some(customer_id.clone());
        next.order_id = Some(order_id);
        next.reserved_at = None;
        next.reservation_expires_at = None;
        Ok(next)
    }

    /// Re-stamp the order reference on a held ticket.
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidTransition`] unless the ticket is held.
    pub fn assign_order(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<Self, StateError> {
        if !self.status.is_held() {
            return Err(StateError::invalid_transition(
                EntityKind::Ticket,
                self.status,
                "assign order to",
            ));
        }
        let mut next = self.advance(now);
        next.order_id = Some(order_id);
        Ok(next)
    }

    /// Whether the hold on this ticket lapsed strictly before `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status.is_held() && self.reservation_expires_at.is_some_and(|at| at < now)
    }

    /// Whether the snapshot satisfies the field invariants for its status.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        let holder_ok = matches!(self.status, TicketStatus::Available) || self.customer_id.is_some();
        let expiry_ok = !self.status.is_held() || self.reservation_expires_at.is_some();
        holder_ok && expiry_ok
    }

    fn require(&self, expected: TicketStatus, operation: &'static str) -> Result<(), StateError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(StateError::invalid_transition(
                EntityKind::Ticket,
                self.status,
                operation,
            ))
        }
    }

    fn advance(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.version = self.version.next();
        next.updated_at = now;
        next
    }
}
