//! Ticketed events and their inventory counters.
//!
//! An [`Event`] snapshot carries the aggregate counters for one event:
//!
//! ```text
//! total_capacity = available + reserved + complimentary + sold
//! ```
//!
//! `sold` is never stored; it is whatever capacity is not accounted for by the
//! other three counters. Every transition below is pure: it validates against
//! the current snapshot and returns a new snapshot at the next version, leaving
//! `self` untouched so a retry can recompute from a freshly read copy.
//!
//! | Transition | available | reserved | complimentary | sold (derived) |
//! |------------|-----------|----------|---------------|----------------|
//! | `reserve(q)` | −q | +q | | |
//! | `release(q)` | +q | −q | | |
//! | `confirm_sale(q)` | | −q | | +q |
//! | `assign_complimentary(q)` | −q | | +q | |
//! | `confirm_complimentary(q)` | | −q | +q | |
//! | `revert_sale(q)` | | +q | | −q |
//! | `revert_complimentary(q)` | | +q | −q | |

use crate::error::{EntityKind, StateError};
use crate::ids::EventId;
use crate::version::Version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of a ticketed event and its inventory counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Event identifier
    pub event_id: EventId,
    /// Display name
    pub name: String,
    /// When the event takes place
    pub date: DateTime<Utc>,
    /// Venue
    pub location: String,
    /// Number of tickets that exist for this event
    pub total_capacity: u32,
    /// Tickets nobody holds
    pub available_tickets: u32,
    /// Tickets held by a reservation awaiting confirmation
    pub reserved_tickets: u32,
    /// Tickets granted free of charge
    pub complimentary_tickets: u32,
    /// Optimistic concurrency token
    pub version: Version,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last successful write
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Create a new event with every ticket available.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Invariant`] if the name or location is blank, and
    /// [`StateError::InvalidQuantity`] if the capacity is zero.
    pub fn new(
        event_id: EventId,
        name: impl Into<String>,
        date: DateTime<Utc>,
        location: impl Into<String>,
        total_capacity: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, StateError> {
        let name = name.into();
        let location = location.into();
        if name.trim().is_empty() {
            return Err(StateError::Invariant {
                entity: EntityKind::Event,
                reason: "name must not be blank".to_string(),
            });
        }
        if location.trim().is_empty() {
            return Err(StateError::Invariant {
                entity: EntityKind::Event,
                reason: "location must not be blank".to_string(),
            });
        }
        if total_capacity == 0 {
            return Err(StateError::InvalidQuantity(total_capacity));
        }

        Ok(Self {
            event_id,
            name,
            date,
            location,
            total_capacity,
            available_tickets: total_capacity,
            reserved_tickets: 0,
            complimentary_tickets: 0,
            version: Version::INITIAL,
            created_at: now,
            updated_at: now,
        })
    }

    /// Tickets that have been sold, derived from the stored counters.
    #[must_use]
    pub const fn sold_tickets(&self) -> u32 {
        self.total_capacity
            .saturating_sub(self.available_tickets)
            .saturating_sub(self.reserved_tickets)
            .saturating_sub(self.complimentary_tickets)
    }

    /// Whether the counters satisfy the at-rest invariants.
    ///
    /// `available <= capacity` and `available + reserved + complimentary <= capacity`.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.available_tickets <= self.total_capacity && self.accounted() <= u64::from(self.total_capacity)
    }

    /// Hold `quantity` available tickets for a reservation.
    ///
    /// # Errors
    ///
    /// [`StateError::InsufficientAvailable`] if fewer than `quantity` are available.
    pub fn reserve(&self, quantity: u32, now: DateTime<Utc>) -> Result<Self, StateError> {
        ensure_positive(quantity)?;
        let available = self.take_available(quantity)?;
        let mut next = self.advance(now);
        next.available_tickets = available;
        next.reserved_tickets = self.reserved_tickets.saturating_add(quantity);
        Ok(next)
    }

    /// Return `quantity` reserved tickets to the available pool.
    ///
    /// # Errors
    ///
    /// [`StateError::InsufficientReserved`] if fewer than `quantity` are reserved.
    pub fn release(&self, quantity: u32, now: DateTime<Utc>) -> Result<Self, StateError> {
        ensure_positive(quantity)?;
        let reserved = self.take_reserved(quantity)?;
        let mut next = self.advance(now);
        next.reserved_tickets = reserved;
        next.available_tickets = self.available_tickets.saturating_add(quantity);
        next.ensure_within_capacity()?;
        Ok(next)
    }

    /// Turn `quantity` reserved tickets into sales.
    ///
    /// Only `reserved` moves; the derived sold count rises by `quantity`.
    ///
    /// # Errors
    ///
    /// [`StateError::InsufficientReserved`] if fewer than `quantity` are reserved.
    pub fn confirm_sale(&self, quantity: u32, now: DateTime<Utc>) -> Result<Self, StateError> {
        ensure_positive(quantity)?;
        let reserved = self.take_reserved(quantity)?;
        let mut next = self.advance(now);
        next.reserved_tickets = reserved;
        Ok(next)
    }

    /// Grant `quantity` available tickets directly as complimentary.
    ///
    /// # Errors
    ///
    /// [`StateError::InsufficientAvailable`] if fewer than `quantity` are available.
    pub fn assign_complimentary(&self, quantity: u32, now: DateTime<Utc>) -> Result<Self, StateError> {
        ensure_positive(quantity)?;
        let available = self.take_available(quantity)?;
        let mut next = self.advance(now);
        next.available_tickets = available;
        next.complimentary_tickets = self.complimentary_tickets.saturating_add(quantity);
        Ok(next)
    }

    /// Turn `quantity` reserved tickets into complimentary ones.
    ///
    /// # Errors
    ///
    /// [`StateError::InsufficientReserved`] if fewer than `quantity` are reserved.
    pub fn confirm_complimentary(&self, quantity: u32, now: DateTime<Utc>) -> Result<Self, StateError> {
        ensure_positive(quantity)?;
        let reserved = self.take_reserved(quantity)?;
        let mut next = self.advance(now);
        next.reserved_tickets = reserved;
        next.complimentary_tickets = self.complimentary_tickets.saturating_add(quantity);
        Ok(next)
    }

    /// Undo a [`Event::confirm_sale`] whose ticket writes did not land.
    ///
    /// # Errors
    ///
    /// [`StateError::CapacityExceeded`] if fewer than `quantity` tickets are sold.
    pub fn revert_sale(&self, quantity: u32, now: DateTime<Utc>) -> Result<Self, StateError> {
        ensure_positive(quantity)?;
        let mut next = self.advance(now);
        next.reserved_tickets = self.reserved_tickets.saturating_add(quantity);
        next.ensure_within_capacity()?;
        Ok(next)
    }

    /// Undo a [`Event::confirm_complimentary`] whose ticket writes did not land.
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidTransition`] if fewer than `quantity` tickets are complimentary.
    pub fn revert_complimentary(&self, quantity: u32, now: DateTime<Utc>) -> Result<Self, StateError> {
        ensure_positive(quantity)?;
        let Some(complimentary) = self.complimentary_tickets.checked_sub(quantity) else {
            return Err(StateError::InvalidTransition {
                entity: EntityKind::Event,
                current: format!("complimentary={}", self.complimentary_tickets),
                operation: "revert complimentary",
            });
        };
        let mut next = self.advance(now);
        next.complimentary_tickets = complimentary;
        next.reserved_tickets = self.reserved_tickets.saturating_add(quantity);
        next.ensure_within_capacity()?;
        Ok(next)
    }

    /// Put `count` expired holds back on sale.
    ///
    /// Unlike [`Event::release`] this tolerates a reserved counter that is
    /// already lower than `count` (it floors at zero), because the reaper
    /// reconciles counters after the ticket rows were released.
    ///
    /// # Errors
    ///
    /// [`StateError::CapacityExceeded`] if the result would account for more
    /// tickets than the event has.
    pub fn reclaim_expired(&self, count: u32, now: DateTime<Utc>) -> Result<Self, StateError> {
        ensure_positive(count)?;
        let mut next = self.advance(now);
        next.available_tickets = self.available_tickets.saturating_add(count);
        next.reserved_tickets = self.reserved_tickets.saturating_sub(count);
        next.ensure_within_capacity()?;
        Ok(next)
    }

    /// Counter summary for read paths.
    #[must_use]
    pub const fn summary(&self) -> InventorySummary {
        InventorySummary {
            event_id: self.event_id,
            total_capacity: self.total_capacity,
            available: self.available_tickets,
            reserved: self.reserved_tickets,
            complimentary: self.complimentary_tickets,
            sold: self.sold_tickets(),
        }
    }

    fn accounted(&self) -> u64 {
        u64::from(self.available_tickets)
            + u64::from(self.reserved_tickets)
            + u64::from(self.complimentary_tickets)
    }

    fn advance(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.version = self.version.next();
        next.updated_at = now;
        next
    }

    const fn take_available(&self, quantity: u32) -> Result<u32, StateError> {
        match self.available_tickets.checked_sub(quantity) {
            Some(left) => Ok(left),
            None => Err(StateError::InsufficientAvailable {
                requested: quantity,
                available: self.available_tickets,
            }),
        }
    }

    const fn take_reserved(&self, quantity: u32) -> Result<u32, StateError> {
        match self.reserved_tickets.checked_sub(quantity) {
            Some(left) => Ok(left),
            None => Err(StateError::InsufficientReserved {
                requested: quantity,
                reserved: self.reserved_tickets,
            }),
        }
    }

    fn ensure_within_capacity(&self) -> Result<(), StateError> {
        if self.is_consistent() {
            Ok(())
        } else {
            Err(StateError::CapacityExceeded {
                attempted: self.accounted(),
                capacity: self.total_capacity,
            })
        }
    }
}

const fn ensure_positive(quantity: u32) -> Result<(), StateError> {
    if quantity == 0 {
        Err(StateError::InvalidQuantity(quantity))
    } else {
        Ok(())
    }
}

/// Read model of an event's inventory counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventorySummary {
    /// Event identifier
    pub event_id: EventId,
    /// Total capacity
    pub total_capacity: u32,
    /// Available tickets
    pub available: u32,
    /// Tickets on hold
    pub reserved: u32,
    /// Complimentary tickets
    pub complimentary: u32,
    /// Sold tickets (derived)
    pub sold: u32,
}
