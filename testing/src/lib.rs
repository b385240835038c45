//! # Boxoffice Testing
//!
//! In-memory implementations of every environment trait in `boxoffice-core`.
//!
//! This crate provides:
//! - [`InMemoryEventStore`], [`InMemoryTicketStore`], [`InMemoryOrderStore`]:
//!   conditional writes, secondary-index queries, fault injection
//! - [`InMemoryOrderQueue`]: delayed delivery, visibility timeout, per-order
//!   FIFO groups and a dedup window
//! - [`FixedClock`] and [`ManualClock`]: deterministic time
//!
//! ## Example
//!
//! ```
//! use boxoffice_core::{Event, EventId, EventStore};
//! use boxoffice_testing::{InMemoryEventStore, epoch};
//!
//! # tokio_test::block_on(async {
//! let store = InMemoryEventStore::new();
//! let event = Event::new(EventId::new(), "Gig", epoch(), "Hall", 3, epoch()).unwrap();
//! store.put(event.clone()).await.unwrap();
//! assert_eq!(store.get(event.event_id).await.unwrap(), Some(event));
//! # });
//! ```

pub mod clock;
pub mod queue;
pub mod stores;

// Re-export commonly used items
pub use clock::{FixedClock, ManualClock, epoch, test_clock};
pub use queue::InMemoryOrderQueue;
pub use stores::{InMemoryEventStore, InMemoryOrderStore, InMemoryTicketStore};
