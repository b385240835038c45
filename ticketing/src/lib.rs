//! Ticket inventory reservation and order lifecycle engine.
//!
//! Sells a finite pool of tickets per event under concurrent demand without
//! selling any ticket twice and without letting the event counters drift from
//! the ticket rows. There is no lock anywhere: every record carries a version,
//! every write is conditional on it, and multi-record changes that fail
//! half-way are undone by explicit compensating writes.
//!
//! # Architecture
//!
//! ```text
//!            create_order                    confirm_order / cancel_order
//!                 │                                    │
//!                 ▼                                    ▼
//!  ┌──────────────────────┐  publish  ┌───────┐  ┌──────────────┐
//!  │ ReservationService   │──────────►│ Queue │─►│ QueueConsumer │──► process_order
//!  └──────────────────────┘           └───────┘  └──────────────┘
//!                 │                                    │
//!                 ▼                                    ▼
//!  ┌──────────────────────────────────────────────────────────────┐
//!  │  EventStore (counters)   TicketStore (rows)   OrderStore     │
//!  └──────────────────────────────────────────────────────────────┘
//!                 ▲
//!                 │ every REAPER_INTERVAL_SECONDS
//!        ┌──────────────────┐
//!        │ ExpirationReaper │  lapsed holds → AVAILABLE, orders → CANCELLED
//!        └──────────────────┘
//! ```
//!
//! # Counter invariant
//!
//! ```text
//! sold = total_capacity - available - reserved - complimentary   (never negative)
//! ```
//!
//! # Usage
//!
//! ```
//! use boxoffice_core::{CustomerId, SystemClock};
//! use std::sync::Arc;
//! use ticketing::{Config, TicketingApp};
//!
//! # tokio_test::block_on(async {
//! let app = TicketingApp::in_memory(Config::default(), Arc::new(SystemClock)).unwrap();
//! let event = app
//!     .inventory
//!     .create_event("Concert", chrono::Utc::now(), "Main Hall", 10)
//!     .await
//!     .unwrap();
//!
//! let order = app
//!     .orders
//!     .create_order(event.event_id, CustomerId::from("alice"), 3)
//!     .await
//!     .unwrap();
//! app.orders.process_order(order.order_id).await.unwrap();
//! app.orders.confirm_order(order.order_id).await.unwrap();
//!
//! let summary = app.inventory.availability(event.event_id).await.unwrap();
//! assert_eq!((summary.available, summary.sold), (7, 3));
//! # });
//! ```

pub mod app;
pub mod complimentary;
pub mod config;
pub mod environment;
pub mod handlers;
pub mod inventory;
pub mod orders;
pub mod reaper;
pub mod reservation;

pub use app::{AppError, TicketingApp};
pub use complimentary::ComplimentaryService;
pub use config::{Config, ConfigError};
pub use environment::TicketingEnvironment;
pub use handlers::OrderProcessingHandler;
pub use inventory::InventoryService;
pub use orders::{MAX_RETRIES_EXCEEDED, OrderService};
pub use reaper::{ExpirationReaper, RESERVATION_EXPIRED};
pub use reservation::ReservationService;
