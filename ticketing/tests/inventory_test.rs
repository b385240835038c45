//! Event creation, inventory reads and teardown tests.
//!
//! Run with: `cargo test --test inventory_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use boxoffice_core::{CustomerId, EntityKind, EventId, TicketStatus, TicketingError};
use boxoffice_testing::epoch;
use common::Fixture;

#[tokio::test]
async fn test_create_event_creates_one_ticket_per_seat() {
    let fx = Fixture::new();

    let event = fx
        .app
        .inventory
        .create_event("Opera Night", epoch(), "Grand Theatre", 25)
        .await
        .unwrap();

    assert_eq!(event.total_capacity, 25);
    assert_eq!(event.available_tickets, 25);
    assert_eq!(event.reserved_tickets, 0);
    assert_eq!(fx.app.inventory.get_event(event.event_id).await.unwrap(), event);
    assert_eq!(fx.count_status(event.event_id, TicketStatus::Available), 25);
    fx.assert_consistent(event.event_id);
}

#[tokio::test]
async fn test_create_event_validation() {
    let fx = Fixture::new();

    for (name, location, capacity) in [("", "Hall", 10), ("Gig", " ", 10), ("Gig", "Hall", 0)] {
        let err = fx
            .app
            .inventory
            .create_event(name, epoch(), location, capacity)
            .await
            .unwrap_err();
        assert!(matches!(err, TicketingError::Validation(_)), "{name:?} {location:?} {capacity}");
    }
    assert!(fx.events.is_empty());
    assert!(fx.tickets.is_empty());
}

#[tokio::test]
async fn test_failed_ticket_creation_removes_event() {
    let fx = Fixture::new();
    fx.tickets.inject_outages(1);

    let err = fx
        .app
        .inventory
        .create_event("Gig", epoch(), "Hall", 5)
        .await
        .unwrap_err();

    assert!(matches!(err, TicketingError::Store(_)));
    assert!(fx.events.is_empty());
    assert!(fx.tickets.is_empty());
}

#[tokio::test]
async fn test_get_unknown_event() {
    let fx = Fixture::new();
    let err = fx.app.inventory.get_event(EventId::new()).await.unwrap_err();
    assert!(matches!(
        err,
        TicketingError::NotFound {
            entity: EntityKind::Event,
            ..
        }
    ));
}

#[tokio::test]
async fn test_tickets_for_customer_spans_events() {
    let fx = Fixture::new();
    let first = fx.event(5).await;
    let second = fx.event(5).await;
    fx.processed_order(first.event_id, "alice", 2).await;
    fx.processed_order(second.event_id, "alice", 1).await;
    fx.processed_order(second.event_id, "bob", 1).await;

    let tickets = fx
        .app
        .inventory
        .tickets_for_customer(&CustomerId::from("alice"))
        .await
        .unwrap();

    assert_eq!(tickets.len(), 3);
    assert!(tickets.iter().all(|t| t.customer_id == Some(CustomerId::from("alice"))));
}

#[tokio::test]
async fn test_teardown_removes_event_and_tickets() {
    let fx = Fixture::new();
    let event = fx.event(4).await;
    let order = fx.processed_order(event.event_id, "alice", 1).await;
    fx.app.orders.confirm_order(order.order_id).await.unwrap();
    let other = fx.event(2).await;

    let removed = fx.app.inventory.teardown_event(event.event_id).await.unwrap();

    assert_eq!(removed, 4);
    assert!(fx.events.row(event.event_id).is_none());
    assert!(fx.tickets.for_event(event.event_id).is_empty());
    assert_eq!(fx.tickets.for_event(other.event_id).len(), 2);
}

#[tokio::test]
async fn test_teardown_refused_while_tickets_are_held() {
    let fx = Fixture::new();
    let event = fx.event(4).await;
    fx.processed_order(event.event_id, "alice", 1).await;

    let err = fx.app.inventory.teardown_event(event.event_id).await.unwrap_err();

    assert!(matches!(
        err,
        TicketingError::InvalidStateTransition {
            entity: EntityKind::Event,
            ..
        }
    ));
    assert_eq!(fx.tickets.for_event(event.event_id).len(), 4);
}
