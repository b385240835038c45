//! Complimentary assignment tests.
//!
//! Run with: `cargo test --test complimentary_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use boxoffice_core::{CustomerId, EventId, OrderStatus, TicketStatus, TicketingError};
use common::Fixture;

fn press() -> CustomerId {
    CustomerId::from("press")
}

#[tokio::test]
async fn test_assign_grants_one_ticket_with_confirmed_order() {
    let fx = Fixture::new();
    let event = fx.event(5).await;

    let order = fx
        .app
        .complimentary
        .assign(event.event_id, &press(), "Festival review")
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Confirmed);
    assert_eq!(order.total_tickets, 1);
    assert_eq!(order.customer_id, press());
    assert!(order.processed_at.is_some());

    let ticket = fx.tickets.row(order.ticket_ids[0]).unwrap();
    assert_eq!(ticket.status, TicketStatus::Complimentary);
    assert_eq!(ticket.order_id, Some(order.order_id));
    assert_eq!(ticket.customer_id, Some(press()));

    let counters = fx.event_row(event.event_id);
    assert_eq!(counters.available_tickets, 4);
    assert_eq!(counters.complimentary_tickets, 1);
    fx.assert_consistent(event.event_id);
}

#[tokio::test]
async fn test_assign_validates_inputs() {
    let fx = Fixture::new();
    let event = fx.event(5).await;

    let blank_customer = fx
        .app
        .complimentary
        .assign(event.event_id, &CustomerId::from(""), "VIP")
        .await
        .unwrap_err();
    assert!(matches!(blank_customer, TicketingError::Validation(_)));

    let blank_reason = fx
        .app
        .complimentary
        .assign(event.event_id, &press(), "   ")
        .await
        .unwrap_err();
    assert!(matches!(blank_reason, TicketingError::Validation(_)));

    let missing = fx
        .app
        .complimentary
        .assign(EventId::new(), &press(), "VIP")
        .await
        .unwrap_err();
    assert!(matches!(missing, TicketingError::NotFound { .. }));
}

#[tokio::test]
async fn test_assign_on_sold_out_event() {
    let fx = Fixture::new();
    let event = fx.event(2).await;
    fx.processed_order(event.event_id, "alice", 2).await;

    let err = fx
        .app
        .complimentary
        .assign(event.event_id, &press(), "VIP")
        .await
        .unwrap_err();

    assert_eq!(
        err,
        TicketingError::InsufficientTickets {
            requested: 1,
            available: 0
        }
    );
    assert!(fx.orders.all().iter().all(|o| o.customer_id != press()));
}

#[tokio::test]
async fn test_assign_retries_a_lost_ticket_claim() {
    let fx = Fixture::new();
    let event = fx.event(3).await;
    fx.tickets.inject_conflicts(2);

    let order = fx
        .app
        .complimentary
        .assign(event.event_id, &press(), "Sponsor")
        .await
        .unwrap();

    assert_eq!(
        fx.tickets.row(order.ticket_ids[0]).unwrap().status,
        TicketStatus::Complimentary
    );
    assert_eq!(fx.count_status(event.event_id, TicketStatus::Complimentary), 1);
    fx.assert_consistent(event.event_id);
}

#[tokio::test]
async fn test_every_ticket_can_be_comped() {
    let fx = Fixture::new();
    let event = fx.event(3).await;

    for i in 0..3 {
        fx.app
            .complimentary
            .assign(event.event_id, &CustomerId::new(format!("guest-{i}")), "Crew")
            .await
            .unwrap();
    }

    let summary = fx.app.inventory.availability(event.event_id).await.unwrap();
    assert_eq!(summary.available, 0);
    assert_eq!(summary.complimentary, 3);
    assert_eq!(summary.sold, 0);
    fx.assert_consistent(event.event_id);
}
