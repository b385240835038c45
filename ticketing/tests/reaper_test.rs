//! Expiration reaper tests.
//!
//! Run with: `cargo test --test reaper_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use boxoffice_core::{CustomerId, OrderStatus, TicketStatus};
use boxoffice_runtime::PeriodicJob;
use boxoffice_testing::epoch;
use common::{Fixture, test_config};
use ticketing::RESERVATION_EXPIRED;

#[tokio::test]
async fn test_sweep_reclaims_expired_reserved_tickets() {
    let fx = Fixture::new();
    let event = fx.event(10).await;
    let order = fx
        .app
        .orders
        .create_order(event.event_id, CustomerId::from("alice"), 3)
        .await
        .unwrap();

    fx.expire_holds();
    let reclaimed = fx.app.reaper.sweep(fx.clock_now()).await.unwrap();

    assert_eq!(reclaimed, 3);
    for ticket_id in &order.ticket_ids {
        let ticket = fx.tickets.row(*ticket_id).unwrap();
        assert_eq!(ticket.status, TicketStatus::Available);
        assert_eq!(ticket.customer_id, None);
        assert_eq!(ticket.reservation_expires_at, None);
    }

    let stored = fx.order_row(order.order_id);
    assert_eq!(stored.status, OrderStatus::Cancelled);
    assert_eq!(stored.failure_reason.as_deref(), Some(RESERVATION_EXPIRED));

    let counters = fx.event_row(event.event_id);
    assert_eq!(counters.available_tickets, 10);
    assert_eq!(counters.reserved_tickets, 0);
    fx.assert_consistent(event.event_id);
}

#[tokio::test]
async fn test_sweep_reclaims_expired_pending_confirmation_tickets() {
    let fx = Fixture::new();
    let event = fx.event(10).await;
    let order = fx.processed_order(event.event_id, "alice", 2).await;

    fx.expire_holds();
    let reclaimed = fx.app.reaper.sweep(fx.clock_now()).await.unwrap();

    assert_eq!(reclaimed, 2);
    assert_eq!(fx.order_row(order.order_id).status, OrderStatus::Cancelled);
    assert_eq!(fx.event_row(event.event_id).available_tickets, 10);
    fx.assert_consistent(event.event_id);
}

#[tokio::test]
async fn test_narrow_sweep_leaves_reserved_tickets() {
    let mut config = test_config();
    config.reaper.sweep_reserved = false;
    let fx = Fixture::with_config(config);
    let event = fx.event(10).await;

    let reserved = fx
        .app
        .orders
        .create_order(event.event_id, CustomerId::from("alice"), 2)
        .await
        .unwrap();
    let confirming = fx.processed_order(event.event_id, "bob", 3).await;

    fx.expire_holds();
    let reclaimed = fx.app.reaper.sweep(fx.clock_now()).await.unwrap();

    assert_eq!(reclaimed, 3);
    assert_eq!(fx.order_row(reserved.order_id).status, OrderStatus::Pending);
    assert_eq!(fx.order_row(confirming.order_id).status, OrderStatus::Cancelled);
    assert_eq!(fx.count_status(event.event_id, TicketStatus::Reserved), 2);
    fx.assert_consistent(event.event_id);
}

#[tokio::test]
async fn test_unexpired_holds_are_left_alone() {
    let fx = Fixture::new();
    let event = fx.event(10).await;
    fx.processed_order(event.event_id, "alice", 2).await;
    let writes = fx.tickets.write_count() + fx.orders.write_count();

    assert_eq!(fx.app.reaper.sweep(fx.clock_now()).await.unwrap(), 0);

    // Expiry is strict: a hold lapsing exactly at `now` survives.
    let at_expiry = epoch() + chrono::Duration::minutes(10);
    assert_eq!(fx.app.reaper.sweep(at_expiry).await.unwrap(), 0);

    assert_eq!(fx.tickets.write_count() + fx.orders.write_count(), writes);
}

#[tokio::test]
async fn test_terminal_orders_are_not_cancelled() {
    let fx = Fixture::new();
    let event = fx.event(10).await;
    let order = fx.processed_order(event.event_id, "alice", 2).await;

    let mut failed = fx.order_row(order.order_id);
    failed.status = OrderStatus::Failed;
    failed.failure_reason = Some("gateway down".to_string());
    fx.orders.insert(failed.clone());
    let order_writes = fx.orders.write_count();

    fx.expire_holds();
    assert_eq!(fx.app.reaper.sweep(fx.clock_now()).await.unwrap(), 2);

    assert_eq!(fx.order_row(order.order_id), failed);
    assert_eq!(fx.orders.write_count(), order_writes);
    fx.assert_consistent(event.event_id);
}

/// Test: a failure on one event is logged and the other events are still swept.
#[tokio::test]
async fn test_one_failing_event_does_not_stop_the_sweep() {
    let fx = Fixture::new();
    let first = fx.event(5).await;
    let second = fx.event(5).await;
    fx.processed_order(first.event_id, "alice", 2).await;
    fx.processed_order(second.event_id, "bob", 2).await;

    fx.expire_holds();
    fx.tickets.inject_conflicts(1);
    assert_eq!(fx.app.reaper.sweep(fx.clock_now()).await.unwrap(), 2);

    let held = fx.count_status(first.event_id, TicketStatus::PendingConfirmation)
        + fx.count_status(second.event_id, TicketStatus::PendingConfirmation);
    assert_eq!(held, 2);

    assert_eq!(fx.app.reaper.sweep(fx.clock_now()).await.unwrap(), 2);
    fx.assert_consistent(first.event_id);
    fx.assert_consistent(second.event_id);
}

#[tokio::test]
async fn test_reaper_runs_as_a_periodic_job() {
    let fx = Fixture::new();
    let event = fx.event(4).await;
    let order = fx.processed_order(event.event_id, "alice", 4).await;

    assert_eq!(fx.app.reaper.name(), "expiration-reaper");

    fx.expire_holds();
    fx.app.reaper.run_once().await.unwrap();

    assert_eq!(fx.order_row(order.order_id).status, OrderStatus::Cancelled);
    assert_eq!(fx.event_row(event.event_id).available_tickets, 4);
}
