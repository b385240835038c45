//! Application lifecycle tests: background workers over in-memory backends.
//!
//! Run with: `cargo test --test app_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use boxoffice_core::{CustomerId, OrderId, OrderStatus, TicketQuery, TicketStatus};
use boxoffice_testing::{ManualClock, epoch};
use std::sync::Arc;
use std::time::Duration;
use ticketing::{AppError, Config, ConfigError, TicketingApp};

fn app() -> (TicketingApp, ManualClock) {
    let clock = ManualClock::starting_at(epoch());
    let mut config = Config::default();
    config.retry.initial_delay = Duration::from_millis(1);
    config.retry.max_delay = Duration::from_millis(2);
    let app = TicketingApp::in_memory(config, Arc::new(clock.clone())).unwrap();
    (app, clock)
}

/// Wait until the consumer has moved the order and all of its tickets on.
async fn processed(app: &TicketingApp, order_id: OrderId) {
    let tickets = Arc::clone(&app.environment().tickets);
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let order = app.orders.get_order(order_id).await.unwrap();
            let held = tickets.query(TicketQuery::ByOrder(order_id)).await.unwrap();
            if order.status == OrderStatus::Processing
                && held.len() == order.ticket_ids.len()
                && held.iter().all(|t| t.status == TicketStatus::PendingConfirmation)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("order was not processed in time");
}

#[tokio::test]
async fn test_started_app_processes_queued_orders() {
    let (mut app, _clock) = app();
    app.start().unwrap();

    let event = app
        .inventory
        .create_event("Jazz Night", epoch() + chrono::Duration::days(7), "Club", 5)
        .await
        .unwrap();
    let order = app
        .orders
        .create_order(event.event_id, CustomerId::from("alice"), 2)
        .await
        .unwrap();

    processed(&app, order.order_id).await;
    app.orders.confirm_order(order.order_id).await.unwrap();

    let summary = app.inventory.availability(event.event_id).await.unwrap();
    assert_eq!(summary.available, 3);
    assert_eq!(summary.sold, 2);

    tokio::time::timeout(Duration::from_secs(5), app.shutdown())
        .await
        .expect("workers did not stop");
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let (mut app, _clock) = app();
    app.start().unwrap();

    assert!(matches!(app.start(), Err(AppError::AlreadyStarted)));

    app.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_without_start() {
    let (app, _clock) = app();
    tokio::time::timeout(Duration::from_secs(1), app.shutdown())
        .await
        .expect("shutdown blocked");
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = Config::default();
    config.processing.max_retries = 0;

    let err = TicketingApp::in_memory(config, Arc::new(ManualClock::starting_at(epoch())))
        .err()
        .unwrap();

    assert!(matches!(
        err,
        AppError::Config(ConfigError::Zero("ORDER_MAX_RETRIES"))
    ));
}
