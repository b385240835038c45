//! Ticketing Engine Demo
//!
//! Walks through the engine on in-memory backends:
//! - Event creation with one ticket row per seat
//! - Purchase flow (reserve → queue → pending confirmation → sold)
//! - Hold expiry reclaimed by the reaper
//! - Complimentary grant
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=info,ticketing=debug cargo run --bin demo
//! ```

use boxoffice_core::{
    Clock, CustomerId, EventId, Order, OrderId, OrderStatus, TicketQuery, TicketStatus,
};
use boxoffice_testing::ManualClock;
use std::sync::Arc;
use std::time::Duration;
use ticketing::{Config, TicketingApp};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ticketing=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("\n🎫 ============================================");
    println!("   Ticketing Engine - Live Demo");
    println!("============================================\n");

    let config = Config::from_env();
    let hold = config.hold_ttl();

    // A hand-driven clock lets the expiry scenario skip ahead without waiting.
    let clock = ManualClock::starting_at(chrono::Utc::now());
    let mut app = TicketingApp::in_memory(config, Arc::new(clock.clone()))?;
    app.start()?;
    println!("✓ Application started\n");

    // ========== Scenario 1: purchase ==========

    println!("1️⃣  Creating event (capacity 10)...");
    let event = app
        .inventory
        .create_event("Summer Music Festival", clock.now(), "Main Stage", 10)
        .await?;
    println!("   ✓ Event created: {}\n", event.event_id);

    println!("2️⃣  Alice orders 3 tickets...");
    let order = app
        .orders
        .create_order(event.event_id, CustomerId::from("alice"), 3)
        .await?;
    print_inventory(&app, event.event_id).await?;

    println!("3️⃣  Waiting for the queue consumer to process the order...");
    let order = wait_until_processed(&app, order.order_id).await?;
    println!("   ✓ Order {} is {}\n", order.order_id, order.status);

    println!("4️⃣  Payment succeeded, confirming...");
    let order = app.orders.confirm_order(order.order_id).await?;
    println!("   ✓ Order {} is {}", order.order_id, order.status);
    print_inventory(&app, event.event_id).await?;

    // ========== Scenario 2: expiry ==========

    println!("5️⃣  Bob orders 3 tickets and walks away...");
    let abandoned = app
        .orders
        .create_order(event.event_id, CustomerId::from("bob"), 3)
        .await?;
    wait_until_processed(&app, abandoned.order_id).await?;
    print_inventory(&app, event.event_id).await?;

    println!("6️⃣  Skipping past the hold and sweeping...");
    clock.advance(hold + chrono::Duration::seconds(1));
    let reclaimed = app.reaper.sweep(clock.now()).await?;
    let abandoned = app.orders.get_order(abandoned.order_id).await?;
    println!("   ✓ Reclaimed {reclaimed} tickets");
    println!(
        "   ✓ Order {} is {} ({})",
        abandoned.order_id,
        abandoned.status,
        abandoned.failure_reason.as_deref().unwrap_or("-")
    );
    print_inventory(&app, event.event_id).await?;

    // ========== Scenario 3: complimentary ==========

    println!("7️⃣  Granting a complimentary ticket to the press...");
    let comp = app
        .complimentary
        .assign(event.event_id, &CustomerId::from("press"), "Festival review")
        .await?;
    println!("   ✓ Order {} is {}", comp.order_id, comp.status);
    print_inventory(&app, event.event_id).await?;

    app.shutdown().await;
    println!("✨ Demo completed successfully!");
    Ok(())
}

async fn print_inventory(app: &TicketingApp, event_id: EventId) -> Result<(), Box<dyn std::error::Error>> {
    let summary = app.inventory.availability(event_id).await?;
    println!("   📊 Inventory:");
    println!("      - Total capacity: {}", summary.total_capacity);
    println!("      - Available: {}", summary.available);
    println!("      - Reserved: {}", summary.reserved);
    println!("      - Complimentary: {}", summary.complimentary);
    println!("      - Sold: {}\n", summary.sold);
    Ok(())
}

/// Poll until the consumer has moved every ticket of the order to pending confirmation.
async fn wait_until_processed(app: &TicketingApp, order_id: OrderId) -> Result<Order, Box<dyn std::error::Error>> {
    for _ in 0..100 {
        let order = app.orders.get_order(order_id).await?;
        let tickets = app
            .environment()
            .tickets
            .query(TicketQuery::ByOrder(order_id))
            .await?;
        if order.status == OrderStatus::Processing
            && tickets.iter().all(|t| t.status == TicketStatus::PendingConfirmation)
        {
            return Ok(order);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Err(format!("order {order_id} was never processed").into())
}
