//! Reclaims tickets whose reservation hold lapsed.
//!
//! A sweep finds held tickets expiring before `now`, puts them back on sale
//! event by event, returns the counters with `reclaim_expired`, and cancels
//! the orders that were waiting on them. A failure on one event is logged and
//! the sweep moves on to the next.

use crate::config::ReaperConfig;
use crate::environment::TicketingEnvironment;
use crate::inventory::InventoryService;
use async_trait::async_trait;
use boxoffice_core::error::{Result, TicketingError};
use boxoffice_core::ids::{EventId, OrderId};
use boxoffice_core::order::OrderStatus;
use boxoffice_core::store::{ConditionalWrite, TicketQuery};
use boxoffice_core::ticket::{Ticket, TicketStatus};
use boxoffice_runtime::retry::{RetryPolicy, retry_with_predicate};
use boxoffice_runtime::{BoxError, PeriodicJob};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, warn};

/// Reason recorded on orders cancelled by the reaper.
pub const RESERVATION_EXPIRED: &str = "Reservation expired";

/// Expiration reaper.
#[derive(Clone)]
pub struct ExpirationReaper {
    env: TicketingEnvironment,
    inventory: InventoryService,
    retry: RetryPolicy,
    statuses: Vec<TicketStatus>,
}

impl ExpirationReaper {
    /// Create a reaper.
    ///
    /// `PENDING_CONFIRMATION` holds are always swept; `RESERVED` ones only
    /// when `config.sweep_reserved` is set.
    #[must_use]
    pub fn new(
        env: TicketingEnvironment,
        inventory: InventoryService,
        retry: RetryPolicy,
        config: &ReaperConfig,
    ) -> Self {
        let mut statuses = vec![TicketStatus::PendingConfirmation];
        if config.sweep_reserved {
            statuses.push(TicketStatus::Reserved);
        }
        Self {
            env,
            inventory,
            retry,
            statuses,
        }
    }

    /// Reclaim every hold that lapsed strictly before `now`.
    ///
    /// Returns the number of tickets put back on sale.
    ///
    /// # Errors
    ///
    /// [`TicketingError::Store`] if the expiry query fails. Failures on
    /// individual events or orders are logged and skipped.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired = self
            .env
            .tickets
            .query(TicketQuery::ExpiringBefore {
                statuses: self.statuses.clone(),
                cutoff: now,
            })
            .await?
            .into_iter()
            .filter(|t| t.is_expired(now))
            .collect::<Vec<_>>();

        if expired.is_empty() {
            debug!("No expired reservations");
            return Ok(0);
        }

        let mut by_event: BTreeMap<EventId, Vec<Ticket>> = BTreeMap::new();
        for ticket in expired {
            by_event.entry(ticket.event_id).or_default().push(ticket);
        }

        let mut reclaimed = 0;
        let mut orders = BTreeSet::new();
        for (event_id, tickets) in by_event {
            match self.reclaim_event(event_id, &tickets).await {
                Ok(count) => {
                    reclaimed += count;
                    orders.extend(tickets.iter().filter_map(|t| t.order_id));
                }
                Err(e) => {
                    warn!(%event_id, tickets = tickets.len(), error = %e, "Failed to reclaim expired tickets");
                }
            }
        }

        let mut cancelled = 0;
        for order_id in orders {
            match self.cancel_expired_order(order_id).await {
                Ok(true) => cancelled += 1,
                Ok(false) => {}
                Err(e) => error!(%order_id, error = %e, "Failed to cancel expired order"),
            }
        }

        info!(reclaimed, cancelled, "Expired reservations reclaimed");
        Ok(reclaimed)
    }

    async fn reclaim_event(&self, event_id: EventId, tickets: &[Ticket]) -> Result<usize> {
        let now = self.env.clock.now();
        let writes = tickets
            .iter()
            .map(|t| -> Result<ConditionalWrite<Ticket>> {
                Ok(ConditionalWrite::new(t.release(now)?, t.version))
            })
            .collect::<Result<Vec<_>>>()?;
        let released = self.env.tickets.batch_put_conditional(writes).await?;
        let count = u32::try_from(released.len()).unwrap_or(u32::MAX);

        if let Err(e) = self
            .inventory
            .update_counters(event_id, |event, now| event.reclaim_expired(count, now))
            .await
        {
            error!(
                %event_id,
                count,
                error = %e,
                "Expired tickets released but counters not reclaimed"
            );
        }

        debug!(%event_id, count, "Expired tickets released");
        Ok(released.len())
    }

    /// Cancel an order whose hold lapsed, unless it already moved on.
    ///
    /// Returns whether this call cancelled it.
    async fn cancel_expired_order(&self, order_id: OrderId) -> Result<bool> {
        retry_with_predicate(
            &self.retry,
            move || async move {
                let Some(order) = self.env.orders.get(order_id).await? else {
                    return Ok(false);
                };
                if !matches!(order.status, OrderStatus::Pending | OrderStatus::Processing) {
                    return Ok(false);
                }
                let cancelled = order.cancel(RESERVATION_EXPIRED, self.env.clock.now())?;
                self.env.orders.put_conditional(cancelled, order.version).await?;
                Ok::<_, TicketingError>(true)
            },
            TicketingError::is_concurrent_modification,
        )
        .await
    }
}

#[async_trait]
impl PeriodicJob for ExpirationReaper {
    fn name(&self) -> &'static str {
        "expiration-reaper"
    }

    async fn run_once(&self) -> std::result::Result<(), BoxError> {
        self.sweep(self.env.clock.now()).await?;
        Ok(())
    }
}
