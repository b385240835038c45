//! In-memory event, ticket and order stores.
//!
//! Each store keeps its rows in an `Arc<Mutex<HashMap>>`, so clones share
//! state and a test can inspect what the engine wrote. Conditional writes
//! compare versions under the lock, which makes them atomic with respect to
//! each other exactly like a real conditional put.
//!
//! # Fault injection
//!
//! - `inject_conflicts(n)`: the next `n` conditional writes fail with
//!   [`StoreError::ConcurrentModification`] without touching the rows
//! - `inject_outages(n)`: the next `n` writes of any kind fail with
//!   [`StoreError::Unavailable`]
//! - `yield_on_access()`: every call yields to the scheduler once before it
//!   runs, so concurrent callers interleave between reads and writes

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use boxoffice_core::error::EntityKind;
use boxoffice_core::event::Event;
use boxoffice_core::ids::{EventId, OrderId, TicketId};
use boxoffice_core::order::Order;
use boxoffice_core::store::{
    ConditionalWrite, EventStore, OrderQuery, OrderStore, StoreError, StoreFuture, TicketQuery,
    TicketStore,
};
use boxoffice_core::ticket::Ticket;
use boxoffice_core::version::Version;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

/// A row type the generic table can hold.
trait Record: Clone + Send + 'static {
    type Key: Copy + Eq + Hash + Display + Send + 'static;
    const KIND: EntityKind;

    fn key(&self) -> Self::Key;
    fn version(&self) -> Version;
}

impl Record for Event {
    type Key = EventId;
    const KIND: EntityKind = EntityKind::Event;

    fn key(&self) -> EventId {
        self.event_id
    }

    fn version(&self) -> Version {
        self.version
    }
}

impl Record for Ticket {
    type Key = TicketId;
    const KIND: EntityKind = EntityKind::Ticket;

    fn key(&self) -> TicketId {
        self.ticket_id
    }

    fn version(&self) -> Version {
        self.version
    }
}

impl Record for Order {
    type Key = OrderId;
    const KIND: EntityKind = EntityKind::Order;

    fn key(&self) -> OrderId {
        self.order_id
    }

    fn version(&self) -> Version {
        self.version
    }
}

struct TableState<R: Record> {
    rows: HashMap<R::Key, R>,
    conflicts: usize,
    outages: usize,
    writes: usize,
}

/// Shared storage and fault plan behind every in-memory store.
struct Table<R: Record> {
    state: Arc<Mutex<TableState<R>>>,
    yield_on_access: bool,
}

impl<R: Record> Clone for Table<R> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            yield_on_access: self.yield_on_access,
        }
    }
}

impl<R: Record> Table<R> {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TableState {
                rows: HashMap::new(),
                conflicts: 0,
                outages: 0,
                writes: 0,
            })),
            yield_on_access: false,
        }
    }

    /// Run `op` against the rows, after an optional scheduler yield.
    fn run<T, F>(&self, op: F) -> StoreFuture<'static, T>
    where
        T: Send + 'static,
        F: FnOnce(&mut TableState<R>) -> Result<T, StoreError> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let yield_first = self.yield_on_access;
        Box::pin(async move {
            if yield_first {
                tokio::task::yield_now().await;
            }
            let mut guard = state.lock().unwrap();
            op(&mut guard)
        })
    }

    fn get(&self, key: R::Key) -> StoreFuture<'static, Option<R>> {
        self.run(move |s| Ok(s.rows.get(&key).cloned()))
    }

    fn scan<P>(&self, predicate: P) -> StoreFuture<'static, Vec<R>>
    where
        P: Fn(&R) -> bool + Send + 'static,
    {
        self.run(move |s| Ok(s.rows.values().filter(|r| predicate(r)).cloned().collect()))
    }

    fn put(&self, record: R) -> StoreFuture<'static, R> {
        self.run(move |s| {
            s.begin_write()?;
            s.rows.insert(record.key(), record.clone());
            s.writes += 1;
            Ok(record)
        })
    }

    fn put_conditional(&self, record: R, expected: Version) -> StoreFuture<'static, R> {
        self.run(move |s| {
            s.begin_write()?;
            s.begin_conditional(record.key(), expected)?;
            s.check_version(record.key(), expected)?;
            s.rows.insert(record.key(), record.clone());
            s.writes += 1;
            Ok(record)
        })
    }

    fn batch_put(&self, records: Vec<R>) -> StoreFuture<'static, Vec<R>> {
        self.run(move |s| {
            s.begin_write()?;
            for record in &records {
                s.rows.insert(record.key(), record.clone());
            }
            s.writes += records.len();
            Ok(records)
        })
    }

    fn batch_put_conditional(&self, writes: Vec<ConditionalWrite<R>>) -> StoreFuture<'static, Vec<R>> {
        self.run(move |s| {
            s.begin_write()?;
            if let Some(first) = writes.first() {
                s.begin_conditional(first.record.key(), first.expected_version)?;
            }
            for write in &writes {
                s.check_version(write.record.key(), write.expected_version)?;
            }
            let records: Vec<R> = writes.into_iter().map(|w| w.record).collect();
            for record in &records {
                s.rows.insert(record.key(), record.clone());
            }
            s.writes += records.len();
            Ok(records)
        })
    }

    fn delete(&self, key: R::Key) -> StoreFuture<'static, ()> {
        self.run(move |s| {
            s.begin_write()?;
            if s.rows.remove(&key).is_some() {
                s.writes += 1;
            }
            Ok(())
        })
    }

    fn insert(&self, record: R) {
        let mut s = self.state.lock().unwrap();
        s.rows.insert(record.key(), record);
    }

    fn snapshot(&self) -> Vec<R> {
        self.state.lock().unwrap().rows.values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.state.lock().unwrap().rows.len()
    }

    fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    fn inject_conflicts(&self, n: usize) {
        self.state.lock().unwrap().conflicts = n;
    }

    fn inject_outages(&self, n: usize) {
        self.state.lock().unwrap().outages = n;
    }
}

impl<R: Record> TableState<R> {
    fn begin_write(&mut self) -> Result<(), StoreError> {
        if self.outages > 0 {
            self.outages -= 1;
            return Err(StoreError::Unavailable(format!("injected {} store outage", R::KIND)));
        }
        Ok(())
    }

    fn begin_conditional(&mut self, key: R::Key, expected: Version) -> Result<(), StoreError> {
        if self.conflicts > 0 {
            self.conflicts -= 1;
            return Err(StoreError::ConcurrentModification {
                entity: R::KIND,
                id: key.to_string(),
                expected,
                actual: self.rows.get(&key).map(Record::version),
            });
        }
        Ok(())
    }

    fn check_version(&self, key: R::Key, expected: Version) -> Result<(), StoreError> {
        let actual = self.rows.get(&key).map(Record::version);
        if actual == Some(expected) {
            Ok(())
        } else {
            Err(StoreError::ConcurrentModification {
                entity: R::KIND,
                id: key.to_string(),
                expected,
                actual,
            })
        }
    }
}

macro_rules! test_controls {
    ($store:ident, $record:ty, $key:ty) => {
        impl $store {
            /// Create an empty store.
            #[must_use]
            pub fn new() -> Self {
                Self { table: Table::new() }
            }

            /// Make every call yield once before touching the rows.
            #[must_use]
            pub fn yield_on_access(mut self) -> Self {
                self.table.yield_on_access = true;
                self
            }

            /// Fail the next `n` conditional writes with a version conflict.
            pub fn inject_conflicts(&self, n: usize) {
                self.table.inject_conflicts(n);
            }

            /// Fail the next `n` writes with [`StoreError::Unavailable`].
            pub fn inject_outages(&self, n: usize) {
                self.table.inject_outages(n);
            }

            /// Seed a row directly, bypassing fault injection and counters.
            pub fn insert(&self, record: $record) {
                self.table.insert(record);
            }

            /// Read a row synchronously.
            #[must_use]
            pub fn row(&self, key: $key) -> Option<$record> {
                self.table.state.lock().unwrap().rows.get(&key).cloned()
            }

            /// Every stored row, in no particular order.
            #[must_use]
            pub fn all(&self) -> Vec<$record> {
                self.table.snapshot()
            }

            /// Number of stored rows.
            #[must_use]
            pub fn len(&self) -> usize {
                self.table.len()
            }

            /// Whether the store is empty.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }

            /// Number of rows written or deleted so far.
            #[must_use]
            pub fn write_count(&self) -> usize {
                self.table.writes()
            }
        }

        impl Default for $store {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

/// In-memory [`EventStore`].
#[derive(Clone)]
pub struct InMemoryEventStore {
    table: Table<Event>,
}

test_controls!(InMemoryEventStore, Event, EventId);

impl EventStore for InMemoryEventStore {
    fn get(&self, event_id: EventId) -> StoreFuture<'_, Option<Event>> {
        self.table.get(event_id)
    }

    fn put(&self, event: Event) -> StoreFuture<'_, Event> {
        self.table.put(event)
    }

    fn put_conditional(&self, event: Event, expected: Version) -> StoreFuture<'_, Event> {
        self.table.put_conditional(event, expected)
    }

    fn delete(&self, event_id: EventId) -> StoreFuture<'_, ()> {
        self.table.delete(event_id)
    }
}

/// In-memory [`TicketStore`].
///
/// Query results are sorted by ticket id.
#[derive(Clone)]
pub struct InMemoryTicketStore {
    table: Table<Ticket>,
}

test_controls!(InMemoryTicketStore, Ticket, TicketId);

impl InMemoryTicketStore {
    /// Tickets of one event, sorted by id.
    #[must_use]
    pub fn for_event(&self, event_id: EventId) -> Vec<Ticket> {
        let mut tickets: Vec<Ticket> = self
            .all()
            .into_iter()
            .filter(|t| t.event_id == event_id)
            .collect();
        tickets.sort_by_key(|t| t.ticket_id);
        tickets
    }
}

impl TicketStore for InMemoryTicketStore {
    fn get(&self, ticket_id: TicketId) -> StoreFuture<'_, Option<Ticket>> {
        self.table.get(ticket_id)
    }

    fn put(&self, ticket: Ticket) -> StoreFuture<'_, Ticket> {
        self.table.put(ticket)
    }

    fn put_conditional(&self, ticket: Ticket, expected: Version) -> StoreFuture<'_, Ticket> {
        self.table.put_conditional(ticket, expected)
    }

    fn query(&self, query: TicketQuery) -> StoreFuture<'_, Vec<Ticket>> {
        let limit = match &query {
            TicketQuery::ByEventAndStatus { limit, .. } => *limit,
            _ => None,
        };
        let scan = self.table.scan(move |t: &Ticket| match &query {
            TicketQuery::ByEvent(event_id) => t.event_id == *event_id,
            TicketQuery::ByEventAndStatus {
                event_id, status, ..
            } => t.event_id == *event_id && t.status == *status,
            TicketQuery::ByCustomer(customer_id) => t.customer_id.as_ref() == Some(customer_id),
            TicketQuery::ByOrder(order_id) => t.order_id == Some(*order_id),
            TicketQuery::ExpiringBefore { statuses, cutoff } => {
                statuses.contains(&t.status)
                    && t.reservation_expires_at.is_some_and(|at| at < *cutoff)
            }
        });
        Box::pin(async move {
            let mut tickets = scan.await?;
            tickets.sort_by_key(|t| t.ticket_id);
            if let Some(limit) = limit {
                tickets.truncate(limit);
            }
            Ok(tickets)
        })
    }

    fn batch_put(&self, tickets: Vec<Ticket>) -> StoreFuture<'_, Vec<Ticket>> {
        self.table.batch_put(tickets)
    }

    fn batch_put_conditional(
        &self,
        writes: Vec<ConditionalWrite<Ticket>>,
    ) -> StoreFuture<'_, Vec<Ticket>> {
        self.table.batch_put_conditional(writes)
    }

    fn delete(&self, ticket_id: TicketId) -> StoreFuture<'_, ()> {
        self.table.delete(ticket_id)
    }
}

/// In-memory [`OrderStore`].
///
/// Query results are sorted by creation time, then id.
#[derive(Clone)]
pub struct InMemoryOrderStore {
    table: Table<Order>,
}

test_controls!(InMemoryOrderStore, Order, OrderId);

impl OrderStore for InMemoryOrderStore {
    fn get(&self, order_id: OrderId) -> StoreFuture<'_, Option<Order>> {
        self.table.get(order_id)
    }

    fn put(&self, order: Order) -> StoreFuture<'_, Order> {
        self.table.put(order)
    }

    fn put_conditional(&self, order: Order, expected: Version) -> StoreFuture<'_, Order> {
        self.table.put_conditional(order, expected)
    }

    fn query(&self, query: OrderQuery) -> StoreFuture<'_, Vec<Order>> {
        let scan = self.table.scan(move |o: &Order| match &query {
            OrderQuery::ByCustomer(customer_id) => o.customer_id == *customer_id,
        });
        Box::pin(async move {
            let mut orders = scan.await?;
            orders.sort_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.order_id.cmp(&b.order_id))
            });
            Ok(orders)
        })
    }

    fn delete(&self, order_id: OrderId) -> StoreFuture<'_, ()> {
        self.table.delete(order_id)
    }
}
