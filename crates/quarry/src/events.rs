//! Query and transaction events.

use std::fmt;

use serde::Serialize;
use tokio::sync::broadcast;

use quarry_common::Value;

/// A statement that finished executing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryExecuted {
    pub connection_name: String,
    pub session_id: u64,
    pub sql: String,
    pub bindings: Vec<Value>,
    pub elapsed_ms: f64,
    pub in_transaction: bool,
}

/// Identifies the session a transaction event came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionEvent {
    pub connection_name: String,
    pub session_id: u64,
}

/// Events emitted by a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    QueryExecuted(QueryExecuted),
    TransactionBeginning(TransactionEvent),
    TransactionCommitting(TransactionEvent),
    TransactionCommitted(TransactionEvent),
    TransactionRolledBack(TransactionEvent),
}

impl Event {
    pub fn connection_name(&self) -> &str {
        match self {
            Event::QueryExecuted(event) => &event.connection_name,
            Event::TransactionBeginning(event)
            | Event::TransactionCommitting(event)
            | Event::TransactionCommitted(event)
            | Event::TransactionRolledBack(event) => &event.connection_name,
        }
    }

    pub fn session_id(&self) -> u64 {
        match self {
            Event::QueryExecuted(event) => event.session_id,
            Event::TransactionBeginning(event)
            | Event::TransactionCommitting(event)
            | Event::TransactionCommitted(event)
            | Event::TransactionRolledBack(event) => event.session_id,
        }
    }
}

/// Receives session events.
pub trait EventDispatcher: Send + Sync + fmt::Debug {
    fn dispatch(&self, event: Event);
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDispatcher;

impl EventDispatcher for NullDispatcher {
    fn dispatch(&self, _event: Event) {}
}

/// Fans events out to any number of subscribers.
///
/// Slow subscribers that fall more than `capacity` events behind lose the
/// oldest ones.
#[derive(Debug, Clone)]
pub struct BroadcastDispatcher {
    tx: broadcast::Sender<Event>,
}

impl BroadcastDispatcher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastDispatcher {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventDispatcher for BroadcastDispatcher {
    fn dispatch(&self, event: Event) {
        // No subscribers is not an error
        let _ = self.tx.send(event);
    }
}
