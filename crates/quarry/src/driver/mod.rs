//! Database drivers.
//!
//! A [`Driver`] executes already-compiled SQL. Statements arrive with `?`
//! placeholders and their bindings in placeholder order; translating them to
//! the server's native placeholder syntax is the driver's job.

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;

use quarry_common::{DriverError, Value};

use crate::types::Row;

pub mod postgres;

pub use postgres::PgDriver;

/// Which handle a statement runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// The read replica, falling back to the write handle when there is none
    Read,
    Write,
}

/// Executes statements outside of a transaction.
#[async_trait]
pub trait Driver: Send + Sync + fmt::Debug {
    /// Runs a statement and returns every row.
    async fn fetch_all(
        &self,
        target: Target,
        sql: &str,
        bindings: &[Value],
    ) -> Result<Vec<Row>, DriverError>;

    /// Runs a statement on the write handle and returns the affected row count.
    async fn execute(&self, sql: &str, bindings: &[Value]) -> Result<u64, DriverError>;

    /// Runs raw SQL without preparing it. May contain several statements.
    async fn execute_unprepared(&self, sql: &str) -> Result<u64, DriverError>;

    /// Streams the rows of a statement one at a time.
    fn cursor(
        &self,
        target: Target,
        sql: String,
        bindings: Vec<Value>,
    ) -> BoxStream<'static, Result<Row, DriverError>>;

    /// Opens a transaction on a dedicated write connection.
    async fn begin(&self) -> Result<Box<dyn TransactionHandle>, DriverError>;

    /// Re-establishes connectivity after a lost connection.
    async fn reconnect(&self) -> Result<(), DriverError>;
}

/// An open transaction. Dropping it without committing rolls it back.
#[async_trait]
pub trait TransactionHandle: Send {
    async fn fetch_all(&mut self, sql: &str, bindings: &[Value]) -> Result<Vec<Row>, DriverError>;

    async fn execute(&mut self, sql: &str, bindings: &[Value]) -> Result<u64, DriverError>;

    async fn execute_unprepared(&mut self, sql: &str) -> Result<u64, DriverError>;

    async fn commit(self: Box<Self>) -> Result<(), DriverError>;

    async fn rollback(self: Box<Self>) -> Result<(), DriverError>;
}
