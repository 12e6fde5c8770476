//! Fluent SQL query builder with a resilient, transaction-aware connection
//! session.
//!
//! The crate has two halves:
//!
//! - A **query builder**: a [`Builder`] accumulates a declarative query in its
//!   [`Registry`](query::Registry), keeps bindings in nine ordered buckets and
//!   hands the result to a [`Grammar`] that compiles SQL for one dialect.
//! - A **connection session**: a [`Session`] runs compiled statements through
//!   a [`Driver`], retries once on a lost connection, nests transactions with
//!   savepoints, retries whole transactions on deadlocks, and reports every
//!   statement to the query log and an [`EventDispatcher`].
//!
//! # Architecture
//!
//! ```text
//!   Builder --compile--> Grammar (PostgresGrammar)
//!      |
//!   Session --run--> Driver (PgDriver, sqlx)
//!      |
//!   EventDispatcher / query log
//! ```
//!
//! # Usage Examples
//!
//! ```rust,ignore
//! use quarry::{Connection, ConnectionConfig, Record};
//!
//! # async fn example() -> quarry::Result<()> {
//! let connection = Connection::connect(ConnectionConfig::from_env()?).await?;
//! let mut session = connection.session();
//!
//! let adults = connection
//!     .table("users")
//!     .where_op("age", ">=", 18)?
//!     .order_by("name")
//!     .get(&mut session)
//!     .await?;
//!
//! session
//!     .transaction(
//!         |s| {
//!             Box::pin(async move {
//!                 let table = s.connection().table("audit");
//!                 table.insert(s, vec![Record::new().set("event", "seen")]).await?;
//!                 Ok(())
//!             })
//!         },
//!         3,
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod driver;
pub mod events;
pub mod grammar;
pub mod processor;
pub mod query;
pub mod session;
pub mod types;

pub use connection::{BeforeExecutingHook, Connection, ConnectionConfig, PoolConfig, RetryConfig};
pub use driver::{Driver, PgDriver, Target, TransactionHandle};
pub use events::{
    BroadcastDispatcher, Event, EventDispatcher, NullDispatcher, QueryExecuted, TransactionEvent,
};
pub use grammar::{Grammar, PostgresGrammar};
pub use processor::{PostgresProcessor, Processor};
pub use query::{
    raw, Boolean, Builder, ColumnArg, Expression, InValues, JoinClause, Operand, Record, SubQuery,
    UpsertUpdate,
};
pub use session::{LoggedQuery, Session};
pub use types::Row;

pub use quarry_common::{DriverError, DriverErrorKind, QuarryError, QueryError, Result, Value};
