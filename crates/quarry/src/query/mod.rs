//! Fluent SQL query builder.
//!
//! A [`Builder`] accumulates a declarative description of a query in its
//! [`Registry`] and hands it to a [`Grammar`](crate::grammar::Grammar) to
//! compile. Bindings are kept in nine ordered buckets whose concatenation
//! matches the placeholder order of the compiled SQL.
//!
//! # Examples
//!
//! ```ignore
//! use quarry::query::raw;
//!
//! let mut query = connection
//!     .table("users")
//!     .select(["id", "name"])
//!     .where_op("age", ">=", 18)?
//!     .where_nested(|q| q.where_("role", "admin")?.or_where("role", "owner"))?
//!     .order_by_desc("created_at")
//!     .limit(10);
//!
//! let sql = query.to_sql()?;
//! // select "id", "name" from "users" where "age" >= ?
//! //   and ("role" = ? or "role" = ?) order by "created_at" desc limit 10
//! ```
//!
//! Executing a builder needs a [`Session`](crate::Session):
//!
//! ```ignore
//! let rows = query.get(&mut session).await?;
//! let total = connection.table("users").count(&mut session).await?;
//! ```

mod args;
mod builder;
mod clause;
mod execute;
mod having;
pub(crate) mod helpers;
mod join;
mod modify;
mod registry;
mod select;
mod types;
mod wheres;


pub use args::{
    ColumnArg, InValues, IntoSubQuery, Operand, QueryFn, Record, SubQuery, UpsertUpdate, WhereTuple,
};
pub use builder::{Builder, BITWISE_OPERATORS, OPERATORS};
pub use clause::{Condition, DatePart, HavingClause, Term, WhereClause};
pub use join::JoinClause;
pub use registry::{BeforeQueryCallback, Bindings, Registry, RegistryField};
pub use types::{
    raw, Aggregate, BindingCategory, Boolean, ColumnRef, Distinct, Expression, FulltextOptions,
    IndexHint, IndexHintKind, JoinType, LockMode, OrderDirection, OrderItem, SelectItem, TableRef,
    Union,
};
