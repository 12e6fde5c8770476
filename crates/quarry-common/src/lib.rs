//! Common types for quarry
//!
//! This crate provides the error taxonomy and the binding value type shared by
//! the query builder, the grammar and the connection session.

pub mod error;
pub mod value;

pub use error::{DriverError, DriverErrorKind, QuarryError, QueryError, Result};
pub use value::Value;
