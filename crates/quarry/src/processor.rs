//! Post-processing of raw result rows.

use std::fmt;

use quarry_common::Value;

use crate::query::Builder;
use crate::types::Row;

/// Shapes rows returned by the driver before the builder hands them out.
pub trait Processor: Send + Sync + fmt::Debug {
    /// Post-processes the rows of a select issued by `query`.
    fn process_select(&self, query: &Builder, rows: Vec<Row>) -> Vec<Row>;

    /// Extracts column names from the rows of a column listing query.
    fn process_column_listing(&self, rows: Vec<Row>) -> Vec<String>;
}

/// Row processor for PostgreSQL. Select rows pass through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresProcessor;

impl Processor for PostgresProcessor {
    fn process_select(&self, _query: &Builder, rows: Vec<Row>) -> Vec<Row> {
        rows
    }

    fn process_column_listing(&self, rows: Vec<Row>) -> Vec<String> {
        rows.into_iter()
            .filter_map(|row| match row.get("column_name").or_else(|| row.get_index(0)) {
                Some(Value::String(name)) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }
}
