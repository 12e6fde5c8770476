//! JOIN clause support.
//!
//! The condition set of a join is an ordinary nested builder whose `from` is
//! the joined table, so every where method is available for `on` conditions.
//! The builder handed to a join callback adds `on`/`or_on` column comparisons.

use quarry_common::Result;

use super::args::{IntoSubQuery, Operand};
use super::builder::Builder;
use super::registry::Registry;
use super::types::{BindingCategory, Boolean, ColumnRef, Expression, JoinType, TableRef};

/// A join stored on the parent registry.
#[derive(Debug, Clone)]
pub struct JoinClause {
    pub join_type: JoinType,
    pub table: TableRef,
    /// Conditions compiled after `on`
    pub query: Box<Registry>,
}

impl Builder {
    /// Compares two columns in a join condition.
    pub fn on(self, first: impl Into<ColumnRef>, operator: &str, second: impl Into<ColumnRef>) -> Result<Self> {
        self.add_where_column(first.into(), operator, second.into(), Boolean::And)
    }

    pub fn or_on(
        self,
        first: impl Into<ColumnRef>,
        operator: &str,
        second: impl Into<ColumnRef>,
    ) -> Result<Self> {
        self.add_where_column(first.into(), operator, second.into(), Boolean::Or)
    }

    /// Adds a join whose conditions are built by `callback`.
    pub fn join_with<F>(mut self, join_type: JoinType, table: impl Into<TableRef>, callback: F) -> Result<Self>
    where
        F: FnOnce(Builder) -> Result<Builder>,
    {
        let table = table.into();
        let mut clause = self.new_query();
        clause.registry.from = Some(table.clone());
        let clause = callback(clause)?;

        let bindings = clause.get_bindings();
        self.registry.joins.push(JoinClause {
            join_type,
            table,
            query: Box::new(clause.into_registry()),
        });
        self.push_bindings(bindings, BindingCategory::Join);
        Ok(self)
    }

    /// `inner join table on first <operator> second`
    pub fn join(self, table: impl Into<TableRef>, first: &str, operator: &str, second: &str) -> Result<Self> {
        self.join_with(JoinType::Inner, table, |join| join.on(first, operator, second))
    }

    pub fn left_join(self, table: impl Into<TableRef>, first: &str, operator: &str, second: &str) -> Result<Self> {
        self.join_with(JoinType::Left, table, |join| join.on(first, operator, second))
    }

    pub fn right_join(self, table: impl Into<TableRef>, first: &str, operator: &str, second: &str) -> Result<Self> {
        self.join_with(JoinType::Right, table, |join| join.on(first, operator, second))
    }

    pub fn full_join(self, table: impl Into<TableRef>, first: &str, operator: &str, second: &str) -> Result<Self> {
        self.join_with(JoinType::Full, table, |join| join.on(first, operator, second))
    }

    /// `inner join table on first <operator> ?`, binding `value`.
    pub fn join_where(
        self,
        table: impl Into<TableRef>,
        first: &str,
        operator: &str,
        value: impl Into<Operand>,
    ) -> Result<Self> {
        let value = value.into();
        self.join_with(JoinType::Inner, table, |join| join.where_op(first, operator, value))
    }

    pub fn left_join_where(
        self,
        table: impl Into<TableRef>,
        first: &str,
        operator: &str,
        value: impl Into<Operand>,
    ) -> Result<Self> {
        let value = value.into();
        self.join_with(JoinType::Left, table, |join| join.where_op(first, operator, value))
    }

    pub fn cross_join(self, table: impl Into<TableRef>) -> Result<Self> {
        self.join_with(JoinType::Cross, table, Ok)
    }

    /// Joins a derived table under `alias`.
    pub fn join_sub(
        self,
        query: impl IntoSubQuery,
        alias: &str,
        first: &str,
        operator: &str,
        second: &str,
    ) -> Result<Self> {
        self.add_join_sub(JoinType::Inner, query, alias, first, operator, second)
    }

    pub fn left_join_sub(
        self,
        query: impl IntoSubQuery,
        alias: &str,
        first: &str,
        operator: &str,
        second: &str,
    ) -> Result<Self> {
        self.add_join_sub(JoinType::Left, query, alias, first, operator, second)
    }

    fn add_join_sub(
        mut self,
        join_type: JoinType,
        query: impl IntoSubQuery,
        alias: &str,
        first: &str,
        operator: &str,
        second: &str,
    ) -> Result<Self> {
        let (sql, bindings) = self.create_sub(query)?;
        let alias = self.grammar().wrap_table(&TableRef::from(alias));
        self.push_bindings(bindings, BindingCategory::Join);

        let table = TableRef::Expression(Expression::new(format!("({sql}) as {alias}")));
        self.join_with(join_type, table, |join| join.on(first, operator, second))
    }
}
