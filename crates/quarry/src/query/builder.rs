//! Core builder struct, binding bookkeeping and compilation entry points.

use std::sync::Arc;

use quarry_common::{QuarryError, Result, Value};

use super::args::{IntoSubQuery, Operand};
use super::registry::{BeforeQueryCallback, Bindings, Registry, RegistryField};
use super::types::BindingCategory;
use crate::grammar::Grammar;
use crate::processor::Processor;

/// Operators accepted regardless of dialect.
pub const OPERATORS: &[&str] = &[
    "=", "<", ">", "<=", ">=", "<>", "!=", "<=>", "like", "like binary", "not like", "ilike",
    "&", "|", "^", "<<", ">>", "&~", "is", "is not", "rlike", "not rlike", "regexp",
    "not regexp", "~", "~*", "!~", "!~*", "similar to", "not similar to", "not ilike", "~~*",
    "!~~*",
];

/// Operators compiled as bitwise predicates regardless of dialect.
pub const BITWISE_OPERATORS: &[&str] = &["&", "|", "^", "<<", ">>", "&~"];

/// Fluent SQL query builder.
///
/// Every clause method consumes the builder and returns it, so calls chain.
/// Methods that can reject their input return `Result<Self>`.
///
/// # Examples
///
/// ```ignore
/// let mut query = connection
///     .table("users")
///     .where_("active", true)?
///     .where_op("age", ">=", 18)?
///     .order_by("name")
///     .limit(10);
///
/// let sql = query.to_sql()?;
/// // select * from "users" where "active" = ? and "age" >= ? order by "name" asc limit 10
/// ```
#[derive(Debug, Clone)]
pub struct Builder {
    pub(crate) registry: Registry,
    grammar: Arc<dyn Grammar>,
    processor: Arc<dyn Processor>,
    pub(crate) use_write_pdo: bool,
}

impl Builder {
    /// Creates an empty builder compiling with `grammar`.
    pub fn new(grammar: Arc<dyn Grammar>, processor: Arc<dyn Processor>) -> Self {
        Self {
            registry: Registry::default(),
            grammar,
            processor,
            use_write_pdo: false,
        }
    }

    /// Creates an empty builder sharing this builder's grammar and processor.
    pub fn new_query(&self) -> Builder {
        Builder::new(self.grammar.clone(), self.processor.clone())
    }

    /// Creates the builder handed to sub-query callbacks.
    pub fn for_sub_query(&self) -> Builder {
        self.new_query()
    }

    /// Creates the builder handed to nested-condition callbacks. It reads from
    /// the same table as this one.
    pub fn for_nested_where(&self) -> Builder {
        let mut query = self.new_query();
        query.registry.from = self.registry.from.clone();
        query
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn into_registry(self) -> Registry {
        self.registry
    }

    pub fn grammar(&self) -> &Arc<dyn Grammar> {
        &self.grammar
    }

    pub fn processor(&self) -> &Arc<dyn Processor> {
        &self.processor
    }

    /// Routes reads issued by this builder to the write connection.
    pub fn use_write_pdo(mut self) -> Self {
        self.use_write_pdo = true;
        self
    }

    // ------------------------------------------------------------------
    // Bindings
    // ------------------------------------------------------------------

    /// Returns every binding in placeholder order.
    pub fn get_bindings(&self) -> Vec<Value> {
        self.registry.bindings.flatten()
    }

    /// Returns the binding buckets.
    pub fn get_raw_bindings(&self) -> &Bindings {
        &self.registry.bindings
    }

    /// Replaces one binding bucket.
    pub fn set_bindings(mut self, values: Vec<Value>, category: BindingCategory) -> Self {
        *self.registry.bindings.get_mut(category) = values;
        self
    }

    /// Appends a binding to one bucket.
    pub fn add_binding(mut self, value: impl Into<Value>, category: BindingCategory) -> Self {
        self.push_binding(value.into(), category);
        self
    }

    /// Appends every bucket of `other` to the matching bucket here.
    pub fn merge_bindings(mut self, other: &Builder) -> Self {
        self.registry.bindings.merge(&other.registry.bindings);
        self
    }

    pub(crate) fn push_binding(&mut self, value: Value, category: BindingCategory) {
        self.registry.bindings.get_mut(category).push(value);
    }

    pub(crate) fn push_bindings(
        &mut self,
        values: impl IntoIterator<Item = Value>,
        category: BindingCategory,
    ) {
        self.registry.bindings.get_mut(category).extend(values);
    }

    // ------------------------------------------------------------------
    // Compilation
    // ------------------------------------------------------------------

    /// Compiles the select statement, running pending before-query callbacks first.
    pub fn to_sql(&mut self) -> Result<String> {
        self.apply_before_query_callbacks()?;
        self.grammar.compile_select(&self.registry)
    }

    /// Compiles the select statement with bindings inlined. For diagnostics only.
    pub fn to_raw_sql(&mut self) -> Result<String> {
        let sql = self.to_sql()?;
        self.grammar
            .substitute_bindings_into_raw_sql(&sql, &self.get_bindings())
    }

    /// Registers a mutation to run right before the query is compiled.
    pub fn before_query<F>(mut self, callback: F) -> Self
    where
        F: Fn(Builder) -> Result<Builder> + Send + Sync + 'static,
    {
        self.registry
            .before_query_callbacks
            .push(BeforeQueryCallback::new(callback));
        self
    }

    /// Runs and clears the before-query callbacks.
    pub fn apply_before_query_callbacks(&mut self) -> Result<()> {
        let callbacks = std::mem::take(&mut self.registry.before_query_callbacks);
        if callbacks.is_empty() {
            return Ok(());
        }

        let empty = self.new_query();
        let mut builder = std::mem::replace(self, empty);
        for callback in &callbacks {
            builder = callback.call(builder)?;
        }
        *self = builder;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cloning
    // ------------------------------------------------------------------

    /// Copies the builder, resetting the listed registry fields.
    pub fn clone_without(&self, fields: &[RegistryField]) -> Builder {
        Builder {
            registry: self.registry.clone_without(fields),
            ..self.clone_shell()
        }
    }

    /// Copies the builder, emptying the listed binding buckets.
    pub fn clone_without_bindings(&self, categories: &[BindingCategory]) -> Builder {
        Builder {
            registry: self.registry.clone_without_bindings(categories),
            ..self.clone_shell()
        }
    }

    fn clone_shell(&self) -> Builder {
        Builder {
            registry: Registry::default(),
            grammar: self.grammar.clone(),
            processor: self.processor.clone(),
            use_write_pdo: self.use_write_pdo,
        }
    }

    // ------------------------------------------------------------------
    // Shared helpers for clause methods
    // ------------------------------------------------------------------

    /// Resolves a sub-query and compiles it, returning its SQL and bindings.
    pub(crate) fn create_sub(&self, query: impl IntoSubQuery) -> Result<(String, Vec<Value>)> {
        let mut query = query.into_sub_query(self)?;
        let sql = query.to_sql()?;
        Ok((sql, query.get_bindings()))
    }

    pub(crate) fn is_valid_operator(&self, operator: &str) -> bool {
        let operator = operator.to_lowercase();
        OPERATORS.contains(&operator.as_str())
            || self.grammar.operators().contains(&operator.as_str())
    }

    pub(crate) fn is_bitwise_operator(&self, operator: &str) -> bool {
        let operator = operator.to_lowercase();
        BITWISE_OPERATORS.contains(&operator.as_str())
            || self.grammar.bitwise_operators().contains(&operator.as_str())
    }

    /// Applies the two-argument default and validates the operator/value pair.
    pub(crate) fn prepare_value_and_operator(
        &self,
        operator: Option<&str>,
        value: Operand,
    ) -> Result<(String, Operand)> {
        let Some(operator) = operator else {
            return Ok(("=".to_string(), value));
        };

        if !self.is_valid_operator(operator) {
            return Err(QuarryError::validation(format!(
                "Invalid operator [{operator}]."
            )));
        }

        if value.is_null() && !matches!(operator, "=" | "<>" | "!=") {
            return Err(QuarryError::validation(
                "Illegal operator and value combination.",
            ));
        }

        Ok((operator.to_string(), value))
    }
}
