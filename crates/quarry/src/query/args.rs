//! Argument shapes accepted by the fluent API.
//!
//! Predicate methods take one of these tagged enums instead of overloading on
//! arity. The builder matches on the variant and feeds one canonical code path
//! per clause family.

use std::fmt;

use quarry_common::{Result, Value};

use super::builder::Builder;
use super::clause::Term;
use super::types::{Boolean, ColumnRef, Expression};

/// A callback that shapes a fresh sub-builder.
pub type QueryFn = Box<dyn FnOnce(Builder) -> Result<Builder> + Send>;

/// Anything that can become a sub-query: a ready builder or a callback that
/// receives a fresh one.
pub trait IntoSubQuery {
    /// Produces the sub-query, creating it from `parent` when needed.
    fn into_sub_query(self, parent: &Builder) -> Result<Builder>;
}

impl IntoSubQuery for Builder {
    fn into_sub_query(self, _parent: &Builder) -> Result<Builder> {
        Ok(self)
    }
}

impl<F> IntoSubQuery for F
where
    F: FnOnce(Builder) -> Result<Builder>,
{
    fn into_sub_query(self, parent: &Builder) -> Result<Builder> {
        self(parent.for_sub_query())
    }
}

/// A sub-query held inside another argument.
pub enum SubQuery {
    Query(Box<Builder>),
    Callback(QueryFn),
}

impl SubQuery {
    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce(Builder) -> Result<Builder> + Send + 'static,
    {
        SubQuery::Callback(Box::new(f))
    }
}

impl IntoSubQuery for SubQuery {
    fn into_sub_query(self, parent: &Builder) -> Result<Builder> {
        match self {
            SubQuery::Query(query) => Ok(*query),
            SubQuery::Callback(f) => f(parent.for_sub_query()),
        }
    }
}

impl From<Builder> for SubQuery {
    fn from(query: Builder) -> Self {
        SubQuery::Query(Box::new(query))
    }
}

impl fmt::Debug for SubQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubQuery::Query(query) => f.debug_tuple("Query").field(query).finish(),
            SubQuery::Callback(_) => f.write_str("Callback"),
        }
    }
}

/// Left-hand side of a where/having call.
pub enum ColumnArg {
    /// A column name or raw expression
    Column(ColumnRef),
    /// A sub-query compared against the right-hand side
    Query(SubQuery),
    /// `[(column, operator?, value), ...]` folded into one nested group
    Tuples(Vec<WhereTuple>),
    /// `{column: value, ...}` folded into one nested group of equalities
    Map(Vec<(String, Operand)>),
}

impl ColumnArg {
    /// A callback left-hand side. Without an operator it becomes a nested
    /// group; with one it becomes a correlated sub-query comparison.
    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce(Builder) -> Result<Builder> + Send + 'static,
    {
        ColumnArg::Query(SubQuery::callback(f))
    }
}

impl From<&str> for ColumnArg {
    fn from(name: &str) -> Self {
        ColumnArg::Column(ColumnRef::from(name))
    }
}

impl From<String> for ColumnArg {
    fn from(name: String) -> Self {
        ColumnArg::Column(ColumnRef::from(name))
    }
}

impl From<Expression> for ColumnArg {
    fn from(expression: Expression) -> Self {
        ColumnArg::Column(ColumnRef::Expression(expression))
    }
}

impl From<ColumnRef> for ColumnArg {
    fn from(column: ColumnRef) -> Self {
        ColumnArg::Column(column)
    }
}

impl From<Builder> for ColumnArg {
    fn from(query: Builder) -> Self {
        ColumnArg::Query(SubQuery::from(query))
    }
}

impl From<Vec<WhereTuple>> for ColumnArg {
    fn from(tuples: Vec<WhereTuple>) -> Self {
        ColumnArg::Tuples(tuples)
    }
}

/// One entry of the array-of-tuples where form.
pub struct WhereTuple {
    pub column: ColumnArg,
    pub operator: Option<String>,
    pub value: Operand,
    pub boolean: Option<Boolean>,
}

impl<V: Into<Operand>> From<(&str, V)> for WhereTuple {
    fn from((column, value): (&str, V)) -> Self {
        WhereTuple {
            column: ColumnArg::from(column),
            operator: None,
            value: value.into(),
            boolean: None,
        }
    }
}

impl<V: Into<Operand>> From<(&str, &str, V)> for WhereTuple {
    fn from((column, operator, value): (&str, &str, V)) -> Self {
        WhereTuple {
            column: ColumnArg::from(column),
            operator: Some(operator.to_string()),
            value: value.into(),
            boolean: None,
        }
    }
}

impl<V: Into<Operand>> From<(&str, &str, V, Boolean)> for WhereTuple {
    fn from((column, operator, value, boolean): (&str, &str, V, Boolean)) -> Self {
        WhereTuple {
            column: ColumnArg::from(column),
            operator: Some(operator.to_string()),
            value: value.into(),
            boolean: Some(boolean),
        }
    }
}

/// Right-hand side of a where/having call.
pub enum Operand {
    Value(Value),
    Expression(Expression),
    Query(SubQuery),
}

impl Operand {
    /// A callback right-hand side, compiled as a sub-select.
    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce(Builder) -> Result<Builder> + Send + 'static,
    {
        Operand::Query(SubQuery::callback(f))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Operand::Value(Value::Null))
    }
}

impl From<Expression> for Operand {
    fn from(expression: Expression) -> Self {
        Operand::Expression(expression)
    }
}

impl From<Builder> for Operand {
    fn from(query: Builder) -> Self {
        Operand::Query(SubQuery::from(query))
    }
}

impl From<Term> for Operand {
    fn from(term: Term) -> Self {
        match term {
            Term::Value(value) => Operand::Value(value),
            Term::Expression(expression) => Operand::Expression(expression),
        }
    }
}

macro_rules! operand_from_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Operand {
                fn from(v: $ty) -> Self {
                    Operand::Value(Value::from(v))
                }
            }
        )*
    };
}

operand_from_value!(
    Value,
    bool,
    i32,
    i64,
    u32,
    f64,
    &str,
    String,
    uuid::Uuid,
    chrono::NaiveDate,
    chrono::NaiveTime,
    chrono::NaiveDateTime,
    chrono::DateTime<chrono::Utc>,
    serde_json::Value,
    rust_decimal::Decimal,
);

impl<T: Into<Value>> From<Option<T>> for Operand {
    fn from(v: Option<T>) -> Self {
        Operand::Value(Value::from(v))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Operand {
    fn from(v: Vec<T>) -> Self {
        Operand::Value(Value::from(v))
    }
}

/// Values for an `in` list.
pub enum InValues {
    List(Vec<Term>),
    Query(SubQuery),
}

impl InValues {
    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce(Builder) -> Result<Builder> + Send + 'static,
    {
        InValues::Query(SubQuery::callback(f))
    }
}

impl<T: Into<Value>> From<Vec<T>> for InValues {
    fn from(values: Vec<T>) -> Self {
        InValues::List(values.into_iter().map(|v| Term::Value(v.into())).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for InValues {
    fn from(values: [T; N]) -> Self {
        InValues::List(values.into_iter().map(|v| Term::Value(v.into())).collect())
    }
}

impl From<Builder> for InValues {
    fn from(query: Builder) -> Self {
        InValues::Query(SubQuery::from(query))
    }
}

/// A row of column/value pairs for insert and update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Term)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a column, replacing an earlier value for the same column.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Term>) -> Self {
        let column = column.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((column, value)),
        }
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Term> {
        self.fields.iter().map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Term)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Returns a copy with columns sorted by name.
    pub fn sorted(&self) -> Record {
        let mut fields = self.fields.clone();
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        Record { fields }
    }

    /// Overlays the columns of `other`, later values winning.
    pub fn merged(mut self, other: &Record) -> Record {
        for (column, value) in &other.fields {
            self = self.set(column.clone(), value.clone());
        }
        self
    }

    /// Bound values in column order, skipping raw expressions.
    pub fn bindings(&self) -> Vec<Value> {
        self.values().filter_map(Term::binding).cloned().collect()
    }
}

impl<K: Into<String>, V: Into<Term>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Record::new(), |record, (column, value)| record.set(column, value))
    }
}

/// A column updated when an upsert hits a conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertUpdate {
    /// Takes the value from the row that failed to insert
    Column(String),
    /// Sets an explicit value
    Value(String, Term),
}

impl From<&str> for UpsertUpdate {
    fn from(column: &str) -> Self {
        UpsertUpdate::Column(column.to_string())
    }
}

impl<V: Into<Term>> From<(&str, V)> for UpsertUpdate {
    fn from((column, value): (&str, V)) -> Self {
        UpsertUpdate::Value(column.to_string(), value.into())
    }
}
