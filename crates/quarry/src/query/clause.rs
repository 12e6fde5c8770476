//! Where/having clause variants.

use quarry_common::Value;

use super::registry::Registry;
use super::types::{Boolean, ColumnRef, Expression, FulltextOptions};

/// A stored right-hand operand: either a bound literal or raw SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Value(Value),
    Expression(Expression),
}

impl Term {
    /// Returns the binding carried by this term, if any.
    pub fn binding(&self) -> Option<&Value> {
        match self {
            Term::Value(value) => Some(value),
            Term::Expression(_) => None,
        }
    }
}

impl From<Expression> for Term {
    fn from(expression: Expression) -> Self {
        Term::Expression(expression)
    }
}

macro_rules! term_from_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Term {
                fn from(v: $ty) -> Self {
                    Term::Value(Value::from(v))
                }
            }
        )*
    };
}

term_from_value!(
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

impl<T: Into<Value>> From<Option<T>> for Term {
    fn from(v: Option<T>) -> Self {
        Term::Value(Value::from(v))
    }
}

/// Date part compared by the date family of predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePart {
    Date,
    Time,
    Year,
    Month,
    Day,
}

/// One where or having condition.
///
/// Every variant carries its own copy of any collection it holds, and
/// nested queries are owned registries, so cloning a condition never
/// aliases the source.
#[derive(Debug, Clone)]
pub enum Condition {
    Raw {
        sql: String,
        boolean: Boolean,
    },
    Expression {
        expression: Expression,
        boolean: Boolean,
    },
    Basic {
        column: ColumnRef,
        operator: String,
        value: Term,
        boolean: Boolean,
        not: bool,
    },
    Bitwise {
        column: ColumnRef,
        operator: String,
        value: Term,
        boolean: Boolean,
        not: bool,
    },
    JsonBoolean {
        column: String,
        operator: String,
        value: bool,
        boolean: Boolean,
        not: bool,
    },
    Column {
        first: ColumnRef,
        operator: String,
        second: ColumnRef,
        boolean: Boolean,
        not: bool,
    },
    In {
        column: ColumnRef,
        values: Vec<Term>,
        boolean: Boolean,
        not: bool,
    },
    InRaw {
        column: ColumnRef,
        values: Vec<i64>,
        boolean: Boolean,
        not: bool,
    },
    Null {
        column: ColumnRef,
        boolean: Boolean,
        not: bool,
    },
    Between {
        column: ColumnRef,
        values: [Term; 2],
        boolean: Boolean,
        not: bool,
    },
    BetweenColumns {
        column: ColumnRef,
        values: [ColumnRef; 2],
        boolean: Boolean,
        not: bool,
    },
    Date {
        part: DatePart,
        column: ColumnRef,
        operator: String,
        value: Term,
        boolean: Boolean,
        not: bool,
    },
    Nested {
        query: Box<Registry>,
        boolean: Boolean,
        not: bool,
    },
    Sub {
        column: ColumnRef,
        operator: String,
        query: Box<Registry>,
        boolean: Boolean,
        not: bool,
    },
    Exists {
        query: Box<Registry>,
        boolean: Boolean,
        not: bool,
    },
    RowValues {
        columns: Vec<ColumnRef>,
        operator: String,
        values: Vec<Term>,
        boolean: Boolean,
        not: bool,
    },
    JsonContains {
        column: String,
        value: Value,
        boolean: Boolean,
        not: bool,
    },
    JsonContainsKey {
        column: String,
        boolean: Boolean,
        not: bool,
    },
    JsonLength {
        column: String,
        operator: String,
        value: Term,
        boolean: Boolean,
        not: bool,
    },
    Fulltext {
        columns: Vec<String>,
        value: String,
        options: FulltextOptions,
        boolean: Boolean,
        not: bool,
    },
}

/// A where-clause entry.
pub type WhereClause = Condition;

/// A having-clause entry.
pub type HavingClause = Condition;

impl Condition {
    /// Returns the connector joining this condition to the previous one.
    pub fn boolean(&self) -> Boolean {
        match self {
            Condition::Raw { boolean, .. }
            | Condition::Expression { boolean, .. }
            | Condition::Basic { boolean, .. }
            | Condition::Bitwise { boolean, .. }
            | Condition::JsonBoolean { boolean, .. }
            | Condition::Column { boolean, .. }
            | Condition::In { boolean, .. }
            | Condition::InRaw { boolean, .. }
            | Condition::Null { boolean, .. }
            | Condition::Between { boolean, .. }
            | Condition::BetweenColumns { boolean, .. }
            | Condition::Date { boolean, .. }
            | Condition::Nested { boolean, .. }
            | Condition::Sub { boolean, .. }
            | Condition::Exists { boolean, .. }
            | Condition::RowValues { boolean, .. }
            | Condition::JsonContains { boolean, .. }
            | Condition::JsonContainsKey { boolean, .. }
            | Condition::JsonLength { boolean, .. }
            | Condition::Fulltext { boolean, .. } => *boolean,
        }
    }

    /// Returns the negation flag. Raw and expression conditions are never negated.
    pub fn is_negated(&self) -> bool {
        match self {
            Condition::Raw { .. } | Condition::Expression { .. } => false,
            Condition::Basic { not, .. }
            | Condition::Bitwise { not, .. }
            | Condition::JsonBoolean { not, .. }
            | Condition::Column { not, .. }
            | Condition::In { not, .. }
            | Condition::InRaw { not, .. }
            | Condition::Null { not, .. }
            | Condition::Between { not, .. }
            | Condition::BetweenColumns { not, .. }
            | Condition::Date { not, .. }
            | Condition::Nested { not, .. }
            | Condition::Sub { not, .. }
            | Condition::Exists { not, .. }
            | Condition::RowValues { not, .. }
            | Condition::JsonContains { not, .. }
            | Condition::JsonContainsKey { not, .. }
            | Condition::JsonLength { not, .. }
            | Condition::Fulltext { not, .. } => *not,
        }
    }

    /// Returns the column a single-column condition targets.
    pub fn column_name(&self) -> Option<&str> {
        match self {
            Condition::Basic { column, .. }
            | Condition::Bitwise { column, .. }
            | Condition::In { column, .. }
            | Condition::InRaw { column, .. }
            | Condition::Null { column, .. }
            | Condition::Between { column, .. }
            | Condition::Date { column, .. }
            | Condition::Sub { column, .. } => column.name(),
            Condition::JsonBoolean { column, .. }
            | Condition::JsonContains { column, .. }
            | Condition::JsonContainsKey { column, .. }
            | Condition::JsonLength { column, .. } => Some(column),
            _ => None,
        }
    }
}
