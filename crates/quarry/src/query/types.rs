//! Query builder types and enums.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use quarry_common::{QuarryError, Result};

use super::registry::Registry;

/// A raw SQL fragment that is emitted verbatim by the grammar.
///
/// The text is immutable, so clones share it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Expression(Arc<str>);

impl Expression {
    /// Creates a new raw expression.
    pub fn new(sql: impl Into<String>) -> Self {
        Self(Arc::from(sql.into()))
    }

    /// Returns the raw SQL text.
    pub fn value(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Expression").field(&self.value()).finish()
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

/// Shorthand for [`Expression::new`].
pub fn raw(sql: impl Into<String>) -> Expression {
    Expression::new(sql)
}

/// Logical connector placed in front of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Boolean {
    #[default]
    And,
    Or,
}

impl Boolean {
    /// Returns the SQL connector keyword.
    pub fn to_sql(&self) -> &'static str {
        match self {
            Boolean::And => "and",
            Boolean::Or => "or",
        }
    }
}

/// A column identifier or a raw expression standing in its place.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnRef {
    Name(String),
    Expression(Expression),
}

impl ColumnRef {
    /// Returns the column name, or `None` for raw expressions.
    pub fn name(&self) -> Option<&str> {
        match self {
            ColumnRef::Name(name) => Some(name),
            ColumnRef::Expression(_) => None,
        }
    }
}

impl From<&str> for ColumnRef {
    fn from(name: &str) -> Self {
        ColumnRef::Name(name.to_string())
    }
}

impl From<String> for ColumnRef {
    fn from(name: String) -> Self {
        ColumnRef::Name(name)
    }
}

impl From<&String> for ColumnRef {
    fn from(name: &String) -> Self {
        ColumnRef::Name(name.clone())
    }
}

impl From<Expression> for ColumnRef {
    fn from(expression: Expression) -> Self {
        ColumnRef::Expression(expression)
    }
}

/// An entry in the select list.
pub type SelectItem = ColumnRef;

/// The table (or derived table) a query reads from.
#[derive(Debug, Clone, PartialEq)]
pub enum TableRef {
    Name(String),
    Expression(Expression),
}

impl TableRef {
    /// Returns the table name, or `None` for raw expressions.
    pub fn name(&self) -> Option<&str> {
        match self {
            TableRef::Name(name) => Some(name),
            TableRef::Expression(_) => None,
        }
    }
}

impl From<&str> for TableRef {
    fn from(name: &str) -> Self {
        TableRef::Name(name.to_string())
    }
}

impl From<String> for TableRef {
    fn from(name: String) -> Self {
        TableRef::Name(name)
    }
}

impl From<Expression> for TableRef {
    fn from(expression: Expression) -> Self {
        TableRef::Expression(expression)
    }
}

/// Sort order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    /// Ascending order
    #[default]
    Asc,
    /// Descending order
    Desc,
}

impl OrderDirection {
    /// Returns the SQL order direction string.
    pub fn to_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "asc",
            OrderDirection::Desc => "desc",
        }
    }
}

impl FromStr for OrderDirection {
    type Err = QuarryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "asc" => Ok(OrderDirection::Asc),
            "desc" => Ok(OrderDirection::Desc),
            _ => Err(QuarryError::validation(
                "Order direction must be \"asc\" or \"desc\".",
            )),
        }
    }
}

/// An `order by` entry.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderItem {
    Raw(String),
    Column {
        column: ColumnRef,
        direction: OrderDirection,
    },
}

impl OrderItem {
    /// Returns the ordered column name for column entries.
    pub fn column_name(&self) -> Option<&str> {
        match self {
            OrderItem::Column { column, .. } => column.name(),
            OrderItem::Raw(_) => None,
        }
    }
}

/// Type of SQL JOIN
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    /// INNER JOIN
    Inner,
    /// LEFT JOIN
    Left,
    /// RIGHT JOIN
    Right,
    /// FULL JOIN
    Full,
    /// CROSS JOIN
    Cross,
}

impl JoinType {
    /// Returns the SQL JOIN type keyword.
    pub fn to_sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "inner",
            JoinType::Left => "left",
            JoinType::Right => "right",
            JoinType::Full => "full",
            JoinType::Cross => "cross",
        }
    }
}

/// Row locking requested for a select.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LockMode {
    #[default]
    None,
    /// `for share`
    Shared,
    /// `for update`
    Exclusive,
    /// Emitted verbatim
    Custom(String),
}

/// `distinct` state of a select.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Distinct {
    #[default]
    None,
    All,
    /// `distinct on (...)`
    On(Vec<String>),
}

impl Distinct {
    pub fn is_none(&self) -> bool {
        matches!(self, Distinct::None)
    }
}

/// Index hint kinds. Dialects without hint syntax ignore them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexHintKind {
    Use,
    Force,
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHint {
    pub kind: IndexHintKind,
    pub index: String,
}

/// A unioned query.
#[derive(Debug, Clone)]
pub struct Union {
    pub query: Box<Registry>,
    pub all: bool,
}

/// Aggregate replacing the select list.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub function: String,
    pub columns: Vec<ColumnRef>,
}

/// Options for full text predicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FulltextOptions {
    /// Text search configuration, `english` when unset
    pub language: Option<String>,
    /// `plain` (default), `phrase` or `websearch`
    pub mode: Option<String>,
}

/// The nine binding buckets, in placeholder order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingCategory {
    Select,
    From,
    Join,
    Where,
    GroupBy,
    Having,
    Order,
    Union,
    UnionOrder,
}

impl BindingCategory {
    /// All categories in the order their bindings are flattened.
    pub const ALL: [BindingCategory; 9] = [
        BindingCategory::Select,
        BindingCategory::From,
        BindingCategory::Join,
        BindingCategory::Where,
        BindingCategory::GroupBy,
        BindingCategory::Having,
        BindingCategory::Order,
        BindingCategory::Union,
        BindingCategory::UnionOrder,
    ];
}

impl FromStr for BindingCategory {
    type Err = QuarryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "select" => Ok(BindingCategory::Select),
            "from" => Ok(BindingCategory::From),
            "join" => Ok(BindingCategory::Join),
            "where" => Ok(BindingCategory::Where),
            "groupBy" | "group_by" => Ok(BindingCategory::GroupBy),
            "having" => Ok(BindingCategory::Having),
            "order" => Ok(BindingCategory::Order),
            "union" => Ok(BindingCategory::Union),
            "unionOrder" | "union_order" => Ok(BindingCategory::UnionOrder),
            other => Err(QuarryError::validation(format!(
                "Invalid binding type: {other}."
            ))),
        }
    }
}
