//! Having clause construction.

use quarry_common::{QuarryError, Result, Value};

use super::args::Operand;
use super::builder::Builder;
use super::clause::{Condition, Term};
use super::types::{BindingCategory, Boolean, ColumnRef, Expression};

impl Builder {
    fn add_having(
        mut self,
        column: ColumnRef,
        operator: Option<&str>,
        value: Operand,
        boolean: Boolean,
    ) -> Result<Self> {
        let (operator, value) = self.prepare_value_and_operator(operator, value)?;

        let value = match value {
            Operand::Value(Value::Null) => {
                self.registry.havings.push(Condition::Null {
                    column,
                    boolean,
                    not: operator != "=",
                });
                return Ok(self);
            }
            Operand::Value(value) => Term::Value(value),
            Operand::Expression(expression) => Term::Expression(expression),
            Operand::Query(_) => {
                return Err(QuarryError::validation(
                    "Having clauses do not accept a sub-query.",
                ))
            }
        };

        if let Some(binding) = value.binding() {
            self.push_binding(binding.clone(), BindingCategory::Having);
        }

        let condition = if self.is_bitwise_operator(&operator) {
            Condition::Bitwise {
                column,
                operator,
                value,
                boolean,
                not: false,
            }
        } else {
            Condition::Basic {
                column,
                operator,
                value,
                boolean,
                not: false,
            }
        };
        self.registry.havings.push(condition);
        Ok(self)
    }

    /// `having column = value`.
    pub fn having(self, column: impl Into<ColumnRef>, value: impl Into<Operand>) -> Result<Self> {
        self.add_having(column.into(), None, value.into(), Boolean::And)
    }

    pub fn having_op(
        self,
        column: impl Into<ColumnRef>,
        operator: &str,
        value: impl Into<Operand>,
    ) -> Result<Self> {
        self.add_having(column.into(), Some(operator), value.into(), Boolean::And)
    }

    pub fn or_having(self, column: impl Into<ColumnRef>, value: impl Into<Operand>) -> Result<Self> {
        self.add_having(column.into(), None, value.into(), Boolean::Or)
    }

    pub fn or_having_op(
        self,
        column: impl Into<ColumnRef>,
        operator: &str,
        value: impl Into<Operand>,
    ) -> Result<Self> {
        self.add_having(column.into(), Some(operator), value.into(), Boolean::Or)
    }

    /// Appends a raw expression used as a whole having condition.
    pub fn having_expression(mut self, expression: Expression) -> Self {
        self.registry.havings.push(Condition::Expression {
            expression,
            boolean: Boolean::And,
        });
        self
    }

    /// Adds a parenthesized having group built by `callback`.
    pub fn having_nested<F>(self, callback: F) -> Result<Self>
    where
        F: FnOnce(Builder) -> Result<Builder>,
    {
        let nested = callback(self.for_nested_where())?;
        Ok(self.add_nested_having_query(nested, Boolean::And))
    }

    pub fn or_having_nested<F>(self, callback: F) -> Result<Self>
    where
        F: FnOnce(Builder) -> Result<Builder>,
    {
        let nested = callback(self.for_nested_where())?;
        Ok(self.add_nested_having_query(nested, Boolean::Or))
    }

    /// Wraps the havings of `query` as a group. An empty group adds nothing.
    pub fn add_nested_having_query(mut self, query: Builder, boolean: Boolean) -> Self {
        if query.registry.havings.is_empty() {
            return self;
        }

        let bindings = query.registry.bindings.having.clone();
        self.registry.havings.push(Condition::Nested {
            query: Box::new(query.into_registry()),
            boolean,
            not: false,
        });
        self.push_bindings(bindings, BindingCategory::Having);
        self
    }

    pub fn having_null(mut self, column: impl Into<ColumnRef>) -> Self {
        self.registry.havings.push(Condition::Null {
            column: column.into(),
            boolean: Boolean::And,
            not: false,
        });
        self
    }

    pub fn having_not_null(mut self, column: impl Into<ColumnRef>) -> Self {
        self.registry.havings.push(Condition::Null {
            column: column.into(),
            boolean: Boolean::And,
            not: true,
        });
        self
    }

    pub fn having_between(
        mut self,
        column: impl Into<ColumnRef>,
        min: impl Into<Term>,
        max: impl Into<Term>,
    ) -> Self {
        let values = [min.into(), max.into()];
        let bindings: Vec<Value> = values.iter().filter_map(Term::binding).cloned().collect();
        self.push_bindings(bindings, BindingCategory::Having);
        self.registry.havings.push(Condition::Between {
            column: column.into(),
            values,
            boolean: Boolean::And,
            not: false,
        });
        self
    }

    pub fn having_raw(mut self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.registry.havings.push(Condition::Raw {
            sql: sql.into(),
            boolean: Boolean::And,
        });
        self.push_bindings(bindings, BindingCategory::Having);
        self
    }

    pub fn or_having_raw(mut self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.registry.havings.push(Condition::Raw {
            sql: sql.into(),
            boolean: Boolean::Or,
        });
        self.push_bindings(bindings, BindingCategory::Having);
        self
    }
}
