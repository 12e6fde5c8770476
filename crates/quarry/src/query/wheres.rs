//! Where clause construction.

use quarry_common::{QuarryError, Result, Value};

use super::args::{ColumnArg, InValues, IntoSubQuery, Operand, SubQuery, WhereTuple};
use super::builder::Builder;
use super::clause::{Condition, DatePart, Term};
use super::helpers::{is_json_selector, snake_case, split_dynamic_finder};
use super::types::{BindingCategory, Boolean, ColumnRef, Expression, FulltextOptions};

/// Expands the `=` shorthand, explicit-operator and `or` forms of each
/// date-part comparison.
macro_rules! date_part_wheres {
    ($($part:expr => $and:ident, $and_op:ident, $or:ident, $or_op:ident;)*) => {
        $(
            pub fn $and(self, column: impl Into<ColumnRef>, value: impl Into<Operand>) -> Result<Self> {
                self.add_date_based_where($part, column.into(), None, value.into(), Boolean::And)
            }

            pub fn $and_op(
                self,
                column: impl Into<ColumnRef>,
                operator: &str,
                value: impl Into<Operand>,
            ) -> Result<Self> {
                self.add_date_based_where($part, column.into(), Some(operator), value.into(), Boolean::And)
            }

            pub fn $or(self, column: impl Into<ColumnRef>, value: impl Into<Operand>) -> Result<Self> {
                self.add_date_based_where($part, column.into(), None, value.into(), Boolean::Or)
            }

            pub fn $or_op(
                self,
                column: impl Into<ColumnRef>,
                operator: &str,
                value: impl Into<Operand>,
            ) -> Result<Self> {
                self.add_date_based_where($part, column.into(), Some(operator), value.into(), Boolean::Or)
            }
        )*
    };
}

impl Builder {
    // ------------------------------------------------------------------
    // Canonical entry point
    // ------------------------------------------------------------------

    /// Adds a where clause from any supported argument shape.
    ///
    /// With no operator and no value the column must be a callback (nested
    /// group), tuples, a key/value map or a raw expression. With a value and
    /// no operator, `=` is assumed.
    pub fn add_where(
        mut self,
        column: ColumnArg,
        operator: Option<&str>,
        value: Option<Operand>,
        boolean: Boolean,
        not: bool,
    ) -> Result<Self> {
        let column = match column {
            ColumnArg::Tuples(tuples) => {
                return self.add_array_of_wheres(tuples, Boolean::And, boolean, not)
            }
            ColumnArg::Map(pairs) => {
                let tuples = pairs
                    .into_iter()
                    .map(|(column, value)| WhereTuple {
                        column: ColumnArg::from(column),
                        operator: None,
                        value,
                        boolean: None,
                    })
                    .collect();
                return self.add_array_of_wheres(tuples, boolean, boolean, not);
            }
            ColumnArg::Query(sub) if operator.is_none() && value.is_none() => {
                return self.add_nested_where(sub, boolean, not)
            }
            ColumnArg::Column(ColumnRef::Expression(expression))
                if operator.is_none() && value.is_none() =>
            {
                self.registry
                    .wheres
                    .push(Condition::Expression { expression, boolean });
                return Ok(self);
            }
            other => other,
        };

        let value = value
            .ok_or_else(|| QuarryError::validation("A value is required for this where clause."))?;
        let (operator, value) = self.prepare_value_and_operator(operator, value)?;

        // A sub-query on the left is compiled in place as a parenthesized expression.
        let column = match column {
            ColumnArg::Column(column) => column,
            ColumnArg::Query(sub) => {
                let (sql, bindings) = self.create_sub(sub)?;
                self.push_bindings(bindings, BindingCategory::Where);
                ColumnRef::Expression(Expression::new(format!("({sql})")))
            }
            ColumnArg::Tuples(_) | ColumnArg::Map(_) => {
                return Err(QuarryError::validation(
                    "Array conditions do not accept an operator or value.",
                ))
            }
        };

        let value = match value {
            Operand::Query(sub) => return self.add_where_sub(column, operator, sub, boolean, not),
            Operand::Value(Value::Null) => {
                let negate = operator != "=";
                return Ok(self.push_null(column, boolean, not != negate));
            }
            Operand::Value(value) => Term::Value(value),
            Operand::Expression(expression) => Term::Expression(expression),
        };

        // JSON booleans compare against a literal, so they carry no binding.
        let json_boolean = match (&column, &value) {
            (ColumnRef::Name(name), Term::Value(Value::Bool(flag))) if is_json_selector(name) => {
                Some((name.clone(), *flag))
            }
            _ => None,
        };

        let condition = if let Some((column, flag)) = json_boolean {
            Condition::JsonBoolean {
                column,
                operator,
                value: flag,
                boolean,
                not,
            }
        } else if self.is_bitwise_operator(&operator) {
            self.push_term(&value);
            Condition::Bitwise {
                column,
                operator,
                value,
                boolean,
                not,
            }
        } else {
            self.push_term(&value);
            Condition::Basic {
                column,
                operator,
                value,
                boolean,
                not,
            }
        };

        self.registry.wheres.push(condition);
        Ok(self)
    }

    fn push_term(&mut self, term: &Term) {
        if let Some(value) = term.binding() {
            self.push_binding(value.clone(), BindingCategory::Where);
        }
    }

    fn push_null(mut self, column: ColumnRef, boolean: Boolean, not: bool) -> Self {
        self.registry.wheres.push(Condition::Null {
            column,
            boolean,
            not,
        });
        self
    }

    /// Folds each tuple through a nested group joined by `boolean`.
    fn add_array_of_wheres(
        self,
        tuples: Vec<WhereTuple>,
        inner_boolean: Boolean,
        boolean: Boolean,
        not: bool,
    ) -> Result<Self> {
        let mut nested = self.for_nested_where();
        for tuple in tuples {
            nested = nested.add_where(
                tuple.column,
                tuple.operator.as_deref(),
                Some(tuple.value),
                tuple.boolean.unwrap_or(inner_boolean),
                false,
            )?;
        }
        Ok(self.add_nested_where_query(nested, boolean, not))
    }

    fn add_nested_where(self, sub: SubQuery, boolean: Boolean, not: bool) -> Result<Self> {
        let query = match sub {
            SubQuery::Callback(callback) => callback(self.for_nested_where())?,
            SubQuery::Query(query) => *query,
        };
        Ok(self.add_nested_where_query(query, boolean, not))
    }

    /// Wraps `query` as a nested group. An empty group adds nothing.
    pub fn add_nested_where_query(mut self, query: Builder, boolean: Boolean, not: bool) -> Self {
        if query.registry.wheres.is_empty() {
            return self;
        }

        let bindings = query.registry.bindings.where_.clone();
        self.registry.wheres.push(Condition::Nested {
            query: Box::new(query.into_registry()),
            boolean,
            not,
        });
        self.push_bindings(bindings, BindingCategory::Where);
        self
    }

    fn add_where_sub(
        mut self,
        column: ColumnRef,
        operator: String,
        sub: SubQuery,
        boolean: Boolean,
        not: bool,
    ) -> Result<Self> {
        let query = sub.into_sub_query(&self)?;
        let bindings = query.get_bindings();
        self.registry.wheres.push(Condition::Sub {
            column,
            operator,
            query: Box::new(query.into_registry()),
            boolean,
            not,
        });
        self.push_bindings(bindings, BindingCategory::Where);
        Ok(self)
    }

    // ------------------------------------------------------------------
    // Basic
    // ------------------------------------------------------------------

    /// `column = value`.
    pub fn where_(self, column: impl Into<ColumnArg>, value: impl Into<Operand>) -> Result<Self> {
        self.add_where(column.into(), None, Some(value.into()), Boolean::And, false)
    }

    /// `column <operator> value`.
    pub fn where_op(
        self,
        column: impl Into<ColumnArg>,
        operator: &str,
        value: impl Into<Operand>,
    ) -> Result<Self> {
        self.add_where(column.into(), Some(operator), Some(value.into()), Boolean::And, false)
    }

    pub fn or_where(self, column: impl Into<ColumnArg>, value: impl Into<Operand>) -> Result<Self> {
        self.add_where(column.into(), None, Some(value.into()), Boolean::Or, false)
    }

    pub fn or_where_op(
        self,
        column: impl Into<ColumnArg>,
        operator: &str,
        value: impl Into<Operand>,
    ) -> Result<Self> {
        self.add_where(column.into(), Some(operator), Some(value.into()), Boolean::Or, false)
    }

    /// `not column <operator> value`.
    pub fn where_not_op(
        self,
        column: impl Into<ColumnArg>,
        operator: &str,
        value: impl Into<Operand>,
    ) -> Result<Self> {
        self.add_where(column.into(), Some(operator), Some(value.into()), Boolean::And, true)
    }

    /// Key/value equalities joined by `and`, grouped in parentheses.
    pub fn where_map<K, V>(self, pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: Into<String>,
        V: Into<Operand>,
    {
        let pairs = pairs
            .into_iter()
            .map(|(column, value)| (column.into(), value.into()))
            .collect();
        self.add_where(ColumnArg::Map(pairs), None, None, Boolean::And, false)
    }

    /// `(column, [operator,] value)` tuples grouped in parentheses.
    pub fn where_tuples<T: Into<WhereTuple>>(self, tuples: impl IntoIterator<Item = T>) -> Result<Self> {
        let tuples = tuples.into_iter().map(Into::into).collect();
        self.add_where(ColumnArg::Tuples(tuples), None, None, Boolean::And, false)
    }

    pub fn or_where_tuples<T: Into<WhereTuple>>(
        self,
        tuples: impl IntoIterator<Item = T>,
    ) -> Result<Self> {
        let tuples = tuples.into_iter().map(Into::into).collect();
        self.add_where(ColumnArg::Tuples(tuples), None, None, Boolean::Or, false)
    }

    /// Adds a parenthesized group built by `callback`.
    pub fn where_nested<F>(self, callback: F) -> Result<Self>
    where
        F: FnOnce(Builder) -> Result<Builder>,
    {
        let nested = callback(self.for_nested_where())?;
        Ok(self.add_nested_where_query(nested, Boolean::And, false))
    }

    pub fn or_where_nested<F>(self, callback: F) -> Result<Self>
    where
        F: FnOnce(Builder) -> Result<Builder>,
    {
        let nested = callback(self.for_nested_where())?;
        Ok(self.add_nested_where_query(nested, Boolean::Or, false))
    }

    /// Adds a negated parenthesized group built by `callback`.
    pub fn where_not<F>(self, callback: F) -> Result<Self>
    where
        F: FnOnce(Builder) -> Result<Builder>,
    {
        let nested = callback(self.for_nested_where())?;
        Ok(self.add_nested_where_query(nested, Boolean::And, true))
    }

    pub fn or_where_not<F>(self, callback: F) -> Result<Self>
    where
        F: FnOnce(Builder) -> Result<Builder>,
    {
        let nested = callback(self.for_nested_where())?;
        Ok(self.add_nested_where_query(nested, Boolean::Or, true))
    }

    /// `(c1 op value or c2 op value ...)`
    pub fn where_any(
        self,
        columns: &[&str],
        operator: &str,
        value: impl Into<Term>,
    ) -> Result<Self> {
        self.where_each(columns, operator, value.into(), Boolean::Or)
    }

    /// `(c1 op value and c2 op value ...)`
    pub fn where_all(
        self,
        columns: &[&str],
        operator: &str,
        value: impl Into<Term>,
    ) -> Result<Self> {
        self.where_each(columns, operator, value.into(), Boolean::And)
    }

    fn where_each(
        self,
        columns: &[&str],
        operator: &str,
        value: Term,
        inner: Boolean,
    ) -> Result<Self> {
        let mut nested = self.for_nested_where();
        for column in columns {
            nested = nested.add_where(
                ColumnArg::from(*column),
                Some(operator),
                Some(Operand::from(value.clone())),
                inner,
                false,
            )?;
        }
        Ok(self.add_nested_where_query(nested, Boolean::And, false))
    }

    // ------------------------------------------------------------------
    // Column comparison, raw
    // ------------------------------------------------------------------

    /// `first = second`, comparing two columns.
    pub fn where_column(self, first: impl Into<ColumnRef>, second: impl Into<ColumnRef>) -> Result<Self> {
        self.add_where_column(first.into(), "=", second.into(), Boolean::And)
    }

    pub fn where_column_op(
        self,
        first: impl Into<ColumnRef>,
        operator: &str,
        second: impl Into<ColumnRef>,
    ) -> Result<Self> {
        self.add_where_column(first.into(), operator, second.into(), Boolean::And)
    }

    pub fn or_where_column_op(
        self,
        first: impl Into<ColumnRef>,
        operator: &str,
        second: impl Into<ColumnRef>,
    ) -> Result<Self> {
        self.add_where_column(first.into(), operator, second.into(), Boolean::Or)
    }

    pub(crate) fn add_where_column(
        mut self,
        first: ColumnRef,
        operator: &str,
        second: ColumnRef,
        boolean: Boolean,
    ) -> Result<Self> {
        if !self.is_valid_operator(operator) {
            return Err(QuarryError::validation(format!(
                "Invalid operator [{operator}]."
            )));
        }

        self.registry.wheres.push(Condition::Column {
            first,
            operator: operator.to_string(),
            second,
            boolean,
            not: false,
        });
        Ok(self)
    }

    /// Appends raw SQL with its bindings.
    pub fn where_raw(mut self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.registry.wheres.push(Condition::Raw {
            sql: sql.into(),
            boolean: Boolean::And,
        });
        self.push_bindings(bindings, BindingCategory::Where);
        self
    }

    pub fn or_where_raw(mut self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.registry.wheres.push(Condition::Raw {
            sql: sql.into(),
            boolean: Boolean::Or,
        });
        self.push_bindings(bindings, BindingCategory::Where);
        self
    }

    /// Appends a raw expression used as a whole condition.
    pub fn where_expression(mut self, expression: Expression) -> Self {
        self.registry.wheres.push(Condition::Expression {
            expression,
            boolean: Boolean::And,
        });
        self
    }

    // ------------------------------------------------------------------
    // In
    // ------------------------------------------------------------------

    pub fn where_in(self, column: impl Into<ColumnRef>, values: impl Into<InValues>) -> Result<Self> {
        self.add_where_in(column.into(), values.into(), Boolean::And, false)
    }

    pub fn or_where_in(self, column: impl Into<ColumnRef>, values: impl Into<InValues>) -> Result<Self> {
        self.add_where_in(column.into(), values.into(), Boolean::Or, false)
    }

    pub fn where_not_in(self, column: impl Into<ColumnRef>, values: impl Into<InValues>) -> Result<Self> {
        self.add_where_in(column.into(), values.into(), Boolean::And, true)
    }

    pub fn or_where_not_in(
        self,
        column: impl Into<ColumnRef>,
        values: impl Into<InValues>,
    ) -> Result<Self> {
        self.add_where_in(column.into(), values.into(), Boolean::Or, true)
    }

    fn add_where_in(
        mut self,
        column: ColumnRef,
        values: InValues,
        boolean: Boolean,
        not: bool,
    ) -> Result<Self> {
        let values = match values {
            InValues::Query(sub) => {
                let (sql, bindings) = self.create_sub(sub)?;
                self.push_bindings(bindings, BindingCategory::Where);
                vec![Term::Expression(Expression::new(sql))]
            }
            InValues::List(values) => {
                if values
                    .iter()
                    .any(|term| matches!(term, Term::Value(Value::Array(_))))
                {
                    return Err(QuarryError::validation(
                        "Nested arrays may not be passed to whereIn method.",
                    ));
                }
                let bindings: Vec<Value> =
                    values.iter().filter_map(Term::binding).cloned().collect();
                self.push_bindings(bindings, BindingCategory::Where);
                values
            }
        };

        self.registry.wheres.push(Condition::In {
            column,
            values,
            boolean,
            not,
        });
        Ok(self)
    }

    /// `column in (1, 2, 3)` with the integers inlined instead of bound.
    pub fn where_integer_in_raw<V: Into<Value>>(
        self,
        column: impl Into<ColumnRef>,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self> {
        self.add_where_integer_in_raw(column.into(), values, Boolean::And, false)
    }

    pub fn where_integer_not_in_raw<V: Into<Value>>(
        self,
        column: impl Into<ColumnRef>,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self> {
        self.add_where_integer_in_raw(column.into(), values, Boolean::And, true)
    }

    fn add_where_integer_in_raw<V: Into<Value>>(
        mut self,
        column: ColumnRef,
        values: impl IntoIterator<Item = V>,
        boolean: Boolean,
        not: bool,
    ) -> Result<Self> {
        let mut integers = Vec::new();
        for value in values {
            let value = value.into();
            if matches!(value, Value::Array(_)) {
                return Err(QuarryError::validation(
                    "Nested arrays may not be passed to whereIn method.",
                ));
            }
            integers.push(value.coerce_i64());
        }

        self.registry.wheres.push(Condition::InRaw {
            column,
            values: integers,
            boolean,
            not,
        });
        Ok(self)
    }

    // ------------------------------------------------------------------
    // Null, between
    // ------------------------------------------------------------------

    pub fn where_null(self, column: impl Into<ColumnRef>) -> Self {
        self.push_null(column.into(), Boolean::And, false)
    }

    pub fn or_where_null(self, column: impl Into<ColumnRef>) -> Self {
        self.push_null(column.into(), Boolean::Or, false)
    }

    pub fn where_not_null(self, column: impl Into<ColumnRef>) -> Self {
        self.push_null(column.into(), Boolean::And, true)
    }

    pub fn or_where_not_null(self, column: impl Into<ColumnRef>) -> Self {
        self.push_null(column.into(), Boolean::Or, true)
    }

    pub fn where_between(
        self,
        column: impl Into<ColumnRef>,
        min: impl Into<Term>,
        max: impl Into<Term>,
    ) -> Self {
        self.add_where_between(column.into(), [min.into(), max.into()], Boolean::And, false)
    }

    pub fn or_where_between(
        self,
        column: impl Into<ColumnRef>,
        min: impl Into<Term>,
        max: impl Into<Term>,
    ) -> Self {
        self.add_where_between(column.into(), [min.into(), max.into()], Boolean::Or, false)
    }

    pub fn where_not_between(
        self,
        column: impl Into<ColumnRef>,
        min: impl Into<Term>,
        max: impl Into<Term>,
    ) -> Self {
        self.add_where_between(column.into(), [min.into(), max.into()], Boolean::And, true)
    }

    fn add_where_between(
        mut self,
        column: ColumnRef,
        values: [Term; 2],
        boolean: Boolean,
        not: bool,
    ) -> Self {
        for term in &values {
            self.push_term(term);
        }
        self.registry.wheres.push(Condition::Between {
            column,
            values,
            boolean,
            not,
        });
        self
    }

    /// `column between first and second`, comparing against other columns.
    pub fn where_between_columns(
        mut self,
        column: impl Into<ColumnRef>,
        first: impl Into<ColumnRef>,
        second: impl Into<ColumnRef>,
    ) -> Self {
        self.registry.wheres.push(Condition::BetweenColumns {
            column: column.into(),
            values: [first.into(), second.into()],
            boolean: Boolean::And,
            not: false,
        });
        self
    }

    pub fn where_not_between_columns(
        mut self,
        column: impl Into<ColumnRef>,
        first: impl Into<ColumnRef>,
        second: impl Into<ColumnRef>,
    ) -> Self {
        self.registry.wheres.push(Condition::BetweenColumns {
            column: column.into(),
            values: [first.into(), second.into()],
            boolean: Boolean::And,
            not: true,
        });
        self
    }

    // ------------------------------------------------------------------
    // Date parts
    // ------------------------------------------------------------------

    date_part_wheres! {
        DatePart::Date => where_date, where_date_op, or_where_date, or_where_date_op;
        DatePart::Time => where_time, where_time_op, or_where_time, or_where_time_op;
        DatePart::Day => where_day, where_day_op, or_where_day, or_where_day_op;
        DatePart::Month => where_month, where_month_op, or_where_month, or_where_month_op;
        DatePart::Year => where_year, where_year_op, or_where_year, or_where_year_op;
    }

    fn add_date_based_where(
        mut self,
        part: DatePart,
        column: ColumnRef,
        operator: Option<&str>,
        value: Operand,
        boolean: Boolean,
    ) -> Result<Self> {
        let (operator, value) = self.prepare_value_and_operator(operator, value)?;
        let value = match value {
            Operand::Expression(expression) => Term::Expression(expression),
            Operand::Value(value) => Term::Value(normalize_date_part(part, value)),
            Operand::Query(_) => {
                return Err(QuarryError::validation(
                    "Date comparisons do not accept a sub-query.",
                ))
            }
        };

        self.push_term(&value);
        self.registry.wheres.push(Condition::Date {
            part,
            column,
            operator,
            value,
            boolean,
            not: false,
        });
        Ok(self)
    }

    // ------------------------------------------------------------------
    // Exists, row values
    // ------------------------------------------------------------------

    pub fn where_exists(self, query: impl IntoSubQuery) -> Result<Self> {
        let query = query.into_sub_query(&self)?;
        Ok(self.add_where_exists_query(query, Boolean::And, false))
    }

    pub fn or_where_exists(self, query: impl IntoSubQuery) -> Result<Self> {
        let query = query.into_sub_query(&self)?;
        Ok(self.add_where_exists_query(query, Boolean::Or, false))
    }

    pub fn where_not_exists(self, query: impl IntoSubQuery) -> Result<Self> {
        let query = query.into_sub_query(&self)?;
        Ok(self.add_where_exists_query(query, Boolean::And, true))
    }

    pub fn or_where_not_exists(self, query: impl IntoSubQuery) -> Result<Self> {
        let query = query.into_sub_query(&self)?;
        Ok(self.add_where_exists_query(query, Boolean::Or, true))
    }

    /// Adds an `exists (...)` clause for a ready sub-query.
    pub fn add_where_exists_query(mut self, query: Builder, boolean: Boolean, not: bool) -> Self {
        let bindings = query.get_bindings();
        self.registry.wheres.push(Condition::Exists {
            query: Box::new(query.into_registry()),
            boolean,
            not,
        });
        self.push_bindings(bindings, BindingCategory::Where);
        self
    }

    /// `(c1, c2) <operator> (?, ?)`
    pub fn where_row_values<V: Into<Term>>(
        self,
        columns: &[&str],
        operator: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self> {
        self.add_where_row_values(columns, operator, values, Boolean::And)
    }

    pub fn or_where_row_values<V: Into<Term>>(
        self,
        columns: &[&str],
        operator: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self> {
        self.add_where_row_values(columns, operator, values, Boolean::Or)
    }

    fn add_where_row_values<V: Into<Term>>(
        mut self,
        columns: &[&str],
        operator: &str,
        values: impl IntoIterator<Item = V>,
        boolean: Boolean,
    ) -> Result<Self> {
        if !self.is_valid_operator(operator) {
            return Err(QuarryError::validation(format!(
                "Invalid operator [{operator}]."
            )));
        }

        let values: Vec<Term> = values.into_iter().map(Into::into).collect();
        if columns.len() != values.len() {
            return Err(QuarryError::validation(
                "The number of columns must match the number of values",
            ));
        }

        for term in &values {
            self.push_term(term);
        }
        self.registry.wheres.push(Condition::RowValues {
            columns: columns.iter().map(|c| ColumnRef::from(*c)).collect(),
            operator: operator.to_string(),
            values,
            boolean,
            not: false,
        });
        Ok(self)
    }

    // ------------------------------------------------------------------
    // JSON, full text
    // ------------------------------------------------------------------

    pub fn where_json_contains(self, column: &str, value: impl Into<Value>) -> Self {
        self.add_where_json_contains(column, value.into(), Boolean::And, false)
    }

    pub fn or_where_json_contains(self, column: &str, value: impl Into<Value>) -> Self {
        self.add_where_json_contains(column, value.into(), Boolean::Or, false)
    }

    pub fn where_json_doesnt_contain(self, column: &str, value: impl Into<Value>) -> Self {
        self.add_where_json_contains(column, value.into(), Boolean::And, true)
    }

    fn add_where_json_contains(
        mut self,
        column: &str,
        value: Value,
        boolean: Boolean,
        not: bool,
    ) -> Self {
        let binding = self.grammar().prepare_binding_for_json_contains(&value);
        self.push_binding(binding, BindingCategory::Where);
        self.registry.wheres.push(Condition::JsonContains {
            column: column.to_string(),
            value,
            boolean,
            not,
        });
        self
    }

    pub fn where_json_contains_key(mut self, column: &str) -> Self {
        self.registry.wheres.push(Condition::JsonContainsKey {
            column: column.to_string(),
            boolean: Boolean::And,
            not: false,
        });
        self
    }

    pub fn where_json_doesnt_contain_key(mut self, column: &str) -> Self {
        self.registry.wheres.push(Condition::JsonContainsKey {
            column: column.to_string(),
            boolean: Boolean::And,
            not: true,
        });
        self
    }

    pub fn where_json_length(
        mut self,
        column: &str,
        operator: &str,
        value: impl Into<Operand>,
    ) -> Result<Self> {
        let (operator, value) = self.prepare_value_and_operator(Some(operator), value.into())?;
        let value = match value {
            Operand::Value(value) => Term::Value(value),
            Operand::Expression(expression) => Term::Expression(expression),
            Operand::Query(_) => {
                return Err(QuarryError::validation(
                    "JSON length comparisons do not accept a sub-query.",
                ))
            }
        };

        self.push_term(&value);
        self.registry.wheres.push(Condition::JsonLength {
            column: column.to_string(),
            operator,
            value,
            boolean: Boolean::And,
            not: false,
        });
        Ok(self)
    }

    /// Full text match over `columns`.
    pub fn where_fulltext(
        mut self,
        columns: &[&str],
        value: impl Into<String>,
        options: FulltextOptions,
    ) -> Self {
        let value = value.into();
        self.push_binding(Value::String(value.clone()), BindingCategory::Where);
        self.registry.wheres.push(Condition::Fulltext {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            value,
            options,
            boolean: Boolean::And,
            not: false,
        });
        self
    }

    // ------------------------------------------------------------------
    // Dynamic
    // ------------------------------------------------------------------

    /// Builds equality predicates from a finder name such as
    /// `whereEmailAndNameNot`.
    ///
    /// The name is split on `And`/`Or` followed by an uppercase letter; each
    /// segment becomes a snake_cased column compared with the next parameter.
    /// A segment starting or ending with `Not` is negated.
    pub fn dynamic_where(mut self, method: &str, parameters: Vec<Value>) -> Result<Self> {
        let finder = method
            .strip_prefix("where")
            .filter(|rest| rest.starts_with(|c: char| c.is_ascii_uppercase()))
            .unwrap_or(method);

        let mut parameters = parameters.into_iter();
        let mut connector = Boolean::And;

        for segment in split_dynamic_finder(finder) {
            match segment {
                "And" => connector = Boolean::And,
                "Or" => connector = Boolean::Or,
                segment => {
                    let (segment, not) = strip_dynamic_not(segment);
                    let column = snake_case(segment);
                    let value = parameters.next().ok_or_else(|| {
                        QuarryError::validation(format!(
                            "Missing parameter for dynamic where [{column}]."
                        ))
                    })?;
                    self = self.add_where(
                        ColumnArg::from(column),
                        Some("="),
                        Some(Operand::Value(value)),
                        connector,
                        not,
                    )?;
                }
            }
        }

        Ok(self)
    }
}

fn strip_dynamic_not(segment: &str) -> (&str, bool) {
    if let Some(rest) = segment.strip_prefix("Not") {
        if rest.starts_with(|c: char| c.is_ascii_uppercase()) {
            return (rest, true);
        }
    }
    match segment.strip_suffix("Not") {
        Some(rest) if !rest.is_empty() => (rest, true),
        _ => (segment, false),
    }
}

fn normalize_date_part(part: DatePart, value: Value) -> Value {
    let format = match part {
        DatePart::Date => "%Y-%m-%d",
        DatePart::Time => "%H:%M:%S",
        DatePart::Year => "%Y",
        DatePart::Month => "%m",
        DatePart::Day => "%d",
    };

    match value {
        Value::Timestamp(ts) => Value::String(ts.format(format).to_string()),
        Value::TimestampTz(ts) => Value::String(ts.format(format).to_string()),
        Value::Date(date) if !matches!(part, DatePart::Time) => {
            Value::String(date.format(format).to_string())
        }
        Value::Int(n) if matches!(part, DatePart::Month | DatePart::Day) => {
            Value::String(format!("{n:02}"))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_dynamic_not() {
        assert_eq!(strip_dynamic_not("BarNot"), ("Bar", true));
        assert_eq!(strip_dynamic_not("NotBar"), ("Bar", true));
        assert_eq!(strip_dynamic_not("Note"), ("Note", false));
        assert_eq!(strip_dynamic_not("Not"), ("Not", false));
        assert_eq!(strip_dynamic_not("Email"), ("Email", false));
    }

    #[test]
    fn test_normalize_date_part() {
        assert_eq!(normalize_date_part(DatePart::Day, Value::Int(5)), Value::from("05"));
        assert_eq!(normalize_date_part(DatePart::Year, Value::Int(2024)), Value::Int(2024));

        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(normalize_date_part(DatePart::Date, Value::Date(date)), Value::from("2024-03-09"));
        assert_eq!(normalize_date_part(DatePart::Month, Value::Date(date)), Value::from("03"));
    }
}
