//! Select list, source table, grouping, ordering, paging, unions and locks.

use quarry_common::{QuarryError, Result, Value};

use super::args::IntoSubQuery;
use super::builder::Builder;
use super::types::{
    Aggregate, BindingCategory, ColumnRef, Distinct, Expression, IndexHint, IndexHintKind,
    LockMode, OrderDirection, OrderItem, TableRef, Union,
};

impl Builder {
    // ------------------------------------------------------------------
    // Select list
    // ------------------------------------------------------------------

    /// Replaces the select list.
    pub fn select<C: Into<ColumnRef>>(mut self, columns: impl IntoIterator<Item = C>) -> Self {
        self.registry.columns = Some(columns.into_iter().map(Into::into).collect());
        self.registry.bindings.select.clear();
        self
    }

    /// Appends columns to the select list, skipping ones already present.
    pub fn add_select<C: Into<ColumnRef>>(mut self, columns: impl IntoIterator<Item = C>) -> Self {
        let selected = self.registry.columns.get_or_insert_with(Vec::new);
        for column in columns {
            let column = column.into();
            if !selected.contains(&column) {
                selected.push(column);
            }
        }
        self
    }

    /// Appends a raw select expression with its bindings.
    pub fn select_raw(mut self, expression: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.registry
            .columns
            .get_or_insert_with(Vec::new)
            .push(ColumnRef::Expression(Expression::new(expression)));
        self.push_bindings(bindings, BindingCategory::Select);
        self
    }

    /// Selects a sub-query under `alias`.
    pub fn select_sub(self, query: impl IntoSubQuery, alias: &str) -> Result<Self> {
        let (sql, bindings) = self.create_sub(query)?;
        let alias = self.grammar().wrap(alias);
        Ok(self.select_raw(format!("({sql}) as {alias}"), bindings))
    }

    pub fn distinct(mut self) -> Self {
        self.registry.distinct = Distinct::All;
        self
    }

    /// `select distinct on (...)`
    pub fn distinct_on<C: Into<String>>(mut self, columns: impl IntoIterator<Item = C>) -> Self {
        self.registry.distinct = Distinct::On(columns.into_iter().map(Into::into).collect());
        self
    }

    // ------------------------------------------------------------------
    // Source
    // ------------------------------------------------------------------

    pub fn from(mut self, table: impl Into<TableRef>) -> Self {
        self.registry.from = Some(table.into());
        self
    }

    pub fn from_as(self, table: &str, alias: &str) -> Self {
        self.from(format!("{table} as {alias}"))
    }

    /// Reads from a derived table.
    pub fn from_sub(self, query: impl IntoSubQuery, alias: &str) -> Result<Self> {
        let (sql, bindings) = self.create_sub(query)?;
        let alias = self.grammar().wrap_table(&TableRef::from(alias));
        Ok(self.from_raw(format!("({sql}) as {alias}"), bindings))
    }

    pub fn from_raw(mut self, expression: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.registry.from = Some(TableRef::Expression(Expression::new(expression)));
        self.push_bindings(bindings, BindingCategory::From);
        self
    }

    pub fn use_index(mut self, index: impl Into<String>) -> Self {
        self.registry.index_hint = Some(IndexHint {
            kind: IndexHintKind::Use,
            index: index.into(),
        });
        self
    }

    pub fn force_index(mut self, index: impl Into<String>) -> Self {
        self.registry.index_hint = Some(IndexHint {
            kind: IndexHintKind::Force,
            index: index.into(),
        });
        self
    }

    pub fn ignore_index(mut self, index: impl Into<String>) -> Self {
        self.registry.index_hint = Some(IndexHint {
            kind: IndexHintKind::Ignore,
            index: index.into(),
        });
        self
    }

    // ------------------------------------------------------------------
    // Grouping
    // ------------------------------------------------------------------

    pub fn group_by<C: Into<ColumnRef>>(mut self, columns: impl IntoIterator<Item = C>) -> Self {
        self.registry
            .groups
            .extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn group_by_raw(mut self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.registry
            .groups
            .push(ColumnRef::Expression(Expression::new(sql)));
        self.push_bindings(bindings, BindingCategory::GroupBy);
        self
    }

    // ------------------------------------------------------------------
    // Ordering
    // ------------------------------------------------------------------

    fn order_category(&self) -> BindingCategory {
        if self.registry.unions.is_empty() {
            BindingCategory::Order
        } else {
            BindingCategory::UnionOrder
        }
    }

    fn push_order(&mut self, item: OrderItem) {
        if self.registry.unions.is_empty() {
            self.registry.orders.push(item);
        } else {
            self.registry.union_orders.push(item);
        }
    }

    /// Orders ascending by `column`.
    pub fn order_by(self, column: impl Into<ColumnRef>) -> Self {
        self.order_by_direction(column, OrderDirection::Asc)
    }

    pub fn order_by_desc(self, column: impl Into<ColumnRef>) -> Self {
        self.order_by_direction(column, OrderDirection::Desc)
    }

    pub fn order_by_direction(mut self, column: impl Into<ColumnRef>, direction: OrderDirection) -> Self {
        self.push_order(OrderItem::Column {
            column: column.into(),
            direction,
        });
        self
    }

    /// Orders by `column` with a textual direction, rejecting anything but `asc`/`desc`.
    pub fn order_by_dir(self, column: impl Into<ColumnRef>, direction: &str) -> Result<Self> {
        let direction = direction.parse::<OrderDirection>()?;
        Ok(self.order_by_direction(column, direction))
    }

    /// Orders by the result of a sub-query.
    pub fn order_by_sub(mut self, query: impl IntoSubQuery, direction: OrderDirection) -> Result<Self> {
        let (sql, bindings) = self.create_sub(query)?;
        let category = self.order_category();
        self.push_bindings(bindings, category);
        Ok(self.order_by_direction(Expression::new(format!("({sql})")), direction))
    }

    /// Newest first by `created_at`.
    pub fn latest(self) -> Self {
        self.order_by_desc("created_at")
    }

    pub fn latest_by(self, column: impl Into<ColumnRef>) -> Self {
        self.order_by_desc(column)
    }

    /// Oldest first by `created_at`.
    pub fn oldest(self) -> Self {
        self.order_by("created_at")
    }

    pub fn oldest_by(self, column: impl Into<ColumnRef>) -> Self {
        self.order_by(column)
    }

    pub fn in_random_order(self, seed: Option<&str>) -> Self {
        let sql = self.grammar().compile_random(seed);
        self.order_by_raw(sql, Vec::new())
    }

    pub fn order_by_raw(mut self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        let category = self.order_category();
        self.push_order(OrderItem::Raw(sql.into()));
        self.push_bindings(bindings, category);
        self
    }

    /// Drops every order (including union orders) and their bindings.
    pub fn reorder(mut self) -> Self {
        self.registry.orders.clear();
        self.registry.union_orders.clear();
        self.registry.bindings.order.clear();
        self.registry.bindings.union_order.clear();
        self
    }

    pub fn reorder_by(self, column: impl Into<ColumnRef>, direction: OrderDirection) -> Self {
        self.reorder().order_by_direction(column, direction)
    }

    fn remove_existing_orders_for(&mut self, column: &str) {
        self.registry
            .orders
            .retain(|order| order.column_name() != Some(column));
    }

    // ------------------------------------------------------------------
    // Paging
    // ------------------------------------------------------------------

    /// Sets the limit; negative values are ignored. Routed to the union limit
    /// once a union exists.
    pub fn limit(mut self, value: i64) -> Self {
        if value >= 0 {
            if self.registry.unions.is_empty() {
                self.registry.limit = Some(value);
            } else {
                self.registry.union_limit = Some(value);
            }
        }
        self
    }

    pub fn take(self, value: i64) -> Self {
        self.limit(value)
    }

    /// Sets the offset, clamped at zero. Routed to the union offset once a
    /// union exists.
    pub fn offset(mut self, value: i64) -> Self {
        let value = value.max(0);
        if self.registry.unions.is_empty() {
            self.registry.offset = Some(value);
        } else {
            self.registry.union_offset = Some(value);
        }
        self
    }

    pub fn skip(self, value: i64) -> Self {
        self.offset(value)
    }

    /// Offset/limit for a 1-based page number.
    pub fn for_page(self, page: i64, per_page: i64) -> Self {
        self.offset((page - 1) * per_page).limit(per_page)
    }

    /// Keyset page of rows whose `column` is below `last_id`, newest first.
    pub fn for_page_before_id(
        mut self,
        per_page: i64,
        last_id: Option<Value>,
        column: &str,
    ) -> Result<Self> {
        self.remove_existing_orders_for(column);
        if let Some(last_id) = last_id.filter(|id| !id.is_null()) {
            self = self.where_op(column, "<", last_id)?;
        }
        Ok(self.order_by_desc(column).limit(per_page))
    }

    /// Keyset page of rows whose `column` is above `last_id`, oldest first.
    pub fn for_page_after_id(
        mut self,
        per_page: i64,
        last_id: Option<Value>,
        column: &str,
    ) -> Result<Self> {
        self.remove_existing_orders_for(column);
        if let Some(last_id) = last_id.filter(|id| !id.is_null()) {
            self = self.where_op(column, ">", last_id)?;
        }
        Ok(self.order_by(column).limit(per_page))
    }

    // ------------------------------------------------------------------
    // Unions
    // ------------------------------------------------------------------

    pub fn union(self, query: impl IntoSubQuery) -> Result<Self> {
        self.add_union(query, false)
    }

    pub fn union_all(self, query: impl IntoSubQuery) -> Result<Self> {
        self.add_union(query, true)
    }

    fn add_union(mut self, query: impl IntoSubQuery, all: bool) -> Result<Self> {
        let mut query = query.into_sub_query(&self)?;
        query.apply_before_query_callbacks()?;
        let bindings = query.get_bindings();
        self.registry.unions.push(Union {
            query: Box::new(query.into_registry()),
            all,
        });
        self.push_bindings(bindings, BindingCategory::Union);
        Ok(self)
    }

    // ------------------------------------------------------------------
    // Locking
    // ------------------------------------------------------------------

    /// Locks selected rows. Any lock routes reads to the write connection.
    pub fn lock(mut self, mode: LockMode) -> Self {
        if mode != LockMode::None {
            self.use_write_pdo = true;
        }
        self.registry.lock = mode;
        self
    }

    pub fn lock_for_update(self) -> Self {
        self.lock(LockMode::Exclusive)
    }

    pub fn shared_lock(self) -> Self {
        self.lock(LockMode::Shared)
    }

    // ------------------------------------------------------------------
    // Aggregates
    // ------------------------------------------------------------------

    /// Replaces the select list with an aggregate. Orders are dropped unless
    /// the query is grouped.
    pub fn set_aggregate<C: Into<ColumnRef>>(
        mut self,
        function: &str,
        columns: impl IntoIterator<Item = C>,
    ) -> Result<Self> {
        if function.is_empty() || !function.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(QuarryError::validation(format!(
                "Invalid aggregate function [{function}]."
            )));
        }

        self.registry.aggregate = Some(Aggregate {
            function: function.to_string(),
            columns: columns.into_iter().map(Into::into).collect(),
        });

        if self.registry.groups.is_empty() {
            self.registry.orders.clear();
            self.registry.bindings.order.clear();
        }
        Ok(self)
    }
}
