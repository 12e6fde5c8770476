//! Running builders against a [`Session`].

use futures::stream::BoxStream;

use quarry_common::{QuarryError, Result, Value};

use super::args::{IntoSubQuery, Record, UpsertUpdate};
use super::builder::Builder;
use super::registry::RegistryField;
use super::types::{raw, BindingCategory, ColumnRef, Expression};
use crate::session::Session;
use crate::types::Row;

/// Last segment of a plucked column: `users.name` and `name as n` read back
/// as `name` and `n`.
fn strip_table_for_pluck(column: &str) -> &str {
    let lower = column.to_lowercase();
    if let Some(idx) = lower.rfind(" as ") {
        return column[idx + 4..].trim();
    }
    column.rsplit('.').next().unwrap_or(column)
}

fn numeric_literal(amount: &Value, method: &str) -> Result<String> {
    match amount {
        Value::Int(n) => Ok(n.to_string()),
        Value::Double(f) if f.is_finite() => Ok(f.to_string()),
        Value::Decimal(d) => Ok(d.to_string()),
        _ => Err(QuarryError::validation(format!(
            "Non-numeric value passed to {method} method."
        ))),
    }
}

impl Builder {
    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Runs the select and returns every row.
    pub async fn get(mut self, session: &mut Session) -> Result<Vec<Row>> {
        let sql = self.to_sql()?;
        let rows = session
            .select_with_target(&sql, &self.get_bindings(), !self.use_write_pdo)
            .await?;
        Ok(self.processor().process_select(&self, rows))
    }

    /// Runs the select with `limit 1`.
    pub async fn first(self, session: &mut Session) -> Result<Option<Row>> {
        Ok(self.take(1).get(session).await?.into_iter().next())
    }

    /// Like [`first`](Self::first) but fails with
    /// [`QuarryError::RecordsNotFound`] when nothing matches.
    pub async fn first_or_fail(self, session: &mut Session) -> Result<Row> {
        self.first(session).await?.ok_or(QuarryError::RecordsNotFound)
    }

    /// Finds a row by its `id` column.
    pub async fn find(self, session: &mut Session, id: impl Into<Value>) -> Result<Option<Row>> {
        self.where_op("id", "=", id.into())?.first(session).await
    }

    /// Returns one column of the first row.
    pub async fn value(self, session: &mut Session, column: &str) -> Result<Option<Value>> {
        let row = self.select([column]).first(session).await?;
        Ok(row.and_then(|row| row.into_values().into_iter().next()))
    }

    /// Returns one column from every row.
    pub async fn pluck(self, session: &mut Session, column: &str) -> Result<Vec<Value>> {
        let query = self.select_if_unset(&[column]);
        let name = strip_table_for_pluck(column).to_string();
        let rows = query.get(session).await?;
        Ok(rows
            .iter()
            .map(|row| row.get(&name).cloned().unwrap_or(Value::Null))
            .collect())
    }

    /// Returns `(key, value)` pairs read from two columns of every row.
    pub async fn pluck_keyed(
        self,
        session: &mut Session,
        column: &str,
        key: &str,
    ) -> Result<Vec<(Value, Value)>> {
        let query = self.select_if_unset(&[column, key]);
        let column = strip_table_for_pluck(column).to_string();
        let key = strip_table_for_pluck(key).to_string();
        let rows = query.get(session).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let key = row.get(&key).cloned().unwrap_or(Value::Null);
                let value = row.get(&column).cloned().unwrap_or(Value::Null);
                (key, value)
            })
            .collect())
    }

    fn select_if_unset(self, columns: &[&str]) -> Self {
        if self.registry.columns.is_some() {
            return self;
        }
        self.select(columns.iter().copied())
    }

    /// Returns true when the query matches at least one row.
    pub async fn exists(mut self, session: &mut Session) -> Result<bool> {
        let (sql, bindings) = self.to_exists_sql()?;
        let rows = session
            .select_with_target(&sql, &bindings, !self.use_write_pdo)
            .await?;

        Ok(match rows.first().and_then(|row| row.get("exists")) {
            Some(Value::Bool(exists)) => *exists,
            Some(other) => other.coerce_i64() != 0,
            None => false,
        })
    }

    pub async fn doesnt_exist(self, session: &mut Session) -> Result<bool> {
        Ok(!self.exists(session).await?)
    }

    /// Streams rows without buffering the whole result.
    pub async fn cursor(mut self, session: &mut Session) -> Result<BoxStream<'static, Result<Row>>> {
        let sql = self.to_sql()?;
        session.cursor(&sql, &self.get_bindings()).await
    }

    // ------------------------------------------------------------------
    // Aggregates
    // ------------------------------------------------------------------

    /// Runs `function` over `columns` and returns the `aggregate` column.
    ///
    /// Queries with unions or havings keep their select list and are wrapped
    /// as a derived table by the grammar.
    pub async fn aggregate<C: Into<ColumnRef>>(
        mut self,
        session: &mut Session,
        function: &str,
        columns: impl IntoIterator<Item = C>,
    ) -> Result<Option<Value>> {
        if self.registry.unions.is_empty() && self.registry.havings.is_empty() {
            self.registry.reset(RegistryField::Columns);
            self.registry
                .bindings
                .get_mut(BindingCategory::Select)
                .clear();
        }

        let rows = self.set_aggregate(function, columns)?.get(session).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.get("aggregate").cloned()))
    }

    pub async fn count(self, session: &mut Session) -> Result<i64> {
        self.count_columns(session, ["*"]).await
    }

    pub async fn count_columns<C: Into<ColumnRef>>(
        self,
        session: &mut Session,
        columns: impl IntoIterator<Item = C>,
    ) -> Result<i64> {
        let value = self.aggregate(session, "count", columns).await?;
        Ok(value.map(|value| value.coerce_i64()).unwrap_or(0))
    }

    pub async fn min(self, session: &mut Session, column: &str) -> Result<Option<Value>> {
        self.aggregate(session, "min", [column]).await
    }

    pub async fn max(self, session: &mut Session, column: &str) -> Result<Option<Value>> {
        self.aggregate(session, "max", [column]).await
    }

    /// Sum of `column`; `0` when no rows match.
    pub async fn sum(self, session: &mut Session, column: &str) -> Result<Value> {
        let value = self.aggregate(session, "sum", [column]).await?;
        Ok(value.filter(|v| !v.is_null()).unwrap_or(Value::Int(0)))
    }

    pub async fn avg(self, session: &mut Session, column: &str) -> Result<Option<Value>> {
        self.aggregate(session, "avg", [column]).await
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Inserts one or more rows. An empty batch is a no-op.
    pub async fn insert(mut self, session: &mut Session, values: Vec<Record>) -> Result<bool> {
        if values.is_empty() {
            return Ok(true);
        }
        let (sql, bindings) = self.to_insert_sql(values)?;
        session.insert(&sql, &bindings).await
    }

    /// Inserts a row and returns the value of `sequence` (`id` by default).
    pub async fn insert_get_id(
        mut self,
        session: &mut Session,
        values: Record,
        sequence: Option<&str>,
    ) -> Result<Value> {
        let (sql, bindings) = self.to_insert_get_id_sql(values, sequence)?;
        session
            .insert_get_id(&sql, &bindings, sequence.unwrap_or("id"))
            .await
    }

    /// Inserts rows, skipping those that violate a unique constraint.
    pub async fn insert_or_ignore(mut self, session: &mut Session, values: Vec<Record>) -> Result<u64> {
        if values.is_empty() {
            return Ok(0);
        }
        let (sql, bindings) = self.to_insert_or_ignore_sql(values)?;
        session.affecting_statement(&sql, &bindings).await
    }

    /// Inserts the rows selected by `query`.
    pub async fn insert_using(
        mut self,
        session: &mut Session,
        columns: &[&str],
        query: impl IntoSubQuery,
    ) -> Result<u64> {
        let (sql, bindings) = self.to_insert_using_sql(columns, query)?;
        session.affecting_statement(&sql, &bindings).await
    }

    /// Inserts rows, updating `update` on rows colliding on `unique_by`.
    /// `None` updates every inserted column; an empty list inserts only.
    pub async fn upsert(
        mut self,
        session: &mut Session,
        values: Vec<Record>,
        unique_by: &[&str],
        update: Option<Vec<UpsertUpdate>>,
    ) -> Result<u64> {
        if values.is_empty() {
            return Ok(0);
        }
        if update.as_ref().is_some_and(Vec::is_empty) {
            return Ok(u64::from(self.insert(session, values).await?));
        }

        let (sql, bindings) = self.to_upsert_sql(values, unique_by, update)?;
        session.affecting_statement(&sql, &bindings).await
    }

    pub async fn update(mut self, session: &mut Session, values: Record) -> Result<u64> {
        let (sql, bindings) = self.to_update_sql(&values)?;
        session.update(&sql, &bindings).await
    }

    /// Updates using the joined tables as a `from` list.
    pub async fn update_from(mut self, session: &mut Session, values: Record) -> Result<u64> {
        let (sql, bindings) = self.to_update_from_sql(&values)?;
        session.update(&sql, &bindings).await
    }

    /// Updates the row matching `attributes`, inserting it when missing.
    pub async fn update_or_insert(
        self,
        session: &mut Session,
        attributes: Record,
        values: Record,
    ) -> Result<bool> {
        let query = self.where_map(
            attributes
                .iter()
                .map(|(column, value)| (column.to_string(), value.clone())),
        )?;

        if !query.clone().exists(session).await? {
            return query.insert(session, vec![attributes.merged(&values)]).await;
        }
        if values.is_empty() {
            return Ok(true);
        }
        Ok(query.limit(1).update(session, values).await? > 0)
    }

    /// Adds `amount` to `column`.
    pub async fn increment(
        self,
        session: &mut Session,
        column: &str,
        amount: impl Into<Value>,
    ) -> Result<u64> {
        self.increment_each(session, vec![(column, amount.into())], Record::new())
            .await
    }

    /// Adds each amount to its column and sets the `extra` columns.
    pub async fn increment_each(
        self,
        session: &mut Session,
        columns: Vec<(&str, Value)>,
        extra: Record,
    ) -> Result<u64> {
        let values = self.step_columns(columns, "+", "increment")?;
        self.update(session, values.merged(&extra)).await
    }

    pub async fn decrement(
        self,
        session: &mut Session,
        column: &str,
        amount: impl Into<Value>,
    ) -> Result<u64> {
        self.decrement_each(session, vec![(column, amount.into())], Record::new())
            .await
    }

    pub async fn decrement_each(
        self,
        session: &mut Session,
        columns: Vec<(&str, Value)>,
        extra: Record,
    ) -> Result<u64> {
        let values = self.step_columns(columns, "-", "decrement")?;
        self.update(session, values.merged(&extra)).await
    }

    fn step_columns(&self, columns: Vec<(&str, Value)>, sign: &str, method: &str) -> Result<Record> {
        columns
            .into_iter()
            .try_fold(Record::new(), |record, (column, amount)| {
                let amount = numeric_literal(&amount, method)?;
                let expression: Expression =
                    raw(format!("{} {sign} {amount}", self.grammar().wrap(column)));
                Ok(record.set(column, expression))
            })
    }

    pub async fn delete(mut self, session: &mut Session) -> Result<u64> {
        let (sql, bindings) = self.to_delete_sql()?;
        session.delete(&sql, &bindings).await
    }

    /// Deletes the row whose `<table>.id` equals `id`.
    pub async fn delete_by_id(self, session: &mut Session, id: impl Into<Value>) -> Result<u64> {
        let column = match self.registry.from.as_ref().and_then(|from| from.name()) {
            Some(table) => format!("{table}.id"),
            None => "id".to_string(),
        };
        self.where_op(column.as_str(), "=", id.into())?
            .delete(session)
            .await
    }

    /// Empties the table.
    pub async fn truncate(mut self, session: &mut Session) -> Result<()> {
        for (sql, bindings) in self.to_truncate_sql()? {
            session.statement(&sql, &bindings).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_table_for_pluck() {
        assert_eq!(strip_table_for_pluck("name"), "name");
        assert_eq!(strip_table_for_pluck("users.name"), "name");
        assert_eq!(strip_table_for_pluck("users.name AS display"), "display");
    }

    #[test]
    fn test_numeric_literal_rejects_text() {
        assert_eq!(numeric_literal(&Value::Int(5), "increment").unwrap(), "5");
        assert_eq!(numeric_literal(&Value::Double(1.5), "increment").unwrap(), "1.5");
        let err = numeric_literal(&Value::from("5"), "increment").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: Non-numeric value passed to increment method."
        );
    }
}
