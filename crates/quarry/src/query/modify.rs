//! INSERT, UPDATE, UPSERT and DELETE statement compilation.
//!
//! Each method returns the SQL and its bindings in placeholder order without
//! touching a connection; the execution methods run what these produce.

use quarry_common::{QuarryError, Result, Value};

use super::args::{IntoSubQuery, Record, UpsertUpdate};
use super::builder::Builder;
use super::clause::Term;

/// Sorts every record by column name and checks they all list the same columns.
pub(crate) fn normalize_records(values: Vec<Record>) -> Result<Vec<Record>> {
    let records: Vec<Record> = values.iter().map(Record::sorted).collect();

    if let Some((first, rest)) = records.split_first() {
        let columns: Vec<&str> = first.columns().collect();
        if rest
            .iter()
            .any(|record| !record.columns().eq(columns.iter().copied()))
        {
            return Err(QuarryError::validation(
                "Every record of a batch must have the same columns.",
            ));
        }
    }
    Ok(records)
}

fn record_bindings(records: &[Record]) -> Vec<Value> {
    records.iter().flat_map(Record::bindings).collect()
}

impl Builder {
    /// Compiles a (multi-row) insert.
    pub fn to_insert_sql(&mut self, values: Vec<Record>) -> Result<(String, Vec<Value>)> {
        self.apply_before_query_callbacks()?;
        let records = normalize_records(values)?;
        let sql = self.grammar().compile_insert(&self.registry, &records)?;
        Ok((sql, record_bindings(&records)))
    }

    /// Compiles an insert that skips rows violating a unique constraint.
    pub fn to_insert_or_ignore_sql(&mut self, values: Vec<Record>) -> Result<(String, Vec<Value>)> {
        self.apply_before_query_callbacks()?;
        let records = normalize_records(values)?;
        let sql = self.grammar().compile_insert_or_ignore(&self.registry, &records)?;
        Ok((sql, record_bindings(&records)))
    }

    /// Compiles a single-row insert returning the generated key.
    pub fn to_insert_get_id_sql(
        &mut self,
        values: Record,
        sequence: Option<&str>,
    ) -> Result<(String, Vec<Value>)> {
        self.apply_before_query_callbacks()?;
        let record = values.sorted();
        let sql = self
            .grammar()
            .compile_insert_get_id(&self.registry, &record, sequence)?;
        Ok((sql, record.bindings()))
    }

    /// Compiles `insert into table (columns) <select>`.
    pub fn to_insert_using_sql(
        &mut self,
        columns: &[&str],
        query: impl IntoSubQuery,
    ) -> Result<(String, Vec<Value>)> {
        self.apply_before_query_callbacks()?;
        let (select, bindings) = self.create_sub(query)?;
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let sql = self
            .grammar()
            .compile_insert_using(&self.registry, &columns, &select)?;
        Ok((sql, bindings))
    }

    /// Compiles an insert that updates `update` when a row collides on
    /// `unique_by`. `None` updates every inserted column.
    pub fn to_upsert_sql(
        &mut self,
        values: Vec<Record>,
        unique_by: &[&str],
        update: Option<Vec<UpsertUpdate>>,
    ) -> Result<(String, Vec<Value>)> {
        self.apply_before_query_callbacks()?;
        let records = normalize_records(values)?;

        let update = match update {
            Some(update) => update,
            None => records
                .first()
                .map(|record| record.columns().map(UpsertUpdate::from).collect())
                .unwrap_or_default(),
        };
        if update.is_empty() {
            return Err(QuarryError::validation(
                "An upsert needs at least one column to update.",
            ));
        }

        let unique_by: Vec<String> = unique_by.iter().map(|c| c.to_string()).collect();
        let sql = self
            .grammar()
            .compile_upsert(&self.registry, &records, &unique_by, &update)?;

        let mut bindings = record_bindings(&records);
        bindings.extend(update.iter().filter_map(|entry| match entry {
            UpsertUpdate::Value(_, Term::Value(value)) => Some(value.clone()),
            _ => None,
        }));
        Ok((sql, bindings))
    }

    pub fn to_update_sql(&mut self, values: &Record) -> Result<(String, Vec<Value>)> {
        self.apply_before_query_callbacks()?;
        let sql = self.grammar().compile_update(&self.registry, values)?;
        let bindings = self
            .grammar()
            .prepare_bindings_for_update(&self.registry.bindings, values);
        Ok((sql, bindings))
    }

    /// Compiles `update ... from <joined tables>`.
    pub fn to_update_from_sql(&mut self, values: &Record) -> Result<(String, Vec<Value>)> {
        self.apply_before_query_callbacks()?;
        let sql = self.grammar().compile_update_from(&self.registry, values)?;
        let bindings = self
            .grammar()
            .prepare_bindings_for_update_from(&self.registry.bindings, values);
        Ok((sql, bindings))
    }

    pub fn to_delete_sql(&mut self) -> Result<(String, Vec<Value>)> {
        self.apply_before_query_callbacks()?;
        let sql = self.grammar().compile_delete(&self.registry)?;
        let bindings = self
            .grammar()
            .prepare_bindings_for_delete(&self.registry.bindings);
        Ok((sql, bindings))
    }

    pub fn to_truncate_sql(&mut self) -> Result<Vec<(String, Vec<Value>)>> {
        self.apply_before_query_callbacks()?;
        self.grammar().compile_truncate(&self.registry)
    }

    /// Compiles `select exists(<query>) as "exists"`.
    pub fn to_exists_sql(&mut self) -> Result<(String, Vec<Value>)> {
        self.apply_before_query_callbacks()?;
        let sql = self.grammar().compile_exists(&self.registry)?;
        Ok((sql, self.get_bindings()))
    }
}
