//! SQL grammar contract.
//!
//! A grammar turns a [`Registry`] into SQL text. Placeholders are always
//! emitted as `?`, in the same order as [`Bindings::flatten`] returns the
//! bindings; drivers convert them to their native form (see
//! [`numbered_placeholders`]). A literal `?` that must survive, such as the
//! Postgres `?` JSON operator, is written as `??`.

mod postgres;

pub use postgres::PostgresGrammar;

use std::fmt;

use quarry_common::{Result, Value};

use crate::query::{
    BindingCategory, Bindings, ColumnRef, Expression, Record, Registry, TableRef, UpsertUpdate,
};

/// Dialect-specific SQL compiler.
pub trait Grammar: Send + Sync + fmt::Debug {
    /// Dialect operators accepted in addition to the builder's own list.
    fn operators(&self) -> &[&'static str];

    /// Dialect operators compiled as bitwise predicates.
    fn bitwise_operators(&self) -> &[&'static str];

    fn supports_savepoints(&self) -> bool {
        true
    }

    /// Prefix applied to every wrapped table name.
    fn table_prefix(&self) -> &str;

    /// Quotes an identifier, handling `as` aliases, `table.column` segments
    /// and JSON paths.
    fn wrap(&self, value: &str) -> String;

    fn wrap_table(&self, table: &TableRef) -> String;

    fn wrap_column(&self, column: &ColumnRef) -> String {
        match column {
            ColumnRef::Name(name) => self.wrap(name),
            ColumnRef::Expression(expression) => self.get_value(expression),
        }
    }

    /// Unwraps a raw expression to its SQL text.
    fn get_value(&self, expression: &Expression) -> String {
        expression.value().to_string()
    }

    /// Renders a value as a SQL literal.
    fn escape(&self, value: &Value) -> Result<String>;

    fn compile_select(&self, query: &Registry) -> Result<String>;
    fn compile_exists(&self, query: &Registry) -> Result<String>;

    /// Compiles a multi-row insert. Every record must list the same columns
    /// in the same order.
    fn compile_insert(&self, query: &Registry, values: &[Record]) -> Result<String>;
    fn compile_insert_or_ignore(&self, query: &Registry, values: &[Record]) -> Result<String>;
    fn compile_insert_get_id(
        &self,
        query: &Registry,
        values: &Record,
        sequence: Option<&str>,
    ) -> Result<String>;
    fn compile_insert_using(&self, query: &Registry, columns: &[String], sql: &str) -> Result<String>;

    fn compile_update(&self, query: &Registry, values: &Record) -> Result<String>;
    fn compile_update_from(&self, query: &Registry, values: &Record) -> Result<String>;
    fn compile_upsert(
        &self,
        query: &Registry,
        values: &[Record],
        unique_by: &[String],
        update: &[UpsertUpdate],
    ) -> Result<String>;

    fn compile_delete(&self, query: &Registry) -> Result<String>;

    /// Statements (with their bindings) that empty the table.
    fn compile_truncate(&self, query: &Registry) -> Result<Vec<(String, Vec<Value>)>>;

    fn compile_savepoint(&self, name: &str) -> String;
    fn compile_savepoint_roll_back(&self, name: &str) -> String;

    /// Random ordering expression. The seed is ignored by dialects without
    /// seeded random functions.
    fn compile_random(&self, seed: Option<&str>) -> String;

    /// Query listing the columns of `table`, with its bindings.
    fn compile_column_listing(&self, table: &str) -> (String, Vec<Value>);

    /// Encodes a value compared by a JSON containment predicate.
    fn prepare_binding_for_json_contains(&self, value: &Value) -> Value {
        Value::String(value.to_json_string())
    }

    /// Update values followed by every bucket but `select`.
    fn prepare_bindings_for_update(&self, bindings: &Bindings, values: &Record) -> Vec<Value> {
        let mut prepared = values.bindings();
        prepared.extend(bindings.flatten_except(&[BindingCategory::Select]));
        prepared
    }

    /// Update values, then `where`, then the remaining buckets but `select`.
    fn prepare_bindings_for_update_from(&self, bindings: &Bindings, values: &Record) -> Vec<Value> {
        let mut prepared = values.bindings();
        prepared.extend(bindings.where_.iter().cloned());
        prepared.extend(
            bindings.flatten_except(&[BindingCategory::Select, BindingCategory::Where]),
        );
        prepared
    }

    fn prepare_bindings_for_delete(&self, bindings: &Bindings) -> Vec<Value> {
        bindings.flatten_except(&[BindingCategory::Select])
    }

    /// Inlines escaped bindings into `sql`. The result is for diagnostics
    /// and must never be executed.
    fn substitute_bindings_into_raw_sql(&self, sql: &str, bindings: &[Value]) -> Result<String> {
        let escaped = bindings
            .iter()
            .map(|value| self.escape(value))
            .collect::<Result<Vec<_>>>()?;
        Ok(substitute_placeholders(sql, escaped))
    }
}

/// Replaces each `?` outside string literals with the next replacement.
/// Escaped quotes and `??` are copied through untouched.
fn substitute_placeholders(sql: &str, replacements: Vec<String>) -> String {
    let mut replacements = replacements.into_iter();
    let mut out = String::with_capacity(sql.len());
    let mut in_literal = false;
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        let next = chars.peek().copied();
        match (ch, next) {
            ('\\', Some(escaped @ '\'')) | ('\'', Some(escaped @ '\'')) | ('?', Some(escaped @ '?')) => {
                out.push(ch);
                out.push(escaped);
                chars.next();
            }
            ('\'', _) => {
                out.push(ch);
                in_literal = !in_literal;
            }
            ('?', _) if !in_literal => match replacements.next() {
                Some(replacement) => out.push_str(&replacement),
                None => out.push('?'),
            },
            _ => out.push(ch),
        }
    }
    out
}

/// Rewrites `?` placeholders as `$1`, `$2`, ... for drivers with numbered
/// parameters. String literals are skipped and `??` collapses to a literal `?`.
pub fn numbered_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut index = 0usize;
    let mut in_literal = false;
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' => {
                out.push(ch);
                if in_literal && chars.peek() == Some(&'\'') {
                    out.push('\'');
                    chars.next();
                } else {
                    in_literal = !in_literal;
                }
            }
            '?' if !in_literal => {
                if chars.peek() == Some(&'?') {
                    chars.next();
                    out.push('?');
                } else {
                    index += 1;
                    out.push('$');
                    out.push_str(&index.to_string());
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Strips the connector in front of the first compiled condition.
pub(crate) fn remove_leading_boolean(sql: &str) -> &str {
    sql.strip_prefix("and ")
        .or_else(|| sql.strip_prefix("or "))
        .unwrap_or(sql)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbered_placeholders() {
        assert_eq!(
            numbered_placeholders("select * from \"t\" where \"a\" = ? and \"b\" in (?, ?)"),
            "select * from \"t\" where \"a\" = $1 and \"b\" in ($2, $3)"
        );
    }

    #[test]
    fn test_numbered_placeholders_skips_literals_and_escapes() {
        assert_eq!(
            numbered_placeholders("select '?', 'it''s ?' from t where data ?? 'k' and a = ?"),
            "select '?', 'it''s ?' from t where data ? 'k' and a = $1"
        );
    }

    #[test]
    fn test_substitute_placeholders() {
        let sql = substitute_placeholders(
            "select * from t where a = ? and b = '?' and c ?? 'x' and d = ?",
            vec!["1".to_string(), "'z'".to_string()],
        );
        assert_eq!(sql, "select * from t where a = 1 and b = '?' and c ?? 'x' and d = 'z'");
    }

    #[test]
    fn test_substitute_placeholders_missing_bindings() {
        assert_eq!(substitute_placeholders("a = ? and b = ?", vec!["1".into()]), "a = 1 and b = ?");
    }

    #[test]
    fn test_remove_leading_boolean() {
        assert_eq!(remove_leading_boolean("and \"a\" = ?"), "\"a\" = ?");
        assert_eq!(remove_leading_boolean("or not \"a\" = ?"), "not \"a\" = ?");
        assert_eq!(remove_leading_boolean("\"a\" = ?"), "\"a\" = ?");
    }
}
