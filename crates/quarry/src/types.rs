//! Result rows and the mapping between [`Value`] and PostgreSQL wire types.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value as JsonValue};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{Arguments, Column, Postgres, Row as SqlxRow, Type, TypeInfo};
use uuid::Uuid;

use quarry_common::{DriverError, DriverErrorKind, Value};

/// One result row, columns kept in select order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }

    /// Returns the value of `column`, or `None` when the row has no such column.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn get_index(&self, idx: usize) -> Option<&Value> {
        self.columns.get(idx).map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Consumes the row, returning its values in column order.
    pub fn into_values(self) -> Vec<Value> {
        self.columns.into_iter().map(|(_, value)| value).collect()
    }

    /// Converts the row to a JSON object.
    pub fn to_json(&self) -> JsonValue {
        let map: Map<String, JsonValue> = self
            .columns
            .iter()
            .map(|(name, value)| {
                let json = serde_json::to_value(value).unwrap_or(JsonValue::Null);
                (name.clone(), json)
            })
            .collect();
        JsonValue::Object(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Row::new(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}

fn bind_error(kind: &str, err: impl std::fmt::Display) -> DriverError {
    DriverError::new(
        DriverErrorKind::Other,
        format!("Failed to bind {kind}: {err}"),
    )
}

/// Appends `value` to the argument list of a Postgres statement.
///
/// Homogeneous arrays bind as native Postgres arrays; mixed arrays fall back
/// to a JSON array.
pub fn bind_value(value: &Value, arguments: &mut PgArguments) -> Result<(), DriverError> {
    match value {
        Value::Null => arguments
            .add(Option::<i32>::None)
            .map_err(|e| bind_error("NULL", e)),
        Value::Bool(v) => arguments.add(*v).map_err(|e| bind_error("BOOL", e)),
        Value::Int(v) => arguments.add(*v).map_err(|e| bind_error("BIGINT", e)),
        Value::Double(v) => arguments.add(*v).map_err(|e| bind_error("DOUBLE", e)),
        Value::String(v) => arguments
            .add(v.clone())
            .map_err(|e| bind_error("TEXT", e)),
        Value::Bytes(v) => arguments
            .add(v.clone())
            .map_err(|e| bind_error("BYTEA", e)),
        Value::Uuid(v) => arguments.add(*v).map_err(|e| bind_error("UUID", e)),
        Value::Date(v) => arguments.add(*v).map_err(|e| bind_error("DATE", e)),
        Value::Time(v) => arguments.add(*v).map_err(|e| bind_error("TIME", e)),
        Value::Timestamp(v) => arguments.add(*v).map_err(|e| bind_error("TIMESTAMP", e)),
        Value::TimestampTz(v) => arguments.add(*v).map_err(|e| bind_error("TIMESTAMPTZ", e)),
        Value::Json(v) => arguments
            .add(sqlx::types::Json(v.clone()))
            .map_err(|e| bind_error("JSONB", e)),
        Value::Decimal(v) => arguments.add(*v).map_err(|e| bind_error("NUMERIC", e)),
        Value::Array(values) => bind_array(values, arguments),
    }
}

fn bind_array(values: &[Value], arguments: &mut PgArguments) -> Result<(), DriverError> {
    let first = values.iter().find(|v| !v.is_null());

    macro_rules! bind_homogeneous {
        ($variant:ident, $ty:ty, $name:literal) => {{
            let elements: Option<Vec<Option<$ty>>> = values
                .iter()
                .map(|v| match v {
                    Value::$variant(inner) => Some(Some(inner.clone())),
                    Value::Null => Some(None),
                    _ => None,
                })
                .collect();
            if let Some(elements) = elements {
                return arguments.add(elements).map_err(|e| bind_error($name, e));
            }
        }};
    }

    match first {
        None => {
            return arguments
                .add(Option::<Vec<i32>>::None)
                .map_err(|e| bind_error("empty ARRAY", e))
        }
        Some(Value::Int(_)) => bind_homogeneous!(Int, i64, "INT8[]"),
        Some(Value::String(_)) => bind_homogeneous!(String, String, "TEXT[]"),
        Some(Value::Bool(_)) => bind_homogeneous!(Bool, bool, "BOOL[]"),
        Some(Value::Double(_)) => bind_homogeneous!(Double, f64, "FLOAT8[]"),
        Some(Value::Uuid(_)) => bind_homogeneous!(Uuid, Uuid, "UUID[]"),
        _ => {}
    }

    let json = JsonValue::Array(
        values
            .iter()
            .map(|v| serde_json::to_value(v).unwrap_or(JsonValue::Null))
            .collect(),
    );
    arguments
        .add(sqlx::types::Json(json))
        .map_err(|e| bind_error("ARRAY as JSON", e))
}

/// Builds an argument list for `bindings`.
pub fn pg_arguments(bindings: &[Value]) -> Result<PgArguments, DriverError> {
    let mut arguments = PgArguments::default();
    for value in bindings {
        bind_value(value, &mut arguments)?;
    }
    Ok(arguments)
}

fn decode_error(column: &str, type_name: &str, err: impl std::fmt::Display) -> DriverError {
    DriverError::new(
        DriverErrorKind::Decode,
        format!("Failed to extract {type_name} from column '{column}': {err}"),
    )
}

fn extract<T>(row: &PgRow, idx: usize, column: &str, type_name: &str) -> Result<Option<T>, DriverError>
where
    T: for<'r> sqlx::Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get::<Option<T>, _>(idx)
        .map_err(|e| decode_error(column, type_name, e))
}

fn extract_array<T>(
    row: &PgRow,
    idx: usize,
    column: &str,
    convert: impl Fn(T) -> Value,
) -> Result<Value, DriverError>
where
    T: for<'r> sqlx::Decode<'r, Postgres> + Type<Postgres> + sqlx::postgres::PgHasArrayType,
{
    match row.try_get::<Option<Vec<Option<T>>>, _>(idx) {
        Ok(Some(values)) => Ok(Value::Array(
            values
                .into_iter()
                .map(|v| v.map(&convert).unwrap_or(Value::Null))
                .collect(),
        )),
        Ok(None) => Ok(Value::Null),
        Err(e) => Err(decode_error(column, "ARRAY", e)),
    }
}

/// Converts a Postgres row to a [`Row`], mapping each column by its type name.
pub fn row_from_pg(row: &PgRow) -> Result<Row, DriverError> {
    let mut columns = Vec::with_capacity(row.columns().len());

    for (idx, column) in row.columns().iter().enumerate() {
        let name = column.name();
        let type_name = column.type_info().name();

        let value = match type_name {
            "BOOL" => extract::<bool>(row, idx, name, type_name)?.map(Value::Bool),
            "INT2" => extract::<i16>(row, idx, name, type_name)?.map(|v| Value::Int(v.into())),
            "INT4" => extract::<i32>(row, idx, name, type_name)?.map(|v| Value::Int(v.into())),
            "INT8" => extract::<i64>(row, idx, name, type_name)?.map(Value::Int),
            "FLOAT4" => extract::<f32>(row, idx, name, type_name)?.map(|v| Value::Double(v.into())),
            "FLOAT8" => extract::<f64>(row, idx, name, type_name)?.map(Value::Double),
            "VARCHAR" | "TEXT" | "CHAR" | "BPCHAR" | "NAME" => {
                extract::<String>(row, idx, name, type_name)?.map(Value::String)
            }
            "BYTEA" => extract::<Vec<u8>>(row, idx, name, type_name)?.map(Value::Bytes),
            "UUID" => extract::<Uuid>(row, idx, name, type_name)?.map(Value::Uuid),
            "DATE" => extract::<NaiveDate>(row, idx, name, type_name)?.map(Value::Date),
            "TIME" => extract::<NaiveTime>(row, idx, name, type_name)?.map(Value::Time),
            "TIMESTAMP" => extract::<NaiveDateTime>(row, idx, name, type_name)?.map(Value::Timestamp),
            "TIMESTAMPTZ" => {
                extract::<DateTime<Utc>>(row, idx, name, type_name)?.map(Value::TimestampTz)
            }
            "JSON" | "JSONB" => extract::<JsonValue>(row, idx, name, type_name)?.map(Value::Json),
            "NUMERIC" => extract::<Decimal>(row, idx, name, type_name)?.map(Value::Decimal),
            "_BOOL" => Some(extract_array::<bool>(row, idx, name, Value::Bool)?),
            "_INT2" => Some(extract_array::<i16>(row, idx, name, |v| Value::Int(v.into()))?),
            "_INT4" => Some(extract_array::<i32>(row, idx, name, |v| Value::Int(v.into()))?),
            "_INT8" => Some(extract_array::<i64>(row, idx, name, Value::Int)?),
            "_FLOAT8" => Some(extract_array::<f64>(row, idx, name, Value::Double)?),
            "_TEXT" | "_VARCHAR" => Some(extract_array::<String>(row, idx, name, Value::String)?),
            "_UUID" => Some(extract_array::<Uuid>(row, idx, name, Value::Uuid)?),
            unknown => {
                tracing::warn!(
                    column = name,
                    pg_type = unknown,
                    "Unknown PostgreSQL type, attempting string extraction"
                );
                extract::<String>(row, idx, name, unknown)?.map(Value::String)
            }
        };

        columns.push((name.to_string(), value.unwrap_or(Value::Null)));
    }

    Ok(Row::new(columns))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_accessors() {
        let row: Row = vec![("id", Value::Int(1)), ("name", Value::from("Alice"))]
            .into_iter()
            .collect();

        assert_eq!(row.len(), 2);
        assert_eq!(row.get("name"), Some(&Value::from("Alice")));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.get_index(0), Some(&Value::Int(1)));
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["id", "name"]);
        assert_eq!(row.to_json(), serde_json::json!({"id": 1, "name": "Alice"}));
    }

    #[test]
    fn test_pg_arguments_accepts_every_value_kind() {
        let bindings = vec![
            Value::Null,
            Value::Bool(true),
            Value::Int(7),
            Value::Double(1.5),
            Value::from("text"),
            Value::Bytes(vec![1, 2]),
            Value::Uuid(Uuid::nil()),
            Value::Json(serde_json::json!({"a": 1})),
            Value::Decimal(Decimal::new(1050, 2)),
            Value::Array(vec![Value::Int(1), Value::Null, Value::Int(3)]),
            Value::Array(vec![Value::Int(1), Value::from("mixed")]),
            Value::Array(vec![]),
        ];
        let arguments = pg_arguments(&bindings).unwrap();
        assert_eq!(arguments.len(), bindings.len());
    }
}
