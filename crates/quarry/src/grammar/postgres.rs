//! PostgreSQL grammar.

use quarry_common::{QuarryError, Result, Value};

use super::{remove_leading_boolean, Grammar};
use crate::query::helpers::is_json_selector;
use crate::query::{
    Aggregate, BindingCategory, Bindings, ColumnRef, Condition, DatePart, Distinct, JoinClause,
    LockMode, OrderItem, Record, Registry, TableRef, Term, UpsertUpdate,
};

const OPERATORS: &[&str] = &[
    "=", "<", ">", "<=", ">=", "<>", "!=", "like", "not like", "between", "ilike", "not ilike",
    "~", "&", "|", "#", "<<", ">>", "<<=", ">>=", "&&", "@>", "<@", "?", "?|", "?&", "||", "-",
    "@?", "@@", "#-", "is distinct from", "is not distinct from",
];

const BITWISE_OPERATORS: &[&str] = &["~", "&", "|", "#", "<<", ">>", "<<=", ">>="];

/// Text search configurations accepted by full text predicates.
const FULLTEXT_LANGUAGES: &[&str] = &[
    "simple", "arabic", "danish", "dutch", "english", "finnish", "french", "german", "hungarian",
    "indonesian", "irish", "italian", "lithuanian", "nepali", "norwegian", "portuguese",
    "romanian", "russian", "spanish", "swedish", "tamil", "turkish",
];

/// Compiles registries to PostgreSQL.
///
/// Identifiers are double-quoted, JSON paths use `->`/`->>`, and updates or
/// deletes with joins or a limit are rewritten to a `ctid` sub-select.
#[derive(Debug, Clone, Default)]
pub struct PostgresGrammar {
    table_prefix: String,
}

impl PostgresGrammar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table_prefix(prefix: impl Into<String>) -> Self {
        Self {
            table_prefix: prefix.into(),
        }
    }

    /// Quotes a single identifier segment.
    fn wrap_value(&self, value: &str) -> String {
        if value == "*" {
            return value.to_string();
        }
        format!("\"{}\"", value.replace('"', "\"\""))
    }

    fn wrap_table_name(&self, table: &str) -> String {
        if let Some((name, alias)) = split_alias(table) {
            return format!(
                "{} as {}",
                self.wrap_table_name(name),
                self.wrap_value(&format!("{}{alias}", self.table_prefix))
            );
        }

        match table.rsplit_once('.') {
            Some((schema, name)) => {
                let schema = schema
                    .split('.')
                    .map(|segment| self.wrap_value(segment))
                    .collect::<Vec<_>>()
                    .join(".");
                format!(
                    "{schema}.{}",
                    self.wrap_value(&format!("{}{name}", self.table_prefix))
                )
            }
            None => self.wrap_value(&format!("{}{table}", self.table_prefix)),
        }
    }

    fn wrap_segments(&self, value: &str) -> String {
        let segments: Vec<&str> = value.split('.').collect();
        if segments.len() == 1 {
            return self.wrap_value(value);
        }

        segments
            .iter()
            .enumerate()
            .map(|(idx, segment)| {
                if idx == 0 {
                    self.wrap_table_name(segment)
                } else {
                    self.wrap_value(segment)
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// `col->a->b` becomes `"col"->'a'->>'b'`.
    fn wrap_json_selector(&self, value: &str) -> String {
        let mut parts = value.split("->");
        let field = self.wrap_segments(parts.next().unwrap_or(value));
        let path = json_path_attributes(parts, '\'');

        match path.split_last() {
            Some((last, rest)) if !rest.is_empty() => {
                format!("{field}->{}->>{last}", rest.join("->"))
            }
            Some((last, _)) => format!("{field}->>{last}"),
            None => field,
        }
    }

    /// JSON selector that keeps the final step as `jsonb`.
    fn wrap_json_object_selector(&self, value: &str) -> String {
        self.wrap(value).replace("->>", "->")
    }

    fn table<'a>(&self, query: &'a Registry) -> Result<&'a TableRef> {
        query
            .from
            .as_ref()
            .ok_or_else(|| QuarryError::validation("No table was set on the query."))
    }

    fn columnize(&self, columns: &[ColumnRef]) -> String {
        columns
            .iter()
            .map(|column| self.wrap_column(column))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn columnize_names(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|column| self.wrap(column))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn parameter(&self, term: &Term) -> String {
        match term {
            Term::Value(_) => "?".to_string(),
            Term::Expression(expression) => self.get_value(expression),
        }
    }

    fn parameterize<'a>(&self, terms: impl IntoIterator<Item = &'a Term>) -> String {
        terms
            .into_iter()
            .map(|term| self.parameter(term))
            .collect::<Vec<_>>()
            .join(", ")
    }

    // ------------------------------------------------------------------
    // Select components
    // ------------------------------------------------------------------

    fn compile_components(&self, query: &Registry) -> Result<Vec<String>> {
        let mut parts = Vec::new();

        match &query.aggregate {
            Some(aggregate) => parts.push(self.compile_aggregate(query, aggregate)),
            None => parts.push(self.compile_columns(query)),
        }
        if let Some(from) = &query.from {
            parts.push(format!("from {}", self.wrap_table(from)));
        }
        if !query.joins.is_empty() {
            parts.push(self.compile_joins(&query.joins)?);
        }

        let wheres = self.compile_wheres(query, "where")?;
        if !wheres.is_empty() {
            parts.push(wheres);
        }
        if !query.groups.is_empty() {
            parts.push(format!("group by {}", self.columnize(&query.groups)));
        }
        if !query.havings.is_empty() {
            parts.push(format!("having {}", self.compile_havings(&query.havings)?));
        }
        if !query.orders.is_empty() {
            parts.push(self.compile_orders(&query.orders));
        }
        if let Some(limit) = query.limit {
            parts.push(format!("limit {limit}"));
        }
        if let Some(offset) = query.offset {
            parts.push(format!("offset {offset}"));
        }
        if let Some(lock) = self.compile_lock(&query.lock) {
            parts.push(lock);
        }

        Ok(parts)
    }

    fn compile_aggregate(&self, query: &Registry, aggregate: &Aggregate) -> String {
        let mut column = if aggregate.columns.is_empty() {
            "*".to_string()
        } else {
            self.columnize(&aggregate.columns)
        };

        match &query.distinct {
            Distinct::On(columns) => column = format!("distinct {}", self.columnize_names(columns)),
            Distinct::All if column != "*" => column = format!("distinct {column}"),
            _ => {}
        }

        format!("select {}({column}) as aggregate", aggregate.function)
    }

    fn compile_columns(&self, query: &Registry) -> String {
        let select = match &query.distinct {
            Distinct::On(columns) => format!("select distinct on ({}) ", self.columnize_names(columns)),
            Distinct::All => "select distinct ".to_string(),
            Distinct::None => "select ".to_string(),
        };

        match &query.columns {
            Some(columns) if !columns.is_empty() => format!("{select}{}", self.columnize(columns)),
            _ => format!("{select}*"),
        }
    }

    fn compile_joins(&self, joins: &[JoinClause]) -> Result<String> {
        let compiled = joins
            .iter()
            .map(|join| {
                let mut table = self.wrap_table(&join.table);
                if !join.query.joins.is_empty() {
                    table = format!("({table} {})", self.compile_joins(&join.query.joins)?);
                }
                let conditions = self.compile_wheres(&join.query, "on")?;
                let sql = format!("{} join {table} {conditions}", join.join_type.to_sql());
                Ok(sql.trim_end().to_string())
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(compiled.join(" "))
    }

    fn compile_orders(&self, orders: &[OrderItem]) -> String {
        let compiled = orders
            .iter()
            .map(|order| match order {
                OrderItem::Raw(sql) => sql.clone(),
                OrderItem::Column { column, direction } => {
                    format!("{} {}", self.wrap_column(column), direction.to_sql())
                }
            })
            .collect::<Vec<_>>();
        format!("order by {}", compiled.join(", "))
    }

    fn compile_lock(&self, lock: &LockMode) -> Option<String> {
        match lock {
            LockMode::None => None,
            LockMode::Shared => Some("for share".to_string()),
            LockMode::Exclusive => Some("for update".to_string()),
            LockMode::Custom(sql) => Some(sql.clone()),
        }
    }

    fn compile_unions(&self, query: &Registry) -> Result<String> {
        let mut sql = String::new();
        for union in &query.unions {
            sql.push_str(if union.all { " union all " } else { " union " });
            sql.push_str(&format!("({})", self.compile_select(&union.query)?));
        }

        if !query.union_orders.is_empty() {
            sql.push(' ');
            sql.push_str(&self.compile_orders(&query.union_orders));
        }
        if let Some(limit) = query.union_limit {
            sql.push_str(&format!(" limit {limit}"));
        }
        if let Some(offset) = query.union_offset {
            sql.push_str(&format!(" offset {offset}"));
        }

        Ok(sql.trim_start().to_string())
    }

    /// Aggregates a union or a having query by wrapping it as a derived table.
    fn compile_union_aggregate(&self, query: &Registry, aggregate: &Aggregate) -> Result<String> {
        let head = self.compile_aggregate(query, aggregate);
        let mut inner = query.clone();
        inner.aggregate = None;

        Ok(format!(
            "{head} from ({}) as {}",
            self.compile_select(&inner)?,
            self.wrap_table(&TableRef::from("temp_table"))
        ))
    }

    // ------------------------------------------------------------------
    // Conditions
    // ------------------------------------------------------------------

    /// Compiles `wheres` prefixed by `conjunction`, or an empty string.
    fn compile_wheres(&self, query: &Registry, conjunction: &str) -> Result<String> {
        let compiled = self.compile_conditions(&query.wheres)?;
        if compiled.is_empty() {
            return Ok(String::new());
        }
        Ok(format!("{conjunction} {}", remove_leading_boolean(&compiled)))
    }

    /// Compiles each condition with its connector.
    fn compile_conditions(&self, conditions: &[Condition]) -> Result<String> {
        let compiled = conditions
            .iter()
            .map(|condition| {
                Ok(format!(
                    "{} {}",
                    condition.boolean().to_sql(),
                    self.compile_condition(condition)?
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(compiled.join(" "))
    }

    fn compile_condition(&self, condition: &Condition) -> Result<String> {
        let sql = self.compile_condition_body(condition)?;
        let negates_itself = matches!(
            condition,
            Condition::In { .. }
                | Condition::InRaw { .. }
                | Condition::Null { .. }
                | Condition::Between { .. }
                | Condition::BetweenColumns { .. }
                | Condition::Exists { .. }
        );

        if condition.is_negated() && !negates_itself {
            Ok(format!("not {sql}"))
        } else {
            Ok(sql)
        }
    }

    fn compile_condition_body(&self, condition: &Condition) -> Result<String> {
        let sql = match condition {
            Condition::Raw { sql, .. } => sql.clone(),
            Condition::Expression { expression, .. } => self.get_value(expression),
            Condition::Basic {
                column,
                operator,
                value,
                ..
            } => {
                let column = self.wrap_column(column);
                let operator = operator.replace('?', "??");
                let value = self.parameter(value);
                if operator.to_lowercase().contains("like") {
                    format!("{column}::text {operator} {value}")
                } else {
                    format!("{column} {operator} {value}")
                }
            }
            Condition::Bitwise {
                column,
                operator,
                value,
                ..
            } => format!(
                "({} {operator} {})::bool",
                self.wrap_column(column),
                self.parameter(value)
            ),
            Condition::JsonBoolean {
                column,
                operator,
                value,
                ..
            } => format!(
                "({})::jsonb {operator} '{value}'::jsonb",
                self.wrap_json_object_selector(column)
            ),
            Condition::Column {
                first,
                operator,
                second,
                ..
            } => format!(
                "{} {operator} {}",
                self.wrap_column(first),
                self.wrap_column(second)
            ),
            Condition::In {
                column,
                values,
                not,
                ..
            } => {
                if values.is_empty() {
                    return Ok(if *not { "1 = 1" } else { "0 = 1" }.to_string());
                }
                let keyword = if *not { "not in" } else { "in" };
                format!(
                    "{} {keyword} ({})",
                    self.wrap_column(column),
                    self.parameterize(values)
                )
            }
            Condition::InRaw {
                column,
                values,
                not,
                ..
            } => {
                if values.is_empty() {
                    return Ok(if *not { "1 = 1" } else { "0 = 1" }.to_string());
                }
                let keyword = if *not { "not in" } else { "in" };
                let values = values
                    .iter()
                    .map(i64::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{} {keyword} ({values})", self.wrap_column(column))
            }
            Condition::Null { column, not, .. } => {
                let keyword = if *not { "is not null" } else { "is null" };
                format!("{} {keyword}", self.wrap_column(column))
            }
            Condition::Between {
                column,
                values,
                not,
                ..
            } => format!(
                "{} {} {} and {}",
                self.wrap_column(column),
                if *not { "not between" } else { "between" },
                self.parameter(&values[0]),
                self.parameter(&values[1])
            ),
            Condition::BetweenColumns {
                column,
                values,
                not,
                ..
            } => format!(
                "{} {} {} and {}",
                self.wrap_column(column),
                if *not { "not between" } else { "between" },
                self.wrap_column(&values[0]),
                self.wrap_column(&values[1])
            ),
            Condition::Date {
                part,
                column,
                operator,
                value,
                ..
            } => self.compile_date_based_where(*part, column, operator, value),
            Condition::Nested { query, .. } => {
                let compiled = self.compile_conditions(&query.wheres)?;
                format!("({})", remove_leading_boolean(&compiled))
            }
            Condition::Sub {
                column,
                operator,
                query,
                ..
            } => format!(
                "{} {operator} ({})",
                self.wrap_column(column),
                self.compile_select(query)?
            ),
            Condition::Exists { query, not, .. } => format!(
                "{}exists ({})",
                if *not { "not " } else { "" },
                self.compile_select(query)?
            ),
            Condition::RowValues {
                columns,
                operator,
                values,
                ..
            } => format!(
                "({}) {operator} ({})",
                self.columnize(columns),
                self.parameterize(values)
            ),
            Condition::JsonContains { column, .. } => {
                format!("({})::jsonb @> ?", self.wrap_json_object_selector(column))
            }
            Condition::JsonContainsKey { column, .. } => self.compile_json_contains_key(column)?,
            Condition::JsonLength {
                column,
                operator,
                value,
                ..
            } => format!(
                "jsonb_array_length(({})::jsonb) {operator} {}",
                self.wrap_json_object_selector(column),
                self.parameter(value)
            ),
            Condition::Fulltext {
                columns, options, ..
            } => {
                let language = options
                    .language
                    .as_deref()
                    .filter(|language| FULLTEXT_LANGUAGES.contains(language))
                    .unwrap_or("english");
                let vectors = columns
                    .iter()
                    .map(|column| format!("to_tsvector('{language}', {})", self.wrap(column)))
                    .collect::<Vec<_>>()
                    .join(" || ");
                let function = match options.mode.as_deref() {
                    Some("phrase") => "phraseto_tsquery",
                    Some("websearch") => "websearch_to_tsquery",
                    _ => "plainto_tsquery",
                };
                format!("({vectors}) @@ {function}('{language}', ?)")
            }
        };
        Ok(sql)
    }

    fn compile_date_based_where(
        &self,
        part: DatePart,
        column: &ColumnRef,
        operator: &str,
        value: &Term,
    ) -> String {
        let mut wrapped = self.wrap_column(column);
        let value = self.parameter(value);

        match part {
            DatePart::Date | DatePart::Time => {
                if column.name().is_some_and(is_json_selector) {
                    wrapped = format!("({wrapped})");
                }
                let cast = if part == DatePart::Date { "date" } else { "time" };
                format!("{wrapped}::{cast} {operator} {value}")
            }
            DatePart::Day => format!("extract(day from {wrapped}) {operator} {value}"),
            DatePart::Month => format!("extract(month from {wrapped}) {operator} {value}"),
            DatePart::Year => format!("extract(year from {wrapped}) {operator} {value}"),
        }
    }

    fn compile_json_contains_key(&self, column: &str) -> Result<String> {
        let mut segments: Vec<&str> = column.split("->").collect();
        let last = segments.pop().unwrap_or(column);

        let mut index = last.parse::<i64>().ok();
        if index.is_none() {
            if let Some((key, position)) = split_array_index(last) {
                segments.push(key);
                index = Some(position);
            }
        }

        if segments.is_empty() {
            return Err(QuarryError::validation(format!(
                "A JSON path is required to test for a key, got [{column}]."
            )));
        }

        let wrapped = self.wrap_json_object_selector(&segments.join("->"));
        if let Some(index) = index {
            let comparison = if index < 0 { ">=" } else { ">" };
            return Ok(format!(
                "case when jsonb_typeof(({wrapped})::jsonb) = 'array' then jsonb_array_length(({wrapped})::jsonb) {comparison} {} else false end",
                index.abs()
            ));
        }

        Ok(format!(
            "coalesce(({wrapped})::jsonb ?? '{}', false)",
            last.replace('\'', "''")
        ))
    }

    fn compile_havings(&self, havings: &[Condition]) -> Result<String> {
        let compiled = havings
            .iter()
            .map(|having| {
                Ok(format!(
                    "{} {}",
                    having.boolean().to_sql(),
                    self.compile_having(having)?
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(remove_leading_boolean(&compiled.join(" ")).to_string())
    }

    fn compile_having(&self, having: &Condition) -> Result<String> {
        match having {
            Condition::Basic {
                column,
                operator,
                value,
                ..
            } => Ok(format!(
                "{} {operator} {}",
                self.wrap_column(column),
                self.parameter(value)
            )),
            Condition::Bitwise {
                column,
                operator,
                value,
                ..
            } => Ok(format!(
                "({} {operator} {}) != 0",
                self.wrap_column(column),
                self.parameter(value)
            )),
            Condition::Nested { query, .. } => {
                Ok(format!("({})", self.compile_havings(&query.havings)?))
            }
            other => self.compile_condition(other),
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    fn compile_update_columns(&self, values: &Record) -> String {
        values
            .iter()
            .map(|(column, value)| {
                if is_json_selector(column) {
                    return self.compile_json_update_column(column, value);
                }
                let column = column.rsplit('.').next().unwrap_or(column);
                format!("{} = {}", self.wrap(column), self.parameter(value))
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `options->a->b = v` becomes `"options" = jsonb_set("options"::jsonb, '{"a","b"}', ?)`.
    fn compile_json_update_column(&self, column: &str, value: &Term) -> String {
        let mut segments = column.split("->");
        let field = self.wrap(segments.next().unwrap_or(column));
        let path = json_path_attributes(segments, '"').join(",");
        format!(
            "{field} = jsonb_set({field}::jsonb, '{{{path}}}', {})",
            self.parameter(value)
        )
    }

    /// Update values in column order, JSON-encoding values written into JSON paths.
    fn prepare_update_values(&self, values: &Record) -> Vec<Value> {
        values
            .iter()
            .filter_map(|(column, term)| match term {
                Term::Expression(_) => None,
                Term::Value(Value::Json(json)) => Some(Value::Json(json.clone())),
                Term::Value(value) if is_json_selector(column) => Some(Value::Json(
                    serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
                )),
                Term::Value(value) => Some(value.clone()),
            })
            .collect()
    }

    /// The alias a `ctid` sub-select addresses the target table by.
    fn table_alias(&self, table: &TableRef) -> Result<String> {
        match table {
            TableRef::Name(name) => Ok(split_alias(name)
                .map(|(_, alias)| alias)
                .unwrap_or(name)
                .to_string()),
            TableRef::Expression(_) => Err(QuarryError::validation(
                "Updates and deletes with joins or a limit require a named table.",
            )),
        }
    }

    /// `select alias.ctid` over the query, used by updates and deletes with
    /// joins or a limit.
    fn compile_ctid_select(&self, query: &Registry, table: &TableRef) -> Result<String> {
        let alias = self.table_alias(table)?;
        let mut select = query.clone();
        select.aggregate = None;
        select.columns = Some(vec![ColumnRef::from(format!("{alias}.ctid"))]);
        select.bindings.get_mut(BindingCategory::Select).clear();
        self.compile_select(&select)
    }
}

impl Grammar for PostgresGrammar {
    fn operators(&self) -> &[&'static str] {
        OPERATORS
    }

    fn bitwise_operators(&self) -> &[&'static str] {
        BITWISE_OPERATORS
    }

    fn table_prefix(&self) -> &str {
        &self.table_prefix
    }

    fn wrap(&self, value: &str) -> String {
        if let Some((name, alias)) = split_alias(value) {
            return format!("{} as {}", self.wrap(name), self.wrap_value(alias));
        }
        if is_json_selector(value) {
            return self.wrap_json_selector(value);
        }
        self.wrap_segments(value)
    }

    fn wrap_table(&self, table: &TableRef) -> String {
        match table {
            TableRef::Name(name) => self.wrap_table_name(name),
            TableRef::Expression(expression) => self.get_value(expression),
        }
    }

    fn escape(&self, value: &Value) -> Result<String> {
        let escaped = match value {
            Value::Null => "null".to_string(),
            Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Double(f) => f.to_string(),
            Value::Decimal(d) => d.to_string(),
            Value::String(s) => {
                if s.contains('\0') {
                    return Err(QuarryError::validation(
                        "Strings with null bytes cannot be escaped. Use the binary escape option.",
                    ));
                }
                quote_literal(s)
            }
            Value::Bytes(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
                format!("'\\x{hex}'::bytea")
            }
            Value::Uuid(uuid) => quote_literal(&uuid.to_string()),
            Value::Date(date) => quote_literal(&date.to_string()),
            Value::Time(time) => quote_literal(&time.to_string()),
            Value::Timestamp(ts) => quote_literal(&ts.to_string()),
            Value::TimestampTz(ts) => quote_literal(&ts.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string()),
            Value::Json(json) => quote_literal(&json.to_string()),
            Value::Array(_) => {
                return Err(QuarryError::validation(
                    "The database connection does not support escaping arrays.",
                ))
            }
        };
        Ok(escaped)
    }

    fn compile_select(&self, query: &Registry) -> Result<String> {
        if let Some(aggregate) = &query.aggregate {
            if !query.unions.is_empty() || !query.havings.is_empty() {
                return self.compile_union_aggregate(query, aggregate);
            }
        }

        let sql = self.compile_components(query)?.join(" ");
        if query.unions.is_empty() {
            return Ok(sql);
        }
        Ok(format!("({sql}) {}", self.compile_unions(query)?))
    }

    fn compile_exists(&self, query: &Registry) -> Result<String> {
        Ok(format!(
            "select exists({}) as {}",
            self.compile_select(query)?,
            self.wrap("exists")
        ))
    }

    fn compile_insert(&self, query: &Registry, values: &[Record]) -> Result<String> {
        let table = self.wrap_table(self.table(query)?);
        let Some(first) = values.first().filter(|record| !record.is_empty()) else {
            return Ok(format!("insert into {table} default values"));
        };

        let columns = first
            .columns()
            .map(|column| self.wrap(column))
            .collect::<Vec<_>>()
            .join(", ");
        let rows = values
            .iter()
            .map(|record| format!("({})", self.parameterize(record.values())))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(format!("insert into {table} ({columns}) values {rows}"))
    }

    fn compile_insert_or_ignore(&self, query: &Registry, values: &[Record]) -> Result<String> {
        Ok(format!("{} on conflict do nothing", self.compile_insert(query, values)?))
    }

    fn compile_insert_get_id(
        &self,
        query: &Registry,
        values: &Record,
        sequence: Option<&str>,
    ) -> Result<String> {
        Ok(format!(
            "{} returning {}",
            self.compile_insert(query, std::slice::from_ref(values))?,
            self.wrap(sequence.unwrap_or("id"))
        ))
    }

    fn compile_insert_using(&self, query: &Registry, columns: &[String], sql: &str) -> Result<String> {
        Ok(format!(
            "insert into {} ({}) {sql}",
            self.wrap_table(self.table(query)?),
            self.columnize_names(columns)
        ))
    }

    fn compile_update(&self, query: &Registry, values: &Record) -> Result<String> {
        let from = self.table(query)?;
        let table = self.wrap_table(from);
        let columns = self.compile_update_columns(values);

        if !query.joins.is_empty() || query.limit.is_some() {
            let select = self.compile_ctid_select(query, from)?;
            return Ok(format!(
                "update {table} set {columns} where {} in ({select})",
                self.wrap("ctid")
            ));
        }

        let wheres = self.compile_wheres(query, "where")?;
        Ok(format!("update {table} set {columns} {wheres}").trim_end().to_string())
    }

    fn compile_update_from(&self, query: &Registry, values: &Record) -> Result<String> {
        let table = self.wrap_table(self.table(query)?);
        let columns = self.compile_update_columns(values);

        let from = if query.joins.is_empty() {
            String::new()
        } else {
            let tables = query
                .joins
                .iter()
                .map(|join| self.wrap_table(&join.table))
                .collect::<Vec<_>>()
                .join(", ");
            format!(" from {tables}")
        };

        let mut wheres = self.compile_wheres(query, "where")?;
        let join_conditions = query
            .joins
            .iter()
            .map(|join| self.compile_conditions(&join.query.wheres))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|sql| !sql.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !join_conditions.is_empty() {
            wheres = if wheres.is_empty() {
                format!("where {}", remove_leading_boolean(&join_conditions))
            } else {
                format!("{wheres} {join_conditions}")
            };
        }

        Ok(format!("update {table} set {columns}{from} {wheres}")
            .trim_end()
            .to_string())
    }

    fn compile_upsert(
        &self,
        query: &Registry,
        values: &[Record],
        unique_by: &[String],
        update: &[UpsertUpdate],
    ) -> Result<String> {
        let insert = self.compile_insert(query, values)?;
        let assignments = update
            .iter()
            .map(|entry| match entry {
                UpsertUpdate::Column(column) => format!(
                    "{} = {}.{}",
                    self.wrap(column),
                    self.wrap_value("excluded"),
                    self.wrap(column)
                ),
                UpsertUpdate::Value(column, value) => {
                    format!("{} = {}", self.wrap(column), self.parameter(value))
                }
            })
            .collect::<Vec<_>>()
            .join(", ");

        Ok(format!(
            "{insert} on conflict ({}) do update set {assignments}",
            self.columnize_names(unique_by)
        ))
    }

    fn compile_delete(&self, query: &Registry) -> Result<String> {
        let from = self.table(query)?;
        let table = self.wrap_table(from);

        if !query.joins.is_empty() || query.limit.is_some() {
            let select = self.compile_ctid_select(query, from)?;
            return Ok(format!(
                "delete from {table} where {} in ({select})",
                self.wrap("ctid")
            ));
        }

        let wheres = self.compile_wheres(query, "where")?;
        Ok(format!("delete from {table} {wheres}").trim_end().to_string())
    }

    fn compile_truncate(&self, query: &Registry) -> Result<Vec<(String, Vec<Value>)>> {
        Ok(vec![(
            format!(
                "truncate {} restart identity cascade",
                self.wrap_table(self.table(query)?)
            ),
            Vec::new(),
        )])
    }

    fn compile_savepoint(&self, name: &str) -> String {
        format!("SAVEPOINT {name}")
    }

    fn compile_savepoint_roll_back(&self, name: &str) -> String {
        format!("ROLLBACK TO SAVEPOINT {name}")
    }

    fn compile_random(&self, _seed: Option<&str>) -> String {
        "random()".to_string()
    }

    fn compile_column_listing(&self, table: &str) -> (String, Vec<Value>) {
        let select = "select column_name from information_schema.columns \
                      where table_catalog = current_database()";
        match table.split_once('.') {
            Some((schema, table)) => (
                format!("{select} and table_schema = ? and table_name = ?"),
                vec![
                    Value::from(schema),
                    Value::String(format!("{}{table}", self.table_prefix)),
                ],
            ),
            None => (
                format!("{select} and table_schema = current_schema() and table_name = ?"),
                vec![Value::String(format!("{}{table}", self.table_prefix))],
            ),
        }
    }

    fn prepare_binding_for_json_contains(&self, value: &Value) -> Value {
        match value {
            Value::Json(json) => Value::Json(json.clone()),
            other => Value::Json(serde_json::to_value(other).unwrap_or(serde_json::Value::Null)),
        }
    }

    fn prepare_bindings_for_update(&self, bindings: &Bindings, values: &Record) -> Vec<Value> {
        let mut prepared = self.prepare_update_values(values);
        prepared.extend(bindings.flatten_except(&[BindingCategory::Select]));
        prepared
    }

    fn prepare_bindings_for_update_from(&self, bindings: &Bindings, values: &Record) -> Vec<Value> {
        let mut prepared = self.prepare_update_values(values);
        prepared.extend(bindings.where_.iter().cloned());
        prepared.extend(
            bindings.flatten_except(&[BindingCategory::Select, BindingCategory::Where]),
        );
        prepared
    }
}

/// Splits `name as alias` (any case, any surrounding whitespace).
fn split_alias(value: &str) -> Option<(&str, &str)> {
    let lower = value.to_ascii_lowercase();
    let idx = lower.find(" as ")?;
    Some((value[..idx].trim(), value[idx + 4..].trim()))
}

/// Splits a trailing `[n]` index off a JSON path attribute.
fn split_array_index(attribute: &str) -> Option<(&str, i64)> {
    let inner = attribute.strip_suffix(']')?;
    let open = inner.rfind('[')?;
    let index = inner[open + 1..].parse().ok()?;
    Some((&attribute[..open], index))
}

/// Quotes JSON path attributes, expanding `key[0][1]` into `key`, `0`, `1`.
/// Integer attributes stay bare.
fn json_path_attributes<'a>(attributes: impl Iterator<Item = &'a str>, quote: char) -> Vec<String> {
    let mut out = Vec::new();
    for attribute in attributes {
        let mut keys = Vec::new();
        let mut rest = attribute;
        while let Some(inner) = rest.strip_suffix(']') {
            let Some(open) = inner.rfind('[') else { break };
            keys.push(&inner[open + 1..]);
            rest = &inner[..open];
        }
        keys.reverse();

        for key in std::iter::once(rest).chain(keys).filter(|key| !key.is_empty()) {
            if key.parse::<i64>().is_ok() {
                out.push(key.to_string());
            } else {
                out.push(format!("{quote}{}{quote}", key.replace('\'', "''")));
            }
        }
    }
    out
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_identifiers() {
        let grammar = PostgresGrammar::new();
        assert_eq!(grammar.wrap("name"), "\"name\"");
        assert_eq!(grammar.wrap("users.name"), "\"users\".\"name\"");
        assert_eq!(grammar.wrap("users.*"), "\"users\".*");
        assert_eq!(grammar.wrap("name AS n"), "\"name\" as \"n\"");
        assert_eq!(grammar.wrap("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_wrap_table_applies_prefix() {
        let grammar = PostgresGrammar::with_table_prefix("app_");
        assert_eq!(grammar.wrap_table(&TableRef::from("users")), "\"app_users\"");
        assert_eq!(
            grammar.wrap_table(&TableRef::from("users as u")),
            "\"app_users\" as \"app_u\""
        );
        assert_eq!(
            grammar.wrap_table(&TableRef::from("public.users")),
            "\"public\".\"app_users\""
        );
        assert_eq!(grammar.wrap("users.id"), "\"app_users\".\"id\"");
    }

    #[test]
    fn test_wrap_json_selector() {
        let grammar = PostgresGrammar::new();
        assert_eq!(grammar.wrap("options->language"), "\"options\"->>'language'");
        assert_eq!(
            grammar.wrap("options->languages->0->code"),
            "\"options\"->'languages'->0->>'code'"
        );
        assert_eq!(
            grammar.wrap("items->tags[1]"),
            "\"items\"->'tags'->>1"
        );
    }

    #[test]
    fn test_json_contains_key() {
        let grammar = PostgresGrammar::new();
        assert_eq!(
            grammar.compile_json_contains_key("options->language").unwrap(),
            "coalesce((\"options\")::jsonb ?? 'language', false)"
        );
        assert_eq!(
            grammar.compile_json_contains_key("options->languages[1]").unwrap(),
            "case when jsonb_typeof((\"options\"->'languages')::jsonb) = 'array' \
             then jsonb_array_length((\"options\"->'languages')::jsonb) > 1 else false end"
        );
        assert!(grammar.compile_json_contains_key("options").is_err());
    }

    #[test]
    fn test_escape() {
        let grammar = PostgresGrammar::new();
        assert_eq!(grammar.escape(&Value::Null).unwrap(), "null");
        assert_eq!(grammar.escape(&Value::Bool(true)).unwrap(), "true");
        assert_eq!(grammar.escape(&Value::Int(42)).unwrap(), "42");
        assert_eq!(grammar.escape(&Value::from("O'Brien")).unwrap(), "'O''Brien'");
        assert_eq!(grammar.escape(&Value::Bytes(vec![0xde, 0xad])).unwrap(), "'\\xdead'::bytea");
        assert!(grammar.escape(&Value::from("a\0b")).is_err());
        assert!(grammar.escape(&Value::Array(vec![Value::Int(1)])).is_err());
    }

    #[test]
    fn test_substitute_bindings_into_raw_sql() {
        let grammar = PostgresGrammar::new();
        let sql = grammar
            .substitute_bindings_into_raw_sql(
                "select * from \"users\" where \"name\" = ? and \"age\" > ?",
                &[Value::from("O'Brien"), Value::Int(18)],
            )
            .unwrap();
        assert_eq!(sql, "select * from \"users\" where \"name\" = 'O''Brien' and \"age\" > 18");
    }

    #[test]
    fn test_compile_insert_default_values() {
        let grammar = PostgresGrammar::new();
        let registry = Registry {
            from: Some(TableRef::from("users")),
            ..Default::default()
        };
        assert_eq!(
            grammar.compile_insert(&registry, &[]).unwrap(),
            "insert into \"users\" default values"
        );
        assert!(grammar.compile_insert(&Registry::default(), &[]).is_err());
    }

    #[test]
    fn test_compile_upsert() {
        let grammar = PostgresGrammar::new();
        let registry = Registry {
            from: Some(TableRef::from("users")),
            ..Default::default()
        };
        let rows = vec![Record::new().set("email", "a@x.io").set("name", "A")];
        let sql = grammar
            .compile_upsert(
                &registry,
                &rows,
                &["email".to_string()],
                &[UpsertUpdate::from("name"), UpsertUpdate::from(("visits", 1))],
            )
            .unwrap();
        assert_eq!(
            sql,
            "insert into \"users\" (\"email\", \"name\") values (?, ?) on conflict (\"email\") \
             do update set \"name\" = \"excluded\".\"name\", \"visits\" = ?"
        );
    }

    #[test]
    fn test_compile_json_update_column() {
        let grammar = PostgresGrammar::new();
        let registry = Registry {
            from: Some(TableRef::from("users")),
            ..Default::default()
        };
        let values = Record::new().set("options->theme->color", "red");
        assert_eq!(
            grammar.compile_update(&registry, &values).unwrap(),
            "update \"users\" set \"options\" = jsonb_set(\"options\"::jsonb, '{\"theme\",\"color\"}', ?)"
        );
        assert_eq!(
            grammar.prepare_bindings_for_update(&registry.bindings, &values),
            vec![Value::Json(serde_json::json!("red"))]
        );
    }

    #[test]
    fn test_column_listing() {
        let grammar = PostgresGrammar::new();
        let (sql, bindings) = grammar.compile_column_listing("audit.events");
        assert!(sql.ends_with("table_schema = ? and table_name = ?"));
        assert_eq!(bindings, vec![Value::from("audit"), Value::from("events")]);
    }
}
