//! The stateful half of a connection: statement execution, transactions,
//! pretend mode and the query log.
//!
//! A [`Session`] is owned by one task. Every mutating operation takes
//! `&mut self`, so the transaction depth and the open transaction handle are
//! never shared. Run independent sessions for concurrent work.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use quarry_common::{DriverError, QuarryError, QueryError, Result, Value};

use crate::connection::{BeforeExecutingHook, Connection};
use crate::driver::{Target, TransactionHandle};
use crate::events::{Event, QueryExecuted, TransactionEvent};
use crate::types::Row;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// A statement recorded by the query log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggedQuery {
    pub sql: String,
    pub bindings: Vec<Value>,
    pub time_ms: f64,
}

/// How a statement is run and what it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatementKind {
    Select(Target),
    Affecting,
    Unprepared,
}

#[derive(Debug)]
enum Outcome {
    Rows(Vec<Row>),
    Affected(u64),
}

impl Outcome {
    fn neutral(kind: StatementKind) -> Self {
        match kind {
            StatementKind::Select(_) => Outcome::Rows(Vec::new()),
            StatementKind::Affecting | StatementKind::Unprepared => Outcome::Affected(0),
        }
    }

    fn into_rows(self) -> Vec<Row> {
        match self {
            Outcome::Rows(rows) => rows,
            Outcome::Affected(_) => Vec::new(),
        }
    }

    fn affected(&self) -> u64 {
        match self {
            Outcome::Rows(rows) => rows.len() as u64,
            Outcome::Affected(count) => *count,
        }
    }
}

enum AfterCommit {
    Event(Event),
    Callback(Box<dyn FnOnce() + Send>),
}

/// Work deferred until the outermost transaction commits, tagged with the
/// transaction level that queued it.
struct PendingCommit {
    level: u32,
    action: AfterCommit,
}

/// A unit of work on a [`Connection`].
pub struct Session {
    id: u64,
    connection: Connection,
    transactions: u32,
    transaction: Option<Box<dyn TransactionHandle>>,
    query_log: Vec<LoggedQuery>,
    logging_queries: bool,
    pretending: bool,
    records_modified: bool,
    read_on_write: bool,
    pending: Vec<PendingCommit>,
    before_executing: Vec<BeforeExecutingHook>,
    total_query_duration: Duration,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("connection", &self.connection.name())
            .field("transactions", &self.transactions)
            .field("pretending", &self.pretending)
            .field("records_modified", &self.records_modified)
            .finish()
    }
}

impl Session {
    pub fn new(connection: Connection) -> Self {
        let logging_queries = connection.config().log_queries;
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            connection,
            transactions: 0,
            transaction: None,
            query_log: Vec::new(),
            logging_queries,
            pretending: false,
            records_modified: false,
            read_on_write: false,
            pending: Vec::new(),
            before_executing: Vec::new(),
            total_query_duration: Duration::ZERO,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn connection_name(&self) -> &str {
        self.connection.name()
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Runs a select, reading from the read handle when routing allows it.
    pub async fn select(&mut self, sql: &str, bindings: &[Value]) -> Result<Vec<Row>> {
        let target = self.read_target();
        self.run(sql, bindings, StatementKind::Select(target))
            .await
            .map(Outcome::into_rows)
    }

    /// Runs a select on the write handle.
    pub async fn select_from_write_connection(
        &mut self,
        sql: &str,
        bindings: &[Value],
    ) -> Result<Vec<Row>> {
        self.run(sql, bindings, StatementKind::Select(Target::Write))
            .await
            .map(Outcome::into_rows)
    }

    /// Runs a select on the handle the caller picked.
    pub async fn select_with_target(
        &mut self,
        sql: &str,
        bindings: &[Value],
        use_read: bool,
    ) -> Result<Vec<Row>> {
        if use_read {
            self.select(sql, bindings).await
        } else {
            self.select_from_write_connection(sql, bindings).await
        }
    }

    /// Runs a select and returns its first row.
    pub async fn select_one(&mut self, sql: &str, bindings: &[Value]) -> Result<Option<Row>> {
        Ok(self.select(sql, bindings).await?.into_iter().next())
    }

    /// Runs a select and returns the single column of its first row.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError::MultipleColumnsSelected`] when the row has more
    /// than one column.
    pub async fn scalar(&mut self, sql: &str, bindings: &[Value]) -> Result<Option<Value>> {
        let Some(row) = self.select_one(sql, bindings).await? else {
            return Ok(None);
        };
        if row.len() > 1 {
            return Err(QuarryError::MultipleColumnsSelected);
        }
        Ok(row.into_values().into_iter().next())
    }

    pub async fn insert(&mut self, sql: &str, bindings: &[Value]) -> Result<bool> {
        self.statement(sql, bindings).await
    }

    /// Runs an insert with a `returning` clause and reads back `sequence`.
    pub async fn insert_get_id(
        &mut self,
        sql: &str,
        bindings: &[Value],
        sequence: &str,
    ) -> Result<Value> {
        self.records_have_been_modified(true);
        let row = self
            .select_from_write_connection(sql, bindings)
            .await?
            .into_iter()
            .next();

        Ok(row
            .and_then(|row| row.get(sequence).or_else(|| row.get_index(0)).cloned())
            .unwrap_or(Value::Null))
    }

    pub async fn update(&mut self, sql: &str, bindings: &[Value]) -> Result<u64> {
        self.affecting_statement(sql, bindings).await
    }

    pub async fn delete(&mut self, sql: &str, bindings: &[Value]) -> Result<u64> {
        self.affecting_statement(sql, bindings).await
    }

    /// Runs a statement and reports success.
    pub async fn statement(&mut self, sql: &str, bindings: &[Value]) -> Result<bool> {
        self.run(sql, bindings, StatementKind::Affecting).await?;
        if !self.pretending {
            self.records_have_been_modified(true);
        }
        Ok(true)
    }

    /// Runs a statement and returns the number of affected rows.
    pub async fn affecting_statement(&mut self, sql: &str, bindings: &[Value]) -> Result<u64> {
        let count = self
            .run(sql, bindings, StatementKind::Affecting)
            .await?
            .affected();
        self.records_have_been_modified(count > 0);
        Ok(count)
    }

    /// Runs raw SQL without preparing it.
    pub async fn unprepared(&mut self, sql: &str) -> Result<bool> {
        self.run(sql, &[], StatementKind::Unprepared).await?;
        if !self.pretending {
            self.records_have_been_modified(true);
        }
        Ok(true)
    }

    /// Streams the rows of a select.
    ///
    /// Inside a transaction the rows are fetched through the transaction's
    /// connection up front. Outside one, a connection lost before the first
    /// row reopens the cursor once.
    pub async fn cursor(
        &mut self,
        sql: &str,
        bindings: &[Value],
    ) -> Result<BoxStream<'static, Result<Row>>> {
        if self.pretending || self.transaction.is_some() {
            let rows = self.select(sql, bindings).await?;
            return Ok(stream::iter(rows.into_iter().map(Ok)).boxed());
        }

        self.run_before_executing(sql, bindings);
        let start = Instant::now();
        let target = self.read_target();
        let mut rows = self
            .connection
            .driver()
            .cursor(target, sql.to_string(), bindings.to_vec());

        // Only a failure before the first row is retried. Once rows have
        // been handed out, reopening the cursor would repeat them.
        let mut first = rows.next().await;
        if matches!(&first, Some(Err(err)) if err.causes_lost_connection()) {
            warn!(
                connection = self.connection.name(),
                session_id = self.id,
                "Lost connection, reconnecting and reopening cursor"
            );
            self.reconnect().await?;
            rows = self
                .connection
                .driver()
                .cursor(target, sql.to_string(), bindings.to_vec());
            first = rows.next().await;
        }
        self.log_query(sql, bindings, start.elapsed());

        let connection_name = self.connection.name().to_string();
        let grammar = self.connection.grammar().clone();
        let sql = sql.to_string();
        let bindings = bindings.to_vec();
        Ok(stream::iter(first)
            .chain(rows)
            .map(move |row| {
                row.map_err(|source| {
                    let rendered_sql = grammar
                        .substitute_bindings_into_raw_sql(&sql, &bindings)
                        .unwrap_or_else(|_| sql.clone());
                    QuarryError::from(QueryError {
                        connection_name: connection_name.clone(),
                        sql: sql.clone(),
                        bindings: bindings.clone(),
                        rendered_sql,
                        source,
                    })
                })
            })
            .boxed())
    }

    /// Lists the columns of `table`.
    pub async fn get_column_listing(&mut self, table: &str) -> Result<Vec<String>> {
        let (sql, bindings) = self.connection.grammar().compile_column_listing(table);
        let rows = self.select_from_write_connection(&sql, &bindings).await?;
        Ok(self.connection.processor().process_column_listing(rows))
    }

    // ------------------------------------------------------------------
    // Run wrapper
    // ------------------------------------------------------------------

    async fn run(&mut self, sql: &str, bindings: &[Value], kind: StatementKind) -> Result<Outcome> {
        self.run_before_executing(sql, bindings);

        let start = Instant::now();
        let result = match self.run_query_callback(sql, bindings, kind).await {
            Err(err) => self.handle_query_exception(err, sql, bindings, kind).await,
            ok => ok,
        };
        let outcome = result?;

        self.log_query(sql, bindings, start.elapsed());
        Ok(outcome)
    }

    fn run_before_executing(&self, sql: &str, bindings: &[Value]) {
        for hook in self
            .connection
            .before_executing_hooks()
            .iter()
            .chain(&self.before_executing)
        {
            hook(sql, bindings);
        }
    }

    async fn run_query_callback(
        &mut self,
        sql: &str,
        bindings: &[Value],
        kind: StatementKind,
    ) -> Result<Outcome> {
        if self.pretending {
            return Ok(Outcome::neutral(kind));
        }

        self.execute_statement(sql, bindings, kind)
            .await
            .map_err(|source| self.query_error(sql, bindings, source))
    }

    async fn execute_statement(
        &mut self,
        sql: &str,
        bindings: &[Value],
        kind: StatementKind,
    ) -> std::result::Result<Outcome, DriverError> {
        if let Some(handle) = self.transaction.as_mut() {
            return match kind {
                StatementKind::Select(_) => handle.fetch_all(sql, bindings).await.map(Outcome::Rows),
                StatementKind::Affecting => handle.execute(sql, bindings).await.map(Outcome::Affected),
                StatementKind::Unprepared => {
                    handle.execute_unprepared(sql).await.map(Outcome::Affected)
                }
            };
        }

        let driver = self.connection.driver();
        match kind {
            StatementKind::Select(target) => driver
                .fetch_all(target, sql, bindings)
                .await
                .map(Outcome::Rows),
            StatementKind::Affecting => driver.execute(sql, bindings).await.map(Outcome::Affected),
            StatementKind::Unprepared => driver.execute_unprepared(sql).await.map(Outcome::Affected),
        }
    }

    fn query_error(&self, sql: &str, bindings: &[Value], source: DriverError) -> QuarryError {
        let rendered_sql = self
            .connection
            .grammar()
            .substitute_bindings_into_raw_sql(sql, bindings)
            .unwrap_or_else(|_| sql.to_string());

        QuarryError::from(QueryError {
            connection_name: self.connection.name().to_string(),
            sql: sql.to_string(),
            bindings: bindings.to_vec(),
            rendered_sql,
            source,
        })
    }

    /// Retries a statement once after a lost connection, unless a
    /// transaction is open.
    async fn handle_query_exception(
        &mut self,
        err: QuarryError,
        sql: &str,
        bindings: &[Value],
        kind: StatementKind,
    ) -> Result<Outcome> {
        if self.transactions >= 1 || !err.causes_lost_connection() {
            return Err(err);
        }

        warn!(
            connection = self.connection.name(),
            session_id = self.id,
            error = %err,
            "Lost connection, reconnecting and retrying statement"
        );
        self.reconnect().await?;
        self.run_query_callback(sql, bindings, kind).await
    }

    /// Re-establishes the driver's connectivity.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.connection
            .driver()
            .reconnect()
            .await
            .map_err(QuarryError::Driver)
    }

    fn log_query(&mut self, sql: &str, bindings: &[Value], elapsed: Duration) {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        self.total_query_duration += elapsed;

        let threshold = self.connection.config().slow_query_threshold_ms;
        if elapsed.as_millis() as u64 >= threshold && threshold > 0 {
            warn!(
                connection = self.connection.name(),
                session_id = self.id,
                sql = %sql.chars().take(100).collect::<String>(),
                elapsed_ms = elapsed_ms,
                threshold_ms = threshold,
                "Slow query detected"
            );
        } else {
            debug!(
                connection = self.connection.name(),
                session_id = self.id,
                sql = %sql.chars().take(100).collect::<String>(),
                bindings = bindings.len(),
                elapsed_ms = elapsed_ms,
                in_transaction = self.transactions > 0,
                "Query executed"
            );
        }

        let event = Event::QueryExecuted(QueryExecuted {
            connection_name: self.connection.name().to_string(),
            session_id: self.id,
            sql: sql.to_string(),
            bindings: bindings.to_vec(),
            elapsed_ms,
            in_transaction: self.transactions > 0,
        });
        if self.transactions > 0 {
            self.pending.push(PendingCommit {
                level: self.transactions,
                action: AfterCommit::Event(event),
            });
        } else {
            self.connection.dispatcher().dispatch(event);
        }

        if self.logging_queries {
            self.query_log.push(LoggedQuery {
                sql: sql.to_string(),
                bindings: bindings.to_vec(),
                time_ms: elapsed_ms,
            });
        }
    }

    // ------------------------------------------------------------------
    // Read/write routing
    // ------------------------------------------------------------------

    /// The handle reads go to: the write handle inside a transaction, after a
    /// sticky write or when forced, the read handle otherwise.
    pub fn read_target(&self) -> Target {
        if self.transactions > 0
            || self.read_on_write
            || (self.records_modified && self.connection.config().sticky)
        {
            Target::Write
        } else {
            Target::Read
        }
    }

    pub fn write_target(&self) -> Target {
        Target::Write
    }

    /// Sends every later read of this session to the write handle.
    pub fn use_write_connection_when_reading(&mut self, value: bool) -> &mut Self {
        self.read_on_write = value;
        self
    }

    /// Marks that this session has written, unless it already has.
    pub fn records_have_been_modified(&mut self, value: bool) {
        if !self.records_modified {
            self.records_modified = value;
        }
    }

    pub fn has_modified_records(&self) -> bool {
        self.records_modified
    }

    pub fn forget_record_modification_state(&mut self) {
        self.records_modified = false;
    }

    // ------------------------------------------------------------------
    // Hooks and after-commit work
    // ------------------------------------------------------------------

    /// Registers a hook run before every statement of this session.
    pub fn before_executing<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&str, &[Value]) + Send + Sync + 'static,
    {
        self.before_executing.push(std::sync::Arc::new(hook));
        self
    }

    /// Runs `callback` once the outermost transaction commits, or right away
    /// when no transaction is open. A rollback past the current level drops it.
    pub fn after_commit<F>(&mut self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.transactions == 0 {
            callback();
            return;
        }
        self.pending.push(PendingCommit {
            level: self.transactions,
            action: AfterCommit::Callback(Box::new(callback)),
        });
    }

    fn fire_transaction_event(&self, make: fn(TransactionEvent) -> Event) {
        let event = make(TransactionEvent {
            connection_name: self.connection.name().to_string(),
            session_id: self.id,
        });
        self.connection.dispatcher().dispatch(event);
    }

    /// Moves pending work of committed levels to the current level and runs it
    /// all once the outermost transaction is done.
    fn commit_pending(&mut self) {
        let level = self.transactions;
        for entry in &mut self.pending {
            if entry.level > level {
                entry.level = level;
            }
        }

        if level == 0 {
            let dispatcher = self.connection.dispatcher().clone();
            for entry in std::mem::take(&mut self.pending) {
                match entry.action {
                    AfterCommit::Event(event) => dispatcher.dispatch(event),
                    AfterCommit::Callback(callback) => callback(),
                }
            }
        }
    }

    fn discard_pending_above(&mut self, level: u32) {
        self.pending.retain(|entry| entry.level <= level);
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    pub fn transaction_level(&self) -> u32 {
        self.transactions
    }

    /// Starts a transaction, or a savepoint when one is already open.
    pub async fn begin_transaction(&mut self) -> Result<()> {
        self.create_transaction().await?;
        self.transactions += 1;
        debug!(
            connection = self.connection.name(),
            session_id = self.id,
            level = self.transactions,
            "Transaction started"
        );
        self.fire_transaction_event(Event::TransactionBeginning);
        Ok(())
    }

    async fn create_transaction(&mut self) -> Result<()> {
        if self.pretending {
            return Ok(());
        }

        if self.transactions == 0 {
            let driver = self.connection.driver().clone();
            let handle = match driver.begin().await {
                Ok(handle) => handle,
                Err(err) if err.causes_lost_connection() => {
                    warn!(
                        connection = self.connection.name(),
                        error = %err,
                        "Lost connection while beginning transaction, reconnecting"
                    );
                    self.reconnect().await?;
                    driver.begin().await.map_err(QuarryError::Driver)?
                }
                Err(err) => return Err(QuarryError::Driver(err)),
            };
            self.transaction = Some(handle);
            return Ok(());
        }

        let grammar = self.connection.grammar().clone();
        if grammar.supports_savepoints() {
            let sql = grammar.compile_savepoint(&savepoint_name(self.transactions + 1));
            if let Some(handle) = self.transaction.as_mut() {
                handle
                    .execute_unprepared(&sql)
                    .await
                    .map_err(QuarryError::Driver)?;
            }
        }
        Ok(())
    }

    /// Commits the current level. Only the outermost level reaches the database.
    ///
    /// A failed database commit closes the transaction: the depth drops to
    /// zero and pending after-commit work is discarded.
    pub async fn commit(&mut self) -> Result<()> {
        if self.transactions == 1 {
            self.fire_transaction_event(Event::TransactionCommitting);
            if let Some(handle) = self.transaction.take() {
                if let Err(err) = handle.commit().await {
                    self.transactions = 0;
                    self.pending.clear();
                    return Err(QuarryError::Driver(err));
                }
            }
        }

        self.transactions = self.transactions.saturating_sub(1);
        debug!(
            connection = self.connection.name(),
            session_id = self.id,
            level = self.transactions,
            "Transaction committed"
        );
        self.commit_pending();
        self.fire_transaction_event(Event::TransactionCommitted);
        Ok(())
    }

    /// Rolls back to `to_level`, by default one level up. Targets outside
    /// `0..transaction_level()` are ignored.
    pub async fn roll_back(&mut self, to_level: Option<u32>) -> Result<()> {
        let to_level = match to_level {
            Some(level) => level,
            None => match self.transactions.checked_sub(1) {
                Some(level) => level,
                None => return Ok(()),
            },
        };
        if to_level >= self.transactions {
            return Ok(());
        }

        if let Err(err) = self.perform_roll_back(to_level).await {
            if err.causes_lost_connection() {
                self.transactions = 0;
                self.transaction = None;
                self.pending.clear();
            }
            return Err(err);
        }

        self.transactions = to_level;
        self.discard_pending_above(to_level);
        debug!(
            connection = self.connection.name(),
            session_id = self.id,
            level = self.transactions,
            "Transaction rolled back"
        );
        self.fire_transaction_event(Event::TransactionRolledBack);
        Ok(())
    }

    async fn perform_roll_back(&mut self, to_level: u32) -> Result<()> {
        if to_level == 0 {
            if let Some(handle) = self.transaction.take() {
                handle.rollback().await.map_err(QuarryError::Driver)?;
            }
            return Ok(());
        }

        let grammar = self.connection.grammar().clone();
        if grammar.supports_savepoints() {
            let sql = grammar.compile_savepoint_roll_back(&savepoint_name(to_level + 1));
            if let Some(handle) = self.transaction.as_mut() {
                handle
                    .execute_unprepared(&sql)
                    .await
                    .map_err(QuarryError::Driver)?;
            }
        }
        Ok(())
    }

    /// Runs `callback` inside a transaction, retrying the whole callback up to
    /// `attempts` times on deadlocks and serialization failures.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError::Deadlock`] when a concurrency error happens in a
    /// nested transaction, and the last error once attempts run out.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let id = session
    ///     .transaction(
    ///         |s| Box::pin(async move {
    ///             let id = s.connection().table("orders").insert_get_id(s, record, None).await?;
    ///             s.connection().table("stock").where_("sku", sku)?.decrement(s, "qty", 1).await?;
    ///             Ok(id)
    ///         }),
    ///         3,
    ///     )
    ///     .await?;
    /// ```
    pub async fn transaction<T, F>(&mut self, mut callback: F, attempts: u32) -> Result<T>
    where
        F: for<'s> FnMut(&'s mut Session) -> BoxFuture<'s, Result<T>>,
    {
        let attempts = attempts.max(1);
        let mut current_attempt = 1;

        loop {
            self.begin_transaction().await?;

            let value = match callback(self).await {
                Ok(value) => value,
                Err(err) => {
                    self.handle_transaction_exception(err, current_attempt, attempts)
                        .await?;
                    current_attempt += 1;
                    continue;
                }
            };

            if let Err(err) = self.commit().await {
                self.handle_commit_exception(err, current_attempt, attempts)?;
                current_attempt += 1;
                continue;
            }

            return Ok(value);
        }
    }

    async fn handle_transaction_exception(
        &mut self,
        err: QuarryError,
        current_attempt: u32,
        max_attempts: u32,
    ) -> Result<()> {
        if err.is_concurrency_error() && self.transactions > 1 {
            self.transactions -= 1;
            self.discard_pending_above(self.transactions);
            warn!(
                connection = self.connection.name(),
                session_id = self.id,
                level = self.transactions,
                error = %err,
                "Deadlock inside nested transaction"
            );
            return Err(match err {
                QuarryError::Deadlock(_) => err,
                err => QuarryError::Deadlock(Box::new(err)),
            });
        }

        self.roll_back(None).await?;

        if err.is_concurrency_error() && current_attempt < max_attempts {
            warn!(
                connection = self.connection.name(),
                session_id = self.id,
                attempt = current_attempt,
                max_attempts = max_attempts,
                error = %err,
                "Transaction failed on a concurrency error, retrying"
            );
            return Ok(());
        }
        Err(err)
    }

    fn handle_commit_exception(
        &mut self,
        err: QuarryError,
        current_attempt: u32,
        max_attempts: u32,
    ) -> Result<()> {
        if err.is_concurrency_error() && current_attempt < max_attempts {
            warn!(
                connection = self.connection.name(),
                session_id = self.id,
                attempt = current_attempt,
                error = %err,
                "Commit failed on a concurrency error, retrying"
            );
            return Ok(());
        }
        if err.causes_lost_connection() {
            self.transactions = 0;
        }
        Err(err)
    }

    // ------------------------------------------------------------------
    // Pretend mode and the query log
    // ------------------------------------------------------------------

    pub fn pretending(&self) -> bool {
        self.pretending
    }

    /// Runs `callback` without touching the database and returns the
    /// statements it would have executed.
    ///
    /// The query log in place before the call is restored afterwards.
    pub async fn pretend<F>(&mut self, callback: F) -> Result<Vec<LoggedQuery>>
    where
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<()>>,
    {
        let previous_logging = self.logging_queries;
        let previous_pretending = self.pretending;
        let previous_log = std::mem::take(&mut self.query_log);

        self.logging_queries = true;
        self.pretending = true;
        let result = callback(self).await;
        self.pretending = previous_pretending;
        self.logging_queries = previous_logging;

        let log = std::mem::replace(&mut self.query_log, previous_log);
        result.map(|_| log)
    }

    pub fn enable_query_log(&mut self) {
        self.logging_queries = true;
    }

    pub fn disable_query_log(&mut self) {
        self.logging_queries = false;
    }

    pub fn logging(&self) -> bool {
        self.logging_queries
    }

    pub fn query_log(&self) -> &[LoggedQuery] {
        &self.query_log
    }

    pub fn flush_query_log(&mut self) {
        self.query_log.clear();
    }

    /// Time spent running statements on this session.
    pub fn total_query_duration(&self) -> Duration {
        self.total_query_duration
    }

    pub fn reset_total_query_duration(&mut self) {
        self.total_query_duration = Duration::ZERO;
    }
}

fn savepoint_name(level: u32) -> String {
    format!("trans{level}")
}
