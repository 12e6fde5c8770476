//! Scripted in-memory driver shared by the integration tests.
//!
//! Every call is appended to a journal such as `fetch[read]: select ...`,
//! `tx.execute: insert ...` or `commit`, so tests can assert on exactly what
//! reached the database. Failures and result rows are queued up front and
//! consumed in order.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use quarry::{
    Connection, ConnectionConfig, Driver, DriverError, DriverErrorKind, Row, Target,
    TransactionHandle, Value,
};

#[derive(Debug, Default)]
struct State {
    journal: Vec<String>,
    statement_failures: VecDeque<DriverError>,
    matched_failures: Vec<(String, DriverError)>,
    begin_failures: VecDeque<DriverError>,
    commit_failures: VecDeque<DriverError>,
    rows: VecDeque<Vec<Row>>,
    affected: VecDeque<u64>,
    bindings: Vec<Vec<Value>>,
}

/// A driver whose behaviour is scripted by the test.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<State>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Everything that reached the driver, in order.
    pub fn journal(&self) -> Vec<String> {
        self.state().journal.clone()
    }

    /// Bindings of every statement, in order.
    pub fn bindings(&self) -> Vec<Vec<Value>> {
        self.state().bindings.clone()
    }

    pub fn clear_journal(&self) {
        let mut state = self.state();
        state.journal.clear();
        state.bindings.clear();
    }

    /// Fails the next statement (select, execute or unprepared) with `err`.
    pub fn fail_next_statement(&self, err: DriverError) {
        self.state().statement_failures.push_back(err);
    }

    /// Fails the first statement whose SQL contains `fragment` with `err`.
    pub fn fail_statement_containing(&self, fragment: &str, err: DriverError) {
        self.state().matched_failures.push((fragment.to_string(), err));
    }

    pub fn fail_next_begin(&self, err: DriverError) {
        self.state().begin_failures.push_back(err);
    }

    pub fn fail_next_commit(&self, err: DriverError) {
        self.state().commit_failures.push_back(err);
    }

    /// Rows returned by the next select.
    pub fn push_rows(&self, rows: Vec<Row>) {
        self.state().rows.push_back(rows);
    }

    /// Affected count returned by the next write. Writes default to 1.
    pub fn push_affected(&self, count: u64) {
        self.state().affected.push_back(count);
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.state()
            .journal
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }

    fn record(&self, entry: String) {
        self.state().journal.push(entry);
    }

    fn statement(&self, entry: String, bindings: &[Value]) -> Result<(), DriverError> {
        let mut state = self.state();
        state.journal.push(entry.clone());
        state.bindings.push(bindings.to_vec());
        let matched = state
            .matched_failures
            .iter()
            .position(|(fragment, _)| entry.contains(fragment.as_str()));
        if let Some(index) = matched {
            return Err(state.matched_failures.remove(index).1);
        }
        match state.statement_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next_rows(&self) -> Vec<Row> {
        self.state().rows.pop_front().unwrap_or_default()
    }

    fn next_affected(&self) -> u64 {
        self.state().affected.pop_front().unwrap_or(1)
    }
}

fn target_name(target: Target) -> &'static str {
    match target {
        Target::Read => "read",
        Target::Write => "write",
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn fetch_all(
        &self,
        target: Target,
        sql: &str,
        bindings: &[Value],
    ) -> Result<Vec<Row>, DriverError> {
        self.statement(format!("fetch[{}]: {sql}", target_name(target)), bindings)?;
        Ok(self.next_rows())
    }

    async fn execute(&self, sql: &str, bindings: &[Value]) -> Result<u64, DriverError> {
        self.statement(format!("execute: {sql}"), bindings)?;
        Ok(self.next_affected())
    }

    async fn execute_unprepared(&self, sql: &str) -> Result<u64, DriverError> {
        self.statement(format!("unprepared: {sql}"), &[])?;
        Ok(0)
    }

    fn cursor(
        &self,
        target: Target,
        sql: String,
        bindings: Vec<Value>,
    ) -> BoxStream<'static, Result<Row, DriverError>> {
        if let Err(err) = self.statement(format!("cursor[{}]: {sql}", target_name(target)), &bindings) {
            return stream::iter(vec![Err(err)]).boxed();
        }
        stream::iter(self.next_rows().into_iter().map(Ok)).boxed()
    }

    async fn begin(&self) -> Result<Box<dyn TransactionHandle>, DriverError> {
        self.record("begin".to_string());
        if let Some(err) = self.state().begin_failures.pop_front() {
            return Err(err);
        }
        Ok(Box::new(MockTransaction {
            driver: self.clone(),
        }))
    }

    async fn reconnect(&self) -> Result<(), DriverError> {
        self.record("reconnect".to_string());
        Ok(())
    }
}

struct MockTransaction {
    driver: MockDriver,
}

#[async_trait]
impl TransactionHandle for MockTransaction {
    async fn fetch_all(&mut self, sql: &str, bindings: &[Value]) -> Result<Vec<Row>, DriverError> {
        self.driver.statement(format!("tx.fetch: {sql}"), bindings)?;
        Ok(self.driver.next_rows())
    }

    async fn execute(&mut self, sql: &str, bindings: &[Value]) -> Result<u64, DriverError> {
        self.driver.statement(format!("tx.execute: {sql}"), bindings)?;
        Ok(self.driver.next_affected())
    }

    async fn execute_unprepared(&mut self, sql: &str) -> Result<u64, DriverError> {
        self.driver.statement(format!("tx.unprepared: {sql}"), &[])?;
        Ok(0)
    }

    async fn commit(self: Box<Self>) -> Result<(), DriverError> {
        self.driver.record("commit".to_string());
        match self.driver.state().commit_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn rollback(self: Box<Self>) -> Result<(), DriverError> {
        self.driver.record("rollback".to_string());
        Ok(())
    }
}

/// A connection over `driver` with default settings.
pub fn connection(driver: &MockDriver) -> Connection {
    connection_with(driver, ConnectionConfig::new("postgres://mock/quarry_test"))
}

pub fn connection_with(driver: &MockDriver, config: ConnectionConfig) -> Connection {
    Connection::new(config, Arc::new(driver.clone()))
}

pub fn lost_connection() -> DriverError {
    DriverError::new(DriverErrorKind::Io, "server closed the connection unexpectedly")
}

pub fn deadlock() -> DriverError {
    DriverError::database("40P01", "deadlock detected")
}

pub fn unique_violation() -> DriverError {
    DriverError::database("23505", "duplicate key value violates unique constraint")
}

pub fn row<V: Into<Value>>(columns: Vec<(&str, V)>) -> Row {
    Row::new(
        columns
            .into_iter()
            .map(|(name, value)| (name.to_string(), value.into()))
            .collect(),
    )
}
