//! PostgreSQL driver built on sqlx connection pools.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tracing::{info, instrument, warn};

use quarry_common::{DriverError, DriverErrorKind, Value};

use super::{Driver, Target, TransactionHandle};
use crate::connection::{PoolConfig, RetryConfig};
use crate::grammar::numbered_placeholders;
use crate::types::{pg_arguments, row_from_pg, Row};

/// Driver over a write pool and an optional read replica pool.
#[derive(Clone)]
pub struct PgDriver {
    write: PgPool,
    read: Option<PgPool>,
}

impl std::fmt::Debug for PgDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgDriver")
            .field("size", &self.write.size())
            .field("num_idle", &self.write.num_idle())
            .field("has_read_pool", &self.read.is_some())
            .finish()
    }
}

impl PgDriver {
    /// Wraps existing pools.
    pub fn from_pools(write: PgPool, read: Option<PgPool>) -> Self {
        Self { write, read }
    }

    /// Opens the write pool and, when `read_url` is given, a read pool.
    ///
    /// # Errors
    ///
    /// Returns error if a pool cannot connect after all retries or a URL is invalid.
    #[instrument(skip(url, read_url), fields(
        min_connections = config.min_connections,
        max_connections = config.max_connections,
        max_retries = config.retry.max_retries
    ))]
    pub async fn connect(
        url: &str,
        read_url: Option<&str>,
        config: &PoolConfig,
    ) -> Result<Self, DriverError> {
        if url.is_empty() {
            return Err(DriverError::new(
                DriverErrorKind::Configuration,
                "Connection URI cannot be empty",
            ));
        }

        info!("Initializing connection pool");
        let write = connect_pool(url, config).await?;
        let read = match read_url {
            Some(read_url) => {
                info!("Initializing read connection pool");
                Some(connect_pool(read_url, config).await?)
            }
            None => None,
        };

        let driver = Self { write, read };
        driver.ping().await?;
        info!("Connection pool initialized successfully");
        Ok(driver)
    }

    pub fn write_pool(&self) -> &PgPool {
        &self.write
    }

    /// The read pool, or the write pool when no replica is configured.
    pub fn read_pool(&self) -> &PgPool {
        self.read.as_ref().unwrap_or(&self.write)
    }

    fn pool(&self, target: Target) -> &PgPool {
        match target {
            Target::Read => self.read_pool(),
            Target::Write => &self.write,
        }
    }

    /// Pings the database to verify connectivity.
    pub async fn ping(&self) -> Result<(), DriverError> {
        sqlx::query("SELECT 1").execute(&self.write).await?;
        Ok(())
    }

    /// Closes every pool.
    pub async fn close(&self) {
        self.write.close().await;
        if let Some(read) = &self.read {
            read.close().await;
        }
    }
}

fn pool_options(config: &PoolConfig) -> PgPoolOptions {
    let mut options = PgPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout));

    if let Some(max_lifetime_secs) = config.max_lifetime {
        options = options.max_lifetime(Duration::from_secs(max_lifetime_secs));
    }
    if let Some(idle_timeout_secs) = config.idle_timeout {
        options = options.idle_timeout(Duration::from_secs(idle_timeout_secs));
    }
    options
}

async fn connect_pool(url: &str, config: &PoolConfig) -> Result<PgPool, DriverError> {
    let connect_options = PgConnectOptions::from_str(url)
        .map_err(|e| {
            DriverError::new(
                DriverErrorKind::Configuration,
                format!("Invalid connection URI: {e}"),
            )
        })?
        .statement_cache_capacity(config.statement_cache_capacity);

    connect_with_retry(pool_options(config), connect_options, &config.retry).await
}

/// Attempts to connect with exponential backoff retry.
async fn connect_with_retry(
    pool_options: PgPoolOptions,
    connect_options: PgConnectOptions,
    retry_config: &RetryConfig,
) -> Result<PgPool, DriverError> {
    let mut last_error = None;

    for attempt in 0..=retry_config.max_retries {
        match pool_options.clone().connect_with(connect_options.clone()).await {
            Ok(pool) => {
                if attempt > 0 {
                    info!(attempt = attempt, "Connection established after retry");
                }
                return Ok(pool);
            }
            Err(e) => {
                if attempt < retry_config.max_retries {
                    let delay = retry_config.delay_for_attempt(attempt);
                    warn!(
                        attempt = attempt,
                        max_retries = retry_config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Connection failed, retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .map(DriverError::from)
        .unwrap_or_else(|| DriverError::new(DriverErrorKind::Other, "Connection failed")))
}

#[async_trait]
impl Driver for PgDriver {
    async fn fetch_all(
        &self,
        target: Target,
        sql: &str,
        bindings: &[Value],
    ) -> Result<Vec<Row>, DriverError> {
        let sql = numbered_placeholders(sql);
        let rows = sqlx::query_with(&sql, pg_arguments(bindings)?)
            .fetch_all(self.pool(target))
            .await?;
        rows.iter().map(row_from_pg).collect()
    }

    async fn execute(&self, sql: &str, bindings: &[Value]) -> Result<u64, DriverError> {
        let sql = numbered_placeholders(sql);
        let result = sqlx::query_with(&sql, pg_arguments(bindings)?)
            .execute(&self.write)
            .await?;
        Ok(result.rows_affected())
    }

    async fn execute_unprepared(&self, sql: &str) -> Result<u64, DriverError> {
        let result = sqlx::raw_sql(sql).execute(&self.write).await?;
        Ok(result.rows_affected())
    }

    fn cursor(
        &self,
        target: Target,
        sql: String,
        bindings: Vec<Value>,
    ) -> BoxStream<'static, Result<Row, DriverError>> {
        let pool = self.pool(target).clone();

        let stream = async_stream::stream! {
            let sql = numbered_placeholders(&sql);
            let arguments = match pg_arguments(&bindings) {
                Ok(arguments) => arguments,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut rows = sqlx::query_with(&sql, arguments).fetch(&pool);
            while let Some(row) = rows.next().await {
                yield row
                    .map_err(DriverError::from)
                    .and_then(|row| row_from_pg(&row));
            }
        };
        Box::pin(stream)
    }

    async fn begin(&self) -> Result<Box<dyn TransactionHandle>, DriverError> {
        let tx = self.write.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn reconnect(&self) -> Result<(), DriverError> {
        // The pool discards broken connections on its own; a successful ping
        // proves a fresh one can be acquired.
        warn!("Reconnecting after lost connection");
        self.ping().await
    }
}

/// A transaction holding one pooled connection.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl TransactionHandle for PgTransaction {
    async fn fetch_all(&mut self, sql: &str, bindings: &[Value]) -> Result<Vec<Row>, DriverError> {
        let sql = numbered_placeholders(sql);
        let rows = sqlx::query_with(&sql, pg_arguments(bindings)?)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(row_from_pg).collect()
    }

    async fn execute(&mut self, sql: &str, bindings: &[Value]) -> Result<u64, DriverError> {
        let sql = numbered_placeholders(sql);
        let result = sqlx::query_with(&sql, pg_arguments(bindings)?)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn execute_unprepared(&mut self, sql: &str) -> Result<u64, DriverError> {
        // A query without arguments goes over the simple query protocol.
        let result = sqlx::Executor::execute(&mut *self.tx, sql).await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), DriverError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DriverError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
