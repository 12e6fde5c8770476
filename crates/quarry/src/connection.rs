//! Connection configuration and the shared connection leaf.
//!
//! A [`Connection`] bundles a driver with the grammar, processor and event
//! dispatcher every statement needs. It holds no per-query state, so one
//! connection is cloned into as many [`Session`]s as there are concurrent
//! units of work.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::instrument;

use quarry_common::{QuarryError, Result, Value};

use crate::driver::{Driver, PgDriver};
use crate::events::{EventDispatcher, NullDispatcher};
use crate::grammar::{Grammar, PostgresGrammar};
use crate::processor::{PostgresProcessor, Processor};
use crate::query::{raw, Builder, Expression, TableRef};
use crate::session::Session;

/// Retry configuration for connection establishment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_retries: u32,
    /// Initial delay between retries in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each retry)
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Creates a retry config with no retries (immediate failure).
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Calculates the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay_ms =
            (self.initial_delay_ms as f64) * self.backoff_multiplier.powi(attempt as i32);

        Duration::from_millis((delay_ms as u64).min(self.max_delay_ms))
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    /// Seconds to wait for a pooled connection.
    pub connect_timeout: u64,
    /// Maximum lifetime of a connection in seconds.
    pub max_lifetime: Option<u64>,
    /// Idle timeout in seconds.
    pub idle_timeout: Option<u64>,
    pub retry: RetryConfig,
    /// Prepared statements cached per connection. 0 disables the cache.
    pub statement_cache_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            connect_timeout: 30,
            max_lifetime: Some(1800),
            idle_timeout: Some(600),
            retry: RetryConfig::default(),
            statement_cache_capacity: 100,
        }
    }
}

/// Everything needed to open a [`Connection`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Name reported in errors, logs and events
    pub name: String,
    pub url: String,
    /// Read replica URL. Reads use the write pool when unset.
    pub read_url: Option<String>,
    pub pool: PoolConfig,
    /// Once a session writes, its later reads go to the write pool
    pub sticky: bool,
    /// Prepended to every table name
    pub table_prefix: String,
    /// Statements slower than this are logged at warn level
    pub slow_query_threshold_ms: u64,
    /// Start every session with the in-memory query log enabled
    pub log_queries: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            url: String::new(),
            read_url: None,
            pool: PoolConfig::default(),
            sticky: false,
            table_prefix: String::new(),
            slow_query_threshold_ms: 1000,
            log_queries: false,
        }
    }
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Reads `DATABASE_URL`, `DATABASE_READ_URL`, `DATABASE_PREFIX` and
    /// `DATABASE_STICKY`.
    ///
    /// # Errors
    ///
    /// Returns error if `DATABASE_URL` is not set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let url = lookup("DATABASE_URL")
            .filter(|url| !url.is_empty())
            .ok_or_else(|| QuarryError::Connection("DATABASE_URL is not set".to_string()))?;

        Ok(Self {
            url,
            read_url: lookup("DATABASE_READ_URL").filter(|url| !url.is_empty()),
            table_prefix: lookup("DATABASE_PREFIX").unwrap_or_default(),
            sticky: lookup("DATABASE_STICKY")
                .map(|flag| matches!(flag.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(false),
            ..Self::default()
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// A hook run before every statement with its SQL and bindings.
pub type BeforeExecutingHook = Arc<dyn Fn(&str, &[Value]) + Send + Sync>;

/// The shared, immutable half of a database connection.
#[derive(Clone)]
pub struct Connection {
    config: Arc<ConnectionConfig>,
    driver: Arc<dyn Driver>,
    grammar: Arc<dyn Grammar>,
    processor: Arc<dyn Processor>,
    dispatcher: Arc<dyn EventDispatcher>,
    before_executing: Vec<BeforeExecutingHook>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.config.name)
            .field("driver", &self.driver)
            .field("grammar", &self.grammar)
            .finish()
    }
}

impl Connection {
    /// Wraps a driver with the Postgres grammar and processor.
    pub fn new(config: ConnectionConfig, driver: Arc<dyn Driver>) -> Self {
        let grammar = PostgresGrammar::with_table_prefix(config.table_prefix.clone());
        Self {
            config: Arc::new(config),
            driver,
            grammar: Arc::new(grammar),
            processor: Arc::new(PostgresProcessor),
            dispatcher: Arc::new(NullDispatcher),
            before_executing: Vec::new(),
        }
    }

    /// Opens the connection pools described by `config`.
    ///
    /// # Errors
    ///
    /// Returns error if the pools cannot connect after all retries.
    #[instrument(skip(config), fields(name = %config.name, sticky = config.sticky))]
    pub async fn connect(config: ConnectionConfig) -> Result<Self> {
        let driver = PgDriver::connect(&config.url, config.read_url.as_deref(), &config.pool)
            .await
            .map_err(QuarryError::Driver)?;
        Ok(Self::new(config, Arc::new(driver)))
    }

    pub fn with_grammar(mut self, grammar: Arc<dyn Grammar>) -> Self {
        self.grammar = grammar;
        self
    }

    pub fn with_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processor = processor;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn EventDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Registers a hook run before every statement of every session.
    pub fn before_executing<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &[Value]) + Send + Sync + 'static,
    {
        self.before_executing.push(Arc::new(hook));
        self
    }

    /// Starts a new session on this connection.
    pub fn session(&self) -> Session {
        Session::new(self.clone())
    }

    /// Creates an empty query builder.
    pub fn query(&self) -> Builder {
        Builder::new(self.grammar.clone(), self.processor.clone())
    }

    /// Creates a query builder reading from `table`.
    pub fn table(&self, table: impl Into<TableRef>) -> Builder {
        self.query().from(table)
    }

    /// Wraps `value` so it is inserted into SQL verbatim.
    pub fn raw(&self, value: impl Into<String>) -> Expression {
        raw(value)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn grammar(&self) -> &Arc<dyn Grammar> {
        &self.grammar
    }

    pub fn processor(&self) -> &Arc<dyn Processor> {
        &self.processor
    }

    pub fn dispatcher(&self) -> &Arc<dyn EventDispatcher> {
        &self.dispatcher
    }

    pub(crate) fn before_executing_hooks(&self) -> &[BeforeExecutingHook] {
        &self.before_executing
    }
}
