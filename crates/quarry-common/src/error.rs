//! Error types for quarry

use thiserror::Error;

use crate::value::Value;

/// Result type alias for quarry operations
pub type Result<T> = std::result::Result<T, QuarryError>;

/// Message fragments a driver reports when the server side of the
/// connection has disappeared.
const LOST_CONNECTION_MESSAGES: &[&str] = &[
    "server has gone away",
    "no connection to the server",
    "lost connection",
    "is dead or not enabled",
    "error while sending",
    "decryption failed or bad record mac",
    "server closed the connection unexpectedly",
    "ssl connection has been closed unexpectedly",
    "error writing data to the connection",
    "resource deadlock avoided",
    "child connection forced to terminate due to client_idle_limit",
    "query_wait_timeout",
    "reset by peer",
    "physical connection is not usable",
    "packets out of order",
    "connection refused",
    "broken pipe",
    "connection timed out",
    "terminating connection due to administrator command",
    "the database system is shutting down",
    "the database system is starting up",
    "connection is closed",
    "pool closed",
];

/// Message fragments that identify deadlocks, lock timeouts and
/// serialization failures.
const CONCURRENCY_MESSAGES: &[&str] = &[
    "deadlock found when trying to get lock",
    "deadlock detected",
    "the database file is locked",
    "database is locked",
    "database table is locked",
    "a table in the database is locked",
    "has been chosen as the deadlock victim",
    "lock wait timeout exceeded; try restarting transaction",
    "wsrep detected deadlock/conflict and aborted the transaction",
    "could not serialize access",
];

/// Broad category of a low-level driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// The server rejected the statement (carries a SQLSTATE code)
    Database,
    /// Socket level failure
    Io,
    /// TLS handshake or stream failure
    Tls,
    /// Wire protocol violation
    Protocol,
    /// Waiting for a pooled connection timed out
    PoolTimedOut,
    /// The pool was closed while in use
    PoolClosed,
    /// A column could not be decoded into a binding value
    Decode,
    /// Invalid connection options
    Configuration,
    /// Anything else
    Other,
}

/// A failure reported by the driver, before any statement context is attached.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct DriverError {
    /// Failure category
    pub kind: DriverErrorKind,
    /// SQLSTATE code when the server supplied one
    pub code: Option<String>,
    /// Driver message
    pub message: String,
}

impl DriverError {
    /// Creates a driver error of the given kind.
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    /// Creates a server-side error carrying a SQLSTATE code.
    pub fn database(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Database,
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Returns true when the failure means the connection is gone.
    pub fn causes_lost_connection(&self) -> bool {
        match self.kind {
            DriverErrorKind::Io | DriverErrorKind::PoolClosed | DriverErrorKind::Tls => return true,
            _ => {}
        }

        if let Some(code) = self.code.as_deref() {
            // Connection exceptions (class 08) and admin shutdown
            if code.starts_with("08") || matches!(code, "57P01" | "57P02" | "57P03") {
                return true;
            }
        }

        let message = self.message.to_lowercase();
        LOST_CONNECTION_MESSAGES.iter().any(|needle| message.contains(needle))
    }

    /// Returns true for deadlocks, lock timeouts and serialization failures.
    pub fn is_concurrency_error(&self) -> bool {
        if matches!(self.code.as_deref(), Some("40001") | Some("40P01")) {
            return true;
        }

        let message = self.message.to_lowercase();
        CONCURRENCY_MESSAGES.iter().any(|needle| message.contains(needle))
    }
}

/// A driver failure annotated with the statement that caused it.
#[derive(Error, Debug, Clone)]
#[error("{source} (Connection: {connection_name}, SQL: {rendered_sql})")]
pub struct QueryError {
    /// Name of the connection the statement ran on
    pub connection_name: String,
    /// Compiled SQL with placeholders
    pub sql: String,
    /// Bindings in placeholder order
    pub bindings: Vec<Value>,
    /// SQL with the bindings substituted, for diagnostics only
    pub rendered_sql: String,
    /// Underlying driver failure
    pub source: DriverError,
}

impl QueryError {
    /// Returns true when the connection was lost while running the statement.
    pub fn causes_lost_connection(&self) -> bool {
        self.source.causes_lost_connection()
    }

    /// Returns true when the statement failed on a deadlock or serialization conflict.
    pub fn is_concurrency_error(&self) -> bool {
        self.source.is_concurrency_error()
    }
}

/// Unified error type for all quarry operations
#[derive(Error, Debug, Clone)]
pub enum QuarryError {
    /// Illegal builder input, raised synchronously at call time
    #[error("Validation error: {0}")]
    Validation(String),

    /// A statement failed in the driver
    #[error(transparent)]
    Query(Box<QueryError>),

    /// A transaction-control call failed in the driver (begin, commit, rollback)
    #[error("Driver error: {0}")]
    Driver(DriverError),

    /// Concurrency failure raised inside a nested transaction; the database has
    /// already aborted the outer transaction so it must not be retried locally.
    #[error("Deadlock detected: {0}")]
    Deadlock(Box<QuarryError>),

    #[error("Connection error: {0}")]
    Connection(String),

    /// A scalar query returned more than one column
    #[error("The query returned more than one column")]
    MultipleColumnsSelected,

    /// A query that must return a row returned none
    #[error("No query results found")]
    RecordsNotFound,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QuarryError {
    /// Shorthand for a validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        QuarryError::Validation(message.into())
    }

    /// Returns the driver failure behind this error, if any.
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            QuarryError::Query(err) => Some(&err.source),
            QuarryError::Driver(err) => Some(err),
            QuarryError::Deadlock(inner) => inner.driver_error(),
            _ => None,
        }
    }

    /// Returns true when the error was caused by a lost connection.
    pub fn causes_lost_connection(&self) -> bool {
        match self {
            QuarryError::Connection(_) => true,
            _ => self
                .driver_error()
                .map(DriverError::causes_lost_connection)
                .unwrap_or(false),
        }
    }

    /// Returns true when the error is a deadlock or serialization conflict.
    pub fn is_concurrency_error(&self) -> bool {
        match self {
            QuarryError::Deadlock(_) => true,
            _ => self
                .driver_error()
                .map(DriverError::is_concurrency_error)
                .unwrap_or(false),
        }
    }

    /// Returns true for errors raised by builder validation.
    pub fn is_validation(&self) -> bool {
        matches!(self, QuarryError::Validation(_))
    }
}

impl From<QueryError> for QuarryError {
    fn from(err: QueryError) -> Self {
        QuarryError::Query(Box::new(err))
    }
}

impl From<DriverError> for QuarryError {
    fn from(err: DriverError) -> Self {
        QuarryError::Driver(err)
    }
}

impl From<serde_json::Error> for QuarryError {
    fn from(err: serde_json::Error) -> Self {
        QuarryError::Serialization(err.to_string())
    }
}

// PostgreSQL-specific error conversions (when postgres-errors feature is enabled)
#[cfg(feature = "postgres-errors")]
impl From<sqlx::Error> for DriverError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error;
        let message = err.to_string();
        match &err {
            Error::Database(db_err) => DriverError {
                kind: DriverErrorKind::Database,
                code: db_err.code().map(|code| code.to_string()),
                message,
            },
            Error::Io(_) => DriverError::new(DriverErrorKind::Io, message),
            Error::Tls(_) => DriverError::new(DriverErrorKind::Tls, message),
            Error::Protocol(_) => DriverError::new(DriverErrorKind::Protocol, message),
            Error::Configuration(_) => DriverError::new(DriverErrorKind::Configuration, message),
            Error::PoolTimedOut => DriverError::new(DriverErrorKind::PoolTimedOut, message),
            Error::PoolClosed => DriverError::new(DriverErrorKind::PoolClosed, message),
            Error::TypeNotFound { .. } | Error::ColumnDecode { .. } | Error::Decode(_) => {
                DriverError::new(DriverErrorKind::Decode, message)
            }
            _ => DriverError::new(DriverErrorKind::Other, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_error(source: DriverError) -> QueryError {
        QueryError {
            connection_name: "main".to_string(),
            sql: "select * from \"users\" where \"id\" = ?".to_string(),
            bindings: vec![Value::Int(1)],
            rendered_sql: "select * from \"users\" where \"id\" = 1".to_string(),
            source,
        }
    }

    #[test]
    fn test_error_display_validation() {
        let err = QuarryError::validation("Illegal operator and value combination.");
        assert_eq!(
            err.to_string(),
            "Validation error: Illegal operator and value combination."
        );
    }

    #[test]
    fn test_query_error_display_inlines_bindings() {
        let err = QuarryError::from(query_error(DriverError::database("42P01", "relation does not exist")));
        assert_eq!(
            err.to_string(),
            "relation does not exist (Connection: main, SQL: select * from \"users\" where \"id\" = 1)"
        );
    }

    #[test]
    fn test_deadlock_display_wraps_cause() {
        let inner = QuarryError::from(DriverError::database("40P01", "deadlock detected"));
        let err = QuarryError::Deadlock(Box::new(inner));
        assert_eq!(err.to_string(), "Deadlock detected: Driver error: deadlock detected");
        assert!(err.is_concurrency_error());
    }

    #[test]
    fn test_lost_connection_by_kind() {
        assert!(DriverError::new(DriverErrorKind::Io, "socket").causes_lost_connection());
        assert!(DriverError::new(DriverErrorKind::PoolClosed, "closed").causes_lost_connection());
        assert!(!DriverError::new(DriverErrorKind::Decode, "bad column").causes_lost_connection());
    }

    #[test]
    fn test_lost_connection_by_sqlstate() {
        assert!(DriverError::database("08006", "connection failure").causes_lost_connection());
        assert!(DriverError::database("57P01", "admin shutdown").causes_lost_connection());
        assert!(!DriverError::database("23505", "duplicate key").causes_lost_connection());
    }

    #[test]
    fn test_lost_connection_by_message() {
        let err = DriverError::new(DriverErrorKind::Other, "SQLSTATE[HY000]: server has gone away");
        assert!(err.causes_lost_connection());

        let err = DriverError::new(DriverErrorKind::Other, "Connection reset by peer");
        assert!(err.causes_lost_connection());
    }

    #[test]
    fn test_concurrency_by_sqlstate_and_message() {
        assert!(DriverError::database("40001", "could not serialize").is_concurrency_error());
        assert!(DriverError::database("40P01", "deadlock").is_concurrency_error());
        assert!(DriverError::new(DriverErrorKind::Other, "Lock wait timeout exceeded; try restarting transaction")
            .is_concurrency_error());
        assert!(!DriverError::database("23505", "duplicate key").is_concurrency_error());
    }

    #[test]
    fn test_quarry_error_classification_delegates() {
        let err = QuarryError::from(query_error(DriverError::database("40P01", "deadlock detected")));
        assert!(err.is_concurrency_error());
        assert!(!err.causes_lost_connection());

        let err = QuarryError::from(query_error(DriverError::new(DriverErrorKind::Io, "broken pipe")));
        assert!(err.causes_lost_connection());
        assert!(!err.is_concurrency_error());

        assert!(!QuarryError::validation("bad").causes_lost_connection());
        assert!(QuarryError::Connection("gone".to_string()).causes_lost_connection());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: QuarryError = json_err.into();
        assert!(matches!(err, QuarryError::Serialization(_)));
    }
}
