//! Unified error types.
//!
//! `DbError` is the only error that crosses the data-access boundary. Every
//! low-level `sqlx` failure is mapped to exactly one variant by
//! `impl From<sqlx::Error> for DbError`, and the original error is kept as the
//! `source()` so diagnostics can walk the chain.

use std::fmt;
use std::io;

use serde::Serialize;
use thiserror::Error;

/// Boxed cause for connection failures that do not come from `sqlx`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Semantic failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Transient,
    Duplicate,
    NotFound,
    Validation,
    Database,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Transient => "transient",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::Database => "database",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    /// The store cannot be reached, opened or authenticated against, or the
    /// pool had no connection to hand out before the checkout timeout.
    #[error("Database connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: BoxError,
    },

    /// Lock contention, deadlock or a connection lost mid-operation.
    #[error("Transient database error: {0}")]
    Transient(#[source] sqlx::Error),

    /// Unique or primary-key constraint violated.
    #[error("Duplicate record: {0}")]
    Duplicate(#[source] sqlx::Error),

    /// A lookup expected exactly one existing row and found none.
    #[error("{entity} not found: {key}")]
    NotFound {
        entity: &'static str,
        key: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    /// Caller input the store would reject.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Any other store-level failure.
    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl DbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::Connection { .. } => ErrorKind::Connection,
            DbError::Transient(_) => ErrorKind::Transient,
            DbError::Duplicate(_) => ErrorKind::Duplicate,
            DbError::NotFound { .. } => ErrorKind::NotFound,
            DbError::Validation(_) => ErrorKind::Validation,
            DbError::Database(_) => ErrorKind::Database,
        }
    }

    /// Only transient failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn connection(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        DbError::Connection {
            message: message.into(),
            source: source.into(),
        }
    }

    pub fn not_found(entity: &'static str, key: impl fmt::Display) -> Self {
        DbError::NotFound {
            entity,
            key: key.to_string(),
            source: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        DbError::Validation(message.into())
    }
}

// SQLite primary result codes (the low byte of an extended code).
const SQLITE_PERM: i64 = 3;
const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;
const SQLITE_READONLY: i64 = 8;
const SQLITE_CANTOPEN: i64 = 14;
const SQLITE_AUTH: i64 = 23;
const SQLITE_NOTADB: i64 = 26;

const TRANSIENT_MESSAGES: &[&str] = &[
    "deadlock",
    "lock timeout",
    "database is locked",
    "database table is locked",
    "lost connection",
    "connection reset",
    "temporarily unavailable",
];

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => {
                DbError::connection("timed out waiting for a pooled connection", err)
            }
            sqlx::Error::PoolClosed => DbError::connection("connection pool is closed", err),
            sqlx::Error::Configuration(_) | sqlx::Error::Tls(_) | sqlx::Error::WorkerCrashed => {
                DbError::connection("cannot establish a connection", err)
            }
            sqlx::Error::Io(io_err) => {
                if is_dropped_connection(io_err.kind()) {
                    DbError::Transient(err)
                } else {
                    DbError::connection("cannot reach the database", err)
                }
            }
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "row",
                key: "query expected exactly one row".to_string(),
                source: Some(err),
            },
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    return DbError::Duplicate(err);
                }
                let primary_code = db_err
                    .code()
                    .and_then(|code| code.parse::<i64>().ok())
                    .map(|code| code & 0xff);
                match primary_code {
                    Some(SQLITE_BUSY) | Some(SQLITE_LOCKED) => DbError::Transient(err),
                    Some(SQLITE_PERM) | Some(SQLITE_READONLY) | Some(SQLITE_CANTOPEN)
                    | Some(SQLITE_AUTH) | Some(SQLITE_NOTADB) => {
                        DbError::connection("cannot open the database", err)
                    }
                    _ if has_transient_message(db_err.message()) => DbError::Transient(err),
                    _ => DbError::Database(err),
                }
            }
            _ => DbError::Database(err),
        }
    }
}

fn is_dropped_connection(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

fn has_transient_message(message: &str) -> bool {
    let message = message.to_lowercase();
    TRANSIENT_MESSAGES.iter().any(|needle| message.contains(needle))
}

/// Top-level error for the binary and context wiring.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error(transparent)]
    Database(#[from] DbError),
}

pub type Result<T> = std::result::Result<T, DbError>;
