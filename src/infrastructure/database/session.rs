//! Scoped units of work.
//!
//! A `Session` owns one pooled connection with an open transaction for the
//! duration of a single logical operation. The connection goes back to the
//! pool when the guard is dropped, on every exit path. A guard dropped while
//! its transaction is still open rolls it back.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use sqlx::query::{Query, QueryAs, QueryScalar};
use sqlx::sqlite::{Sqlite, SqliteConnection, SqliteQueryResult, SqliteRow};
use sqlx::{FromRow, IntoArguments, Transaction};
use uuid::Uuid;

use crate::error::DbError;
use crate::metrics::{QueryMetrics, SessionMetrics};

use super::monitor::QueryMonitor;
use super::pool::Database;
use super::retry::with_retry;

/// Transaction state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Committed,
    RolledBack,
    /// Set only while the guard is dropped; callers never hold a closed session.
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Committed => "committed",
            SessionState::RolledBack => "rolled_back",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Session {
    id: Uuid,
    tx: Option<Transaction<'static, Sqlite>>,
    state: SessionState,
    opened_at: Instant,
    monitor: Arc<QueryMonitor>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Session {
    async fn begin(database: &Database) -> Result<Self, DbError> {
        let tx = database.pool().begin().await.map_err(|e| {
            let err = DbError::from(e);
            QueryMetrics::record_error(err.kind());
            tracing::warn!(kind = %err.kind(), error = %err, "Failed to open database session");
            err
        })?;

        let id = Uuid::new_v4();
        SessionMetrics::record_opened();
        tracing::debug!(session_id = %id, "Session opened");

        Ok(Self {
            id,
            tx: Some(tx),
            state: SessionState::Active,
            opened_at: Instant::now(),
            monitor: database.monitor().clone(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    fn connection(&mut self) -> Result<&mut SqliteConnection, DbError> {
        let (id, state) = (self.id, self.state);
        match self.tx.as_deref_mut() {
            Some(conn) if state == SessionState::Active => Ok(conn),
            _ => Err(DbError::validation(format!(
                "session {} is {} and cannot run statements",
                id, state
            ))),
        }
    }

    fn take_transaction(&mut self) -> Result<Transaction<'static, Sqlite>, DbError> {
        match self.tx.take() {
            Some(tx) if self.state == SessionState::Active => Ok(tx),
            other => {
                self.tx = other;
                Err(DbError::validation(format!(
                    "session {} is already {}",
                    self.id, self.state
                )))
            }
        }
    }

    fn finish<T>(
        &self,
        label: &str,
        started: Instant,
        result: Result<T, sqlx::Error>,
    ) -> Result<T, DbError> {
        self.monitor.record(label, started.elapsed());
        result.map_err(|e| {
            let err = DbError::from(e);
            QueryMetrics::record_error(err.kind());
            tracing::debug!(
                session_id = %self.id,
                query = %label,
                kind = %err.kind(),
                error = %err,
                "Statement failed"
            );
            err
        })
    }

    /// Execute a statement that returns no rows.
    pub async fn execute<'q, A>(
        &mut self,
        label: &str,
        query: Query<'q, Sqlite, A>,
    ) -> Result<SqliteQueryResult, DbError>
    where
        A: 'q + IntoArguments<'q, Sqlite>,
    {
        let started = Instant::now();
        let conn = self.connection()?;
        let result = query.execute(&mut *conn).await;
        self.finish(label, started, result)
    }

    /// Fetch exactly one row; zero rows is `NotFound`.
    pub async fn fetch_one_as<'q, O, A>(
        &mut self,
        label: &str,
        query: QueryAs<'q, Sqlite, O, A>,
    ) -> Result<O, DbError>
    where
        A: 'q + IntoArguments<'q, Sqlite>,
        O: Send + Unpin + for<'r> FromRow<'r, SqliteRow>,
    {
        let started = Instant::now();
        let conn = self.connection()?;
        let result = query.fetch_one(&mut *conn).await;
        self.finish(label, started, result)
    }

    pub async fn fetch_optional_as<'q, O, A>(
        &mut self,
        label: &str,
        query: QueryAs<'q, Sqlite, O, A>,
    ) -> Result<Option<O>, DbError>
    where
        A: 'q + IntoArguments<'q, Sqlite>,
        O: Send + Unpin + for<'r> FromRow<'r, SqliteRow>,
    {
        let started = Instant::now();
        let conn = self.connection()?;
        let result = query.fetch_optional(&mut *conn).await;
        self.finish(label, started, result)
    }

    pub async fn fetch_all_as<'q, O, A>(
        &mut self,
        label: &str,
        query: QueryAs<'q, Sqlite, O, A>,
    ) -> Result<Vec<O>, DbError>
    where
        A: 'q + IntoArguments<'q, Sqlite>,
        O: Send + Unpin + for<'r> FromRow<'r, SqliteRow>,
    {
        let started = Instant::now();
        let conn = self.connection()?;
        let result = query.fetch_all(&mut *conn).await;
        self.finish(label, started, result)
    }

    /// Fetch a single value from exactly one row.
    pub async fn fetch_scalar<'q, O, A>(
        &mut self,
        label: &str,
        query: QueryScalar<'q, Sqlite, O, A>,
    ) -> Result<O, DbError>
    where
        A: 'q + IntoArguments<'q, Sqlite>,
        O: Send + Unpin,
        (O,): for<'r> FromRow<'r, SqliteRow>,
    {
        let started = Instant::now();
        let conn = self.connection()?;
        let result = query.fetch_one(&mut *conn).await;
        self.finish(label, started, result)
    }

    pub async fn commit(&mut self) -> Result<(), DbError> {
        let tx = self.take_transaction()?;
        let started = Instant::now();
        let result = tx.commit().await;

        self.state = if result.is_ok() {
            SessionState::Committed
        } else {
            SessionState::RolledBack
        };
        self.finish("commit", started, result)
    }

    pub async fn rollback(&mut self) -> Result<(), DbError> {
        let tx = self.take_transaction()?;
        let started = Instant::now();
        let result = tx.rollback().await;

        self.state = SessionState::RolledBack;
        self.finish("rollback", started, result)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let outcome = match self.state {
            SessionState::Active => {
                tracing::warn!(
                    session_id = %self.id,
                    "Session dropped with an open transaction, rolling back"
                );
                SessionState::RolledBack
            }
            SessionState::Closed => return,
            finished => finished,
        };

        self.state = SessionState::Closed;
        SessionMetrics::record_closed(outcome.as_str());
        tracing::debug!(
            session_id = %self.id,
            outcome = %outcome,
            elapsed_ms = self.opened_at.elapsed().as_millis() as u64,
            "Session closed"
        );
    }
}

impl Database {
    /// Check out a connection and begin a transaction.
    ///
    /// Blocks for at most the configured pool timeout; an exhausted pool
    /// fails with `DbError::Connection`.
    pub async fn session(&self) -> Result<Session, DbError> {
        Session::begin(self).await
    }

    /// Run `f` inside a fresh session. `Ok` commits, `Err` rolls back and
    /// returns the original error. The connection is released either way.
    pub async fn with_session<T, F>(&self, f: F) -> Result<T, DbError>
    where
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T, DbError>>,
    {
        let mut session = self.session().await?;

        match f(&mut session).await {
            Ok(value) => {
                if session.is_active() {
                    session.commit().await?;
                }
                Ok(value)
            }
            Err(err) => {
                if session.is_active() {
                    if let Err(rollback_err) = session.rollback().await {
                        tracing::warn!(
                            session_id = %session.id(),
                            error = %rollback_err,
                            "Rollback failed after error"
                        );
                    }
                }
                tracing::debug!(
                    session_id = %session.id(),
                    kind = %err.kind(),
                    "Session rolled back"
                );
                Err(err)
            }
        }
    }

    /// `with_session` under the retry policy: every attempt gets its own
    /// session, so a connection left in an unknown state by a failed attempt
    /// is never reused.
    pub async fn transaction<T, F>(&self, operation: &str, f: F) -> Result<T, DbError>
    where
        F: for<'s> Fn(&'s mut Session) -> BoxFuture<'s, Result<T, DbError>>,
    {
        with_retry(self.retry_policy(), operation, || self.with_session(&f)).await
    }
}
