//! SQLite connection pool.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;

use crate::config::DatabaseConfig;
use crate::error::DbError;
use crate::metrics::PoolMetrics;

use super::monitor::QueryMonitor;
use super::retry::RetryPolicy;

/// Point-in-time view of pool usage.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    /// Configured steady-state size
    pub size: u32,
    /// Upper bound including overflow
    pub max_connections: u32,
    /// Open connections sitting idle in the pool
    pub checked_in: u32,
    /// Connections currently held by sessions
    pub checked_out: u32,
    /// Open connections beyond `size`
    pub overflow: u32,
}

/// Handle to the process-wide connection pool.
///
/// Cloning is cheap and every clone shares the same pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    config: Arc<DatabaseConfig>,
    retry: RetryPolicy,
    monitor: Arc<QueryMonitor>,
    file_path: Option<PathBuf>,
}

impl Database {
    /// Build the pool from configuration.
    ///
    /// No connection is opened here; the first session does that.
    pub fn connect(
        config: &DatabaseConfig,
        retry: RetryPolicy,
        monitor: Arc<QueryMonitor>,
    ) -> Result<Self, DbError> {
        if !config.url.starts_with("sqlite:") {
            return Err(DbError::connection(
                "unsupported database URL",
                format!("expected a sqlite: URL, got '{}'", config.url),
            ));
        }

        let mut options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout());
        if !config.echo {
            options = options.disable_statement_logging();
        }

        let in_memory = is_memory_url(&config.url);
        let recycle = (config.pool_recycle_seconds > 0).then(|| config.pool_recycle());

        // An in-memory database lives only as long as one of its connections,
        // so keep one open and never recycle it.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .min_connections(1)
                .max_lifetime(None::<Duration>)
                .idle_timeout(None::<Duration>)
        } else {
            SqlitePoolOptions::new()
                .min_connections(0)
                .max_lifetime(recycle)
                .idle_timeout(recycle)
        };

        let pool = pool_options
            .max_connections(config.max_connections())
            .acquire_timeout(config.pool_timeout())
            .test_before_acquire(config.pre_ping)
            .connect_lazy_with(options);

        let file_path = if in_memory {
            None
        } else {
            sqlite_file_path(&config.url)
        };

        tracing::info!(
            pool_size = config.pool_size,
            max_overflow = config.max_overflow,
            timeout_seconds = config.pool_timeout_seconds,
            recycle_seconds = config.pool_recycle_seconds,
            in_memory,
            "Database connection pool created"
        );

        Ok(Self {
            pool,
            config: Arc::new(config.clone()),
            retry,
            monitor,
            file_path,
        })
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn monitor(&self) -> &Arc<QueryMonitor> {
        &self.monitor
    }

    /// Backing file for file-based stores.
    pub fn file_path(&self) -> Option<&PathBuf> {
        self.file_path.as_ref()
    }

    pub fn pool_stats(&self) -> PoolStats {
        let open = self.pool.size();
        let idle = (self.pool.num_idle() as u32).min(open);
        let checked_out = open - idle;

        PoolMetrics::set(idle, checked_out);

        PoolStats {
            size: self.config.pool_size,
            max_connections: self.config.max_connections(),
            checked_in: idle,
            checked_out,
            overflow: open.saturating_sub(self.config.pool_size),
        }
    }

    /// Close the pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database connection pool closed");
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// File path named by a `sqlite:` URL, without query parameters.
fn sqlite_file_path(url: &str) -> Option<PathBuf> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() {
        None
    } else {
        Some(PathBuf::from(path))
    }
}
