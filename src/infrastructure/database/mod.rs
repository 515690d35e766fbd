//! Retryable data-access layer.
//!
//! - `Database`: the shared connection pool and its tunables
//! - `Session`: one transaction on one pooled connection, released on every exit path
//! - `with_retry`: bounded re-attempts on transient failures only
//! - `QueryMonitor`: per-statement timings and slow-query detection
//! - health checks, store statistics and online backups

mod backoff;
mod backup;
mod health;
mod monitor;
mod pool;
mod retry;
mod schema;
mod session;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use health::{DatabaseStats, HealthStatus, TableStats};
pub use monitor::{QueryMonitor, QueryReport, QueryStats};
pub use pool::{Database, PoolStats};
pub use retry::{with_retry, RetryPolicy, Retryable};
pub use schema::TABLES;
pub use session::{Session, SessionState};
