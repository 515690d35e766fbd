//! Prometheus metrics for the data-access layer.
//!
//! - Query metrics (executions and latency by statement label)
//! - Error metrics (failures by semantic kind)
//! - Retry metrics (re-attempts and exhausted budgets by operation)
//! - Session metrics (active sessions, outcomes)
//! - Pool metrics (idle and in-use connections)

mod helpers;

pub use helpers::{encode_metrics, PoolMetrics, QueryMetrics, RetryMetrics, SessionMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, HistogramVec,
    IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "jobtrack";

lazy_static! {
    // ============================================================================
    // Query Metrics
    // ============================================================================

    /// Statements executed, by label
    pub static ref DB_QUERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_db_queries_total", METRIC_PREFIX),
        "Total statements executed through a session",
        &["query"]
    ).unwrap();

    /// Statement latency, by label
    pub static ref DB_QUERY_LATENCY: HistogramVec = register_histogram_vec!(
        format!("{}_db_query_latency_seconds", METRIC_PREFIX),
        "Statement latency in seconds",
        &["query"],
        vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    /// Classified failures, by kind
    pub static ref DB_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_db_errors_total", METRIC_PREFIX),
        "Total classified database errors",
        &["kind"]
    ).unwrap();

    // ============================================================================
    // Retry Metrics
    // ============================================================================

    /// Re-attempts after a transient failure, by operation
    pub static ref DB_RETRIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_db_retries_total", METRIC_PREFIX),
        "Total retry attempts after transient failures",
        &["operation"]
    ).unwrap();

    /// Operations that ran out of attempts, by operation
    pub static ref DB_RETRIES_EXHAUSTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_db_retries_exhausted_total", METRIC_PREFIX),
        "Total operations that exhausted their retry budget",
        &["operation"]
    ).unwrap();

    // ============================================================================
    // Session Metrics
    // ============================================================================

    /// Sessions currently holding a connection
    pub static ref DB_SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_db_sessions_active", METRIC_PREFIX),
        "Number of open sessions"
    ).unwrap();

    /// Finished sessions, by outcome
    pub static ref DB_SESSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_db_sessions_total", METRIC_PREFIX),
        "Total finished sessions by outcome",
        &["outcome"]
    ).unwrap();

    // ============================================================================
    // Pool Metrics
    // ============================================================================

    /// Idle connections in the pool
    pub static ref DB_POOL_IDLE: IntGauge = register_int_gauge!(
        format!("{}_db_pool_idle_connections", METRIC_PREFIX),
        "Idle connections in the pool"
    ).unwrap();

    /// Connections currently checked out
    pub static ref DB_POOL_IN_USE: IntGauge = register_int_gauge!(
        format!("{}_db_pool_in_use_connections", METRIC_PREFIX),
        "Connections currently checked out of the pool"
    ).unwrap();
}
