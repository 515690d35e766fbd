//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use crate::error::ErrorKind;

use super::{
    DB_ERRORS_TOTAL, DB_POOL_IDLE, DB_POOL_IN_USE, DB_QUERIES_TOTAL, DB_QUERY_LATENCY,
    DB_RETRIES_EXHAUSTED_TOTAL, DB_RETRIES_TOTAL, DB_SESSIONS_ACTIVE, DB_SESSIONS_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording statement metrics
pub struct QueryMetrics;

impl QueryMetrics {
    pub fn record(label: &str, elapsed: Duration) {
        DB_QUERIES_TOTAL.with_label_values(&[label]).inc();
        DB_QUERY_LATENCY
            .with_label_values(&[label])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_error(kind: ErrorKind) {
        DB_ERRORS_TOTAL.with_label_values(&[kind.as_str()]).inc();
    }
}

/// Helper struct for recording retry metrics
pub struct RetryMetrics;

impl RetryMetrics {
    pub fn record_retry(operation: &str) {
        DB_RETRIES_TOTAL.with_label_values(&[operation]).inc();
    }

    pub fn record_exhausted(operation: &str) {
        DB_RETRIES_EXHAUSTED_TOTAL.with_label_values(&[operation]).inc();
    }
}

/// Helper struct for recording session lifecycle metrics
pub struct SessionMetrics;

impl SessionMetrics {
    pub fn record_opened() {
        DB_SESSIONS_ACTIVE.inc();
    }

    pub fn record_closed(outcome: &str) {
        DB_SESSIONS_ACTIVE.dec();
        DB_SESSIONS_TOTAL.with_label_values(&[outcome]).inc();
    }
}

/// Helper struct for pool gauges
pub struct PoolMetrics;

impl PoolMetrics {
    pub fn set(idle: u32, in_use: u32) {
        DB_POOL_IDLE.set(idle as i64);
        DB_POOL_IN_USE.set(in_use as i64);
    }
}
