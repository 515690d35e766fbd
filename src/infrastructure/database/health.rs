//! Connectivity checks and store statistics.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::metrics::encode_metrics;

use super::pool::{Database, PoolStats};
use super::schema::TABLES;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableStats {
    pub row_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub status: HealthStatus,
    pub connection_pool: PoolStats,
    pub tables: BTreeMap<String, TableStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DatabaseStats {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

impl Database {
    /// Round-trip a trivial query under the retry policy.
    ///
    /// Returns `(true, None)` when the store answers, otherwise `false` with
    /// the classified error message. Never modifies the store.
    pub async fn check_connection(&self) -> (bool, Option<String>) {
        let result = self
            .transaction("check_connection", |session| {
                Box::pin(async move {
                    session
                        .fetch_scalar::<i64, _>("select_one", sqlx::query_scalar("SELECT 1"))
                        .await
                })
            })
            .await;

        match result {
            Ok(_) => (true, None),
            Err(e) => {
                tracing::warn!(kind = %e.kind(), error = %e, "Database connection check failed");
                (false, Some(e.to_string()))
            }
        }
    }

    /// Pool usage plus row counts for every table. Failures are reported in
    /// the result, not raised.
    pub async fn get_database_stats(&self) -> DatabaseStats {
        let connection_pool = self.pool_stats();

        let result = self
            .transaction("database_stats", |session| {
                Box::pin(async move {
                    let mut tables = BTreeMap::new();
                    for table in TABLES {
                        let sql = format!("SELECT COUNT(*) FROM {}", table);
                        let label = format!("count_{}", table);
                        let row_count: i64 = session
                            .fetch_scalar(&label, sqlx::query_scalar(&sql))
                            .await?;
                        tables.insert(
                            table.to_string(),
                            TableStats {
                                row_count: row_count.max(0) as u64,
                            },
                        );
                    }
                    Ok(tables)
                })
            })
            .await;

        match result {
            Ok(tables) => DatabaseStats {
                status: HealthStatus::Healthy,
                connection_pool,
                tables,
                error: None,
            },
            Err(e) => {
                tracing::error!(kind = %e.kind(), error = %e, "Failed to collect database stats");
                DatabaseStats {
                    status: HealthStatus::Error,
                    connection_pool,
                    tables: BTreeMap::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Check the connection, refresh the pool gauges and render every metric in
    /// Prometheus text format. A failed check is logged and still counted in
    /// the error metrics, so the dump is produced either way.
    pub async fn metrics_report(&self) -> Result<String, prometheus::Error> {
        let (ok, error) = self.check_connection().await;
        if !ok {
            tracing::warn!(
                error = error.as_deref().unwrap_or("unknown"),
                "Connection check failed before metrics dump"
            );
        }

        let pool = self.pool_stats();
        tracing::debug!(
            checked_in = pool.checked_in,
            checked_out = pool.checked_out,
            "Pool gauges refreshed"
        );

        encode_metrics()
    }
}
