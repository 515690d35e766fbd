//! Per-statement performance tracking.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::config::MonitorConfig;
use crate::metrics::QueryMetrics;

/// Accumulated timings for one statement label.
#[derive(Debug, Clone, Serialize)]
pub struct QueryStats {
    pub count: u64,
    pub total_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub last_executed: DateTime<Utc>,
}

impl QueryStats {
    fn first(elapsed_ms: f64) -> Self {
        Self {
            count: 1,
            total_ms: elapsed_ms,
            min_ms: elapsed_ms,
            max_ms: elapsed_ms,
            last_executed: Utc::now(),
        }
    }

    fn observe(&mut self, elapsed_ms: f64) {
        self.count += 1;
        self.total_ms += elapsed_ms;
        self.min_ms = self.min_ms.min(elapsed_ms);
        self.max_ms = self.max_ms.max(elapsed_ms);
        self.last_executed = Utc::now();
    }

    pub fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }
}

/// A statement label with its stats.
#[derive(Debug, Clone, Serialize)]
pub struct QueryReport {
    pub query: String,
    pub avg_ms: f64,
    pub stats: QueryStats,
}

/// Concurrent registry of statement timings shared by every session.
pub struct QueryMonitor {
    stats: DashMap<String, QueryStats>,
    slow_threshold: Duration,
}

impl Default for QueryMonitor {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl QueryMonitor {
    pub fn new(slow_threshold: Duration) -> Self {
        Self {
            stats: DashMap::new(),
            slow_threshold,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(Duration::from_millis(config.slow_query_threshold_ms))
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    /// Record one execution of `label`.
    pub fn record(&self, label: &str, elapsed: Duration) {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;

        self.stats
            .entry(label.to_string())
            .and_modify(|stats| stats.observe(elapsed_ms))
            .or_insert_with(|| QueryStats::first(elapsed_ms));

        QueryMetrics::record(label, elapsed);

        if elapsed > self.slow_threshold {
            tracing::warn!(
                query = %label,
                elapsed_ms = elapsed_ms,
                threshold_ms = self.slow_threshold.as_millis() as u64,
                "Slow query detected"
            );
        }
    }

    /// Statements whose average exceeds `threshold` (the monitor's own
    /// threshold when `None`), slowest first.
    pub fn slow_queries(&self, threshold: Option<Duration>) -> Vec<QueryReport> {
        let threshold_ms = threshold.unwrap_or(self.slow_threshold).as_secs_f64() * 1000.0;
        let mut reports: Vec<QueryReport> = self
            .snapshot()
            .into_iter()
            .filter(|report| report.avg_ms > threshold_ms)
            .collect();
        reports.sort_by(|a, b| b.avg_ms.total_cmp(&a.avg_ms));
        reports
    }

    /// The `limit` most executed statements, most frequent first.
    pub fn most_frequent(&self, limit: usize) -> Vec<QueryReport> {
        let mut reports = self.snapshot();
        reports.sort_by(|a, b| b.stats.count.cmp(&a.stats.count));
        reports.truncate(limit);
        reports
    }

    pub fn snapshot(&self) -> Vec<QueryReport> {
        self.stats
            .iter()
            .map(|entry| QueryReport {
                query: entry.key().clone(),
                avg_ms: entry.value().avg_ms(),
                stats: entry.value().clone(),
            })
            .collect()
    }

    pub fn get(&self, label: &str) -> Option<QueryStats> {
        self.stats.get(label).map(|s| s.clone())
    }

    pub fn reset(&self) {
        self.stats.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accumulates() {
        let monitor = QueryMonitor::new(Duration::from_secs(1));
        monitor.record("select_application", Duration::from_millis(10));
        monitor.record("select_application", Duration::from_millis(30));

        let stats = monitor.get("select_application").unwrap();
        assert_eq!(stats.count, 2);
        assert!((stats.min_ms - 10.0).abs() < 0.001);
        assert!((stats.max_ms - 30.0).abs() < 0.001);
        assert!((stats.avg_ms() - 20.0).abs() < 0.001);
    }

    #[test]
    fn test_slow_queries_sorted_by_average() {
        let monitor = QueryMonitor::new(Duration::from_millis(50));
        monitor.record("fast", Duration::from_millis(5));
        monitor.record("slow", Duration::from_millis(80));
        monitor.record("slower", Duration::from_millis(200));

        let slow = monitor.slow_queries(None);
        let labels: Vec<&str> = slow.iter().map(|r| r.query.as_str()).collect();
        assert_eq!(labels, vec!["slower", "slow"]);

        let all = monitor.slow_queries(Some(Duration::ZERO));
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_most_frequent_respects_limit() {
        let monitor = QueryMonitor::default();
        for _ in 0..3 {
            monitor.record("count_rows", Duration::from_millis(1));
        }
        monitor.record("insert_application", Duration::from_millis(1));
        monitor.record("update_status", Duration::from_millis(1));

        let top = monitor.most_frequent(1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].query, "count_rows");
        assert_eq!(top[0].stats.count, 3);
    }

    #[test]
    fn test_reset_clears_stats() {
        let monitor = QueryMonitor::default();
        monitor.record("select_one", Duration::from_millis(1));
        monitor.reset();
        assert!(monitor.snapshot().is_empty());
        assert!(monitor.get("select_one").is_none());
    }
}
