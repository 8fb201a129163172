//! Query metrics
//!
//! Per-query counters for cache effectiveness, handler failures and
//! execution time.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counters for a single query id
#[derive(Debug)]
pub struct QueryMetrics {
    query_id: String,
    hits: AtomicU64,
    misses: AtomicU64,

    /// Handler invocations that returned an error
    errors: AtomicU64,

    /// Successful handler runs and the time they took
    executions: AtomicU64,
    total_time_ns: AtomicU64,
}

impl QueryMetrics {
    pub fn new(query_id: impl Into<String>) -> Self {
        QueryMetrics {
            query_id: query_id.into(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            executions: AtomicU64::new(0),
            total_time_ns: AtomicU64::new(0),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_execution(&self, duration: Duration) {
        self.executions.fetch_add(1, Ordering::Relaxed);
        self.total_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            query_id: self.query_id.clone(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            total_time_ns: self.total_time_ns.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of one query's counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub query_id: String,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub executions: u64,
    pub total_time_ns: u64,
}

/// Metrics for every query id seen so far
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    queries: DashMap<String, Arc<QueryMetrics>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metrics for `id`, created on first use
    pub fn for_query(&self, id: &str) -> Arc<QueryMetrics> {
        if let Some(existing) = self.queries.get(id) {
            return existing.value().clone();
        }
        self.queries
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(QueryMetrics::new(id)))
            .value()
            .clone()
    }

    /// Snapshots sorted by query id
    pub fn snapshots(&self) -> Vec<MetricsSnapshot> {
        let mut snapshots: Vec<_> = self
            .queries
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.query_id.cmp(&b.query_id));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let metrics = QueryMetrics::new("latest");

        metrics.record_hit();
        metrics.record_miss();
        metrics.record_error();
        metrics.record_execution(Duration::from_millis(10));
        metrics.record_execution(Duration::from_millis(20));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.query_id, "latest");
        assert_eq!((snapshot.hits, snapshot.misses, snapshot.errors), (1, 1, 1));
        assert_eq!(snapshot.executions, 2);
        assert_eq!(snapshot.total_time_ns, 30_000_000);
    }

    #[test]
    fn test_registry_shares_metrics() {
        let registry = MetricsRegistry::new();
        registry.for_query("b").record_miss();
        registry.for_query("a").record_hit();
        registry.for_query("b").record_hit();

        let snapshots = registry.snapshots();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].query_id, "a");
        assert_eq!(snapshots[1].hits, 1);
        assert_eq!(snapshots[1].misses, 1);
    }
}
