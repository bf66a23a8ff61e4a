use modgraph_core::{CacheKey, CacheReporter};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

/// Point-in-time view of transform cache behaviour
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    /// Lookups answered by some store
    pub hits: u64,
    /// Lookups that went to the worker farm
    pub misses: u64,
    /// Store reads that failed (and failed the caller)
    pub read_failures: u64,
    /// Store writes that failed (reported only)
    pub write_failures: u64,
    /// Hit rate as percentage (0-100)
    pub hit_rate: f64,
}

impl CacheMetrics {
    pub fn calculate_hit_rate(&mut self) {
        let total_requests = self.hits + self.misses;
        if total_requests > 0 {
            self.hit_rate = (self.hits as f64 / total_requests as f64) * 100.0;
        } else {
            self.hit_rate = 0.0;
        }
    }
}

/// Lock-free counters; doubles as the default failure reporter.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    hits: AtomicU64,
    misses: AtomicU64,
    read_failures: AtomicU64,
    write_failures: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheMetrics {
        let mut metrics = CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            hit_rate: 0.0,
        };
        metrics.calculate_hit_rate();
        metrics
    }
}

impl CacheReporter for MetricsCollector {
    fn cache_read_failed(&self, store: &str, key: &CacheKey, error: &str) {
        self.read_failures.fetch_add(1, Ordering::Relaxed);
        error!(store, key = %key, "Cache read failed: {}", error);
    }

    fn cache_write_failed(&self, store: &str, key: &CacheKey, error: &str) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
        warn!(store, key = %key, "Cache write failed: {}", error);
    }
}

/// Counts failures locally, then passes them on to a caller-supplied reporter.
pub(crate) struct ForwardingReporter {
    pub(crate) metrics: Arc<MetricsCollector>,
    pub(crate) inner: Arc<dyn CacheReporter>,
}

impl CacheReporter for ForwardingReporter {
    fn cache_read_failed(&self, store: &str, key: &CacheKey, error: &str) {
        self.metrics.read_failures.fetch_add(1, Ordering::Relaxed);
        self.inner.cache_read_failed(store, key, error);
    }

    fn cache_write_failed(&self, store: &str, key: &CacheKey, error: &str) {
        self.metrics.write_failures.fetch_add(1, Ordering::Relaxed);
        self.inner.cache_write_failed(store, key, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_from_counters() {
        let collector = MetricsCollector::new();
        collector.record_hit();
        collector.record_hit();
        collector.record_hit();
        collector.record_miss();
        let key = CacheKey::new(vec![1], "aa");
        collector.cache_write_failed("file", &key, "disk full");

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.hits, 3);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.write_failures, 1);
        assert!((snapshot.hit_rate - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn forwarded_failures_are_counted_on_both_sides() {
        let metrics = Arc::new(MetricsCollector::new());
        let inner = Arc::new(MetricsCollector::new());
        let reporter = ForwardingReporter {
            metrics: metrics.clone(),
            inner: inner.clone(),
        };
        let key = CacheKey::new(vec![2], "bb");
        reporter.cache_read_failed("memory", &key, "boom");
        reporter.cache_write_failed("file", &key, "disk full");

        for snapshot in [metrics.snapshot(), inner.snapshot()] {
            assert_eq!(snapshot.read_failures, 1);
            assert_eq!(snapshot.write_failures, 1);
        }
    }

    #[test]
    fn empty_collector_has_zero_hit_rate() {
        assert_eq!(MetricsCollector::new().snapshot(), CacheMetrics::default());
    }
}
