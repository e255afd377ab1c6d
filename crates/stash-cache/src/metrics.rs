//! Cache performance monitoring and metrics

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime},
};

use serde::{Deserialize, Serialize};

/// Cache performance statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Fresh entries returned without producing
    pub hits: u64,
    /// Stale entries returned while a revalidation was triggered
    pub stale_hits: u64,
    /// Lookups that found no entry
    pub misses: u64,
    /// Lookups that found an entry past both windows
    pub expirations: u64,
    /// Synchronous producer calls that succeeded
    pub productions: u64,
    /// Synchronous producer calls that failed
    pub production_failures: u64,
    /// Background revalidations spawned
    pub revalidations_started: u64,
    /// Background revalidations that stored a new value
    pub revalidations_completed: u64,
    /// Background revalidations whose producer or write-back failed
    pub revalidations_failed: u64,
    /// Stale hits that did not spawn because one was already in flight
    pub revalidations_skipped: u64,
    /// Entries removed by stale sweeps
    pub swept: u64,
    /// Average time spent in synchronous production (milliseconds)
    pub avg_production_time_ms: f64,
    /// Timestamp of cache creation
    pub created_at: SystemTime,
}

impl CacheStats {
    /// Lookups answered from the cache, fresh or stale
    pub fn served_from_cache(&self) -> u64 {
        self.hits + self.stale_hits
    }

    /// Total lookups
    pub fn lookups(&self) -> u64 {
        self.served_from_cache() + self.misses + self.expirations
    }

    /// Calculate hit rate as a percentage (0.0 to 100.0). Stale hits count.
    pub fn hit_rate(&self) -> f64 {
        let total = self.lookups();
        if total == 0 {
            0.0
        } else {
            (self.served_from_cache() as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage (0.0 to 100.0)
    pub fn miss_rate(&self) -> f64 {
        if self.lookups() == 0 {
            0.0
        } else {
            100.0 - self.hit_rate()
        }
    }

    /// Share of cache-served lookups that returned a stale value
    pub fn stale_rate(&self) -> f64 {
        let served = self.served_from_cache();
        if served == 0 {
            0.0
        } else {
            (self.stale_hits as f64 / served as f64) * 100.0
        }
    }

    /// Get uptime since cache creation
    pub fn uptime(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.created_at)
            .unwrap_or(Duration::from_secs(0))
    }
}

/// Thread-safe cache metrics tracker
#[derive(Debug, Clone)]
pub struct CacheMetrics {
    hits: Arc<AtomicU64>,
    stale_hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    expirations: Arc<AtomicU64>,
    productions: Arc<AtomicU64>,
    production_failures: Arc<AtomicU64>,
    total_production_time_us: Arc<AtomicU64>,
    revalidations_started: Arc<AtomicU64>,
    revalidations_completed: Arc<AtomicU64>,
    revalidations_failed: Arc<AtomicU64>,
    revalidations_skipped: Arc<AtomicU64>,
    swept: Arc<AtomicU64>,
    created_at: SystemTime,
}

impl CacheMetrics {
    /// Create new cache metrics
    pub fn new() -> Self {
        Self {
            hits: Arc::new(AtomicU64::new(0)),
            stale_hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            expirations: Arc::new(AtomicU64::new(0)),
            productions: Arc::new(AtomicU64::new(0)),
            production_failures: Arc::new(AtomicU64::new(0)),
            total_production_time_us: Arc::new(AtomicU64::new(0)),
            revalidations_started: Arc::new(AtomicU64::new(0)),
            revalidations_completed: Arc::new(AtomicU64::new(0)),
            revalidations_failed: Arc::new(AtomicU64::new(0)),
            revalidations_skipped: Arc::new(AtomicU64::new(0)),
            swept: Arc::new(AtomicU64::new(0)),
            created_at: SystemTime::now(),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_hit(&self) {
        self.stale_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a synchronous production with its duration
    pub fn record_production(&self, elapsed: Duration, succeeded: bool) {
        if succeeded {
            self.productions.fetch_add(1, Ordering::Relaxed);
        } else {
            self.production_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.total_production_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_revalidation_started(&self) {
        self.revalidations_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_revalidation_completed(&self) {
        self.revalidations_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_revalidation_failed(&self) {
        self.revalidations_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_revalidation_skipped(&self) {
        self.revalidations_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_swept(&self, count: usize) {
        self.swept.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Get current statistics snapshot
    pub fn snapshot(&self) -> CacheStats {
        let productions = self.productions.load(Ordering::Relaxed);
        let production_failures = self.production_failures.load(Ordering::Relaxed);
        let total_production_time_us = self.total_production_time_us.load(Ordering::Relaxed);

        let calls = productions + production_failures;
        let avg_production_time_ms = if calls > 0 {
            total_production_time_us as f64 / calls as f64 / 1000.0
        } else {
            0.0
        };

        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            productions,
            production_failures,
            revalidations_started: self.revalidations_started.load(Ordering::Relaxed),
            revalidations_completed: self.revalidations_completed.load(Ordering::Relaxed),
            revalidations_failed: self.revalidations_failed.load(Ordering::Relaxed),
            revalidations_skipped: self.revalidations_skipped.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
            avg_production_time_ms,
            created_at: self.created_at,
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.stale_hits,
            &self.misses,
            &self.expirations,
            &self.productions,
            &self.production_failures,
            &self.total_production_time_us,
            &self.revalidations_started,
            &self.revalidations_completed,
            &self.revalidations_failed,
            &self.revalidations_skipped,
            &self.swept,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Get a formatted summary of cache metrics
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Cache Metrics:\n  Hits: {}\n  Stale Hits: {}\n  Misses: {}\n  Expirations: {}\n  Hit Rate: {:.2}%\n  Productions: {} ({} failed)\n  Revalidations: {} started, {} completed, {} failed, {} skipped\n  Swept: {}\n  Avg Production: {:.2}ms",
            stats.hits,
            stats.stale_hits,
            stats.misses,
            stats.expirations,
            stats.hit_rate(),
            stats.productions,
            stats.production_failures,
            stats.revalidations_started,
            stats.revalidations_completed,
            stats.revalidations_failed,
            stats.revalidations_skipped,
            stats.swept,
            stats.avg_production_time_ms
        )
    }
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Operation timing helper
#[derive(Debug)]
pub struct OperationTimer {
    start_time: Instant,
}

impl OperationTimer {
    /// Start timing an operation
    pub fn start() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let metrics = CacheMetrics::new();
        for _ in 0..60 {
            metrics.record_hit();
        }
        for _ in 0..15 {
            metrics.record_stale_hit();
        }
        for _ in 0..20 {
            metrics.record_miss();
        }
        for _ in 0..5 {
            metrics.record_expiration();
        }

        let stats = metrics.snapshot();
        assert_eq!(stats.lookups(), 100);
        assert_eq!(stats.hit_rate(), 75.0);
        assert_eq!(stats.miss_rate(), 25.0);
        assert_eq!(stats.stale_rate(), 20.0);
    }

    #[test]
    fn test_empty_stats_rates() {
        let stats = CacheMetrics::new().snapshot();
        assert_eq!(stats.hit_rate(), 0.0);
        assert_eq!(stats.miss_rate(), 0.0);
        assert_eq!(stats.stale_rate(), 0.0);
    }

    #[test]
    fn test_production_timing() {
        let metrics = CacheMetrics::new();
        metrics.record_production(Duration::from_millis(4), true);
        metrics.record_production(Duration::from_millis(2), false);

        let stats = metrics.snapshot();
        assert_eq!(stats.productions, 1);
        assert_eq!(stats.production_failures, 1);
        assert!((stats.avg_production_time_ms - 3.0).abs() < 0.01);
    }

    #[test]
    fn test_revalidation_counters_and_reset() {
        let metrics = CacheMetrics::new();
        metrics.record_revalidation_started();
        metrics.record_revalidation_completed();
        metrics.record_revalidation_started();
        metrics.record_revalidation_failed();
        metrics.record_revalidation_skipped();
        metrics.record_swept(3);

        let stats = metrics.snapshot();
        assert_eq!(stats.revalidations_started, 2);
        assert_eq!(stats.revalidations_completed, 1);
        assert_eq!(stats.revalidations_failed, 1);
        assert_eq!(stats.revalidations_skipped, 1);
        assert_eq!(stats.swept, 3);
        assert!(metrics.summary().contains("2 started"));

        metrics.reset();
        let stats = metrics.snapshot();
        assert_eq!(stats.revalidations_started, 0);
        assert_eq!(stats.swept, 0);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = CacheMetrics::new();
        let clone = metrics.clone();
        clone.record_hit();
        assert_eq!(metrics.snapshot().hits, 1);
    }

    #[test]
    fn test_operation_timer() {
        let timer = OperationTimer::start();
        std::thread::sleep(Duration::from_millis(10));
        assert!(timer.elapsed() >= Duration::from_millis(10));
    }
}
