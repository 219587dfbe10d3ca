//! Observability hooks
//!
//! Components report events through `CrawlObserver`; exporting them anywhere
//! is left to the implementor. `CrawlMetrics` keeps in-process counters for
//! the end-of-run report.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Receives crawl events; every method defaults to a no-op
pub trait CrawlObserver: Send + Sync {
    fn request_sent(&self) {}

    fn retry_performed(&self) {}

    fn credential_rotated(&self) {}

    fn cache_hit(&self) {}

    fn repository_processed(&self, _elapsed: Duration) {}

    fn queue_depth(&self, _depth: usize) {}
}

/// Observer that discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl CrawlObserver for NoopObserver {}

pub fn noop_observer() -> Arc<dyn CrawlObserver> {
    Arc::new(NoopObserver)
}

/// Atomic counters fed by the observer hooks
#[derive(Debug, Default)]
pub struct CrawlMetrics {
    requests: AtomicU64,
    retries: AtomicU64,
    rotations: AtomicU64,
    cache_hits: AtomicU64,
    processed: AtomicU64,
    processing_micros_total: AtomicU64,
    processing_micros_max: AtomicU64,
    queue_depth: AtomicU64,
}

/// Point-in-time copy of `CrawlMetrics`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub retries: u64,
    pub rotations: u64,
    pub cache_hits: u64,
    pub processed: u64,
    pub mean_processing: Duration,
    pub max_processing: Duration,
    pub queue_depth: u64,
}

impl CrawlMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let processed = self.processed.load(Ordering::Relaxed);
        let total = self.processing_micros_total.load(Ordering::Relaxed);
        let mean = if processed > 0 { total / processed } else { 0 };

        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            processed,
            mean_processing: Duration::from_micros(mean),
            max_processing: Duration::from_micros(
                self.processing_micros_max.load(Ordering::Relaxed),
            ),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
        }
    }
}

impl CrawlObserver for CrawlMetrics {
    fn request_sent(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    fn retry_performed(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    fn credential_rotated(&self) {
        self.rotations.fetch_add(1, Ordering::Relaxed);
    }

    fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn repository_processed(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.processing_micros_total
            .fetch_add(micros, Ordering::Relaxed);
        self.processing_micros_max
            .fetch_max(micros, Ordering::Relaxed);
    }

    fn queue_depth(&self, depth: usize) {
        self.queue_depth.store(depth as u64, Ordering::Relaxed);
    }
}
