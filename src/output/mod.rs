//! Output module for run reports and observability hooks
//!
//! This module handles:
//! - Observer hooks and in-process crawl counters
//! - Printing run tallies and database statistics

mod metrics;
pub mod stats;

pub use metrics::{noop_observer, CrawlMetrics, CrawlObserver, MetricsSnapshot, NoopObserver};
pub use stats::{
    format_quota, format_run_summary, format_tally, load_statistics, print_run_summary,
    print_statistics, HarvestStatistics,
};
