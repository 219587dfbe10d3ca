//! Statistics generation from the harvest database
//!
//! This module provides functionality for extracting and displaying
//! run tallies, stored row counts and queue state.

use crate::api::RateRecord;
use crate::output::MetricsSnapshot;
use crate::storage::{
    RunRecord, RunTally, SqliteStateCache, SqliteStore, SqliteWorkQueue, StoreStats,
};
use crate::Result;
use chrono::{TimeZone, Utc};

/// Database statistics summary
#[derive(Debug, Clone)]
pub struct HarvestStatistics {
    /// Row counts for repositories, releases and commits
    pub store: StoreStats,

    /// Descriptors waiting in the work queue
    pub queue_depth: usize,

    /// Live entries in the state cache
    pub cache_entries: usize,

    /// Most recent runs, newest first
    pub recent_runs: Vec<RunRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `store` - The relational store
/// * `queue` - The work queue
/// * `cache` - The state cache
/// * `runs` - How many recent runs to include
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Successfully loaded statistics
/// * `Err(HarvestError)` - Failed to query statistics
pub fn load_statistics(
    store: &SqliteStore,
    queue: &SqliteWorkQueue,
    cache: &SqliteStateCache,
    runs: usize,
) -> Result<HarvestStatistics> {
    Ok(HarvestStatistics {
        store: store.stats()?,
        queue_depth: queue.len()?,
        cache_entries: cache.len()?,
        recent_runs: store.recent_runs(runs)?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("Stored:");
    println!("  Repositories: {}", stats.store.repositories);
    println!("  Releases: {}", stats.store.releases);
    println!("  Commits: {}", stats.store.commits);
    println!();

    println!("Queue:");
    println!("  Pending repositories: {}", stats.queue_depth);
    println!("  Cache entries: {}", stats.cache_entries);
    println!();

    if stats.recent_runs.is_empty() {
        println!("No runs recorded yet.");
        return;
    }

    println!("Recent Runs:");
    for run in &stats.recent_runs {
        println!(
            "  #{} {} started {} ({})",
            run.id,
            run.status.to_db_string(),
            run.started_at,
            format_tally(&run.tally)
        );
    }
}

/// Renders a tally as `N succeeded, N failed, N skipped`
pub fn format_tally(tally: &RunTally) -> String {
    format!(
        "{} succeeded, {} failed, {} skipped",
        tally.succeeded, tally.failed, tally.skipped
    )
}

/// Renders the end-of-run report
pub fn format_run_summary(run_id: i64, tally: &RunTally, metrics: &MetricsSnapshot) -> String {
    let success_rate = if tally.total() > 0 {
        (tally.succeeded as f64 / tally.total() as f64) * 100.0
    } else {
        0.0
    };

    let mut out = String::new();
    out.push_str(&format!("=== Run #{} ===\n", run_id));
    out.push_str(&format!("  Repositories: {}\n", tally.total()));
    out.push_str(&format!("  {}\n", format_tally(tally)));
    out.push_str(&format!("  Success rate: {:.1}%\n", success_rate));
    out.push_str(&format!(
        "  Requests: {} ({} retries, {} credential rotations)\n",
        metrics.requests, metrics.retries, metrics.rotations
    ));
    out.push_str(&format!("  Cache hits: {}\n", metrics.cache_hits));
    out.push_str(&format!(
        "  Processing time: mean {:.2}s, max {:.2}s over {} repositories\n",
        metrics.mean_processing.as_secs_f64(),
        metrics.max_processing.as_secs_f64(),
        metrics.processed
    ));
    out.push_str(&format!("  Queue depth: {}\n", metrics.queue_depth));
    out
}

pub fn print_run_summary(run_id: i64, tally: &RunTally, metrics: &MetricsSnapshot) {
    print!("{}", format_run_summary(run_id, tally, metrics));
}

/// Renders one credential's quota line for `--check-tokens`
pub fn format_quota(label: &str, rate: &RateRecord) -> String {
    let reset = Utc
        .timestamp_opt(rate.reset, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| rate.reset.to_string());
    format!(
        "  {}: {}/{} remaining, resets {}",
        label, rate.remaining, rate.limit, reset
    )
}
