//! Crawler module for repository discovery and ingestion
//!
//! This module contains the core crawling logic, including:
//! - The fetch gateway with credential rotation, retries and circuit breaking
//! - Repository discovery (star-range search or ranking pages)
//! - Per-repository incremental processing
//! - The worker pool and overall run coordination

mod coordinator;
mod discovery;
mod fetcher;
mod parser;
mod processor;
mod workers;

pub use coordinator::{run_crawl, Coordinator, RunSummary};
pub use discovery::{build_discovery, DiscoverySource, RankingDiscovery, SearchDiscovery};
pub use fetcher::{
    backoff_delay, build_http_client, check_quota, reset_wait, FetchGateway, FetchResult,
    HttpQuotaProbe, Unavailable,
};
pub use parser::{extract_repository_paths, RepositoryPath};
pub use processor::{
    plan_windows, walk_step, CommitWindow, IngestSummary, ProcessOutcome, ProcessorSettings,
    RepositoryProcessor, WalkStep,
};
pub use workers::{ProducerDone, RepositoryHandler, WorkerPool};
