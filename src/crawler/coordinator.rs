//! Crawler coordinator - run orchestration
//!
//! This module wires the components together and drives one run:
//! - Opening the store, work queue and state cache
//! - Building the credential pool, circuit breaker and fetch gateway
//! - Discovering repositories onto the queue (batch or streaming)
//! - Draining the queue with the worker pool
//! - Recording the run and its tally

use crate::api::ApiEndpoints;
use crate::config::{Config, ExecutionStrategy, QueueMode};
use crate::crawler::discovery::build_discovery;
use crate::crawler::fetcher::{build_http_client, FetchGateway, HttpQuotaProbe};
use crate::crawler::processor::{ProcessorSettings, RepositoryProcessor};
use crate::crawler::workers::{ProducerDone, WorkerPool};
use crate::output::{CrawlMetrics, CrawlObserver, MetricsSnapshot};
use crate::state::{CircuitBreaker, CredentialPool};
use crate::storage::{
    Persister, RunStatus, RunTally, SqliteStateCache, SqliteStore, SqliteWorkQueue,
};
use crate::Result;
use reqwest::Client;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Outcome of a finished run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: i64,
    pub discovered: usize,
    pub tally: RunTally,
    pub metrics: MetricsSnapshot,
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Config,
    config_hash: String,
    store: Arc<SqliteStore>,
    queue: Arc<SqliteWorkQueue>,
    cache: Arc<SqliteStateCache>,
    client: Client,
    endpoints: ApiEndpoints,
    credentials: Arc<CredentialPool>,
    gateway: Arc<FetchGateway>,
    metrics: Arc<CrawlMetrics>,
}

impl Coordinator {
    /// Creates a new coordinator instance
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `config_hash` - Hash of the configuration file, recorded on the run
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully created coordinator
    /// * `Err(HarvestError)` - Failed to open storage or build the client
    pub fn new(config: Config, config_hash: String) -> Result<Self> {
        let db_path = Path::new(&config.output.database_path);
        let store = Arc::new(SqliteStore::open(db_path)?);
        let queue = Arc::new(SqliteWorkQueue::open(db_path)?);
        let cache = Arc::new(SqliteStateCache::open(db_path)?);

        let client = build_http_client(&config.user_agent, &config.api)?;
        let endpoints = ApiEndpoints::new(&config.api.base_url)?;

        let mut credentials =
            CredentialPool::new(config.api.tokens.clone(), config.fetch.quota_buffer);
        if config.fetch.check_quota {
            credentials = credentials.with_probe(Arc::new(HttpQuotaProbe::new(
                client.clone(),
                endpoints.clone(),
            )));
        }
        let credentials = Arc::new(credentials);

        let metrics = Arc::new(CrawlMetrics::new());
        let observer: Arc<dyn CrawlObserver> = metrics.clone();
        let gateway = Arc::new(FetchGateway::new(
            client.clone(),
            Arc::clone(&credentials),
            Arc::new(CircuitBreaker::from_config(&config.circuit_breaker)),
            config.fetch.clone(),
            observer,
        ));

        tracing::info!(
            credentials = credentials.len(),
            database = %db_path.display(),
            "Coordinator ready"
        );

        Ok(Self {
            config,
            config_hash,
            store,
            queue,
            cache,
            client,
            endpoints,
            credentials,
            gateway,
            metrics,
        })
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<SqliteWorkQueue> {
        &self.queue
    }

    pub fn cache(&self) -> &Arc<SqliteStateCache> {
        &self.cache
    }

    pub fn gateway(&self) -> &Arc<FetchGateway> {
        &self.gateway
    }

    /// Empties the work queue and state cache so the next run starts over
    pub fn reset_state(&self) -> Result<()> {
        let queued = self.queue.clear()?;
        let cached = self.cache.clear()?;
        tracing::info!(queued, cached, "Cleared queue and state cache");
        Ok(())
    }

    /// Runs discovery and the worker pool to completion
    ///
    /// The run row is created first and stamped `completed` or `failed`
    /// when the run ends. A failing repository never fails the run; only
    /// discovery or storage errors do.
    pub async fn run(&self) -> Result<RunSummary> {
        let run_id = self.store.create_run(&self.config_hash)?;
        tracing::info!("Starting crawl run {}", run_id);

        let purged = self.cache.purge_expired()?;
        if purged > 0 {
            tracing::debug!(purged, "Purged expired cache entries");
        }

        let reset_timer = self.spawn_credential_reset();
        let result = self.crawl().await;
        reset_timer.abort();

        match result {
            Ok((discovered, tally)) => {
                self.store.finish_run(run_id, RunStatus::Completed, tally)?;
                tracing::info!(
                    run_id,
                    discovered,
                    succeeded = tally.succeeded,
                    failed = tally.failed,
                    skipped = tally.skipped,
                    "Crawl completed"
                );
                Ok(RunSummary {
                    run_id,
                    discovered,
                    tally,
                    metrics: self.metrics.snapshot(),
                })
            }
            Err(e) => {
                tracing::error!(run_id, "Crawl failed: {}", e);
                self.store
                    .finish_run(run_id, RunStatus::Failed, RunTally::default())?;
                Err(e)
            }
        }
    }

    async fn crawl(&self) -> Result<(usize, RunTally)> {
        let discovery = build_discovery(
            &self.config,
            Arc::clone(&self.gateway),
            self.client.clone(),
            self.endpoints.clone(),
        )?;
        let pool = self.worker_pool();
        let limit = self.config.discovery.limit;

        tracing::info!(
            source = discovery.name(),
            mode = ?self.config.crawler.mode,
            limit,
            "Discovering repositories"
        );

        match self.config.crawler.mode {
            QueueMode::Batch => {
                let discovered = discovery.discover(self.queue.as_ref(), limit).await?;
                tracing::info!(discovered, "Discovery finished, draining queue");
                let tally = pool.drain().await?;
                Ok((discovered, tally))
            }
            QueueMode::Streaming => {
                let producer = ProducerDone::new();
                let discovering = {
                    let producer = producer.clone();
                    let discovery = &discovery;
                    async move {
                        let result = discovery.discover(self.queue.as_ref(), limit).await;
                        producer.finish();
                        result
                    }
                };
                let (discovered, tally) = tokio::join!(discovering, pool.run(producer));
                Ok((discovered?, tally?))
            }
        }
    }

    fn worker_pool(&self) -> WorkerPool {
        let persister: Arc<dyn Persister> = self.store.clone();
        let observer: Arc<dyn CrawlObserver> = self.metrics.clone();

        let mut processor = RepositoryProcessor::new(
            Arc::clone(&self.gateway),
            self.endpoints.clone(),
            persister,
            self.cache.clone(),
            ProcessorSettings::from_config(&self.config),
            Arc::clone(&observer),
        );
        if self.config.crawler.strategy == ExecutionStrategy::Tasks {
            let permits = self.config.crawler.db_permits.max(1) as usize;
            processor = processor.with_db_permits(Arc::new(Semaphore::new(permits)));
        }

        WorkerPool::new(
            Arc::new(processor),
            self.queue.clone(),
            observer,
            &self.config.crawler,
        )
    }

    /// Periodically clears exhaustion flags so recovered quotas are reused
    fn spawn_credential_reset(&self) -> JoinHandle<()> {
        let credentials = Arc::clone(&self.credentials);
        let period = Duration::from_secs(self.config.crawler.credential_reset_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                credentials.reset();
                tracing::info!("Reset credential exhaustion flags");
            }
        })
    }
}

/// Runs the main crawl operation
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `config_hash` - Hash of the configuration file
/// * `fresh` - Clear the queue and state cache before starting
///
/// # Example
///
/// ```no_run
/// use star_harvest::config::load_config_with_hash;
/// use star_harvest::crawler::run_crawl;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (config, hash) = load_config_with_hash(Path::new("harvest.toml"))?;
/// let summary = run_crawl(config, hash, false).await?;
/// println!("{} repositories succeeded", summary.tally.succeeded);
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(config: Config, config_hash: String, fresh: bool) -> Result<RunSummary> {
    let coordinator = Coordinator::new(config, config_hash)?;
    if fresh {
        coordinator.reset_state()?;
    }
    coordinator.run().await
}
