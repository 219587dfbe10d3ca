//! Worker pool draining the work queue
//!
//! Workers loop `pop -> process` until the queue is empty, discovery has
//! finished, and the queue is still empty after a short grace re-check.
//! One repository failing never stops a worker.

use crate::api::RepositoryDescriptor;
use crate::config::{CrawlerConfig, ExecutionStrategy};
use crate::crawler::processor::{ProcessOutcome, RepositoryProcessor};
use crate::output::CrawlObserver;
use crate::storage::{RunTally, StorageError, WorkQueue};
use crate::{HarvestError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Processes one queued repository
#[async_trait]
pub trait RepositoryHandler: Send + Sync {
    async fn handle(&self, descriptor: &RepositoryDescriptor) -> Result<ProcessOutcome>;
}

#[async_trait]
impl RepositoryHandler for RepositoryProcessor {
    async fn handle(&self, descriptor: &RepositoryDescriptor) -> Result<ProcessOutcome> {
        self.process(descriptor).await
    }
}

/// Signals workers that no more items will be pushed
#[derive(Debug, Clone, Default)]
pub struct ProducerDone(Arc<AtomicBool>);

impl ProducerDone {
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal that is already set, for draining a pre-filled queue
    pub fn finished() -> Self {
        let done = Self::new();
        done.finish();
        done
    }

    pub fn finish(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
struct DrainSettings {
    pop_timeout: Duration,
    empty_grace: Duration,
}

pub struct WorkerPool {
    handler: Arc<dyn RepositoryHandler>,
    queue: Arc<dyn WorkQueue>,
    observer: Arc<dyn CrawlObserver>,
    strategy: ExecutionStrategy,
    concurrency: usize,
    settings: DrainSettings,
}

impl WorkerPool {
    pub fn new(
        handler: Arc<dyn RepositoryHandler>,
        queue: Arc<dyn WorkQueue>,
        observer: Arc<dyn CrawlObserver>,
        config: &CrawlerConfig,
    ) -> Self {
        Self {
            handler,
            queue,
            observer,
            strategy: config.strategy,
            concurrency: config.concurrency.max(1) as usize,
            settings: DrainSettings {
                pop_timeout: Duration::from_millis(config.pop_timeout_ms),
                empty_grace: Duration::from_millis(config.empty_grace_ms),
            },
        }
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    /// Runs every worker until the queue is drained
    ///
    /// # Arguments
    ///
    /// * `producer` - Set once discovery has pushed its last item; workers
    ///   seeing an empty queue keep polling until then
    ///
    /// # Returns
    ///
    /// The tally summed over all workers
    pub async fn run(&self, producer: ProducerDone) -> Result<RunTally> {
        tracing::info!(
            workers = self.concurrency,
            strategy = ?self.strategy,
            "Starting worker pool"
        );

        let mut handles = Vec::with_capacity(self.concurrency);
        for worker in 0..self.concurrency {
            let drain = worker_loop(
                worker,
                Arc::clone(&self.handler),
                Arc::clone(&self.queue),
                Arc::clone(&self.observer),
                producer.clone(),
                self.settings,
            );

            let handle = match self.strategy {
                ExecutionStrategy::Tasks => tokio::spawn(drain),
                ExecutionStrategy::Threads => {
                    let runtime = tokio::runtime::Handle::current();
                    tokio::task::spawn_blocking(move || runtime.block_on(drain))
                }
            };
            handles.push(handle);
        }

        let mut tally = RunTally::default();
        for handle in handles {
            match handle.await {
                Ok(worker_tally) => tally.merge(worker_tally),
                Err(e) => tracing::error!("Worker stopped abnormally: {}", e),
            }
        }

        tracing::info!(
            succeeded = tally.succeeded,
            failed = tally.failed,
            skipped = tally.skipped,
            "Worker pool finished"
        );
        Ok(tally)
    }

    /// Drains a queue that is already filled
    pub async fn drain(&self) -> Result<RunTally> {
        self.run(ProducerDone::finished()).await
    }
}

/// Consecutive transient queue errors a worker rides out before stopping
const MAX_QUEUE_RETRIES: u32 = 10;

async fn worker_loop(
    worker: usize,
    handler: Arc<dyn RepositoryHandler>,
    queue: Arc<dyn WorkQueue>,
    observer: Arc<dyn CrawlObserver>,
    producer: ProducerDone,
    settings: DrainSettings,
) -> RunTally {
    let mut tally = RunTally::default();
    let mut queue_errors: u32 = 0;

    loop {
        let item = match queue.pop(settings.pop_timeout).await {
            Ok(item) => {
                queue_errors = 0;
                item
            }
            Err(StorageError::Serialization(e)) => {
                // The row is already consumed; count it and move on
                queue_errors = 0;
                tally.failed += 1;
                tracing::error!(worker, "Dropping undecodable queue item: {}", e);
                continue;
            }
            Err(e) => {
                if keep_polling(worker, &e, &mut queue_errors, settings).await {
                    continue;
                }
                break;
            }
        };

        let Some(descriptor) = item else {
            if !producer.is_finished() {
                continue;
            }
            tokio::time::sleep(settings.empty_grace).await;
            match queue.size().await {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) => {
                    if keep_polling(worker, &e, &mut queue_errors, settings).await {
                        continue;
                    }
                    break;
                }
            }
        };

        if let Ok(depth) = queue.size().await {
            observer.queue_depth(depth);
        }

        let started = Instant::now();
        match handler.handle(&descriptor).await {
            Ok(ProcessOutcome::Skipped) => tally.skipped += 1,
            Ok(ProcessOutcome::Ingested(_)) => {
                tally.succeeded += 1;
                observer.repository_processed(started.elapsed());
            }
            Err(HarvestError::Deferred { full_name, reason }) => {
                tally.failed += 1;
                observer.repository_processed(started.elapsed());
                tracing::warn!(worker, repo = %full_name, "Deferred: {}", reason);
            }
            Err(e) => {
                tally.failed += 1;
                observer.repository_processed(started.elapsed());
                tracing::error!(
                    worker,
                    repo = %descriptor.full_name,
                    "Failed to process repository: {}",
                    e
                );
            }
        }
    }

    tracing::debug!(worker, "Worker exiting");
    tally
}

/// Waits out a transient queue error; returns false when the worker should stop
async fn keep_polling(
    worker: usize,
    error: &StorageError,
    consecutive: &mut u32,
    settings: DrainSettings,
) -> bool {
    if !error.is_transient() || *consecutive >= MAX_QUEUE_RETRIES {
        tracing::error!(worker, "Queue unavailable, stopping worker: {}", error);
        return false;
    }

    *consecutive += 1;
    tracing::warn!(worker, attempt = *consecutive, "Queue busy, retrying: {}", error);
    tokio::time::sleep(settings.pop_timeout).await;
    true
}
