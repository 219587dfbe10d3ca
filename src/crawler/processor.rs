//! Per-repository ingestion
//!
//! `RepositoryProcessor` turns one descriptor into a persisted bundle:
//! releases (or tags standing in for them), and the commits between each
//! consecutive pair of releases. On repeat runs the walk stops at the last
//! release already ingested, so only newer history is fetched.

use crate::api::{
    ApiEndpoints, Commit, CommitRecord, CompareRecord, Release, ReleaseRecord, Repository,
    RepositoryDescriptor, TagRecord,
};
use crate::config::{CacheConfig, Config, CrawlerConfig};
use crate::crawler::fetcher::{FetchGateway, FetchResult};
use crate::output::CrawlObserver;
use crate::storage::{Persister, StateCache};
use crate::{HarvestError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// A range of history fetched for one release
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitWindow {
    /// Commits reachable from `head` but not from the next-older release `base`
    Compare { base: String, head: String },
    /// The oldest release has no base; take a capped slice of its history
    Recent { tag: String },
}

impl CommitWindow {
    /// The release the window's commits belong to
    pub fn tag(&self) -> &str {
        match self {
            Self::Compare { head, .. } => head,
            Self::Recent { tag } => tag,
        }
    }
}

/// One step of the newest-to-oldest release walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkStep {
    Continue(CommitWindow),
    Stop,
}

/// Decides what to fetch for `releases[index]`
///
/// `releases` is newest first. The walk stops past the end of the list or
/// at the release matching `cursor`, the newest tag ingested by a previous
/// run.
pub fn walk_step(releases: &[Release], index: usize, cursor: Option<&str>) -> WalkStep {
    let Some(release) = releases.get(index) else {
        return WalkStep::Stop;
    };
    if cursor == Some(release.tag.as_str()) {
        return WalkStep::Stop;
    }

    match releases.get(index + 1) {
        Some(older) => WalkStep::Continue(CommitWindow::Compare {
            base: older.tag.clone(),
            head: release.tag.clone(),
        }),
        None => WalkStep::Continue(CommitWindow::Recent {
            tag: release.tag.clone(),
        }),
    }
}

/// Runs the walk to completion
///
/// # Example
///
/// ```
/// use star_harvest::crawler::{plan_windows, CommitWindow};
/// use star_harvest::Release;
///
/// let release = |tag: &str| Release {
///     name: None,
///     tag: tag.to_string(),
///     published_at: None,
///     url: None,
///     body: None,
/// };
/// let releases = vec![release("v3"), release("v2"), release("v1")];
///
/// let windows = plan_windows(&releases, Some("v2"));
/// assert_eq!(
///     windows,
///     vec![CommitWindow::Compare { base: "v2".into(), head: "v3".into() }]
/// );
/// ```
pub fn plan_windows(releases: &[Release], cursor: Option<&str>) -> Vec<CommitWindow> {
    let mut windows = Vec::new();
    let mut index = 0;
    while let WalkStep::Continue(window) = walk_step(releases, index, cursor) {
        windows.push(window);
        index += 1;
    }
    windows
}

/// Page sizes and TTLs used while processing
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub release_page_size: u32,
    pub tag_page_size: u32,
    pub recent_commit_limit: u32,
    pub window_commit_limit: u32,
    pub processed_ttl: Duration,
    pub last_release_ttl: Duration,
}

impl ProcessorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.crawler, &config.cache)
    }

    pub fn new(crawler: &CrawlerConfig, cache: &CacheConfig) -> Self {
        Self {
            release_page_size: crawler.release_page_size,
            tag_page_size: crawler.tag_page_size,
            recent_commit_limit: crawler.recent_commit_limit,
            window_commit_limit: crawler.window_commit_limit,
            processed_ttl: cache.processed_ttl(),
            last_release_ttl: cache.last_release_ttl(),
        }
    }
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self::new(&CrawlerConfig::default(), &CacheConfig::default())
    }
}

/// What `process` did with a repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Processed within the TTL; nothing fetched
    Skipped,
    Ingested(IngestSummary),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub repo_id: i64,
    pub releases: usize,
    pub commits: usize,
    pub windows: usize,
    /// Newest release tag, recorded as the cursor for the next run
    pub cursor: Option<String>,
}

pub struct RepositoryProcessor {
    gateway: Arc<FetchGateway>,
    endpoints: ApiEndpoints,
    persister: Arc<dyn Persister>,
    cache: Arc<dyn StateCache>,
    db_permits: Option<Arc<Semaphore>>,
    settings: ProcessorSettings,
    observer: Arc<dyn CrawlObserver>,
}

impl RepositoryProcessor {
    pub fn new(
        gateway: Arc<FetchGateway>,
        endpoints: ApiEndpoints,
        persister: Arc<dyn Persister>,
        cache: Arc<dyn StateCache>,
        settings: ProcessorSettings,
        observer: Arc<dyn CrawlObserver>,
    ) -> Self {
        Self {
            gateway,
            endpoints,
            persister,
            cache,
            db_permits: None,
            settings,
            observer,
        }
    }

    /// Bounds how many persister transactions run at once
    pub fn with_db_permits(mut self, permits: Arc<Semaphore>) -> Self {
        self.db_permits = Some(permits);
        self
    }

    /// Fetches and persists one repository
    ///
    /// # Returns
    ///
    /// * `Ok(ProcessOutcome::Skipped)` - Already processed within the TTL
    /// * `Ok(ProcessOutcome::Ingested(_))` - Rows written and cache updated
    /// * `Err(HarvestError::Deferred { .. })` - The API was unavailable; any
    ///   partial rows were written but the repository stays eligible for
    ///   another pass
    /// * `Err(_)` - Storage or response format failure
    pub async fn process(&self, descriptor: &RepositoryDescriptor) -> Result<ProcessOutcome> {
        let full_name = descriptor.full_name.as_str();

        if self.cache.is_processed(full_name)? {
            tracing::debug!(repo = full_name, "Already processed, skipping");
            self.observer.cache_hit();
            return Ok(ProcessOutcome::Skipped);
        }

        let releases = self.list_releases(descriptor).await?;
        let mut commits = Vec::new();
        let mut windows = 0;
        let mut unavailable = None;

        if releases.is_empty() {
            tracing::debug!(repo = full_name, "No releases or tags, taking recent commits");
            let url = self.endpoints.commits(
                &descriptor.owner,
                &descriptor.name,
                self.settings.recent_commit_limit,
            );
            let records: Vec<CommitRecord> = self.fetch_list(&url, descriptor, "commits").await?;
            commits.extend(records.iter().filter_map(|r| Commit::from_record(r, None)));
        } else {
            let cursor = self.cache.get_last_release(full_name)?;
            let plan = plan_windows(&releases, cursor.as_deref());
            if plan.is_empty() {
                tracing::info!(repo = full_name, cursor = ?cursor, "No releases newer than cursor");
            }

            for window in &plan {
                match self.fetch_window(descriptor, window).await? {
                    Ok(batch) => {
                        commits.extend(batch);
                        windows += 1;
                    }
                    Err(reason) => {
                        tracing::warn!(
                            repo = full_name,
                            tag = window.tag(),
                            "Stopping release walk: {}",
                            reason
                        );
                        unavailable = Some(reason);
                        break;
                    }
                }
            }
        }

        let cursor = releases.first().map(|r| r.tag.clone());
        let release_count = releases.len();
        let commit_count = commits.len();
        let repository = Repository::from_descriptor(descriptor);

        let permit = match &self.db_permits {
            Some(permits) => Some(Arc::clone(permits).acquire_owned().await?),
            None => None,
        };
        let persister = Arc::clone(&self.persister);
        let written =
            tokio::task::spawn_blocking(move || persister.upsert(&repository, &releases, &commits))
                .await??;
        drop(permit);

        if let Some(reason) = unavailable {
            return Err(HarvestError::Deferred {
                full_name: full_name.to_string(),
                reason,
            });
        }

        if let Some(tag) = &cursor {
            self.cache
                .set_last_release(full_name, tag, self.settings.last_release_ttl)?;
        }
        self.cache
            .mark_processed(full_name, self.settings.processed_ttl)?;

        tracing::info!(
            repo = full_name,
            releases = release_count,
            commits = commit_count,
            new_commits = written.commits_inserted,
            "Ingested repository"
        );

        Ok(ProcessOutcome::Ingested(IngestSummary {
            repo_id: written.repo_id,
            releases: release_count,
            commits: commit_count,
            windows,
            cursor,
        }))
    }

    /// Releases newest first, falling back to tags when none are published
    async fn list_releases(&self, descriptor: &RepositoryDescriptor) -> Result<Vec<Release>> {
        let url = self.endpoints.releases(
            &descriptor.owner,
            &descriptor.name,
            self.settings.release_page_size,
        );
        let records: Vec<ReleaseRecord> = self.fetch_list(&url, descriptor, "releases").await?;
        let releases: Vec<Release> = records.iter().filter_map(Release::from_record).collect();
        if !releases.is_empty() {
            return Ok(releases);
        }

        let url = self.endpoints.tags(
            &descriptor.owner,
            &descriptor.name,
            self.settings.tag_page_size,
        );
        let records: Vec<TagRecord> = self.fetch_list(&url, descriptor, "tags").await?;
        let mut releases: Vec<Release> = records.iter().filter_map(Release::from_tag).collect();
        releases.truncate(self.settings.tag_page_size as usize);
        if !releases.is_empty() {
            tracing::debug!(
                repo = %descriptor.full_name,
                count = releases.len(),
                "Using tags as releases"
            );
        }
        Ok(releases)
    }

    /// Fetches a JSON array, treating benign empties and client errors as `[]`
    async fn fetch_list<T: DeserializeOwned>(
        &self,
        url: &url::Url,
        descriptor: &RepositoryDescriptor,
        what: &str,
    ) -> Result<Vec<T>> {
        match self.gateway.fetch_result(url).await {
            FetchResult::Json(Value::Null) | FetchResult::Empty { .. } => Ok(Vec::new()),
            FetchResult::Json(value) => Ok(serde_json::from_value(value)?),
            FetchResult::ClientError { status, .. } => {
                tracing::warn!(repo = %descriptor.full_name, status, "Could not list {}", what);
                Ok(Vec::new())
            }
            FetchResult::Unavailable(reason) => Err(HarvestError::Deferred {
                full_name: descriptor.full_name.clone(),
                reason: format!("listing {}: {}", what, reason),
            }),
        }
    }

    /// Commits for one window, or the reason the API could not serve it
    async fn fetch_window(
        &self,
        descriptor: &RepositoryDescriptor,
        window: &CommitWindow,
    ) -> Result<std::result::Result<Vec<Commit>, String>> {
        let tag = window.tag();
        let url = match window {
            CommitWindow::Compare { base, head } => {
                self.endpoints
                    .compare(&descriptor.owner, &descriptor.name, base, head)
            }
            CommitWindow::Recent { tag } => self.endpoints.commits_at(
                &descriptor.owner,
                &descriptor.name,
                tag,
                self.settings.window_commit_limit,
            ),
        };

        let records: Vec<CommitRecord> = match self.gateway.fetch_result(&url).await {
            FetchResult::Json(Value::Null) | FetchResult::Empty { .. } => Vec::new(),
            FetchResult::Json(value) => match window {
                CommitWindow::Compare { .. } => {
                    serde_json::from_value::<CompareRecord>(value)?.commits
                }
                CommitWindow::Recent { .. } => serde_json::from_value(value)?,
            },
            FetchResult::ClientError { status, .. } => {
                tracing::warn!(repo = %descriptor.full_name, tag, status, "Could not fetch commits");
                Vec::new()
            }
            FetchResult::Unavailable(reason) => return Ok(Err(reason.to_string())),
        };

        Ok(Ok(records
            .iter()
            .filter_map(|r| Commit::from_record(r, Some(tag)))
            .collect()))
    }
}
