//! Discovery stage
//!
//! A `DiscoverySource` finds repositories and pushes their descriptors onto
//! the work queue as it goes, so workers can start draining before discovery
//! finishes when the crawler runs in streaming mode.

use crate::api::{ApiEndpoints, RepoRecord, RepositoryDescriptor, SearchPage};
use crate::config::{Config, DiscoveryConfig, DiscoverySourceKind};
use crate::crawler::fetcher::{FetchGateway, FetchResult};
use crate::crawler::parser::extract_repository_paths;
use crate::storage::WorkQueue;
use crate::{HarvestError, Result};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Client;
use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

/// Produces repository descriptors for the work queue
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pushes up to `limit` distinct descriptors onto `queue`
    ///
    /// # Returns
    ///
    /// * `Ok(usize)` - Number of descriptors pushed
    /// * `Err(HarvestError)` - The queue could not be written
    async fn discover(&self, queue: &dyn WorkQueue, limit: usize) -> Result<usize>;
}

/// Builds the discovery source selected by the configuration
pub fn build_discovery(
    config: &Config,
    gateway: Arc<FetchGateway>,
    client: Client,
    endpoints: ApiEndpoints,
) -> Result<Box<dyn DiscoverySource>> {
    match config.discovery.source {
        DiscoverySourceKind::Search => Ok(Box::new(SearchDiscovery::new(
            gateway,
            endpoints,
            config.discovery.clone(),
        ))),
        DiscoverySourceKind::Ranking => {
            let ranking_url = Url::parse(&config.discovery.ranking_url)?;
            Ok(Box::new(RankingDiscovery::new(
                gateway,
                client,
                endpoints,
                ranking_url,
            )))
        }
    }
}

/// Star-range partitioned search
///
/// The search endpoint caps each query at `per-page * max-pages` results;
/// walking disjoint star ranges lifts the total past that cap. Boundary
/// repositories that show up in two ranges are deduplicated by external id.
pub struct SearchDiscovery {
    gateway: Arc<FetchGateway>,
    endpoints: ApiEndpoints,
    config: DiscoveryConfig,
}

impl SearchDiscovery {
    pub fn new(gateway: Arc<FetchGateway>, endpoints: ApiEndpoints, config: DiscoveryConfig) -> Self {
        Self {
            gateway,
            endpoints,
            config,
        }
    }

    async fn fetch_page(&self, range: &str, page: u32) -> Option<SearchPage> {
        let url = self.endpoints.search(range, self.config.per_page, page);
        match self.gateway.fetch_result(&url).await {
            FetchResult::Json(value) => match serde_json::from_value::<SearchPage>(value) {
                Ok(page) => Some(page),
                Err(e) => {
                    tracing::warn!(range, page, "Unexpected search response: {}", e);
                    None
                }
            },
            FetchResult::Empty { status } | FetchResult::ClientError { status, .. } => {
                tracing::debug!(range, page, status, "Search range exhausted");
                None
            }
            FetchResult::Unavailable(reason) => {
                tracing::warn!(range, page, "Search unavailable: {}", reason);
                None
            }
        }
    }
}

#[async_trait]
impl DiscoverySource for SearchDiscovery {
    fn name(&self) -> &'static str {
        "search"
    }

    async fn discover(&self, queue: &dyn WorkQueue, limit: usize) -> Result<usize> {
        let mut seen: HashSet<i64> = HashSet::new();
        let mut pushed = 0;

        'ranges: for range in &self.config.star_ranges {
            for page in 1..=self.config.max_pages {
                if pushed >= limit {
                    break 'ranges;
                }

                let Some(results) = self.fetch_page(range, page).await else {
                    break;
                };
                if results.items.is_empty() {
                    break;
                }

                let page_len = results.items.len();
                for record in &results.items {
                    if pushed >= limit {
                        break 'ranges;
                    }
                    if !seen.insert(record.id) {
                        continue;
                    }
                    if let Some(descriptor) = RepositoryDescriptor::from_record(record) {
                        queue.push(&descriptor).await?;
                        pushed += 1;
                    }
                }

                tracing::info!(range = %range, page, total = pushed, "Fetched search page");

                if page_len < self.config.per_page as usize {
                    break;
                }
            }
        }

        Ok(pushed)
    }
}

/// Ranking-page discovery
///
/// Scrapes `/owner/name` links from `{ranking-url}/repositories?page=N` and
/// resolves each through the repository endpoint. Not subject to the search
/// result cap.
pub struct RankingDiscovery {
    gateway: Arc<FetchGateway>,
    client: Client,
    endpoints: ApiEndpoints,
    ranking_url: Url,
}

impl RankingDiscovery {
    pub fn new(
        gateway: Arc<FetchGateway>,
        client: Client,
        endpoints: ApiEndpoints,
        ranking_url: Url,
    ) -> Self {
        Self {
            gateway,
            client,
            endpoints,
            ranking_url,
        }
    }

    fn page_url(&self, page: u32) -> Result<Url> {
        let mut url = self.ranking_url.join("repositories")?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string());
        Ok(url)
    }

    async fn fetch_page(&self, page: u32) -> Result<Option<String>> {
        let url = self.page_url(page)?;
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, "text/html")
            .send()
            .await
            .map_err(|source| HarvestError::Http {
                url: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            tracing::warn!(page, status = response.status().as_u16(), "Ranking page unavailable");
            return Ok(None);
        }

        let body = response.text().await.map_err(|source| HarvestError::Http {
            url: url.to_string(),
            source,
        })?;
        Ok(Some(body))
    }

    async fn resolve(&self, owner: &str, name: &str) -> Option<RepositoryDescriptor> {
        let url = self.endpoints.repository(owner, name);
        let value = self.gateway.fetch(&url).await?;
        match serde_json::from_value::<RepoRecord>(value) {
            Ok(record) => RepositoryDescriptor::from_record(&record),
            Err(e) => {
                tracing::warn!(owner, name, "Unexpected repository response: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl DiscoverySource for RankingDiscovery {
    fn name(&self) -> &'static str {
        "ranking"
    }

    async fn discover(&self, queue: &dyn WorkQueue, limit: usize) -> Result<usize> {
        let mut seen_paths: HashSet<String> = HashSet::new();
        let mut seen_ids: HashSet<i64> = HashSet::new();
        let mut pushed = 0;
        let mut page = 1;

        while pushed < limit {
            let html = match self.fetch_page(page).await {
                Ok(Some(html)) => html,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(page, "Stopping ranking discovery: {}", e);
                    break;
                }
            };

            let fresh: Vec<_> = extract_repository_paths(&html)
                .into_iter()
                .filter(|path| seen_paths.insert(path.full_name()))
                .collect();
            if fresh.is_empty() {
                tracing::info!(page, "No new repositories on ranking page");
                break;
            }

            for path in fresh {
                if pushed >= limit {
                    break;
                }
                let Some(descriptor) = self.resolve(&path.owner, &path.name).await else {
                    tracing::debug!(full_name = %path.full_name(), "Could not resolve ranked repository");
                    continue;
                };
                if seen_ids.insert(descriptor.external_id) {
                    queue.push(&descriptor).await?;
                    pushed += 1;
                }
            }

            tracing::info!(page, total = pushed, "Fetched ranking page");
            page += 1;
        }

        Ok(pushed)
    }
}
