use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Star-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(rename = "user-agent", default)]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(rename = "circuit-breaker", default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub output: OutputConfig,
}

/// Remote API endpoint and credentials
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Root of the REST API (no trailing slash required)
    #[serde(rename = "base-url", default = "default_base_url")]
    pub base_url: String,

    /// API tokens; resolved from the environment when empty
    #[serde(default)]
    pub tokens: Vec<String>,

    #[serde(rename = "request-timeout-secs", default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(rename = "connect-timeout-secs", default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    #[serde(rename = "contact-url")]
    pub contact_url: String,
}

/// Retry, backoff and quota policy for the fetch gateway
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Network attempts per fetch (rate-limit waits do not count)
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(rename = "base-retry-delay-ms", default = "default_base_retry_delay")]
    pub base_retry_delay_ms: u64,

    #[serde(rename = "max-retry-delay-ms", default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,

    /// Cap on a single sleep-until-reset
    #[serde(rename = "max-rate-limit-wait-secs", default = "default_max_rate_limit_wait")]
    pub max_rate_limit_wait_secs: u64,

    /// Reset waits allowed per fetch before falling back to backoff
    #[serde(rename = "max-rate-limit-waits", default = "default_max_rate_limit_waits")]
    pub max_rate_limit_waits: u32,

    /// A credential with this many requests left or fewer counts as exhausted
    #[serde(rename = "quota-buffer", default = "default_quota_buffer")]
    pub quota_buffer: u32,

    /// Probe the quota endpoint before handing out a credential
    #[serde(rename = "check-quota", default = "default_true")]
    pub check_quota: bool,
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(rename = "failure-threshold", default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(rename = "recovery-timeout-secs", default = "default_recovery_timeout")]
    pub recovery_timeout_secs: u64,
}

/// Where repository descriptors come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoverySourceKind {
    /// Star-range partitioned search endpoint
    Search,
    /// HTML ranking pages resolved through the repository endpoint
    Ranking,
}

/// Discovery stage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_source")]
    pub source: DiscoverySourceKind,

    /// Maximum number of repositories to enqueue
    #[serde(default = "default_limit")]
    pub limit: usize,

    #[serde(rename = "per-page", default = "default_per_page")]
    pub per_page: u32,

    /// Pages per star range; the search endpoint caps results at per-page * max-pages
    #[serde(rename = "max-pages", default = "default_max_pages")]
    pub max_pages: u32,

    /// Disjoint search qualifiers, highest stars first
    #[serde(rename = "star-ranges", default = "default_star_ranges")]
    pub star_ranges: Vec<String>,

    #[serde(rename = "ranking-url", default = "default_ranking_url")]
    pub ranking_url: String,
}

/// How workers are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    /// Cooperative tasks; database writes gated by `db-permits`
    Tasks,
    /// A fixed pool of blocking worker threads
    Threads,
}

/// Whether discovery finishes before workers start draining
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMode {
    Batch,
    Streaming,
}

/// Worker pool and per-repository fetch limits
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    #[serde(default = "default_strategy")]
    pub strategy: ExecutionStrategy,

    /// Persister transactions allowed in flight under the tasks strategy
    #[serde(rename = "db-permits", default = "default_db_permits")]
    pub db_permits: u32,

    #[serde(default = "default_mode")]
    pub mode: QueueMode,

    #[serde(rename = "pop-timeout-ms", default = "default_pop_timeout")]
    pub pop_timeout_ms: u64,

    #[serde(rename = "empty-grace-ms", default = "default_empty_grace")]
    pub empty_grace_ms: u64,

    #[serde(rename = "release-page-size", default = "default_page_size")]
    pub release_page_size: u32,

    #[serde(rename = "tag-page-size", default = "default_page_size")]
    pub tag_page_size: u32,

    /// Commits fetched when a repository has neither releases nor tags
    #[serde(rename = "recent-commit-limit", default = "default_recent_commit_limit")]
    pub recent_commit_limit: u32,

    /// Commits fetched for the oldest release, which has no base to compare against
    #[serde(rename = "window-commit-limit", default = "default_page_size")]
    pub window_commit_limit: u32,

    #[serde(rename = "credential-reset-secs", default = "default_credential_reset")]
    pub credential_reset_secs: u64,
}

/// TTLs for the incremental state cache
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(rename = "processed-ttl-secs", default = "default_processed_ttl")]
    pub processed_ttl_secs: u64,

    #[serde(rename = "last-release-ttl-secs", default = "default_last_release_ttl")]
    pub last_release_ttl_secs: u64,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database holding rows, queue and cache
    #[serde(rename = "database-path")]
    pub database_path: String,
}

impl FetchConfig {
    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn max_rate_limit_wait(&self) -> Duration {
        Duration::from_secs(self.max_rate_limit_wait_secs)
    }
}

impl CacheConfig {
    pub fn processed_ttl(&self) -> Duration {
        Duration::from_secs(self.processed_ttl_secs)
    }

    pub fn last_release_ttl(&self) -> Duration {
        Duration::from_secs(self.last_release_ttl_secs)
    }
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "StarHarvest".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: "https://example.com/about".to_string(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_retry_delay_ms: default_base_retry_delay(),
            max_retry_delay_ms: default_max_retry_delay(),
            max_rate_limit_wait_secs: default_max_rate_limit_wait(),
            max_rate_limit_waits: default_max_rate_limit_waits(),
            quota_buffer: default_quota_buffer(),
            check_quota: true,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            limit: default_limit(),
            per_page: default_per_page(),
            max_pages: default_max_pages(),
            star_ranges: default_star_ranges(),
            ranking_url: default_ranking_url(),
        }
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            strategy: default_strategy(),
            db_permits: default_db_permits(),
            mode: default_mode(),
            pop_timeout_ms: default_pop_timeout(),
            empty_grace_ms: default_empty_grace(),
            release_page_size: default_page_size(),
            tag_page_size: default_page_size(),
            recent_commit_limit: default_recent_commit_limit(),
            window_commit_limit: default_page_size(),
            credential_reset_secs: default_credential_reset(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            processed_ttl_secs: default_processed_ttl(),
            last_release_ttl_secs: default_last_release_ttl(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_retry_delay() -> u64 {
    1000
}

fn default_max_retry_delay() -> u64 {
    30_000
}

fn default_max_rate_limit_wait() -> u64 {
    60
}

fn default_max_rate_limit_waits() -> u32 {
    3
}

fn default_quota_buffer() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> u64 {
    60
}

fn default_source() -> DiscoverySourceKind {
    DiscoverySourceKind::Search
}

fn default_limit() -> usize {
    5000
}

fn default_per_page() -> u32 {
    100
}

fn default_max_pages() -> u32 {
    10
}

fn default_star_ranges() -> Vec<String> {
    [
        "stars:>=50000",
        "stars:10000..49999",
        "stars:5000..9999",
        "stars:2000..4999",
        "stars:1000..1999",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_ranking_url() -> String {
    "https://gitstar-ranking.com".to_string()
}

fn default_concurrency() -> u32 {
    10
}

fn default_strategy() -> ExecutionStrategy {
    ExecutionStrategy::Tasks
}

fn default_db_permits() -> u32 {
    4
}

fn default_mode() -> QueueMode {
    QueueMode::Batch
}

fn default_pop_timeout() -> u64 {
    1000
}

fn default_empty_grace() -> u64 {
    1000
}

fn default_page_size() -> u32 {
    10
}

fn default_recent_commit_limit() -> u32 {
    20
}

fn default_credential_reset() -> u64 {
    3600
}

fn default_processed_ttl() -> u64 {
    86_400
}

fn default_last_release_ttl() -> u64 {
    86_400 * 7
}
