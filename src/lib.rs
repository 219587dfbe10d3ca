//! Star-Harvest: a rate-limit aware crawler for highly-starred repositories
//!
//! This crate discovers popular repositories through a source-hosting REST API,
//! hands them to a pool of workers through a durable queue, and ingests their
//! releases and commit history into a SQLite store. Credentials are rotated
//! and tracked for exhaustion, a circuit breaker guards the remote API, and
//! repeat runs only fetch history newer than the last ingested release.

pub mod api;
pub mod config;
pub mod crawler;
pub mod output;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Star-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Malformed response body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Remote API unavailable while processing {full_name}: {reason}")]
    Deferred { full_name: String, reason: String },

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Database permits closed: {0}")]
    PermitsClosed(#[from] tokio::sync::AcquireError),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("No API tokens configured (set api.tokens, GITHUB_TOKENS or GITHUB_TOKEN)")]
    MissingTokens,
}

/// Result type alias for Star-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use api::{Commit, Release, Repository, RepositoryDescriptor};
pub use config::Config;
pub use crawler::{FetchGateway, RepositoryProcessor, WorkerPool};
pub use state::{AllExhausted, CircuitBreaker, CircuitState, CredentialPool};
