//! Configuration module for Star-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use star_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Workers: {}", config.crawler.concurrency);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    ApiConfig, CacheConfig, CircuitBreakerConfig, Config, CrawlerConfig, DiscoveryConfig,
    DiscoverySourceKind, ExecutionStrategy, FetchConfig, OutputConfig, QueueMode,
    UserAgentConfig,
};

// Re-export parser functions
pub use parser::{
    compute_config_hash, load_config, load_config_with_hash, parse_config, resolve_tokens,
};
pub use validation::validate;
