use crate::config::types::{
    ApiConfig, CacheConfig, CircuitBreakerConfig, Config, CrawlerConfig, DiscoveryConfig,
    DiscoverySourceKind, FetchConfig, OutputConfig, UserAgentConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_api_config(&config.api)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_fetch_config(&config.fetch)?;
    validate_circuit_breaker_config(&config.circuit_breaker)?;
    validate_discovery_config(&config.discovery)?;
    validate_crawler_config(&config.crawler)?;
    validate_cache_config(&config.cache)?;
    validate_output_config(&config.output)?;
    Ok(())
}

fn validate_api_config(config: &ApiConfig) -> Result<(), ConfigError> {
    validate_http_url("base-url", &config.base_url)?;

    if config.tokens.is_empty() {
        return Err(ConfigError::MissingTokens);
    }

    if config.request_timeout_secs == 0 || config.connect_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request and connect timeouts must be >= 1 second".to_string(),
        ));
    }

    Ok(())
}

fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    Ok(())
}

fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.max_retries < 1 {
        return Err(ConfigError::Validation(
            "max_retries must be >= 1".to_string(),
        ));
    }

    if config.base_retry_delay_ms > config.max_retry_delay_ms {
        return Err(ConfigError::Validation(format!(
            "base_retry_delay_ms ({}) cannot exceed max_retry_delay_ms ({})",
            config.base_retry_delay_ms, config.max_retry_delay_ms
        )));
    }

    Ok(())
}

fn validate_circuit_breaker_config(config: &CircuitBreakerConfig) -> Result<(), ConfigError> {
    if config.failure_threshold < 1 {
        return Err(ConfigError::Validation(
            "failure_threshold must be >= 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_discovery_config(config: &DiscoveryConfig) -> Result<(), ConfigError> {
    if config.per_page < 1 || config.per_page > 100 {
        return Err(ConfigError::Validation(format!(
            "per_page must be between 1 and 100, got {}",
            config.per_page
        )));
    }

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(
            "max_pages must be >= 1".to_string(),
        ));
    }

    match config.source {
        DiscoverySourceKind::Search => {
            if config.star_ranges.is_empty() {
                return Err(ConfigError::Validation(
                    "search discovery needs at least one star range".to_string(),
                ));
            }
            if let Some(blank) = config.star_ranges.iter().find(|r| r.trim().is_empty()) {
                return Err(ConfigError::Validation(format!(
                    "star range cannot be blank: '{}'",
                    blank
                )));
            }
        }
        DiscoverySourceKind::Ranking => validate_http_url("ranking-url", &config.ranking_url)?,
    }

    Ok(())
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 256 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 256, got {}",
            config.concurrency
        )));
    }

    if config.db_permits < 1 || config.db_permits > config.concurrency {
        return Err(ConfigError::Validation(format!(
            "db_permits must be between 1 and concurrency ({}), got {}",
            config.concurrency, config.db_permits
        )));
    }

    for (name, value) in [
        ("release_page_size", config.release_page_size),
        ("tag_page_size", config.tag_page_size),
        ("recent_commit_limit", config.recent_commit_limit),
        ("window_commit_limit", config.window_commit_limit),
    ] {
        if value < 1 || value > 100 {
            return Err(ConfigError::Validation(format!(
                "{} must be between 1 and 100, got {}",
                name, value
            )));
        }
    }

    if config.credential_reset_secs < 1 {
        return Err(ConfigError::Validation(
            "credential_reset_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_cache_config(config: &CacheConfig) -> Result<(), ConfigError> {
    if config.processed_ttl_secs < 1 || config.last_release_ttl_secs < 1 {
        return Err(ConfigError::Validation(
            "cache TTLs must be >= 1 second".to_string(),
        ));
    }
    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_http_url(field: &str, raw: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", field, raw, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} must use http or https, got '{}'",
            field, raw
        )));
    }

    Ok(())
}
