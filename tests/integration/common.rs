//! Shared fixtures for the integration tests

use serde_json::{json, Value};
use star_harvest::config::{parse_config, Config};
use star_harvest::api::ApiEndpoints;
use star_harvest::crawler::{build_http_client, FetchGateway, HttpQuotaProbe};
use star_harvest::output::CrawlMetrics;
use star_harvest::state::{CircuitBreaker, CredentialPool};
use star_harvest::RepositoryDescriptor;
use std::path::Path;
use std::sync::Arc;
use wiremock::MockServer;

/// A configuration pointed at `server` with fast retries and no quota probe
pub fn test_config(server: &MockServer, db_path: &Path) -> Config {
    let uri = server.uri();
    let toml = format!(
        r#"
[api]
base-url = "{uri}"
tokens = ["token-a", "token-b"]
request-timeout-secs = 5
connect-timeout-secs = 2

[fetch]
max-retries = 3
base-retry-delay-ms = 1
max-retry-delay-ms = 10
max-rate-limit-wait-secs = 1
max-rate-limit-waits = 1
check-quota = false

[circuit-breaker]
failure-threshold = 50
recovery-timeout-secs = 60

[discovery]
limit = 100
per-page = 2
max-pages = 3
star-ranges = ["stars:>=1000"]
ranking-url = "{uri}/"

[crawler]
concurrency = 2
db-permits = 1
pop-timeout-ms = 20
empty-grace-ms = 20

[output]
database-path = "{db}"
"#,
        uri = uri,
        db = db_path.display()
    );
    parse_config(&toml, |_| None).expect("test config parses")
}

/// A gateway over `config` reporting into a fresh `CrawlMetrics`
pub fn gateway_for(config: &Config) -> (Arc<FetchGateway>, Arc<CrawlMetrics>) {
    let client = build_http_client(&config.user_agent, &config.api).unwrap();
    let metrics = Arc::new(CrawlMetrics::new());
    let gateway = FetchGateway::new(
        client,
        Arc::new(CredentialPool::new(
            config.api.tokens.clone(),
            config.fetch.quota_buffer,
        )),
        Arc::new(CircuitBreaker::from_config(&config.circuit_breaker)),
        config.fetch.clone(),
        metrics.clone(),
    );
    (Arc::new(gateway), metrics)
}

/// Like `gateway_for`, but the credential pool probes `/rate_limit`
pub fn gateway_with_probe(config: &Config) -> Arc<FetchGateway> {
    let client = build_http_client(&config.user_agent, &config.api).unwrap();
    let endpoints = ApiEndpoints::new(&config.api.base_url).unwrap();
    let probe = Arc::new(HttpQuotaProbe::new(client.clone(), endpoints));
    let credentials = CredentialPool::new(config.api.tokens.clone(), config.fetch.quota_buffer)
        .with_probe(probe);
    Arc::new(FetchGateway::new(
        client,
        Arc::new(credentials),
        Arc::new(CircuitBreaker::from_config(&config.circuit_breaker)),
        config.fetch.clone(),
        Arc::new(CrawlMetrics::new()),
    ))
}

pub fn descriptor(id: i64, owner: &str, name: &str) -> RepositoryDescriptor {
    RepositoryDescriptor {
        external_id: id,
        owner: owner.to_string(),
        name: name.to_string(),
        full_name: format!("{}/{}", owner, name),
        stars: 1000 + id,
        language: Some("Rust".to_string()),
        created_at: Some("2020-01-01T00:00:00Z".to_string()),
        url: format!("https://github.com/{}/{}", owner, name),
    }
}

pub fn repo_json(id: i64, owner: &str, name: &str, stars: i64) -> Value {
    json!({
        "id": id,
        "name": name,
        "full_name": format!("{}/{}", owner, name),
        "owner": { "login": owner },
        "html_url": format!("https://github.com/{}/{}", owner, name),
        "stargazers_count": stars,
        "language": "Rust",
        "created_at": "2020-01-01T00:00:00Z"
    })
}

pub fn release_json(tag: &str, published_at: &str) -> Value {
    json!({
        "tag_name": tag,
        "name": format!("Release {}", tag),
        "body": format!("Notes for {}", tag),
        "published_at": published_at,
        "html_url": format!("https://github.com/acme/widget/releases/tag/{}", tag)
    })
}

pub fn tag_json(name: &str, sha: &str) -> Value {
    json!({
        "name": name,
        "commit": {
            "sha": sha,
            "url": format!("https://api.github.com/repos/acme/widget/commits/{}", sha)
        }
    })
}

pub fn commit_json(sha: &str, message: &str) -> Value {
    json!({
        "sha": sha,
        "html_url": format!("https://github.com/acme/widget/commit/{}", sha),
        "commit": {
            "message": message,
            "author": { "name": "Dev", "date": "2024-01-01T00:00:00Z" }
        }
    })
}
