//! HTTP fetch gateway
//!
//! This module handles every request the crawler makes to the remote API:
//! - Building the HTTP client with the crawler's user agent
//! - Attaching a rotating credential to each request
//! - Failing fast while the circuit breaker is open
//! - Retry, backoff and rate-limit policy per response class
//! - Probing credential quota

use crate::api::{ApiEndpoints, RateLimitRecord, RateRecord};
use crate::config::{ApiConfig, FetchConfig, UserAgentConfig};
use crate::output::CrawlObserver;
use crate::state::{
    AllExhausted, CircuitBreaker, CircuitState, Credential, CredentialPool, QuotaProbe,
};
use crate::HarvestError;
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{redirect::Policy, Client, Response, StatusCode};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const API_MEDIA_TYPE: &str = "application/vnd.github.v3+json";

/// Why a fetch produced no data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    /// The circuit breaker rejected the call without network I/O
    CircuitOpen,
    /// No credential had quota left
    CredentialsExhausted,
    /// The retry budget ran out on server errors, network errors or rate limits
    RetriesExhausted,
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CircuitOpen => "circuit breaker open",
            Self::CredentialsExhausted => "all credentials exhausted",
            Self::RetriesExhausted => "retries exhausted",
        })
    }
}

/// Result of a fetch operation
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    /// 2xx with a JSON body (`Null` for an empty body)
    Json(Value),

    /// 404 or 422; a benign empty result
    Empty { status: u16 },

    /// Any other non-success status, returned without retrying
    ClientError { status: u16, body: String },

    /// No response could be obtained
    Unavailable(Unavailable),
}

impl FetchResult {
    pub fn into_json(self) -> Option<Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `user_agent` - The user agent configuration
/// * `api` - Timeouts for every request
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use star_harvest::config::{ApiConfig, UserAgentConfig};
/// use star_harvest::crawler::build_http_client;
///
/// let api = ApiConfig {
///     base_url: "https://api.github.com".to_string(),
///     tokens: vec!["token".to_string()],
///     request_timeout_secs: 10,
///     connect_timeout_secs: 5,
/// };
///
/// let client = build_http_client(&UserAgentConfig::default(), &api).unwrap();
/// ```
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    api: &ApiConfig,
) -> Result<Client, reqwest::Error> {
    // Format: CrawlerName/Version (+ContactURL)
    let agent = format!(
        "{}/{} (+{})",
        user_agent.crawler_name, user_agent.crawler_version, user_agent.contact_url
    );

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(API_MEDIA_TYPE));

    Client::builder()
        .user_agent(agent)
        .default_headers(headers)
        .timeout(Duration::from_secs(api.request_timeout_secs))
        .connect_timeout(Duration::from_secs(api.connect_timeout_secs))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Executes API requests under the credential, breaker and retry policy
///
/// One gateway is shared by every worker; its breaker state is per gateway.
pub struct FetchGateway {
    client: Client,
    credentials: Arc<CredentialPool>,
    breaker: Arc<CircuitBreaker>,
    policy: FetchConfig,
    observer: Arc<dyn CrawlObserver>,
}

impl FetchGateway {
    pub fn new(
        client: Client,
        credentials: Arc<CredentialPool>,
        breaker: Arc<CircuitBreaker>,
        policy: FetchConfig,
        observer: Arc<dyn CrawlObserver>,
    ) -> Self {
        Self {
            client,
            credentials,
            breaker,
            policy,
            observer,
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialPool> {
        &self.credentials
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Fetches a URL, returning its JSON body or None
    pub async fn fetch(&self, url: &Url) -> Option<Value> {
        self.fetch_result(url).await.into_json()
    }

    /// Fetches a URL with full outcome classification
    ///
    /// # Policy
    ///
    /// | Outcome | Action |
    /// |---------|--------|
    /// | Breaker open | Immediate → `Unavailable(CircuitOpen)` |
    /// | 2xx | Record success → `Json` |
    /// | 403 / 429 | Rotate credential and retry; else wait for reset; else backoff |
    /// | 404 / 422 | Immediate → `Empty` |
    /// | 5xx / network | Record failure, backoff, retry up to `max-retries` attempts |
    /// | Other status | Record success → `ClientError` |
    ///
    /// Rotations and reset waits do not consume the retry budget; reset
    /// waits are capped per fetch by `max-rate-limit-waits`.
    pub async fn fetch_result(&self, url: &Url) -> FetchResult {
        if !self.breaker.allow_request() {
            tracing::debug!(url = %url, "Circuit breaker open, not sending request");
            return FetchResult::Unavailable(Unavailable::CircuitOpen);
        }

        let mut credential = match self.acquire_credential().await {
            Ok(credential) => credential,
            Err(e) => {
                self.breaker.release_trial();
                tracing::warn!(url = %url, "Skipping request: {}", e);
                return FetchResult::Unavailable(Unavailable::CredentialsExhausted);
            }
        };

        let max_attempts = self.policy.max_retries.max(1);
        let mut failed_attempts: u32 = 0;
        let mut reset_waits: u32 = 0;
        let mut admitted = true;

        loop {
            if !std::mem::take(&mut admitted) && !self.breaker.allow_request() {
                tracing::debug!(url = %url, "Circuit breaker open, not sending request");
                return FetchResult::Unavailable(Unavailable::CircuitOpen);
            }

            self.observer.request_sent();
            self.credentials.record_request(credential.index);

            let response = match self.send(url, &credential).await {
                Ok(response) => response,
                Err(e) => {
                    self.breaker.record_failure();
                    self.credentials.record_error(credential.index);
                    failed_attempts += 1;
                    tracing::warn!(url = %url, attempt = failed_attempts, "Request failed: {}", e);
                    if failed_attempts >= max_attempts {
                        tracing::error!(url = %url, attempts = failed_attempts, "Giving up after network errors");
                        return FetchResult::Unavailable(Unavailable::RetriesExhausted);
                    }
                    self.backoff(failed_attempts - 1).await;
                    continue;
                }
            };

            let status = response.status();
            if let Some(remaining) = header_value::<u32>(response.headers(), "x-ratelimit-remaining") {
                self.credentials.observe_remaining(credential.index, remaining);
            }

            if status.is_success() {
                match response.bytes().await {
                    Ok(body) => match parse_body(&body) {
                        Ok(value) => {
                            self.breaker.record_success();
                            return FetchResult::Json(value);
                        }
                        Err(e) => {
                            tracing::warn!(url = %url, "Malformed JSON body: {}", e);
                        }
                    },
                    Err(e) => {
                        tracing::warn!(url = %url, "Failed to read response body: {}", e);
                    }
                }

                self.breaker.record_failure();
                failed_attempts += 1;
                if failed_attempts >= max_attempts {
                    return FetchResult::Unavailable(Unavailable::RetriesExhausted);
                }
                self.backoff(failed_attempts - 1).await;
                continue;
            }

            if is_rate_limited(status, response.headers()) {
                // Says nothing about the dependency's health
                self.breaker.release_trial();
                self.credentials.mark_exhausted(credential.index);

                if let Ok(next) = self.acquire_credential().await {
                    tracing::info!(
                        url = %url,
                        from = %credential.label(),
                        to = %next.label(),
                        "Rate limited, rotating credential"
                    );
                    self.observer.credential_rotated();
                    credential = next;
                    continue;
                }

                let wait = reset_wait(response.headers(), Utc::now().timestamp());
                if let Some(wait) = wait.filter(|_| reset_waits < self.policy.max_rate_limit_waits) {
                    let wait = wait.min(self.policy.max_rate_limit_wait());
                    reset_waits += 1;
                    tracing::warn!(
                        url = %url,
                        credential = %credential.label(),
                        wait_secs = wait.as_secs(),
                        "All credentials rate limited, waiting for reset"
                    );
                    tokio::time::sleep(wait).await;
                    self.credentials.restore(credential.index);
                    continue;
                }

                failed_attempts += 1;
                tracing::warn!(url = %url, attempt = failed_attempts, "Rate limited with no reset to wait for");
                if failed_attempts >= max_attempts {
                    return FetchResult::Unavailable(Unavailable::RetriesExhausted);
                }
                self.backoff(failed_attempts - 1).await;
                self.credentials.restore(credential.index);
                continue;
            }

            match status {
                StatusCode::NOT_FOUND => {
                    self.breaker.record_success();
                    tracing::debug!(url = %url, "Not found");
                    return FetchResult::Empty { status: 404 };
                }
                StatusCode::UNPROCESSABLE_ENTITY => {
                    self.breaker.record_success();
                    tracing::warn!(url = %url, "Unprocessable request (422), treating as empty");
                    return FetchResult::Empty { status: 422 };
                }
                s if s.is_server_error() => {
                    self.breaker.record_failure();
                    self.credentials.record_error(credential.index);
                    failed_attempts += 1;
                    tracing::warn!(url = %url, status = s.as_u16(), attempt = failed_attempts, "Server error");
                    if failed_attempts >= max_attempts {
                        tracing::error!(url = %url, attempts = failed_attempts, "Giving up after server errors");
                        return FetchResult::Unavailable(Unavailable::RetriesExhausted);
                    }
                    self.backoff(failed_attempts - 1).await;
                }
                s => {
                    self.breaker.record_success();
                    let body = response.text().await.unwrap_or_default();
                    tracing::warn!(url = %url, status = s.as_u16(), "Client error");
                    return FetchResult::ClientError {
                        status: s.as_u16(),
                        body,
                    };
                }
            }
        }
    }

    /// Next credential; the quota probe only runs while the breaker is closed
    async fn acquire_credential(&self) -> Result<Credential, AllExhausted> {
        if self.breaker.state() == CircuitState::Closed {
            self.credentials.acquire().await
        } else {
            self.credentials.acquire_unprobed()
        }
    }

    async fn send(&self, url: &Url, credential: &Credential) -> Result<Response, reqwest::Error> {
        self.client
            .get(url.clone())
            .header(AUTHORIZATION, format!("token {}", credential.token))
            .send()
            .await
    }

    async fn backoff(&self, attempt: u32) {
        self.observer.retry_performed();
        let delay = backoff_delay(
            attempt,
            self.policy.base_retry_delay(),
            self.policy.max_retry_delay(),
        );
        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off");
        tokio::time::sleep(delay).await;
    }
}

/// Exponential backoff with up to 10% random jitter
///
/// # Arguments
///
/// * `attempt` - Zero-based retry number
/// * `base` - Delay for the first retry
/// * `max` - Cap applied before jitter
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(16));
    let delay = base.saturating_mul(factor).min(max);
    let jitter_ms = (delay.as_millis() / 10) as u64;
    let jitter = if jitter_ms > 0 {
        rand::rng().random_range(0..=jitter_ms)
    } else {
        0
    };
    delay + Duration::from_millis(jitter)
}

/// Time to sleep before a rate-limited credential's window resets
///
/// `Retry-After` (seconds) wins over `X-RateLimit-Reset` (unix seconds). A
/// one-second buffer is added; a reset in the past yields None.
pub fn reset_wait(headers: &HeaderMap, now_unix: i64) -> Option<Duration> {
    if let Some(secs) = header_value::<u64>(headers, "retry-after").filter(|s| *s > 0) {
        return Some(Duration::from_secs(secs + 1));
    }

    let reset = header_value::<i64>(headers, "x-ratelimit-reset")?;
    let delta = reset - now_unix;
    if delta > 0 {
        Some(Duration::from_secs(delta as u64 + 1))
    } else {
        None
    }
}

/// 429 always; 403 unless the response shows quota left and no retry hint
///
/// A 403 with quota remaining and no `Retry-After` is a permission error,
/// handled like any other client error.
fn is_rate_limited(status: StatusCode, headers: &HeaderMap) -> bool {
    match status {
        StatusCode::TOO_MANY_REQUESTS => true,
        StatusCode::FORBIDDEN => {
            let remaining = header_value::<u32>(headers, "x-ratelimit-remaining");
            let retry_after = headers.contains_key("retry-after");
            retry_after || remaining.map_or(true, |r| r == 0)
        }
        _ => false,
    }
}

fn header_value<T: FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn parse_body(body: &[u8]) -> Result<Value, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
}

/// Queries the quota endpoint for one token
pub async fn check_quota(
    client: &Client,
    endpoints: &ApiEndpoints,
    token: &str,
) -> Result<RateRecord, HarvestError> {
    let url = endpoints.rate_limit();
    let response = client
        .get(url.clone())
        .header(AUTHORIZATION, format!("token {}", token))
        .send()
        .await
        .and_then(Response::error_for_status)
        .map_err(|source| HarvestError::Http {
            url: url.to_string(),
            source,
        })?;

    let record: RateLimitRecord = response.json().await.map_err(|source| HarvestError::Http {
        url: url.to_string(),
        source,
    })?;
    Ok(record.rate)
}

/// Quota probe backed by `GET /rate_limit`
pub struct HttpQuotaProbe {
    client: Client,
    endpoints: ApiEndpoints,
}

impl HttpQuotaProbe {
    pub fn new(client: Client, endpoints: ApiEndpoints) -> Self {
        Self { client, endpoints }
    }
}

#[async_trait]
impl QuotaProbe for HttpQuotaProbe {
    async fn remaining(&self, token: &str) -> Option<u32> {
        match check_quota(&self.client, &self.endpoints, token).await {
            Ok(rate) => Some(rate.remaining),
            Err(e) => {
                tracing::debug!("Quota probe failed: {}", e);
                None
            }
        }
    }
}
