/// Network fault recovery: pooled HTTP client, DNS cache and per-domain rate limits
///
/// Recovery here is an optimistic retry signal: the handler waits out the backoff
/// or rate-limit window and reports success, and the caller re-executes its
/// request. `make_request` is the one place the handler drives requests itself.
use super::HandlerOutcome;
use crate::error::classification::ProcessingError;
use crate::error::retry::ExponentialBackoff;
use crate::error::taxonomy::ErrorType;
use crate::settings::NetworkConfig;
use crate::{SentinelError, SentinelResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, Response, StatusCode};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// TTL cache in front of the system resolver
#[derive(Debug, Clone)]
pub struct CachingResolver {
    ttl: Duration,
    cache: Arc<Mutex<HashMap<String, (Instant, Vec<SocketAddr>)>>>,
}

impl CachingResolver {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn cached(&self, host: &str) -> Option<Vec<SocketAddr>> {
        let cache = self.cache.lock();
        cache
            .get(host)
            .filter(|(resolved_at, _)| resolved_at.elapsed() < self.ttl)
            .map(|(_, addrs)| addrs.clone())
    }

    pub fn insert(&self, host: &str, addrs: Vec<SocketAddr>) {
        self.cache
            .lock()
            .insert(host.to_string(), (Instant::now(), addrs));
    }

    /// Drop every cached entry
    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Resolve for CachingResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = self.clone();
        let host = name.as_str().to_string();

        Box::pin(async move {
            if let Some(addrs) = resolver.cached(&host) {
                let addrs: Addrs = Box::new(addrs.into_iter());
                return Ok(addrs);
            }

            // Port is ignored by reqwest; it substitutes the URL's port
            let addrs: Vec<SocketAddr> = match tokio::net::lookup_host((host.as_str(), 0)).await {
                Ok(resolved) => resolved.collect(),
                Err(e) => return Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
            };
            tracing::debug!(host = %host, count = addrs.len(), "DNS resolved and cached");
            resolver.insert(&host, addrs.clone());

            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok(addrs)
        })
    }
}

/// Network error handler
pub struct NetworkHandler {
    client: Client,
    config: NetworkConfig,
    backoff: ExponentialBackoff,
    resolver: Arc<CachingResolver>,
    rate_limits: Mutex<HashMap<String, Instant>>,
    status_pattern: Regex,
}

impl NetworkHandler {
    pub fn new(config: NetworkConfig) -> SentinelResult<Self> {
        let resolver = Arc::new(CachingResolver::new(Duration::from_secs(
            config.dns_cache_ttl_secs,
        )));

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .timeout(Duration::from_secs(config.total_timeout_secs))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(config.user_agent.clone())
            .dns_resolver(resolver.clone())
            .build()?;

        let status_pattern = Regex::new(r"\b([1-5][0-9]{2})\b")
            .map_err(|e| SentinelError::ActionFailed {
                action: "compile_status_pattern".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            backoff: ExponentialBackoff::from_config(&config.backoff),
            config,
            resolver,
            rate_limits: Mutex::new(HashMap::new()),
            status_pattern,
        })
    }

    /// Shared pooled client for callers that want the same timeouts and DNS cache
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn resolver(&self) -> &CachingResolver {
        &self.resolver
    }

    /// Apply the mitigation for a network error
    pub async fn handle(&self, error: &ProcessingError) -> HandlerOutcome {
        let attempt = error.recovery_attempts.max(1);

        match error.error_type {
            ErrorType::RateLimitExceeded => {
                let domain = error.context.domain().unwrap_or_else(|| "unknown".to_string());
                let wait = self
                    .rate_limit_wait(&domain)
                    .unwrap_or_else(|| Duration::from_secs(self.config.default_rate_limit_wait_secs))
                    .min(Duration::from_secs(self.config.max_rate_limit_wait_secs));

                tracing::info!(
                    domain = %domain,
                    wait = %humantime::format_duration(Duration::from_secs(wait.as_secs())),
                    "Waiting for rate limit reset"
                );
                tokio::time::sleep(wait).await;
                self.rate_limits.lock().remove(&domain);

                HandlerOutcome::Recovered(format!("rate limit window on {} elapsed", domain))
            }
            ErrorType::ConnectionTimeout
            | ErrorType::ConnectionRefused
            | ErrorType::DnsResolutionFailed
            | ErrorType::NetworkUnreachable => {
                if error.error_type == ErrorType::DnsResolutionFailed {
                    if let Some(host) = error.context.domain() {
                        self.resolver.cache.lock().remove(&host);
                    }
                }

                let delay = self.backoff.delay(attempt);
                tracing::debug!(
                    error_type = %error.error_type,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before retry"
                );
                tokio::time::sleep(delay).await;

                HandlerOutcome::Recovered(format!(
                    "backed off {}ms after {}",
                    delay.as_millis(),
                    error.error_type
                ))
            }
            ErrorType::HttpError => match self.parse_status(&error.message) {
                Some(status) if self.is_retryable_status(status) => {
                    let delay = self.backoff.delay(attempt);
                    tokio::time::sleep(delay).await;
                    HandlerOutcome::Recovered(format!(
                        "backed off {}ms after HTTP {}",
                        delay.as_millis(),
                        status
                    ))
                }
                Some(status) => {
                    HandlerOutcome::Unrecovered(format!("HTTP {} is not retryable", status))
                }
                None => HandlerOutcome::Unrecovered("no HTTP status in error message".to_string()),
            },
            other => HandlerOutcome::Unrecovered(format!("{} is not a network error", other)),
        }
    }

    /// First HTTP status code found in a message
    pub fn parse_status(&self, message: &str) -> Option<u16> {
        self.status_pattern
            .captures_iter(message)
            .filter_map(|caps| caps.get(1))
            .filter_map(|m| m.as_str().parse::<u16>().ok())
            .find(|code| (100..=599).contains(code))
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.config.retryable_statuses.contains(&status)
    }

    /// Remember when a domain's rate-limit window resets
    pub fn record_rate_limit(&self, domain: &str, headers: &HeaderMap) {
        let wait = reset_delay_from_headers(headers, Utc::now())
            .unwrap_or_else(|| Duration::from_secs(self.config.default_rate_limit_wait_secs))
            .min(Duration::from_secs(self.config.max_rate_limit_wait_secs));

        tracing::warn!(domain = %domain, wait_secs = wait.as_secs(), "Rate limit recorded");
        self.rate_limits
            .lock()
            .insert(domain.to_string(), Instant::now() + wait);
    }

    /// Time left until the domain's rate-limit window resets, if one is tracked
    pub fn rate_limit_wait(&self, domain: &str) -> Option<Duration> {
        let limits = self.rate_limits.lock();
        limits
            .get(domain)
            .map(|reset| reset.saturating_duration_since(Instant::now()))
    }

    /// Send a request, retrying retryable statuses and transient transport failures
    pub async fn make_request(&self, method: Method, url: &str) -> SentinelResult<Response> {
        let domain = reqwest::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        let max_attempts = self.config.max_request_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if let Some(wait) = self.rate_limit_wait(&domain) {
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
            }

            match self.client.request(method.clone(), url).send().await {
                Ok(response) if response.status().is_success() => {
                    if attempt > 1 {
                        tracing::info!(url = %url, attempt = attempt, "Request succeeded after retry");
                    }
                    return Ok(response);
                }
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        self.record_rate_limit(&domain, response.headers());
                    } else if !self.is_retryable_status(status.as_u16()) {
                        return Err(SentinelError::HttpStatus {
                            url: url.to_string(),
                            status: status.as_u16(),
                        });
                    }
                    last_error = format!("HTTP {}", status.as_u16());
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    last_error = e.to_string();
                }
                Err(e) => return Err(e.into()),
            }

            tracing::warn!(
                url = %url,
                attempt = attempt,
                max_attempts = max_attempts,
                error = %last_error,
                "Request failed, retrying"
            );

            if attempt < max_attempts {
                tokio::time::sleep(self.backoff.delay(attempt)).await;
            }
        }

        Err(SentinelError::RetriesExhausted {
            url: url.to_string(),
            attempts: max_attempts,
            last_error,
        })
    }
}

/// Delay until reset from `Retry-After` (seconds or HTTP date) or `X-RateLimit-Reset`
/// (epoch seconds or a relative delta)
pub fn reset_delay_from_headers(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    if let Some(value) = headers.get("retry-after").and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        if let Ok(secs) = value.parse::<u64>() {
            return Some(Duration::from_secs(secs));
        }
        if let Ok(date) = DateTime::parse_from_rfc2822(value) {
            let delta = date.with_timezone(&Utc) - now;
            return Some(delta.to_std().unwrap_or(Duration::ZERO));
        }
    }

    if let Some(value) = headers.get("x-ratelimit-reset").and_then(|v| v.to_str().ok()) {
        if let Ok(reset) = value.trim().parse::<i64>() {
            // Values this large are absolute epoch seconds
            if reset > 1_000_000_000 {
                return Some(Duration::from_secs((reset - now.timestamp()).max(0) as u64));
            }
            return Some(Duration::from_secs(reset.max(0) as u64));
        }
    }

    None
}
