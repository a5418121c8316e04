//! # Page Fetcher
//!
//! Downloads Amazon product pages with a bounded timeout and a small retry
//! budget. Requests carry an ordinary browser identity (rotating desktop
//! User-Agent, `Accept-Language: en-IN`) and are spaced out by a minimum
//! interval. Robot-check pages are reported as [`FetchError::Blocked`] and are
//! never retried; the scheduler records them as `FETCH_ERROR`.
//!
//! The circuit breaker only counts failures that point at Amazon itself
//! (robot checks, timeouts, 403/429/5xx). A 404 for a delisted product is a
//! per-product problem and leaves the circuit closed.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::config::FetcherConfig;
use crate::errors::{error_logging, AppError, AppResult, FetchError};
use crate::observability;
use crate::parser;
use crate::retry::RetryPolicy;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
];

/// Source of product page HTML
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch the HTML of a product page
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

fn random_user_agent() -> &'static str {
    USER_AGENTS[rand::random::<u32>() as usize % USER_AGENTS.len()]
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-IN,en;q=0.9"));
    headers
}

fn classify_request_error(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

/// HTTP fetcher backed by `reqwest`
pub struct HttpPageFetcher {
    client: reqwest::Client,
    retry: RetryPolicy,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
    breaker: CircuitBreaker,
}

impl HttpPageFetcher {
    /// Build a fetcher with its own HTTP client
    pub fn new(config: &FetcherConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout())
            .default_headers(default_headers())
            .gzip(true)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client, config))
    }

    /// Build a fetcher around an existing client
    pub fn with_client(client: reqwest::Client, config: &FetcherConfig) -> Self {
        Self {
            client,
            retry: config.retry_policy(),
            min_interval: config.min_request_interval(),
            last_request: Mutex::new(None),
            breaker: CircuitBreaker::new(CircuitBreakerConfig {
                failure_threshold: config.circuit_failure_threshold,
                reset_timeout: Duration::from_secs(config.circuit_reset_secs),
            }),
        }
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Wait until the minimum interval since the previous request has passed
    async fn throttle(&self) {
        // the lock is held while sleeping so concurrent callers queue up
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn fetch_once(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, random_user_agent())
            .send()
            .await
            .map_err(|e| classify_request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_request_error(url, e))?;

        if parser::is_robot_check(&body) {
            return Err(FetchError::Blocked {
                url: url.to_string(),
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        if self.breaker.is_open() {
            observability::record_fetch_metrics(FetchError::CircuitOpen.kind(), Duration::ZERO, 0);
            return Err(FetchError::CircuitOpen);
        }

        let start = Instant::now();
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.throttle().await;

            match self.fetch_once(url).await {
                Ok(body) => {
                    self.breaker.record_success();
                    observability::update_circuit_breaker_state(false);
                    observability::record_fetch_metrics("success", start.elapsed(), attempt);
                    debug!(url = %url, attempt, bytes = body.len(), "Fetched product page");
                    return Ok(body);
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        url = %url,
                        attempt,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "Fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if err.indicates_upstream_trouble() {
                        self.breaker.record_failure();
                    } else {
                        // the site answered, only this page is bad
                        self.breaker.record_success();
                    }
                    observability::update_circuit_breaker_state(self.breaker.is_open());
                    observability::record_fetch_metrics(err.kind(), start.elapsed(), attempt);
                    error_logging::log_network_error(&err, "fetch_page", Some(url), Some(attempt));
                    return Err(err);
                }
            }
        }
    }
}
