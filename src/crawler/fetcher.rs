//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for a session, including:
//! - Building HTTP clients from the session's browser profile
//! - Gating every attempt through the host's circuit breaker
//! - Retry with jittered exponential backoff for transient failures
//! - Error classification
//! - Feeding one risk sample per attempt to the session's monitor

use crate::config::FetchConfig;
use crate::crawler::mimicry::BrowserProfile;
use crate::state::{CircuitBreaker, RiskMonitor, RiskSample};
use crate::FetchError;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE};
use reqwest::{redirect::Policy, Client};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// One page to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Area the page belongs to, or the entry point name for navigation fetches
    pub area: String,
    pub url: Url,
}

impl Target {
    pub fn new(area: impl Into<String>, url: Url) -> Self {
        Self {
            area: area.into(),
            url,
        }
    }
}

/// A successfully fetched page
#[derive(Debug, Clone)]
pub struct Content {
    /// Final URL after redirects
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
    pub latency: Duration,
}

/// Builds an HTTP client presenting the given browser profile
///
/// # Example
///
/// ```no_run
/// use quiet_harvest::config::FetchConfig;
/// use quiet_harvest::crawler::{build_http_client, BrowserProfile};
///
/// let profile = BrowserProfile::presets().remove(0);
/// let client = build_http_client(&profile, &FetchConfig::default()).unwrap();
/// ```
pub fn build_http_client(
    profile: &BrowserProfile,
    config: &FetchConfig,
) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    if let Ok(accept) = HeaderValue::from_str(&profile.accept) {
        headers.insert(ACCEPT, accept);
    }
    if let Ok(language) = HeaderValue::from_str(&profile.accept_language) {
        headers.insert(ACCEPT_LANGUAGE, language);
    }

    Client::builder()
        .user_agent(profile.user_agent.as_str())
        .default_headers(headers)
        .timeout(Duration::from_millis(config.request_timeout_ms))
        .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
        .redirect(Policy::limited(5))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Breaker-guarded fetches against one target host
pub struct FetchEngine {
    client: Client,
    breaker: Arc<CircuitBreaker>,
    config: FetchConfig,
    require_html: bool,
}

impl FetchEngine {
    pub fn new(
        client: Client,
        breaker: Arc<CircuitBreaker>,
        config: FetchConfig,
        require_html: bool,
    ) -> Self {
        Self {
            client,
            breaker,
            config,
            require_html,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Fetches one target
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | Breaker refuses | Immediate `CircuitOpen`, no I/O |
    /// | Timeout | Retry up to `max_retries` times |
    /// | Connection/network error | Retry up to `max_retries` times |
    /// | Non-2xx status | Immediate `Status` |
    /// | Non-HTML or undecodable body | Immediate `Parse` |
    ///
    /// Every attempt re-checks the breaker and reports its outcome to it, so
    /// retries count toward the failure threshold.
    pub async fn fetch(
        &self,
        target: &Target,
        monitor: &mut RiskMonitor,
    ) -> Result<Content, FetchError> {
        let attempts = self.config.max_retries + 1;
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let wait = self.backoff(attempt);
                tracing::debug!(
                    "Retrying {} in {:?} (attempt {}/{})",
                    target.url,
                    wait,
                    attempt + 1,
                    attempts
                );
                tokio::time::sleep(wait).await;
            }

            if !self.breaker.allow() {
                monitor.record(RiskSample::rejected());
                tracing::debug!("Breaker refused request to {}", target.url);
                return Err(FetchError::CircuitOpen {
                    host: self.breaker.host().to_string(),
                    attempted: attempt,
                });
            }

            let started = Instant::now();
            let result = self.attempt(&target.url).await;
            let latency = started.elapsed();

            match result {
                Ok(mut content) => {
                    content.latency = latency;
                    self.breaker.on_success();
                    monitor.record(RiskSample::observed(latency, true));
                    tracing::debug!(
                        "Fetched {} ({} bytes, {:?})",
                        content.url,
                        content.body.len(),
                        latency
                    );
                    return Ok(content);
                }
                Err(error) => {
                    self.breaker.on_failure();
                    monitor.record(RiskSample::observed(latency, false));
                    tracing::warn!("Attempt {} for {} failed: {}", attempt + 1, target.url, error);

                    if !error.is_transient() {
                        return Err(error);
                    }
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::Network {
            url: target.url.to_string(),
            message: "no attempt was made".to_string(),
        }))
    }

    async fn attempt(&self, url: &Url) -> Result<Content, FetchError> {
        let url_str = url.to_string();

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify(&url_str, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url_str,
                status: status.as_u16(),
            });
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if self.require_html {
            let is_html = content_type
                .as_deref()
                .map(|ct| ct.contains("text/html") || ct.contains("application/xhtml"))
                .unwrap_or(false);
            if !is_html {
                return Err(FetchError::Parse {
                    url: url_str,
                    message: format!(
                        "expected HTML, got {}",
                        content_type.as_deref().unwrap_or("no content type")
                    ),
                });
            }
        }

        let body = response.text().await.map_err(|e| {
            if e.is_decode() {
                FetchError::Parse {
                    url: url_str.clone(),
                    message: e.to_string(),
                }
            } else {
                classify(&url_str, e)
            }
        })?;

        Ok(Content {
            url: final_url,
            status: status.as_u16(),
            content_type,
            body,
            latency: Duration::ZERO,
        })
    }

    /// `base * 2^(attempt-1)` plus up to half of `base` of jitter
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base_ms;
        let exp = base.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(10));
        let jitter = if base > 1 {
            rand::thread_rng().gen_range(0..=base / 2)
        } else {
            0
        };
        Duration::from_millis(exp.saturating_add(jitter))
    }
}

fn classify(url: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}
