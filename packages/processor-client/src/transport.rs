//! Resilient HTTP transport with automatic retry and backoff.
//!
//! Wraps a shared `reqwest::Client` so every call against the backend (and
//! against third-party archive portals) gets the same treatment: transient
//! failures retry on a fixed ascending backoff schedule, client errors
//! surface immediately, and an optional fixed delay before each attempt keeps
//! request pacing polite toward externally-owned services.

use std::future::Future;
use std::time::Duration;

use reqwest::{Method, Response};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};

/// Default total attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default backoff schedule between attempts, indexed by attempt number.
pub const DEFAULT_BACKOFF: [Duration; 4] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry schedule for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Sleep durations between attempts; attempts beyond the schedule length
    /// reuse the last entry.
    pub backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Policy with a custom attempt budget and the default schedule.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Backoff before the attempt following `attempt` (1-based), clamped to
    /// the schedule's last element.
    pub fn delay(&self, attempt: u32) -> Duration {
        if self.backoff.is_empty() {
            return Duration::ZERO;
        }
        let idx = (attempt.saturating_sub(1) as usize).min(self.backoff.len() - 1);
        self.backoff[idx]
    }
}

/// Run `op` under `policy`, sleeping the scheduled backoff between retryable
/// failures. Non-retryable errors return immediately; after exhausting the
/// budget the last error is returned unchanged in kind.
///
/// Cancelling `cancel` interrupts the backoff sleeps and skips further
/// attempts, surfacing as [`ClientError::Cancelled`]. A shutdown signal must
/// never wait out the backoff schedule.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last: Option<ClientError> = None;
    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => {
                if attempt < attempts {
                    let wait = policy.delay(attempt);
                    warn!(
                        what,
                        attempt,
                        max_attempts = attempts,
                        wait_secs = wait.as_secs_f64(),
                        error = %err,
                        "request failed, retrying"
                    );
                    last = Some(err);
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                        _ = tokio::time::sleep(wait) => {}
                    }
                } else {
                    last = Some(err);
                }
            }
        }
    }
    Err(last.unwrap_or_else(|| ClientError::Network(format!("{what}: no attempt made"))))
}

/// HTTP transport bound to a base URL, with retry and polite pacing.
pub struct Transport {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
    request_delay: Option<Duration>,
    cancel: CancellationToken,
}

impl Transport {
    /// Wrap an already-configured `reqwest::Client`.
    ///
    /// Default headers (bearer token, user agent) and per-request timeouts
    /// belong on the client; the transport adds retry and pacing on top.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            retry: RetryPolicy::default(),
            request_delay: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fixed sleep before every attempt (polite scraping). Stacks with, and
    /// is unrelated to, the retry backoff.
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = if delay.is_zero() { None } else { Some(delay) };
        self
    }

    /// Shutdown token observed by every transport sleep (retry backoff,
    /// politeness delay, readiness polling). An already-cancelled or
    /// later-cancelled token makes in-flight operations return
    /// [`ClientError::Cancelled`] instead of waiting out their schedule.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The configured base URL, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get(&self, path: &str) -> Result<Response> {
        self.execute(Method::GET, path, None::<&()>).await
    }

    pub async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        self.execute(Method::POST, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Response> {
        self.execute(Method::DELETE, path, None::<&()>).await
    }

    async fn execute<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        retry(&self.retry, &self.cancel, path, || {
            let method = method.clone();
            let url = url.clone();
            async move {
                if let Some(delay) = self.request_delay {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(ClientError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                debug!(%method, %url, "sending request");
                let mut request = self.client.request(method, &url);
                if let Some(body) = body {
                    request = request.json(body);
                }
                let response = request.send().await.map_err(ClientError::from)?;
                check_status(response).await
            }
        })
        .await
    }

    /// Block until the backend answers its health endpoint with anything
    /// below 500, polling every `interval`. Errors after `max_wait`.
    pub async fn wait_for_backend(
        &self,
        health_path: &str,
        max_wait: Duration,
        interval: Duration,
    ) -> Result<()> {
        let url = format!("{}{}", self.base_url, health_path);
        let deadline = Instant::now() + max_wait;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let probe = self
                .client
                .get(&url)
                .timeout(Duration::from_secs(5))
                .send()
                .await;
            if let Ok(response) = probe {
                if response.status().as_u16() < 500 {
                    info!(base_url = %self.base_url, attempt, "backend ready");
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(ClientError::Network(format!(
                    "backend not reachable at {} after {}s",
                    self.base_url,
                    max_wait.as_secs()
                )));
            }
            info!(base_url = %self.base_url, attempt, "waiting for backend");
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

/// Classify the response status: success passes through, everything else
/// becomes a `Status` error carrying the body text.
pub(crate) async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}
