//! Pure REST client for the archiver backend processor API.
//!
//! Provides the job lifecycle operations (claim, complete, fail), the SSE
//! job-events subscription, and the ingest status/record API that scrapers
//! use for idempotent resume. All requests go through a resilient
//! [`Transport`] with automatic retry and bounded backoff.
//!
//! # Example
//!
//! ```rust,ignore
//! use processor_client::ProcessorClient;
//!
//! let client = ProcessorClient::new("http://localhost:8080", token)?;
//!
//! while let Some(job) = client.claim_job("ocr_page_paddle").await? {
//!     match run_ocr(&job).await {
//!         Ok(_) => client.complete_job(job.id, None).await?,
//!         Err(e) => client.fail_job(job.id, &e.to_string()).await?,
//!     }
//! }
//! ```

pub mod error;
pub mod events;
pub mod transport;
pub mod types;

pub use error::{ClientError, Result};
pub use events::JobEventStream;
pub use transport::{RetryPolicy, Transport};
pub use types::{Job, JobEvent, JobTask, NewRecord, RecordStatusInfo};

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, info};

use transport::check_status;

/// Default per-request timeout for API calls.
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(60);

/// Connect timeout for the long-lived events stream.
const SSE_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Health endpoint polled by [`ProcessorClient::wait_for_backend`].
const HEALTH_PATH: &str = "/actuator/health";

/// Errors reported via [`ProcessorClient::fail_job`] are truncated to this
/// many characters to bound backend storage and log size.
const MAX_FAIL_MESSAGE_CHARS: usize = 500;

/// Client for the archiver backend processor and ingest APIs.
pub struct ProcessorClient {
    transport: Transport,
    headers: HeaderMap,
}

impl ProcessorClient {
    /// Create a client for `base_url`, authenticating with the processor
    /// bearer token.
    pub fn new(base_url: impl Into<String>, token: &str) -> Result<Self> {
        Self::with_options(
            base_url,
            token,
            "archiver-worker/0.1",
            DEFAULT_API_TIMEOUT,
            RetryPolicy::default(),
            None,
        )
    }

    /// Fully-configured constructor: user agent, request timeout, retry
    /// policy, and an optional fixed pre-request delay (polite pacing, stacks
    /// with retry backoff).
    pub fn with_options(
        base_url: impl Into<String>,
        token: &str,
        user_agent: &str,
        timeout: Duration,
        retry: RetryPolicy,
        request_delay: Option<Duration>,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ClientError::Config("processor token is not a valid header value".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|_| ClientError::Config("user agent is not a valid header value".into()))?,
        );

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers.clone())
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;

        let mut transport = Transport::new(client, base_url).with_retry(retry);
        if let Some(delay) = request_delay {
            transport = transport.with_request_delay(delay);
        }

        Ok(Self { transport, headers })
    }

    /// Observe a shutdown token in every transport sleep (retry backoff,
    /// politeness delay, readiness polling). Workers pass the same token they
    /// cancel on shutdown so an in-flight retry schedule is cut short.
    pub fn with_cancellation(mut self, cancel: tokio_util::sync::CancellationToken) -> Self {
        self.transport = self.transport.with_cancellation(cancel);
        self
    }

    /// The backend base URL this client talks to.
    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    /// Block until the backend health endpoint responds. Meant for worker
    /// startup so the main loop never races a still-booting backend.
    pub async fn wait_for_backend(&self, max_wait: Duration, interval: Duration) -> Result<()> {
        self.transport
            .wait_for_backend(HEALTH_PATH, max_wait, interval)
            .await
    }

    // -- job lifecycle -----------------------------------------------------

    /// Claim the next pending job of `kind`.
    ///
    /// A 204 from the backend is the defined "no job available" signal and
    /// returns `Ok(None)`, an expected steady-state outcome rather than an
    /// error.
    pub async fn claim_job(&self, kind: &str) -> Result<Option<Job>> {
        let response = self
            .transport
            .post_json("/api/processor/jobs/claim", &json!({ "kind": kind }))
            .await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let job: Job = response.json().await.map_err(ClientError::from)?;
        debug!(job_id = job.id, kind = %job.kind, "claimed job");
        Ok(Some(job))
    }

    /// Mark a claimed job as completed, with an optional result document.
    ///
    /// Idempotency is the caller's responsibility; completing an
    /// already-terminated job is a backend-defined error and is not masked.
    pub async fn complete_job(&self, job_id: i64, result: Option<Value>) -> Result<()> {
        let body = match result {
            Some(result) => json!({ "result": result }),
            None => json!({}),
        };
        self.transport
            .post_json(&format!("/api/processor/jobs/{job_id}/complete"), &body)
            .await?;
        Ok(())
    }

    /// Mark a claimed job as failed. The error text is truncated before
    /// transmission.
    pub async fn fail_job(&self, job_id: i64, error: &str) -> Result<()> {
        let message = truncate_chars(error, MAX_FAIL_MESSAGE_CHARS);
        self.transport
            .post_json(
                &format!("/api/processor/jobs/{job_id}/fail"),
                &json!({ "error": message }),
            )
            .await?;
        Ok(())
    }

    /// Open the long-lived job events stream.
    ///
    /// `kinds` tells the backend which job types this worker handles;
    /// `read_timeout` doubles as the worker's poll interval: when it expires
    /// the stream ends normally and the caller drains pending jobs.
    pub async fn subscribe(
        &self,
        kinds: &[String],
        read_timeout: Duration,
    ) -> Result<JobEventStream> {
        let client = reqwest::Client::builder()
            .default_headers(self.headers.clone())
            .connect_timeout(SSE_CONNECT_TIMEOUT)
            .read_timeout(read_timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build SSE client: {e}")))?;

        let url = format!("{}/api/processor/jobs/events", self.base_url());
        let params: Vec<(&str, &str)> = kinds.iter().map(|k| ("kinds", k.as_str())).collect();
        let response = client
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(ClientError::from)?;
        let response = check_status(response).await?;
        info!(kinds = ?kinds, "job events stream connected");
        Ok(JobEventStream::new(response.bytes_stream()))
    }

    // -- ingest status / records -------------------------------------------

    /// Fetch all record statuses for a source system, as a map of
    /// `sourceRecordId -> status`. Fetched once at scraper startup to gate
    /// every item without per-item backend queries.
    pub async fn get_all_statuses(&self, source_system: &str) -> Result<HashMap<String, String>> {
        let response = self
            .transport
            .get(&format!("/api/ingest/status/{source_system}"))
            .await?;
        response.json().await.map_err(ClientError::from)
    }

    /// Look up a single record's status, including its authoritative backend
    /// record id. `Ok(None)` when the backend has never seen this record.
    pub async fn get_record_status(
        &self,
        source_system: &str,
        source_record_id: &str,
    ) -> Result<Option<RecordStatusInfo>> {
        let result = self
            .transport
            .get(&format!("/api/ingest/status/{source_system}/{source_record_id}"))
            .await;
        match result {
            Ok(response) => Ok(Some(response.json().await.map_err(ClientError::from)?)),
            Err(ClientError::Status { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Delete a record and all its dependent data (pages, attachments).
    pub async fn delete_record(&self, record_id: &str) -> Result<()> {
        self.transport
            .delete(&format!("/api/ingest/records/{record_id}"))
            .await?;
        info!(record_id, "deleted record");
        Ok(())
    }

    /// Create a new backend record, returning its id.
    ///
    /// Creating a record that already exists for the same
    /// `(sourceSystem, sourceRecordId)` pair is a conflict the backend
    /// rejects; it surfaces here as `ClientError::Status { status: 409, .. }`
    /// for the caller to branch on.
    pub async fn create_record(&self, record: &NewRecord) -> Result<String> {
        #[derive(serde::Deserialize)]
        struct Created {
            #[serde(default)]
            id: Option<String>,
            #[serde(default, alias = "recordId")]
            record_id: Option<String>,
        }

        let response = self
            .transport
            .post_json("/api/ingest/records", record)
            .await?;
        let created: Created = response.json().await.map_err(ClientError::from)?;
        let record_id = created.id.or(created.record_id).ok_or_else(|| {
            ClientError::Parse("record creation response carried no id".into())
        })?;
        info!(
            record_id = %record_id,
            source_record_id = %record.source_record_id,
            "created record"
        );
        Ok(record_id)
    }
}

/// Truncate to at most `max` characters, respecting UTF-8 boundaries.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_is_noop_below_limit() {
        assert_eq!(truncate_chars("short error", 500), "short error");
    }

    #[test]
    fn truncate_cuts_long_messages() {
        let long = "x".repeat(800);
        assert_eq!(truncate_chars(&long, 500).len(), 500);
    }

    #[test]
    fn truncate_respects_utf8_boundaries() {
        let text = "přílišná žluťoučká".repeat(60);
        let cut = truncate_chars(&text, 500);
        assert_eq!(cut.chars().count(), 500);
    }

    #[test]
    fn client_rejects_non_ascii_token() {
        let result = ProcessorClient::new("http://localhost:8080", "tok\nen");
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[test]
    fn base_url_is_normalized() {
        let client =
            ProcessorClient::new("http://localhost:8080/", "secret").expect("client builds");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }
}
