//! SSE-driven consumption loop for pipeline workers.
//!
//! Every worker follows the same pattern: drain pending jobs, subscribe to
//! the job events stream, drain again on each relevant event, and reconnect
//! with backoff when the stream fails. The stream's read timeout equals the
//! poll interval, so jobs are drained periodically even if the backend's push
//! channel silently drops an event.
//!
//! ```text
//! JobRunner
//!     │
//!     ├─► Drain (claim/process per kind until empty)
//!     ├─► Subscribe to job events
//!     │       ├─ event for tracked kind ──► Drain
//!     │       ├─ read timeout (poll tick) ─► Drain, resubscribe
//!     │       └─ stream failure ──────────► Drain, backoff, resubscribe
//!     └─► stops only on cancellation
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::Stream;
use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use processor_client::{ClientError, Job, JobEvent, ProcessorClient};

/// Minimum (and initial) reconnect backoff.
pub const RECONNECT_MIN: Duration = Duration::from_secs(1);

/// Boxed job-event stream yielded by [`JobQueue::subscribe`].
pub type EventStream = Pin<Box<dyn Stream<Item = Result<JobEvent, ClientError>> + Send>>;

/// The queue seam the consumption loop drives.
///
/// Implemented by [`ProcessorClient`] in production and by
/// [`crate::testing::InMemoryQueue`] in tests. Mutual exclusion on a claimed
/// job is the backend's invariant; implementations never add local locking
/// for it.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn claim(&self, kind: &str) -> Result<Option<Job>, ClientError>;
    async fn complete(&self, job_id: i64, result: Option<Value>) -> Result<(), ClientError>;
    async fn fail(&self, job_id: i64, error: &str) -> Result<(), ClientError>;
    async fn subscribe(
        &self,
        kinds: &[String],
        read_timeout: Duration,
    ) -> Result<EventStream, ClientError>;
}

#[async_trait]
impl JobQueue for ProcessorClient {
    async fn claim(&self, kind: &str) -> Result<Option<Job>, ClientError> {
        self.claim_job(kind).await
    }

    async fn complete(&self, job_id: i64, result: Option<Value>) -> Result<(), ClientError> {
        self.complete_job(job_id, result).await
    }

    async fn fail(&self, job_id: i64, error: &str) -> Result<(), ClientError> {
        self.fail_job(job_id, error).await
    }

    async fn subscribe(
        &self,
        kinds: &[String],
        read_timeout: Duration,
    ) -> Result<EventStream, ClientError> {
        let stream = ProcessorClient::subscribe(self, kinds, read_timeout).await?;
        Ok(Box::pin(stream))
    }
}

/// Handler for claimed jobs, implemented by worker-specific code.
///
/// Returning `Ok` marks the job completed (the optional value becomes the
/// job result); returning `Err` marks it failed with the error text.
/// Handlers must not catch-and-swallow errors they want reported as failed.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn process(&self, job: Job) -> anyhow::Result<Option<Value>>;
}

/// What ended a connected subscription.
enum StreamOutcome {
    /// Read timeout or server-side close: the periodic poll tick.
    Tick,
    /// The stream (or a drain it triggered) failed; reconnect with backoff.
    Failed,
    Cancelled,
}

/// The worker main loop: drains jobs of the configured kinds and waits on
/// the events stream between drains.
pub struct JobRunner<Q: JobQueue> {
    queue: Arc<Q>,
    handler: Arc<dyn JobHandler>,
    kinds: Vec<String>,
    poll_interval: Duration,
}

impl<Q: JobQueue> JobRunner<Q> {
    pub fn new(
        queue: Arc<Q>,
        handler: Arc<dyn JobHandler>,
        kinds: Vec<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            handler,
            kinds,
            poll_interval,
        }
    }

    /// Claim and process all available jobs, kind by kind in the configured
    /// order. Returns the number of jobs whose handler succeeded.
    ///
    /// A failing handler reports the job as failed and processing continues;
    /// one bad job never halts the pass. Claim errors (after the transport's
    /// own retries, including a cancellation observed mid-retry) propagate
    /// to the caller.
    pub async fn drain(&self, shutdown: &CancellationToken) -> Result<u64, ClientError> {
        let mut processed = 0u64;
        for kind in &self.kinds {
            loop {
                if shutdown.is_cancelled() {
                    return Ok(processed);
                }
                let Some(job) = self.queue.claim(kind).await? else {
                    break;
                };
                let job_id = job.id;
                debug!(job_id, kind = %kind, "processing job");
                match self.handler.process(job).await {
                    Ok(result) => {
                        processed += 1;
                        info!(job_id, kind = %kind, "job succeeded");
                        if let Err(e) = self.queue.complete(job_id, result).await {
                            error!(job_id, error = %e, "failed to report job completion");
                        }
                    }
                    Err(e) => {
                        warn!(job_id, kind = %kind, error = %e, "job failed");
                        if let Err(report) = self.queue.fail(job_id, &format!("{e:#}")).await {
                            error!(job_id, error = %report, "failed to report job failure");
                        }
                    }
                }
            }
        }
        Ok(processed)
    }

    /// Run until cancelled. Returns the total number of jobs processed, which
    /// survives cancellation for the caller to log.
    ///
    /// Recoverable failures (transport exhaustion, handler errors, stream
    /// drops) never terminate the loop; they are logged and answered with an
    /// immediate drain pass plus a doubling backoff capped at the poll
    /// interval. The backoff resets on every successful subscribe.
    pub async fn run(&self, shutdown: CancellationToken) -> u64 {
        info!(
            kinds = ?self.kinds,
            poll_interval_secs = self.poll_interval.as_secs(),
            "worker loop starting"
        );

        let mut processed = 0u64;
        let mut reconnect_delay = RECONNECT_MIN;

        'outer: loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.drain(&shutdown).await {
                Ok(count) => processed += count,
                Err(e) => {
                    warn!(error = %e, "drain pass failed");
                    if self.backoff_sleep(&shutdown, &mut reconnect_delay).await {
                        break;
                    }
                    continue;
                }
            }

            if shutdown.is_cancelled() {
                break;
            }

            let mut events = match self.queue.subscribe(&self.kinds, self.poll_interval).await {
                Ok(events) => {
                    reconnect_delay = RECONNECT_MIN;
                    debug!("subscribed to job events");
                    events
                }
                Err(e) => {
                    warn!(error = %e, "subscription failed, falling back to polling");
                    // One immediate drain so pending work is not delayed by
                    // the backoff sleep.
                    match self.drain(&shutdown).await {
                        Ok(count) => processed += count,
                        Err(e) => warn!(error = %e, "fallback drain failed"),
                    }
                    if self.backoff_sleep(&shutdown, &mut reconnect_delay).await {
                        break;
                    }
                    continue;
                }
            };

            match self
                .consume_events(&mut events, &shutdown, &mut processed)
                .await
            {
                StreamOutcome::Cancelled => break 'outer,
                StreamOutcome::Tick => continue,
                StreamOutcome::Failed => {
                    match self.drain(&shutdown).await {
                        Ok(count) => processed += count,
                        Err(e) => warn!(error = %e, "fallback drain failed"),
                    }
                    if self.backoff_sleep(&shutdown, &mut reconnect_delay).await {
                        break;
                    }
                }
            }
        }

        info!(processed, "worker loop stopped");
        processed
    }

    /// Wait on a connected stream, draining on every event for a tracked
    /// kind, until the stream ends or fails.
    async fn consume_events(
        &self,
        events: &mut EventStream,
        shutdown: &CancellationToken,
        processed: &mut u64,
    ) -> StreamOutcome {
        loop {
            let item = tokio::select! {
                _ = shutdown.cancelled() => return StreamOutcome::Cancelled,
                item = events.next() => item,
            };
            match item {
                None => return StreamOutcome::Tick,
                Some(Ok(JobEvent::Job { kind })) if self.kinds.contains(&kind) => {
                    info!(kind = %kind, "job event received, draining");
                    match self.drain(shutdown).await {
                        Ok(count) => *processed += count,
                        Err(e) => {
                            warn!(error = %e, "drain after event failed");
                            return StreamOutcome::Failed;
                        }
                    }
                }
                Some(Ok(event)) => debug!(?event, "ignoring event"),
                Some(Err(e)) => {
                    warn!(error = %e, "event stream failed");
                    return StreamOutcome::Failed;
                }
            }
        }
    }

    /// Sleep the current reconnect backoff (cancellable), then double it up
    /// to the poll-interval ceiling. Returns true when cancelled mid-sleep.
    async fn backoff_sleep(&self, shutdown: &CancellationToken, delay: &mut Duration) -> bool {
        let wait = *delay;
        *delay = next_backoff(*delay, self.poll_interval);
        debug!(wait_secs = wait.as_secs_f64(), "reconnect backoff");
        tokio::select! {
            _ = shutdown.cancelled() => true,
            _ = tokio::time::sleep(wait) => false,
        }
    }
}

/// Double the reconnect backoff, never exceeding `ceiling`.
pub fn next_backoff(current: Duration, ceiling: Duration) -> Duration {
    (current * 2).min(ceiling)
}
