//! In-memory queue double for runner tests.
//!
//! Scripts the claim sequence and records every lifecycle call so tests can
//! assert on exactly what the loop did. Also usable by downstream worker
//! crates to test their handlers without a live backend.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use processor_client::{ClientError, Job, JobEvent};

use crate::runner::{EventStream, JobQueue};

/// An in-memory [`JobQueue`]: jobs are claimed in push order per kind,
/// completions and failures are recorded, and subscriptions hand out scripted
/// event streams (or a never-ready stream once the script runs out).
#[derive(Default)]
pub struct InMemoryQueue {
    jobs: Mutex<VecDeque<Job>>,
    completed: Mutex<Vec<(i64, Option<Value>)>>,
    failed: Mutex<Vec<(i64, String)>>,
    streams: Mutex<VecDeque<EventStream>>,
    claim_count: AtomicUsize,
    subscribe_count: AtomicUsize,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a job for a later claim.
    pub fn push_job(&self, job: Job) {
        self.jobs.lock().expect("jobs lock").push_back(job);
    }

    /// Script the stream handed out by the next `subscribe` call.
    pub fn push_event_stream(&self, stream: EventStream) {
        self.streams.lock().expect("streams lock").push_back(stream);
    }

    /// Ids of completed jobs, in completion order.
    pub fn completed(&self) -> Vec<i64> {
        self.completed
            .lock()
            .expect("completed lock")
            .iter()
            .map(|(id, _)| *id)
            .collect()
    }

    /// Failed jobs with their reported error text.
    pub fn failed(&self) -> Vec<(i64, String)> {
        self.failed.lock().expect("failed lock").clone()
    }

    /// How many times `claim` was called (including empty results).
    pub fn claim_count(&self) -> usize {
        self.claim_count.load(Ordering::SeqCst)
    }

    /// How many times `subscribe` was called.
    pub fn subscribe_count(&self) -> usize {
        self.subscribe_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn claim(&self, kind: &str) -> Result<Option<Job>, ClientError> {
        self.claim_count.fetch_add(1, Ordering::SeqCst);
        let mut jobs = self.jobs.lock().expect("jobs lock");
        let position = jobs.iter().position(|job| job.kind == kind);
        Ok(position.and_then(|idx| jobs.remove(idx)))
    }

    async fn complete(&self, job_id: i64, result: Option<Value>) -> Result<(), ClientError> {
        self.completed
            .lock()
            .expect("completed lock")
            .push((job_id, result));
        Ok(())
    }

    async fn fail(&self, job_id: i64, error: &str) -> Result<(), ClientError> {
        self.failed
            .lock()
            .expect("failed lock")
            .push((job_id, error.to_string()));
        Ok(())
    }

    async fn subscribe(
        &self,
        _kinds: &[String],
        _read_timeout: Duration,
    ) -> Result<EventStream, ClientError> {
        self.subscribe_count.fetch_add(1, Ordering::SeqCst);
        let scripted = self.streams.lock().expect("streams lock").pop_front();
        Ok(scripted.unwrap_or_else(|| {
            Box::pin(futures::stream::pending::<Result<JobEvent, ClientError>>())
        }))
    }
}
