//! Runtime shared by every archival ingestion worker.
//!
//! A worker binary wires three things together:
//!
//! * [`WorkerConfig`] reads the environment and builds a configured
//!   [`processor_client::ProcessorClient`].
//! * [`JobRunner`] drives the claim/process/report loop for the job kinds
//!   the worker handles, staying subscribed to the backend's event stream
//!   between drains. The worker supplies a [`JobHandler`].
//! * For long enumeration runs, [`ResumeTracker`] restores idempotency
//!   after crashes and [`ProgressLog`] checkpoints per-partition progress
//!   to disk.
//!
//! The [`testing`] module provides an in-memory queue double so worker
//! crates can exercise their handlers without a live backend.

pub mod config;
pub mod progress;
pub mod resume;
pub mod runner;
pub mod testing;

pub use config::{ConfigError, WorkerConfig};
pub use progress::{ProgressError, ProgressLog, Step};
pub use resume::{RecordStore, ResumeTracker, STATUS_INGESTING};
pub use runner::{next_backoff, EventStream, JobHandler, JobQueue, JobRunner, RECONNECT_MIN};
