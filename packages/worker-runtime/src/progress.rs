//! Persistent progress checkpointing for crash recovery.
//!
//! A multi-hour enumeration probes and ingests thousands of items; this log
//! records, per partition (collection/fond number), which item ids have
//! already been through each expensive step so a restart never repeats them.
//! Backed by a single JSON file, written atomically, with an autosave every
//! 50 new marks. Without a configured path the log degrades to a no-op so
//! the same scraper code runs with or without crash recovery.
//!
//! File format:
//!
//! ```json
//! {
//!   "1583": {
//!     "started_at": "2026-02-26T14:00:00Z",
//!     "probed_ids": ["xid-1", "xid-2"],
//!     "hidden_ids": ["xid-2"],
//!     "ingested_ids": ["xid-1"]
//!   }
//! }
//! ```

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Mutation count that triggers an automatic save.
const AUTOSAVE_THRESHOLD: u32 = 50;

/// Checkpoint I/O failures. Never masked: silently losing progress tracking
/// defeats its purpose.
#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("progress file I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("progress file format: {0}")]
    Format(#[from] serde_json::Error),
}

/// An enumeration step worth checkpointing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The expensive side-inspection of an item ran to completion.
    Probed,
    /// The item was found to carry hidden content.
    Hidden,
    /// The item was fully ingested.
    Ingested,
}

impl Step {
    /// Hidden marks are cheap bookkeeping; only probe and ingest marks count
    /// toward the autosave threshold.
    fn counts_toward_autosave(self) -> bool {
        matches!(self, Step::Probed | Step::Ingested)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PartitionEntry {
    started_at: DateTime<Utc>,
    #[serde(default)]
    probed_ids: IndexSet<String>,
    #[serde(default)]
    hidden_ids: IndexSet<String>,
    #[serde(default)]
    ingested_ids: IndexSet<String>,
}

impl PartitionEntry {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            probed_ids: IndexSet::new(),
            hidden_ids: IndexSet::new(),
            ingested_ids: IndexSet::new(),
        }
    }

    fn set(&self, step: Step) -> &IndexSet<String> {
        match step {
            Step::Probed => &self.probed_ids,
            Step::Hidden => &self.hidden_ids,
            Step::Ingested => &self.ingested_ids,
        }
    }

    fn set_mut(&mut self, step: Step) -> &mut IndexSet<String> {
        match step {
            Step::Probed => &mut self.probed_ids,
            Step::Hidden => &mut self.hidden_ids,
            Step::Ingested => &mut self.ingested_ids,
        }
    }
}

/// On-disk, partitioned record of enumeration progress.
pub struct ProgressLog {
    path: Option<PathBuf>,
    data: IndexMap<String, PartitionEntry>,
    dirty: u32,
}

impl ProgressLog {
    /// A log that tracks nothing: queries return false, mutations and saves
    /// do nothing.
    pub fn disabled() -> Self {
        Self {
            path: None,
            data: IndexMap::new(),
            dirty: 0,
        }
    }

    /// Open the log at `path`, loading any existing file in full.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ProgressError> {
        let path = path.into();
        let data = if path.exists() {
            let data: IndexMap<String, PartitionEntry> =
                serde_json::from_str(&fs::read_to_string(&path)?)?;
            info!(path = %path.display(), partitions = data.len(), "loaded progress log");
            data
        } else {
            IndexMap::new()
        };
        Ok(Self {
            path: Some(path),
            data,
            dirty: 0,
        })
    }

    /// Open at `path` when given, otherwise a disabled log.
    pub fn open(path: Option<PathBuf>) -> Result<Self, ProgressError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::disabled()),
        }
    }

    /// Whether this log actually persists anything.
    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    /// Whether `id` in `partition` already went through `step`.
    pub fn is_marked(&self, partition: &str, id: &str, step: Step) -> bool {
        if self.path.is_none() {
            return false;
        }
        self.data
            .get(partition)
            .map(|entry| entry.set(step).contains(id))
            .unwrap_or(false)
    }

    /// Record that `id` in `partition` has completed `step`.
    ///
    /// A set-insert: marking an already-present id is a no-op and never
    /// re-triggers a save. New probe/ingest marks count toward the autosave
    /// threshold; a failed autosave propagates.
    pub fn mark(&mut self, partition: &str, id: &str, step: Step) -> Result<(), ProgressError> {
        if self.path.is_none() {
            return Ok(());
        }
        let entry = self
            .data
            .entry(partition.to_string())
            .or_insert_with(PartitionEntry::new);
        let inserted = entry.set_mut(step).insert(id.to_string());
        if inserted && step.counts_toward_autosave() {
            self.dirty += 1;
            if self.dirty >= AUTOSAVE_THRESHOLD {
                self.save()?;
            }
        }
        Ok(())
    }

    /// All ids marked hidden in `partition`, in mark order.
    pub fn hidden_ids(&self, partition: &str) -> Vec<String> {
        self.data
            .get(partition)
            .map(|entry| entry.hidden_ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of probed ids in `partition`.
    pub fn probed_count(&self, partition: &str) -> usize {
        self.data
            .get(partition)
            .map(|entry| entry.probed_ids.len())
            .unwrap_or(0)
    }

    /// Persist to disk via write-temp-then-rename, so a crash mid-write
    /// leaves the previous file intact.
    pub fn save(&mut self) -> Result<(), ProgressError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, serde_json::to_string_pretty(&self.data)?)?;
        fs::rename(&tmp, path)?;
        self.dirty = 0;
        debug!(path = %path.display(), "progress saved");
        Ok(())
    }
}
