//! Idempotent-resume gate for scrapers.
//!
//! Before any site-specific work happens for an item, the tracker decides:
//! new item → proceed; already handled → skip; left mid-ingestion by a
//! crashed run → delete the whole backend record (cascading partial pages)
//! and proceed as fresh. Deleting and recreating, rather than patching in
//! place, keeps the unit of idempotence at "the whole record": a crash
//! between uploading page N and marking completion can otherwise leave
//! duplicate pages behind.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, info};

use processor_client::{ClientError, ProcessorClient, RecordStatusInfo};

/// Status value for a record whose ingestion started but never finished.
pub const STATUS_INGESTING: &str = "ingesting";

/// Backend record operations the tracker needs.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All statuses for a source system, keyed by `sourceRecordId`.
    async fn fetch_statuses(
        &self,
        source_system: &str,
    ) -> Result<HashMap<String, String>, ClientError>;

    /// Authoritative single-record lookup, `None` when the backend has no
    /// record for this id.
    async fn fetch_status(
        &self,
        source_system: &str,
        source_record_id: &str,
    ) -> Result<Option<RecordStatusInfo>, ClientError>;

    /// Delete a record and everything attached to it.
    async fn delete_record(&self, record_id: &str) -> Result<(), ClientError>;
}

#[async_trait]
impl RecordStore for ProcessorClient {
    async fn fetch_statuses(
        &self,
        source_system: &str,
    ) -> Result<HashMap<String, String>, ClientError> {
        self.get_all_statuses(source_system).await
    }

    async fn fetch_status(
        &self,
        source_system: &str,
        source_record_id: &str,
    ) -> Result<Option<RecordStatusInfo>, ClientError> {
        self.get_record_status(source_system, source_record_id).await
    }

    async fn delete_record(&self, record_id: &str) -> Result<(), ClientError> {
        ProcessorClient::delete_record(self, record_id).await
    }
}

/// Process-local cache of backend-owned record statuses for one source
/// system.
///
/// Fetched once at startup and mutated locally as the session completes
/// items. Staleness against other concurrent workers is acceptable: the
/// backend's create-or-conflict check is the ultimate safety net.
pub struct ResumeTracker {
    source_system: String,
    statuses: HashMap<String, String>,
}

impl ResumeTracker {
    /// Bulk-fetch all known statuses for `source_system`.
    pub async fn load<S: RecordStore + ?Sized>(
        store: &S,
        source_system: &str,
    ) -> Result<Self, ClientError> {
        let statuses = store.fetch_statuses(source_system).await?;
        let interrupted = statuses
            .values()
            .filter(|s| s.as_str() == STATUS_INGESTING)
            .count();
        info!(
            source_system,
            known = statuses.len(),
            done = statuses.len() - interrupted,
            interrupted,
            "loaded record statuses"
        );
        Ok(Self {
            source_system: source_system.to_string(),
            statuses,
        })
    }

    /// Build from an already-known status map (dry runs, tests).
    pub fn with_statuses(
        source_system: impl Into<String>,
        statuses: HashMap<String, String>,
    ) -> Self {
        Self {
            source_system: source_system.into(),
            statuses,
        }
    }

    /// If this item is already handled, its status; the caller should log
    /// and count it as skipped, not failed. `None` means proceed (either a
    /// new item or one needing [`reclaim`](Self::reclaim) first).
    pub fn should_skip(&self, source_record_id: &str) -> Option<&str> {
        self.statuses
            .get(source_record_id)
            .map(String::as_str)
            .filter(|status| *status != STATUS_INGESTING)
    }

    /// Whether a previous run crashed mid-ingestion for this item.
    pub fn is_interrupted(&self, source_record_id: &str) -> bool {
        self.statuses.get(source_record_id).map(String::as_str) == Some(STATUS_INGESTING)
    }

    /// Clean up an interrupted record so the item can be reprocessed from
    /// scratch: look up the authoritative backend id, delete the record (and
    /// its partial pages), and drop the local entry so the fresh attempt is
    /// not itself skipped. Returns the deleted record id.
    ///
    /// A no-op for items that are not interrupted.
    pub async fn reclaim<S: RecordStore + ?Sized>(
        &mut self,
        store: &S,
        source_record_id: &str,
    ) -> Result<Option<String>, ClientError> {
        if !self.is_interrupted(source_record_id) {
            return Ok(None);
        }
        let Some(record) = store
            .fetch_status(&self.source_system, source_record_id)
            .await?
        else {
            // Gone from the backend since the bulk fetch; treat as fresh.
            debug!(source_record_id, "interrupted record already gone");
            self.statuses.remove(source_record_id);
            return Ok(None);
        };
        store.delete_record(&record.id).await?;
        self.statuses.remove(source_record_id);
        info!(
            record_id = %record.id,
            source_record_id,
            "deleted interrupted record for re-ingestion"
        );
        Ok(Some(record.id))
    }

    /// Record a locally-completed item so the rest of this session skips it
    /// without re-querying the backend.
    pub fn mark_done(&mut self, source_record_id: &str, status: &str) {
        self.statuses
            .insert(source_record_id.to_string(), status.to_string());
    }

    /// Number of known records.
    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Record store backed by fixed lookups, recording deletions.
    struct FakeStore {
        lookups: HashMap<String, RecordStatusInfo>,
        deleted: Mutex<Vec<String>>,
    }

    impl FakeStore {
        fn new(lookups: Vec<(&str, &str, &str)>) -> Self {
            let lookups = lookups
                .into_iter()
                .map(|(source_id, record_id, status)| {
                    (
                        source_id.to_string(),
                        RecordStatusInfo {
                            id: record_id.to_string(),
                            status: status.to_string(),
                        },
                    )
                })
                .collect();
            Self {
                lookups,
                deleted: Mutex::new(Vec::new()),
            }
        }

        fn deleted(&self) -> Vec<String> {
            self.deleted.lock().expect("deleted lock").clone()
        }
    }

    #[async_trait]
    impl RecordStore for FakeStore {
        async fn fetch_statuses(
            &self,
            _source_system: &str,
        ) -> Result<HashMap<String, String>, ClientError> {
            Ok(self
                .lookups
                .iter()
                .map(|(k, v)| (k.clone(), v.status.clone()))
                .collect())
        }

        async fn fetch_status(
            &self,
            _source_system: &str,
            source_record_id: &str,
        ) -> Result<Option<RecordStatusInfo>, ClientError> {
            Ok(self.lookups.get(source_record_id).map(|info| {
                RecordStatusInfo {
                    id: info.id.clone(),
                    status: info.status.clone(),
                }
            }))
        }

        async fn delete_record(&self, record_id: &str) -> Result<(), ClientError> {
            self.deleted
                .lock()
                .expect("deleted lock")
                .push(record_id.to_string());
            Ok(())
        }
    }

    fn tracker(statuses: Vec<(&str, &str)>) -> ResumeTracker {
        ResumeTracker::with_statuses(
            "vademecum.nacr.cz",
            statuses
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn unknown_items_proceed() {
        let tracker = tracker(vec![]);
        assert_eq!(tracker.should_skip("X"), None);
        assert!(!tracker.is_interrupted("X"));
    }

    #[test]
    fn finished_items_skip() {
        let tracker = tracker(vec![("X", "ocr_pending"), ("Y", "done")]);
        assert_eq!(tracker.should_skip("X"), Some("ocr_pending"));
        assert_eq!(tracker.should_skip("Y"), Some("done"));
    }

    #[test]
    fn interrupted_items_do_not_skip() {
        let tracker = tracker(vec![("X", STATUS_INGESTING)]);
        assert_eq!(tracker.should_skip("X"), None);
        assert!(tracker.is_interrupted("X"));
    }

    #[tokio::test]
    async fn reclaim_deletes_the_whole_record() {
        let store = FakeStore::new(vec![("X", "rec-9", STATUS_INGESTING)]);
        let mut tracker = tracker(vec![("X", STATUS_INGESTING)]);

        let deleted = tracker.reclaim(&store, "X").await.expect("reclaim");

        assert_eq!(deleted.as_deref(), Some("rec-9"));
        assert_eq!(store.deleted(), vec!["rec-9"]);
        // The fresh attempt must not be skipped.
        assert_eq!(tracker.should_skip("X"), None);
        assert!(!tracker.is_interrupted("X"));
    }

    #[tokio::test]
    async fn reclaim_is_a_noop_for_clean_items() {
        let store = FakeStore::new(vec![("X", "rec-1", "done")]);
        let mut tracker = tracker(vec![("X", "done")]);

        let deleted = tracker.reclaim(&store, "X").await.expect("reclaim");

        assert_eq!(deleted, None);
        assert!(store.deleted().is_empty());
        assert_eq!(tracker.should_skip("X"), Some("done"));
    }

    #[tokio::test]
    async fn reclaim_tolerates_vanished_records() {
        let store = FakeStore::new(vec![]);
        let mut tracker = tracker(vec![("X", STATUS_INGESTING)]);

        let deleted = tracker.reclaim(&store, "X").await.expect("reclaim");

        assert_eq!(deleted, None);
        assert!(store.deleted().is_empty());
        assert_eq!(tracker.should_skip("X"), None);
    }

    #[test]
    fn mark_done_updates_the_session_cache() {
        let mut tracker = tracker(vec![]);
        assert_eq!(tracker.should_skip("X"), None);
        tracker.mark_done("X", "ocr_pending");
        assert_eq!(tracker.should_skip("X"), Some("ocr_pending"));
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test]
    async fn load_counts_interrupted_records() {
        let store = FakeStore::new(vec![
            ("A", "rec-1", "done"),
            ("B", "rec-2", STATUS_INGESTING),
        ]);
        let tracker = ResumeTracker::load(&store, "vademecum.nacr.cz")
            .await
            .expect("load");
        assert_eq!(tracker.len(), 2);
        assert!(tracker.is_interrupted("B"));
        assert_eq!(tracker.should_skip("A"), Some("done"));
    }
}
