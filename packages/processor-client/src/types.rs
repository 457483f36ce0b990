//! Wire types for the processor and ingest APIs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ClientError, Result};

/// A claimed unit of backend-queued work.
///
/// `id` is assigned by the backend and opaque to workers. `page_id` and
/// `record_id` are present for the kinds that target a single page or record;
/// `payload` carries kind-specific extras and may arrive either as a JSON
/// object or as a JSON-encoded string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: i64,
    pub kind: String,
    #[serde(default)]
    pub page_id: Option<i64>,
    #[serde(default)]
    pub record_id: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl Job {
    /// Decode this job into its typed task, once, at the boundary.
    ///
    /// Handler code should match on [`JobTask`] rather than poking at raw
    /// payload fields. Unknown kinds decode to [`JobTask::Unknown`] so a
    /// worker tracking several kinds can still report them cleanly.
    pub fn task(&self) -> Result<JobTask> {
        let task = match self.kind.as_str() {
            "ocr_page_paddle" => JobTask::OcrPage {
                page_id: self.require_page_id()?,
                lang: self.payload_lang(),
            },
            "translate_page" => JobTask::TranslatePage {
                page_id: self.require_page_id()?,
                lang: self.payload_lang(),
            },
            "translate_record" => JobTask::TranslateRecord {
                record_id: self.require_record_id()?,
            },
            "embed_record" => JobTask::EmbedRecord {
                record_id: self.require_record_id()?,
            },
            "build_searchable_pdf" => JobTask::BuildSearchablePdf {
                record_id: self.require_record_id()?,
            },
            other => JobTask::Unknown {
                kind: other.to_string(),
            },
        };
        Ok(task)
    }

    fn require_page_id(&self) -> Result<i64> {
        self.page_id.ok_or_else(|| {
            ClientError::Parse(format!("job {} ({}) is missing pageId", self.id, self.kind))
        })
    }

    fn require_record_id(&self) -> Result<String> {
        self.record_id.clone().ok_or_else(|| {
            ClientError::Parse(format!(
                "job {} ({}) is missing recordId",
                self.id, self.kind
            ))
        })
    }

    /// Payload object, decoding the backend's occasional JSON-in-a-string
    /// double encoding.
    pub fn payload_object(&self) -> Option<Value> {
        match &self.payload {
            Some(Value::String(raw)) => serde_json::from_str(raw).ok(),
            Some(value) => Some(value.clone()),
            None => None,
        }
    }

    fn payload_lang(&self) -> Option<String> {
        self.payload_object()
            .as_ref()
            .and_then(|p| p.get("lang"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Typed view of a job, one variant per pipeline kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTask {
    /// Run OCR over a single page image.
    OcrPage { page_id: i64, lang: Option<String> },
    /// Translate a single page's OCR text.
    TranslatePage { page_id: i64, lang: Option<String> },
    /// Translate record-level metadata.
    TranslateRecord { record_id: String },
    /// Compute embeddings for a record's text.
    EmbedRecord { record_id: String },
    /// Assemble the searchable PDF for a completed record.
    BuildSearchablePdf { record_id: String },
    /// A kind this client has no typed decoding for.
    Unknown { kind: String },
}

/// One message from the job events stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// New work may be available for `kind`.
    Job { kind: String },
    /// Anything else on the stream (heartbeats, future event types).
    Other { event: String },
}

/// Single-record status lookup result.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordStatusInfo {
    /// The authoritative backend record id.
    pub id: String,
    pub status: String,
}

/// Minimal record-creation request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecord {
    pub source_system: String,
    pub source_record_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_source_metadata: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_decodes_wire_format() {
        let job: Job = serde_json::from_str(
            r#"{"id": 42, "kind": "ocr_page_paddle", "pageId": 7, "recordId": "rec-1"}"#,
        )
        .expect("valid job json");
        assert_eq!(job.id, 42);
        assert_eq!(job.page_id, Some(7));
        assert_eq!(job.record_id.as_deref(), Some("rec-1"));
        assert!(job.payload.is_none());
    }

    #[test]
    fn ocr_task_pulls_lang_from_payload() {
        let job: Job = serde_json::from_str(
            r#"{"id": 1, "kind": "ocr_page_paddle", "pageId": 9, "payload": {"lang": "de"}}"#,
        )
        .expect("valid job json");
        assert_eq!(
            job.task().expect("task"),
            JobTask::OcrPage {
                page_id: 9,
                lang: Some("de".into())
            }
        );
    }

    #[test]
    fn string_encoded_payload_is_tolerated() {
        let job: Job = serde_json::from_str(
            r#"{"id": 1, "kind": "translate_page", "pageId": 3, "payload": "{\"lang\": \"cs\"}"}"#,
        )
        .expect("valid job json");
        assert_eq!(
            job.task().expect("task"),
            JobTask::TranslatePage {
                page_id: 3,
                lang: Some("cs".into())
            }
        );
    }

    #[test]
    fn record_kinds_require_record_id() {
        let job: Job =
            serde_json::from_str(r#"{"id": 5, "kind": "embed_record"}"#).expect("valid job json");
        assert!(matches!(job.task(), Err(ClientError::Parse(_))));
    }

    #[test]
    fn unknown_kind_stays_opaque() {
        let job: Job = serde_json::from_str(r#"{"id": 5, "kind": "reindex_all"}"#)
            .expect("valid job json");
        assert_eq!(
            job.task().expect("task"),
            JobTask::Unknown {
                kind: "reindex_all".into()
            }
        );
    }
}
