//! Dead-letter escalation.
//!
//! A terminally failed document produces exactly one [`DeadLetterRecord`]:
//! the original event with an `error` object appended. The record is
//! published first, then the document is marked `failed`. Publishing is
//! fire-and-forget; the `failed` status is authoritative even when the
//! record is lost.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broker::EventPublisher;
use crate::error::IngestError;
use crate::models::UploadEvent;
use crate::store::{Claim, DocumentStore};

/// Record published to the dead-letter topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    #[serde(flatten)]
    pub event: UploadEvent,
    pub error: DeadLetterError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterError {
    pub message: String,
    pub code: String,
    pub status_code: Option<u16>,
    pub attempts: u32,
    pub retryable: bool,
    pub timestamp: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(event: &UploadEvent, error: &IngestError, attempts: u32, retryable: bool) -> Self {
        Self {
            event: event.clone(),
            error: DeadLetterError {
                message: error.message.clone(),
                code: error.code_label(),
                status_code: error.status,
                attempts,
                retryable,
                timestamp: Utc::now(),
            },
        }
    }
}

/// Publish the dead-letter record, then mark the document failed.
///
/// Neither step's failure stops the other; both are logged and the record
/// is returned either way. The status write is fenced by `claim`.
pub async fn escalate(
    publisher: &dyn EventPublisher,
    store: &dyn DocumentStore,
    claim: &Claim,
    event: &UploadEvent,
    error: &IngestError,
    attempts: u32,
    retryable: bool,
) -> DeadLetterRecord {
    let record = DeadLetterRecord::new(event, error, attempts, retryable);

    tracing::error!(
        document_id = %event.document_id,
        attempts,
        retryable,
        code = %record.error.code,
        error = %error,
        "sending document to dead-letter topic"
    );

    if let Err(e) = publisher.publish_dead_letter(&record).await {
        tracing::error!(
            document_id = %event.document_id,
            error = %e,
            "failed to publish dead-letter record"
        );
    }

    match store.mark_failed(claim, &error.message).await {
        Ok(true) => {}
        Ok(false) => tracing::warn!(
            document_id = %event.document_id,
            "claim was lost before the document could be marked failed"
        ),
        Err(e) => tracing::error!(
            document_id = %event.document_id,
            error = %e,
            "failed to mark document as failed"
        ),
    }

    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, Origin};

    #[test]
    fn record_keeps_event_fields_at_top_level() {
        let event = UploadEvent {
            event_id: "e-1".into(),
            document_id: "doc-1".into(),
            tenant_id: "t-1".into(),
            storage_key: "uploads/doc-1.pdf".into(),
            file_name: "doc-1.pdf".into(),
        };
        let err = IngestError::new(ErrorKind::NotFound, Origin::Storage, "object not found")
            .with_code("NoSuchKey")
            .with_status(404);
        let record = DeadLetterRecord::new(&event, &err, 0, false);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["documentId"], "doc-1");
        assert_eq!(json["storageKey"], "uploads/doc-1.pdf");
        assert_eq!(json["error"]["code"], "NoSuchKey");
        assert_eq!(json["error"]["statusCode"], 404);
        assert_eq!(json["error"]["attempts"], 0);
        assert_eq!(json["error"]["retryable"], false);
        assert!(json["error"]["timestamp"].is_string());
    }

    #[test]
    fn missing_status_serializes_as_null() {
        let event = UploadEvent {
            event_id: String::new(),
            document_id: "doc-2".into(),
            tenant_id: String::new(),
            storage_key: "k".into(),
            file_name: String::new(),
        };
        let err = IngestError::new(ErrorKind::Timeout, Origin::Embedding, "timed out");
        let json = serde_json::to_value(DeadLetterRecord::new(&event, &err, 3, true)).unwrap();
        assert!(json["error"]["statusCode"].is_null());
        assert_eq!(json["error"]["code"], "Timeout");
    }
}
