//! Core data models used throughout the ingestion worker.
//!
//! These types represent the upload events, document rows and embedded
//! chunks that flow through the ingestion pipeline.

use serde::{Deserialize, Serialize};

/// Event announcing that a file has landed in object storage.
///
/// Produced once upstream and consumed at-least-once. Extra fields the
/// producer adds (`eventType`, `timestamp`) are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadEvent {
    #[serde(default)]
    pub event_id: String,
    pub document_id: String,
    #[serde(default)]
    pub tenant_id: String,
    pub storage_key: String,
    #[serde(default)]
    pub file_name: String,
}

/// Lifecycle of a document row as seen by this pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Ready,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chunk of extracted text together with its embedding, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedChunk {
    /// Position in the chunker's output; part of the `(document_id, chunk_index)` key.
    pub chunk_index: i32,
    pub content: String,
    pub embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_event_ignores_extra_producer_fields() {
        let json = r#"{
            "eventId": "e-1",
            "eventType": "document.uploaded",
            "documentId": "d-1",
            "tenantId": "t-1",
            "storageKey": "tenants/t-1/a.pdf",
            "fileName": "a.pdf",
            "timestamp": "2025-01-01T00:00:00.000Z"
        }"#;
        let event: UploadEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.document_id, "d-1");
        assert_eq!(event.storage_key, "tenants/t-1/a.pdf");
    }

    #[test]
    fn status_matches_column_values() {
        assert_eq!(DocumentStatus::Processing.to_string(), "processing");
        assert_eq!(
            serde_json::to_string(&DocumentStatus::Failed).unwrap(),
            "\"failed\""
        );
    }
}
