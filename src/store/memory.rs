//! In-memory [`DocumentStore`] used by tests.
//!
//! One mutex guards documents and chunks together, which makes
//! `persist_chunks` atomic the same way a database transaction is.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Claim, DocumentStore};
use crate::error::{ErrorKind, IngestError, Origin, Result};
use crate::models::{DocumentStatus, EmbeddedChunk, UploadEvent};

/// Snapshot of a stored document row.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub id: String,
    pub tenant_id: String,
    pub storage_key: String,
    pub file_name: String,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub claim_token: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub tenant_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
}

#[derive(Default)]
struct State {
    docs: HashMap<String, DocumentRecord>,
    chunks: BTreeMap<(String, i32), ChunkRecord>,
    persist_failures: u32,
    claim_failures: u32,
}

impl State {
    fn is_current(&self, claim: &Claim) -> bool {
        self.docs
            .get(&claim.document_id)
            .map(|d| d.status == DocumentStatus::Processing && d.claim_token == Some(claim.token))
            .unwrap_or(false)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document in `uploaded` state, mirroring what the upload
    /// service does before publishing the event.
    pub fn insert_document(&self, event: &UploadEvent) {
        let mut state = self.state.lock().unwrap();
        state.docs.insert(
            event.document_id.clone(),
            DocumentRecord {
                id: event.document_id.clone(),
                tenant_id: event.tenant_id.clone(),
                storage_key: event.storage_key.clone(),
                file_name: event.file_name.clone(),
                status: DocumentStatus::Uploaded,
                error_message: None,
                processing_started_at: None,
                claim_token: None,
            },
        );
    }

    pub fn document(&self, id: &str) -> Option<DocumentRecord> {
        self.state.lock().unwrap().docs.get(id).cloned()
    }

    /// Chunks of a document ordered by index.
    pub fn chunks_for(&self, id: &str) -> Vec<(i32, ChunkRecord)> {
        self.state
            .lock()
            .unwrap()
            .chunks
            .iter()
            .filter(|((doc, _), _)| doc == id)
            .map(|((_, idx), chunk)| (*idx, chunk.clone()))
            .collect()
    }

    /// Make the next `n` calls to `persist_chunks` fail with a transient
    /// database error before touching any state.
    pub fn inject_persist_failures(&self, n: u32) {
        self.state.lock().unwrap().persist_failures = n;
    }

    /// Make the next `n` calls to `claim` fail with a transient database
    /// error.
    pub fn inject_claim_failures(&self, n: u32) {
        self.state.lock().unwrap().claim_failures = n;
    }

    /// Backdate a claim so the reaper treats it as expired.
    pub fn set_processing_started_at(&self, id: &str, at: DateTime<Utc>) {
        if let Some(doc) = self.state.lock().unwrap().docs.get_mut(id) {
            doc.processing_started_at = Some(at);
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn claim(&self, document_id: &str) -> Result<Option<Claim>> {
        let mut state = self.state.lock().unwrap();
        if state.claim_failures > 0 {
            state.claim_failures -= 1;
            return Err(IngestError::transient(
                Origin::Database,
                "connection refused while claiming document",
            ));
        }
        match state.docs.get_mut(document_id) {
            Some(doc) if doc.status == DocumentStatus::Uploaded => {
                let claim = Claim::new(document_id);
                doc.status = DocumentStatus::Processing;
                doc.processing_started_at = Some(Utc::now());
                doc.claim_token = Some(claim.token);
                doc.error_message = None;
                Ok(Some(claim))
            }
            _ => Ok(None),
        }
    }

    async fn holds(&self, claim: &Claim) -> Result<bool> {
        Ok(self.state.lock().unwrap().is_current(claim))
    }

    async fn persist_chunks(
        &self,
        claim: &Claim,
        tenant_id: &str,
        chunks: &[EmbeddedChunk],
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        if state.persist_failures > 0 {
            state.persist_failures -= 1;
            return Err(IngestError::transient(
                Origin::Database,
                "connection reset while persisting chunks",
            ));
        }

        if !state.is_current(claim) {
            return Err(IngestError::new(
                ErrorKind::Conflict,
                Origin::Database,
                format!("claim on document {} is no longer held", claim.document_id),
            ));
        }

        let document_id = claim.document_id.as_str();
        for chunk in chunks {
            state.chunks.insert(
                (document_id.to_string(), chunk.chunk_index),
                ChunkRecord {
                    tenant_id: tenant_id.to_string(),
                    content: chunk.content.clone(),
                    embedding: chunk.embedding.clone(),
                },
            );
        }
        let keep = chunks.len() as i32;
        state
            .chunks
            .retain(|(doc, idx), _| doc != document_id || *idx < keep);

        if let Some(doc) = state.docs.get_mut(document_id) {
            doc.status = DocumentStatus::Ready;
            doc.error_message = None;
        }
        Ok(())
    }

    async fn mark_failed(&self, claim: &Claim, message: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        if !state.is_current(claim) {
            return Ok(false);
        }
        if let Some(doc) = state.docs.get_mut(&claim.document_id) {
            doc.status = DocumentStatus::Failed;
            doc.error_message = Some(message.to_string());
        }
        Ok(true)
    }

    async fn reap_stale(&self, lease: Duration) -> Result<Vec<UploadEvent>> {
        let lease =
            chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::days(365_000));
        let cutoff = Utc::now() - lease;
        let mut state = self.state.lock().unwrap();
        let mut reclaimed = Vec::new();

        for doc in state.docs.values_mut() {
            let expired = doc.status == DocumentStatus::Processing
                && doc.processing_started_at.map(|t| t < cutoff).unwrap_or(true);
            if expired {
                doc.status = DocumentStatus::Uploaded;
                doc.processing_started_at = None;
                doc.claim_token = None;
                reclaimed.push(UploadEvent {
                    event_id: String::new(),
                    document_id: doc.id.clone(),
                    tenant_id: doc.tenant_id.clone(),
                    storage_key: doc.storage_key.clone(),
                    file_name: doc.file_name.clone(),
                });
            }
        }
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str) -> UploadEvent {
        UploadEvent {
            event_id: "evt".into(),
            document_id: id.into(),
            tenant_id: "tenant-a".into(),
            storage_key: format!("uploads/{}.txt", id),
            file_name: format!("{}.txt", id),
        }
    }

    fn chunk(i: i32, text: &str) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk_index: i,
            content: text.into(),
            embedding: vec![i as f32],
        }
    }

    #[tokio::test]
    async fn claim_only_succeeds_once() {
        let store = MemoryStore::new();
        store.insert_document(&event("d1"));
        let claim = store.claim("d1").await.unwrap().unwrap();
        assert_eq!(claim.document_id, "d1");
        assert!(store.claim("d1").await.unwrap().is_none());
        assert!(store.claim("missing").await.unwrap().is_none());
        assert!(store.holds(&claim).await.unwrap());
    }

    #[tokio::test]
    async fn persist_replaces_and_trims_chunks() {
        let store = MemoryStore::new();
        store.insert_document(&event("d1"));
        let claim = store.claim("d1").await.unwrap().unwrap();
        store
            .persist_chunks(&claim, "tenant-a", &[chunk(0, "a"), chunk(1, "b"), chunk(2, "c")])
            .await
            .unwrap();

        // Simulate a later re-run producing fewer chunks.
        store.state.lock().unwrap().docs.get_mut("d1").unwrap().status =
            DocumentStatus::Uploaded;
        let rerun = store.claim("d1").await.unwrap().unwrap();
        store
            .persist_chunks(&rerun, "tenant-a", &[chunk(0, "x"), chunk(1, "y")])
            .await
            .unwrap();

        let chunks = store.chunks_for("d1");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].1.content, "x");
        assert_eq!(store.document("d1").unwrap().status, DocumentStatus::Ready);
    }

    #[tokio::test]
    async fn persist_without_claim_is_a_conflict() {
        let store = MemoryStore::new();
        store.insert_document(&event("d1"));
        let err = store
            .persist_chunks(&Claim::new("d1"), "tenant-a", &[chunk(0, "a")])
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert!(store.chunks_for("d1").is_empty());
    }

    #[tokio::test]
    async fn mark_failed_ignores_terminal_documents() {
        let store = MemoryStore::new();
        store.insert_document(&event("d1"));
        let claim = store.claim("d1").await.unwrap().unwrap();
        store.persist_chunks(&claim, "t", &[chunk(0, "a")]).await.unwrap();
        assert!(!store.mark_failed(&claim, "late failure").await.unwrap());
        let doc = store.document("d1").unwrap();
        assert_eq!(doc.status, DocumentStatus::Ready);
        assert!(doc.error_message.is_none());
    }

    #[tokio::test]
    async fn reaped_claim_cannot_write_over_new_holder() {
        let store = MemoryStore::new();
        store.insert_document(&event("d1"));
        let stale = store.claim("d1").await.unwrap().unwrap();
        store.set_processing_started_at("d1", Utc::now() - chrono::Duration::hours(2));
        assert_eq!(store.reap_stale(Duration::from_secs(3600)).await.unwrap().len(), 1);
        let current = store.claim("d1").await.unwrap().unwrap();
        assert_ne!(stale.token, current.token);

        assert!(!store.holds(&stale).await.unwrap());
        assert!(!store.mark_failed(&stale, "late timeout").await.unwrap());
        let err = store
            .persist_chunks(&stale, "tenant-a", &[chunk(0, "old")])
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);

        let doc = store.document("d1").unwrap();
        assert_eq!(doc.status, DocumentStatus::Processing);
        assert!(doc.error_message.is_none());
        assert!(store.chunks_for("d1").is_empty());

        store
            .persist_chunks(&current, "tenant-a", &[chunk(0, "new")])
            .await
            .unwrap();
        assert_eq!(store.document("d1").unwrap().status, DocumentStatus::Ready);
        assert_eq!(store.chunks_for("d1")[0].1.content, "new");
    }

    #[tokio::test]
    async fn reap_returns_only_expired_claims() {
        let store = MemoryStore::new();
        store.insert_document(&event("old"));
        store.insert_document(&event("fresh"));
        store.claim("old").await.unwrap();
        store.claim("fresh").await.unwrap();
        store.set_processing_started_at("old", Utc::now() - chrono::Duration::hours(2));

        let reclaimed = store.reap_stale(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].document_id, "old");
        assert_eq!(reclaimed[0].storage_key, "uploads/old.txt");
        let old = store.document("old").unwrap();
        assert_eq!(old.status, DocumentStatus::Uploaded);
        assert!(old.claim_token.is_none());
        assert_eq!(store.document("fresh").unwrap().status, DocumentStatus::Processing);
    }
}
