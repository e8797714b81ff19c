//! Per-event processing: claim, verify, then retry
//! fetch → extract → chunk → embed → persist until done.
//!
//! # Flow
//!
//! ```text
//! payload ──parse──▶ UploadEvent ──claim──▶ verify_exists ──▶ run_with_retries(attempt)
//!    │                   │                      │                     │
//!    ▼                   ▼                      ▼                     ▼
//! Malformed           Skipped          dead letter (attempts 0)   Ready | dead letter
//! ```
//!
//! Each attempt is all-or-nothing: nothing is written until every chunk
//! has an embedding, and the write itself is one transaction. Every write
//! carries the [`Claim`] taken at the start, so a worker whose claim was
//! reaped and handed to another worker stops without touching the row.

use std::sync::Arc;

use crate::broker::EventPublisher;
use crate::chunk::Chunker;
use crate::dead_letter::{escalate, DeadLetterRecord};
use crate::embedding::{embed_chunks, Embedder};
use crate::error::{classify, ErrorKind, IngestError, Origin};
use crate::extract::{content_type_for, extract_text, ExtractError};
use crate::models::{EmbeddedChunk, UploadEvent};
use crate::retry::{run_with_retries, RetryPolicy};
use crate::storage::ObjectStore;
use crate::store::{Claim, DocumentStore};

/// What happened to one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Unparseable payload or missing identifiers; dropped.
    Malformed,
    /// Another delivery or worker owns the document.
    Skipped,
    /// Chunks persisted and the document is `ready`.
    Ready { chunks: usize, attempts: u32 },
    /// Terminal failure, escalated to the dead-letter topic.
    DeadLettered(DeadLetterRecord),
    /// The claim itself could not be executed; the message must be
    /// redelivered.
    ClaimFailed,
    /// The claim was reaped and taken over mid-run; nothing was written.
    LeaseLost,
}

impl Outcome {
    /// Whether the consumer may move past the message that produced this
    /// outcome.
    pub fn settles_message(&self) -> bool {
        !matches!(self, Outcome::ClaimFailed)
    }
}

pub struct Pipeline {
    objects: Arc<dyn ObjectStore>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn DocumentStore>,
    publisher: Arc<dyn EventPublisher>,
    chunker: Chunker,
    retry: RetryPolicy,
    embed_concurrency: usize,
}

impl Pipeline {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn DocumentStore>,
        publisher: Arc<dyn EventPublisher>,
        chunker: Chunker,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            objects,
            embedder,
            store,
            publisher,
            chunker,
            retry,
            embed_concurrency: 1,
        }
    }

    /// Allow up to `n` embedding requests in flight per document.
    pub fn with_embed_concurrency(mut self, n: usize) -> Self {
        self.embed_concurrency = n.max(1);
        self
    }

    /// Entry point for raw broker payloads.
    pub async fn handle_payload(&self, payload: &[u8]) -> Outcome {
        match parse_event(payload) {
            Some(event) => self.handle_event(&event).await,
            None => {
                tracing::warn!(
                    payload = %String::from_utf8_lossy(payload).chars().take(200).collect::<String>(),
                    "dropping malformed upload event"
                );
                Outcome::Malformed
            }
        }
    }

    pub async fn handle_event(&self, event: &UploadEvent) -> Outcome {
        let document_id = event.document_id.as_str();
        tracing::info!(document_id, storage_key = %event.storage_key, "received upload event");

        let claimed = run_with_retries(&self.retry, |_| self.store.claim(document_id)).await;
        let claim = match claimed {
            Ok((Some(claim), _)) => claim,
            Ok((None, _)) => {
                tracing::info!(document_id, "document already claimed or not uploaded, skipping");
                return Outcome::Skipped;
            }
            Err(failure) => {
                tracing::error!(document_id, error = %failure.error, "failed to claim document");
                return Outcome::ClaimFailed;
            }
        };

        self.process(event, &claim).await
    }

    async fn process(&self, event: &UploadEvent, claim: &Claim) -> Outcome {
        let document_id = event.document_id.as_str();

        if let Err(err) = self.objects.verify_exists(&event.storage_key).await {
            if !classify(&err).is_retryable() {
                return self.dead_letter(claim, event, &err, 0, false).await;
            }
            // A flaky HEAD is not proof of absence; let fetch decide.
            tracing::warn!(document_id, error = %err, "existence check failed, continuing");
        }

        let result = run_with_retries(&self.retry, |attempt| {
            tracing::info!(document_id, attempt, "processing document");
            self.run_attempt(event, claim)
        })
        .await;

        match result {
            Ok((chunks, attempts)) => {
                tracing::info!(document_id, chunks, attempts, "document ready");
                Outcome::Ready { chunks, attempts }
            }
            Err(failure) if failure.error.kind == ErrorKind::Conflict => {
                tracing::warn!(document_id, error = %failure.error, "claim lost, abandoning document");
                Outcome::LeaseLost
            }
            Err(failure) => {
                self.dead_letter(
                    claim,
                    event,
                    &failure.error,
                    failure.attempts,
                    failure.classification.is_retryable(),
                )
                .await
            }
        }
    }

    /// Escalate a terminal failure, unless the claim has meanwhile passed
    /// to another worker.
    async fn dead_letter(
        &self,
        claim: &Claim,
        event: &UploadEvent,
        err: &IngestError,
        attempts: u32,
        retryable: bool,
    ) -> Outcome {
        match self.store.holds(claim).await {
            Ok(false) => {
                tracing::warn!(
                    document_id = %event.document_id,
                    error = %err,
                    "claim lost before dead-lettering, abandoning document"
                );
                return Outcome::LeaseLost;
            }
            Ok(true) => {}
            // The fenced status write still guards the row.
            Err(e) => tracing::warn!(
                document_id = %event.document_id,
                error = %e,
                "could not confirm claim before dead-lettering"
            ),
        }

        let record = escalate(
            self.publisher.as_ref(),
            self.store.as_ref(),
            claim,
            event,
            err,
            attempts,
            retryable,
        )
        .await;
        Outcome::DeadLettered(record)
    }

    /// One full pass. Returns the number of chunks persisted.
    async fn run_attempt(
        &self,
        event: &UploadEvent,
        claim: &Claim,
    ) -> crate::error::Result<usize> {
        let bytes = self.objects.fetch(&event.storage_key).await?;

        let content_type = content_type_for(&event.file_name)
            .or_else(|| content_type_for(&event.storage_key))
            .ok_or_else(|| {
                IngestError::unprocessable(
                    Origin::Extraction,
                    format!("unsupported file type: {}", display_name(event)),
                )
            })?;

        let text = tokio::task::spawn_blocking(move || extract_text(&bytes, content_type))
            .await
            .map_err(|e| {
                IngestError::transient(Origin::Extraction, format!("extraction task failed: {}", e))
            })?
            .map_err(extraction_error)?;

        if text.trim().is_empty() {
            return Err(IngestError::unprocessable(
                Origin::Chunking,
                "document contains no extractable text",
            ));
        }

        let chunks = self.chunker.chunk(&text);
        tracing::debug!(
            document_id = %event.document_id,
            text_chars = text.chars().count(),
            chunks = chunks.len(),
            "chunked document"
        );

        let vectors = embed_chunks(self.embedder.as_ref(), &chunks, self.embed_concurrency).await?;

        let embedded: Vec<EmbeddedChunk> = chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (content, embedding))| EmbeddedChunk {
                chunk_index: i as i32,
                content,
                embedding,
            })
            .collect();

        self.store
            .persist_chunks(claim, &event.tenant_id, &embedded)
            .await?;

        Ok(embedded.len())
    }
}

/// Parse a payload, rejecting events without the identifiers needed to
/// claim and fetch the document.
pub fn parse_event(payload: &[u8]) -> Option<UploadEvent> {
    let event: UploadEvent = serde_json::from_slice(payload).ok()?;
    if event.document_id.trim().is_empty() || event.storage_key.trim().is_empty() {
        return None;
    }
    Some(event)
}

fn display_name(event: &UploadEvent) -> &str {
    if event.file_name.is_empty() {
        &event.storage_key
    } else {
        &event.file_name
    }
}

fn extraction_error(err: ExtractError) -> IngestError {
    IngestError::new(ErrorKind::Unprocessable, Origin::Extraction, err.to_string())
}
