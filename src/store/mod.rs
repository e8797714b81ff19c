//! Document persistence.
//!
//! The [`DocumentStore`] trait covers every state transition the pipeline
//! performs on a document row, so the worker can run against Postgres in
//! production and against [`MemoryStore`](memory::MemoryStore) in tests.
//!
//! # Operations
//!
//! | Method | Transition |
//! |--------|------------|
//! | [`claim`](DocumentStore::claim) | `uploaded → processing` (conditional), issues a [`Claim`] |
//! | [`holds`](DocumentStore::holds) | none; checks the claim is still current |
//! | [`persist_chunks`](DocumentStore::persist_chunks) | write chunks, `processing → ready`, atomically |
//! | [`mark_failed`](DocumentStore::mark_failed) | `processing → failed` with a message |
//! | [`reap_stale`](DocumentStore::reap_stale) | expired `processing → uploaded`, revokes the claim |
//!
//! Every write after the claim is fenced by the claim token: once the
//! reaper has reset a document and another worker has claimed it, writes
//! from the previous holder match no row.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{EmbeddedChunk, UploadEvent};

/// Lease on a document held by the worker that claimed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub document_id: String,
    pub token: Uuid,
}

impl Claim {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            token: Uuid::new_v4(),
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Move the document from `uploaded` to `processing`.
    ///
    /// Returns `None` when no row matched, i.e. the document does not
    /// exist or another delivery already claimed it.
    async fn claim(&self, document_id: &str) -> Result<Option<Claim>>;

    /// Whether `claim` is still the live claim on its document.
    async fn holds(&self, claim: &Claim) -> Result<bool>;

    /// Upsert all chunks keyed by `(document_id, chunk_index)`, delete any
    /// chunk rows with a higher index, and mark the document `ready`, as a
    /// single transaction.
    ///
    /// Fails with [`ErrorKind::Conflict`](crate::error::ErrorKind::Conflict)
    /// when `claim` is no longer current; nothing is written then.
    async fn persist_chunks(
        &self,
        claim: &Claim,
        tenant_id: &str,
        chunks: &[EmbeddedChunk],
    ) -> Result<()>;

    /// Set status `failed` and record `message`. Returns `false` without
    /// touching the row when `claim` is no longer current.
    async fn mark_failed(&self, claim: &Claim, message: &str) -> Result<bool>;

    /// Return documents stuck in `processing` longer than `lease` to
    /// `uploaded`, yielding an event for each so it can be redelivered.
    async fn reap_stale(&self, lease: Duration) -> Result<Vec<UploadEvent>>;
}
