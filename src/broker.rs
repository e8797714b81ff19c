//! Outbound event seam.
//!
//! The pipeline only ever produces two kinds of messages: dead-letter
//! records and re-published upload events (from the reaper). Both go
//! through [`EventPublisher`] so the worker can be driven without a broker
//! in tests. The Kafka implementation lives in [`crate::kafka`].

use async_trait::async_trait;

use crate::dead_letter::DeadLetterRecord;
use crate::error::Result;
use crate::models::UploadEvent;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Append a record to the dead-letter topic.
    async fn publish_dead_letter(&self, record: &DeadLetterRecord) -> Result<()>;

    /// Put an upload event back on the intake topic.
    async fn republish(&self, event: &UploadEvent) -> Result<()>;
}
