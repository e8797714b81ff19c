//! Consumer loop: one task per worker, messages handled strictly in
//! delivery order within the worker.
//!
//! Shutdown is only observed between messages; a document in flight is
//! always driven to completion first.
//!
//! Each worker owns one consumer in the group, so partitions beyond
//! `consumer.workers` share a task and are processed one after another.
//!
//! The offset is stored once the pipeline settles a message. When the claim
//! could not even be recorded, the worker rewinds to the same offset and
//! tries again after a pause, since the document is still `uploaded` and
//! nothing else would pick it up.

use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::{Message, Offset};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::pipeline::{Outcome, Pipeline};

/// Pause after a broker-level receive error before polling again.
const RECV_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Pause before redelivering a message whose claim could not be recorded.
const CLAIM_RETRY_BACKOFF: Duration = Duration::from_secs(5);

const SEEK_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run_worker(
    worker: usize,
    consumer: StreamConsumer,
    pipeline: Arc<Pipeline>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(worker, "consumer worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let received = tokio::select! {
            _ = shutdown.changed() => break,
            received = consumer.recv() => received.map(|msg| {
                (
                    msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                    msg.topic().to_string(),
                    msg.partition(),
                    msg.offset(),
                )
            }),
        };

        let (payload, topic, partition, offset) = match received {
            Ok(parts) => parts,
            Err(e) => {
                tracing::warn!(worker, error = %e, "kafka receive error");
                tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                continue;
            }
        };

        let outcome = pipeline.handle_payload(&payload).await;
        match &outcome {
            Outcome::Ready { chunks, attempts } => {
                tracing::debug!(worker, partition, offset, chunks, attempts, "message done")
            }
            Outcome::DeadLettered(record) => tracing::debug!(
                worker,
                partition,
                offset,
                document_id = %record.event.document_id,
                "message dead-lettered"
            ),
            other => tracing::debug!(worker, partition, offset, outcome = ?other, "message done"),
        }

        if !outcome.settles_message() {
            tracing::warn!(worker, partition, offset, "claim not recorded, redelivering message");
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(CLAIM_RETRY_BACKOFF) => {}
            }
            if let Err(e) = consumer.seek(&topic, partition, Offset::Offset(offset), SEEK_TIMEOUT) {
                tracing::error!(worker, partition, offset, error = %e, "failed to rewind partition");
            }
            continue;
        }

        if let Err(e) = consumer.store_offset(&topic, partition, offset + 1) {
            tracing::warn!(worker, partition, offset, error = %e, "failed to store offset");
        }
    }

    tracing::info!(worker, "consumer worker stopped");
}
