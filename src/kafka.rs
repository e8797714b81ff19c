//! Kafka transport.
//!
//! Consumers join one group and never auto-store offsets: the worker stores
//! a message's offset only after the pipeline is done with it, and the
//! periodic auto-commit picks it up from there. A crash mid-document
//! therefore redelivers the event, and the claim turns the duplicate away.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;

use crate::broker::EventPublisher;
use crate::config::BrokerConfig;
use crate::dead_letter::DeadLetterRecord;
use crate::error::{IngestError, Origin};
use crate::models::UploadEvent;

/// Build a consumer for worker `worker`, subscribed to the upload topic.
pub fn create_consumer(config: &BrokerConfig, worker: usize) -> Result<StreamConsumer> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &config.brokers)
        .set("group.id", &config.group_id)
        .set("client.id", format!("{}-{}", config.client_id, worker))
        .set("enable.auto.commit", "true")
        .set("enable.auto.offset.store", "false")
        .set("auto.offset.reset", "earliest")
        .set("max.poll.interval.ms", config.max_poll_interval_ms.to_string())
        .create()
        .context("failed to create Kafka consumer")?;

    consumer
        .subscribe(&[config.topic.as_str()])
        .with_context(|| format!("failed to subscribe to topic '{}'", config.topic))?;

    Ok(consumer)
}

/// [`EventPublisher`] over a shared Kafka producer. Messages are keyed by
/// document id so every event for a document lands on one partition.
pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
    dlq_topic: String,
    timeout: Duration,
}

impl KafkaPublisher {
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", format!("{}-producer", config.client_id))
            .set(
                "message.timeout.ms",
                (config.publish_timeout_secs * 1000).to_string(),
            )
            .create()
            .context("failed to create Kafka producer")?;

        Ok(Self {
            producer,
            topic: config.topic.clone(),
            dlq_topic: config.dlq_topic.clone(),
            timeout: Duration::from_secs(config.publish_timeout_secs),
        })
    }

    async fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> crate::error::Result<()> {
        let record = FutureRecord::to(topic).key(key).payload(&payload);
        self.producer
            .send(record, Timeout::After(self.timeout))
            .await
            .map_err(|(err, _)| {
                IngestError::transient(
                    Origin::Broker,
                    format!("failed to publish to '{}': {}", topic, err),
                )
            })?;
        Ok(())
    }
}

fn encode<T: serde::Serialize>(value: &T) -> crate::error::Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        IngestError::unprocessable(Origin::Broker, format!("failed to encode message: {}", e))
    })
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish_dead_letter(&self, record: &DeadLetterRecord) -> crate::error::Result<()> {
        let payload = encode(record)?;
        self.send(&self.dlq_topic, &record.event.document_id, payload)
            .await
    }

    async fn republish(&self, event: &UploadEvent) -> crate::error::Result<()> {
        let payload = encode(event)?;
        self.send(&self.topic, &event.document_id, payload).await
    }
}
