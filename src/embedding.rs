//! Embedding gateway.
//!
//! Defines the [`Embedder`] trait and [`HttpEmbedder`], which calls the
//! model service's `POST /embeddings` endpoint once per chunk:
//!
//! ```text
//! POST {base_url}/embeddings   {"text": "..."}   →   {"embedding": [0.1, ...]}
//! ```
//!
//! # Error mapping
//!
//! | Failure | [`ErrorKind`] |
//! |---------|---------------|
//! | request exceeded `timeout_secs` | `Timeout` |
//! | HTTP 429 | `Transient` |
//! | other HTTP 4xx (validation) | `UpstreamClientError` |
//! | HTTP 5xx, unreadable body, empty vector | `UpstreamServerError` |
//! | connection errors | `Transient` |
//!
//! The gateway never retries on its own; the retry controller owns that
//! decision for the whole attempt.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{ErrorKind, IngestError, Origin};

/// Maps one piece of text to an embedding vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> crate::error::Result<Vec<f32>>;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// [`Embedder`] backed by the external embedding endpoint.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: Option<String>,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build embedding HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> crate::error::Result<Vec<f32>> {
        let body = EmbeddingRequest {
            text,
            model: self.model.as_deref(),
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            let kind = if status.as_u16() == 429 {
                ErrorKind::Transient
            } else if status.is_client_error() {
                ErrorKind::UpstreamClientError
            } else {
                ErrorKind::UpstreamServerError
            };
            return Err(IngestError::new(
                kind,
                Origin::Embedding,
                format!(
                    "embedding request failed (HTTP {}): {}",
                    status.as_u16(),
                    body_text.chars().take(500).collect::<String>()
                ),
            )
            .with_status(status.as_u16()));
        }

        let parsed: EmbeddingResponse = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                transport_error(e)
            } else {
                IngestError::new(
                    ErrorKind::UpstreamServerError,
                    Origin::Embedding,
                    format!("invalid embedding response: {}", e),
                )
            }
        })?;

        if parsed.embedding.is_empty() {
            return Err(IngestError::new(
                ErrorKind::UpstreamServerError,
                Origin::Embedding,
                "embedding response contained an empty vector",
            ));
        }

        Ok(parsed.embedding)
    }
}

fn transport_error(err: reqwest::Error) -> IngestError {
    if err.is_timeout() {
        IngestError::new(
            ErrorKind::Timeout,
            Origin::Embedding,
            format!("embedding request timed out: {}", err),
        )
    } else {
        IngestError::transient(Origin::Embedding, format!("embedding request failed: {}", err))
    }
}

/// Embed every chunk, keeping output order aligned with `chunks`.
///
/// At most `concurrency` requests are in flight. The first failure aborts
/// the rest and is returned; no partial result is produced.
pub async fn embed_chunks(
    embedder: &dyn Embedder,
    chunks: &[String],
    concurrency: usize,
) -> crate::error::Result<Vec<Vec<f32>>> {
    // A closure left in the stream type makes the caller's future non-`Send`.
    let calls: Vec<_> = chunks.iter().map(|chunk| embedder.embed(chunk)).collect();
    stream::iter(calls)
        .buffered(concurrency.max(1))
        .try_collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        calls: AtomicUsize,
        fail_at: Option<usize>,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, text: &str) -> crate::error::Result<Vec<f32>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(n) == self.fail_at {
                return Err(IngestError::new(ErrorKind::Timeout, Origin::Embedding, "slow"));
            }
            Ok(vec![text.len() as f32, n as f32])
        }
    }

    fn chunks(n: usize) -> Vec<String> {
        (0..n).map(|i| "x".repeat(i + 1)).collect()
    }

    #[tokio::test]
    async fn embeddings_follow_chunk_order() {
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
            fail_at: None,
        };
        let vectors = embed_chunks(&embedder, &chunks(4), 3).await.unwrap();
        let lengths: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(lengths, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[tokio::test]
    async fn sequential_failure_stops_remaining_calls() {
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
            fail_at: Some(1),
        };
        let err = embed_chunks(&embedder, &chunks(5), 1).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn no_chunks_no_calls() {
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
            fail_at: None,
        };
        let vectors = embed_chunks(&embedder, &[], 1).await.unwrap();
        assert!(vectors.is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn endpoint_is_joined_without_double_slash() {
        let config = EmbeddingConfig {
            base_url: "http://ai-service:4000/".to_string(),
            ..EmbeddingConfig::default()
        };
        let embedder = HttpEmbedder::new(&config).unwrap();
        assert_eq!(embedder.endpoint, "http://ai-service:4000/embeddings");
    }
}
