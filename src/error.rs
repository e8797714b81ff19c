//! Pipeline error type and the retryable/fatal classifier.
//!
//! Every gateway converts its failures into an [`IngestError`] at its own
//! boundary, tagging it with an [`ErrorKind`] and the [`Origin`] that raised
//! it. [`classify`] then decides retry versus abort from those tags alone,
//! without inspecting message text.

use serde::Serialize;
use thiserror::Error;

/// Result alias for pipeline components.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Closed set of failure kinds populated by the gateways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// The source object (or bucket) does not exist.
    NotFound,
    /// Credentials were rejected or lack permission.
    AccessDenied,
    /// The dependency did not answer within its deadline.
    Timeout,
    /// The dependency rejected the request as invalid (4xx other than 429).
    UpstreamClientError,
    /// The dependency failed on its side (5xx or a malformed response).
    UpstreamServerError,
    /// Network hiccups, throttling, database errors.
    Transient,
    /// The document itself cannot be turned into chunks.
    Unprocessable,
    /// The document claim was lost while the attempt was running.
    Conflict,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::AccessDenied => "AccessDenied",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::UpstreamClientError => "UpstreamClientError",
            ErrorKind::UpstreamServerError => "UpstreamServerError",
            ErrorKind::Transient => "Transient",
            ErrorKind::Unprocessable => "Unprocessable",
            ErrorKind::Conflict => "Conflict",
        }
    }
}

/// Component that raised the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Storage,
    Extraction,
    Chunking,
    Embedding,
    Database,
    Broker,
}

/// A failure raised anywhere in the ingestion pipeline.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct IngestError {
    pub kind: ErrorKind,
    pub origin: Origin,
    pub message: String,
    /// Provider error code, e.g. the S3 `<Code>` element (`NoSuchKey`).
    pub code: Option<String>,
    /// HTTP status returned by the dependency, when there was one.
    pub status: Option<u16>,
}

impl IngestError {
    pub fn new(kind: ErrorKind, origin: Origin, message: impl Into<String>) -> Self {
        Self {
            kind,
            origin,
            message: message.into(),
            code: None,
            status: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn unprocessable(origin: Origin, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unprocessable, origin, message)
    }

    pub fn transient(origin: Origin, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, origin, message)
    }

    /// Code reported in dead-letter records: the provider code when known,
    /// otherwise the error kind.
    pub fn code_label(&self) -> String {
        self.code
            .clone()
            .unwrap_or_else(|| self.kind.as_str().to_string())
    }
}

/// Outcome of [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Fatal,
    Retryable,
}

impl Classification {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Classification::Retryable)
    }
}

/// Storage provider codes that will never succeed on retry.
pub const FATAL_STORAGE_CODES: &[&str] = &[
    "NoSuchKey",
    "NotFound",
    "NoSuchBucket",
    "AccessDenied",
    "BadRequest",
    "InvalidRequest",
];

/// Decide whether a failed attempt may be retried.
///
/// Rules, first match wins:
/// 1. storage errors carrying a code in [`FATAL_STORAGE_CODES`] → fatal
/// 2. an HTTP status in `[400, 500)` other than `429` → fatal
/// 3. embedding errors: client validation failures are fatal, the rest retryable
/// 4. otherwise by kind: not-found, access-denied, client errors,
///    unprocessable content and lost claims are fatal; everything else retries
pub fn classify(err: &IngestError) -> Classification {
    if err.origin == Origin::Storage {
        if let Some(code) = err.code.as_deref() {
            if FATAL_STORAGE_CODES.contains(&code) {
                return Classification::Fatal;
            }
        }
    }

    if let Some(status) = err.status {
        if (400..500).contains(&status) && status != 429 {
            return Classification::Fatal;
        }
    }

    if err.origin == Origin::Embedding {
        return match err.kind {
            ErrorKind::UpstreamClientError => Classification::Fatal,
            _ => Classification::Retryable,
        };
    }

    match err.kind {
        ErrorKind::NotFound
        | ErrorKind::AccessDenied
        | ErrorKind::UpstreamClientError
        | ErrorKind::Unprocessable
        | ErrorKind::Conflict => Classification::Fatal,
        ErrorKind::Timeout
        | ErrorKind::UpstreamServerError
        | ErrorKind::Transient => Classification::Retryable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_not_found_is_fatal() {
        let err = IngestError::new(ErrorKind::NotFound, Origin::Storage, "missing")
            .with_code("NoSuchKey")
            .with_status(404);
        assert_eq!(classify(&err), Classification::Fatal);
    }

    #[test]
    fn storage_code_alone_is_enough() {
        let err = IngestError::transient(Origin::Storage, "odd").with_code("NoSuchBucket");
        assert_eq!(classify(&err), Classification::Fatal);
    }

    #[test]
    fn embedding_timeout_is_retryable() {
        let err = IngestError::new(ErrorKind::Timeout, Origin::Embedding, "timed out");
        assert_eq!(classify(&err), Classification::Retryable);
    }

    #[test]
    fn embedding_validation_failure_is_fatal() {
        let err = IngestError::new(
            ErrorKind::UpstreamClientError,
            Origin::Embedding,
            "embedding request rejected (HTTP 400)",
        )
        .with_status(400);
        assert_eq!(classify(&err), Classification::Fatal);
    }

    #[test]
    fn embedding_server_error_is_retryable() {
        let err = IngestError::new(ErrorKind::UpstreamServerError, Origin::Embedding, "boom")
            .with_status(503);
        assert_eq!(classify(&err), Classification::Retryable);
    }

    #[test]
    fn throttling_is_retryable() {
        let err = IngestError::transient(Origin::Storage, "slow down")
            .with_code("SlowDown")
            .with_status(429);
        assert_eq!(classify(&err), Classification::Retryable);
    }

    #[test]
    fn any_other_client_status_is_fatal() {
        let err = IngestError::transient(Origin::Broker, "gone").with_status(410);
        assert_eq!(classify(&err), Classification::Fatal);
    }

    #[test]
    fn default_is_retryable() {
        let err = IngestError::transient(Origin::Database, "connection reset");
        assert_eq!(classify(&err), Classification::Retryable);
    }

    #[test]
    fn unprocessable_and_conflict_are_fatal() {
        let empty = IngestError::unprocessable(Origin::Chunking, "no text");
        let lost = IngestError::new(ErrorKind::Conflict, Origin::Database, "claim lost");
        assert_eq!(classify(&empty), Classification::Fatal);
        assert_eq!(classify(&lost), Classification::Fatal);
    }

    #[test]
    fn code_label_prefers_provider_code() {
        let coded = IngestError::new(ErrorKind::NotFound, Origin::Storage, "x").with_code("NoSuchKey");
        let bare = IngestError::new(ErrorKind::Timeout, Origin::Embedding, "x");
        assert_eq!(coded.code_label(), "NoSuchKey");
        assert_eq!(bare.code_label(), "Timeout");
    }
}
