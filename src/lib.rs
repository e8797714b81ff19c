//! # Docflow Ingest
//!
//! Event-driven ingestion worker for uploaded documents.
//!
//! The worker consumes `document.uploaded` events, claims the document row,
//! downloads the file from object storage, extracts its text, splits it into
//! overlapping chunks, embeds every chunk and stores the result in Postgres
//! (pgvector). Failures are classified as retryable or fatal; retryable ones
//! are retried with exponential backoff, and terminal failures are published
//! to a dead-letter topic and recorded on the document.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────────────────────────┐   ┌──────────┐
//! │  Kafka   │──▶│ Consumer │──▶│ Pipeline                      │──▶│ Postgres │
//! │ uploads  │   │  worker  │   │ claim → S3 → extract → chunk  │   │ pgvector │
//! └──────────┘   └──────────┘   │ → embed → persist (retried)   │   └──────────┘
//!                               └──────────────┬────────────────┘
//!                                              │ terminal failure
//!                                              ▼
//!                                        ┌──────────┐
//!                                        │   DLQ    │
//!                                        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docflow init                  # create tables and the vector extension
//! docflow check-config          # validate configuration
//! docflow run                   # start consumer workers and the reaper
//! docflow reap                  # one-off reset of stale claims
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with environment overrides |
//! | [`models`] | Events, statuses, chunks |
//! | [`error`] | Error kinds and the retry classifier |
//! | [`storage`] | S3 object store gateway |
//! | [`extract`] | Text extraction (PDF, OOXML, plain text) |
//! | [`chunk`] | Fixed-window chunking |
//! | [`embedding`] | Embedding gateway |
//! | [`store`] | Document persistence (Postgres, in-memory) |
//! | [`retry`] | Backoff and the retry loop |
//! | [`dead_letter`] | Dead-letter records and escalation |
//! | [`pipeline`] | Per-event orchestration |
//! | [`reaper`] | Stale claim recovery |
//! | `kafka` / `consumer` / `service` | Broker transport and process wiring |
//! | [`db`] / [`migrate`] | Connection pool and schema |

pub mod broker;
pub mod chunk;
pub mod config;
#[cfg(feature = "kafka")]
pub mod consumer;
pub mod db;
pub mod dead_letter;
pub mod embedding;
pub mod error;
pub mod extract;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod reaper;
pub mod retry;
#[cfg(feature = "kafka")]
pub mod service;
pub mod storage;
pub mod store;
