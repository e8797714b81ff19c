//! Tracing setup.
//!
//! Logs go to stdout with a compact formatter. When `DOCFLOW_LOG_FILE` is
//! set, they are also appended to that file through a non-blocking writer.
//! `RUST_LOG` controls filtering and defaults to `info`.

use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_FILE_ENV: &str = "DOCFLOW_LOG_FILE";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    if let Some(writer) = file_writer() {
        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .compact();
        registry.with(file_layer).init();
    } else {
        registry.init();
    }
}

fn file_writer() -> Option<NonBlocking> {
    let path = std::env::var(LOG_FILE_ENV).ok()?;
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
    {
        Ok(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let _ = LOG_GUARD.set(guard);
            Some(non_blocking)
        }
        Err(err) => {
            eprintln!("Failed to open log file {path}: {err}");
            None
        }
    }
}
