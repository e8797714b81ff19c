//! Process wiring for `docflow run` and `docflow reap`.
//!
//! `run` shares one connection pool, one object store client, one embedding
//! client and one producer across all workers. Each worker owns its own
//! consumer in the same group, so partitions are spread over the workers
//! and each partition is processed sequentially.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::broker::EventPublisher;
use crate::chunk::Chunker;
use crate::config::Config;
use crate::consumer::run_worker;
use crate::db;
use crate::embedding::HttpEmbedder;
use crate::kafka::{create_consumer, KafkaPublisher};
use crate::pipeline::Pipeline;
use crate::reaper::{reap_once, run_reaper};
use crate::retry::RetryPolicy;
use crate::storage::{AwsCredentials, S3ObjectStore};
use crate::store::postgres::PgStore;
use crate::store::DocumentStore;

pub async fn run(cfg: &Config) -> Result<()> {
    let pool = db::connect(&cfg.database).await?;
    let store: Arc<dyn DocumentStore> = Arc::new(PgStore::new(pool.clone()));
    let publisher: Arc<dyn EventPublisher> = Arc::new(KafkaPublisher::new(&cfg.broker)?);

    let creds = AwsCredentials::from_env()?;
    let objects = Arc::new(S3ObjectStore::new(&cfg.storage, creds)?);
    let embedder = Arc::new(HttpEmbedder::new(&cfg.embedding)?);
    let chunker = Chunker::new(cfg.chunking.size, cfg.chunking.overlap)?;

    let pipeline = Arc::new(
        Pipeline::new(
            objects,
            embedder,
            store.clone(),
            publisher.clone(),
            chunker,
            RetryPolicy::from_config(&cfg.retry),
        )
        .with_embed_concurrency(cfg.embedding.concurrency),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    for worker in 0..cfg.consumer.workers {
        let consumer = create_consumer(&cfg.broker, worker)?;
        tasks.push(tokio::spawn(run_worker(
            worker,
            consumer,
            pipeline.clone(),
            shutdown_rx.clone(),
        )));
    }

    if cfg.reaper.enabled {
        tasks.push(tokio::spawn(run_reaper(
            store.clone(),
            publisher.clone(),
            Duration::from_secs(cfg.reaper.lease_secs),
            Duration::from_secs(cfg.reaper.interval_secs),
            shutdown_rx.clone(),
        )));
    }

    tracing::info!(
        workers = cfg.consumer.workers,
        topic = %cfg.broker.topic,
        group = %cfg.broker.group_id,
        "ingestion service started"
    );

    wait_for_shutdown().await;
    tracing::info!("shutdown requested, finishing in-flight documents");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "worker task panicked");
        }
    }

    pool.close().await;
    tracing::info!("ingestion service stopped");
    Ok(())
}

/// Single reaper pass, printing what was reset.
pub async fn reap(cfg: &Config, lease_secs: Option<u64>) -> Result<()> {
    let pool = db::connect(&cfg.database).await?;
    let store = PgStore::new(pool.clone());
    let publisher = KafkaPublisher::new(&cfg.broker)?;
    let lease = Duration::from_secs(lease_secs.unwrap_or(cfg.reaper.lease_secs));

    let report = reap_once(&store, &publisher, lease)
        .await
        .context("reaper pass failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    pool.close().await;
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "failed to capture Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(error) => {
                tracing::warn!(%error, "failed to capture SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = sigterm => {}
    }
}
