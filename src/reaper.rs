//! Stale claim reaper.
//!
//! A worker that dies mid-document leaves the row in `processing`, and the
//! claim then rejects every redelivery. The reaper returns claims older
//! than the lease to `uploaded` and re-publishes their upload events so a
//! live worker picks them up.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::broker::EventPublisher;
use crate::store::DocumentStore;

/// Result of one reaper pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReaperReport {
    /// Documents returned to `uploaded` and re-published.
    pub requeued: Vec<String>,
    /// Documents returned to `uploaded` whose event could not be published.
    pub unpublished: Vec<String>,
}

impl ReaperReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.unpublished.is_empty()
    }

    pub fn total(&self) -> usize {
        self.requeued.len() + self.unpublished.len()
    }
}

/// Run a single pass.
pub async fn reap_once(
    store: &dyn DocumentStore,
    publisher: &dyn EventPublisher,
    lease: Duration,
) -> crate::error::Result<ReaperReport> {
    let reclaimed = store.reap_stale(lease).await?;
    let mut report = ReaperReport::default();

    for mut event in reclaimed {
        event.event_id = uuid::Uuid::new_v4().to_string();
        match publisher.republish(&event).await {
            Ok(()) => {
                tracing::info!(document_id = %event.document_id, "requeued stale document");
                report.requeued.push(event.document_id);
            }
            Err(e) => {
                tracing::error!(
                    document_id = %event.document_id,
                    error = %e,
                    "stale document reset but event could not be republished"
                );
                report.unpublished.push(event.document_id);
            }
        }
    }

    Ok(report)
}

/// Run [`reap_once`] every `interval` until `shutdown` flips.
pub async fn run_reaper(
    store: Arc<dyn DocumentStore>,
    publisher: Arc<dyn EventPublisher>,
    lease: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::info!(
        lease_secs = lease.as_secs(),
        interval_secs = interval.as_secs(),
        "reaper started"
    );

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        if *shutdown.borrow() {
            break;
        }

        match reap_once(store.as_ref(), publisher.as_ref(), lease).await {
            Ok(report) if report.is_empty() => tracing::debug!("reaper found no stale documents"),
            Ok(report) => tracing::warn!(
                requeued = report.requeued.len(),
                unpublished = report.unpublished.len(),
                "reaper reset stale documents"
            ),
            Err(e) => tracing::error!(error = %e, "reaper pass failed"),
        }
    }

    tracing::info!("reaper stopped");
}
