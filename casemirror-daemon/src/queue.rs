//! The reload queue.
//!
//! Scheduled and manual reloads are sent as [`ReloadJob`]s down one mpsc
//! channel. A single processor task consumes it, so at most one reload runs
//! at a time and requests arriving meanwhile wait their turn.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};

use casemirror_sync::{ReloadSummary, Reloader};

use crate::error::DaemonError;

pub const QUEUE_CAPACITY: usize = 64;

/// What asked for a reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadSource {
    Schedule,
    Manual,
}

pub struct ReloadJob {
    pub source: ReloadSource,
    pub respond_to: oneshot::Sender<Result<ReloadSummary, String>>,
}

/// Result of the most recent reload, kept for `status`.
#[derive(Debug, Clone, Serialize)]
pub struct LastReload {
    pub source: ReloadSource,
    pub finished_at: DateTime<Utc>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ReloadSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub type LastReloadCell = Arc<RwLock<Option<LastReload>>>;

/// Queue a reload and wait for its outcome.
///
/// Fails with [`DaemonError::ChannelClosed`] once the processor has stopped.
pub async fn enqueue_reload(
    reload_tx: &mpsc::Sender<ReloadJob>,
    source: ReloadSource,
) -> Result<ReloadSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    reload_tx
        .send(ReloadJob {
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("reload queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("reload response"))?;
    outcome.map_err(DaemonError::Protocol)
}

/// Consume the queue until shutdown, running each reload on the blocking pool.
pub async fn reload_processor_task(
    reloader: Arc<Reloader>,
    last_reload: LastReloadCell,
    mut reload_rx: mpsc::Receiver<ReloadJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = reload_rx.recv() => {
                let Some(job) = maybe_job else { break };

                let reloader = Arc::clone(&reloader);
                let outcome = tokio::task::spawn_blocking(move || reloader.reload())
                    .await
                    .map_err(|err| DaemonError::Protocol(format!("reload task join error: {err}")))?
                    .map_err(|err| err.to_string());

                match &outcome {
                    Ok(summary) => tracing::info!(
                        source = ?job.source,
                        revision = %summary.revision_id,
                        stages = summary.stages,
                        test_cases = summary.test_cases,
                        changed = summary.changed,
                        duration_ms = summary.duration_ms,
                        "reload completed",
                    ),
                    Err(err) => tracing::error!(source = ?job.source, error = %err, "reload failed"),
                }

                *last_reload.write().await = Some(LastReload {
                    source: job.source,
                    finished_at: Utc::now(),
                    ok: outcome.is_ok(),
                    summary: outcome.as_ref().ok().cloned(),
                    error: outcome.as_ref().err().cloned(),
                });

                let _ = job.respond_to.send(outcome);
            }
        }
    }

    Ok(())
}
