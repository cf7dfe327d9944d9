//! Periodic reloads.
//!
//! The first tick fires immediately, which doubles as the startup reload.
//! Ticks missed while a reload is still running are skipped, not replayed.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::DaemonError;
use crate::queue::{enqueue_reload, ReloadJob, ReloadSource};

/// Handle to a running scheduler task.
pub struct SchedulerHandle {
    stop_tx: oneshot::Sender<()>,
    join: JoinHandle<Result<(), DaemonError>>,
}

impl SchedulerHandle {
    /// Stop ticking and wait for the task to finish. A reload already queued
    /// by the scheduler is awaited first.
    pub async fn stop(self) -> Result<(), DaemonError> {
        let Self { stop_tx, join } = self;
        let _ = stop_tx.send(());
        wait(join).await
    }

    /// Wait for the task to end on its own (shutdown or closed queue).
    pub async fn join(self) -> Result<(), DaemonError> {
        let Self { stop_tx, join } = self;
        let result = wait(join).await;
        drop(stop_tx);
        result
    }
}

async fn wait(join: JoinHandle<Result<(), DaemonError>>) -> Result<(), DaemonError> {
    match join.await {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "scheduler task join failure: {err}"
        ))),
    }
}

/// Spawn the scheduler: one [`ReloadSource::Schedule`] job every `period`.
pub fn spawn_scheduler(
    period: Duration,
    reload_tx: mpsc::Sender<ReloadJob>,
    shutdown_rx: broadcast::Receiver<()>,
) -> SchedulerHandle {
    let (stop_tx, stop_rx) = oneshot::channel();
    let join = tokio::spawn(scheduler_task(period, reload_tx, stop_rx, shutdown_rx));
    SchedulerHandle { stop_tx, join }
}

async fn scheduler_task(
    period: Duration,
    reload_tx: mpsc::Sender<ReloadJob>,
    mut stop_rx: oneshot::Receiver<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                match enqueue_reload(&reload_tx, ReloadSource::Schedule).await {
                    Ok(_) => {}
                    Err(DaemonError::ChannelClosed("reload queue")) => {
                        tracing::debug!("reload queue closed, scheduler exiting");
                        break;
                    }
                    // Failures are logged by the processor; keep the schedule.
                    Err(err) => tracing::debug!(error = %err, "scheduled reload did not complete"),
                }
            }
        }
    }

    tracing::debug!("scheduler stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn answer(job: ReloadJob) {
        assert_eq!(job.source, ReloadSource::Schedule);
        let _ = job.respond_to.send(Err("not a real reload".to_string()));
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn first_tick_is_immediate_then_every_period() {
        let (reload_tx, mut reload_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        let started = Instant::now();
        let handle = spawn_scheduler(Duration::from_secs(600), reload_tx, shutdown_rx);

        answer(reload_rx.recv().await.expect("startup job"));
        assert!(started.elapsed() < Duration::from_secs(1));

        answer(reload_rx.recv().await.expect("scheduled job"));
        assert!(started.elapsed() >= Duration::from_secs(600));

        handle.stop().await.expect("stop");
        assert!(reload_rx.recv().await.is_none(), "no jobs after stop");
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn slow_reload_skips_missed_ticks() {
        let (reload_tx, mut reload_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        let started = Instant::now();
        let handle = spawn_scheduler(Duration::from_secs(600), reload_tx, shutdown_rx);

        let job = reload_rx.recv().await.expect("startup job");
        // The reload outlives two periods.
        tokio::time::advance(Duration::from_secs(1500)).await;
        answer(job);

        // The overdue tick fires once, then the schedule realigns.
        answer(reload_rx.recv().await.expect("overdue job"));
        assert!(started.elapsed() < Duration::from_secs(1800));

        answer(reload_rx.recv().await.expect("realigned job"));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1800), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(2100), "{elapsed:?}");

        handle.stop().await.expect("stop");
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn shutdown_broadcast_ends_scheduler() {
        let (reload_tx, mut reload_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        let handle = spawn_scheduler(Duration::from_secs(60), reload_tx, shutdown_rx);

        answer(reload_rx.recv().await.expect("startup job"));
        shutdown_tx.send(()).expect("shutdown");
        handle.join().await.expect("join");
    }
}
