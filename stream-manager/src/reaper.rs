//! Periodic eviction of idle, empty connections.
//!
//! The reaper runs a background task on a fixed interval (60 seconds by default)
//! and evicts every connection that has had no subscribers and no activity for
//! longer than the idle threshold (5 minutes by default). A connection with at
//! least one subscriber is never reaped, however quiet it is.

use std::sync::Weak;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};

use crate::error::{ManagerError, Result};
use crate::manager::Shared;

/// Handle to the idle-sweep background task.
///
/// # Shutdown
///
/// [`IdleReaper::shutdown`] signals the task and waits up to 5 seconds for it to
/// finish. Dropping the manager without an async shutdown aborts the task instead.
pub(crate) struct IdleReaper {
    background_task: Option<JoinHandle<()>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl IdleReaper {
    /// Spawn the sweep task on `runtime`.
    ///
    /// The task holds only a weak reference to the manager state and stops by
    /// itself once the manager is gone.
    pub(crate) fn start(
        runtime: &Handle,
        shared: Weak<Shared>,
        period: Duration,
        threshold: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let background_task =
            runtime.spawn(Self::sweep_task(shared, period, threshold, shutdown_rx));

        Self {
            background_task: Some(background_task),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Stop the sweep task, waiting up to 5 seconds for it to finish.
    pub(crate) async fn shutdown(mut self) -> Result<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(()).await;
        }

        match self.background_task.take() {
            Some(task) => match timeout(Duration::from_secs(5), task).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(ManagerError::Shutdown(format!(
                    "Idle reaper task failed: {e}"
                ))),
                Err(_) => Err(ManagerError::Shutdown(
                    "Idle reaper shutdown timed out after 5 seconds".to_string(),
                )),
            },
            None => Ok(()),
        }
    }

    /// Stop the sweep task without waiting.
    pub(crate) fn abort(&mut self) {
        self.shutdown_tx.take();
        if let Some(task) = self.background_task.take() {
            task.abort();
        }
    }

    async fn sweep_task(
        shared: Weak<Shared>,
        period: Duration,
        threshold: Duration,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        // First sweep one full period after start, not immediately.
        let mut sweep_interval = interval_at(Instant::now() + period, period);
        sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(
            period_ms = period.as_millis() as u64,
            threshold_ms = threshold.as_millis() as u64,
            "Idle reaper started"
        );

        loop {
            tokio::select! {
                _ = sweep_interval.tick() => {
                    let Some(shared) = shared.upgrade() else {
                        break;
                    };
                    let reaped = shared.sweep_idle(Instant::now(), threshold);
                    if reaped > 0 {
                        tracing::info!(reaped, "Idle sweep evicted connections");
                    }
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }

        tracing::debug!("Idle reaper stopped");
    }
}

impl Drop for IdleReaper {
    fn drop(&mut self) {
        self.abort();
    }
}
