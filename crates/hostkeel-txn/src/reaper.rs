use crate::coordinator::TransactionCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Periodically rolls back transactions whose callers never ended them.
pub struct StaleTransactionReaper;

impl StaleTransactionReaper {
    /// Start sweeping every `interval`. Must be called inside a tokio runtime.
    pub fn spawn(
        coordinator: Arc<TransactionCoordinator>,
        interval: Duration,
        max_age: Duration,
    ) -> ReaperHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            debug!(?interval, ?max_age, "stale transaction reaper running");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let cleaned = coordinator.cleanup_stale_transactions(max_age).await;
                        if cleaned > 0 {
                            info!(cleaned, "reaped stale transactions");
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("stale transaction reaper stopped");
        });
        ReaperHandle { shutdown, task }
    }
}

pub struct ReaperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stop the reaper and wait for an in-progress sweep to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}
