use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::SchedulerError;
use crate::orchestrator::CycleOrchestrator;

/// Handle to a background loop; `stop` signals it and waits for it to finish.
pub struct PollerHandle {
    cancel_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl PollerHandle {
    pub(crate) fn new(cancel_tx: broadcast::Sender<()>, join: JoinHandle<()>) -> Self {
        Self { cancel_tx, join }
    }

    pub async fn stop(self) -> Result<(), SchedulerError> {
        let _ = self.cancel_tx.send(());
        self.join.await.map_err(SchedulerError::from)
    }
}

/// Runs one cycle per `interval`, starting immediately. A cycle always runs
/// to completion; ticks missed meanwhile are skipped rather than queued.
pub fn spawn_scheduler(orchestrator: Arc<CycleOrchestrator>, interval: Duration) -> PollerHandle {
    let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel_rx.recv() => {
                    info!("scheduler shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = orchestrator.run_cycle().await {
                        error!(error = %err, "cycle aborted: novelty state could not be persisted");
                    }
                }
            }
        }
    });

    PollerHandle::new(cancel_tx, join)
}
