//! Maintenance Worker
//!
//! Background task running the retention sweep, relevance decay and idle
//! conversation cleanup on an interval until told to stop.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, error, info};

use super::SiccService;

pub struct MaintenanceWorker {
    shutdown: mpsc::Sender<()>,
    handle: JoinHandle<u64>,
}

impl MaintenanceWorker {
    /// Spawn the worker; the first pass runs immediately
    pub fn spawn(service: Arc<SiccService>, every: Duration) -> Self {
        let (shutdown, mut stop) = mpsc::channel::<()>(1);

        info!(interval_ms = every.as_millis() as u64, "Starting maintenance worker");

        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut runs = 0u64;

            loop {
                tokio::select! {
                    _ = stop.recv() => break,
                    _ = ticker.tick() => {
                        match service.run_maintenance().await {
                            Ok(report) => {
                                runs += 1;
                                debug!(
                                    removed = report.memories_removed,
                                    decayed = report.memories_decayed,
                                    closed = report.conversations_closed,
                                    "Maintenance pass complete"
                                );
                            }
                            Err(e) => {
                                error!(error = %e, "Maintenance pass failed");
                            }
                        }
                    }
                }
            }

            info!(runs, "Maintenance worker stopped");
            runs
        });

        Self { shutdown, handle }
    }

    /// Stop the worker and return the number of completed passes
    pub async fn shutdown(self) -> u64 {
        let _ = self.shutdown.send(()).await;
        self.handle.await.unwrap_or_else(|e| {
            error!(error = %e, "Maintenance worker panicked");
            0
        })
    }
}
