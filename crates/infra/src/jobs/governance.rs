//! Background governance sweep.
//!
//! Periodically fails jobs that outlived their ceiling, independent of
//! anything the executor reports.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::orchestrator::JobOrchestrator;
use super::store::JobStore;

/// Sweeper runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SweeperStats {
    pub sweeps: u64,
    pub timed_out: u64,
    pub errors: u64,
    pub last_sweep_at: Option<DateTime<Utc>>,
}

/// Handle to control a running sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
    stats: Arc<Mutex<SweeperStats>>,
}

impl SweeperHandle {
    /// Stop the loop and wait for the in-flight sweep to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.join.await {
            error!(error = %e, "governance sweeper task failed");
        }
    }

    /// Get current sweeper statistics.
    pub fn stats(&self) -> SweeperStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

/// Recurring timeout enforcement for a [`JobOrchestrator`].
pub struct GovernanceSweeper;

impl GovernanceSweeper {
    /// Spawn the sweep loop on the current tokio runtime.
    pub fn spawn<S>(orchestrator: Arc<JobOrchestrator<S>>, interval: Duration) -> SweeperHandle
    where
        S: JobStore + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let stats = Arc::new(Mutex::new(SweeperStats::default()));
        let loop_stats = stats.clone();

        let join = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "governance sweeper started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let now = Utc::now();
                        let result = orchestrator.sweep_expired(now).await;
                        let Ok(mut stats) = loop_stats.lock() else {
                            break;
                        };
                        stats.sweeps += 1;
                        stats.last_sweep_at = Some(now);
                        match result {
                            Ok(report) => {
                                stats.timed_out += report.timed_out.len() as u64;
                                debug!(
                                    examined = report.examined,
                                    timed_out = report.timed_out.len(),
                                    "governance sweep finished"
                                );
                            }
                            Err(e) => {
                                stats.errors += 1;
                                error!(error = %e, "governance sweep failed");
                            }
                        }
                    }
                }
            }

            info!("governance sweeper stopped");
        });

        SweeperHandle {
            shutdown: Some(shutdown_tx),
            join,
            stats,
        }
    }
}
