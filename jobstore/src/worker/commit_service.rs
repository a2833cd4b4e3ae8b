//! Periodic cache-to-durable sync.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::Result;
use crate::database::repositories::SyncOutcome;
use crate::lifecycle::JobLifecycle;

/// Runs [`JobLifecycle::sync`] on a fixed interval.
pub struct CommitJobService {
    lifecycle: Arc<JobLifecycle>,
    interval: Duration,
    cancellation_token: CancellationToken,
}

impl CommitJobService {
    pub fn new(lifecycle: Arc<JobLifecycle>, interval: Duration) -> Self {
        Self {
            lifecycle,
            interval,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Sync once, now.
    pub async fn run_once(&self) -> Result<SyncOutcome> {
        self.lifecycle.sync().await
    }

    /// Spawn the periodic loop. Returns `None` when the interval is zero.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.interval.is_zero() {
            info!("Commit job service disabled");
            return None;
        }

        let service = self.clone();
        info!(interval = ?self.interval, "Starting commit job service");

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = service.cancellation_token.cancelled() => {
                        debug!("Commit job service shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        match service.run_once().await {
                            Ok(outcome) if !outcome.is_empty() => info!(
                                synced = outcome.synced.len(),
                                unresolved = outcome.failures(),
                                "Committed cached jobs"
                            ),
                            Ok(_) => debug!("No cached jobs to commit"),
                            Err(e) => error!(error = %e, "Committing cached jobs failed"),
                        }
                    }
                }
            }
        }))
    }

    pub fn stop(&self) {
        self.cancellation_token.cancel();
    }
}
