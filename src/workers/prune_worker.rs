//! Background worker that prunes dead grants.
//!
//! Periodically removes expired or invalidated tokens and the ad-hoc
//! authorizations left behind once their tokens die. Failures are logged and
//! the worker keeps running; a missed pass only delays cleanup.

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::time::interval;

use crate::config::AppState;

pub struct PruneWorker {
    state: AppState,
    interval_secs: u64,
}

impl PruneWorker {
    pub fn new(state: AppState, interval_secs: u64) -> Self {
        Self {
            state,
            interval_secs,
        }
    }

    /// Runs until the task is aborted.
    pub async fn run(&self) {
        tracing::info!(
            interval_secs = self.interval_secs,
            "prune worker started"
        );

        let mut ticker = interval(Duration::from_secs(self.interval_secs));
        loop {
            ticker.tick().await;
            if let Err(error) = self.prune_once().await {
                tracing::error!(%error, "prune pass failed");
            }
        }
    }

    async fn prune_once(&self) -> Result<(), crate::error::ServerError> {
        let retention = ChronoDuration::seconds(self.state.options.prune_retention_secs);

        let tokens = self.state.tokens()?.prune(retention).await?;
        let authorizations = self.state.authorizations()?.prune(retention).await?;

        if tokens > 0 || authorizations > 0 {
            tracing::info!(tokens, authorizations, "prune pass completed");
        }
        Ok(())
    }
}

/// Spawns the worker as a detached task.
pub fn spawn_prune_worker(state: AppState, interval_secs: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        PruneWorker::new(state, interval_secs).run().await;
    })
}
