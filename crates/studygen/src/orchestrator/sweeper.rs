//! Optional deadline for jobs whose worker never answers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::{FailureOutcome, Orchestrator};
use crate::db::job_repo;
use crate::error::PipelineError;

impl Orchestrator {
    /// Fails every active job untouched for longer than `timeout`.
    pub fn fail_stale_jobs(&self, timeout: Duration) -> Result<Vec<FailureOutcome>, PipelineError> {
        let cutoff = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let stale = self
            .db
            .with_conn(|conn| job_repo::find_stale(conn, cutoff))?;

        let mut outcomes = Vec::new();
        for job in stale {
            // Re-read inside the transaction; a result may have landed since.
            let outcome = self.db.with_tx(|tx| -> Result<_, PipelineError> {
                match job_repo::find_by_id(tx, job.id)? {
                    Some(current) if current.status.is_active() && current.updated_at < cutoff => {
                        self.fail_stage(tx, &current, "timed out").map(Some)
                    }
                    _ => Ok(None),
                }
            })?;
            if let Some(outcome) = outcome {
                outcomes.push(outcome);
            }
        }

        if !outcomes.is_empty() {
            self.notify_relay();
        }
        Ok(outcomes)
    }
}

/// Periodically runs [`Orchestrator::fail_stale_jobs`].
pub struct StaleJobSweeper {
    orchestrator: Arc<Orchestrator>,
    timeout: Duration,
    interval: Duration,
}

impl StaleJobSweeper {
    pub fn new(orchestrator: Arc<Orchestrator>, timeout: Duration, interval: Duration) -> Self {
        Self {
            orchestrator,
            timeout,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            timeout_secs = self.timeout.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Stale job sweeper started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let orchestrator = Arc::clone(&self.orchestrator);
            let timeout = self.timeout;
            match tokio::task::spawn_blocking(move || orchestrator.fail_stale_jobs(timeout)).await {
                Ok(Ok(outcomes)) if !outcomes.is_empty() => {
                    tracing::warn!(failed = outcomes.len(), "Failed stale jobs");
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Stale job sweep failed"),
                Err(e) => tracing::error!(error = %e, "Stale job sweep panicked"),
            }
        }

        tracing::info!("Stale job sweeper stopped");
    }
}
