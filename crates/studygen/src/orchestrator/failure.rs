//! Failure cascade: one failed stage fails the whole item.

use rusqlite::Connection;

use super::{Dispatcher, Orchestrator};
use crate::db::chunk_repo::{self, PurgeCounts};
use crate::db::job_repo::{self, Transition};
use crate::db::item_repo;
use crate::error::PipelineError;
use crate::model::{ItemId, ItemStatus, Job, JobStatus, Stage};

/// What a failed item looked like after the cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub item_id: ItemId,
    pub failed_stage: Stage,
    pub reason: String,
    /// Sibling jobs moved to CANCELLED.
    pub cancelled: usize,
    pub purged: PurgeCounts,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The job had already been cancelled by an earlier cascade.
    AlreadySettled,
    ItemFailed(ItemFailure),
}

impl Orchestrator {
    /// Fails `job` and cascades to its item.
    pub(crate) fn fail_stage(
        &self,
        conn: &Connection,
        job: &Job,
        reason: &str,
    ) -> Result<FailureOutcome, PipelineError> {
        if job_repo::transition(conn, job.id, JobStatus::Failed)? == Transition::Unchanged {
            tracing::info!(
                job_id = %job.id,
                item_id = %job.item_id,
                "Job already settled, skipping failure cascade"
            );
            return Ok(FailureOutcome::AlreadySettled);
        }

        tracing::warn!(
            job_id = %job.id,
            item_id = %job.item_id,
            stage = %job.stage,
            reason,
            "Stage failed"
        );
        let failure = self.fail_item(conn, job.item_id, job.stage, reason)?;
        Ok(FailureOutcome::ItemFailed(failure))
    }

    /// Marks the item FAILED, cancels its active jobs, broadcasts the abort
    /// notice and purges interim rows.
    pub(crate) fn fail_item(
        &self,
        conn: &Connection,
        item_id: ItemId,
        stage: Stage,
        reason: &str,
    ) -> Result<ItemFailure, PipelineError> {
        item_repo::set_status(conn, item_id, ItemStatus::Failed, Some(stage))?;
        let cancelled = job_repo::cancel_all_active(conn, item_id)?;
        Dispatcher::new(conn, &self.registry).broadcast_cancellation::<PipelineError>(item_id)?;
        let purged = chunk_repo::purge_item(conn, item_id)?;

        tracing::warn!(
            item_id = %item_id,
            failed_stage = %stage,
            cancelled,
            purged = purged.total(),
            "Item failed"
        );

        Ok(ItemFailure {
            item_id,
            failed_stage: stage,
            reason: reason.to_string(),
            cancelled,
            purged,
        })
    }
}
