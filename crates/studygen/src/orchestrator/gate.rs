//! Fan-in: schedules the single aggregation job of an item once every
//! other job of that item has settled.

use rusqlite::Connection;

use super::{Dispatcher, ItemFailure, Orchestrator};
use crate::db::{chunk_repo, job_repo};
use crate::error::PipelineError;
use crate::messages::StartMessage;
use crate::model::{Job, JobId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Other jobs of the item are still running.
    Waiting { active: u64 },
    /// Everything settled but nothing was produced; the item failed.
    Vacuous(ItemFailure),
    /// The aggregation job was created and queued.
    Dispatched(JobId),
    /// Another evaluation already created the aggregation job.
    AlreadyScheduled,
}

impl Orchestrator {
    /// Evaluates convergence for the item of `trigger`, the job whose
    /// completion prompted the check. Convergence is item-wide, across files.
    pub(crate) fn evaluate_gate(
        &self,
        conn: &Connection,
        trigger: &Job,
    ) -> Result<GateDecision, PipelineError> {
        let item_id = trigger.item_id;
        let active = job_repo::count_active(conn, item_id)?;
        if active > 0 {
            tracing::debug!(item_id = %item_id, active, "Waiting for sibling jobs");
            return Ok(GateDecision::Waiting { active });
        }

        let summaries = chunk_repo::summary_texts_for_item(conn, item_id)?;
        let flashcards = chunk_repo::temporary_flashcards_for_item(conn, item_id)?;
        if summaries.is_empty() && flashcards.is_empty() {
            let failure =
                self.fail_item(conn, item_id, trigger.stage, "no summaries or flashcards to aggregate")?;
            return Ok(GateDecision::Vacuous(failure));
        }

        let Some(job) = job_repo::create_aggregation(conn, item_id, Some(trigger.id))? else {
            return Ok(GateDecision::AlreadyScheduled);
        };

        tracing::info!(
            item_id = %item_id,
            job_id = %job.id,
            summaries = summaries.len(),
            flashcards = flashcards.len(),
            "All jobs settled, scheduling aggregation"
        );
        Dispatcher::new(conn, &self.registry).dispatch::<PipelineError>(
            &StartMessage::Aggregation {
                job_id: job.id,
                item_id,
                summaries,
                flashcards,
            },
        )?;
        Ok(GateDecision::Dispatched(job.id))
    }
}
