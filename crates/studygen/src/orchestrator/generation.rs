//! Entry point and read side of the pipeline.

use super::{Dispatcher, Orchestrator};
use crate::db::{artifact_repo, file_repo, item_repo, job_repo, DatabaseError};
use crate::error::{GenerationError, ValidationError};
use crate::messages::{StartMessage, WorkerFile};
use crate::model::{Generation, ItemId, ItemStatus, JobId, Stage, StatusInfo};

impl Orchestrator {
    /// Starts a generation cycle: one text-extraction job per file of the item.
    ///
    /// Validation problems are returned to the caller and change nothing.
    pub fn start_generation(&self, item_id: ItemId) -> Result<Vec<JobId>, GenerationError> {
        let jobs = self.db.with_tx(|tx| -> Result<Vec<JobId>, GenerationError> {
            let item = item_repo::find(tx, item_id)?.ok_or(ValidationError::ItemNotFound(item_id))?;
            if item.status == ItemStatus::Processing || job_repo::count_active(tx, item_id)? > 0 {
                return Err(ValidationError::AlreadyProcessing(item_id).into());
            }

            let files = file_repo::list_for_item(tx, item_id)?;
            if files.is_empty() {
                return Err(ValidationError::NoFiles(item_id).into());
            }

            item_repo::set_status(tx, item_id, ItemStatus::Processing, None)?;

            let dispatcher = Dispatcher::new(tx, &self.registry);
            let mut jobs = Vec::with_capacity(files.len());
            for file in &files {
                let url = self.locator.locate(file)?;
                let job = job_repo::create(tx, Stage::TextExtraction, item_id, Some(file.id), None)?;
                dispatcher.dispatch::<GenerationError>(&StartMessage::TextExtraction {
                    job_id: job.id,
                    item_id,
                    file: WorkerFile { id: file.id, url },
                })?;
                jobs.push(job.id);
            }
            Ok(jobs)
        })?;

        self.notify_relay();
        tracing::info!(item_id = %item_id, files = jobs.len(), "Generation started");
        Ok(jobs)
    }

    /// Status of an item, or `None` when it does not exist.
    pub fn status(&self, item_id: ItemId) -> Result<Option<StatusInfo>, DatabaseError> {
        self.db.with_conn(|conn| {
            Ok(item_repo::find(conn, item_id)?.map(|item| StatusInfo {
                status: item.status,
                failed_stage: item.failed_stage,
            }))
        })
    }

    /// Final artifacts of an item. The summary is empty until a cycle succeeds.
    pub fn generation(&self, item_id: ItemId) -> Result<Option<Generation>, DatabaseError> {
        self.db.with_conn(|conn| {
            if item_repo::find(conn, item_id)?.is_none() {
                return Ok(None);
            }
            Ok(Some(Generation {
                summary: artifact_repo::final_summary(conn, item_id)?.unwrap_or_default(),
                flashcards: artifact_repo::final_flashcards(conn, item_id)?,
            }))
        })
    }
}
