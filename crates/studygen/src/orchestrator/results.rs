//! Result processing: one handler per stage behind a shared preamble.

use rusqlite::Connection;

use super::{Dispatcher, FailureOutcome, GateDecision, Orchestrator};
use crate::db::chunk_repo::{self, NewTextChunk};
use crate::db::job_repo::{self, Transition};
use crate::db::{artifact_repo, item_repo, DatabaseError};
use crate::error::PipelineError;
use crate::messages::{
    AggregationOutput, FlashcardOutput, Outcome, ResultMessage, StageOutput, StartMessage,
    SummaryOutput, TextExtractionOutput,
};
use crate::model::{ItemId, ItemStatus, Job, JobId, JobStatus, Stage};

/// What handling one result did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultOutcome {
    /// Stage output stored and follow-up jobs queued.
    Advanced { created: Vec<JobId> },
    /// Stage output stored and the aggregation gate evaluated.
    Converged(GateDecision),
    /// Final artifacts stored; the item is done.
    Completed { item_id: ItemId, flashcards: usize },
    /// The worker reported failure or the output broke a stage invariant.
    Failed(FailureOutcome),
    /// Late or duplicate result for a settled job. Nothing changed.
    Zombie { status: JobStatus },
    /// No job with this id.
    UnknownJob,
}

impl ResultOutcome {
    fn wrote_anything(&self) -> bool {
        !matches!(self, ResultOutcome::Zombie { .. } | ResultOutcome::UnknownJob)
    }
}

impl Orchestrator {
    /// Handles one raw result received on `stage`'s result channel.
    ///
    /// An `Err` means the message was rejected and every write rolled back.
    pub fn process_result(&self, stage: Stage, body: &[u8]) -> Result<ResultOutcome, PipelineError> {
        let message = ResultMessage::decode(stage, body)?;

        let span = tracing::info_span!("result", stage = %stage, job_id = %message.job_id);
        let _guard = span.enter();

        let outcome = self
            .db
            .with_tx(|tx| self.apply_result(tx, stage, &message))?;
        if outcome.wrote_anything() {
            self.notify_relay();
        }
        tracing::debug!(?outcome, "Result handled");
        Ok(outcome)
    }

    fn apply_result(
        &self,
        conn: &Connection,
        stage: Stage,
        message: &ResultMessage,
    ) -> Result<ResultOutcome, PipelineError> {
        let Some(job) = job_repo::find_by_id(conn, message.job_id)? else {
            tracing::warn!("Result references an unknown job, discarding");
            return Ok(ResultOutcome::UnknownJob);
        };

        if job.stage != stage {
            return Err(PipelineError::StageMismatch {
                job_id: job.id,
                expected: job.stage,
                received: stage,
            });
        }

        if !job.status.is_active() {
            tracing::info!(status = %job.status, "Zombie result, discarding");
            return Ok(ResultOutcome::Zombie { status: job.status });
        }

        let output = match &message.outcome {
            Outcome::Failure { reason } => {
                return Ok(ResultOutcome::Failed(self.fail_stage(conn, &job, reason)?));
            }
            Outcome::Success(output) => output,
        };

        match output {
            StageOutput::TextExtraction(out) => self.handle_text_extraction(conn, &job, out),
            StageOutput::Summary(out) => self.handle_summary(conn, &job, out),
            StageOutput::Flashcards(out) => self.handle_flashcards(conn, &job, out),
            StageOutput::Aggregation(out) => self.handle_aggregation(conn, &job, out),
        }
    }

    fn stage_failed(
        &self,
        conn: &Connection,
        job: &Job,
        reason: String,
    ) -> Result<ResultOutcome, PipelineError> {
        Ok(ResultOutcome::Failed(self.fail_stage(conn, job, &reason)?))
    }

    fn finish(conn: &Connection, job: &Job) -> Result<(), DatabaseError> {
        match job_repo::transition(conn, job.id, JobStatus::Finished)? {
            Transition::Applied => Ok(()),
            Transition::Unchanged => Err(DatabaseError::IllegalTransition {
                job_id: job.id,
                from: job.status,
                to: JobStatus::Finished,
            }),
        }
    }

    fn handle_text_extraction(
        &self,
        conn: &Connection,
        job: &Job,
        out: &TextExtractionOutput,
    ) -> Result<ResultOutcome, PipelineError> {
        let file_id = match job.file_id {
            Some(expected) if expected != out.file_id => {
                return self.stage_failed(
                    conn,
                    job,
                    format!("extracted file {} but the job extracts file {}", out.file_id, expected),
                );
            }
            _ => out.file_id,
        };

        Self::finish(conn, job)?;

        let segments = out.segments();
        if segments.is_empty() {
            tracing::info!(file_id = %file_id, "Extraction returned no text");
            return Ok(ResultOutcome::Converged(self.evaluate_gate(conn, job)?));
        }

        let dispatcher = Dispatcher::new(conn, &self.registry);
        let mut created = Vec::with_capacity(segments.len());
        for (index, content) in segments.into_iter().enumerate() {
            let index = index as i64;
            chunk_repo::insert_text_chunk(
                conn,
                &NewTextChunk {
                    item_id: job.item_id,
                    file_id,
                    index,
                    content,
                    page_start: out.page_start,
                    page_end: out.page_end,
                },
            )?;
            let summary_job = job_repo::create(
                conn,
                Stage::SummaryGeneration,
                job.item_id,
                Some(file_id),
                Some(job.id),
            )?;
            dispatcher.dispatch::<PipelineError>(&StartMessage::SummaryGeneration {
                job_id: summary_job.id,
                item_id: job.item_id,
                file_id,
                chunk_number: index,
                text: content.to_string(),
            })?;
            created.push(summary_job.id);
        }

        tracing::info!(file_id = %file_id, chunks = created.len(), "Text extracted");
        Ok(ResultOutcome::Advanced { created })
    }

    fn handle_summary(
        &self,
        conn: &Connection,
        job: &Job,
        out: &SummaryOutput,
    ) -> Result<ResultOutcome, PipelineError> {
        let Some(file_id) = job.file_id else {
            return self.stage_failed(conn, job, "summary job has no file".to_string());
        };
        let Some(chunk) = chunk_repo::find_text_chunk(conn, file_id, out.chunk_number)? else {
            return self.stage_failed(
                conn,
                job,
                format!("text chunk {} of file {} not found", out.chunk_number, file_id),
            );
        };
        if chunk_repo::find_summary_for_text_chunk(conn, chunk.id)?.is_some() {
            return self.stage_failed(
                conn,
                job,
                format!("text chunk {} of file {} already has a summary", out.chunk_number, file_id),
            );
        }
        let summary = out.summary.trim();
        if summary.is_empty() {
            return self.stage_failed(conn, job, "worker returned an empty summary".to_string());
        }

        let summary_chunk = chunk_repo::insert_summary_chunk(conn, chunk.id, summary)?;
        Self::finish(conn, job)?;

        let flashcard_job = job_repo::create(
            conn,
            Stage::FlashcardGeneration,
            job.item_id,
            job.file_id,
            Some(job.id),
        )?;
        Dispatcher::new(conn, &self.registry).dispatch::<PipelineError>(
            &StartMessage::FlashcardGeneration {
                job_id: flashcard_job.id,
                item_id: job.item_id,
                summary_chunk_id: summary_chunk.id,
                text: summary_chunk.summary_text,
            },
        )?;

        Ok(ResultOutcome::Advanced {
            created: vec![flashcard_job.id],
        })
    }

    fn handle_flashcards(
        &self,
        conn: &Connection,
        job: &Job,
        out: &FlashcardOutput,
    ) -> Result<ResultOutcome, PipelineError> {
        let Some(summary_chunk) = chunk_repo::find_summary_chunk(conn, out.summary_chunk_id)? else {
            return self.stage_failed(
                conn,
                job,
                format!("summary chunk {} not found", out.summary_chunk_id),
            );
        };
        let source = chunk_repo::summary_chunk_source(conn, summary_chunk.id)?;
        let owned = source.is_some_and(|chunk| {
            chunk.item_id == job.item_id && job.file_id.map_or(true, |file_id| file_id == chunk.file_id)
        });
        if !owned {
            return self.stage_failed(
                conn,
                job,
                format!(
                    "summary chunk {} does not belong to item {}",
                    summary_chunk.id, job.item_id
                ),
            );
        }

        for card in &out.flashcards {
            chunk_repo::insert_temporary_flashcard(conn, summary_chunk.id, card)?;
        }
        Self::finish(conn, job)?;

        tracing::debug!(
            summary_chunk_id = %summary_chunk.id,
            flashcards = out.flashcards.len(),
            "Flashcards stored"
        );
        Ok(ResultOutcome::Converged(self.evaluate_gate(conn, job)?))
    }

    fn handle_aggregation(
        &self,
        conn: &Connection,
        job: &Job,
        out: &AggregationOutput,
    ) -> Result<ResultOutcome, PipelineError> {
        if item_repo::find(conn, job.item_id)?.is_none() {
            return self.stage_failed(conn, job, format!("item {} not found", job.item_id));
        }

        artifact_repo::replace_final(conn, job.item_id, &out.final_summary, &out.final_flashcards)?;
        let purged = chunk_repo::purge_item(conn, job.item_id)?;
        Self::finish(conn, job)?;
        item_repo::set_status(conn, job.item_id, ItemStatus::Completed, None)?;

        tracing::info!(
            item_id = %job.item_id,
            flashcards = out.final_flashcards.len(),
            purged = purged.total(),
            "Generation completed"
        );
        Ok(ResultOutcome::Completed {
            item_id: job.item_id,
            flashcards: out.final_flashcards.len(),
        })
    }
}
