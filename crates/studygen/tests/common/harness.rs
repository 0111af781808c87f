//! Test harness for driving the pipeline without a broker.
//!
//! Results are fed straight into [`Orchestrator::process_result`]; the start
//! messages a real relay would publish are read back from the outbox.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use rusqlite::params;
use serde_json::Value;

use studygen::config::ChannelConfig;
use studygen::db::{
    chunk_repo, file_repo, format_timestamp, item_repo, job_repo, outbox_repo, Database,
};
use studygen::messages::StartMessage;
use studygen::model::{FileId, ItemId, Job, JobId, Stage, StatusInfo};
use studygen::{ChannelRegistry, Orchestrator, PipelineError, PublicUrlLocator, ResultOutcome};

pub const STORAGE_URL: &str = "http://storage.test";

pub struct TestHarness {
    pub orchestrator: Arc<Orchestrator>,
}

impl TestHarness {
    pub fn new() -> Self {
        let db = Database::open_in_memory().expect("Failed to open in-memory database");
        let registry = ChannelRegistry::from_config(&ChannelConfig::default())
            .expect("Default channels must be valid");
        let locator = Arc::new(PublicUrlLocator::new(STORAGE_URL));
        Self {
            orchestrator: Arc::new(Orchestrator::new(db, Arc::new(registry), locator)),
        }
    }

    pub fn db(&self) -> &Database {
        self.orchestrator.db()
    }

    /// Creates an item with `files` uploaded files.
    pub fn item_with_files(&self, name: &str, files: usize) -> (ItemId, Vec<FileId>) {
        self.db()
            .with_conn(|conn| {
                let item = item_repo::insert(conn, name)?;
                let mut ids = Vec::with_capacity(files);
                for n in 0..files {
                    let file = file_repo::insert(conn, item.id, "uploads", &format!("{name}/part {n}.pdf"))?;
                    ids.push(file.id);
                }
                Ok((item.id, ids))
            })
            .expect("Failed to create item")
    }

    /// Creates an item with a fixed id, as a CRUD layer with its own id
    /// sequence would.
    pub fn item_with_id(&self, id: i64, name: &str, files: usize) -> (ItemId, Vec<FileId>) {
        self.db()
            .with_conn(|conn| {
                let ts = format_timestamp(Utc::now());
                conn.execute(
                    "INSERT INTO items (id, name, status, created_at, updated_at)
                     VALUES (?1, ?2, 'PENDING', ?3, ?3)",
                    params![id, name, ts],
                )?;
                let mut ids = Vec::with_capacity(files);
                for n in 0..files {
                    let file = file_repo::insert(conn, ItemId(id), "uploads", &format!("{name}/part {n}.pdf"))?;
                    ids.push(file.id);
                }
                Ok((ItemId(id), ids))
            })
            .expect("Failed to create item")
    }

    /// Feeds a JSON result into the orchestrator.
    pub fn deliver(&self, stage: Stage, result: Value) -> Result<ResultOutcome, PipelineError> {
        let body = serde_json::to_vec(&result).expect("Failed to encode result");
        self.orchestrator.process_result(stage, &body)
    }

    /// Like [`deliver`](Self::deliver) but panics on rejection.
    pub fn accept(&self, stage: Stage, result: Value) -> ResultOutcome {
        self.deliver(stage, result)
            .unwrap_or_else(|e| panic!("{stage} result rejected: {e}"))
    }

    /// The queued start message for `job_id`.
    pub fn start_message(&self, job_id: JobId) -> StartMessage {
        let entry = self
            .db()
            .with_conn(|conn| outbox_repo::fetch_batch(conn, 10_000))
            .expect("Failed to read outbox")
            .into_iter()
            .find(|entry| entry.job_id == Some(job_id))
            .unwrap_or_else(|| panic!("No start message queued for job {job_id}"));
        serde_json::from_str(&entry.payload).expect("Outbox payload is not a start message")
    }

    /// Payloads queued on a channel, oldest first.
    pub fn outbox_payloads(&self, channel: &str) -> Vec<Value> {
        self.db()
            .with_conn(|conn| outbox_repo::fetch_batch(conn, 10_000))
            .expect("Failed to read outbox")
            .into_iter()
            .filter(|entry| entry.channel == channel)
            .map(|entry| serde_json::from_str(&entry.payload).expect("Outbox payload is not JSON"))
            .collect()
    }

    pub fn job(&self, job_id: JobId) -> Job {
        self.db()
            .with_conn(|conn| job_repo::find_by_id(conn, job_id))
            .expect("Failed to read job")
            .unwrap_or_else(|| panic!("Job {job_id} not found"))
    }

    pub fn jobs(&self, item_id: ItemId) -> Vec<Job> {
        self.db()
            .with_conn(|conn| job_repo::list_for_item(conn, item_id))
            .expect("Failed to list jobs")
    }

    pub fn jobs_of_stage(&self, item_id: ItemId, stage: Stage) -> Vec<Job> {
        self.jobs(item_id)
            .into_iter()
            .filter(|job| job.stage == stage)
            .collect()
    }

    pub fn children(&self, job_id: JobId) -> Vec<Job> {
        self.db()
            .with_conn(|conn| job_repo::children(conn, job_id))
            .expect("Failed to list children")
    }

    pub fn status(&self, item_id: ItemId) -> StatusInfo {
        self.orchestrator
            .status(item_id)
            .expect("Failed to read status")
            .unwrap_or_else(|| panic!("Item {item_id} not found"))
    }

    pub fn text_chunk_count(&self, item_id: ItemId) -> usize {
        self.db()
            .with_conn(|conn| chunk_repo::text_chunks_for_item(conn, item_id))
            .expect("Failed to list text chunks")
            .len()
    }

    pub fn summary_count(&self, item_id: ItemId) -> usize {
        self.db()
            .with_conn(|conn| chunk_repo::summary_texts_for_item(conn, item_id))
            .expect("Failed to list summaries")
            .len()
    }

    pub fn temporary_flashcard_count(&self, item_id: ItemId) -> usize {
        self.db()
            .with_conn(|conn| chunk_repo::temporary_flashcards_for_item(conn, item_id))
            .expect("Failed to list flashcards")
            .len()
    }

    /// Rows in the interim chunk and flashcard tables for the item.
    pub fn interim_rows(&self, item_id: ItemId) -> u64 {
        self.db()
            .with_conn(|conn| chunk_repo::count_interim(conn, item_id))
            .expect("Failed to count interim rows")
    }
}
