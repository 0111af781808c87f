//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::model::{JobId, JobStatus};

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,

    /// No job row with this id.
    #[error("Job {0} not found")]
    JobNotFound(JobId),

    /// A job was asked to leave a terminal state.
    #[error("Illegal transition for job {job_id}: {from} -> {to}")]
    IllegalTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    /// A stored enum column held a value this build does not know.
    #[error("Invalid value '{value}' in column '{column}'")]
    InvalidValue { column: &'static str, value: String },
}
