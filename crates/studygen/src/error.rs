use std::path::PathBuf;
use thiserror::Error;

use crate::broker::{BrokerError, RelayError};
use crate::db::DatabaseError;
use crate::logging::LoggingError;
use crate::messages::DecodeError;
use crate::model::{ItemId, JobId, Stage};
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum StudygenError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("No database path configured and no home directory found")]
    NoDatabasePath,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// Bad input at generation kickoff. Never enters the pipeline.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Item {0} not found")]
    ItemNotFound(ItemId),

    #[error("Item {0} has no files")]
    NoFiles(ItemId),

    #[error("Item {0} is already being processed")]
    AlreadyProcessing(ItemId),
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to resolve file location: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A result message that could not be handled.
///
/// Handler writes are rolled back and the message is left to the broker's
/// redelivery policy. Stage failures reported by workers are not errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Rejected result: {0}")]
    Decode(#[from] DecodeError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Result for job {job_id} arrived on the {received} channel but the job is {expected}")]
    StageMismatch {
        job_id: JobId,
        expected: Stage,
        received: Stage,
    },
}

pub type Result<T> = std::result::Result<T, StudygenError>;
