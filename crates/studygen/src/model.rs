//! Domain types shared by the store, the messages and the orchestrator.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                self.0.to_sql()
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map(Self)
            }
        }
    };
}

id_type!(
    /// Identifier of a category item, the unit of work.
    ItemId
);
id_type!(
    /// Identifier of a pipeline job.
    JobId
);
id_type!(
    /// Identifier of an uploaded file belonging to an item.
    FileId
);
id_type!(TextChunkId);
id_type!(SummaryChunkId);

// ─── Stage ──────────────────────────────────────────────────────────────────

/// Processing stage a job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    TextExtraction,
    SummaryGeneration,
    FlashcardGeneration,
    Aggregation,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::TextExtraction,
        Stage::SummaryGeneration,
        Stage::FlashcardGeneration,
        Stage::Aggregation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::TextExtraction => "TEXT_EXTRACTION",
            Stage::SummaryGeneration => "SUMMARY_GENERATION",
            Stage::FlashcardGeneration => "FLASHCARD_GENERATION",
            Stage::Aggregation => "AGGREGATION",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

// ─── JobStatus ──────────────────────────────────────────────────────────────

/// Lifecycle state of a job.
///
/// `Pending` and `InProgress` are active; the other three are terminal and
/// never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    InProgress,
    Finished,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Finished => "FINISHED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "IN_PROGRESS" => Ok(JobStatus::InProgress),
            "FINISHED" => Ok(JobStatus::Finished),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            other => Err(other.to_string()),
        }
    }
}

// ─── ItemStatus ─────────────────────────────────────────────────────────────

/// Generation status of an item as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "PENDING",
            ItemStatus::Processing => "PROCESSING",
            ItemStatus::Completed => "COMPLETED",
            ItemStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ItemStatus::Pending),
            "PROCESSING" => Ok(ItemStatus::Processing),
            "COMPLETED" => Ok(ItemStatus::Completed),
            "FAILED" => Ok(ItemStatus::Failed),
            other => Err(other.to_string()),
        }
    }
}

// ─── Records ────────────────────────────────────────────────────────────────

/// A pipeline job row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub stage: Stage,
    pub status: JobStatus,
    pub item_id: ItemId,
    pub file_id: Option<FileId>,
    /// Job whose result created this one; `None` for text extraction.
    pub parent_job_id: Option<JobId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The unit of work generation runs for.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub status: ItemStatus,
    pub failed_stage: Option<Stage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An uploaded file as known to the object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: FileId,
    pub item_id: ItemId,
    pub bucket: String,
    pub object_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub id: TextChunkId,
    pub item_id: ItemId,
    pub file_id: FileId,
    pub index: i64,
    pub content: String,
    pub page_start: Option<i64>,
    pub page_end: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryChunk {
    pub id: SummaryChunkId,
    pub text_chunk_id: TextChunkId,
    pub summary_text: String,
}

/// A question/answer pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flashcard {
    pub question: String,
    pub answer: String,
}

impl Flashcard {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }

    /// Builds a card from an untyped JSON entry, rejecting anything that is not
    /// an object with non-blank string `question` and `answer` fields.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let question = value.get("question")?.as_str()?.trim();
        let answer = value.get("answer")?.as_str()?.trim();
        if question.is_empty() || answer.is_empty() {
            return None;
        }
        Some(Self::new(question, answer))
    }
}

/// A persisted output flashcard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalFlashcard {
    pub id: i64,
    pub question: String,
    pub answer: String,
}

/// Status projection polled by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusInfo {
    pub status: ItemStatus,
    pub failed_stage: Option<Stage>,
}

/// Generated artifacts of an item's last successful cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Generation {
    pub summary: String,
    pub flashcards: Vec<FinalFlashcard>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_round_trips_through_str() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
        assert!("CHUNKING".parse::<Stage>().is_err());
    }

    #[test]
    fn test_active_and_terminal_statuses() {
        assert!(JobStatus::Pending.is_active());
        assert!(JobStatus::InProgress.is_active());
        for status in [JobStatus::Finished, JobStatus::Failed, JobStatus::Cancelled] {
            assert!(status.is_terminal());
        }
    }

    #[test]
    fn test_flashcard_from_value_skips_malformed() {
        let ok = serde_json::json!({"question": " Q ", "answer": "A"});
        assert_eq!(Flashcard::from_value(&ok), Some(Flashcard::new("Q", "A")));

        for bad in [
            serde_json::json!({"question": "Q"}),
            serde_json::json!({"question": null, "answer": "A"}),
            serde_json::json!({"question": "  ", "answer": "A"}),
            serde_json::json!({"question": 3, "answer": "A"}),
            serde_json::json!("just a string"),
        ] {
            assert_eq!(Flashcard::from_value(&bad), None, "accepted {bad}");
        }
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&JobId(7)).unwrap();
        assert_eq!(json, "7");
    }
}
