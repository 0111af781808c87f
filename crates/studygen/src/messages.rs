//! Wire messages exchanged with the stage workers.
//!
//! Start messages are a tagged enum, one variant per stage. Results arrive
//! in a loose envelope (`job_id`, `status`, `payload`) and are decoded
//! strictly into the output type of the stage whose channel they came in on.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::{FileId, Flashcard, ItemId, JobId, Stage, SummaryChunkId};

// ─── Outbound ───────────────────────────────────────────────────────────────

/// A file the text-extraction worker should download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerFile {
    pub id: FileId,
    pub url: String,
}

/// Job-start message sent to a stage worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StartMessage {
    TextExtraction {
        job_id: JobId,
        item_id: ItemId,
        file: WorkerFile,
    },
    SummaryGeneration {
        job_id: JobId,
        item_id: ItemId,
        file_id: FileId,
        chunk_number: i64,
        text: String,
    },
    FlashcardGeneration {
        job_id: JobId,
        item_id: ItemId,
        summary_chunk_id: SummaryChunkId,
        text: String,
    },
    Aggregation {
        job_id: JobId,
        item_id: ItemId,
        summaries: Vec<String>,
        flashcards: Vec<Flashcard>,
    },
}

impl StartMessage {
    pub fn stage(&self) -> Stage {
        match self {
            StartMessage::TextExtraction { .. } => Stage::TextExtraction,
            StartMessage::SummaryGeneration { .. } => Stage::SummaryGeneration,
            StartMessage::FlashcardGeneration { .. } => Stage::FlashcardGeneration,
            StartMessage::Aggregation { .. } => Stage::Aggregation,
        }
    }

    pub fn job_id(&self) -> JobId {
        match self {
            StartMessage::TextExtraction { job_id, .. }
            | StartMessage::SummaryGeneration { job_id, .. }
            | StartMessage::FlashcardGeneration { job_id, .. }
            | StartMessage::Aggregation { job_id, .. } => *job_id,
        }
    }
}

/// Broadcast telling every worker to drop in-flight work for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationNotice {
    pub item_id: ItemId,
}

// ─── Inbound ────────────────────────────────────────────────────────────────

/// Errors decoding a worker result. The message is rejected, not failed.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed result envelope: {0}")]
    Envelope(String),

    #[error("Malformed {stage} payload: {source}")]
    Payload {
        stage: Stage,
        #[source]
        source: serde_json::Error,
    },
}

/// Extracted text: either a list of segments or one block.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ExtractedText {
    Chunks {
        #[serde(alias = "textChunks")]
        text_chunks: Vec<String>,
    },
    Single {
        #[serde(alias = "textContent")]
        text_content: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TextExtractionOutput {
    #[serde(alias = "fileId")]
    pub file_id: FileId,
    #[serde(flatten)]
    pub text: ExtractedText,
    #[serde(default, alias = "pageStart")]
    pub page_start: Option<i64>,
    #[serde(default, alias = "pageEnd")]
    pub page_end: Option<i64>,
}

impl TextExtractionOutput {
    /// Segments in returned order. A blank single block yields none.
    pub fn segments(&self) -> Vec<&str> {
        match &self.text {
            ExtractedText::Chunks { text_chunks } => {
                text_chunks.iter().map(String::as_str).collect()
            }
            ExtractedText::Single { text_content } if text_content.trim().is_empty() => Vec::new(),
            ExtractedText::Single { text_content } => vec![text_content.as_str()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SummaryOutput {
    pub chunk_number: i64,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FlashcardOutput {
    pub summary_chunk_id: SummaryChunkId,
    #[serde(deserialize_with = "lenient_cards")]
    pub flashcards: Vec<Flashcard>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AggregationOutput {
    pub final_summary: String,
    #[serde(deserialize_with = "lenient_cards")]
    pub final_flashcards: Vec<Flashcard>,
}

/// Successful output of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutput {
    TextExtraction(TextExtractionOutput),
    Summary(SummaryOutput),
    Flashcards(FlashcardOutput),
    Aggregation(AggregationOutput),
}

impl StageOutput {
    pub fn stage(&self) -> Stage {
        match self {
            StageOutput::TextExtraction(_) => Stage::TextExtraction,
            StageOutput::Summary(_) => Stage::SummaryGeneration,
            StageOutput::Flashcards(_) => Stage::FlashcardGeneration,
            StageOutput::Aggregation(_) => Stage::Aggregation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(StageOutput),
    Failure { reason: String },
}

/// A decoded worker result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultMessage {
    pub job_id: JobId,
    pub outcome: Outcome,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawJobId {
    Number(i64),
    Text(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default, alias = "original_job_id")]
    job_id: Option<RawJobId>,
    status: Option<String>,
    #[serde(default)]
    payload: Value,
}

impl ResultMessage {
    /// Decodes a result received on `stage`'s result channel.
    pub fn decode(stage: Stage, body: &[u8]) -> Result<Self, DecodeError> {
        let envelope: Envelope =
            serde_json::from_slice(body).map_err(|e| DecodeError::Envelope(e.to_string()))?;

        let job_id = match envelope.job_id {
            Some(RawJobId::Number(id)) => JobId(id),
            Some(RawJobId::Text(raw)) => raw
                .trim()
                .parse::<i64>()
                .map(JobId)
                .map_err(|_| DecodeError::Envelope(format!("job id '{raw}' is not numeric")))?,
            None => return Err(DecodeError::Envelope("missing job id".to_string())),
        };
        let status = envelope
            .status
            .ok_or_else(|| DecodeError::Envelope("missing status".to_string()))?;

        if !status.eq_ignore_ascii_case("success") {
            let reason = envelope
                .payload
                .get("msg")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("worker reported status '{status}'"));
            return Ok(Self {
                job_id,
                outcome: Outcome::Failure { reason },
            });
        }

        let payload = envelope.payload;
        let wrap = |source| DecodeError::Payload { stage, source };
        let output = match stage {
            Stage::TextExtraction => {
                StageOutput::TextExtraction(serde_json::from_value(payload).map_err(wrap)?)
            }
            Stage::SummaryGeneration => {
                StageOutput::Summary(serde_json::from_value(payload).map_err(wrap)?)
            }
            Stage::FlashcardGeneration => {
                StageOutput::Flashcards(serde_json::from_value(payload).map_err(wrap)?)
            }
            Stage::Aggregation => {
                StageOutput::Aggregation(serde_json::from_value(payload).map_err(wrap)?)
            }
        };

        Ok(Self {
            job_id,
            outcome: Outcome::Success(output),
        })
    }
}

/// Keeps well-formed cards and drops the rest.
fn lenient_cards<'de, D>(deserializer: D) -> Result<Vec<Flashcard>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<Value>::deserialize(deserializer)?;
    Ok(raw.iter().filter_map(Flashcard::from_value).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(stage: Stage, value: Value) -> Result<ResultMessage, DecodeError> {
        ResultMessage::decode(stage, value.to_string().as_bytes())
    }

    #[test]
    fn test_start_message_is_tagged() {
        let msg = StartMessage::SummaryGeneration {
            job_id: JobId(5),
            item_id: ItemId(42),
            file_id: FileId(1),
            chunk_number: 2,
            text: "chunk".to_string(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "summary_generation");
        assert_eq!(value["job_id"], 5);
        assert_eq!(value["chunk_number"], 2);
        assert_eq!(msg.stage(), Stage::SummaryGeneration);
        assert_eq!(msg.job_id(), JobId(5));
    }

    #[test]
    fn test_text_extraction_chunks() {
        let msg = decode(
            Stage::TextExtraction,
            json!({
                "job_id": 1,
                "status": "success",
                "payload": {"fileId": 3, "textChunks": ["a", "b"], "pageStart": 1}
            }),
        )
        .unwrap();
        let Outcome::Success(StageOutput::TextExtraction(out)) = msg.outcome else {
            panic!("unexpected outcome");
        };
        assert_eq!(out.file_id, FileId(3));
        assert_eq!(out.segments(), vec!["a", "b"]);
        assert_eq!(out.page_start, Some(1));
        assert_eq!(out.page_end, None);
    }

    #[test]
    fn test_text_extraction_single_block() {
        let msg = decode(
            Stage::TextExtraction,
            json!({
                "job_id": 1,
                "status": "SUCCESS",
                "payload": {"file_id": 3, "text_content": "whole document"}
            }),
        )
        .unwrap();
        let Outcome::Success(StageOutput::TextExtraction(out)) = msg.outcome else {
            panic!("unexpected outcome");
        };
        assert_eq!(out.segments(), vec!["whole document"]);
    }

    #[test]
    fn test_text_extraction_without_text_is_rejected() {
        let err = decode(
            Stage::TextExtraction,
            json!({"job_id": 1, "status": "success", "payload": {"file_id": 3}}),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Payload {
                stage: Stage::TextExtraction,
                ..
            }
        ));
    }

    #[test]
    fn test_original_job_id_alias_and_string_ids() {
        let msg = decode(
            Stage::SummaryGeneration,
            json!({
                "original_job_id": "17",
                "status": "success",
                "payload": {"chunk_number": 0, "summary": "short"}
            }),
        )
        .unwrap();
        assert_eq!(msg.job_id, JobId(17));
    }

    #[test]
    fn test_failure_reason_from_payload() {
        let msg = decode(
            Stage::SummaryGeneration,
            json!({"job_id": 4, "status": "error", "payload": {"msg": "model overloaded"}}),
        )
        .unwrap();
        assert_eq!(
            msg.outcome,
            Outcome::Failure {
                reason: "model overloaded".to_string()
            }
        );

        let msg = decode(Stage::Aggregation, json!({"job_id": 4, "status": "failed"})).unwrap();
        assert!(matches!(msg.outcome, Outcome::Failure { .. }));
    }

    #[test]
    fn test_envelope_errors() {
        assert!(matches!(
            ResultMessage::decode(Stage::Aggregation, b"not json"),
            Err(DecodeError::Envelope(_))
        ));
        assert!(matches!(
            decode(Stage::Aggregation, json!({"status": "success"})),
            Err(DecodeError::Envelope(_))
        ));
        assert!(matches!(
            decode(Stage::Aggregation, json!({"job_id": "abc", "status": "success"})),
            Err(DecodeError::Envelope(_))
        ));
        assert!(matches!(
            decode(Stage::Aggregation, json!({"job_id": 1})),
            Err(DecodeError::Envelope(_))
        ));
    }

    #[test]
    fn test_summary_requires_fields() {
        let err = decode(
            Stage::SummaryGeneration,
            json!({"job_id": 2, "status": "success", "payload": {"summary": "no index"}}),
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::Payload { .. }));
    }

    #[test]
    fn test_flashcards_skip_malformed_entries() {
        let msg = decode(
            Stage::FlashcardGeneration,
            json!({
                "job_id": 9,
                "status": "success",
                "payload": {
                    "summary_chunk_id": 12,
                    "flashcards": [
                        {"question": "Q1", "answer": "A1"},
                        {"question": "", "answer": "A2"},
                        {"question": "Q3"},
                        "garbage",
                        {"question": "Q4", "answer": "A4"}
                    ]
                }
            }),
        )
        .unwrap();
        let Outcome::Success(StageOutput::Flashcards(out)) = msg.outcome else {
            panic!("unexpected outcome");
        };
        assert_eq!(out.summary_chunk_id, SummaryChunkId(12));
        assert_eq!(
            out.flashcards,
            vec![Flashcard::new("Q1", "A1"), Flashcard::new("Q4", "A4")]
        );
    }

    #[test]
    fn test_aggregation_output() {
        let msg = decode(
            Stage::Aggregation,
            json!({
                "job_id": 3,
                "status": "success",
                "payload": {
                    "final_summary": "all of it",
                    "final_flashcards": [{"question": "Q", "answer": "A"}, null]
                }
            }),
        )
        .unwrap();
        let Outcome::Success(output) = msg.outcome else {
            panic!("unexpected outcome");
        };
        assert_eq!(output.stage(), Stage::Aggregation);
        let StageOutput::Aggregation(out) = output else {
            panic!("wrong stage");
        };
        assert_eq!(out.final_summary, "all of it");
        assert_eq!(out.final_flashcards.len(), 1);
    }
}
