//! Builders for worker result messages.
//!
//! Each function returns the JSON a stage worker would publish on its
//! result channel.

#![allow(dead_code)]

use serde_json::{json, Value};

use studygen::model::{FileId, JobId, SummaryChunkId};

/// A `status: error` result carrying `reason` as the worker's message.
pub fn failure(job_id: JobId, reason: &str) -> Value {
    json!({
        "job_id": job_id.0,
        "status": "error",
        "payload": { "msg": reason }
    })
}

pub fn extraction_chunks(job_id: JobId, file_id: FileId, chunks: &[&str]) -> Value {
    json!({
        "job_id": job_id.0,
        "status": "success",
        "payload": { "file_id": file_id.0, "text_chunks": chunks, "page_start": 1 }
    })
}

/// A single-block extraction as sent by older workers.
pub fn extraction_single(job_id: JobId, file_id: FileId, text: &str) -> Value {
    json!({
        "job_id": job_id.0,
        "status": "success",
        "payload": { "fileId": file_id.0, "textContent": text }
    })
}

pub fn summary(job_id: JobId, chunk_number: i64, text: &str) -> Value {
    json!({
        "job_id": job_id.0,
        "status": "success",
        "payload": { "chunk_number": chunk_number, "summary": text }
    })
}

/// Flashcard result with `(question, answer)` pairs.
pub fn flashcards(job_id: JobId, summary_chunk_id: SummaryChunkId, cards: &[(&str, &str)]) -> Value {
    let cards: Vec<Value> = cards
        .iter()
        .map(|(q, a)| json!({ "question": q, "answer": a }))
        .collect();
    json!({
        "job_id": job_id.0,
        "status": "success",
        "payload": { "summary_chunk_id": summary_chunk_id.0, "flashcards": cards }
    })
}

pub fn aggregation(job_id: JobId, final_summary: &str, cards: &[(&str, &str)]) -> Value {
    let cards: Vec<Value> = cards
        .iter()
        .map(|(q, a)| json!({ "question": q, "answer": a }))
        .collect();
    json!({
        "job_id": job_id.0,
        "status": "success",
        "payload": { "final_summary": final_summary, "final_flashcards": cards }
    })
}
