//! Outbox of messages waiting to be published.
//!
//! Rows are written in the same transaction as the entities their payload
//! references and only become visible to the relay once that commits. Rows
//! the relay can never deliver are parked and drop out of every batch.

use rusqlite::{params, Connection, Row};

use super::{now, DatabaseError};
use crate::model::JobId;

/// A committed, not yet published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    pub id: i64,
    pub channel: String,
    /// Job started by this message; `None` for broadcasts.
    pub job_id: Option<JobId>,
    pub payload: String,
    pub attempts: u32,
    pub last_error: Option<String>,
}

fn from_row(row: &Row<'_>) -> Result<OutboxEntry, rusqlite::Error> {
    Ok(OutboxEntry {
        id: row.get("id")?,
        channel: row.get("channel")?,
        job_id: row.get("job_id")?,
        payload: row.get("payload")?,
        attempts: row.get("attempts")?,
        last_error: row.get("last_error")?,
    })
}

/// Queues a message. Returns the outbox row id.
pub fn enqueue(
    conn: &Connection,
    channel: &str,
    job_id: Option<JobId>,
    payload: &str,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO outbox (channel, job_id, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![channel, job_id, payload, now()],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Oldest pending messages first. Parked rows are left out.
pub fn fetch_batch(conn: &Connection, limit: usize) -> Result<Vec<OutboxEntry>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, channel, job_id, payload, attempts, last_error
         FROM outbox WHERE parked_at IS NULL ORDER BY id LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit as i64], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    conn.execute("DELETE FROM outbox WHERE id = ?1", params![id])?;
    Ok(())
}

/// Records a failed publish attempt.
pub fn record_failure(conn: &Connection, id: i64, error: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE outbox SET attempts = attempts + 1, last_error = ?2 WHERE id = ?1",
        params![id, error],
    )?;
    Ok(())
}

/// Takes a row out of circulation, keeping it for inspection.
pub fn park(conn: &Connection, id: i64, reason: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE outbox SET parked_at = ?2, last_error = ?3 WHERE id = ?1",
        params![id, now(), reason],
    )?;
    Ok(())
}

pub fn fetch_parked(conn: &Connection) -> Result<Vec<OutboxEntry>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, channel, job_id, payload, attempts, last_error
         FROM outbox WHERE parked_at IS NOT NULL ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Rows still waiting to be published.
pub fn count(conn: &Connection) -> Result<u64, DatabaseError> {
    let count: u64 = conn.query_row(
        "SELECT COUNT(*) FROM outbox WHERE parked_at IS NULL",
        [],
        |r| r.get(0),
    )?;
    Ok(count)
}
