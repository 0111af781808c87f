//! Job repository: lifecycle operations on the `jobs` table.
//!
//! Every function takes a plain `&Connection` so it can run either on its
//! own or inside a handler transaction (`Transaction` derefs to it).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use super::{format_timestamp, now, parse_column, parse_timestamp, DatabaseError};
use crate::model::{FileId, ItemId, Job, JobId, JobStatus, Stage};

const COLUMNS: &str = "id, stage, status, item_id, file_id, parent_job_id, created_at, updated_at";

/// Result of a status transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The row moved to the requested status.
    Applied,
    /// The row already was in (or absorbs) the requested status.
    Unchanged,
}

fn from_row(row: &Row<'_>) -> Result<Job, rusqlite::Error> {
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(Job {
        id: row.get("id")?,
        stage: parse_column(row, "stage")?,
        status: parse_column(row, "status")?,
        item_id: row.get("item_id")?,
        file_id: row.get("file_id")?,
        parent_job_id: row.get("parent_job_id")?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

fn query_jobs(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Job>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn insert(
    conn: &Connection,
    stage: Stage,
    item_id: ItemId,
    file_id: Option<FileId>,
    parent: Option<JobId>,
) -> Result<Job, rusqlite::Error> {
    let ts = now();
    conn.execute(
        "INSERT INTO jobs (stage, status, item_id, file_id, parent_job_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            stage.as_str(),
            JobStatus::Pending.as_str(),
            item_id,
            file_id,
            parent,
            ts
        ],
    )?;
    let created = parse_timestamp(&ts);
    Ok(Job {
        id: JobId(conn.last_insert_rowid()),
        stage,
        status: JobStatus::Pending,
        item_id,
        file_id,
        parent_job_id: parent,
        created_at: created,
        updated_at: created,
    })
}

/// Creates a PENDING job.
pub fn create(
    conn: &Connection,
    stage: Stage,
    item_id: ItemId,
    file_id: Option<FileId>,
    parent: Option<JobId>,
) -> Result<Job, DatabaseError> {
    Ok(insert(conn, stage, item_id, file_id, parent)?)
}

/// Creates the item's AGGREGATION job unless one is already active.
///
/// Returns `None` when `uq_jobs_active_aggregation` rejects the insert.
pub fn create_aggregation(
    conn: &Connection,
    item_id: ItemId,
    parent: Option<JobId>,
) -> Result<Option<Job>, DatabaseError> {
    match insert(conn, Stage::Aggregation, item_id, None, parent) {
        Ok(job) => Ok(Some(job)),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            log::debug!("Aggregation job for item {} already active", item_id);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Finds a job by its ID.
pub fn find_by_id(conn: &Connection, id: JobId) -> Result<Option<Job>, DatabaseError> {
    let sql = format!("SELECT {COLUMNS} FROM jobs WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], from_row).optional()?)
}

/// Moves a job to `next` with a compare-and-set on its current status.
///
/// Terminal states never change. A CANCELLED job asked to become FAILED or
/// CANCELLED absorbs the request (`Unchanged`); anything else out of a
/// terminal state is an `IllegalTransition`, as is IN_PROGRESS -> PENDING.
pub fn transition(
    conn: &Connection,
    id: JobId,
    next: JobStatus,
) -> Result<Transition, DatabaseError> {
    let current = find_by_id(conn, id)?
        .ok_or(DatabaseError::JobNotFound(id))?
        .status;

    if current == next {
        return Ok(Transition::Unchanged);
    }

    let illegal = DatabaseError::IllegalTransition {
        job_id: id,
        from: current,
        to: next,
    };
    match current {
        JobStatus::Cancelled if matches!(next, JobStatus::Failed) => {
            return Ok(Transition::Unchanged)
        }
        JobStatus::Finished | JobStatus::Failed | JobStatus::Cancelled => return Err(illegal),
        JobStatus::InProgress if next == JobStatus::Pending => return Err(illegal),
        _ => {}
    }

    let changed = conn.execute(
        "UPDATE jobs SET status = ?2, updated_at = ?3 WHERE id = ?1 AND status = ?4",
        params![id, next.as_str(), now(), current.as_str()],
    )?;

    Ok(if changed == 1 {
        Transition::Applied
    } else {
        Transition::Unchanged
    })
}

/// Marks a job IN_PROGRESS once its start message was confirmed sent.
///
/// Returns `false` when the job was no longer PENDING.
pub fn mark_dispatched(conn: &Connection, id: JobId) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET status = ?2, updated_at = ?3 WHERE id = ?1 AND status = ?4",
        params![
            id,
            JobStatus::InProgress.as_str(),
            now(),
            JobStatus::Pending.as_str()
        ],
    )?;
    Ok(changed == 1)
}

/// Counts PENDING and IN_PROGRESS jobs of an item.
pub fn count_active(conn: &Connection, item_id: ItemId) -> Result<u64, DatabaseError> {
    let count: u64 = conn.query_row(
        "SELECT COUNT(*) FROM jobs WHERE item_id = ?1 AND status IN ('PENDING', 'IN_PROGRESS')",
        params![item_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

/// Cancels every active job of an item in a single statement.
pub fn cancel_all_active(conn: &Connection, item_id: ItemId) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET status = ?2, updated_at = ?3
         WHERE item_id = ?1 AND status IN ('PENDING', 'IN_PROGRESS')",
        params![item_id, JobStatus::Cancelled.as_str(), now()],
    )?;
    Ok(changed)
}

/// Jobs created from the given job's result.
pub fn children(conn: &Connection, parent: JobId) -> Result<Vec<Job>, DatabaseError> {
    let sql = format!("SELECT {COLUMNS} FROM jobs WHERE parent_job_id = ?1 ORDER BY id");
    query_jobs(conn, &sql, params![parent])
}

/// All jobs of an item, oldest first.
pub fn list_for_item(conn: &Connection, item_id: ItemId) -> Result<Vec<Job>, DatabaseError> {
    let sql = format!("SELECT {COLUMNS} FROM jobs WHERE item_id = ?1 ORDER BY id");
    query_jobs(conn, &sql, params![item_id])
}

/// Active jobs not touched since `updated_before`.
pub fn find_stale(
    conn: &Connection,
    updated_before: DateTime<Utc>,
) -> Result<Vec<Job>, DatabaseError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM jobs
         WHERE status IN ('PENDING', 'IN_PROGRESS') AND updated_at < ?1
         ORDER BY id"
    );
    query_jobs(conn, &sql, params![format_timestamp(updated_before)])
}
