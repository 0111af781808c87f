//! File repository for the `files` table.
//!
//! Files are registered by the upload layer; the orchestrator only reads
//! them to build text-extraction jobs.

use rusqlite::{params, Connection, Row};

use super::{now, DatabaseError};
use crate::model::{FileId, FileRecord, ItemId};

fn from_row(row: &Row<'_>) -> Result<FileRecord, rusqlite::Error> {
    Ok(FileRecord {
        id: row.get("id")?,
        item_id: row.get("item_id")?,
        bucket: row.get("bucket")?,
        object_key: row.get("object_key")?,
    })
}

/// Registers a stored object as a file of the item.
pub fn insert(
    conn: &Connection,
    item_id: ItemId,
    bucket: &str,
    object_key: &str,
) -> Result<FileRecord, DatabaseError> {
    conn.execute(
        "INSERT INTO files (item_id, bucket, object_key, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![item_id, bucket, object_key, now()],
    )?;
    Ok(FileRecord {
        id: FileId(conn.last_insert_rowid()),
        item_id,
        bucket: bucket.to_string(),
        object_key: object_key.to_string(),
    })
}

/// Lists an item's files in upload order.
pub fn list_for_item(conn: &Connection, item_id: ItemId) -> Result<Vec<FileRecord>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, item_id, bucket, object_key FROM files WHERE item_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![item_id], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{item_repo, Database};

    #[test]
    fn test_insert_and_list() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let item = item_repo::insert(conn, "History")?;
            let other = item_repo::insert(conn, "Art")?;
            let a = insert(conn, item.id, "uploads", "history/a.pdf")?;
            let b = insert(conn, item.id, "uploads", "history/b.pdf")?;
            insert(conn, other.id, "uploads", "art/c.pdf")?;

            let files = list_for_item(conn, item.id)?;
            assert_eq!(files, vec![a, b]);
            assert!(list_for_item(conn, ItemId(999))?.is_empty());
            Ok(())
        })
        .unwrap();
    }
}
