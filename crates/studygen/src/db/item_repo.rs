//! Item repository for the `items` table.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{now, parse_column, parse_timestamp, DatabaseError};
use crate::model::{Item, ItemId, ItemStatus, Stage};

fn from_row(row: &Row<'_>) -> Result<Item, rusqlite::Error> {
    let failed_stage: Option<String> = row.get("failed_stage")?;
    let failed_stage = match failed_stage {
        Some(raw) => Some(raw.parse::<Stage>().map_err(|value| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(DatabaseError::InvalidValue {
                    column: "failed_stage",
                    value,
                }),
            )
        })?),
        None => None,
    };
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(Item {
        id: row.get("id")?,
        name: row.get("name")?,
        status: parse_column(row, "status")?,
        failed_stage,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

/// Inserts a new PENDING item.
pub fn insert(conn: &Connection, name: &str) -> Result<Item, DatabaseError> {
    let ts = now();
    conn.execute(
        "INSERT INTO items (name, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
        params![name, ItemStatus::Pending.as_str(), ts],
    )?;
    let created = parse_timestamp(&ts);
    Ok(Item {
        id: ItemId(conn.last_insert_rowid()),
        name: name.to_string(),
        status: ItemStatus::Pending,
        failed_stage: None,
        created_at: created,
        updated_at: created,
    })
}

/// Finds an item by its ID.
pub fn find(conn: &Connection, id: ItemId) -> Result<Option<Item>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT id, name, status, failed_stage, created_at, updated_at FROM items WHERE id = ?1",
            params![id],
            from_row,
        )
        .optional()?)
}

/// Sets the item's status and failed stage together.
///
/// Returns `false` when the item does not exist.
pub fn set_status(
    conn: &Connection,
    id: ItemId,
    status: ItemStatus,
    failed_stage: Option<Stage>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE items SET status = ?2, failed_stage = ?3, updated_at = ?4 WHERE id = ?1",
        params![id, status.as_str(), failed_stage.map(|s| s.as_str()), now()],
    )?;
    Ok(changed == 1)
}
