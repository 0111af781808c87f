//! Final generation artifacts: one summary and a flashcard deck per item.

use rusqlite::{params, Connection, OptionalExtension};

use super::{now, DatabaseError};
use crate::model::{FinalFlashcard, Flashcard, ItemId};

/// Replaces the item's final summary and flashcards.
///
/// Rows of a previous successful cycle are dropped first, so an item holds
/// exactly one generation at a time.
pub fn replace_final(
    conn: &Connection,
    item_id: ItemId,
    summary: &str,
    cards: &[Flashcard],
) -> Result<(), DatabaseError> {
    let ts = now();
    conn.execute(
        "DELETE FROM final_flashcards WHERE item_id = ?1",
        params![item_id],
    )?;
    conn.execute(
        "DELETE FROM final_summaries WHERE item_id = ?1",
        params![item_id],
    )?;
    conn.execute(
        "INSERT INTO final_summaries (item_id, summary_text, created_at) VALUES (?1, ?2, ?3)",
        params![item_id, summary, ts],
    )?;

    let mut stmt = conn.prepare(
        "INSERT INTO final_flashcards (item_id, question, answer, created_at) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for card in cards {
        stmt.execute(params![item_id, card.question, card.answer, ts])?;
    }

    log::debug!(
        "Stored final summary and {} flashcards for item {}",
        cards.len(),
        item_id
    );
    Ok(())
}

pub fn final_summary(conn: &Connection, item_id: ItemId) -> Result<Option<String>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT summary_text FROM final_summaries WHERE item_id = ?1",
            params![item_id],
            |r| r.get(0),
        )
        .optional()?)
}

pub fn final_flashcards(
    conn: &Connection,
    item_id: ItemId,
) -> Result<Vec<FinalFlashcard>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, question, answer FROM final_flashcards WHERE item_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![item_id], |r| {
            Ok(FinalFlashcard {
                id: r.get(0)?,
                question: r.get(1)?,
                answer: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
