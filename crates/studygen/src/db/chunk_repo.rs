//! Interim generation artifacts: text chunks, summary chunks and temporary
//! flashcards. None of these outlive a generation cycle.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{now, DatabaseError};
use crate::model::{
    FileId, Flashcard, ItemId, SummaryChunk, SummaryChunkId, TextChunk, TextChunkId,
};

/// A text segment about to be stored.
#[derive(Debug, Clone)]
pub struct NewTextChunk<'a> {
    pub item_id: ItemId,
    pub file_id: FileId,
    pub index: i64,
    pub content: &'a str,
    pub page_start: Option<i64>,
    pub page_end: Option<i64>,
}

/// Rows removed by [`purge_item`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeCounts {
    pub text_chunks: usize,
    pub summary_chunks: usize,
    pub flashcards: usize,
}

impl PurgeCounts {
    pub fn total(&self) -> usize {
        self.text_chunks + self.summary_chunks + self.flashcards
    }
}

fn text_chunk_from_row(row: &Row<'_>) -> Result<TextChunk, rusqlite::Error> {
    Ok(TextChunk {
        id: row.get("id")?,
        item_id: row.get("item_id")?,
        file_id: row.get("file_id")?,
        index: row.get("chunk_index")?,
        content: row.get("content")?,
        page_start: row.get("page_start")?,
        page_end: row.get("page_end")?,
    })
}

fn summary_chunk_from_row(row: &Row<'_>) -> Result<SummaryChunk, rusqlite::Error> {
    Ok(SummaryChunk {
        id: row.get("id")?,
        text_chunk_id: row.get("text_chunk_id")?,
        summary_text: row.get("summary_text")?,
    })
}

// ─── Text chunks ────────────────────────────────────────────────────────────

pub fn insert_text_chunk(
    conn: &Connection,
    chunk: &NewTextChunk<'_>,
) -> Result<TextChunk, DatabaseError> {
    conn.execute(
        "INSERT INTO text_chunks (item_id, file_id, chunk_index, content, page_start, page_end, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            chunk.item_id,
            chunk.file_id,
            chunk.index,
            chunk.content,
            chunk.page_start,
            chunk.page_end,
            now()
        ],
    )?;
    Ok(TextChunk {
        id: TextChunkId(conn.last_insert_rowid()),
        item_id: chunk.item_id,
        file_id: chunk.file_id,
        index: chunk.index,
        content: chunk.content.to_string(),
        page_start: chunk.page_start,
        page_end: chunk.page_end,
    })
}

/// Finds the chunk a summary job was created for.
pub fn find_text_chunk(
    conn: &Connection,
    file_id: FileId,
    index: i64,
) -> Result<Option<TextChunk>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT id, item_id, file_id, chunk_index, content, page_start, page_end
             FROM text_chunks WHERE file_id = ?1 AND chunk_index = ?2",
            params![file_id, index],
            text_chunk_from_row,
        )
        .optional()?)
}

pub fn text_chunks_for_item(
    conn: &Connection,
    item_id: ItemId,
) -> Result<Vec<TextChunk>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, item_id, file_id, chunk_index, content, page_start, page_end
         FROM text_chunks WHERE item_id = ?1 ORDER BY file_id, chunk_index",
    )?;
    let rows = stmt
        .query_map(params![item_id], text_chunk_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ─── Summary chunks ─────────────────────────────────────────────────────────

pub fn insert_summary_chunk(
    conn: &Connection,
    text_chunk_id: TextChunkId,
    summary_text: &str,
) -> Result<SummaryChunk, DatabaseError> {
    conn.execute(
        "INSERT INTO summary_chunks (text_chunk_id, summary_text, created_at) VALUES (?1, ?2, ?3)",
        params![text_chunk_id, summary_text, now()],
    )?;
    Ok(SummaryChunk {
        id: SummaryChunkId(conn.last_insert_rowid()),
        text_chunk_id,
        summary_text: summary_text.to_string(),
    })
}

pub fn find_summary_chunk(
    conn: &Connection,
    id: SummaryChunkId,
) -> Result<Option<SummaryChunk>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT id, text_chunk_id, summary_text FROM summary_chunks WHERE id = ?1",
            params![id],
            summary_chunk_from_row,
        )
        .optional()?)
}

/// The summary already written for a text chunk, if any.
pub fn find_summary_for_text_chunk(
    conn: &Connection,
    text_chunk_id: TextChunkId,
) -> Result<Option<SummaryChunk>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT id, text_chunk_id, summary_text FROM summary_chunks WHERE text_chunk_id = ?1",
            params![text_chunk_id],
            summary_chunk_from_row,
        )
        .optional()?)
}

/// The text chunk a summary chunk was written for.
pub fn summary_chunk_source(
    conn: &Connection,
    summary_chunk_id: SummaryChunkId,
) -> Result<Option<TextChunk>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT t.id, t.item_id, t.file_id, t.chunk_index, t.content, t.page_start, t.page_end
             FROM text_chunks t JOIN summary_chunks s ON s.text_chunk_id = t.id
             WHERE s.id = ?1",
            params![summary_chunk_id],
            text_chunk_from_row,
        )
        .optional()?)
}

/// Summary texts of the whole item, in document order.
pub fn summary_texts_for_item(
    conn: &Connection,
    item_id: ItemId,
) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT s.summary_text FROM summary_chunks s
         JOIN text_chunks t ON t.id = s.text_chunk_id
         WHERE t.item_id = ?1
         ORDER BY t.file_id, t.chunk_index",
    )?;
    let rows = stmt
        .query_map(params![item_id], |r| r.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(rows)
}

// ─── Temporary flashcards ───────────────────────────────────────────────────

pub fn insert_temporary_flashcard(
    conn: &Connection,
    summary_chunk_id: SummaryChunkId,
    card: &Flashcard,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO temporary_flashcards (summary_chunk_id, question, answer, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![summary_chunk_id, card.question, card.answer, now()],
    )?;
    Ok(())
}

/// Temporary flashcards of the whole item, grouped by chunk.
pub fn temporary_flashcards_for_item(
    conn: &Connection,
    item_id: ItemId,
) -> Result<Vec<Flashcard>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT f.question, f.answer FROM temporary_flashcards f
         JOIN summary_chunks s ON s.id = f.summary_chunk_id
         JOIN text_chunks t ON t.id = s.text_chunk_id
         WHERE t.item_id = ?1
         ORDER BY t.file_id, t.chunk_index, f.id",
    )?;
    let rows = stmt
        .query_map(params![item_id], |r| {
            Ok(Flashcard {
                question: r.get(0)?,
                answer: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ─── Cleanup ────────────────────────────────────────────────────────────────

/// Deletes every interim row scoped to the item.
pub fn purge_item(conn: &Connection, item_id: ItemId) -> Result<PurgeCounts, DatabaseError> {
    let flashcards = conn.execute(
        "DELETE FROM temporary_flashcards WHERE summary_chunk_id IN (
            SELECT s.id FROM summary_chunks s
            JOIN text_chunks t ON t.id = s.text_chunk_id
            WHERE t.item_id = ?1)",
        params![item_id],
    )?;
    let summary_chunks = conn.execute(
        "DELETE FROM summary_chunks WHERE text_chunk_id IN (
            SELECT id FROM text_chunks WHERE item_id = ?1)",
        params![item_id],
    )?;
    let text_chunks = conn.execute(
        "DELETE FROM text_chunks WHERE item_id = ?1",
        params![item_id],
    )?;

    let counts = PurgeCounts {
        text_chunks,
        summary_chunks,
        flashcards,
    };
    log::debug!("Purged interim rows of item {}: {:?}", item_id, counts);
    Ok(counts)
}

/// Number of interim rows still scoped to the item.
pub fn count_interim(conn: &Connection, item_id: ItemId) -> Result<u64, DatabaseError> {
    let count: u64 = conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM text_chunks WHERE item_id = ?1)
          + (SELECT COUNT(*) FROM summary_chunks s
             JOIN text_chunks t ON t.id = s.text_chunk_id WHERE t.item_id = ?1)
          + (SELECT COUNT(*) FROM temporary_flashcards f
             JOIN summary_chunks s ON s.id = f.summary_chunk_id
             JOIN text_chunks t ON t.id = s.text_chunk_id WHERE t.item_id = ?1)",
        params![item_id],
        |r| r.get(0),
    )?;
    Ok(count)
}
