//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order, each inside its own transaction.

use rusqlite::Connection;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_items_and_files_tables",
        sql: include_str!("sql/001_create_items.sql"),
    },
    Migration {
        version: 2,
        description: "create_jobs_table",
        sql: include_str!("sql/002_create_jobs.sql"),
    },
    Migration {
        version: 3,
        description: "create_chunk_tables",
        sql: include_str!("sql/003_create_chunks.sql"),
    },
    Migration {
        version: 4,
        description: "create_final_artifact_tables",
        sql: include_str!("sql/004_create_artifacts.sql"),
    },
    Migration {
        version: 5,
        description: "create_outbox_table",
        sql: include_str!("sql/005_create_outbox.sql"),
    },
    Migration {
        version: 6,
        description: "add_outbox_parking",
        sql: include_str!("sql/006_park_outbox.sql"),
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        // Wrap in an explicit transaction so a half-applied script never
        // gets recorded as done.
        let script = format!(
            "BEGIN;\n{}\nINSERT INTO _migrations (version, description) VALUES ({}, '{}');\nCOMMIT;",
            migration.sql, migration.version, migration.description
        );
        if let Err(e) = conn.execute_batch(&script) {
            let _ = conn.execute_batch("ROLLBACK;");
            return Err(DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            });
        }
    }

    Ok(())
}
