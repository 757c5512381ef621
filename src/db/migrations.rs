//! Forward-only schema migration framework.
//!
//! Every applied step is recorded in `schema_version`. Steps run in strictly
//! increasing order, each in its own transaction, and are never reordered or
//! removed: new schema goes in a new step at the end of [`MIGRATIONS`].

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use super::schema;

/// One additive schema step.
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "memories",
        sql: schema::MEMORIES_SQL,
    },
    Migration {
        version: 2,
        name: "associations",
        sql: schema::ASSOCIATIONS_SQL,
    },
    Migration {
        version: 3,
        name: "type_metadata",
        sql: schema::METADATA_SQL,
    },
    Migration {
        version: 4,
        name: "ingestion_state",
        sql: schema::INGESTION_STATE_SQL,
    },
    Migration {
        version: 5,
        name: "memories_fts",
        sql: schema::FTS_SQL,
    },
];

/// The schema version that the current binary expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 5;

/// Highest applied migration, or 0 on a fresh database.
pub fn current_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.execute_batch(schema::SCHEMA_VERSION_SQL)?;
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

/// Run any pending migrations. Each migration runs in a transaction.
pub fn run_migrations(conn: &Connection) -> Result<u32> {
    let mut version = current_version(conn)?;
    tracing::debug!(schema_version = version, target = CURRENT_SCHEMA_VERSION, "checking migrations");

    let start = version;
    for migration in MIGRATIONS.iter().filter(|m| m.version > start) {
        tracing::info!(from = version, to = migration.version, name = migration.name, "running migration");

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)
            .with_context(|| format!("migration {} ({}) failed", migration.version, migration.name))?;
        tx.execute(
            "INSERT INTO schema_version (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![
                migration.version,
                migration.name,
                crate::memory::format_ts(&chrono::Utc::now())
            ],
        )?;
        tx.commit()?;

        version = migration.version;
    }

    Ok(version)
}
