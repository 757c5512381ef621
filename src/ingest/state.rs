use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::memory::format_ts;
use crate::memory::store::ts_col;

/// What was last ingested for one `(source_type, source_path)` key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionState {
    pub source_type: String,
    pub source_path: String,
    pub content_hash: String,
    pub ingested_at: DateTime<Utc>,
    pub memories_created: u64,
}

fn state_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IngestionState> {
    Ok(IngestionState {
        source_type: row.get(0)?,
        source_path: row.get(1)?,
        content_hash: row.get(2)?,
        ingested_at: ts_col(row, 3)?,
        memories_created: row.get::<_, i64>(4)?.max(0) as u64,
    })
}

pub fn get_state(conn: &Connection, source_type: &str, source_path: &str) -> Result<Option<IngestionState>> {
    let state = conn
        .query_row(
            "SELECT source_type, source_path, content_hash, ingested_at, memories_created
             FROM ingestion_state WHERE source_type = ?1 AND source_path = ?2",
            params![source_type, source_path],
            state_from_row,
        )
        .optional()?;
    Ok(state)
}

/// Insert or replace the state row for one item.
pub fn record_state(
    conn: &Connection,
    source_type: &str,
    source_path: &str,
    content_hash: &str,
    memories_created: u64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO ingestion_state (source_type, source_path, content_hash, ingested_at, memories_created)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(source_type, source_path) DO UPDATE SET
             content_hash = excluded.content_hash,
             ingested_at = excluded.ingested_at,
             memories_created = excluded.memories_created",
        params![
            source_type,
            source_path,
            content_hash,
            format_ts(&Utc::now()),
            memories_created as i64
        ],
    )?;
    Ok(())
}

/// All state rows, optionally restricted to one source type, ordered by path.
pub fn list_states(conn: &Connection, source_type: Option<&str>) -> Result<Vec<IngestionState>> {
    let mut stmt = conn.prepare(
        "SELECT source_type, source_path, content_hash, ingested_at, memories_created
         FROM ingestion_state
         WHERE (?1 IS NULL OR source_type = ?1)
         ORDER BY source_type, source_path",
    )?;
    let rows = stmt
        .query_map(params![source_type], state_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Forget the state for a source type so the next run re-extracts everything.
pub fn clear_states(conn: &Connection, source_type: &str) -> Result<usize> {
    let n = conn.execute("DELETE FROM ingestion_state WHERE source_type = ?1", params![source_type])?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn record_then_get_and_overwrite() {
        let conn = db::open_in_memory().unwrap();
        assert!(get_state(&conn, "file", "/notes/a.md").unwrap().is_none());

        record_state(&conn, "file", "/notes/a.md", "h1", 3).unwrap();
        let s = get_state(&conn, "file", "/notes/a.md").unwrap().unwrap();
        assert_eq!(s.content_hash, "h1");
        assert_eq!(s.memories_created, 3);

        record_state(&conn, "file", "/notes/a.md", "h2", 0).unwrap();
        let s = get_state(&conn, "file", "/notes/a.md").unwrap().unwrap();
        assert_eq!(s.content_hash, "h2");
        assert_eq!(s.memories_created, 0);
    }

    #[test]
    fn source_types_are_separate_namespaces() {
        let conn = db::open_in_memory().unwrap();
        record_state(&conn, "file", "x", "h", 1).unwrap();
        record_state(&conn, "transcript", "x", "h", 1).unwrap();

        assert_eq!(list_states(&conn, None).unwrap().len(), 2);
        assert_eq!(list_states(&conn, Some("file")).unwrap().len(), 1);

        assert_eq!(clear_states(&conn, "file").unwrap(), 1);
        assert!(get_state(&conn, "file", "x").unwrap().is_none());
        assert!(get_state(&conn, "transcript", "x").unwrap().is_some());
    }
}
