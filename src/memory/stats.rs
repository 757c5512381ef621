use anyhow::Result;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use super::types::MemoryType;

/// Response from [`memory_stats`].
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_memories: u64,
    pub active_memories: u64,
    pub forgotten_memories: u64,
    pub by_type: BTreeMap<String, u64>,
    pub associations: u64,
    pub with_embedding: u64,
    pub ingested_items: u64,
    pub db_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_memory: Option<String>,
}

/// Compute memory store statistics.
///
/// If `username` is provided, memory counts are filtered to that user.
/// `db_path` is used for file size calculation; pass None for in-memory databases.
pub fn memory_stats(
    conn: &Connection,
    username: Option<&str>,
    db_path: Option<&Path>,
) -> Result<StatsResponse> {
    let user_filter = "(?1 IS NULL OR username = ?1)";

    let (total, active, with_embedding): (i64, i64, i64) = conn.query_row(
        &format!(
            "SELECT COUNT(*), \
                    COALESCE(SUM(CASE WHEN forgotten = 0 THEN 1 ELSE 0 END), 0), \
                    COALESCE(SUM(CASE WHEN embedding IS NOT NULL THEN 1 ELSE 0 END), 0) \
             FROM memories WHERE {user_filter}"
        ),
        params![username],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    let mut by_type: BTreeMap<String, u64> = MemoryType::ALL
        .iter()
        .map(|t| (t.as_str().to_string(), 0))
        .collect();
    {
        let mut stmt = conn.prepare(&format!(
            "SELECT type, COUNT(*) FROM memories WHERE forgotten = 0 AND {user_filter} GROUP BY type"
        ))?;
        let rows = stmt
            .query_map(params![username], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        for (t, count) in rows {
            by_type.insert(t, count as u64);
        }
    }

    let (oldest, newest): (Option<String>, Option<String>) = conn.query_row(
        &format!("SELECT MIN(created_at), MAX(created_at) FROM memories WHERE {user_filter}"),
        params![username],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let associations: i64 = conn.query_row("SELECT COUNT(*) FROM associations", [], |row| row.get(0))?;
    let ingested: i64 = conn.query_row("SELECT COUNT(*) FROM ingestion_state", [], |row| row.get(0))?;

    let db_size_bytes = db_path
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(StatsResponse {
        total_memories: total as u64,
        active_memories: active as u64,
        forgotten_memories: (total - active) as u64,
        by_type,
        associations: associations as u64,
        with_embedding: with_embedding as u64,
        ingested_items: ingested as u64,
        db_size_bytes,
        oldest_memory: oldest,
        newest_memory: newest,
    })
}
