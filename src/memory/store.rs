//! CRUD and lifecycle operations on the `memories` table.
//!
//! Absence is not an error here: single-entity lookups return `Ok(None)` and
//! mutations report whether a row was touched. Embeddings are only ever written
//! through [`update_embedding`] so the stored model name cannot drift from the
//! vector.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::types::{Memory, MemoryType, NewMemory, Provenance, SourceKind, CONFIDENCE_NOT_APPLICABLE};
use super::{bytes_to_embedding, embedding_to_bytes, format_ts, parse_ts};

/// Column list matching [`memory_from_row`]. Tables must be aliased `m`.
pub const MEMORY_COLUMNS: &str = "m.id, m.uid, m.content, m.type, m.importance, m.confidence, \
     m.created_at, m.updated_at, m.last_accessed_at, m.access_count, m.next_trigger_at, \
     m.source_kind, m.session_id, m.message_id, m.username, m.channel, m.chat_id, \
     m.forgotten, m.forgotten_at, m.embedding, m.embedding_model";

/// Number of columns in [`MEMORY_COLUMNS`]; extra projected columns start here.
pub const MEMORY_COLUMN_COUNT: usize = 21;

pub(crate) fn ts_col(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp: {raw}").into(),
        )
    })
}

fn opt_ts_col(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.as_deref().and_then(parse_ts))
}

/// Map a row selected with [`MEMORY_COLUMNS`] into a [`Memory`].
pub fn memory_from_row(row: &Row) -> rusqlite::Result<Memory> {
    let type_str: String = row.get(3)?;
    let memory_type: MemoryType = type_str
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
    let confidence: f64 = row.get(5)?;
    let access_count: i64 = row.get(9)?;
    let source_kind: String = row.get(11)?;
    let embedding: Option<Vec<u8>> = row.get(19)?;

    Ok(Memory {
        id: row.get(0)?,
        uid: row.get(1)?,
        content: row.get(2)?,
        memory_type,
        importance: row.get(4)?,
        confidence: (confidence >= 0.0).then_some(confidence),
        created_at: ts_col(row, 6)?,
        updated_at: ts_col(row, 7)?,
        last_accessed_at: opt_ts_col(row, 8)?,
        access_count: access_count.max(0) as u64,
        next_trigger_at: opt_ts_col(row, 10)?,
        provenance: Provenance {
            source_kind: SourceKind::parse_lossy(&source_kind),
            session_id: row.get(12)?,
            message_id: row.get(13)?,
            username: row.get(14)?,
            channel: row.get(15)?,
            chat_id: row.get(16)?,
        },
        forgotten: row.get(17)?,
        forgotten_at: opt_ts_col(row, 18)?,
        embedding: embedding.map(|b| bytes_to_embedding(&b)),
        embedding_model: row.get(20)?,
    })
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Persist a new memory, assigning its uid and any unset defaults.
///
/// Unset type falls back to `observation`; unset importance and confidence
/// take the type's defaults.
pub fn create_memory(conn: &Connection, new: NewMemory) -> Result<Memory> {
    let content = new.content.trim();
    if content.is_empty() {
        bail!("memory content must not be empty");
    }

    let memory_type = new.memory_type.unwrap_or(MemoryType::Observation);
    let importance = new
        .importance
        .filter(|i| i.is_finite())
        .map(clamp_unit)
        .unwrap_or_else(|| memory_type.default_importance());
    let confidence = new
        .confidence
        .map(clamp_unit)
        .or_else(|| memory_type.default_confidence());

    let uid = uuid::Uuid::now_v7().to_string();
    let now = format_ts(&Utc::now());
    let p = &new.provenance;

    conn.execute(
        "INSERT INTO memories (uid, content, type, importance, confidence, created_at, updated_at, \
         next_trigger_at, source_kind, session_id, message_id, username, channel, chat_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            uid,
            content,
            memory_type.as_str(),
            importance,
            confidence.unwrap_or(CONFIDENCE_NOT_APPLICABLE),
            now,
            new.next_trigger_at.as_ref().map(format_ts),
            p.source_kind.as_str(),
            p.session_id,
            p.message_id,
            p.username,
            p.channel,
            p.chat_id,
        ],
    )?;

    let id = conn.last_insert_rowid();
    tracing::debug!(memory_id = %uid, memory_type = %memory_type, importance, "memory created");

    get_memory_by_id(conn, id)?.context("inserted memory could not be read back")
}

/// Fetch a memory by its external uid.
pub fn get_memory(conn: &Connection, uid: &str) -> Result<Option<Memory>> {
    let sql = format!("SELECT {MEMORY_COLUMNS} FROM memories m WHERE m.uid = ?1");
    Ok(conn.query_row(&sql, params![uid], memory_from_row).optional()?)
}

/// Fetch a memory by its storage id.
pub fn get_memory_by_id(conn: &Connection, id: i64) -> Result<Option<Memory>> {
    let sql = format!("SELECT {MEMORY_COLUMNS} FROM memories m WHERE m.id = ?1");
    Ok(conn.query_row(&sql, params![id], memory_from_row).optional()?)
}

/// Rewrite every mutable field of an existing memory and refresh `updated_at`.
///
/// A content change drops the stored embedding, which no longer describes
/// the text. Returns `false` if the memory does not exist.
pub fn update_memory(conn: &Connection, memory: &Memory) -> Result<bool> {
    let content = memory.content.trim();
    if content.is_empty() {
        bail!("memory content must not be empty");
    }
    let p = &memory.provenance;

    // SET expressions see the old row, so the CASE compares old to new content
    let rows = conn.execute(
        "UPDATE memories SET \
             embedding = CASE WHEN content = ?2 THEN embedding ELSE NULL END, \
             embedding_model = CASE WHEN content = ?2 THEN embedding_model ELSE NULL END, \
             content = ?2, type = ?3, importance = ?4, confidence = ?5, next_trigger_at = ?6, \
             source_kind = ?7, session_id = ?8, message_id = ?9, username = ?10, channel = ?11, \
             chat_id = ?12, updated_at = ?13 \
         WHERE uid = ?1",
        params![
            memory.uid,
            content,
            memory.memory_type.as_str(),
            clamp_unit(memory.importance),
            memory
                .confidence
                .map(clamp_unit)
                .unwrap_or(CONFIDENCE_NOT_APPLICABLE),
            memory.next_trigger_at.as_ref().map(format_ts),
            p.source_kind.as_str(),
            p.session_id,
            p.message_id,
            p.username,
            p.channel,
            p.chat_id,
            format_ts(&Utc::now()),
        ],
    )?;
    Ok(rows > 0)
}

/// Soft delete. Returns `false` if the memory is missing or already forgotten.
pub fn forget_memory(conn: &Connection, uid: &str) -> Result<bool> {
    let now = format_ts(&Utc::now());
    let rows = conn.execute(
        "UPDATE memories SET forgotten = 1, forgotten_at = ?1, updated_at = ?1 \
         WHERE uid = ?2 AND forgotten = 0",
        params![now, uid],
    )?;
    Ok(rows > 0)
}

/// Hard delete. Associations and metadata go with it via cascade; the FTS
/// index follows through its delete trigger.
pub fn delete_memory(conn: &Connection, uid: &str) -> Result<bool> {
    let rows = conn.execute("DELETE FROM memories WHERE uid = ?1", params![uid])?;
    Ok(rows > 0)
}

/// Record one retrieval: bump `access_count` and refresh `last_accessed_at`
/// in a single statement.
pub fn touch_memory(conn: &Connection, uid: &str) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE memories SET access_count = access_count + 1, last_accessed_at = ?1 WHERE uid = ?2",
        params![format_ts(&Utc::now()), uid],
    )?;
    Ok(rows > 0)
}

/// Touch every memory in `uids`.
pub fn touch_memories(conn: &Connection, uids: &[&str]) -> Result<()> {
    if uids.is_empty() {
        return Ok(());
    }
    let now = format_ts(&Utc::now());
    let mut stmt = conn.prepare(
        "UPDATE memories SET access_count = access_count + 1, last_accessed_at = ?1 WHERE uid = ?2",
    )?;
    for uid in uids {
        stmt.execute(params![now, uid])?;
    }
    Ok(())
}

/// Store the embedding for a memory together with the model that produced it.
pub fn update_embedding(conn: &Connection, uid: &str, embedding: &[f32], model: &str) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE memories SET embedding = ?1, embedding_model = ?2 WHERE uid = ?3",
        params![embedding_to_bytes(embedding), model, uid],
    )?;
    Ok(rows > 0)
}

/// Drop embeddings produced by any model other than `active_model`.
///
/// Vectors from different models are not comparable; they are cleared rather
/// than migrated and get re-embedded by the backfill.
pub fn invalidate_embeddings(conn: &Connection, active_model: &str) -> Result<usize> {
    let rows = conn.execute(
        "UPDATE memories SET embedding = NULL, embedding_model = NULL \
         WHERE embedding IS NOT NULL AND (embedding_model IS NULL OR embedding_model != ?1)",
        params![active_model],
    )?;
    if rows > 0 {
        tracing::info!(invalidated = rows, model = active_model, "cleared stale embeddings");
    }
    Ok(rows)
}

/// Active memories that still need an embedding, oldest first: `(uid, content)`.
pub fn memories_missing_embedding(conn: &Connection, limit: usize) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT uid, content FROM memories \
         WHERE embedding IS NULL AND forgotten = 0 ORDER BY id LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
