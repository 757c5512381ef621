//! SQL DDL for every migration step.
//!
//! Each constant is one additive step applied by [`super::migrations`]. All DDL
//! uses `IF NOT EXISTS` so a step can be replayed safely.

/// Step 1: the memory node table.
pub const MEMORIES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid TEXT NOT NULL UNIQUE,
    content TEXT NOT NULL,
    type TEXT NOT NULL CHECK(type IN (
        'identity','fact','preference','decision','event','observation','goal',
        'todo','routine','feedback','anomaly','correlation','prediction'
    )),
    importance REAL NOT NULL DEFAULT 0.5 CHECK(importance >= 0.0 AND importance <= 1.0),
    -- -1.0 marks "not applicable" (only pattern types carry a confidence)
    confidence REAL NOT NULL DEFAULT -1.0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_accessed_at TEXT,
    access_count INTEGER NOT NULL DEFAULT 0,
    next_trigger_at TEXT,
    source_kind TEXT NOT NULL DEFAULT 'manual',
    session_id TEXT,
    message_id TEXT,
    username TEXT,
    channel TEXT,
    chat_id TEXT,
    forgotten INTEGER NOT NULL DEFAULT 0,
    forgotten_at TEXT,
    embedding BLOB,
    embedding_model TEXT
);

CREATE INDEX IF NOT EXISTS idx_memories_type ON memories(type);
CREATE INDEX IF NOT EXISTS idx_memories_username ON memories(username);
CREATE INDEX IF NOT EXISTS idx_memories_channel ON memories(channel);
CREATE INDEX IF NOT EXISTS idx_memories_importance ON memories(importance);
CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at);
CREATE INDEX IF NOT EXISTS idx_memories_forgotten ON memories(forgotten);
CREATE INDEX IF NOT EXISTS idx_memories_trigger ON memories(next_trigger_at);
"#;

/// Step 2: typed edges between memories, addressed by external uid.
pub const ASSOCIATIONS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS associations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid TEXT NOT NULL UNIQUE,
    source_uid TEXT NOT NULL REFERENCES memories(uid) ON DELETE CASCADE,
    target_uid TEXT NOT NULL REFERENCES memories(uid) ON DELETE CASCADE,
    relation TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 1.0 CHECK(weight >= 0.0 AND weight <= 1.0),
    directed INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    UNIQUE(source_uid, target_uid, relation)
);

CREATE INDEX IF NOT EXISTS idx_associations_source ON associations(source_uid);
CREATE INDEX IF NOT EXISTS idx_associations_target ON associations(target_uid);
CREATE INDEX IF NOT EXISTS idx_associations_relation ON associations(relation);
"#;

/// Step 3: one extension table per pattern-like memory type.
pub const METADATA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS routine_metadata (
    memory_id INTEGER PRIMARY KEY REFERENCES memories(id) ON DELETE CASCADE,
    trigger_kind TEXT NOT NULL,
    trigger_value TEXT NOT NULL DEFAULT '',
    autonomy TEXT NOT NULL DEFAULT 'suggest',
    run_count INTEGER NOT NULL DEFAULT 0,
    success_count INTEGER NOT NULL DEFAULT 0,
    last_run_at TEXT
);

CREATE TABLE IF NOT EXISTS feedback_metadata (
    memory_id INTEGER PRIMARY KEY REFERENCES memories(id) ON DELETE CASCADE,
    sentiment TEXT NOT NULL,
    target_uid TEXT,
    context TEXT
);

CREATE TABLE IF NOT EXISTS anomaly_metadata (
    memory_id INTEGER PRIMARY KEY REFERENCES memories(id) ON DELETE CASCADE,
    metric TEXT NOT NULL,
    expected REAL,
    observed REAL,
    deviation REAL,
    resolved INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS correlation_metadata (
    memory_id INTEGER PRIMARY KEY REFERENCES memories(id) ON DELETE CASCADE,
    antecedent TEXT NOT NULL,
    consequent TEXT NOT NULL,
    strength REAL NOT NULL DEFAULT 0.0,
    occurrences INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS prediction_metadata (
    memory_id INTEGER PRIMARY KEY REFERENCES memories(id) ON DELETE CASCADE,
    expected_at TEXT,
    outcome TEXT NOT NULL DEFAULT 'pending',
    resolved_at TEXT
);
"#;

/// Step 4: per-item ingestion bookkeeping.
pub const INGESTION_STATE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS ingestion_state (
    source_type TEXT NOT NULL,
    source_path TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    ingested_at TEXT NOT NULL,
    memories_created INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (source_type, source_path)
);
"#;

/// Step 5: BM25 full-text index over `memories.content`, kept in sync by triggers.
pub const FTS_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    content,
    content='memories',
    content_rowid='id'
);

CREATE TRIGGER IF NOT EXISTS memories_fts_insert AFTER INSERT ON memories BEGIN
    INSERT INTO memories_fts(rowid, content) VALUES (new.id, new.content);
END;

CREATE TRIGGER IF NOT EXISTS memories_fts_delete AFTER DELETE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, content) VALUES ('delete', old.id, old.content);
END;

CREATE TRIGGER IF NOT EXISTS memories_fts_update AFTER UPDATE OF content ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, content) VALUES ('delete', old.id, old.content);
    INSERT INTO memories_fts(rowid, content) VALUES (new.id, new.content);
END;

INSERT INTO memories_fts(memories_fts) VALUES ('rebuild');
"#;

/// Version bookkeeping table, created before any migration runs.
pub const SCHEMA_VERSION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
);
"#;
