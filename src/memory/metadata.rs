//! Type-specific extension rows, one per owning memory.
//!
//! Each table is keyed by the owning memory's storage id and cascade-deleted
//! with it. Writes are upserts: a second write for the same memory replaces the
//! previous values.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::types::MemoryType;
use super::{format_ts, parse_ts};

/// How a routine is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    #[default]
    Manual,
    Cron,
    Event,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Cron => "cron",
            Self::Event => "event",
        }
    }

    /// Unrecognized values read back as the default.
    pub fn parse_lossy(s: &str) -> Self {
        match s {
            "cron" => Self::Cron,
            "event" => Self::Event,
            _ => Self::Manual,
        }
    }
}

/// How much a routine may do without asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Autonomy {
    #[default]
    Suggest,
    Confirm,
    Autonomous,
}

impl Autonomy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Suggest => "suggest",
            Self::Confirm => "confirm",
            Self::Autonomous => "autonomous",
        }
    }

    pub fn parse_lossy(s: &str) -> Self {
        match s {
            "confirm" => Self::Confirm,
            "autonomous" => Self::Autonomous,
            _ => Self::Suggest,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    #[default]
    Positive,
    Negative,
    Correction,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Correction => "correction",
        }
    }

    pub fn parse_lossy(s: &str) -> Self {
        match s {
            "negative" => Self::Negative,
            "correction" => Self::Correction,
            _ => Self::Positive,
        }
    }
}

/// Resolution state of a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    #[default]
    Pending,
    Confirmed,
    Refuted,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Refuted => "refuted",
        }
    }

    pub fn parse_lossy(s: &str) -> Self {
        match s {
            "confirmed" => Self::Confirmed,
            "refuted" => Self::Refuted,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RoutineMetadata {
    pub trigger_kind: TriggerKind,
    /// Cron expression, event name, or empty for manual routines.
    pub trigger_value: String,
    pub autonomy: Autonomy,
    pub run_count: u64,
    pub success_count: u64,
    pub last_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeedbackMetadata {
    pub sentiment: Sentiment,
    /// The memory this feedback is about, if any.
    pub target_uid: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnomalyMetadata {
    pub metric: String,
    pub expected: Option<f64>,
    pub observed: Option<f64>,
    pub deviation: Option<f64>,
    pub resolved: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CorrelationMetadata {
    pub antecedent: String,
    pub consequent: String,
    pub strength: f64,
    pub occurrences: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PredictionMetadata {
    pub expected_at: Option<DateTime<Utc>>,
    pub outcome: Outcome,
    pub resolved_at: Option<DateTime<Utc>>,
}

fn opt_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref().and_then(parse_ts)
}

// ── Routine ──

pub fn upsert_routine_metadata(conn: &Connection, memory_id: i64, meta: &RoutineMetadata) -> Result<()> {
    conn.execute(
        "INSERT INTO routine_metadata \
             (memory_id, trigger_kind, trigger_value, autonomy, run_count, success_count, last_run_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
         ON CONFLICT(memory_id) DO UPDATE SET \
             trigger_kind = excluded.trigger_kind, trigger_value = excluded.trigger_value, \
             autonomy = excluded.autonomy, run_count = excluded.run_count, \
             success_count = excluded.success_count, last_run_at = excluded.last_run_at",
        params![
            memory_id,
            meta.trigger_kind.as_str(),
            meta.trigger_value,
            meta.autonomy.as_str(),
            meta.run_count as i64,
            meta.success_count as i64,
            meta.last_run_at.as_ref().map(format_ts),
        ],
    )?;
    Ok(())
}

pub fn get_routine_metadata(conn: &Connection, memory_id: i64) -> Result<Option<RoutineMetadata>> {
    Ok(conn
        .query_row(
            "SELECT trigger_kind, trigger_value, autonomy, run_count, success_count, last_run_at \
             FROM routine_metadata WHERE memory_id = ?1",
            params![memory_id],
            |row| {
                Ok(RoutineMetadata {
                    trigger_kind: TriggerKind::parse_lossy(&row.get::<_, String>(0)?),
                    trigger_value: row.get(1)?,
                    autonomy: Autonomy::parse_lossy(&row.get::<_, String>(2)?),
                    run_count: row.get::<_, i64>(3)?.max(0) as u64,
                    success_count: row.get::<_, i64>(4)?.max(0) as u64,
                    last_run_at: opt_ts(row.get(5)?),
                })
            },
        )
        .optional()?)
}

// ── Feedback ──

pub fn upsert_feedback_metadata(conn: &Connection, memory_id: i64, meta: &FeedbackMetadata) -> Result<()> {
    conn.execute(
        "INSERT INTO feedback_metadata (memory_id, sentiment, target_uid, context) \
         VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(memory_id) DO UPDATE SET \
             sentiment = excluded.sentiment, target_uid = excluded.target_uid, context = excluded.context",
        params![memory_id, meta.sentiment.as_str(), meta.target_uid, meta.context],
    )?;
    Ok(())
}

pub fn get_feedback_metadata(conn: &Connection, memory_id: i64) -> Result<Option<FeedbackMetadata>> {
    Ok(conn
        .query_row(
            "SELECT sentiment, target_uid, context FROM feedback_metadata WHERE memory_id = ?1",
            params![memory_id],
            |row| {
                Ok(FeedbackMetadata {
                    sentiment: Sentiment::parse_lossy(&row.get::<_, String>(0)?),
                    target_uid: row.get(1)?,
                    context: row.get(2)?,
                })
            },
        )
        .optional()?)
}

// ── Anomaly ──

pub fn upsert_anomaly_metadata(conn: &Connection, memory_id: i64, meta: &AnomalyMetadata) -> Result<()> {
    conn.execute(
        "INSERT INTO anomaly_metadata (memory_id, metric, expected, observed, deviation, resolved) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT(memory_id) DO UPDATE SET \
             metric = excluded.metric, expected = excluded.expected, observed = excluded.observed, \
             deviation = excluded.deviation, resolved = excluded.resolved",
        params![memory_id, meta.metric, meta.expected, meta.observed, meta.deviation, meta.resolved],
    )?;
    Ok(())
}

pub fn get_anomaly_metadata(conn: &Connection, memory_id: i64) -> Result<Option<AnomalyMetadata>> {
    Ok(conn
        .query_row(
            "SELECT metric, expected, observed, deviation, resolved FROM anomaly_metadata WHERE memory_id = ?1",
            params![memory_id],
            |row| {
                Ok(AnomalyMetadata {
                    metric: row.get(0)?,
                    expected: row.get(1)?,
                    observed: row.get(2)?,
                    deviation: row.get(3)?,
                    resolved: row.get(4)?,
                })
            },
        )
        .optional()?)
}

// ── Correlation ──

pub fn upsert_correlation_metadata(conn: &Connection, memory_id: i64, meta: &CorrelationMetadata) -> Result<()> {
    conn.execute(
        "INSERT INTO correlation_metadata (memory_id, antecedent, consequent, strength, occurrences) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(memory_id) DO UPDATE SET \
             antecedent = excluded.antecedent, consequent = excluded.consequent, \
             strength = excluded.strength, occurrences = excluded.occurrences",
        params![
            memory_id,
            meta.antecedent,
            meta.consequent,
            meta.strength,
            meta.occurrences as i64
        ],
    )?;
    Ok(())
}

pub fn get_correlation_metadata(conn: &Connection, memory_id: i64) -> Result<Option<CorrelationMetadata>> {
    Ok(conn
        .query_row(
            "SELECT antecedent, consequent, strength, occurrences FROM correlation_metadata WHERE memory_id = ?1",
            params![memory_id],
            |row| {
                Ok(CorrelationMetadata {
                    antecedent: row.get(0)?,
                    consequent: row.get(1)?,
                    strength: row.get(2)?,
                    occurrences: row.get::<_, i64>(3)?.max(0) as u64,
                })
            },
        )
        .optional()?)
}

// ── Prediction ──

pub fn upsert_prediction_metadata(conn: &Connection, memory_id: i64, meta: &PredictionMetadata) -> Result<()> {
    conn.execute(
        "INSERT INTO prediction_metadata (memory_id, expected_at, outcome, resolved_at) \
         VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(memory_id) DO UPDATE SET \
             expected_at = excluded.expected_at, outcome = excluded.outcome, resolved_at = excluded.resolved_at",
        params![
            memory_id,
            meta.expected_at.as_ref().map(format_ts),
            meta.outcome.as_str(),
            meta.resolved_at.as_ref().map(format_ts),
        ],
    )?;
    Ok(())
}

pub fn get_prediction_metadata(conn: &Connection, memory_id: i64) -> Result<Option<PredictionMetadata>> {
    Ok(conn
        .query_row(
            "SELECT expected_at, outcome, resolved_at FROM prediction_metadata WHERE memory_id = ?1",
            params![memory_id],
            |row| {
                Ok(PredictionMetadata {
                    expected_at: opt_ts(row.get(0)?),
                    outcome: Outcome::parse_lossy(&row.get::<_, String>(1)?),
                    resolved_at: opt_ts(row.get(2)?),
                })
            },
        )
        .optional()?)
}

// ── Dispatch ──

/// Metadata for any pattern-like memory, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Metadata {
    Routine(RoutineMetadata),
    Feedback(FeedbackMetadata),
    Anomaly(AnomalyMetadata),
    Correlation(CorrelationMetadata),
    Prediction(PredictionMetadata),
}

impl Metadata {
    /// The memory type whose extension table holds this variant.
    pub fn memory_type(&self) -> MemoryType {
        match self {
            Self::Routine(_) => MemoryType::Routine,
            Self::Feedback(_) => MemoryType::Feedback,
            Self::Anomaly(_) => MemoryType::Anomaly,
            Self::Correlation(_) => MemoryType::Correlation,
            Self::Prediction(_) => MemoryType::Prediction,
        }
    }
}

pub fn upsert_metadata(conn: &Connection, memory_id: i64, meta: &Metadata) -> Result<()> {
    match meta {
        Metadata::Routine(m) => upsert_routine_metadata(conn, memory_id, m),
        Metadata::Feedback(m) => upsert_feedback_metadata(conn, memory_id, m),
        Metadata::Anomaly(m) => upsert_anomaly_metadata(conn, memory_id, m),
        Metadata::Correlation(m) => upsert_correlation_metadata(conn, memory_id, m),
        Metadata::Prediction(m) => upsert_prediction_metadata(conn, memory_id, m),
    }
}

/// Read the extension row matching `memory_type`. Types without a table
/// always yield `None`.
pub fn get_metadata(conn: &Connection, memory_id: i64, memory_type: MemoryType) -> Result<Option<Metadata>> {
    Ok(match memory_type {
        MemoryType::Routine => get_routine_metadata(conn, memory_id)?.map(Metadata::Routine),
        MemoryType::Feedback => get_feedback_metadata(conn, memory_id)?.map(Metadata::Feedback),
        MemoryType::Anomaly => get_anomaly_metadata(conn, memory_id)?.map(Metadata::Anomaly),
        MemoryType::Correlation => get_correlation_metadata(conn, memory_id)?.map(Metadata::Correlation),
        MemoryType::Prediction => get_prediction_metadata(conn, memory_id)?.map(Metadata::Prediction),
        _ => None,
    })
}
