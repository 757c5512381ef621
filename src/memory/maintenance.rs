use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use croner::Cron;
use rusqlite::{params, params_from_iter, Connection};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::associations::create_association;
use super::query::{Direction, QueryBuilder, SortKey};
use super::types::{Memory, MemoryType, NewAssociation, RelationType};
use super::{cosine_similarity, format_ts, parse_ts};
use crate::config::MaintenanceConfig;

// ── Result types ─────────────────────────────────────────────────────────────

/// Rows affected by each pass of one maintenance run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MaintenanceReport {
    pub importance_decayed: usize,
    pub confidence_decayed: usize,
    pub boosted: usize,
    pub forgotten: usize,
    pub purged: usize,
    pub triggers_updated: usize,
    pub merged: usize,
}

/// A single keeper/duplicate pair resolved by [`Maintainer::merge_duplicates`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedPair {
    pub keeper_uid: String,
    pub duplicate_uid: String,
    pub similarity: f64,
}

// ── Maintainer ───────────────────────────────────────────────────────────────

/// Runs the maintenance passes. Every pass is idempotent for a fixed `now`
/// and can be called on its own.
pub struct Maintainer {
    config: MaintenanceConfig,
}

impl Maintainer {
    pub fn new(config: MaintenanceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    /// Run every pass in order and aggregate the affected counts.
    ///
    /// `active_model` restricts duplicate detection to embeddings from the
    /// current provider.
    pub fn run(&self, conn: &Connection, active_model: Option<&str>) -> Result<MaintenanceReport> {
        let now = Utc::now();
        let report = MaintenanceReport {
            importance_decayed: self.decay_importance(conn)?,
            confidence_decayed: self.decay_confidence(conn)?,
            boosted: self.boost_recently_accessed(conn, now)?,
            forgotten: self.forget_low_importance(conn, now)?,
            purged: self.purge_forgotten(conn, now)?,
            triggers_updated: self.recompute_triggers(conn, now)?,
            merged: self.merge_duplicates(conn, active_model)?.len(),
        };

        info!(
            importance_decayed = report.importance_decayed,
            confidence_decayed = report.confidence_decayed,
            boosted = report.boosted,
            forgotten = report.forgotten,
            purged = report.purged,
            triggers_updated = report.triggers_updated,
            merged = report.merged,
            "maintenance run complete"
        );
        Ok(report)
    }

    // ── Decay ──

    /// Multiply importance by the daily rate for every active non-identity
    /// memory above the floor. Results stay within [0, 1] whatever the rate.
    pub fn decay_importance(&self, conn: &Connection) -> Result<usize> {
        let affected = conn.execute(
            "UPDATE memories SET importance = MAX(0.0, MIN(1.0, importance * ?1)) \
             WHERE type != 'identity' AND forgotten = 0 AND importance > ?2",
            params![self.config.importance_decay_rate, self.config.min_importance],
        )?;
        debug!(affected, "importance decayed");
        Ok(affected)
    }

    /// Multiply confidence by its own rate, for pattern types only. Rows
    /// without a confidence are never touched.
    pub fn decay_confidence(&self, conn: &Connection) -> Result<usize> {
        let affected = conn.execute(
            "UPDATE memories SET confidence = MAX(0.0, MIN(1.0, confidence * ?1)) \
             WHERE type IN ('routine', 'correlation', 'prediction') AND forgotten = 0 \
               AND confidence >= 0 AND confidence > ?2",
            params![self.config.confidence_decay_rate, self.config.min_confidence],
        )?;
        debug!(affected, "confidence decayed");
        Ok(affected)
    }

    /// Add the access boost to memories used in the 24 hours before `now`,
    /// capped at the configured maximum.
    pub fn boost_recently_accessed(&self, conn: &Connection, now: DateTime<Utc>) -> Result<usize> {
        let since = format_ts(&(now - Duration::hours(24)));
        let affected = conn.execute(
            "UPDATE memories SET importance = MAX(0.0, MIN(1.0, ?1, importance + ?2)) \
             WHERE forgotten = 0 AND access_count >= 1 AND last_accessed_at >= ?3 AND importance < ?1",
            params![self.config.max_importance, self.config.access_boost, since],
        )?;
        debug!(affected, "recently accessed memories boosted");
        Ok(affected)
    }

    // ── Pruning ──

    /// Soft-delete every non-identity memory whose importance fell below the floor.
    pub fn forget_low_importance(&self, conn: &Connection, now: DateTime<Utc>) -> Result<usize> {
        let now = format_ts(&now);
        let affected = conn.execute(
            "UPDATE memories SET forgotten = 1, forgotten_at = ?1, updated_at = ?1 \
             WHERE type != 'identity' AND forgotten = 0 AND importance < ?2",
            params![now, self.config.min_importance],
        )?;
        debug!(affected, "low-importance memories forgotten");
        Ok(affected)
    }

    /// Hard-delete memories forgotten longer than the retention window.
    pub fn purge_forgotten(&self, conn: &Connection, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = format_ts(&(now - Duration::days(self.config.forgotten_retention_days)));
        let affected = conn.execute(
            "DELETE FROM memories WHERE forgotten = 1 AND COALESCE(forgotten_at, updated_at) < ?1",
            params![cutoff],
        )?;
        if affected > 0 {
            info!(affected, "purged forgotten memories past retention");
        }
        Ok(affected)
    }

    // ── Triggers ──

    /// Recompute `next_trigger_at` for active routines with a cron trigger.
    ///
    /// Only rows whose next occurrence actually changed are written. An
    /// unparseable expression is logged and the routine left as is.
    pub fn recompute_triggers(&self, conn: &Connection, now: DateTime<Utc>) -> Result<usize> {
        let clause = QueryBuilder::new().memory_type(MemoryType::Routine).where_clause();
        let sql = format!(
            "SELECT m.uid, m.next_trigger_at, r.trigger_value FROM memories m \
             JOIN routine_metadata r ON r.memory_id = m.id \
             WHERE r.trigger_kind = 'cron' AND {}",
            clause.sql
        );
        let routines: Vec<(String, Option<String>, String)> = {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(clause.params.iter()), |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut updated = 0;
        for (uid, current, expr) in routines {
            let Some(next) = next_cron_occurrence(&expr, now) else {
                continue;
            };
            if current.as_deref().and_then(parse_ts) == Some(next) {
                continue;
            }
            updated += conn.execute(
                "UPDATE memories SET next_trigger_at = ?1 WHERE uid = ?2",
                params![format_ts(&next), uid],
            )?;
        }
        debug!(updated, "routine triggers recomputed");
        Ok(updated)
    }

    // ── Duplicate merge ──

    /// Merge near-duplicate memories by embedding similarity.
    ///
    /// Candidates are ordered by importance (desc) then creation (asc); the
    /// earlier of a pair is the keeper. The keeper takes the summed access
    /// count and the larger importance, gains an `updates` edge to the
    /// duplicate, and the duplicate is forgotten. A memory joins at most one
    /// merge per run. Identity memories are never forgotten here, so they can
    /// only keep.
    pub fn merge_duplicates(&self, conn: &Connection, active_model: Option<&str>) -> Result<Vec<MergedPair>> {
        let mut builder = QueryBuilder::new().unlimited();
        if let Some(model) = active_model {
            builder = builder.with_embedding(model, None);
        }
        let mut candidates: Vec<Memory> = builder
            .execute(conn)?
            .into_iter()
            .filter(|m| m.embedding.as_ref().is_some_and(|e| !e.is_empty()))
            .collect();
        candidates.sort_by(|a, b| {
            b.importance
                .total_cmp(&a.importance)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });

        let threshold = self.config.duplicate_threshold;
        let mut merged: HashSet<usize> = HashSet::new();
        let mut pairs = Vec::new();

        for i in 0..candidates.len() {
            if merged.contains(&i) {
                continue;
            }
            for j in (i + 1)..candidates.len() {
                if merged.contains(&j) || candidates[j].memory_type == MemoryType::Identity {
                    continue;
                }
                let (Some(a), Some(b)) = (&candidates[i].embedding, &candidates[j].embedding) else {
                    continue;
                };
                let similarity = cosine_similarity(a, b);
                if similarity < threshold {
                    continue;
                }

                merge_pair(conn, &candidates[i], &candidates[j])?;
                debug!(
                    keeper = %candidates[i].uid,
                    duplicate = %candidates[j].uid,
                    similarity,
                    "merged duplicate memory"
                );
                pairs.push(MergedPair {
                    keeper_uid: candidates[i].uid.clone(),
                    duplicate_uid: candidates[j].uid.clone(),
                    similarity,
                });
                merged.insert(i);
                merged.insert(j);
                break;
            }
        }

        Ok(pairs)
    }
}

fn merge_pair(conn: &Connection, keeper: &Memory, duplicate: &Memory) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    let now = format_ts(&Utc::now());
    let access_count = keeper.access_count.saturating_add(duplicate.access_count);

    tx.execute(
        "UPDATE memories SET access_count = ?1, importance = ?2, updated_at = ?3 WHERE uid = ?4",
        params![
            access_count as i64,
            keeper.importance.max(duplicate.importance),
            now,
            keeper.uid
        ],
    )?;
    create_association(
        &tx,
        NewAssociation::new(&keeper.uid, RelationType::Updates, &duplicate.uid),
    )?;
    tx.execute(
        "UPDATE memories SET forgotten = 1, forgotten_at = ?1, updated_at = ?1 WHERE uid = ?2",
        params![now, duplicate.uid],
    )?;
    tx.commit()?;
    Ok(())
}

/// Next occurrence of a cron expression strictly after `now`, or `None` if the
/// expression does not parse or never fires.
pub fn next_cron_occurrence(expr: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let cron: Cron = match expr.trim().parse() {
        Ok(cron) => cron,
        Err(e) => {
            warn!(expression = expr, error = %e, "invalid cron expression, skipping");
            return None;
        }
    };
    match cron.find_next_occurrence(&now, false) {
        Ok(next) => Some(next),
        Err(e) => {
            warn!(expression = expr, error = %e, "cron expression has no next occurrence");
            None
        }
    }
}

/// Active routines whose trigger time has passed, earliest first.
pub fn due_routines(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<Memory>> {
    QueryBuilder::new()
        .memory_type(MemoryType::Routine)
        .trigger_due_before(now)
        .sort_by(SortKey::NextTrigger, Direction::Asc)
        .unlimited()
        .execute(conn)
}
