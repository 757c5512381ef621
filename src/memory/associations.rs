//! Typed edges between memories and bounded neighbor traversal.
//!
//! Associations are immutable once written. Creating the same
//! (source, relation, target) edge twice returns the existing row flagged as
//! deduplicated; for undirected relations the reversed pair counts as the same
//! edge.

use std::collections::HashMap;

use anyhow::{bail, Result};
use chrono::{SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::types::{Association, NewAssociation, RelationType};
use super::{format_ts, parse_ts};
use crate::error::GraphError;

const ASSOCIATION_COLUMNS: &str = "uid, source_uid, target_uid, relation, weight, directed, created_at";

/// Result returned from [`create_association`].
#[derive(Debug, Serialize)]
pub struct AssociationResult {
    pub association: Association,
    /// `true` if this edge already existed.
    pub deduplicated: bool,
}

/// A memory reachable from a traversal origin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbor {
    pub uid: String,
    /// Product of edge weights along the best path.
    pub score: f64,
    /// Hops from the origin along that path.
    pub depth: usize,
}

fn association_from_row(row: &Row) -> rusqlite::Result<Association> {
    let relation: String = row.get(3)?;
    let created: String = row.get(6)?;
    Ok(Association {
        uid: row.get(0)?,
        source_uid: row.get(1)?,
        target_uid: row.get(2)?,
        relation: relation
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?,
        weight: row.get(4)?,
        directed: row.get(5)?,
        created_at: parse_ts(&created).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(6, Type::Text, format!("invalid timestamp: {created}").into())
        })?,
    })
}

fn ensure_memory_exists(conn: &Connection, uid: &str) -> Result<()> {
    let found: Option<i64> = conn
        .query_row("SELECT id FROM memories WHERE uid = ?1", params![uid], |row| row.get(0))
        .optional()?;
    match found {
        Some(_) => Ok(()),
        None => Err(GraphError::MemoryNotFound(uid.to_string()).into()),
    }
}

fn find_existing(
    conn: &Connection,
    source: &str,
    target: &str,
    relation: RelationType,
) -> Result<Option<Association>> {
    let sql = format!(
        "SELECT {ASSOCIATION_COLUMNS} FROM associations \
         WHERE relation = ?3 AND ((source_uid = ?1 AND target_uid = ?2) \
            OR (directed = 0 AND source_uid = ?2 AND target_uid = ?1)) \
         LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, params![source, target, relation.as_str()], association_from_row)
        .optional()?)
}

/// Store an edge between two existing memories.
///
/// Fails with [`GraphError::MemoryNotFound`] when either endpoint is missing.
/// Weight defaults to 1.0 and is clamped to `[0, 1]`; directedness defaults
/// per relation.
pub fn create_association(conn: &Connection, new: NewAssociation) -> Result<AssociationResult> {
    if new.source_uid == new.target_uid {
        bail!("association endpoints must differ: {}", new.source_uid);
    }
    ensure_memory_exists(conn, &new.source_uid)?;
    ensure_memory_exists(conn, &new.target_uid)?;

    if let Some(existing) = find_existing(conn, &new.source_uid, &new.target_uid, new.relation)? {
        return Ok(AssociationResult {
            association: existing,
            deduplicated: true,
        });
    }

    let weight = new.weight.filter(|w| w.is_finite()).unwrap_or(1.0).clamp(0.0, 1.0);
    let directed = new.directed.unwrap_or_else(|| new.relation.default_directed());
    // stored with microsecond precision
    let now = Utc::now().trunc_subsecs(6);
    let association = Association {
        uid: uuid::Uuid::now_v7().to_string(),
        source_uid: new.source_uid,
        target_uid: new.target_uid,
        relation: new.relation,
        weight,
        directed,
        created_at: now,
    };

    conn.execute(
        "INSERT INTO associations (uid, source_uid, target_uid, relation, weight, directed, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            association.uid,
            association.source_uid,
            association.target_uid,
            association.relation.as_str(),
            weight,
            directed,
            format_ts(&now),
        ],
    )?;

    tracing::debug!(
        source = %association.source_uid,
        target = %association.target_uid,
        relation = %association.relation,
        "association created"
    );

    Ok(AssociationResult {
        association,
        deduplicated: false,
    })
}

pub fn get_association(conn: &Connection, uid: &str) -> Result<Option<Association>> {
    let sql = format!("SELECT {ASSOCIATION_COLUMNS} FROM associations WHERE uid = ?1");
    Ok(conn.query_row(&sql, params![uid], association_from_row).optional()?)
}

/// Every edge touching `uid`, in either role, oldest first.
pub fn associations_for(conn: &Connection, uid: &str) -> Result<Vec<Association>> {
    let sql = format!(
        "SELECT {ASSOCIATION_COLUMNS} FROM associations \
         WHERE source_uid = ?1 OR target_uid = ?1 ORDER BY id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![uid], association_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete_association(conn: &Connection, uid: &str) -> Result<bool> {
    let rows = conn.execute("DELETE FROM associations WHERE uid = ?1", params![uid])?;
    Ok(rows > 0)
}

/// Memories reachable from `origin` within `depth` hops.
///
/// Undirected edges are followed both ways, directed edges only from source to
/// target. When several paths reach a node the highest-scoring one wins. The
/// origin itself is never returned. Sorted by score descending.
pub fn neighbors(conn: &Connection, origin: &str, depth: usize) -> Result<Vec<Neighbor>> {
    let mut stmt = conn.prepare(
        "SELECT source_uid, target_uid, weight FROM associations \
         WHERE source_uid = ?1 OR (directed = 0 AND target_uid = ?1)",
    )?;

    let mut best: HashMap<String, (f64, usize)> = HashMap::new();
    let mut frontier: Vec<(String, f64)> = vec![(origin.to_string(), 1.0)];

    for hop in 1..=depth {
        let mut next = Vec::new();
        for (node, score) in &frontier {
            let edges = stmt
                .query_map(params![node], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, f64>(2)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            for (source, target, weight) in edges {
                let other = if source == *node { target } else { source };
                if other == origin {
                    continue;
                }
                let candidate = score * weight;
                let improved = best.get(&other).map_or(true, |(s, _)| candidate > *s);
                if improved {
                    best.insert(other.clone(), (candidate, hop));
                    next.push((other, candidate));
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }

    let mut out: Vec<Neighbor> = best
        .into_iter()
        .map(|(uid, (score, depth))| Neighbor { uid, score, depth })
        .collect();
    out.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.uid.cmp(&b.uid)));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::memory::store::{create_memory, delete_memory};
    use crate::memory::types::{MemoryType, NewMemory};

    fn memory(conn: &Connection, content: &str) -> String {
        create_memory(conn, NewMemory::new(content, MemoryType::Fact)).unwrap().uid
    }

    #[test]
    fn test_create_and_dedup() {
        let conn = db::open_in_memory().unwrap();
        let a = memory(&conn, "Owns a bicycle");
        let b = memory(&conn, "Commutes by bike");

        let first = create_association(&conn, NewAssociation::new(&a, RelationType::RelatedTo, &b)).unwrap();
        assert!(!first.deduplicated);
        assert!(!first.association.directed);
        assert_eq!(first.association.weight, 1.0);

        // reversed undirected edge is the same edge
        let reversed = create_association(&conn, NewAssociation::new(&b, RelationType::RelatedTo, &a)).unwrap();
        assert!(reversed.deduplicated);
        assert_eq!(reversed.association.uid, first.association.uid);

        let fetched = get_association(&conn, &first.association.uid).unwrap().unwrap();
        assert_eq!(fetched, first.association);
    }

    #[test]
    fn test_directed_reverse_is_distinct() {
        let conn = db::open_in_memory().unwrap();
        let a = memory(&conn, "new address");
        let b = memory(&conn, "old address");

        create_association(&conn, NewAssociation::new(&a, RelationType::Updates, &b)).unwrap();
        let reverse = create_association(&conn, NewAssociation::new(&b, RelationType::Updates, &a)).unwrap();
        assert!(!reverse.deduplicated);
        assert_eq!(associations_for(&conn, &a).unwrap().len(), 2);
    }

    #[test]
    fn test_missing_endpoint() {
        let conn = db::open_in_memory().unwrap();
        let a = memory(&conn, "exists");
        let err = create_association(&conn, NewAssociation::new(&a, RelationType::PartOf, "ghost")).unwrap_err();
        assert_eq!(
            err.downcast_ref::<GraphError>(),
            Some(&GraphError::MemoryNotFound("ghost".into()))
        );
        assert!(create_association(&conn, NewAssociation::new(&a, RelationType::PartOf, &a)).is_err());
    }

    #[test]
    fn test_cascade_on_memory_delete() {
        let conn = db::open_in_memory().unwrap();
        let a = memory(&conn, "a");
        let b = memory(&conn, "b");
        let edge = create_association(&conn, NewAssociation::new(&a, RelationType::Triggers, &b)).unwrap();

        delete_memory(&conn, &b).unwrap();
        assert!(get_association(&conn, &edge.association.uid).unwrap().is_none());
    }

    #[test]
    fn test_neighbors_respect_direction_and_depth() {
        let conn = db::open_in_memory().unwrap();
        let a = memory(&conn, "a");
        let b = memory(&conn, "b");
        let c = memory(&conn, "c");
        let d = memory(&conn, "d");

        create_association(&conn, NewAssociation::new(&a, RelationType::RelatedTo, &b).with_weight(0.5)).unwrap();
        create_association(&conn, NewAssociation::new(&b, RelationType::CausedBy, &c).with_weight(0.8)).unwrap();
        // points into a; not walkable from a
        create_association(&conn, NewAssociation::new(&d, RelationType::Triggers, &a)).unwrap();

        let one = neighbors(&conn, &a, 1).unwrap();
        assert_eq!(one, vec![Neighbor { uid: b.clone(), score: 0.5, depth: 1 }]);

        let two = neighbors(&conn, &a, 2).unwrap();
        assert_eq!(two.len(), 2);
        assert_eq!(two[1].uid, c);
        assert!((two[1].score - 0.4).abs() < 1e-9);

        // undirected edge walks back from b
        let from_b = neighbors(&conn, &b, 1).unwrap();
        let uids: Vec<&str> = from_b.iter().map(|n| n.uid.as_str()).collect();
        assert!(uids.contains(&a.as_str()));
        assert!(uids.contains(&c.as_str()));

        assert!(neighbors(&conn, &a, 0).unwrap().is_empty());
    }

    #[test]
    fn test_delete_association() {
        let conn = db::open_in_memory().unwrap();
        let a = memory(&conn, "a");
        let b = memory(&conn, "b");
        let edge = create_association(&conn, NewAssociation::new(&a, RelationType::Reinforces, &b)).unwrap();
        assert!(delete_association(&conn, &edge.association.uid).unwrap());
        assert!(!delete_association(&conn, &edge.association.uid).unwrap());
    }
}
