//! Hybrid search: four retrieval strategies fused with weighted RRF.
//!
//! Each strategy produces its own candidate pool (`max_results × 4`). Pools
//! are ranked independently and combined by Reciprocal Rank Fusion, so the
//! incomparable raw score scales never meet. A failing strategy is logged and
//! reported in [`SearchResponse::degraded`]; it never fails the search.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::Result;
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use tracing::{debug, warn};

use super::associations::neighbors;
use super::embedding_to_bytes;
use super::query::QueryBuilder;
use super::types::Memory;
use crate::config::SearchConfig;

/// Candidate pool multiplier applied to `max_results` per source.
const POOL_FACTOR: usize = 4;

/// Recency decays by `exp(-RECENCY_LAMBDA × days)`.
const RECENCY_LAMBDA: f64 = 0.1;

const FTS_OPERATORS: [&str; 4] = ["and", "or", "not", "near"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSource {
    Vector,
    Keyword,
    Graph,
    Recency,
}

impl SearchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Keyword => "keyword",
            Self::Graph => "graph",
            Self::Recency => "recency",
        }
    }
}

impl std::fmt::Display for SearchSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Search input. Filters apply to every strategy.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Omitted for a pure filter listing.
    pub text: Option<String>,
    pub filter: QueryBuilder,
    /// Falls back to the configured default.
    pub max_results: Option<usize>,
    /// Enables graph search from this memory.
    pub context_uid: Option<String>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: QueryBuilder) -> Self {
        self.filter = filter;
        self
    }

    pub fn max_results(mut self, n: usize) -> Self {
        self.max_results = Some(n);
        self
    }

    pub fn context(mut self, uid: impl Into<String>) -> Self {
        self.context_uid = Some(uid.into());
        self
    }

    fn trimmed_text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

/// An embedded query and the model that produced it.
#[derive(Debug, Clone, Copy)]
pub struct QueryVector<'a> {
    pub embedding: &'a [f32],
    pub model: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub memory: Memory,
    /// Fused RRF score; 0 for filter listings.
    pub score: f64,
    /// 1-indexed position in the final ordering.
    pub rank: usize,
    /// Raw per-source scores, for observability.
    pub sources: BTreeMap<SearchSource, f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    /// Sources that failed and were left out of fusion.
    pub degraded: Vec<SearchSource>,
}

/// One strategy's candidates, in any order.
#[derive(Debug, Clone)]
pub struct SourceHits {
    pub source: SearchSource,
    pub weight: f64,
    pub hits: Vec<(String, f64)>,
}

pub struct Searcher {
    config: SearchConfig,
}

impl Searcher {
    pub fn new(config: SearchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Run every applicable strategy, fuse, and resolve the winners.
    ///
    /// `vector` is `None` when no embedding could be produced for the query;
    /// vector search is skipped in that case. Results are not touched.
    pub fn search(
        &self,
        conn: &Connection,
        query: &SearchQuery,
        vector: Option<QueryVector<'_>>,
    ) -> Result<SearchResponse> {
        let max_results = query
            .max_results
            .unwrap_or(self.config.default_max_results)
            .max(1);
        let text = query.trimmed_text();

        if text.is_none() && query.context_uid.is_none() {
            return list(conn, &query.filter, max_results);
        }

        let pool = max_results * POOL_FACTOR;
        let weights = self.config.weights;
        let mut lists: Vec<SourceHits> = Vec::new();
        let mut degraded = Vec::new();

        let mut run = |source: SearchSource, weight: f64, outcome: Result<Vec<(String, f64)>>| match outcome {
            Ok(hits) => {
                debug!(source = %source, hits = hits.len(), "search source finished");
                lists.push(SourceHits { source, weight, hits });
            }
            Err(e) => {
                warn!(source = %source, error = %e, "search source failed, excluding from fusion");
                degraded.push(source);
            }
        };

        if weights.vector > 0.0 {
            if let (Some(_), Some(v)) = (text, vector) {
                run(SearchSource::Vector, weights.vector, vector_search(conn, &query.filter, v, pool));
            }
        }
        if weights.keyword > 0.0 {
            if let Some(text) = text {
                let fts_query = sanitize_fts_query(text);
                if !fts_query.is_empty() {
                    run(
                        SearchSource::Keyword,
                        weights.keyword,
                        keyword_search(conn, &query.filter, &fts_query, pool),
                    );
                }
            }
        }
        if weights.graph > 0.0 {
            if let Some(ref origin) = query.context_uid {
                run(
                    SearchSource::Graph,
                    weights.graph,
                    graph_search(conn, &query.filter, origin, self.config.graph_depth, pool),
                );
            }
        }
        if weights.recency > 0.0 {
            run(SearchSource::Recency, weights.recency, recency_search(conn, &query.filter, pool));
        }

        let fused = fuse(&lists, self.config.rrf_k);
        let mut raw: HashMap<&str, BTreeMap<SearchSource, f64>> = HashMap::new();
        for list in &lists {
            for (uid, score) in &list.hits {
                raw.entry(uid.as_str()).or_default().insert(list.source, *score);
            }
        }

        let results = resolve(conn, &fused, max_results)?
            .into_iter()
            .enumerate()
            .map(|(i, (memory, score))| {
                let sources = raw.get(memory.uid.as_str()).cloned().unwrap_or_default();
                SearchResult {
                    memory,
                    score,
                    rank: i + 1,
                    sources,
                }
            })
            .collect();

        Ok(SearchResponse { results, degraded })
    }
}

/// Weighted Reciprocal Rank Fusion.
///
/// Each list is ranked by score descending (1-indexed) and contributes
/// `weight / (k + rank)` per item. Totals are summed per uid and sorted
/// descending; ties keep first-seen order. Weights are used as given.
pub fn fuse(lists: &[SourceHits], k: f64) -> Vec<(String, f64)> {
    let mut order: Vec<String> = Vec::new();
    let mut totals: HashMap<String, f64> = HashMap::new();

    for list in lists {
        if list.weight <= 0.0 {
            continue;
        }
        let mut ranked: Vec<&(String, f64)> = list.hits.iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        for (i, (uid, _)) in ranked.into_iter().enumerate() {
            let contribution = list.weight / (k + (i + 1) as f64);
            match totals.get_mut(uid) {
                Some(total) => *total += contribution,
                None => {
                    order.push(uid.clone());
                    totals.insert(uid.clone(), contribution);
                }
            }
        }
    }

    let mut fused: Vec<(String, f64)> = order
        .into_iter()
        .map(|uid| {
            let score = totals.get(&uid).copied().unwrap_or_default();
            (uid, score)
        })
        .collect();
    fused.sort_by(|a, b| b.1.total_cmp(&a.1));
    fused
}

/// Strip FTS5 syntax from free text and OR-join the remaining terms as
/// quoted prefix matches. Returns an empty string when nothing survives.
pub fn sanitize_fts_query(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .filter(|t| t.chars().count() >= 2)
        .filter(|t| !FTS_OPERATORS.contains(&t.to_lowercase().as_str()))
        .map(|t| format!("\"{t}\"*"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// `exp(-0.1 × days) × (0.5 + 0.5 × importance)` using the later of creation
/// and last access.
pub fn recency_score(memory: &Memory, now: chrono::DateTime<Utc>) -> f64 {
    let days = (now - memory.last_activity()).num_seconds().max(0) as f64 / 86_400.0;
    (-RECENCY_LAMBDA * days).exp() * (0.5 + 0.5 * memory.importance)
}

// ── Strategies ──

fn vector_search(
    conn: &Connection,
    filter: &QueryBuilder,
    vector: QueryVector<'_>,
    pool: usize,
) -> Result<Vec<(String, f64)>> {
    if vector.embedding.is_empty() {
        return Ok(Vec::new());
    }
    let clause = filter
        .clone()
        .with_embedding(vector.model, Some(vector.embedding.len()))
        .where_clause();

    let sql = format!(
        "SELECT m.uid, vec_distance_cosine(m.embedding, ?) AS distance FROM memories m \
         WHERE {} ORDER BY distance ASC, m.id ASC LIMIT ?",
        clause.sql
    );
    let mut params = Vec::with_capacity(clause.params.len() + 2);
    params.push(Value::Blob(embedding_to_bytes(vector.embedding)));
    params.extend(clause.params);
    params.push(Value::Integer(pool as i64));

    let mut stmt = conn.prepare(&sql)?;
    let hits = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            let distance: f64 = row.get(1)?;
            Ok((row.get::<_, String>(0)?, 1.0 - distance))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(hits)
}

fn keyword_search(
    conn: &Connection,
    filter: &QueryBuilder,
    fts_query: &str,
    pool: usize,
) -> Result<Vec<(String, f64)>> {
    let clause = filter.where_clause();
    let sql = format!(
        "SELECT m.uid, bm25(memories_fts) AS score FROM memories_fts \
         JOIN memories m ON m.id = memories_fts.rowid \
         WHERE memories_fts MATCH ? AND {} ORDER BY score ASC, m.id ASC LIMIT ?",
        clause.sql
    );
    let mut params = Vec::with_capacity(clause.params.len() + 2);
    params.push(Value::Text(fts_query.to_string()));
    params.extend(clause.params);
    params.push(Value::Integer(pool as i64));

    let mut stmt = conn.prepare(&sql)?;
    // more negative bm25 = better match
    let raw = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            let bm25: f64 = row.get(1)?;
            Ok((row.get::<_, String>(0)?, -bm25))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(min_max_normalize(raw))
}

fn min_max_normalize(hits: Vec<(String, f64)>) -> Vec<(String, f64)> {
    let min = hits.iter().map(|h| h.1).fold(f64::INFINITY, f64::min);
    let max = hits.iter().map(|h| h.1).fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    hits.into_iter()
        .map(|(uid, s)| {
            let norm = if span > f64::EPSILON { (s - min) / span } else { 1.0 };
            (uid, norm)
        })
        .collect()
}

fn graph_search(
    conn: &Connection,
    filter: &QueryBuilder,
    origin: &str,
    depth: usize,
    pool: usize,
) -> Result<Vec<(String, f64)>> {
    let reached = neighbors(conn, origin, depth.max(1))?;
    if reached.is_empty() {
        return Ok(Vec::new());
    }

    let allowed = filtered_uids(conn, filter.clone().uids(reached.iter().map(|n| n.uid.clone())))?;
    let mut hits: Vec<(String, f64)> = reached
        .into_iter()
        .filter(|n| n.uid != origin && allowed.contains(&n.uid))
        .map(|n| (n.uid, n.score))
        .collect();
    hits.truncate(pool);
    Ok(hits)
}

fn recency_search(conn: &Connection, filter: &QueryBuilder, pool: usize) -> Result<Vec<(String, f64)>> {
    // importance can outweigh days of decay, so every filtered memory is scored
    let candidates = filter.clone().unlimited().offset(0).execute(conn)?;

    let now = Utc::now();
    let mut hits: Vec<(String, f64)> = candidates
        .into_iter()
        .map(|m| {
            let score = recency_score(&m, now);
            (m.uid, score)
        })
        .collect();
    hits.sort_by(|a, b| b.1.total_cmp(&a.1));
    hits.truncate(pool);
    Ok(hits)
}

fn filtered_uids(conn: &Connection, filter: QueryBuilder) -> Result<HashSet<String>> {
    let clause = filter.where_clause();
    let sql = format!("SELECT m.uid FROM memories m WHERE {}", clause.sql);
    let mut stmt = conn.prepare(&sql)?;
    let uids = stmt
        .query_map(params_from_iter(clause.params.iter()), |row| row.get(0))?
        .collect::<Result<HashSet<String>, _>>()?;
    Ok(uids)
}

/// Map fused uids back to live memories, in fused order, skipping any that
/// were forgotten or deleted since the strategies ran.
fn resolve(conn: &Connection, fused: &[(String, f64)], max_results: usize) -> Result<Vec<(Memory, f64)>> {
    if fused.is_empty() {
        return Ok(Vec::new());
    }
    let mut live: HashMap<String, Memory> = QueryBuilder::new()
        .uids(fused.iter().map(|(uid, _)| uid.clone()))
        .unlimited()
        .execute(conn)?
        .into_iter()
        .map(|m| (m.uid.clone(), m))
        .collect();

    Ok(fused
        .iter()
        .filter_map(|(uid, score)| live.remove(uid).map(|m| (m, *score)))
        .take(max_results)
        .collect())
}

fn list(conn: &Connection, filter: &QueryBuilder, max_results: usize) -> Result<SearchResponse> {
    let memories = filter.clone().limit(max_results).execute(conn)?;
    let results = memories
        .into_iter()
        .enumerate()
        .map(|(i, memory)| SearchResult {
            memory,
            score: 0.0,
            rank: i + 1,
            sources: BTreeMap::new(),
        })
        .collect();
    Ok(SearchResponse {
        results,
        degraded: Vec::new(),
    })
}
