//! Fluent filter/sort/paginate builder over the `memories` table.
//!
//! A [`QueryBuilder`] lowers to one parameterized statement. Search strategies
//! and the maintenance passes reuse its predicate set through
//! [`QueryBuilder::where_clause`] so every caller filters the same way.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

use super::format_ts;
use super::store::{memory_from_row, MEMORY_COLUMNS};
use super::types::{Memory, MemoryType};
use crate::error::GraphError;

pub const DEFAULT_LIMIT: usize = 100;

/// Whitelisted sort columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Created,
    Updated,
    LastAccessed,
    /// Later of creation and last access.
    LastActivity,
    Importance,
    Confidence,
    AccessCount,
    NextTrigger,
}

impl SortKey {
    fn expr(&self) -> &'static str {
        match self {
            Self::Created => "m.created_at",
            Self::Updated => "m.updated_at",
            Self::LastAccessed => "m.last_accessed_at",
            Self::LastActivity => "MAX(m.created_at, COALESCE(m.last_accessed_at, m.created_at))",
            Self::Importance => "m.importance",
            Self::Confidence => "m.confidence",
            Self::AccessCount => "m.access_count",
            Self::NextTrigger => "m.next_trigger_at",
        }
    }
}

impl std::str::FromStr for SortKey {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" | "created_at" => Ok(Self::Created),
            "updated" | "updated_at" => Ok(Self::Updated),
            "accessed" | "last_accessed" | "last_accessed_at" => Ok(Self::LastAccessed),
            "activity" | "last_activity" => Ok(Self::LastActivity),
            "importance" => Ok(Self::Importance),
            "confidence" => Ok(Self::Confidence),
            "access_count" => Ok(Self::AccessCount),
            "trigger" | "next_trigger" | "next_trigger_at" => Ok(Self::NextTrigger),
            other => Err(GraphError::UnknownSortKey(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    Asc,
    #[default]
    Desc,
}

impl Direction {
    fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// A lowered statement and its positional parameters.
#[derive(Debug, Clone)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Predicate portion of a query, using anonymous `?` placeholders.
#[derive(Debug, Clone)]
pub struct WhereClause {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct QueryBuilder {
    types: Vec<MemoryType>,
    username: Option<String>,
    channel: Option<String>,
    min_importance: Option<f64>,
    max_importance: Option<f64>,
    min_confidence: Option<f64>,
    max_confidence: Option<f64>,
    created_after: Option<DateTime<Utc>>,
    created_before: Option<DateTime<Utc>>,
    accessed_after: Option<DateTime<Utc>>,
    accessed_before: Option<DateTime<Utc>>,
    include_forgotten: bool,
    trigger_due_before: Option<DateTime<Utc>>,
    uids: Option<Vec<String>>,
    embedding_model: Option<String>,
    embedding_dims: Option<usize>,
    sort: SortKey,
    direction: Direction,
    limit: Option<usize>,
    offset: usize,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self {
            types: Vec::new(),
            username: None,
            channel: None,
            min_importance: None,
            max_importance: None,
            min_confidence: None,
            max_confidence: None,
            created_after: None,
            created_before: None,
            accessed_after: None,
            accessed_before: None,
            include_forgotten: false,
            trigger_due_before: None,
            uids: None,
            embedding_model: None,
            embedding_dims: None,
            sort: SortKey::Created,
            direction: Direction::Desc,
            limit: Some(DEFAULT_LIMIT),
            offset: 0,
        }
    }
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory_type(mut self, memory_type: MemoryType) -> Self {
        if !self.types.contains(&memory_type) {
            self.types.push(memory_type);
        }
        self
    }

    pub fn types(mut self, types: impl IntoIterator<Item = MemoryType>) -> Self {
        for t in types {
            self = self.memory_type(t);
        }
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn min_importance(mut self, value: f64) -> Self {
        self.min_importance = Some(value);
        self
    }

    pub fn max_importance(mut self, value: f64) -> Self {
        self.max_importance = Some(value);
        self
    }

    /// Rows without a confidence never satisfy a confidence bound.
    pub fn min_confidence(mut self, value: f64) -> Self {
        self.min_confidence = Some(value);
        self
    }

    pub fn max_confidence(mut self, value: f64) -> Self {
        self.max_confidence = Some(value);
        self
    }

    pub fn created_after(mut self, ts: DateTime<Utc>) -> Self {
        self.created_after = Some(ts);
        self
    }

    pub fn created_before(mut self, ts: DateTime<Utc>) -> Self {
        self.created_before = Some(ts);
        self
    }

    pub fn accessed_after(mut self, ts: DateTime<Utc>) -> Self {
        self.accessed_after = Some(ts);
        self
    }

    pub fn accessed_before(mut self, ts: DateTime<Utc>) -> Self {
        self.accessed_before = Some(ts);
        self
    }

    pub fn include_forgotten(mut self, include: bool) -> Self {
        self.include_forgotten = include;
        self
    }

    /// Memories with a `next_trigger_at` at or before `ts`.
    pub fn trigger_due_before(mut self, ts: DateTime<Utc>) -> Self {
        self.trigger_due_before = Some(ts);
        self
    }

    /// Restrict to an explicit uid set. An empty set matches nothing.
    pub fn uids(mut self, uids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.uids = Some(uids.into_iter().map(Into::into).collect());
        self
    }

    /// Only memories embedded by `model`, optionally with a fixed dimension.
    pub fn with_embedding(mut self, model: impl Into<String>, dims: Option<usize>) -> Self {
        self.embedding_model = Some(model.into());
        self.embedding_dims = dims;
        self
    }

    pub fn sort_by(mut self, key: SortKey, direction: Direction) -> Self {
        self.sort = key;
        self.direction = direction;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Remove the row cap. Meant for internal batch passes.
    pub fn unlimited(mut self) -> Self {
        self.limit = None;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    /// The accumulated predicates, ready to splice after `WHERE`.
    pub fn where_clause(&self) -> WhereClause {
        let mut conds: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        if !self.include_forgotten {
            conds.push("m.forgotten = 0".into());
        }
        if !self.types.is_empty() {
            let marks = vec!["?"; self.types.len()].join(", ");
            conds.push(format!("m.type IN ({marks})"));
            params.extend(self.types.iter().map(|t| Value::Text(t.as_str().into())));
        }
        if let Some(ref u) = self.username {
            conds.push("m.username = ?".into());
            params.push(Value::Text(u.clone()));
        }
        if let Some(ref c) = self.channel {
            conds.push("m.channel = ?".into());
            params.push(Value::Text(c.clone()));
        }
        if let Some(v) = self.min_importance {
            conds.push("m.importance >= ?".into());
            params.push(Value::Real(v));
        }
        if let Some(v) = self.max_importance {
            conds.push("m.importance <= ?".into());
            params.push(Value::Real(v));
        }
        if let Some(v) = self.min_confidence {
            conds.push("m.confidence >= 0 AND m.confidence >= ?".into());
            params.push(Value::Real(v));
        }
        if let Some(v) = self.max_confidence {
            conds.push("m.confidence >= 0 AND m.confidence <= ?".into());
            params.push(Value::Real(v));
        }

        let mut time_bound = |sql: &str, ts: &Option<DateTime<Utc>>| {
            if let Some(ts) = ts {
                conds.push(sql.into());
                params.push(Value::Text(format_ts(ts)));
            }
        };
        time_bound("m.created_at >= ?", &self.created_after);
        time_bound("m.created_at <= ?", &self.created_before);
        time_bound("m.last_accessed_at >= ?", &self.accessed_after);
        time_bound("m.last_accessed_at <= ?", &self.accessed_before);
        time_bound(
            "m.next_trigger_at IS NOT NULL AND m.next_trigger_at <= ?",
            &self.trigger_due_before,
        );

        if let Some(ref uids) = self.uids {
            if uids.is_empty() {
                conds.push("0".into());
            } else {
                let marks = vec!["?"; uids.len()].join(", ");
                conds.push(format!("m.uid IN ({marks})"));
                params.extend(uids.iter().map(|u| Value::Text(u.clone())));
            }
        }
        if let Some(ref model) = self.embedding_model {
            conds.push("m.embedding IS NOT NULL AND m.embedding_model = ?".into());
            params.push(Value::Text(model.clone()));
            if let Some(dims) = self.embedding_dims {
                conds.push("length(m.embedding) = ?".into());
                params.push(Value::Integer((dims * 4) as i64));
            }
        }

        let sql = if conds.is_empty() {
            "1 = 1".to_string()
        } else {
            conds.join(" AND ")
        };
        WhereClause { sql, params }
    }

    fn order_clause(&self) -> String {
        let dir = self.direction.as_sql();
        format!("ORDER BY {} {dir} NULLS LAST, m.id {dir}", self.sort.expr())
    }

    /// Lower to a single `SELECT` returning [`MEMORY_COLUMNS`].
    pub fn build(&self) -> BuiltQuery {
        let WhereClause { sql: where_sql, mut params } = self.where_clause();
        let mut sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories m WHERE {where_sql} {}",
            self.order_clause()
        );

        match self.limit {
            Some(limit) => {
                sql.push_str(" LIMIT ? OFFSET ?");
                params.push(Value::Integer(limit as i64));
                params.push(Value::Integer(self.offset as i64));
            }
            None if self.offset > 0 => {
                sql.push_str(" LIMIT -1 OFFSET ?");
                params.push(Value::Integer(self.offset as i64));
            }
            None => {}
        }

        BuiltQuery { sql, params }
    }

    /// Same predicates wrapped in `COUNT(*)`. Sort and pagination are ignored.
    pub fn build_count(&self) -> BuiltQuery {
        let WhereClause { sql: where_sql, params } = self.where_clause();
        BuiltQuery {
            sql: format!("SELECT COUNT(*) FROM memories m WHERE {where_sql}"),
            params,
        }
    }

    pub fn execute(&self, conn: &Connection) -> Result<Vec<Memory>> {
        let built = self.build();
        let mut stmt = conn.prepare(&built.sql)?;
        let rows = stmt
            .query_map(params_from_iter(built.params.iter()), memory_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count(&self, conn: &Connection) -> Result<u64> {
        let built = self.build_count();
        let n: i64 = conn.query_row(&built.sql, params_from_iter(built.params.iter()), |r| r.get(0))?;
        Ok(n.max(0) as u64)
    }
}
