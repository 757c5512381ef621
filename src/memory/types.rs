//! Core memory type definitions.
//!
//! Defines [`MemoryType`] (the fixed fact categories), [`RelationType`] (typed
//! edges), [`Memory`] and [`Association`] records, and the inputs used to
//! create them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// Persisted stand-in for "confidence does not apply to this memory".
pub const CONFIDENCE_NOT_APPLICABLE: f64 = -1.0;

/// Category of a memory fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// Who the user is. Never decays, never pruned.
    Identity,
    Fact,
    Preference,
    Decision,
    Event,
    Observation,
    Goal,
    Todo,
    /// Recurring behavior, optionally with a trigger.
    Routine,
    Feedback,
    Anomaly,
    /// Learned link between two kinds of events.
    Correlation,
    /// Expectation awaiting confirmation.
    Prediction,
}

impl MemoryType {
    pub const ALL: [MemoryType; 13] = [
        Self::Identity,
        Self::Fact,
        Self::Preference,
        Self::Decision,
        Self::Event,
        Self::Observation,
        Self::Goal,
        Self::Todo,
        Self::Routine,
        Self::Feedback,
        Self::Anomaly,
        Self::Correlation,
        Self::Prediction,
    ];

    /// Types that carry a confidence value and are subject to confidence decay.
    pub const PATTERNS: [MemoryType; 3] = [Self::Routine, Self::Correlation, Self::Prediction];

    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Fact => "fact",
            Self::Preference => "preference",
            Self::Decision => "decision",
            Self::Event => "event",
            Self::Observation => "observation",
            Self::Goal => "goal",
            Self::Todo => "todo",
            Self::Routine => "routine",
            Self::Feedback => "feedback",
            Self::Anomaly => "anomaly",
            Self::Correlation => "correlation",
            Self::Prediction => "prediction",
        }
    }

    /// Importance assigned when the caller leaves it unset.
    pub fn default_importance(&self) -> f64 {
        match self {
            Self::Identity => 1.0,
            Self::Preference | Self::Goal => 0.8,
            Self::Decision | Self::Routine => 0.7,
            Self::Fact | Self::Todo | Self::Feedback => 0.6,
            Self::Event | Self::Correlation | Self::Prediction => 0.5,
            Self::Observation | Self::Anomaly => 0.3,
        }
    }

    pub fn is_pattern(&self) -> bool {
        Self::PATTERNS.contains(self)
    }

    /// Confidence assigned when the caller leaves it unset.
    pub fn default_confidence(&self) -> Option<f64> {
        self.is_pattern().then_some(0.5)
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryType {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or(GraphError::UnknownMemoryType(s))
    }
}

/// Edge label between two memories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    RelatedTo,
    /// Newer memory supersedes older: newer -> older.
    Updates,
    Contradicts,
    CausedBy,
    ResultOf,
    PartOf,
    Triggers,
    Reinforces,
    Weakens,
    Violated,
    Predicts,
    Confirmed,
    Overrides,
}

impl RelationType {
    pub const ALL: [RelationType; 13] = [
        Self::RelatedTo,
        Self::Updates,
        Self::Contradicts,
        Self::CausedBy,
        Self::ResultOf,
        Self::PartOf,
        Self::Triggers,
        Self::Reinforces,
        Self::Weakens,
        Self::Violated,
        Self::Predicts,
        Self::Confirmed,
        Self::Overrides,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RelatedTo => "related_to",
            Self::Updates => "updates",
            Self::Contradicts => "contradicts",
            Self::CausedBy => "caused_by",
            Self::ResultOf => "result_of",
            Self::PartOf => "part_of",
            Self::Triggers => "triggers",
            Self::Reinforces => "reinforces",
            Self::Weakens => "weakens",
            Self::Violated => "violated",
            Self::Predicts => "predicts",
            Self::Confirmed => "confirmed",
            Self::Overrides => "overrides",
        }
    }

    /// Directedness applied when the caller does not set it. Symmetric
    /// relations are undirected; everything else reads source -> target.
    pub fn default_directed(&self) -> bool {
        !matches!(self, Self::RelatedTo | Self::Contradicts)
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RelationType {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or(GraphError::UnknownRelation(s))
    }
}

/// Where a memory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Manual,
    Conversation,
    File,
    Transcript,
    Maintenance,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Conversation => "conversation",
            Self::File => "file",
            Self::Transcript => "transcript",
            Self::Maintenance => "maintenance",
        }
    }

    /// Lenient parse for values read back from storage.
    pub fn parse_lossy(s: &str) -> Self {
        match s {
            "conversation" => Self::Conversation,
            "file" => Self::File,
            "transcript" => Self::Transcript,
            "maintenance" => Self::Maintenance,
            _ => Self::Manual,
        }
    }
}

/// Origin of a memory: which conversation, user, and channel produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_kind: SourceKind,
    pub session_id: Option<String>,
    pub message_id: Option<String>,
    pub username: Option<String>,
    pub channel: Option<String>,
    pub chat_id: Option<String>,
}

/// A memory record, matching the `memories` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Sequential storage id. Not exposed outside the database layer's callers.
    #[serde(skip)]
    pub id: i64,
    /// UUID v7 (time-sortable) external identifier.
    pub uid: String,
    pub content: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    /// Relevance in `[0.0, 1.0]`; decays over time.
    pub importance: f64,
    /// `None` when confidence does not apply (non-pattern types).
    pub confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub access_count: u64,
    /// When a routine or prediction should next be checked.
    pub next_trigger_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub provenance: Provenance,
    pub forgotten: bool,
    pub forgotten_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
}

impl Memory {
    /// Later of creation and last access.
    pub fn last_activity(&self) -> DateTime<Utc> {
        match self.last_accessed_at {
            Some(accessed) if accessed > self.created_at => accessed,
            _ => self.created_at,
        }
    }
}

/// Input to [`crate::memory::store::create_memory`].
#[derive(Debug, Clone, Default)]
pub struct NewMemory {
    pub content: String,
    pub memory_type: Option<MemoryType>,
    pub importance: Option<f64>,
    pub confidence: Option<f64>,
    pub next_trigger_at: Option<DateTime<Utc>>,
    pub provenance: Provenance,
}

impl NewMemory {
    pub fn new(content: impl Into<String>, memory_type: MemoryType) -> Self {
        Self {
            content: content.into(),
            memory_type: Some(memory_type),
            ..Self::default()
        }
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.provenance.username = Some(username.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.provenance.channel = Some(channel.into());
        self
    }

    pub fn with_source(mut self, kind: SourceKind) -> Self {
        self.provenance.source_kind = kind;
        self
    }
}

/// A typed, weighted edge between two memories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Association {
    pub uid: String,
    pub source_uid: String,
    pub target_uid: String,
    pub relation: RelationType,
    pub weight: f64,
    pub directed: bool,
    pub created_at: DateTime<Utc>,
}

/// Input to [`crate::memory::associations::create_association`].
#[derive(Debug, Clone)]
pub struct NewAssociation {
    pub source_uid: String,
    pub target_uid: String,
    pub relation: RelationType,
    /// Defaults to 1.0.
    pub weight: Option<f64>,
    /// Defaults to [`RelationType::default_directed`].
    pub directed: Option<bool>,
}

impl NewAssociation {
    pub fn new(source_uid: impl Into<String>, relation: RelationType, target_uid: impl Into<String>) -> Self {
        Self {
            source_uid: source_uid.into(),
            target_uid: target_uid.into(),
            relation,
            weight: None,
            directed: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }
}
