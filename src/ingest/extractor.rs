//! LLM-based memory extraction.
//!
//! Content goes to the chat model with a source-specific prompt that asks for
//! a JSON array of candidate memories. Candidates are validated, checked
//! against existing memories with hybrid search, and the survivors are stored
//! with provenance and an embedding when one can be produced.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{SearchConfig, SearchWeights};
use crate::db::{self, SharedConnection};
use crate::embedding::{ChatProvider, Providers};
use crate::memory::search::{QueryVector, SearchQuery, SearchSource, Searcher};
use crate::memory::store::{create_memory, update_embedding};
use crate::memory::types::{Memory, MemoryType, NewMemory, Provenance, SourceKind};

/// Existing memories inspected per candidate when checking for duplicates.
const DEDUP_CANDIDATES: usize = 10;

const TYPE_GUIDE: &str = r#"Each element is an object with:
- "content": the memory as one standalone sentence (e.g. "The user's dog is named Max")
- "type": one of identity, fact, preference, decision, event, observation, goal, todo
- "importance": 0.0 to 1.0, how useful this is to recall later

If nothing is worth remembering, return an empty array: []
Output the JSON array only, no explanation."#;

const CONVERSATION_PROMPT: &str = r#"Extract information about the user from this conversation that would be useful to remember in future conversations. Output a JSON array.

Only include facts that are:
1. About the user, their life, work, plans, or preferences
2. Stated or confirmed by the user, not suggested by the assistant
3. Likely to stay relevant beyond this conversation

Ignore requests and instructions addressed to the assistant; those are tasks, not memories."#;

const FILE_PROMPT: &str = r#"Extract durable knowledge from this document that would be useful to remember about its author and their work. Output a JSON array.

Only include statements that are:
1. Specific and factual, or clearly stated preferences and decisions
2. Meaningful without the surrounding document
3. Likely to stay relevant

The document may contain several segments separated by a SEGMENT BREAK line; treat each on its own."#;

/// Where the content came from. Drives the prompt and the provenance stored
/// on created memories.
#[derive(Debug, Clone, Default)]
pub struct ExtractionContext {
    pub source_kind: SourceKind,
    /// File path or session file, for logs.
    pub source_label: String,
    pub session_id: Option<String>,
    pub username: Option<String>,
    pub channel: Option<String>,
}

impl ExtractionContext {
    fn system_prompt(&self) -> String {
        let base = match self.source_kind {
            SourceKind::File => FILE_PROMPT,
            _ => CONVERSATION_PROMPT,
        };
        format!("{base}\n\n{TYPE_GUIDE}")
    }

    fn provenance(&self) -> Provenance {
        Provenance {
            source_kind: self.source_kind,
            session_id: self.session_id.clone(),
            username: self.username.clone(),
            channel: self.channel.clone(),
            ..Provenance::default()
        }
    }
}

/// A validated memory proposed by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub content: String,
    pub memory_type: MemoryType,
    pub importance: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionOutcome {
    /// Candidates that survived validation.
    pub candidates: usize,
    pub duplicates: usize,
    pub created: Vec<Memory>,
    /// Cancellation stopped the run before every candidate was handled.
    pub cancelled: bool,
}

#[derive(Deserialize)]
struct RawCandidate {
    #[serde(default)]
    content: String,
    #[serde(default, rename = "type")]
    memory_type: Option<String>,
    #[serde(default)]
    importance: Option<f64>,
}

/// Parse the model reply leniently: take the outermost JSON array, drop
/// elements that do not deserialize, and validate the rest. A reply with no
/// parsable array yields no candidates.
pub fn parse_candidates(response: &str) -> Vec<Candidate> {
    let (Some(start), Some(end)) = (response.find('['), response.rfind(']')) else {
        warn!("extraction reply contains no JSON array");
        return Vec::new();
    };
    if end < start {
        warn!("extraction reply contains no JSON array");
        return Vec::new();
    }

    let items: Vec<serde_json::Value> = match serde_json::from_str(&response[start..=end]) {
        Ok(items) => items,
        Err(e) => {
            warn!(error = %e, "failed to parse extraction reply");
            return Vec::new();
        }
    };

    items
        .into_iter()
        .filter_map(|v| serde_json::from_value::<RawCandidate>(v).ok())
        .filter_map(validate)
        .collect()
}

fn validate(raw: RawCandidate) -> Option<Candidate> {
    let content = raw.content.trim();
    if content.is_empty() {
        return None;
    }
    let memory_type = raw
        .memory_type
        .as_deref()
        .and_then(|t| t.trim().to_lowercase().parse::<MemoryType>().ok())
        .unwrap_or(MemoryType::Observation);
    let importance = match raw.importance {
        Some(i) if i.is_finite() && i > 0.0 => i.min(1.0),
        _ => memory_type.default_importance(),
    };
    Some(Candidate {
        content: content.to_string(),
        memory_type,
        importance,
    })
}

/// Lowercased, whitespace-collapsed, trailing punctuation removed.
pub fn normalize_content(content: &str) -> String {
    content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .trim_end_matches(['.', '!', '?'])
        .to_string()
}

pub struct Extractor {
    db: SharedConnection,
    chat: Arc<dyn ChatProvider>,
    providers: Providers,
    search: SearchConfig,
    dedup_threshold: f64,
}

impl Extractor {
    pub fn new(
        db: SharedConnection,
        chat: Arc<dyn ChatProvider>,
        providers: Providers,
        search: &SearchConfig,
        dedup_threshold: f64,
    ) -> Self {
        // Graph and recency would only surface unrelated memories here.
        let search = SearchConfig {
            weights: SearchWeights {
                graph: 0.0,
                recency: 0.0,
                ..search.weights
            },
            ..search.clone()
        };
        Self {
            db,
            chat,
            providers,
            search,
            dedup_threshold,
        }
    }

    /// Extract and store memories from `content`.
    ///
    /// A failed chat call is an error and nothing is stored. An unparsable
    /// reply is not: it yields an empty outcome.
    pub async fn extract(&self, content: &str, ctx: &ExtractionContext) -> Result<ExtractionOutcome> {
        self.extract_until(content, ctx, &CancellationToken::new()).await
    }

    /// Like [`Self::extract`], but stops when `cancel` fires. The chat call is
    /// abandoned outright; once candidates are being stored the token is
    /// checked between candidates, so every written memory is reported.
    pub async fn extract_until(
        &self,
        content: &str,
        ctx: &ExtractionContext,
        cancel: &CancellationToken,
    ) -> Result<ExtractionOutcome> {
        let system = ctx.system_prompt();
        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Ok(ExtractionOutcome {
                    cancelled: true,
                    ..ExtractionOutcome::default()
                });
            }
            reply = self.chat.complete(&system, content) => reply?,
        };
        let candidates = parse_candidates(&reply);

        let mut outcome = ExtractionOutcome {
            candidates: candidates.len(),
            ..ExtractionOutcome::default()
        };
        let mut seen: HashSet<String> = HashSet::new();

        for candidate in candidates {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
            let normalized = normalize_content(&candidate.content);
            if !seen.insert(normalized) {
                outcome.duplicates += 1;
                continue;
            }

            let embedding = self.providers.embed_lenient(&candidate.content).await;
            let model = self.providers.active_model().map(str::to_string);

            if self.is_duplicate(&candidate, embedding.clone(), model.clone()).await? {
                debug!(content = %candidate.content, "skipping duplicate candidate");
                outcome.duplicates += 1;
                continue;
            }

            let new = NewMemory {
                content: candidate.content,
                memory_type: Some(candidate.memory_type),
                importance: Some(candidate.importance),
                provenance: ctx.provenance(),
                ..NewMemory::default()
            };
            let memory = db::call(&self.db, move |conn| {
                let mut memory = create_memory(conn, new)?;
                if let (Some(embedding), Some(model)) = (embedding, model) {
                    update_embedding(conn, &memory.uid, &embedding, &model)?;
                    memory.embedding = Some(embedding);
                    memory.embedding_model = Some(model);
                }
                Ok(memory)
            })
            .await?;
            outcome.created.push(memory);
        }

        info!(
            source = %ctx.source_label,
            candidates = outcome.candidates,
            duplicates = outcome.duplicates,
            created = outcome.created.len(),
            cancelled = outcome.cancelled,
            "extraction finished"
        );
        Ok(outcome)
    }

    async fn is_duplicate(
        &self,
        candidate: &Candidate,
        embedding: Option<Vec<f32>>,
        model: Option<String>,
    ) -> Result<bool> {
        let searcher = Searcher::new(self.search.clone());
        let query = SearchQuery::new(candidate.content.clone()).max_results(DEDUP_CANDIDATES);
        let normalized = normalize_content(&candidate.content);
        let threshold = self.dedup_threshold;

        db::call(&self.db, move |conn| {
            let vector = match (&embedding, &model) {
                (Some(e), Some(m)) => Some(QueryVector { embedding: e, model: m }),
                _ => None,
            };
            let response = searcher.search(conn, &query, vector)?;
            Ok(response.results.iter().any(|r| {
                normalize_content(&r.memory.content) == normalized
                    || r.sources
                        .get(&SearchSource::Vector)
                        .is_some_and(|s| *s >= threshold)
            }))
        })
        .await
    }
}
