//! Streaming ingestion: sources, change detection, batching, extraction.
//!
//! A source scans on its own blocking task and pushes [`SourceItem`]s through
//! a bounded channel. The [`Ingestor`] consumes them one at a time: items whose
//! content hash matches the recorded [`state`] are skipped, the rest are
//! grouped into batches and handed to the [`extractor::Extractor`]. Extraction
//! calls run sequentially. Cancelling the token stops both sides and returns
//! the partial report.

pub mod extractor;
pub mod file;
pub mod state;
pub mod transcript;

use std::collections::HashMap;

use anyhow::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::{self, SharedConnection};
use crate::memory::types::SourceKind;
use extractor::{ExtractionContext, Extractor};

/// Separates items combined into one extraction call.
pub const SEGMENT_MARKER: &str = "\n\n=== SEGMENT BREAK ===\n\n";

/// Bound on items buffered between a source and the driver.
pub const SCAN_CHANNEL_CAPACITY: usize = 32;

/// One unit of content produced by a source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceItem {
    /// Stable identifier within the source type; the state key.
    pub path: String,
    pub content: String,
    /// SHA-256 hex of `content`.
    pub hash: String,
    pub metadata: HashMap<String, String>,
}

impl SourceItem {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            path: path.into(),
            hash: content_hash(&content),
            content,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// SHA-256 of the content as lowercase hex.
pub fn content_hash(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

/// A pluggable producer of content items.
pub trait IngestSource: Send + Sync {
    /// Namespace for ingestion state, e.g. `"file"`.
    fn source_type(&self) -> &str;

    /// Provenance recorded on memories extracted from this source.
    fn source_kind(&self) -> SourceKind;

    /// Start scanning. The returned stream is finite and not restartable; the
    /// producer stops early when `cancel` fires or the receiver is dropped.
    fn scan(&self, cancel: CancellationToken) -> mpsc::Receiver<Result<SourceItem>>;
}

/// Per-run ingestion summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    /// Items received from the source, including ones that failed to read.
    pub scanned: usize,
    /// Items whose content hash was unchanged.
    pub skipped: usize,
    /// Items that went through a successful extraction call.
    pub extracted: usize,
    pub memories_created: usize,
    /// Items that failed to scan or whose extraction call failed.
    pub errored: usize,
    pub cancelled: bool,
}

/// Drives one source through change detection and extraction.
pub struct Ingestor {
    db: SharedConnection,
    extractor: Extractor,
    batch_size: usize,
}

impl Ingestor {
    /// `batch_size` of 0 or 1 disables batching.
    pub fn new(db: SharedConnection, extractor: Extractor, batch_size: usize) -> Self {
        Self {
            db,
            extractor,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn run(&self, source: &dyn IngestSource, cancel: CancellationToken) -> Result<IngestReport> {
        let source_type = source.source_type().to_string();
        let mut rx = source.scan(cancel.clone());
        let mut report = IngestReport::default();
        let mut pending: Vec<SourceItem> = Vec::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                next = rx.recv() => next,
            };
            let Some(next) = next else { break };
            report.scanned += 1;

            let item = match next {
                Ok(item) => item,
                Err(e) => {
                    warn!(source = %source_type, error = %e, "source item failed");
                    report.errored += 1;
                    continue;
                }
            };

            let (st, path) = (source_type.clone(), item.path.clone());
            let prior = db::call(&self.db, move |conn| state::get_state(conn, &st, &path)).await?;
            if prior.is_some_and(|p| p.content_hash == item.hash) {
                debug!(source = %source_type, path = %item.path, "unchanged, skipping");
                report.skipped += 1;
                continue;
            }

            pending.push(item);
            if pending.len() >= self.batch_size {
                let batch = std::mem::take(&mut pending);
                if !self.flush(source, batch, &mut report, &cancel).await? {
                    break;
                }
            }
        }

        if !report.cancelled && !pending.is_empty() {
            self.flush(source, pending, &mut report, &cancel).await?;
        }

        info!(
            source = %source_type,
            scanned = report.scanned,
            skipped = report.skipped,
            extracted = report.extracted,
            memories_created = report.memories_created,
            errored = report.errored,
            cancelled = report.cancelled,
            "ingestion finished"
        );
        Ok(report)
    }

    /// Extract one batch and record state. Returns `false` if cancelled.
    async fn flush(
        &self,
        source: &dyn IngestSource,
        batch: Vec<SourceItem>,
        report: &mut IngestReport,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let content = combine_batch(&batch);
        let ctx = ExtractionContext {
            source_kind: source.source_kind(),
            source_label: batch.first().map(|i| i.path.clone()).unwrap_or_default(),
            session_id: (batch.len() == 1)
                .then(|| batch[0].metadata.get("session_id").cloned())
                .flatten(),
            ..ExtractionContext::default()
        };

        match self.extractor.extract_until(&content, &ctx, cancel).await {
            Ok(outcome) if outcome.cancelled => {
                // no state: the batch is re-extracted next run and dedup
                // skips what was already written
                report.memories_created += outcome.created.len();
                report.cancelled = true;
                return Ok(false);
            }
            Ok(outcome) => {
                let created = outcome.created.len();
                report.extracted += batch.len();
                report.memories_created += created;

                let source_type = source.source_type().to_string();
                db::call(&self.db, move |conn| {
                    for item in &batch {
                        // a batch's memories cannot be attributed per item
                        state::record_state(conn, &source_type, &item.path, &item.hash, created as u64)?;
                    }
                    Ok(())
                })
                .await?;
            }
            Err(e) => {
                warn!(
                    source = source.source_type(),
                    items = batch.len(),
                    error = %e,
                    "extraction failed; items left for retry"
                );
                report.errored += batch.len();
            }
        }
        Ok(true)
    }
}

fn combine_batch(batch: &[SourceItem]) -> String {
    match batch {
        [single] => single.content.clone(),
        many => many
            .iter()
            .map(|item| format!("[{}]\n{}", item.path, item.content))
            .collect::<Vec<_>>()
            .join(SEGMENT_MARKER),
    }
}
