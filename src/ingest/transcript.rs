//! Conversation transcripts stored as JSON Lines, one session per file.
//!
//! Each line is an object with `role` and `content`. Only user and assistant
//! turns are kept; malformed lines are skipped.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{IngestSource, SourceItem, SCAN_CHANNEL_CAPACITY};
use crate::memory::types::SourceKind;

#[derive(Debug, Clone)]
pub struct TranscriptSource {
    dir: PathBuf,
}

#[derive(Deserialize)]
struct TranscriptLine {
    role: String,
    #[serde(default)]
    content: serde_json::Value,
}

impl TranscriptSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn session_files(&self) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "jsonl"))
            .collect();
        files.sort();
        Ok(files)
    }
}

/// Render a session as `User:` / `Assistant:` turns. `None` if nothing usable.
pub fn render_transcript(raw: &str) -> Option<String> {
    let mut turns = Vec::new();
    for (n, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed: TranscriptLine = match serde_json::from_str(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(line = n + 1, error = %e, "skipping malformed transcript line");
                continue;
            }
        };
        let speaker = match parsed.role.as_str() {
            "user" | "human" => "User",
            "assistant" => "Assistant",
            _ => continue,
        };
        let text = content_text(&parsed.content);
        if !text.trim().is_empty() {
            turns.push(format!("{speaker}: {}", text.trim()));
        }
    }
    (!turns.is_empty()).then(|| turns.join("\n"))
}

/// Plain string content, or the text parts of a content-block array.
fn content_text(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn read_session(path: &Path) -> Option<SourceItem> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read transcript");
            return None;
        }
    };
    let rendered = render_transcript(&raw)?;
    let session_id = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    Some(SourceItem::new(path.to_string_lossy(), rendered).with_metadata("session_id", session_id))
}

impl IngestSource for TranscriptSource {
    fn source_type(&self) -> &str {
        "transcript"
    }

    fn source_kind(&self) -> SourceKind {
        SourceKind::Transcript
    }

    fn scan(&self, cancel: CancellationToken) -> mpsc::Receiver<Result<SourceItem>> {
        let (tx, rx) = mpsc::channel(SCAN_CHANNEL_CAPACITY);
        let source = self.clone();
        tokio::task::spawn_blocking(move || {
            let files = match source.session_files() {
                Ok(files) => files,
                Err(e) => {
                    let _ = tx.blocking_send(Err(e.context(format!(
                        "cannot list transcripts in {}",
                        source.dir.display()
                    ))));
                    return;
                }
            };
            for path in files {
                if cancel.is_cancelled() {
                    return;
                }
                let Some(item) = read_session(&path) else { continue };
                if tx.blocking_send(Ok(item)).is_err() {
                    return;
                }
            }
        });
        rx
    }
}
