//! Recursive directory source filtered by glob patterns.

use std::path::{Path, PathBuf};

use anyhow::Result;
use glob::Pattern;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{IngestSource, SourceItem, SCAN_CHANNEL_CAPACITY};
use crate::memory::types::SourceKind;

/// Walks `root` and yields every non-empty UTF-8 file whose path relative to
/// `root` matches an include pattern and no exclude pattern.
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl FileSource {
    /// Invalid patterns are logged and ignored. An empty include list
    /// matches every file.
    pub fn new(root: impl Into<PathBuf>, include: &[String], exclude: &[String]) -> Self {
        Self {
            root: root.into(),
            include: compile_patterns(include),
            exclude: compile_patterns(exclude),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn accepts(&self, relative: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|p| p.matches(relative));
        included && !self.exclude.iter().any(|p| p.matches(relative))
    }

    /// Matching files under the root, sorted for a stable scan order.
    fn collect_paths(&self) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "cannot read directory entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                relative_path(&self.root, entry.path()).is_some_and(|rel| self.accepts(&rel))
            })
            .map(|entry| entry.into_path())
            .collect();
        out.sort();
        out
    }
}

fn compile_patterns(patterns: &[String]) -> Vec<Pattern> {
    patterns
        .iter()
        .filter_map(|p| match Pattern::new(p) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!(pattern = %p, error = %e, "ignoring invalid glob pattern");
                None
            }
        })
        .collect()
}

/// `path` relative to `root` with `/` separators.
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect();
    Some(parts.join("/"))
}

fn read_item(path: &Path) -> Option<SourceItem> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read file");
            return None;
        }
    };
    let Ok(content) = String::from_utf8(bytes) else {
        debug!(path = %path.display(), "skipping non-UTF-8 file");
        return None;
    };
    if content.trim().is_empty() {
        return None;
    }
    Some(SourceItem::new(path.to_string_lossy(), content))
}

impl IngestSource for FileSource {
    fn source_type(&self) -> &str {
        "file"
    }

    fn source_kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn scan(&self, cancel: CancellationToken) -> mpsc::Receiver<Result<SourceItem>> {
        let (tx, rx) = mpsc::channel(SCAN_CHANNEL_CAPACITY);
        let source = self.clone();
        tokio::task::spawn_blocking(move || {
            if !source.root.is_dir() {
                let _ = tx.blocking_send(Err(anyhow::anyhow!(
                    "not a directory: {}",
                    source.root.display()
                )));
                return;
            }
            for path in source.collect_paths() {
                if cancel.is_cancelled() {
                    return;
                }
                let Some(item) = read_item(&path) else { continue };
                if tx.blocking_send(Ok(item)).is_err() {
                    return;
                }
            }
        });
        rx
    }
}
