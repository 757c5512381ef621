mod helpers;

use std::sync::Arc;

use anamnesis::ingest::extractor::ExtractionContext;
use anamnesis::ingest::SEGMENT_MARKER;
use anamnesis::memory::query::QueryBuilder;
use anamnesis::memory::types::{MemoryType, SourceKind};
use anamnesis::embedding::Providers;
use helpers::{stub_providers, test_manager, CancellingEmbedder, FailingChat, StubChat};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const ONE_FACT: &str = r#"[{"content": "The project is written in Rust", "type": "fact", "importance": 0.7}]"#;

fn write(dir: &TempDir, name: &str, content: &str) {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn session(turns: &[(&str, &str)]) -> String {
    turns
        .iter()
        .map(|(role, content)| serde_json::json!({ "role": role, "content": content }).to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

#[tokio::test]
async fn unchanged_file_is_skipped_on_second_run() {
    let chat = Arc::new(StubChat::new(ONE_FACT));
    let manager = test_manager(stub_providers(chat.clone()));
    let dir = TempDir::new().unwrap();
    write(&dir, "notes.md", "# Stack\nWe build everything in Rust.");

    let first = manager.ingest_files(dir.path(), CancellationToken::new()).await.unwrap();
    assert_eq!(first.scanned, 1);
    assert_eq!(first.extracted, 1);
    assert_eq!(first.memories_created, 1);
    assert_eq!(chat.calls(), 1);

    let second = manager.ingest_files(dir.path(), CancellationToken::new()).await.unwrap();
    assert_eq!(second.skipped, 1);
    assert_eq!(second.extracted, 0);
    assert_eq!(second.memories_created, 0);
    assert_eq!(chat.calls(), 1, "no extraction for unchanged content");

    let created = manager.query(QueryBuilder::new()).await.unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].memory_type, MemoryType::Fact);
    assert_eq!(created[0].provenance.source_kind, SourceKind::File);
    assert!(created[0].embedding.is_some());
}

#[tokio::test]
async fn changed_file_is_re_extracted_and_deduplicated() {
    let chat = Arc::new(StubChat::new(ONE_FACT));
    let manager = test_manager(stub_providers(chat.clone()));
    let dir = TempDir::new().unwrap();
    write(&dir, "notes.md", "version one");

    manager.ingest_files(dir.path(), CancellationToken::new()).await.unwrap();
    write(&dir, "notes.md", "version two");
    let report = manager.ingest_files(dir.path(), CancellationToken::new()).await.unwrap();

    assert_eq!(report.extracted, 1);
    assert_eq!(report.memories_created, 0, "same fact is recognized as a duplicate");
    assert_eq!(chat.calls(), 2);
    assert_eq!(manager.count(QueryBuilder::new()).await.unwrap(), 1);

    let third = manager.ingest_files(dir.path(), CancellationToken::new()).await.unwrap();
    assert_eq!(third.skipped, 1);
}

#[tokio::test]
async fn globs_select_which_files_are_read() {
    let chat = Arc::new(StubChat::new("[]"));
    let manager = test_manager(stub_providers(chat.clone()));
    let dir = TempDir::new().unwrap();
    write(&dir, "a.md", "markdown");
    write(&dir, "b.txt", "text");
    write(&dir, "c.rs", "fn main() {}");
    write(&dir, "node_modules/dep/readme.md", "vendored");
    write(&dir, "empty.md", "");

    let report = manager.ingest_files(dir.path(), CancellationToken::new()).await.unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.extracted, 2);
    assert_eq!(chat.calls(), 2);
}

#[tokio::test]
async fn failed_extraction_records_no_state() {
    let manager = test_manager(stub_providers(Arc::new(FailingChat)));
    let dir = TempDir::new().unwrap();
    write(&dir, "notes.md", "something worth remembering");

    let first = manager.ingest_files(dir.path(), CancellationToken::new()).await.unwrap();
    assert_eq!(first.errored, 1);
    assert_eq!(first.extracted, 0);
    assert_eq!(manager.health().await.unwrap().ingestion_count, 0);

    // retried, not skipped
    let second = manager.ingest_files(dir.path(), CancellationToken::new()).await.unwrap();
    assert_eq!(second.skipped, 0);
    assert_eq!(second.errored, 1);
}

#[tokio::test]
async fn missing_root_is_an_errored_item() {
    let manager = test_manager(stub_providers(Arc::new(StubChat::new("[]"))));
    let dir = TempDir::new().unwrap();
    let report = manager
        .ingest_files(dir.path().join("nope"), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.errored, 1);
    assert_eq!(report.extracted, 0);
}

#[tokio::test]
async fn transcripts_are_batched() {
    let chat = Arc::new(StubChat::new("[]"));
    let manager = test_manager(stub_providers(chat.clone()));
    let dir = TempDir::new().unwrap();
    for i in 0..7 {
        write(
            &dir,
            &format!("session-{i}.jsonl"),
            &session(&[("user", &format!("message {i}")), ("assistant", "noted")]),
        );
    }
    write(&dir, "ignored.txt", "not a transcript");

    let report = manager.ingest_transcripts(dir.path(), CancellationToken::new()).await.unwrap();
    assert_eq!(report.scanned, 7);
    assert_eq!(report.extracted, 7);
    // default batch size of 5: one full batch and one remainder
    assert_eq!(chat.calls(), 2);

    let prompts = chat.prompts.lock().unwrap().clone();
    assert_eq!(prompts[0].matches(SEGMENT_MARKER.trim()).count(), 4);
    assert!(prompts[0].contains("User: message 0"));
    assert!(prompts[1].contains("User: message 6"));

    let again = manager.ingest_transcripts(dir.path(), CancellationToken::new()).await.unwrap();
    assert_eq!(again.skipped, 7);
    assert_eq!(chat.calls(), 2);
}

#[tokio::test]
async fn cancelled_before_start_does_nothing() {
    let chat = Arc::new(StubChat::new(ONE_FACT));
    let manager = test_manager(stub_providers(chat.clone()));
    let dir = TempDir::new().unwrap();
    write(&dir, "notes.md", "content");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = manager.ingest_files(dir.path(), cancel).await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.extracted, 0);
    assert_eq!(chat.calls(), 0);
    assert_eq!(manager.count(QueryBuilder::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn ingestion_requires_a_chat_provider() {
    let mut providers = stub_providers(Arc::new(StubChat::new("[]")));
    providers.chat = None;
    let manager = test_manager(providers);
    let dir = TempDir::new().unwrap();
    assert!(manager.ingest_files(dir.path(), CancellationToken::new()).await.is_err());
}

#[tokio::test]
async fn direct_extraction_carries_provenance() {
    let chat = Arc::new(StubChat::new(
        r#"[{"content": "Prefers morning meetings", "type": "preference"},
            {"content": "prefers   MORNING meetings", "type": "preference"},
            {"content": "", "type": "fact"}]"#,
    ));
    let manager = test_manager(stub_providers(chat.clone()));
    let ctx = ExtractionContext {
        source_kind: SourceKind::Conversation,
        source_label: "chat".into(),
        session_id: Some("s-42".into()),
        username: Some("alice".into()),
        channel: Some("slack".into()),
    };

    let outcome = manager.extract("User: I like meetings before ten.", &ctx).await.unwrap();
    assert_eq!(outcome.created.len(), 1);
    assert_eq!(outcome.duplicates, 1);

    let m = &outcome.created[0];
    assert_eq!(m.memory_type, MemoryType::Preference);
    assert_eq!(m.importance, MemoryType::Preference.default_importance());
    assert_eq!(m.provenance.username.as_deref(), Some("alice"));
    assert_eq!(m.provenance.channel.as_deref(), Some("slack"));
    assert_eq!(m.provenance.session_id.as_deref(), Some("s-42"));
    assert_eq!(m.provenance.source_kind, SourceKind::Conversation);
}

#[tokio::test]
async fn cancellation_mid_extraction_reports_written_memories() {
    let cancel = CancellationToken::new();
    let chat = Arc::new(StubChat::new(
        r#"[{"content": "Uses Neovim", "type": "preference"},
            {"content": "Deploys on Fridays", "type": "fact"}]"#,
    ));
    let manager = test_manager(Providers {
        embedder: Arc::new(CancellingEmbedder { cancel: cancel.clone() }),
        chat: Some(chat.clone()),
    });
    let dir = TempDir::new().unwrap();
    write(&dir, "notes.md", "editor and release habits");

    let first = manager.ingest_files(dir.path(), cancel).await.unwrap();
    assert!(first.cancelled);
    assert_eq!(first.memories_created, 1);
    assert_eq!(manager.count(QueryBuilder::new()).await.unwrap(), 1);
    assert_eq!(manager.health().await.unwrap().ingestion_count, 0);

    // the batch is retried; the stored candidate is recognized as a duplicate
    let second = manager.ingest_files(dir.path(), CancellationToken::new()).await.unwrap();
    assert!(!second.cancelled);
    assert_eq!(second.extracted, 1);
    assert_eq!(second.memories_created, 1);
    assert_eq!(manager.count(QueryBuilder::new()).await.unwrap(), 2);
    assert_eq!(chat.calls(), 2);
}
