#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anamnesis::config::AnamnesisConfig;
use anamnesis::db;
use anamnesis::embedding::{ChatProvider, EmbeddingProvider, Providers};
use anamnesis::Manager;
use async_trait::async_trait;
use rusqlite::{params, Connection};

pub const TEST_DIMS: usize = 64;
pub const TEST_MODEL: &str = "stub-embed-v1";

/// Open a fresh in-memory database with all migrations applied.
pub fn test_db() -> Connection {
    db::open_in_memory().unwrap()
}

/// Unit vector along axis `seed`. Distinct seeds are orthogonal.
pub fn test_embedding(seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; TEST_DIMS];
    v[seed % TEST_DIMS] = 1.0;
    v
}

/// Unit vector whose cosine similarity to `test_embedding(seed)` is exactly
/// `similarity`.
pub fn embedding_with_similarity(seed: usize, similarity: f32) -> Vec<f32> {
    let mut v = vec![0.0f32; TEST_DIMS];
    v[seed % TEST_DIMS] = similarity;
    v[(seed + 1) % TEST_DIMS] = (1.0 - similarity * similarity).sqrt();
    v
}

/// Shift a memory's timestamps `days_ago` into the past.
pub fn backdate(conn: &Connection, uid: &str, days_ago: i64) {
    let ts = anamnesis::memory::format_ts(&(chrono::Utc::now() - chrono::Duration::days(days_ago)));
    conn.execute(
        "UPDATE memories SET created_at = ?1, updated_at = ?1 WHERE uid = ?2",
        params![ts, uid],
    )
    .unwrap();
}

pub fn set_importance(conn: &Connection, uid: &str, importance: f64) {
    conn.execute(
        "UPDATE memories SET importance = ?1 WHERE uid = ?2",
        params![importance, uid],
    )
    .unwrap();
}

/// Bag-of-words embedder: each lowercase word hashes to one dimension, so
/// identical texts embed identically and shared words raise similarity.
pub struct StubEmbedder {
    model: String,
    pub calls: AtomicUsize,
}

impl StubEmbedder {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

fn word_slot(word: &str) -> usize {
    let hash = word
        .bytes()
        .fold(2_166_136_261u32, |h, b| (h ^ u32::from(b)).wrapping_mul(16_777_619));
    hash as usize % TEST_DIMS
}

pub fn bag_of_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; TEST_DIMS];
    for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        v[word_slot(&word.to_lowercase())] += 1.0;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> anyhow::Result<Option<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(bag_of_words(text)))
    }
}

/// Chat model that always answers with the same reply.
pub struct StubChat {
    reply: String,
    pub calls: AtomicUsize,
    pub prompts: std::sync::Mutex<Vec<String>>,
}

impl StubChat {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            calls: AtomicUsize::new(0),
            prompts: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatProvider for StubChat {
    fn model(&self) -> &str {
        "stub-chat"
    }

    async fn complete(&self, _system: &str, prompt: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.reply.clone())
    }
}

/// Embedder that fires `cancel` on its first call, so cancellation lands
/// while extraction is storing candidates.
pub struct CancellingEmbedder {
    pub cancel: tokio_util::sync::CancellationToken,
}

#[async_trait]
impl EmbeddingProvider for CancellingEmbedder {
    fn model(&self) -> &str {
        TEST_MODEL
    }

    async fn embed(&self, text: &str) -> anyhow::Result<Option<Vec<f32>>> {
        self.cancel.cancel();
        Ok(Some(bag_of_words(text)))
    }
}

/// Chat model whose every call fails, as an unreachable endpoint would.
pub struct FailingChat;

#[async_trait]
impl ChatProvider for FailingChat {
    fn model(&self) -> &str {
        "failing-chat"
    }

    async fn complete(&self, _system: &str, _prompt: &str) -> anyhow::Result<String> {
        anyhow::bail!("connection refused")
    }
}

pub fn stub_providers(chat: Arc<dyn ChatProvider>) -> Providers {
    Providers {
        embedder: Arc::new(StubEmbedder::new(TEST_MODEL)),
        chat: Some(chat),
    }
}

/// Manager over an in-memory database with default config.
pub fn test_manager(providers: Providers) -> Manager {
    Manager::new(test_db(), AnamnesisConfig::default(), providers)
}
