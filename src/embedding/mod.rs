//! External model capabilities: text embeddings and chat completion.
//!
//! Both are consumed through narrow traits so the graph never depends on a
//! particular vendor. [`Providers`] bundles the active pair; the manager holds
//! it as an atomically swappable snapshot. [`create_providers`] builds one
//! from configuration.

pub mod http;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{AnamnesisConfig, ProviderConfig};

/// Turns text into vectors.
///
/// An unavailable provider is not an error: callers degrade vector search to
/// zero contribution and store memories without embeddings.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn available(&self) -> bool {
        true
    }

    /// Identifier stored next to every vector this provider produces.
    fn model(&self) -> &str;

    /// `Ok(None)` when the provider produced nothing for this text.
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>>;
}

/// Single-turn prompt/response chat, used by extraction.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

/// Stand-in used when embeddings are disabled.
#[derive(Debug, Default)]
pub struct NullEmbedder;

#[async_trait]
impl EmbeddingProvider for NullEmbedder {
    fn available(&self) -> bool {
        false
    }

    fn model(&self) -> &str {
        ""
    }

    async fn embed(&self, _text: &str) -> Result<Option<Vec<f32>>> {
        Ok(None)
    }
}

/// The active provider pair.
#[derive(Clone)]
pub struct Providers {
    pub embedder: Arc<dyn EmbeddingProvider>,
    /// `None` disables extraction.
    pub chat: Option<Arc<dyn ChatProvider>>,
}

impl Providers {
    pub fn disabled() -> Self {
        Self {
            embedder: Arc::new(NullEmbedder),
            chat: None,
        }
    }

    /// Model name of the embedder, if it can currently embed.
    pub fn active_model(&self) -> Option<&str> {
        self.embedder.available().then(|| self.embedder.model())
    }

    /// Embed `text`, folding provider errors into `None` after logging them.
    pub async fn embed_lenient(&self, text: &str) -> Option<Vec<f32>> {
        if !self.embedder.available() {
            return None;
        }
        match self.embedder.embed(text).await {
            Ok(v) => v.filter(|v| !v.is_empty()),
            Err(e) => {
                tracing::warn!(model = self.embedder.model(), error = %e, "embedding failed");
                None
            }
        }
    }
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers")
            .field("embedder", &self.embedder.model())
            .field("chat", &self.chat.as_ref().map(|c| c.model().to_string()))
            .finish()
    }
}

/// Build the provider pair described by `config`.
///
/// `provider = "none"` yields [`NullEmbedder`] or no chat model. `openai` and
/// `ollama` both speak the OpenAI-compatible HTTP API.
pub fn create_providers(config: &AnamnesisConfig) -> Result<Providers> {
    let embedder: Arc<dyn EmbeddingProvider> = if uses_http(&config.embedding)? {
        Arc::new(http::HttpEmbedder::new(&config.embedding)?)
    } else {
        Arc::new(NullEmbedder)
    };
    let chat: Option<Arc<dyn ChatProvider>> = if uses_http(&config.llm)? {
        Some(Arc::new(http::HttpChat::new(&config.llm)?))
    } else {
        None
    };

    tracing::info!(
        embedding = %config.embedding.provider,
        embedding_model = %config.embedding.model,
        llm = %config.llm.provider,
        llm_model = %config.llm.model,
        "providers configured"
    );
    Ok(Providers { embedder, chat })
}

fn uses_http(config: &ProviderConfig) -> Result<bool> {
    if config.is_disabled() {
        return Ok(false);
    }
    match config.provider.as_str() {
        "openai" | "ollama" => Ok(true),
        other => anyhow::bail!("unknown provider: {other}. Supported: none, openai, ollama"),
    }
}
