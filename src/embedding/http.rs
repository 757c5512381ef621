//! OpenAI-compatible HTTP providers (`/embeddings`, `/chat/completions`).
//!
//! Works against OpenAI itself and against local servers exposing the same
//! API, such as Ollama's `/v1` endpoint.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ChatProvider, EmbeddingProvider};
use crate::config::ProviderConfig;

fn build_client(config: &ProviderConfig) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .build()
        .context("failed to create HTTP client")
}

fn resolve_api_key(config: &ProviderConfig) -> Option<String> {
    let var = config.api_key_env.as_deref()?;
    match std::env::var(var) {
        Ok(key) if !key.is_empty() => Some(key),
        _ => {
            tracing::warn!(env = var, "API key variable not set; sending requests unauthenticated");
            None
        }
    }
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{path}", base_url.trim_end_matches('/'))
}

async fn post_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
    client: &Client,
    url: &str,
    api_key: Option<&str>,
    body: &Req,
) -> Result<Resp> {
    let mut request = client.post(url).json(body);
    if let Some(key) = api_key {
        request = request.bearer_auth(key);
    }
    let response = request
        .send()
        .await
        .with_context(|| format!("request to {url} failed"))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("request to {url} failed: HTTP {status} - {body}");
    }
    response
        .json()
        .await
        .with_context(|| format!("failed to parse response from {url}"))
}

// ── Embeddings ──

pub struct HttpEmbedder {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbedder {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            url: endpoint(&config.base_url, "embeddings"),
            model: config.model.clone(),
            api_key: resolve_api_key(config),
        })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: vec![text],
        };
        let response: EmbeddingResponse =
            post_json(&self.client, &self.url, self.api_key.as_deref(), &request).await?;
        Ok(response.data.into_iter().next().map(|d| d.embedding))
    }
}

// ── Chat ──

pub struct HttpChat {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpChat {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            url: endpoint(&config.base_url, "chat/completions"),
            model: config.model.clone(),
            api_key: resolve_api_key(config),
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ChatProvider for HttpChat {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.0,
        };
        let response: ChatResponse =
            post_json(&self.client, &self.url, self.api_key.as_deref(), &request).await?;
        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}
