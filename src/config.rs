use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AnamnesisConfig {
    pub log: LogConfig,
    pub storage: StorageConfig,
    pub embedding: ProviderConfig,
    pub llm: ProviderConfig,
    pub search: SearchConfig,
    pub maintenance: MaintenanceConfig,
    pub ingestion: IngestionConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

/// Connection settings for an OpenAI-compatible endpoint.
///
/// Used twice: once for embeddings, once for the chat model that drives
/// extraction. `provider = "none"` disables the capability.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub provider: String,
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key, if any.
    pub api_key_env: Option<String>,
    pub timeout_secs: u64,
}

/// Per-source fusion weights.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct SearchWeights {
    pub vector: f64,
    pub keyword: f64,
    pub graph: f64,
    pub recency: f64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub weights: SearchWeights,
    pub rrf_k: f64,
    pub graph_depth: usize,
    pub default_max_results: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    pub interval_hours: u64,
    pub importance_decay_rate: f64,
    pub confidence_decay_rate: f64,
    pub min_importance: f64,
    pub min_confidence: f64,
    pub access_boost: f64,
    pub max_importance: f64,
    pub forgotten_retention_days: i64,
    pub duplicate_threshold: f64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct IngestionConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub transcript_batch_size: usize,
    pub dedup_threshold: f64,
}

impl Default for AnamnesisConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            storage: StorageConfig::default(),
            embedding: ProviderConfig::embedding_default(),
            llm: ProviderConfig::chat_default(),
            search: SearchConfig::default(),
            maintenance: MaintenanceConfig::default(),
            ingestion: IngestionConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_anamnesis_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: "none".into(),
            base_url: String::new(),
            model: String::new(),
            api_key_env: None,
            timeout_secs: 30,
        }
    }
}

impl ProviderConfig {
    fn embedding_default() -> Self {
        Self {
            provider: "ollama".into(),
            base_url: "http://localhost:11434/v1".into(),
            model: "nomic-embed-text".into(),
            ..Self::default()
        }
    }

    fn chat_default() -> Self {
        Self {
            provider: "ollama".into(),
            base_url: "http://localhost:11434/v1".into(),
            model: "llama3.1".into(),
            timeout_secs: 120,
            ..Self::default()
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.provider == "none" || self.base_url.is_empty() || self.model.is_empty()
    }
}

impl Default for SearchWeights {
    fn default() -> Self {
        Self {
            vector: 0.4,
            keyword: 0.3,
            graph: 0.15,
            recency: 0.15,
        }
    }
}

impl SearchWeights {
    /// Scale the weights so they sum to 1. All-zero (or negative) input
    /// falls back to the defaults.
    pub fn normalized(self) -> Self {
        let clamp = |w: f64| if w.is_finite() { w.max(0.0) } else { 0.0 };
        let (v, k, g, r) = (
            clamp(self.vector),
            clamp(self.keyword),
            clamp(self.graph),
            clamp(self.recency),
        );
        let sum = v + k + g + r;
        if sum <= 0.0 {
            return Self::default();
        }
        Self {
            vector: v / sum,
            keyword: k / sum,
            graph: g / sum,
            recency: r / sum,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            weights: SearchWeights::default(),
            rrf_k: 60.0,
            graph_depth: 1,
            default_max_results: 10,
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_hours: 24,
            importance_decay_rate: 0.98,
            confidence_decay_rate: 0.99,
            min_importance: 0.1,
            min_confidence: 0.1,
            access_boost: 0.05,
            max_importance: 1.0,
            forgotten_retention_days: 30,
            duplicate_threshold: 0.95,
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            include: vec!["**/*.md".into(), "**/*.txt".into()],
            exclude: vec!["**/.git/**".into(), "**/node_modules/**".into()],
            transcript_batch_size: 5,
            dedup_threshold: 0.92,
        }
    }
}

/// Returns `~/.anamnesis/`
pub fn default_anamnesis_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".anamnesis")
}

/// Returns the default config file path: `~/.anamnesis/config.toml`
pub fn default_config_path() -> PathBuf {
    default_anamnesis_dir().join("config.toml")
}

impl AnamnesisConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            AnamnesisConfig::default()
        };

        config.apply_env_overrides();
        config.search.weights = config.search.weights.normalized();
        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ANAMNESIS_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("ANAMNESIS_LOG_LEVEL") {
            self.log.level = val;
        }
        if let Ok(val) = std::env::var("ANAMNESIS_EMBEDDING_MODEL") {
            self.embedding.model = val;
        }
        if let Ok(val) = std::env::var("ANAMNESIS_LLM_MODEL") {
            self.llm.model = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AnamnesisConfig::default();
        assert_eq!(config.log.level, "info");
        assert_eq!(config.search.rrf_k, 60.0);
        assert_eq!(config.maintenance.interval_hours, 24);
        assert!(config.storage.db_path.ends_with("memory.db"));
        let w = config.search.weights;
        assert!((w.vector + w.keyword + w.graph + w.recency - 1.0).abs() < 1e-9);
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[log]
level = "debug"

[storage]
db_path = "/tmp/test.db"

[search.weights]
vector = 0.0
keyword = 1.0

[ingestion]
transcript_batch_size = 2
"#;
        let config: AnamnesisConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.storage.db_path, "/tmp/test.db");
        assert_eq!(config.search.weights.vector, 0.0);
        assert_eq!(config.search.weights.keyword, 1.0);
        // unset weights keep their defaults
        assert_eq!(config.search.weights.graph, 0.15);
        assert_eq!(config.ingestion.transcript_batch_size, 2);
        assert_eq!(config.search.rrf_k, 60.0);
    }

    #[test]
    fn weights_normalize_to_one() {
        let w = SearchWeights {
            vector: 2.0,
            keyword: 1.0,
            graph: 1.0,
            recency: 0.0,
        }
        .normalized();
        assert!((w.vector - 0.5).abs() < 1e-9);
        assert!((w.keyword - 0.25).abs() < 1e-9);
        assert_eq!(w.recency, 0.0);
    }

    #[test]
    fn all_zero_weights_fall_back_to_defaults() {
        let w = SearchWeights {
            vector: 0.0,
            keyword: 0.0,
            graph: 0.0,
            recency: 0.0,
        }
        .normalized();
        assert_eq!(w, SearchWeights::default());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AnamnesisConfig::default();
        std::env::set_var("ANAMNESIS_DB", "/tmp/override.db");
        std::env::set_var("ANAMNESIS_LOG_LEVEL", "trace");

        config.apply_env_overrides();

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.log.level, "trace");

        std::env::remove_var("ANAMNESIS_DB");
        std::env::remove_var("ANAMNESIS_LOG_LEVEL");
    }

    #[test]
    fn disabled_provider() {
        let mut p = ProviderConfig::default();
        assert!(p.is_disabled());
        p.provider = "openai".into();
        p.base_url = "https://api.openai.com/v1".into();
        p.model = "text-embedding-3-small".into();
        assert!(!p.is_disabled());
    }
}
