//! The composition root: one database, the active providers, and the
//! background maintenance loop.
//!
//! A [`Manager`] is built once at startup ([`Manager::open`]) and handed to
//! every consumer by reference. The embedding/chat providers live in an
//! [`ArcSwap`] snapshot so the hot path (an embed per write and per search)
//! never takes a lock; provider swaps are serialized on a separate mutex.
//! After [`Manager::close`], every operation fails with [`GraphError::Closed`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AnamnesisConfig;
use crate::db::{self, HealthReport, SharedConnection};
use crate::embedding::{create_providers, Providers};
use crate::error::GraphError;
use crate::ingest::extractor::{ExtractionContext, ExtractionOutcome, Extractor};
use crate::ingest::file::FileSource;
use crate::ingest::transcript::TranscriptSource;
use crate::ingest::{IngestReport, IngestSource, Ingestor};
use crate::memory::associations::{self, AssociationResult, Neighbor};
use crate::memory::maintenance::{self, next_cron_occurrence, MaintenanceReport, Maintainer};
use crate::memory::metadata::{self, Metadata, TriggerKind};
use crate::memory::query::QueryBuilder;
use crate::memory::search::{QueryVector, SearchQuery, SearchResponse, Searcher};
use crate::memory::stats::{memory_stats, StatsResponse};
use crate::memory::store;
use crate::memory::types::{Association, Memory, NewAssociation, NewMemory};

/// Memories embedded per database round-trip during backfill.
const BACKFILL_CHUNK: usize = 64;

/// Published by the configuration layer after a new config is accepted.
#[derive(Debug, Clone)]
pub enum ConfigEvent {
    Applied(Arc<AnamnesisConfig>),
}

pub struct Manager {
    db: SharedConnection,
    db_path: Option<PathBuf>,
    config: ArcSwap<AnamnesisConfig>,
    providers: ArcSwap<Providers>,
    swap_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

/// Owns the running maintenance loop. Dropping the handle without calling
/// [`MaintenanceHandle::stop`] leaves the loop running until the manager closes.
pub struct MaintenanceHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Signal the loop and wait for an in-flight run to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "maintenance task ended abnormally");
        }
    }
}

impl Manager {
    /// Open the configured database file and build providers from `config`.
    pub fn open(config: AnamnesisConfig) -> Result<Self> {
        let db_path = config.resolved_db_path();
        let conn = db::open_database(&db_path)?;

        let providers = create_providers(&config)?;
        let mut manager = Self::new(conn, config, providers);
        manager.db_path = Some(db_path);
        Ok(manager)
    }

    /// Assemble a manager from an already-migrated connection.
    pub fn new(conn: Connection, config: AnamnesisConfig, providers: Providers) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
            db_path: None,
            config: ArcSwap::from_pointee(config),
            providers: ArcSwap::from_pointee(providers),
            swap_lock: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> Arc<AnamnesisConfig> {
        self.config.load_full()
    }

    pub fn providers(&self) -> Arc<Providers> {
        self.providers.load_full()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GraphError::Closed.into());
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the manager closed. In-flight calls finish; new ones fail.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("memory manager closed");
        }
    }

    // ── Providers and configuration ──

    /// Install a new provider snapshot. When the embedding model changes,
    /// vectors from other models are cleared and the count returned.
    pub async fn set_providers(&self, providers: Providers) -> Result<usize> {
        self.ensure_open()?;
        let _guard = self.swap_lock.lock().await;

        let previous = self.providers.load_full();
        let old_model = previous.active_model().map(str::to_string);
        let new_model = providers.active_model().map(str::to_string);
        self.providers.store(Arc::new(providers));

        let invalidated = match new_model {
            Some(model) if old_model.as_deref() != Some(model.as_str()) => {
                let active = model.clone();
                let n = db::call(&self.db, move |conn| store::invalidate_embeddings(conn, &active)).await?;
                info!(model = %model, invalidated = n, "embedding model changed");
                n
            }
            _ => 0,
        };
        Ok(invalidated)
    }

    /// Adopt a new configuration: rebuild providers and swap them in.
    pub async fn apply_config(&self, config: Arc<AnamnesisConfig>) -> Result<usize> {
        self.ensure_open()?;
        let providers = create_providers(&config)?;
        self.config.store(config);
        self.set_providers(providers).await
    }

    /// Apply every [`ConfigEvent`] received until the channel closes or the
    /// manager is closed.
    pub fn spawn_config_listener(self: &Arc<Self>, mut rx: broadcast::Receiver<ConfigEvent>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ConfigEvent::Applied(config)) => {
                        if manager.is_closed() {
                            break;
                        }
                        if let Err(e) = manager.apply_config(config).await {
                            warn!(error = %e, "failed to apply configuration");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "config listener lagged; waiting for the next event");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("config listener stopped");
        })
    }

    // ── Memories ──

    /// Persist a memory and embed it with the active provider when possible.
    pub async fn create_memory(&self, new: NewMemory) -> Result<Memory> {
        self.ensure_open()?;
        let providers = self.providers.load_full();
        let embedding = providers.embed_lenient(&new.content).await;
        let model = providers.active_model().map(str::to_string);

        let memory = db::call(&self.db, move |conn| {
            let mut memory = store::create_memory(conn, new)?;
            if let (Some(embedding), Some(model)) = (embedding, model) {
                store::update_embedding(conn, &memory.uid, &embedding, &model)?;
                memory.embedding = Some(embedding);
                memory.embedding_model = Some(model);
            }
            Ok(memory)
        })
        .await?;
        debug!(memory_id = %memory.uid, memory_type = %memory.memory_type, "memory created");
        Ok(memory)
    }

    pub async fn get_memory(&self, uid: &str) -> Result<Option<Memory>> {
        self.ensure_open()?;
        let uid = uid.to_string();
        db::call(&self.db, move |conn| store::get_memory(conn, &uid)).await
    }

    /// Rewrite every mutable field. A content change drops the old vector and
    /// re-embeds.
    pub async fn update_memory(&self, memory: Memory) -> Result<bool> {
        self.ensure_open()?;
        let uid = memory.uid.clone();
        let updated = db::call(&self.db, move |conn| store::update_memory(conn, &memory)).await?;
        if updated {
            self.embed_if_missing(&uid).await?;
        }
        Ok(updated)
    }

    async fn embed_if_missing(&self, uid: &str) -> Result<()> {
        let providers = self.providers.load_full();
        let Some(model) = providers.active_model().map(str::to_string) else {
            return Ok(());
        };
        let Some(memory) = self.get_memory(uid).await? else {
            return Ok(());
        };
        if memory.embedding_model.is_some() {
            return Ok(());
        }
        if let Some(embedding) = providers.embed_lenient(&memory.content).await {
            let uid = uid.to_string();
            db::call(&self.db, move |conn| store::update_embedding(conn, &uid, &embedding, &model)).await?;
        }
        Ok(())
    }

    pub async fn forget_memory(&self, uid: &str) -> Result<bool> {
        self.ensure_open()?;
        let uid = uid.to_string();
        db::call(&self.db, move |conn| store::forget_memory(conn, &uid)).await
    }

    pub async fn delete_memory(&self, uid: &str) -> Result<bool> {
        self.ensure_open()?;
        let uid = uid.to_string();
        db::call(&self.db, move |conn| store::delete_memory(conn, &uid)).await
    }

    pub async fn touch_memory(&self, uid: &str) -> Result<bool> {
        self.ensure_open()?;
        let uid = uid.to_string();
        db::call(&self.db, move |conn| store::touch_memory(conn, &uid)).await
    }

    // ── Associations ──

    pub async fn create_association(&self, new: NewAssociation) -> Result<AssociationResult> {
        self.ensure_open()?;
        db::call(&self.db, move |conn| associations::create_association(conn, new)).await
    }

    pub async fn associations_for(&self, uid: &str) -> Result<Vec<Association>> {
        self.ensure_open()?;
        let uid = uid.to_string();
        db::call(&self.db, move |conn| associations::associations_for(conn, &uid)).await
    }

    pub async fn delete_association(&self, uid: &str) -> Result<bool> {
        self.ensure_open()?;
        let uid = uid.to_string();
        db::call(&self.db, move |conn| associations::delete_association(conn, &uid)).await
    }

    pub async fn neighbors(&self, uid: &str, depth: usize) -> Result<Vec<Neighbor>> {
        self.ensure_open()?;
        let uid = uid.to_string();
        db::call(&self.db, move |conn| associations::neighbors(conn, &uid, depth)).await
    }

    // ── Metadata ──

    /// Upsert the extension row for `uid`. The variant must match the memory's
    /// type. Cron routines get their next trigger computed immediately.
    pub async fn set_metadata(&self, uid: &str, meta: Metadata) -> Result<()> {
        self.ensure_open()?;
        let uid = uid.to_string();
        db::call(&self.db, move |conn| {
            let mut memory =
                store::get_memory(conn, &uid)?.ok_or_else(|| GraphError::MemoryNotFound(uid.clone()))?;
            anyhow::ensure!(
                memory.memory_type == meta.memory_type(),
                "{} metadata cannot be attached to a {} memory",
                meta.memory_type(),
                memory.memory_type
            );
            metadata::upsert_metadata(conn, memory.id, &meta)?;

            if let Metadata::Routine(routine) = &meta {
                if routine.trigger_kind == TriggerKind::Cron {
                    memory.next_trigger_at = next_cron_occurrence(&routine.trigger_value, Utc::now());
                    store::update_memory(conn, &memory)?;
                }
            }
            Ok(())
        })
        .await
    }

    pub async fn get_metadata(&self, uid: &str) -> Result<Option<Metadata>> {
        self.ensure_open()?;
        let uid = uid.to_string();
        db::call(&self.db, move |conn| {
            let Some(memory) = store::get_memory(conn, &uid)? else {
                return Ok(None);
            };
            metadata::get_metadata(conn, memory.id, memory.memory_type)
        })
        .await
    }

    // ── Retrieval ──

    pub async fn query(&self, builder: QueryBuilder) -> Result<Vec<Memory>> {
        self.ensure_open()?;
        db::call(&self.db, move |conn| builder.execute(conn)).await
    }

    pub async fn count(&self, builder: QueryBuilder) -> Result<u64> {
        self.ensure_open()?;
        db::call(&self.db, move |conn| builder.count(conn)).await
    }

    /// Hybrid search. Every returned memory is touched.
    pub async fn search(&self, query: SearchQuery) -> Result<SearchResponse> {
        self.ensure_open()?;
        let providers = self.providers.load_full();
        let searcher = Searcher::new(self.config.load().search.clone());
        let embedding = match query.text.as_deref() {
            Some(text) if searcher.config().weights.vector > 0.0 && !text.trim().is_empty() => {
                providers.embed_lenient(text).await
            }
            _ => None,
        };
        let model = providers.active_model().map(str::to_string);

        db::call(&self.db, move |conn| {
            let vector = match (&embedding, &model) {
                (Some(e), Some(m)) => Some(QueryVector { embedding: e, model: m }),
                _ => None,
            };
            let response = searcher.search(conn, &query, vector)?;
            let uids: Vec<&str> = response.results.iter().map(|r| r.memory.uid.as_str()).collect();
            store::touch_memories(conn, &uids)?;
            Ok(response)
        })
        .await
    }

    pub async fn due_routines(&self, now: DateTime<Utc>) -> Result<Vec<Memory>> {
        self.ensure_open()?;
        db::call(&self.db, move |conn| maintenance::due_routines(conn, now)).await
    }

    // ── Maintenance ──

    pub async fn run_maintenance(&self) -> Result<MaintenanceReport> {
        self.ensure_open()?;
        let maintainer = Maintainer::new(self.config.load().maintenance.clone());
        let active_model = self.providers.load().active_model().map(str::to_string);
        db::call(&self.db, move |conn| maintainer.run(conn, active_model.as_deref())).await
    }

    /// Start the periodic maintenance loop. The first run happens one interval
    /// after start. Call at most once per manager.
    pub fn start_maintenance(self: &Arc<Self>) -> MaintenanceHandle {
        let hours = self.config.load().maintenance.interval_hours.max(1);
        let period = Duration::from_secs(hours * 3600);
        self.start_maintenance_every(period)
    }

    /// [`Manager::start_maintenance`] with an explicit period.
    pub fn start_maintenance_every(self: &Arc<Self>, period: Duration) -> MaintenanceHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let manager = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            info!(period_secs = period.as_secs(), "maintenance loop started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match manager.run_maintenance().await {
                            Ok(_) => {}
                            Err(e) if e.downcast_ref::<GraphError>() == Some(&GraphError::Closed) => break,
                            Err(e) => warn!(error = %e, "maintenance run failed"),
                        }
                    }
                }
            }
            info!("maintenance loop stopped");
        });

        MaintenanceHandle { cancel, task }
    }

    // ── Ingestion ──

    /// Drive `source` through extraction. Requires a chat provider.
    pub async fn ingest(
        &self,
        source: &dyn IngestSource,
        batch_size: usize,
        cancel: CancellationToken,
    ) -> Result<IngestReport> {
        self.ensure_open()?;
        let ingestor = Ingestor::new(Arc::clone(&self.db), self.extractor()?, batch_size);
        ingestor.run(source, cancel).await
    }

    /// Ingest files under `root` using the configured globs, one file per call.
    pub async fn ingest_files(&self, root: impl Into<PathBuf>, cancel: CancellationToken) -> Result<IngestReport> {
        let config = self.config.load_full();
        let source = FileSource::new(root, &config.ingestion.include, &config.ingestion.exclude);
        self.ingest(&source, 1, cancel).await
    }

    /// Ingest `*.jsonl` transcripts, batched per the configuration.
    pub async fn ingest_transcripts(&self, dir: impl Into<PathBuf>, cancel: CancellationToken) -> Result<IngestReport> {
        let batch_size = self.config.load().ingestion.transcript_batch_size;
        let source = TranscriptSource::new(dir);
        self.ingest(&source, batch_size, cancel).await
    }

    /// Extract memories from one piece of text, e.g. a finished conversation.
    pub async fn extract(&self, text: &str, ctx: &ExtractionContext) -> Result<ExtractionOutcome> {
        self.ensure_open()?;
        self.extractor()?.extract(text, ctx).await
    }

    fn extractor(&self) -> Result<Extractor> {
        let providers = self.providers.load_full();
        let chat = providers
            .chat
            .clone()
            .context("extraction requires an LLM provider; set [llm] provider in config")?;
        let config = self.config.load();
        Ok(Extractor::new(
            Arc::clone(&self.db),
            chat,
            Providers::clone(&providers),
            &config.search,
            config.ingestion.dedup_threshold,
        ))
    }

    // ── Embeddings ──

    /// Embed active memories that have no vector for the current model.
    /// Returns how many were embedded.
    pub async fn backfill_embeddings(&self) -> Result<usize> {
        self.ensure_open()?;
        let providers = self.providers.load_full();
        let Some(model) = providers.active_model().map(str::to_string) else {
            return Ok(0);
        };

        let mut total = 0;
        loop {
            let pending = db::call(&self.db, |conn| store::memories_missing_embedding(conn, BACKFILL_CHUNK)).await?;
            if pending.is_empty() {
                break;
            }

            let mut embedded = Vec::with_capacity(pending.len());
            for (uid, content) in pending {
                if let Some(vector) = providers.embed_lenient(&content).await {
                    embedded.push((uid, vector));
                }
            }
            if embedded.is_empty() {
                warn!("embedding provider produced no vectors; stopping backfill");
                break;
            }

            let model = model.clone();
            let n = db::call(&self.db, move |conn| {
                let mut n = 0;
                for (uid, vector) in &embedded {
                    if store::update_embedding(conn, uid, vector, &model)? {
                        n += 1;
                    }
                }
                Ok(n)
            })
            .await?;
            total += n;
            debug!(embedded = n, total, "backfill chunk stored");
        }

        info!(embedded = total, "embedding backfill finished");
        Ok(total)
    }

    /// Clear vectors produced by any model other than the active one.
    pub async fn invalidate_stale_embeddings(&self) -> Result<usize> {
        self.ensure_open()?;
        let Some(model) = self.providers.load().active_model().map(str::to_string) else {
            return Ok(0);
        };
        db::call(&self.db, move |conn| store::invalidate_embeddings(conn, &model)).await
    }

    // ── Introspection ──

    pub async fn stats(&self, username: Option<&str>) -> Result<StatsResponse> {
        self.ensure_open()?;
        let username = username.map(str::to_string);
        let db_path = self.db_path.clone();
        db::call(&self.db, move |conn| memory_stats(conn, username.as_deref(), db_path.as_deref())).await
    }

    pub async fn health(&self) -> Result<HealthReport> {
        self.ensure_open()?;
        db::call(&self.db, |conn| db::check_database_health(conn)).await
    }
}
