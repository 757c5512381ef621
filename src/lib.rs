//! Long-term memory for personal assistants: a typed memory graph with hybrid
//! search and background upkeep.
//!
//! Memories are short natural-language statements with a type, an importance
//! and provenance. Thirteen types are supported; five pattern-like types carry
//! a typed metadata row:
//!
//! | Group | Types | Notes |
//! |-------|-------|-------|
//! | **Core** | identity, fact, preference, decision, event, observation, goal, todo | identity never decays |
//! | **Patterns** | routine, feedback, anomaly, correlation, prediction | routine/correlation/prediction carry a decaying confidence |
//!
//! # Architecture
//!
//! - **Storage**: SQLite (WAL) with FTS5 for keyword search and
//!   [sqlite-vec](https://github.com/asg017/sqlite-vec) for cosine distance
//! - **Search**: vector, keyword, graph and recency sources merged with
//!   weighted Reciprocal Rank Fusion
//! - **Maintenance**: decay, access boost, pruning, cron trigger recomputation
//!   and duplicate merging on a fixed interval
//! - **Ingestion**: files and chat transcripts streamed through an LLM
//!   extractor, skipping unchanged content by hash
//!
//! # Modules
//!
//! - [`config`]: TOML configuration with environment overrides
//! - [`db`]: connection setup, schema, migrations, health checks
//! - [`embedding`]: embedding and chat provider traits plus HTTP clients
//! - [`memory`]: store, query builder, search, associations, metadata, maintenance
//! - [`ingest`]: sources, ingestion driver, and the LLM extractor
//! - [`manager`]: the composition root that ties the above together

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod manager;
pub mod memory;

pub use error::GraphError;
pub use manager::{ConfigEvent, MaintenanceHandle, Manager};
