//! Typed failures that callers may want to match on.
//!
//! Everything else travels as [`anyhow::Error`]; these variants can be
//! recovered with `err.downcast_ref::<GraphError>()`.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("memory manager is closed")]
    Closed,
    #[error("memory not found: {0}")]
    MemoryNotFound(String),
    #[error("unknown sort key: {0}")]
    UnknownSortKey(String),
    #[error("unknown memory type: {0}")]
    UnknownMemoryType(String),
    #[error("unknown relation type: {0}")]
    UnknownRelation(String),
}
