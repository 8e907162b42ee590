//! Core error types.

use thiserror::Error;

/// Errors raised by catalog loading and graph analysis.
#[derive(Debug, Error)]
pub enum Error {
    /// Entity name not present in the relationship graph.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// Relationship id not present in the catalog.
    #[error("unknown relationship: {0}")]
    UnknownRelation(String),

    /// Relationship id registered twice.
    #[error("duplicate relationship id: {0}")]
    DuplicateRelation(String),

    /// Relationship definition failed validation.
    #[error("invalid relationship '{id}': {reason}")]
    InvalidDefinition { id: String, reason: String },

    /// Catalog file could not be read.
    #[error("catalog file error: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog file could not be parsed.
    #[error("catalog parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
