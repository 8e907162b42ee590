//! Relationship catalog for relmesh.
//!
//! The catalog holds the typed relationship definitions between business
//! entities and is the immutable input to graph construction.

mod catalog;
mod relation;

pub use catalog::RelationCatalog;
pub use relation::{
    CascadeAction, CascadeRules, LoadStrategy, QueryFrequency, RelationDef, RelationKind,
    RelationMetadata,
};
