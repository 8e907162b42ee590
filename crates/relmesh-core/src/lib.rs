//! Relmesh core - relationship catalog, graph construction, and analysis.
//!
//! This crate builds a directed graph over the typed relationships between
//! business entities and provides the pure analysis layer on top of it:
//! cycle detection, hierarchy leveling, reachability and path search,
//! strongly connected components, and dependency analysis. Everything here
//! is synchronous and lock-free; the graph is built once from an immutable
//! catalog and can be shared freely.

pub mod catalog;
pub mod error;
pub mod graph;
pub mod traversal;

pub use catalog::{
    CascadeAction, CascadeRules, LoadStrategy, QueryFrequency, RelationCatalog, RelationDef,
    RelationKind, RelationMetadata,
};
pub use error::Error;
pub use graph::{Cycle, EntityNode, GraphStats, RelationshipGraph};
pub use traversal::{
    analyze_dependencies, breadth_first, depth_first, edge_cost, find_all_paths,
    find_relationship_paths, find_shortest_path, strongly_connected_components,
    DependencyAnalysis, Direction, RelationPath, RiskLevel, Traversal, TraversalOptions,
    TraversalPath, TraversalStats,
};
