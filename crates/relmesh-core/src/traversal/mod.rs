//! Graph traversal and analysis.
//!
//! Reachability search, cost-weighted shortest paths, exhaustive path
//! enumeration, strongly connected components, and per-entity dependency
//! analysis over the immutable relationship graph.

mod analysis;
mod cost;
mod paths;
mod scc;
mod search;

pub use analysis::{analyze_dependencies, DependencyAnalysis, RiskLevel};
pub use cost::{edge_cost, BASE_COST, MIN_EDGE_COST};
pub use paths::{find_all_paths, find_relationship_paths, find_shortest_path, RelationPath};
pub use scc::{component_of, strongly_connected_components};
pub use search::{
    breadth_first, depth_first, Direction, EdgeFilter, Traversal, TraversalOptions, TraversalPath,
    TraversalStats,
};
