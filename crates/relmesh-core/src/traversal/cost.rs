//! Edge cost model for path search.
//!
//! Assigns every relationship edge a traversal cost from its kind, loading
//! strategy, and planner metadata. Costs are floored above zero so that
//! cumulative shortest-path search stays monotonic.

use crate::catalog::{LoadStrategy, QueryFrequency, RelationDef, RelationKind};

/// Base cost of traversing any edge.
pub const BASE_COST: f64 = 1.0;

/// Lower bound for a single edge; never zero or negative.
pub const MIN_EDGE_COST: f64 = 0.1;

/// Compute the traversal cost of a relationship edge.
pub fn edge_cost(rel: &RelationDef) -> f64 {
    let mut cost = BASE_COST;

    cost += match rel.kind {
        RelationKind::ManyToMany => 2.0,
        RelationKind::Polymorphic => 3.0,
        RelationKind::Hierarchical => 1.0,
        _ => 0.0,
    };

    cost += match rel.load_strategy {
        LoadStrategy::Lazy => 1.0,
        LoadStrategy::OnDemand => 2.0,
        LoadStrategy::Eager => -0.5,
        _ => 0.0,
    };

    if let Some(meta) = &rel.metadata {
        if meta.indexed {
            cost -= 0.5;
        }
        if meta.query_frequency == Some(QueryFrequency::High) {
            cost -= 0.25;
        }
    }

    cost.max(MIN_EDGE_COST)
}
