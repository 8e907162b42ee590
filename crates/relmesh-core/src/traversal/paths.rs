//! Shortest-path search and exhaustive path enumeration.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use serde::{Deserialize, Serialize};

use super::cost::edge_cost;
use super::search::{depth_first, neighbors, Direction, TraversalOptions};
use crate::error::Error;
use crate::graph::RelationshipGraph;

/// A fully annotated path between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationPath {
    /// Start entity.
    pub source: String,
    /// Final entity.
    pub target: String,
    /// Visited entities, start first.
    pub entities: Vec<String>,
    /// Relationship ids along the path.
    pub relation_ids: Vec<String>,
    /// Number of hops.
    pub distance: usize,
    /// Cumulative edge cost.
    pub cost: f64,
    /// Minimal distance (and minimal cost among those) to this target.
    pub is_optimal: bool,
}

impl RelationPath {
    fn identity(entity: &str) -> Self {
        Self {
            source: entity.to_string(),
            target: entity.to_string(),
            entities: vec![entity.to_string()],
            relation_ids: Vec::new(),
            distance: 0,
            cost: 0.0,
            is_optimal: true,
        }
    }
}

/// Min-heap entry for Dijkstra, ordered by cumulative cost.
struct HeapEntry {
    cost: f64,
    entity: String,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost && self.entity == other.entity
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the BinaryHeap pops the cheapest entry first.
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.entity.cmp(&self.entity))
    }
}

/// Single-source Dijkstra over cumulative edge cost.
///
/// Follows outgoing edges from `from` to `to`; the first minimal-cost pop
/// of the target wins, with no further tie-breaking. Returns `None` when
/// the target is unreachable.
pub fn find_shortest_path(
    graph: &RelationshipGraph,
    from: &str,
    to: &str,
) -> Result<Option<RelationPath>, Error> {
    if !graph.contains_entity(from) {
        return Err(Error::UnknownEntity(from.to_string()));
    }
    if !graph.contains_entity(to) {
        return Err(Error::UnknownEntity(to.to_string()));
    }
    if from == to {
        return Ok(Some(RelationPath::identity(from)));
    }

    let mut dist: HashMap<String, f64> = HashMap::from([(from.to_string(), 0.0)]);
    let mut prev: HashMap<String, (String, String)> = HashMap::new();
    let mut heap = BinaryHeap::new();
    heap.push(HeapEntry {
        cost: 0.0,
        entity: from.to_string(),
    });

    while let Some(HeapEntry { cost, entity }) = heap.pop() {
        if entity == to {
            return Ok(Some(reconstruct(from, to, cost, &prev)));
        }
        if dist.get(&entity).is_some_and(|&d| cost > d) {
            continue;
        }

        for (rel, next) in neighbors(graph, &entity, Direction::Forward, None) {
            let next_cost = cost + edge_cost(rel);
            let better = match dist.get(next) {
                Some(&d) => next_cost < d,
                None => true,
            };
            if better {
                dist.insert(next.to_string(), next_cost);
                prev.insert(next.to_string(), (entity.clone(), rel.id.clone()));
                heap.push(HeapEntry {
                    cost: next_cost,
                    entity: next.to_string(),
                });
            }
        }
    }

    Ok(None)
}

fn reconstruct(
    from: &str,
    to: &str,
    cost: f64,
    prev: &HashMap<String, (String, String)>,
) -> RelationPath {
    let mut entities = vec![to.to_string()];
    let mut relation_ids = Vec::new();
    let mut cursor = to.to_string();

    while cursor != from {
        match prev.get(&cursor) {
            Some((parent, rel_id)) => {
                relation_ids.push(rel_id.clone());
                entities.push(parent.clone());
                cursor = parent.clone();
            }
            None => break,
        }
    }
    entities.reverse();
    relation_ids.reverse();

    RelationPath {
        source: from.to_string(),
        target: to.to_string(),
        distance: relation_ids.len(),
        entities,
        relation_ids,
        cost,
        is_optimal: true,
    }
}

/// Enumerate every path from `from` to `to` up to `max_depth` hops.
///
/// Paths are annotated with hop distance and cumulative cost; among paths
/// to the target, those with minimal distance and minimal cost among those
/// are flagged optimal. `from == to` yields exactly one zero-length,
/// zero-cost optimal path.
pub fn find_relationship_paths(
    graph: &RelationshipGraph,
    from: &str,
    to: &str,
    max_depth: usize,
) -> Result<Vec<RelationPath>, Error> {
    if !graph.contains_entity(to) {
        return Err(Error::UnknownEntity(to.to_string()));
    }
    if from == to {
        if !graph.contains_entity(from) {
            return Err(Error::UnknownEntity(from.to_string()));
        }
        return Ok(vec![RelationPath::identity(from)]);
    }

    let mut paths = enumerate(graph, from, max_depth)?;
    paths.retain(|p| p.target == to);
    mark_optimal(&mut paths);
    Ok(paths)
}

/// Enumerate every path from `from` to any reachable entity, flagging the
/// optimal path(s) per target.
pub fn find_all_paths(
    graph: &RelationshipGraph,
    from: &str,
    max_depth: usize,
) -> Result<Vec<RelationPath>, Error> {
    let mut paths = enumerate(graph, from, max_depth)?;
    mark_optimal(&mut paths);
    Ok(paths)
}

fn enumerate(
    graph: &RelationshipGraph,
    from: &str,
    max_depth: usize,
) -> Result<Vec<RelationPath>, Error> {
    let options = TraversalOptions::new()
        .with_direction(Direction::Forward)
        .with_max_depth(max_depth);
    let traversal = depth_first(graph, from, &options)?;

    Ok(traversal
        .paths
        .into_iter()
        .map(|p| RelationPath {
            source: from.to_string(),
            target: p.end().to_string(),
            distance: p.depth,
            cost: p.cost,
            entities: p.entities,
            relation_ids: p.relation_ids,
            is_optimal: false,
        })
        .collect())
}

fn mark_optimal(paths: &mut [RelationPath]) {
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, path) in paths.iter().enumerate() {
        groups.entry(path.target.clone()).or_default().push(index);
    }

    for indices in groups.values() {
        let min_distance = indices.iter().map(|&i| paths[i].distance).min();
        let Some(min_distance) = min_distance else {
            continue;
        };
        let min_cost = indices
            .iter()
            .filter(|&&i| paths[i].distance == min_distance)
            .map(|&i| paths[i].cost)
            .fold(f64::INFINITY, f64::min);

        for &i in indices {
            if paths[i].distance == min_distance && (paths[i].cost - min_cost).abs() < 1e-9 {
                paths[i].is_optimal = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{LoadStrategy, RelationCatalog, RelationDef, RelationMetadata};

    fn sample_graph() -> RelationshipGraph {
        // Company -> Contact directly (expensive) and via Deal (cheap edges).
        let catalog = RelationCatalog::new(vec![
            RelationDef::many_to_many("r1", "contacts", "Company", "Contact", "company_id")
                .with_load_strategy(LoadStrategy::OnDemand),
            RelationDef::one_to_many("r2", "deals", "Company", "Deal", "company_id")
                .with_load_strategy(LoadStrategy::Eager)
                .with_metadata(RelationMetadata::new().indexed()),
            RelationDef::one_to_many("r3", "deal_contacts", "Deal", "Contact", "deal_id")
                .with_load_strategy(LoadStrategy::Eager)
                .with_metadata(RelationMetadata::new().indexed()),
        ])
        .unwrap();
        RelationshipGraph::build(&catalog)
    }

    #[test]
    fn test_shortest_path_prefers_cheap_route() {
        let graph = sample_graph();
        let path = find_shortest_path(&graph, "Company", "Contact")
            .unwrap()
            .expect("path exists");

        // Direct many-to-many on-demand edge costs 5.0; the two indexed
        // eager one-to-many hops cost 0.1 less than that in total.
        assert_eq!(path.entities, ["Company", "Deal", "Contact"]);
        assert_eq!(path.distance, 2);
        assert!((path.cost - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_shortest_path_unreachable() {
        let graph = sample_graph();
        let path = find_shortest_path(&graph, "Contact", "Company").unwrap();
        assert!(path.is_none());
    }

    #[test]
    fn test_shortest_path_identity() {
        let graph = sample_graph();
        let path = find_shortest_path(&graph, "Deal", "Deal").unwrap().unwrap();

        assert_eq!(path.distance, 0);
        assert_eq!(path.cost, 0.0);
        assert!(path.is_optimal);
    }

    #[test]
    fn test_identity_enumeration() {
        let graph = sample_graph();
        let paths = find_relationship_paths(&graph, "Company", "Company", 5).unwrap();

        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].distance, 0);
        assert_eq!(paths[0].cost, 0.0);
        assert!(paths[0].is_optimal);
    }

    #[test]
    fn test_enumeration_flags_minimal_distance_path() {
        let graph = sample_graph();
        let paths = find_relationship_paths(&graph, "Company", "Contact", 5).unwrap();

        assert_eq!(paths.len(), 2);
        let direct = paths.iter().find(|p| p.distance == 1).unwrap();
        let via_deal = paths.iter().find(|p| p.distance == 2).unwrap();

        // Minimum distance wins the optimal flag even though it costs more.
        assert!(direct.is_optimal);
        assert!(!via_deal.is_optimal);
        assert!(direct.cost > via_deal.cost);
    }

    #[test]
    fn test_find_all_paths_groups_by_target() {
        let graph = sample_graph();
        let paths = find_all_paths(&graph, "Company", 5).unwrap();

        // Company->Contact, Company->Deal, Company->Deal->Contact.
        assert_eq!(paths.len(), 3);
        let deal_paths: Vec<_> = paths.iter().filter(|p| p.target == "Deal").collect();
        assert_eq!(deal_paths.len(), 1);
        assert!(deal_paths[0].is_optimal);
    }

    #[test]
    fn test_unknown_target_is_error() {
        let graph = sample_graph();
        assert!(find_relationship_paths(&graph, "Company", "Nowhere", 5).is_err());
    }
}
