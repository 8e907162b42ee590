//! Breadth-first and depth-first graph traversal.
//!
//! Both traversals enumerate every path discovered from the start entity,
//! parameterized by direction, depth bound, revisit policy, and an optional
//! edge predicate. Depth-first search runs on an explicit frame stack with
//! an index-based path buffer, never recursion.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::cost::edge_cost;
use crate::catalog::RelationDef;
use crate::error::Error;
use crate::graph::RelationshipGraph;

/// Which edges a traversal follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Follow outgoing edges (source to target).
    Forward,
    /// Follow incoming edges (target to source).
    Backward,
    /// Follow edges both ways.
    Bidirectional,
}

/// Predicate deciding whether a traversal may follow an edge.
pub type EdgeFilter = Box<dyn Fn(&RelationDef) -> bool + Send + Sync>;

/// Traversal parameters.
pub struct TraversalOptions {
    /// Edge direction to follow.
    pub direction: Direction,
    /// Maximum number of edges in a path.
    pub max_depth: usize,
    /// Allow a path to visit the same entity twice.
    pub allow_revisits: bool,
    /// Optional edge predicate; edges failing it are not followed.
    pub edge_filter: Option<EdgeFilter>,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self {
            direction: Direction::Forward,
            max_depth: 5,
            allow_revisits: false,
            edge_filter: None,
        }
    }
}

impl fmt::Debug for TraversalOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraversalOptions")
            .field("direction", &self.direction)
            .field("max_depth", &self.max_depth)
            .field("allow_revisits", &self.allow_revisits)
            .field("edge_filter", &self.edge_filter.is_some())
            .finish()
    }
}

impl TraversalOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the traversal direction.
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Set the depth bound.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Allow paths that revisit entities.
    pub fn allow_revisits(mut self) -> Self {
        self.allow_revisits = true;
        self
    }

    /// Restrict followed edges with a predicate.
    pub fn with_edge_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&RelationDef) -> bool + Send + Sync + 'static,
    {
        self.edge_filter = Some(Box::new(filter));
        self
    }
}

/// A single discovered path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversalPath {
    /// Visited entities, start first.
    pub entities: Vec<String>,
    /// Relationship ids along the path.
    pub relation_ids: Vec<String>,
    /// Number of edges.
    pub depth: usize,
    /// Cumulative edge cost.
    pub cost: f64,
}

impl TraversalPath {
    /// The start entity.
    pub fn start(&self) -> &str {
        self.entities.first().map(String::as_str).unwrap_or("")
    }

    /// The final entity.
    pub fn end(&self) -> &str {
        self.entities.last().map(String::as_str).unwrap_or("")
    }
}

/// Summary statistics over the discovered paths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraversalStats {
    /// Number of paths discovered.
    pub path_count: usize,
    /// Shortest path depth.
    pub shortest: usize,
    /// Longest path depth.
    pub longest: usize,
    /// Mean path depth.
    pub average_length: f64,
    /// Paths whose start entity equals their final entity.
    pub round_trips: usize,
}

impl TraversalStats {
    fn from_paths(paths: &[TraversalPath]) -> Self {
        if paths.is_empty() {
            return Self::default();
        }
        let depths: Vec<usize> = paths.iter().map(|p| p.depth).collect();
        Self {
            path_count: paths.len(),
            shortest: depths.iter().copied().min().unwrap_or(0),
            longest: depths.iter().copied().max().unwrap_or(0),
            average_length: depths.iter().sum::<usize>() as f64 / paths.len() as f64,
            round_trips: paths.iter().filter(|p| p.start() == p.end()).count(),
        }
    }
}

/// Result of a traversal: every discovered path plus statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Traversal {
    /// Every path discovered, in discovery order.
    pub paths: Vec<TraversalPath>,
    /// Summary statistics.
    pub stats: TraversalStats,
}

/// Edges reachable from an entity under the given direction and filter.
pub(crate) fn neighbors<'g>(
    graph: &'g RelationshipGraph,
    entity: &str,
    direction: Direction,
    filter: Option<&EdgeFilter>,
) -> Vec<(&'g RelationDef, &'g str)> {
    let mut out: Vec<(&RelationDef, &str)> = Vec::new();

    if matches!(direction, Direction::Forward | Direction::Bidirectional) {
        for rel in graph.relations_from(entity) {
            out.push((rel, rel.target_entity.as_str()));
        }
    }
    if matches!(direction, Direction::Backward | Direction::Bidirectional) {
        for rel in graph.relations_to(entity) {
            out.push((rel, rel.source_entity.as_str()));
        }
    }

    if let Some(filter) = filter {
        out.retain(|(rel, _)| filter(rel));
    }
    out
}

/// Breadth-first traversal from `start`, returning every discovered path.
pub fn breadth_first(
    graph: &RelationshipGraph,
    start: &str,
    options: &TraversalOptions,
) -> Result<Traversal, Error> {
    if !graph.contains_entity(start) {
        return Err(Error::UnknownEntity(start.to_string()));
    }

    let mut paths = Vec::new();
    let mut queue: VecDeque<TraversalPath> = VecDeque::new();
    queue.push_back(TraversalPath {
        entities: vec![start.to_string()],
        relation_ids: Vec::new(),
        depth: 0,
        cost: 0.0,
    });

    while let Some(current) = queue.pop_front() {
        if current.depth >= options.max_depth {
            continue;
        }
        let here = current.end().to_string();
        for (rel, next) in neighbors(graph, &here, options.direction, options.edge_filter.as_ref())
        {
            if !options.allow_revisits && current.entities.iter().any(|e| e == next) {
                continue;
            }
            let mut extended = current.clone();
            extended.entities.push(next.to_string());
            extended.relation_ids.push(rel.id.clone());
            extended.depth += 1;
            extended.cost += edge_cost(rel);
            paths.push(extended.clone());
            queue.push_back(extended);
        }
    }

    let stats = TraversalStats::from_paths(&paths);
    Ok(Traversal { paths, stats })
}

/// Depth-first traversal from `start`, returning every discovered path.
pub fn depth_first(
    graph: &RelationshipGraph,
    start: &str,
    options: &TraversalOptions,
) -> Result<Traversal, Error> {
    if !graph.contains_entity(start) {
        return Err(Error::UnknownEntity(start.to_string()));
    }

    struct Frame {
        edges: Vec<(String, String, f64)>,
        next: usize,
    }

    let expand = |entity: &str| -> Frame {
        Frame {
            edges: neighbors(graph, entity, options.direction, options.edge_filter.as_ref())
                .into_iter()
                .map(|(rel, next)| (rel.id.clone(), next.to_string(), edge_cost(rel)))
                .collect(),
            next: 0,
        }
    };

    let mut paths = Vec::new();
    // Index-based path buffers, pushed and popped alongside the frame stack.
    let mut entity_path: Vec<String> = vec![start.to_string()];
    let mut relation_path: Vec<String> = Vec::new();
    let mut cost_path: Vec<f64> = Vec::new();
    let mut stack: Vec<Frame> = vec![expand(start)];

    loop {
        let depth = stack.len().saturating_sub(1);
        let Some(frame) = stack.last_mut() else {
            break;
        };
        if depth >= options.max_depth || frame.next >= frame.edges.len() {
            stack.pop();
            if stack.is_empty() {
                break;
            }
            entity_path.pop();
            relation_path.pop();
            cost_path.pop();
            continue;
        }

        let (rel_id, next_entity, cost) = frame.edges[frame.next].clone();
        frame.next += 1;

        if !options.allow_revisits && entity_path.iter().any(|e| e == &next_entity) {
            continue;
        }

        entity_path.push(next_entity.clone());
        relation_path.push(rel_id);
        cost_path.push(cost);

        paths.push(TraversalPath {
            entities: entity_path.clone(),
            relation_ids: relation_path.clone(),
            depth: relation_path.len(),
            cost: cost_path.iter().sum(),
        });

        stack.push(expand(&next_entity));
    }

    let stats = TraversalStats::from_paths(&paths);
    Ok(Traversal { paths, stats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{RelationCatalog, RelationDef, RelationKind};

    fn diamond_graph() -> RelationshipGraph {
        // Company -> Contact, Company -> Deal, Deal -> Contact
        let catalog = RelationCatalog::new(vec![
            RelationDef::one_to_many("r1", "contacts", "Company", "Contact", "company_id"),
            RelationDef::one_to_many("r2", "deals", "Company", "Deal", "company_id"),
            RelationDef::many_to_many("r3", "deal_contacts", "Deal", "Contact", "deal_id"),
        ])
        .unwrap();
        RelationshipGraph::build(&catalog)
    }

    #[test]
    fn test_bfs_finds_every_path() {
        let graph = diamond_graph();
        let result = breadth_first(&graph, "Company", &TraversalOptions::default()).unwrap();

        // Company->Contact, Company->Deal, Company->Deal->Contact.
        assert_eq!(result.paths.len(), 3);
        assert_eq!(result.stats.path_count, 3);
        assert_eq!(result.stats.shortest, 1);
        assert_eq!(result.stats.longest, 2);
        assert!(result
            .paths
            .iter()
            .any(|p| p.entities == ["Company", "Deal", "Contact"]));
    }

    #[test]
    fn test_dfs_matches_bfs_path_set() {
        let graph = diamond_graph();
        let options = TraversalOptions::default();

        let mut bfs: Vec<Vec<String>> = breadth_first(&graph, "Company", &options)
            .unwrap()
            .paths
            .into_iter()
            .map(|p| p.entities)
            .collect();
        let mut dfs: Vec<Vec<String>> = depth_first(&graph, "Company", &options)
            .unwrap()
            .paths
            .into_iter()
            .map(|p| p.entities)
            .collect();
        bfs.sort();
        dfs.sort();

        assert_eq!(bfs, dfs);
    }

    #[test]
    fn test_backward_traversal() {
        let graph = diamond_graph();
        let options = TraversalOptions::new().with_direction(Direction::Backward);
        let result = breadth_first(&graph, "Contact", &options).unwrap();

        // Contact<-Company, Contact<-Deal, Contact<-Deal<-Company.
        assert_eq!(result.paths.len(), 3);
        assert!(result
            .paths
            .iter()
            .any(|p| p.entities == ["Contact", "Deal", "Company"]));
    }

    #[test]
    fn test_max_depth_bound() {
        let graph = diamond_graph();
        let options = TraversalOptions::new().with_max_depth(1);
        let result = breadth_first(&graph, "Company", &options).unwrap();

        assert_eq!(result.paths.len(), 2);
        assert!(result.paths.iter().all(|p| p.depth == 1));
    }

    #[test]
    fn test_edge_filter() {
        let graph = diamond_graph();
        let options = TraversalOptions::new()
            .with_edge_filter(|rel| rel.kind != RelationKind::ManyToMany);
        let result = breadth_first(&graph, "Company", &options).unwrap();

        // The Deal->Contact hop is filtered out.
        assert_eq!(result.paths.len(), 2);
    }

    #[test]
    fn test_round_trip_counting() {
        let catalog = RelationCatalog::new(vec![
            RelationDef::one_to_many("r1", "b_of_a", "A", "B", "a_id"),
            RelationDef::one_to_many("r2", "a_of_b", "B", "A", "b_id"),
        ])
        .unwrap();
        let graph = RelationshipGraph::build(&catalog);

        let options = TraversalOptions::new().allow_revisits().with_max_depth(2);
        let result = breadth_first(&graph, "A", &options).unwrap();

        assert_eq!(result.stats.round_trips, 1);
        assert!(result
            .paths
            .iter()
            .any(|p| p.entities == ["A", "B", "A"]));
    }

    #[test]
    fn test_unknown_entity() {
        let graph = diamond_graph();
        let result = breadth_first(&graph, "Nowhere", &TraversalOptions::default());
        assert!(matches!(result, Err(Error::UnknownEntity(_))));
    }

    #[test]
    fn test_path_cost_accumulates() {
        let graph = diamond_graph();
        let result = breadth_first(&graph, "Company", &TraversalOptions::default()).unwrap();

        let two_hop = result
            .paths
            .iter()
            .find(|p| p.entities == ["Company", "Deal", "Contact"])
            .unwrap();
        // r2 (one-to-many, lazy): 2.0; r3 (many-to-many, lazy): 4.0.
        assert!((two_hop.cost - 6.0).abs() < f64::EPSILON);
    }
}
