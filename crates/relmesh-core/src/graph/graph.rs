//! Relationship graph construction.
//!
//! Builds the node/edge graph from a [`RelationCatalog`]: adjacency sets,
//! dependency sets, hierarchy levels, and the detected cycle set. The graph
//! is built once and read-only afterward, so it can be shared across
//! consumers without locking.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::EntityNode;
use crate::catalog::{RelationCatalog, RelationDef, RelationKind};

/// A dependency cycle discovered during graph construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle {
    /// Entities on the cycle, in traversal order, unclosed.
    pub members: Vec<String>,
    /// Closed textual form, e.g. `"A -> B -> A"`.
    pub description: String,
}

/// Aggregate counts over a built graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    /// Number of distinct entities.
    pub entity_count: usize,
    /// Number of relationship edges.
    pub relation_count: usize,
    /// Edge count per relationship kind.
    pub kind_counts: HashMap<RelationKind, usize>,
    /// Highest hierarchy level assigned.
    pub max_level: u32,
    /// Number of recorded cycles.
    pub cycle_count: usize,
}

/// The entity relationship graph.
#[derive(Debug, Clone)]
pub struct RelationshipGraph {
    nodes: HashMap<String, EntityNode>,
    edges: HashMap<String, RelationDef>,
    levels: BTreeMap<u32, Vec<String>>,
    cycles: Vec<Cycle>,
}

impl RelationshipGraph {
    /// Build the graph from a catalog.
    ///
    /// For every relationship `A -> B`, the target gains `A` in its
    /// `depends_on` set and the source gains `B` in its `dependents` set.
    pub fn build(catalog: &RelationCatalog) -> Self {
        let mut nodes: HashMap<String, EntityNode> = HashMap::new();
        let mut edges = HashMap::with_capacity(catalog.len());

        for rel in catalog.iter() {
            {
                let source = nodes
                    .entry(rel.source_entity.clone())
                    .or_insert_with(|| EntityNode::new(&rel.source_entity));
                source.outgoing.insert(rel.id.clone());
                source.dependents.insert(rel.target_entity.clone());
            }
            {
                let target = nodes
                    .entry(rel.target_entity.clone())
                    .or_insert_with(|| EntityNode::new(&rel.target_entity));
                target.incoming.insert(rel.id.clone());
                target.depends_on.insert(rel.source_entity.clone());
            }

            edges.insert(rel.id.clone(), rel.clone());
        }

        let cycles = detect_cycles(&nodes);
        assign_levels(&mut nodes);

        let mut levels: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for node in nodes.values() {
            levels
                .entry(node.hierarchy_level)
                .or_default()
                .push(node.name.clone());
        }
        for names in levels.values_mut() {
            names.sort();
        }

        debug!(
            entities = nodes.len(),
            relations = edges.len(),
            cycles = cycles.len(),
            "relationship graph built"
        );

        Self {
            nodes,
            edges,
            levels,
            cycles,
        }
    }

    /// Get an entity node by name.
    pub fn node(&self, entity: &str) -> Option<&EntityNode> {
        self.nodes.get(entity)
    }

    /// Get a relationship by id.
    pub fn relation(&self, id: &str) -> Option<&RelationDef> {
        self.edges.get(id)
    }

    /// Relationships where the entity is the source, in id order.
    pub fn relations_from(&self, entity: &str) -> Vec<&RelationDef> {
        self.nodes
            .get(entity)
            .map(|node| {
                node.outgoing
                    .iter()
                    .filter_map(|id| self.edges.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Relationships where the entity is the target, in id order.
    pub fn relations_to(&self, entity: &str) -> Vec<&RelationDef> {
        self.nodes
            .get(entity)
            .map(|node| {
                node.incoming
                    .iter()
                    .filter_map(|id| self.edges.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Hierarchy level of an entity, if it exists.
    pub fn hierarchy_level(&self, entity: &str) -> Option<u32> {
        self.nodes.get(entity).map(|n| n.hierarchy_level)
    }

    /// Entities assigned to a hierarchy level, sorted by name.
    pub fn entities_at_level(&self, level: u32) -> &[String] {
        self.levels.get(&level).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Check whether the entity appears in the graph.
    pub fn contains_entity(&self, entity: &str) -> bool {
        self.nodes.contains_key(entity)
    }

    /// All entity names, sorted.
    pub fn entity_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Check whether any dependency cycle was recorded.
    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }

    /// The recorded cycle set.
    ///
    /// One cycle is recorded per discovered back-edge, which is not an
    /// enumeration of every cycle in the graph.
    pub fn cycles(&self) -> &[Cycle] {
        &self.cycles
    }

    /// All relationship edges, unordered.
    pub fn relations(&self) -> impl Iterator<Item = &RelationDef> {
        self.edges.values()
    }

    /// Order entities for deletion: descending hierarchy level, so the
    /// deepest dependents are removed before the entities they reference.
    /// Ties and unknown entities are ordered by name.
    pub fn sort_for_deletion(&self, entities: &[String]) -> Vec<String> {
        let mut ordered: Vec<String> = entities.to_vec();
        ordered.sort_by(|a, b| {
            let level_a = self.hierarchy_level(a).unwrap_or(0);
            let level_b = self.hierarchy_level(b).unwrap_or(0);
            level_b.cmp(&level_a).then_with(|| a.cmp(b))
        });
        ordered
    }

    /// Aggregate counts over the graph.
    pub fn stats(&self) -> GraphStats {
        let mut kind_counts: HashMap<RelationKind, usize> = HashMap::new();
        for rel in self.edges.values() {
            *kind_counts.entry(rel.kind).or_insert(0) += 1;
        }
        GraphStats {
            entity_count: self.nodes.len(),
            relation_count: self.edges.len(),
            kind_counts,
            max_level: self.levels.keys().next_back().copied().unwrap_or(0),
            cycle_count: self.cycles.len(),
        }
    }
}

/// Depth-first cycle detection over the `dependents` relation.
///
/// Walks each unvisited node with an explicit recursion stack; revisiting a
/// node already on the stack records the path slice from its first
/// occurrence. Records one cycle per discovered back-edge, deduplicated by
/// description.
fn detect_cycles(nodes: &HashMap<String, EntityNode>) -> Vec<Cycle> {
    struct Frame {
        name: String,
        children: Vec<String>,
        next: usize,
    }

    let mut names: Vec<&String> = nodes.keys().collect();
    names.sort();

    let mut visited: HashSet<String> = HashSet::new();
    let mut seen_descriptions: HashSet<String> = HashSet::new();
    let mut cycles = Vec::new();

    for start in names {
        if visited.contains(start) {
            continue;
        }

        let mut path: Vec<String> = vec![start.clone()];
        let mut on_path: HashSet<String> = HashSet::from([start.clone()]);
        let mut stack = vec![Frame {
            name: start.clone(),
            children: dependents_of(nodes, start),
            next: 0,
        }];
        visited.insert(start.clone());

        while let Some(frame) = stack.last_mut() {
            if frame.next < frame.children.len() {
                let child = frame.children[frame.next].clone();
                frame.next += 1;

                if on_path.contains(&child) {
                    if let Some(pos) = path.iter().position(|n| n == &child) {
                        let members: Vec<String> = path[pos..].to_vec();
                        let mut closed = members.clone();
                        closed.push(child.clone());
                        let description = closed.join(" -> ");
                        if seen_descriptions.insert(description.clone()) {
                            cycles.push(Cycle {
                                members,
                                description,
                            });
                        }
                    }
                } else if !visited.contains(&child) {
                    visited.insert(child.clone());
                    on_path.insert(child.clone());
                    path.push(child.clone());
                    stack.push(Frame {
                        children: dependents_of(nodes, &child),
                        name: child,
                        next: 0,
                    });
                }
            } else {
                on_path.remove(&frame.name);
                path.pop();
                stack.pop();
            }
        }
    }

    cycles
}

fn dependents_of(nodes: &HashMap<String, EntityNode>, name: &str) -> Vec<String> {
    nodes
        .get(name)
        .map(|n| n.dependents.iter().cloned().collect())
        .unwrap_or_default()
}

/// Assign hierarchy levels: 0 for entities with no dependencies, otherwise
/// `1 + max(level(dep))`, memoized. A dependency that is itself being
/// computed (a cycle member) contributes level 0 to that branch instead of
/// recursing. Entities inside cycles therefore get levels derived from this
/// short-circuit, not a guaranteed topological level.
fn assign_levels(nodes: &mut HashMap<String, EntityNode>) {
    let mut memo: HashMap<String, u32> = HashMap::new();
    let mut names: Vec<String> = nodes.keys().cloned().collect();
    names.sort();

    for name in &names {
        let mut computing = HashSet::new();
        compute_level(name, nodes, &mut memo, &mut computing);
    }

    for (name, level) in memo {
        if let Some(node) = nodes.get_mut(&name) {
            node.hierarchy_level = level;
        }
    }
}

fn compute_level(
    name: &str,
    nodes: &HashMap<String, EntityNode>,
    memo: &mut HashMap<String, u32>,
    computing: &mut HashSet<String>,
) -> u32 {
    if let Some(&level) = memo.get(name) {
        return level;
    }
    computing.insert(name.to_string());

    let deps: Vec<String> = nodes
        .get(name)
        .map(|n| n.depends_on.iter().cloned().collect())
        .unwrap_or_default();

    let level = if deps.is_empty() {
        0
    } else {
        let max_dep = deps
            .iter()
            .map(|dep| {
                if computing.contains(dep) {
                    0
                } else {
                    compute_level(dep, nodes, memo, computing)
                }
            })
            .max()
            .unwrap_or(0);
        1 + max_dep
    };

    computing.remove(name);
    memo.insert(name.to_string(), level);
    level
}
