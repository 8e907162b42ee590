//! Dependency graph over submitted batch operations.
//!
//! This graph is over *operations*, not entities: it exists only for one
//! batch call's execution ordering. Every pair of operations whose target
//! entities are directly related is compared; delete operations and
//! lower-hierarchy operations become dependencies of their counterparts.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use relmesh_core::RelationshipGraph;

use crate::store::{FieldMap, RecordId};

/// What a batch operation does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatchAction {
    /// Create one record from the data.
    Create {
        /// Field values for the new record.
        data: FieldMap,
    },
    /// Merge the data into every targeted record.
    Update {
        /// Field values to merge.
        data: FieldMap,
    },
    /// Delete every targeted record.
    Delete,
}

/// One submitted operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOperation {
    /// Caller-chosen operation id, unique within the batch.
    pub id: String,
    /// Target entity.
    pub entity: String,
    /// Targeted record ids (empty for creates).
    pub record_ids: Vec<RecordId>,
    /// The operation itself.
    pub action: BatchAction,
}

impl BatchOperation {
    /// A create operation.
    pub fn create(id: impl Into<String>, entity: impl Into<String>, data: FieldMap) -> Self {
        Self {
            id: id.into(),
            entity: entity.into(),
            record_ids: Vec::new(),
            action: BatchAction::Create { data },
        }
    }

    /// An update operation over the given records.
    pub fn update(
        id: impl Into<String>,
        entity: impl Into<String>,
        record_ids: Vec<RecordId>,
        data: FieldMap,
    ) -> Self {
        Self {
            id: id.into(),
            entity: entity.into(),
            record_ids,
            action: BatchAction::Update { data },
        }
    }

    /// A delete operation over the given records.
    pub fn delete(
        id: impl Into<String>,
        entity: impl Into<String>,
        record_ids: Vec<RecordId>,
    ) -> Self {
        Self {
            id: id.into(),
            entity: entity.into(),
            record_ids,
            action: BatchAction::Delete,
        }
    }

    /// Whether this operation removes records.
    pub fn is_delete(&self) -> bool {
        matches!(self.action, BatchAction::Delete)
    }
}

/// Execution status of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

/// The inferred dependency structure of one batch.
#[derive(Debug, Clone, Default)]
pub(crate) struct OperationGraph {
    /// Operation id to the ids it depends on.
    pub depends_on: BTreeMap<String, BTreeSet<String>>,
    /// Execution levels, ascending; operations within a level are
    /// mutually independent.
    pub levels: Vec<Vec<String>>,
    /// Operation ids involved in dependency cycles, sorted.
    pub cyclic: Vec<String>,
}

/// Infer the dependency graph over a batch of operations.
pub(crate) fn build_operation_graph(
    operations: &[BatchOperation],
    graph: &RelationshipGraph,
) -> OperationGraph {
    let mut depends_on: BTreeMap<String, BTreeSet<String>> = operations
        .iter()
        .map(|op| (op.id.clone(), BTreeSet::new()))
        .collect();

    for (i, a) in operations.iter().enumerate() {
        for b in operations.iter().skip(i + 1) {
            if !directly_related(graph, &a.entity, &b.entity) {
                continue;
            }

            // The record that will no longer exist must be handled first.
            if a.is_delete() && !b.is_delete() {
                add_edge(&mut depends_on, &b.id, &a.id);
            }
            if b.is_delete() && !a.is_delete() {
                add_edge(&mut depends_on, &a.id, &b.id);
            }

            // The lower-hierarchy side is the dependency.
            let level_a = graph.hierarchy_level(&a.entity).unwrap_or(0);
            let level_b = graph.hierarchy_level(&b.entity).unwrap_or(0);
            if level_a < level_b {
                add_edge(&mut depends_on, &b.id, &a.id);
            } else if level_b < level_a {
                add_edge(&mut depends_on, &a.id, &b.id);
            }
        }
    }

    let cyclic = find_cyclic_ops(&depends_on);
    let levels = if cyclic.is_empty() {
        assign_levels(&depends_on)
    } else {
        Vec::new()
    };

    OperationGraph {
        depends_on,
        levels,
        cyclic,
    }
}

fn add_edge(depends_on: &mut BTreeMap<String, BTreeSet<String>>, dependent: &str, dependency: &str) {
    depends_on
        .entry(dependent.to_string())
        .or_default()
        .insert(dependency.to_string());
}

fn directly_related(graph: &RelationshipGraph, a: &str, b: &str) -> bool {
    graph
        .relations_from(a)
        .iter()
        .any(|rel| rel.target_entity == b)
        || graph
            .relations_from(b)
            .iter()
            .any(|rel| rel.target_entity == a)
}

/// Operation ids on any dependency cycle, found by walking `depends_on`
/// with an explicit recursion stack.
fn find_cyclic_ops(depends_on: &BTreeMap<String, BTreeSet<String>>) -> Vec<String> {
    struct Frame {
        name: String,
        children: Vec<String>,
        next: usize,
    }

    let mut cyclic: BTreeSet<String> = BTreeSet::new();
    let mut visited: HashSet<String> = HashSet::new();

    for start in depends_on.keys() {
        if visited.contains(start) {
            continue;
        }
        let children = |name: &str| -> Vec<String> {
            depends_on
                .get(name)
                .map(|deps| deps.iter().cloned().collect())
                .unwrap_or_default()
        };

        let mut path: Vec<String> = vec![start.clone()];
        let mut on_path: HashSet<String> = HashSet::from([start.clone()]);
        let mut stack = vec![Frame {
            name: start.clone(),
            children: children(start),
            next: 0,
        }];
        visited.insert(start.clone());

        while let Some(frame) = stack.last_mut() {
            if frame.next < frame.children.len() {
                let child = frame.children[frame.next].clone();
                frame.next += 1;

                if on_path.contains(&child) {
                    if let Some(pos) = path.iter().position(|n| n == &child) {
                        cyclic.extend(path[pos..].iter().cloned());
                    }
                } else if !visited.contains(&child) {
                    visited.insert(child.clone());
                    on_path.insert(child.clone());
                    path.push(child.clone());
                    stack.push(Frame {
                        children: children(&child),
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

    cyclic.into_iter().collect()
}

/// Execution level per operation: 0 with no dependencies, otherwise one
/// more than the deepest dependency.
fn assign_levels(depends_on: &BTreeMap<String, BTreeSet<String>>) -> Vec<Vec<String>> {
    fn level_of(
        id: &str,
        depends_on: &BTreeMap<String, BTreeSet<String>>,
        memo: &mut HashMap<String, u32>,
        computing: &mut HashSet<String>,
    ) -> u32 {
        if let Some(&level) = memo.get(id) {
            return level;
        }
        computing.insert(id.to_string());
        let deps = depends_on.get(id);
        let level = match deps {
            None => 0,
            Some(deps) if deps.is_empty() => 0,
            Some(deps) => {
                1 + deps
                    .iter()
                    .map(|dep| {
                        if computing.contains(dep) {
                            0
                        } else {
                            level_of(dep, depends_on, memo, computing)
                        }
                    })
                    .max()
                    .unwrap_or(0)
            }
        };
        computing.remove(id);
        memo.insert(id.to_string(), level);
        level
    }

    let mut memo = HashMap::new();
    for id in depends_on.keys() {
        let mut computing = HashSet::new();
        level_of(id, depends_on, &mut memo, &mut computing);
    }

    let mut grouped: BTreeMap<u32, Vec<String>> = BTreeMap::new();
    for (id, level) in memo {
        grouped.entry(level).or_default().push(id);
    }
    grouped
        .into_values()
        .map(|mut ids| {
            ids.sort();
            ids
        })
        .collect()
}
