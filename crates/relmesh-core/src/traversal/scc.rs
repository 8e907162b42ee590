//! Strongly connected component discovery.
//!
//! Two-pass algorithm: a forward depth-first walk records finish order onto
//! a stack, then a walk over the transposed graph in reverse finish order
//! collects components. Only components with two or more members are
//! returned, since those are the genuine cycle groups.

use std::collections::HashSet;

use crate::graph::RelationshipGraph;

/// Compute the strongly connected components of the entity graph.
///
/// Returns only components of size two or more, members sorted, components
/// ordered by their first member.
pub fn strongly_connected_components(graph: &RelationshipGraph) -> Vec<Vec<String>> {
    let mut finish_order: Vec<String> = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();

    for entity in graph.entity_names() {
        if !visited.contains(entity) {
            forward_visit(graph, entity, &mut visited, &mut finish_order);
        }
    }

    let mut assigned: HashSet<String> = HashSet::new();
    let mut components: Vec<Vec<String>> = Vec::new();

    for entity in finish_order.iter().rev() {
        if assigned.contains(entity) {
            continue;
        }
        let mut component = collect_transposed(graph, entity, &mut assigned);
        if component.len() >= 2 {
            component.sort();
            components.push(component);
        }
    }

    components.sort();
    components
}

/// The strongly connected component containing `entity`, if it is part of
/// a cycle group.
pub fn component_of(graph: &RelationshipGraph, entity: &str) -> Option<Vec<String>> {
    strongly_connected_components(graph)
        .into_iter()
        .find(|component| component.iter().any(|member| member == entity))
}

/// Iterative DFS over outgoing edges, appending nodes in finish order.
fn forward_visit(
    graph: &RelationshipGraph,
    start: &str,
    visited: &mut HashSet<String>,
    finish_order: &mut Vec<String>,
) {
    struct Frame {
        name: String,
        children: Vec<String>,
        next: usize,
    }

    let forward_children = |entity: &str| -> Vec<String> {
        let mut children: Vec<String> = graph
            .relations_from(entity)
            .iter()
            .map(|rel| rel.target_entity.clone())
            .collect();
        children.sort();
        children.dedup();
        children
    };

    visited.insert(start.to_string());
    let mut stack = vec![Frame {
        name: start.to_string(),
        children: forward_children(start),
        next: 0,
    }];

    while let Some(frame) = stack.last_mut() {
        if frame.next < frame.children.len() {
            let child = frame.children[frame.next].clone();
            frame.next += 1;
            if visited.insert(child.clone()) {
                stack.push(Frame {
                    children: forward_children(&child),
                    name: child,
                    next: 0,
                });
            }
        } else {
            finish_order.push(frame.name.clone());
            stack.pop();
        }
    }
}

/// Iterative DFS over incoming edges, collecting one component.
fn collect_transposed(
    graph: &RelationshipGraph,
    start: &str,
    assigned: &mut HashSet<String>,
) -> Vec<String> {
    let backward_children = |entity: &str| -> Vec<String> {
        graph
            .relations_to(entity)
            .iter()
            .map(|rel| rel.source_entity.clone())
            .collect()
    };

    let mut component = Vec::new();
    let mut stack = vec![start.to_string()];
    assigned.insert(start.to_string());

    while let Some(entity) = stack.pop() {
        component.push(entity.clone());
        for parent in backward_children(&entity) {
            if assigned.insert(parent.clone()) {
                stack.push(parent);
            }
        }
    }

    component
}
