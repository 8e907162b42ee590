//! Per-entity dependency analysis.

use std::collections::{BTreeSet, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::scc::component_of;
use crate::error::Error;
use crate::graph::{EntityNode, RelationshipGraph};

/// Coarse classification of how risky it is to change or remove an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Dependency analysis for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyAnalysis {
    /// The analyzed entity.
    pub entity: String,
    /// Entities referenced directly by this entity's records.
    pub direct_dependencies: Vec<String>,
    /// Every entity reachable through the dependency relation.
    pub transitive_dependencies: Vec<String>,
    /// Entities that reference this entity directly.
    pub direct_dependents: Vec<String>,
    /// Every entity that transitively references this one.
    pub transitive_dependents: Vec<String>,
    /// Entities with no relationship to this one in either direction.
    pub unrelated: Vec<String>,
    /// The cycle group this entity belongs to, if any.
    pub component: Option<Vec<String>>,
    /// Longest incoming dependency chain, ending at this entity.
    pub critical_path: Vec<String>,
    /// Isolation-risk classification.
    pub isolation_risk: RiskLevel,
}

/// Analyze the dependency situation of one entity.
pub fn analyze_dependencies(
    graph: &RelationshipGraph,
    entity: &str,
) -> Result<DependencyAnalysis, Error> {
    let node = graph
        .node(entity)
        .ok_or_else(|| Error::UnknownEntity(entity.to_string()))?;

    let direct_dependencies: Vec<String> = node.depends_on.iter().cloned().collect();
    let direct_dependents: Vec<String> = node.dependents.iter().cloned().collect();

    let transitive_dependencies = closure(graph, entity, |n| &n.depends_on);
    let transitive_dependents = closure(graph, entity, |n| &n.dependents);

    let mut related: HashSet<&str> = transitive_dependencies.iter().map(String::as_str).collect();
    related.extend(transitive_dependents.iter().map(String::as_str));
    let unrelated: Vec<String> = graph
        .entity_names()
        .into_iter()
        .filter(|name| *name != entity && !related.contains(name))
        .map(str::to_string)
        .collect();

    let critical_path = longest_incoming_chain(graph, entity);
    let isolation_risk = classify_risk(node.connection_count(), transitive_dependents.len());

    Ok(DependencyAnalysis {
        entity: entity.to_string(),
        direct_dependencies,
        transitive_dependencies,
        direct_dependents,
        transitive_dependents,
        unrelated,
        component: component_of(graph, entity),
        critical_path,
        isolation_risk,
    })
}

/// Breadth-first closure over a neighbor relation, excluding the start.
fn closure(
    graph: &RelationshipGraph,
    start: &str,
    pick: fn(&EntityNode) -> &BTreeSet<String>,
) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::from([start.to_string()]);
    let mut queue: VecDeque<String> = VecDeque::from([start.to_string()]);
    let mut result = BTreeSet::new();

    while let Some(current) = queue.pop_front() {
        if let Some(node) = graph.node(&current) {
            for neighbor in pick(node) {
                if seen.insert(neighbor.clone()) {
                    result.insert(neighbor.clone());
                    queue.push_back(neighbor.clone());
                }
            }
        }
    }
    result.into_iter().collect()
}

/// Longest chain through the dependency relation, returned root-first and
/// ending at `entity`. Cycle members are skipped once on the current chain.
fn longest_incoming_chain(graph: &RelationshipGraph, entity: &str) -> Vec<String> {
    let mut visiting = HashSet::new();
    chain_from(graph, entity, &mut visiting)
}

fn chain_from(
    graph: &RelationshipGraph,
    entity: &str,
    visiting: &mut HashSet<String>,
) -> Vec<String> {
    visiting.insert(entity.to_string());

    let mut best: Vec<String> = Vec::new();
    if let Some(node) = graph.node(entity) {
        for dep in &node.depends_on {
            if visiting.contains(dep) {
                continue;
            }
            let chain = chain_from(graph, dep, visiting);
            if chain.len() > best.len() {
                best = chain;
            }
        }
    }

    visiting.remove(entity);
    best.push(entity.to_string());
    best
}

fn classify_risk(connections: usize, transitive_dependents: usize) -> RiskLevel {
    if transitive_dependents == 0 {
        return RiskLevel::Low;
    }
    let ratio = transitive_dependents as f64 / connections.max(1) as f64;
    if ratio < 0.5 {
        RiskLevel::Low
    } else if ratio < 1.5 {
        RiskLevel::Medium
    } else if ratio < 3.0 {
        RiskLevel::High
    } else {
        RiskLevel::Critical
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{RelationCatalog, RelationDef};

    fn sample_graph() -> RelationshipGraph {
        // Company -> Contact -> Activity; Company -> Deal; Product is isolated
        // from Contact's chain.
        let catalog = RelationCatalog::new(vec![
            RelationDef::one_to_many("r1", "contacts", "Company", "Contact", "company_id"),
            RelationDef::one_to_many("r2", "activities", "Contact", "Activity", "contact_id"),
            RelationDef::one_to_many("r3", "deals", "Company", "Deal", "company_id"),
            RelationDef::one_to_many("r4", "items", "Product", "LineItem", "product_id"),
        ])
        .unwrap();
        RelationshipGraph::build(&catalog)
    }

    #[test]
    fn test_direct_and_transitive_sets() {
        let graph = sample_graph();
        let analysis = analyze_dependencies(&graph, "Contact").unwrap();

        assert_eq!(analysis.direct_dependencies, ["Company"]);
        assert_eq!(analysis.transitive_dependencies, ["Company"]);
        assert_eq!(analysis.direct_dependents, ["Activity"]);
        assert_eq!(analysis.transitive_dependents, ["Activity"]);
    }

    #[test]
    fn test_unrelated_entities() {
        let graph = sample_graph();
        let analysis = analyze_dependencies(&graph, "Contact").unwrap();

        // Deal shares an ancestor but is not reachable either way.
        assert_eq!(analysis.unrelated, ["Deal", "LineItem", "Product"]);
    }

    #[test]
    fn test_critical_path_ends_at_entity() {
        let graph = sample_graph();
        let analysis = analyze_dependencies(&graph, "Activity").unwrap();

        assert_eq!(analysis.critical_path, ["Company", "Contact", "Activity"]);
    }

    #[test]
    fn test_root_with_many_dependents_is_risky() {
        let graph = sample_graph();
        let analysis = analyze_dependencies(&graph, "Company").unwrap();

        // Two connections, three transitive dependents.
        assert_eq!(analysis.transitive_dependents.len(), 3);
        assert_eq!(analysis.isolation_risk, RiskLevel::High);
    }

    #[test]
    fn test_leaf_entity_is_low_risk() {
        let graph = sample_graph();
        let analysis = analyze_dependencies(&graph, "Activity").unwrap();

        assert!(analysis.transitive_dependents.is_empty());
        assert_eq!(analysis.isolation_risk, RiskLevel::Low);
    }

    #[test]
    fn test_component_membership() {
        let catalog = RelationCatalog::new(vec![
            RelationDef::one_to_many("r1", "ab", "A", "B", "a_id"),
            RelationDef::one_to_many("r2", "ba", "B", "A", "b_id"),
        ])
        .unwrap();
        let graph = RelationshipGraph::build(&catalog);
        let analysis = analyze_dependencies(&graph, "A").unwrap();

        assert_eq!(analysis.component, Some(vec!["A".to_string(), "B".to_string()]));
    }

    #[test]
    fn test_unknown_entity() {
        let graph = sample_graph();
        assert!(analyze_dependencies(&graph, "Nope").is_err());
    }
}
