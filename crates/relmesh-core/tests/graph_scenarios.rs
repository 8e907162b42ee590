//! End-to-end scenarios over catalog, graph, and traversal.

use relmesh_core::{
    analyze_dependencies, find_relationship_paths, strongly_connected_components, RelationCatalog,
    RelationDef, RelationshipGraph, RiskLevel,
};

/// A CRM-flavored catalog: Company fans out to Contact, Deal, and Ticket;
/// Deal links to Contact; Contact owns Activity.
fn crm_catalog() -> RelationCatalog {
    RelationCatalog::new(vec![
        RelationDef::one_to_many("company_contacts", "contacts", "Company", "Contact", "company_id"),
        RelationDef::one_to_many("company_deals", "deals", "Company", "Deal", "company_id"),
        RelationDef::one_to_many("company_tickets", "tickets", "Company", "Ticket", "company_id"),
        RelationDef::many_to_many("deal_contacts", "deal_contacts", "Deal", "Contact", "deal_id"),
        RelationDef::one_to_many("contact_activities", "activities", "Contact", "Activity", "contact_id"),
    ])
    .unwrap()
}

#[test]
fn hierarchy_levels_satisfy_the_recurrence() {
    let graph = RelationshipGraph::build(&crm_catalog());

    for name in graph.entity_names() {
        let node = graph.node(name).unwrap();
        let expected = if node.depends_on.is_empty() {
            0
        } else {
            1 + node
                .depends_on
                .iter()
                .map(|dep| graph.hierarchy_level(dep).unwrap())
                .max()
                .unwrap()
        };
        assert_eq!(
            node.hierarchy_level, expected,
            "level recurrence violated for {name}"
        );
    }
}

#[test]
fn single_path_target_is_one_level_below_source() {
    let catalog = RelationCatalog::new(vec![RelationDef::one_to_many(
        "r1", "tickets", "Company", "Ticket", "company_id",
    )])
    .unwrap();
    let graph = RelationshipGraph::build(&catalog);

    assert_eq!(
        graph.hierarchy_level("Ticket").unwrap(),
        graph.hierarchy_level("Company").unwrap() + 1
    );
}

#[test]
fn identity_path_is_single_and_optimal() {
    let graph = RelationshipGraph::build(&crm_catalog());
    let paths = find_relationship_paths(&graph, "Deal", "Deal", 10).unwrap();

    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].distance, 0);
    assert_eq!(paths[0].cost, 0.0);
    assert!(paths[0].is_optimal);
}

#[test]
fn cycle_members_appear_in_components() {
    let catalog = RelationCatalog::new(vec![
        RelationDef::one_to_many("r1", "orders", "Customer", "Order", "customer_id"),
        RelationDef::one_to_many("r2", "invoices", "Order", "Invoice", "order_id"),
        RelationDef::one_to_many("r3", "latest_order", "Invoice", "Order", "invoice_id"),
    ])
    .unwrap();
    let graph = RelationshipGraph::build(&catalog);
    let components = strongly_connected_components(&graph);

    assert!(graph.has_cycles());
    assert!(components.iter().all(|c| c.len() >= 2));
    for cycle in graph.cycles() {
        for member in &cycle.members {
            assert!(
                components.iter().any(|c| c.contains(member)),
                "{member} not in any component"
            );
        }
    }
}

#[test]
fn deletion_order_never_increases_in_level() {
    let graph = RelationshipGraph::build(&crm_catalog());
    let mut entities: Vec<String> = graph.entity_names().iter().map(|s| s.to_string()).collect();
    entities.reverse();

    let ordered = graph.sort_for_deletion(&entities);
    let levels: Vec<u32> = ordered
        .iter()
        .map(|e| graph.hierarchy_level(e).unwrap())
        .collect();

    assert!(
        levels.windows(2).all(|w| w[0] >= w[1]),
        "deletion order increased in hierarchy level: {levels:?}"
    );
}

#[test]
fn dependency_analysis_flags_hub_entities() {
    let graph = RelationshipGraph::build(&crm_catalog());

    let company = analyze_dependencies(&graph, "Company").unwrap();
    assert!(company.isolation_risk >= RiskLevel::Medium);
    assert_eq!(company.transitive_dependents.len(), 4);

    let activity = analyze_dependencies(&graph, "Activity").unwrap();
    assert_eq!(activity.isolation_risk, RiskLevel::Low);
    assert_eq!(activity.critical_path.last().unwrap(), "Activity");
}
