//! Integrity scanning and repair execution.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use relmesh_core::{CascadeAction, RelationDef, RelationshipGraph};

use crate::result::{generate_transaction_id, ErrorCode, OperationError, Severity};
use crate::store::{EntityStore, FieldMap, RecordFilter, RecordId, StoreError};

use super::report::{
    ConstraintViolation, IntegrityOptions, IntegrityReport, OrphanedRecord, ReferenceIssueKind,
    ReferentialIssue, ViolationKind,
};
use super::repair::{RepairAction, RepairOptions, RepairOutcome, RepairPlan, RepairStep};

/// Scans entity data for referential problems and executes repair plans.
pub struct IntegrityManager {
    graph: Arc<RelationshipGraph>,
    store: Arc<dyn EntityStore>,
    plans: DashMap<u64, RepairPlan>,
}

impl IntegrityManager {
    /// Create a manager over a built graph and a store.
    pub fn new(graph: Arc<RelationshipGraph>, store: Arc<dyn EntityStore>) -> Self {
        Self {
            graph,
            store,
            plans: DashMap::new(),
        }
    }

    /// Scan for orphans, referential issues, and constraint violations.
    ///
    /// The scan only reports; nothing is corrected here.
    pub async fn perform_check(&self, options: &IntegrityOptions) -> IntegrityReport {
        let checked: Vec<String> = match &options.entities {
            Some(entities) => entities.clone(),
            None => self
                .graph
                .entity_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
        };
        let in_scope: BTreeSet<&str> = checked.iter().map(String::as_str).collect();
        debug!(entities = checked.len(), "integrity check starting");

        let mut report = IntegrityReport {
            generated_at: Utc::now(),
            checked_entities: checked.clone(),
            orphans: Vec::new(),
            referential: Vec::new(),
            violations: Vec::new(),
        };

        let mut relations: Vec<&RelationDef> = self.graph.relations().collect();
        relations.sort_by(|a, b| a.id.cmp(&b.id));

        for rel in relations {
            if !in_scope.contains(rel.target_entity.as_str()) {
                continue;
            }
            let Some(fk) = rel.primary_target_field() else {
                continue;
            };
            self.scan_relation(rel, fk, options, &mut report).await;
        }

        if options.check_constraints {
            for rule in &options.business_rules {
                self.apply_business_rule(rule, &mut report).await;
            }
        }

        info!(
            orphans = report.orphans.len(),
            referential = report.referential.len(),
            violations = report.violations.len(),
            "integrity check finished"
        );
        report
    }

    /// Scan every record on the target side of one relationship.
    async fn scan_relation(
        &self,
        rel: &RelationDef,
        fk: &str,
        options: &IntegrityOptions,
        report: &mut IntegrityReport,
    ) {
        let ids = match self.store.query(&rel.target_entity, &RecordFilter::All).await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(entity = %rel.target_entity, %err, "integrity scan skipped entity");
                return;
            }
        };

        for id in ids {
            let record = match self.store.get(&rel.target_entity, id).await {
                Ok(record) => record,
                Err(_) => continue,
            };

            match record.field(fk) {
                None | Some(Value::Null) => {
                    if rel.required && options.check_constraints {
                        report.violations.push(ConstraintViolation {
                            kind: ViolationKind::RequiredFieldNull,
                            entity: rel.target_entity.clone(),
                            record_id: id,
                            field: Some(fk.to_string()),
                            rule: None,
                            severity: Severity::High,
                            message: format!(
                                "required reference {fk} is null on {} {id}",
                                rel.target_entity
                            ),
                        });
                    }
                }
                Some(value) => match value.as_u64() {
                    None => {
                        if options.check_references {
                            report.referential.push(ReferentialIssue {
                                kind: ReferenceIssueKind::Invalid,
                                entity: rel.target_entity.clone(),
                                record_id: id,
                                field: fk.to_string(),
                                message: format!("{fk} holds {value} instead of a record id"),
                            });
                        }
                    }
                    Some(parent_id) => {
                        if rel.is_self_referencing() && parent_id == id {
                            if options.check_references {
                                report.referential.push(ReferentialIssue {
                                    kind: ReferenceIssueKind::Circular,
                                    entity: rel.target_entity.clone(),
                                    record_id: id,
                                    field: fk.to_string(),
                                    message: format!(
                                        "{} {id} references itself",
                                        rel.target_entity
                                    ),
                                });
                            }
                            continue;
                        }

                        let parent_missing = matches!(
                            self.store.get(&rel.source_entity, parent_id).await,
                            Err(StoreError::NotFound { .. } | StoreError::UnknownEntity { .. })
                        );
                        if parent_missing {
                            if options.check_orphans {
                                report.orphans.push(OrphanedRecord {
                                    entity: rel.target_entity.clone(),
                                    record_id: id,
                                    relationship: rel.id.clone(),
                                    parent_entity: rel.source_entity.clone(),
                                    parent_id,
                                });
                            } else if options.check_references {
                                report.referential.push(ReferentialIssue {
                                    kind: ReferenceIssueKind::Dangling,
                                    entity: rel.target_entity.clone(),
                                    record_id: id,
                                    field: fk.to_string(),
                                    message: format!(
                                        "{fk} references missing {} {parent_id}",
                                        rel.source_entity
                                    ),
                                });
                            }
                        }
                    }
                },
            }
        }
    }

    async fn apply_business_rule(
        &self,
        rule: &super::report::BusinessRule,
        report: &mut IntegrityReport,
    ) {
        let ids = match self.store.query(&rule.entity, &RecordFilter::All).await {
            Ok(ids) => ids,
            Err(_) => return,
        };
        for id in ids {
            let Ok(record) = self.store.get(&rule.entity, id).await else {
                continue;
            };
            if !(rule.check)(&record) {
                report.violations.push(ConstraintViolation {
                    kind: ViolationKind::BusinessRule,
                    entity: rule.entity.clone(),
                    record_id: id,
                    field: None,
                    rule: Some(rule.name.clone()),
                    severity: Severity::Medium,
                    message: format!("rule {} failed for {} {id}", rule.name, rule.entity),
                });
            }
        }
    }

    /// Synthesize an ordered repair plan from a report and register it.
    pub fn build_repair_plan(&self, report: &IntegrityReport) -> RepairPlan {
        let mut steps: Vec<RepairStep> = Vec::new();
        let mut steps_by_entity: HashMap<String, Vec<usize>> = HashMap::new();

        let mut push_step = |steps: &mut Vec<RepairStep>,
                             steps_by_entity: &mut HashMap<String, Vec<usize>>,
                             action: RepairAction,
                             rollback_note: String| {
            let index = steps.len();
            let entity = match &action {
                RepairAction::DeleteOrphan { entity, .. }
                | RepairAction::ClearReference { entity, .. }
                | RepairAction::CreateMissing { entity, .. }
                | RepairAction::ValidateConstraint { entity } => entity.clone(),
            };
            steps.push(RepairStep {
                index,
                action,
                depends_on: Vec::new(),
                rollback_note,
            });
            steps_by_entity.entry(entity).or_default().push(index);
        };

        for orphan in &report.orphans {
            let relation = self.graph.relation(&orphan.relationship);
            let action = match relation {
                Some(rel) if rel.required => RepairAction::CreateMissing {
                    entity: orphan.parent_entity.clone(),
                    fields: FieldMap::new(),
                    reattach: Some((
                        orphan.entity.clone(),
                        orphan.record_id,
                        rel.primary_target_field().unwrap_or("").to_string(),
                    )),
                },
                Some(rel) if rel.cascade.on_delete == CascadeAction::Cascade => {
                    RepairAction::DeleteOrphan {
                        entity: orphan.entity.clone(),
                        record_id: orphan.record_id,
                    }
                }
                _ => RepairAction::ClearReference {
                    entity: orphan.entity.clone(),
                    record_id: orphan.record_id,
                    field: relation
                        .and_then(|rel| rel.primary_target_field())
                        .unwrap_or("")
                        .to_string(),
                },
            };
            let note = match &action {
                RepairAction::DeleteOrphan { .. } => {
                    "re-create the deleted record from a backup".to_string()
                }
                RepairAction::CreateMissing { .. } => {
                    "delete the re-created parent and detach the orphan".to_string()
                }
                _ => format!("restore the original value {}", orphan.parent_id),
            };
            push_step(&mut steps, &mut steps_by_entity, action, note);
        }

        for issue in &report.referential {
            push_step(
                &mut steps,
                &mut steps_by_entity,
                RepairAction::ClearReference {
                    entity: issue.entity.clone(),
                    record_id: issue.record_id,
                    field: issue.field.clone(),
                },
                "restore the original field value from a backup".to_string(),
            );
        }

        for violation in &report.violations {
            if violation.kind == ViolationKind::RequiredFieldNull {
                push_step(
                    &mut steps,
                    &mut steps_by_entity,
                    RepairAction::DeleteOrphan {
                        entity: violation.entity.clone(),
                        record_id: violation.record_id,
                    },
                    "re-create the deleted record from a backup".to_string(),
                );
            }
        }

        // Validation steps run last, after every mutation on their entity.
        let touched: BTreeSet<String> = steps_by_entity.keys().cloned().collect();
        for entity in touched {
            let depends_on = steps_by_entity.get(&entity).cloned().unwrap_or_default();
            let index = steps.len();
            steps.push(RepairStep {
                index,
                action: RepairAction::ValidateConstraint {
                    entity: entity.clone(),
                },
                depends_on,
                rollback_note: "nothing to undo".to_string(),
            });
        }

        let plan = RepairPlan {
            id: generate_transaction_id(),
            created_at: Utc::now(),
            steps,
        };
        self.plans.insert(plan.id, plan.clone());
        info!(plan = plan.id, steps = plan.step_count(), "repair plan built");
        plan
    }

    /// A previously built plan, if it is still registered.
    pub fn repair_plan(&self, plan_id: u64) -> Option<RepairPlan> {
        self.plans.get(&plan_id).map(|p| p.value().clone())
    }

    /// Execute a registered repair plan step by step.
    pub async fn execute_repair_plan(
        &self,
        plan_id: u64,
        options: &RepairOptions,
    ) -> RepairOutcome {
        let mut outcome = RepairOutcome {
            plan_id,
            dry_run: options.dry_run,
            ..RepairOutcome::default()
        };

        let Some(plan) = self.repair_plan(plan_id) else {
            outcome.failed.push((
                0,
                OperationError::new(
                    ErrorCode::ValidationError,
                    Severity::High,
                    format!("no repair plan registered under {plan_id}"),
                ),
            ));
            return outcome;
        };

        info!(plan = plan_id, dry_run = options.dry_run, "executing repair plan");
        let mut executed: BTreeSet<usize> = BTreeSet::new();

        for step in &plan.steps {
            if !step.depends_on.iter().all(|dep| executed.contains(dep)) {
                outcome.skipped.push(step.index);
                continue;
            }
            if let Some(confirm) = &options.confirm {
                if !confirm(step) {
                    debug!(step = step.index, "repair step declined");
                    outcome.skipped.push(step.index);
                    continue;
                }
            }

            if options.backup {
                self.capture_backup(step, &mut outcome).await;
            }

            match self.apply_step(step, options.dry_run).await {
                Ok(()) => {
                    executed.insert(step.index);
                    outcome.executed.push(step.index);
                }
                Err(err) => {
                    warn!(step = step.index, "repair step failed");
                    outcome.failed.push((step.index, err));
                }
            }
        }

        outcome.success = outcome.failed.is_empty();
        outcome
    }

    async fn capture_backup(&self, step: &RepairStep, outcome: &mut RepairOutcome) {
        let target: Option<(&str, RecordId)> = match &step.action {
            RepairAction::DeleteOrphan { entity, record_id }
            | RepairAction::ClearReference {
                entity, record_id, ..
            } => Some((entity, *record_id)),
            RepairAction::CreateMissing { reattach, .. } => reattach
                .as_ref()
                .map(|(entity, record_id, _)| (entity.as_str(), *record_id)),
            RepairAction::ValidateConstraint { .. } => None,
        };
        if let Some((entity, record_id)) = target {
            if let Ok(record) = self.store.get(entity, record_id).await {
                outcome.backups.push(record);
            }
        }
    }

    async fn apply_step(&self, step: &RepairStep, dry_run: bool) -> Result<(), OperationError> {
        match &step.action {
            RepairAction::DeleteOrphan { entity, record_id } => {
                if !dry_run {
                    self.store.delete(entity, *record_id).await.map_err(|err| {
                        OperationError::new(
                            ErrorCode::DeleteFailed,
                            Severity::High,
                            err.to_string(),
                        )
                        .with_entity(entity.clone())
                        .with_record(*record_id)
                    })?;
                }
                Ok(())
            }
            RepairAction::ClearReference {
                entity,
                record_id,
                field,
            } => {
                if !dry_run {
                    let mut data = FieldMap::new();
                    data.insert(field.clone(), Value::Null);
                    self.store
                        .update(entity, *record_id, data)
                        .await
                        .map_err(|err| {
                            OperationError::new(
                                ErrorCode::UpdateFailed,
                                Severity::High,
                                err.to_string(),
                            )
                            .with_entity(entity.clone())
                            .with_record(*record_id)
                        })?;
                }
                Ok(())
            }
            RepairAction::CreateMissing {
                entity,
                fields,
                reattach,
            } => {
                if dry_run {
                    return Ok(());
                }
                let parent = self
                    .store
                    .create(entity, fields.clone())
                    .await
                    .map_err(|err| {
                        OperationError::new(
                            ErrorCode::CreateFailed,
                            Severity::High,
                            err.to_string(),
                        )
                        .with_entity(entity.clone())
                    })?;
                if let Some((child_entity, child_id, field)) = reattach {
                    let mut data = FieldMap::new();
                    data.insert(field.clone(), Value::from(parent.id));
                    self.store
                        .update(child_entity, *child_id, data)
                        .await
                        .map_err(|err| {
                            OperationError::new(
                                ErrorCode::UpdateFailed,
                                Severity::High,
                                err.to_string(),
                            )
                            .with_entity(child_entity.clone())
                            .with_record(*child_id)
                        })?;
                }
                Ok(())
            }
            RepairAction::ValidateConstraint { entity } => {
                if dry_run {
                    return Ok(());
                }
                let options = IntegrityOptions::new().with_entities(vec![entity.clone()]);
                let report = self.perform_check(&options).await;
                if report.is_clean() {
                    Ok(())
                } else {
                    Err(OperationError::new(
                        ErrorCode::ValidationError,
                        Severity::High,
                        format!(
                            "{} issues remain on {entity} after repair",
                            report.total_issues()
                        ),
                    )
                    .with_entity(entity.clone()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use relmesh_core::{RelationCatalog, RelationDef};
    use serde_json::json;

    fn fields(pairs: &[(&str, Value)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn crm_manager(store: Arc<MemoryStore>) -> IntegrityManager {
        let catalog = RelationCatalog::new(vec![
            RelationDef::one_to_many("company_contacts", "contacts", "Company", "Contact", "company_id")
                .with_on_delete(CascadeAction::Cascade),
            RelationDef::self_referencing("contact_manager", "manager", "Contact", "manager_id"),
        ])
        .unwrap();
        IntegrityManager::new(Arc::new(RelationshipGraph::build(&catalog)), store)
    }

    #[tokio::test]
    async fn test_detects_orphans() {
        let store = Arc::new(MemoryStore::new());
        store.seed("Company", 1, FieldMap::new());
        store.seed("Contact", 10, fields(&[("company_id", json!(1))]));
        store.seed("Contact", 11, fields(&[("company_id", json!(999))]));
        let manager = crm_manager(store);

        let report = manager.perform_check(&IntegrityOptions::new()).await;

        assert_eq!(report.orphans.len(), 1);
        assert_eq!(report.orphans[0].record_id, 11);
        assert_eq!(report.orphans[0].parent_id, 999);
    }

    #[tokio::test]
    async fn test_detects_invalid_and_circular_references() {
        let store = Arc::new(MemoryStore::new());
        store.seed("Contact", 1, fields(&[("manager_id", json!("not-an-id"))]));
        store.seed("Contact", 2, fields(&[("manager_id", json!(2))]));
        let manager = crm_manager(store);

        let report = manager.perform_check(&IntegrityOptions::new()).await;

        let kinds: Vec<ReferenceIssueKind> =
            report.referential.iter().map(|issue| issue.kind).collect();
        assert!(kinds.contains(&ReferenceIssueKind::Invalid));
        assert!(kinds.contains(&ReferenceIssueKind::Circular));
    }

    #[tokio::test]
    async fn test_business_rules() {
        let store = Arc::new(MemoryStore::new());
        store.seed("Company", 1, fields(&[("name", json!(""))]));
        let manager = crm_manager(store);

        fn has_name(record: &crate::store::Record) -> bool {
            record
                .field("name")
                .and_then(Value::as_str)
                .map(|name| !name.is_empty())
                .unwrap_or(false)
        }

        let options = IntegrityOptions::new().with_business_rule(
            super::super::report::BusinessRule {
                name: "company_has_name".to_string(),
                entity: "Company".to_string(),
                check: has_name,
            },
        );
        let report = manager.perform_check(&options).await;

        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].kind, ViolationKind::BusinessRule);
        assert_eq!(report.violations[0].rule.as_deref(), Some("company_has_name"));
    }

    #[tokio::test]
    async fn test_repair_plan_deletes_cascade_orphans() {
        let store = Arc::new(MemoryStore::new());
        store.seed("Contact", 11, fields(&[("company_id", json!(999))]));
        let manager = crm_manager(store.clone());

        let report = manager.perform_check(&IntegrityOptions::new()).await;
        let plan = manager.build_repair_plan(&report);

        assert!(plan
            .steps
            .iter()
            .any(|s| matches!(s.action, RepairAction::DeleteOrphan { record_id: 11, .. })));

        let outcome = manager
            .execute_repair_plan(plan.id, &RepairOptions::new())
            .await;
        assert!(outcome.success);
        assert_eq!(store.count("Contact"), 0);
    }

    #[tokio::test]
    async fn test_repair_dry_run_mutates_nothing() {
        let store = Arc::new(MemoryStore::new());
        store.seed("Contact", 11, fields(&[("company_id", json!(999))]));
        let manager = crm_manager(store.clone());

        let report = manager.perform_check(&IntegrityOptions::new()).await;
        let plan = manager.build_repair_plan(&report);
        let writes_before = store.writes();

        let outcome = manager
            .execute_repair_plan(plan.id, &RepairOptions::new().dry_run())
            .await;

        assert!(outcome.success);
        assert!(outcome.dry_run);
        assert_eq!(store.writes(), writes_before);
        assert_eq!(store.count("Contact"), 1);
    }

    #[tokio::test]
    async fn test_repair_confirmation_can_decline_steps() {
        let store = Arc::new(MemoryStore::new());
        store.seed("Contact", 11, fields(&[("company_id", json!(999))]));
        let manager = crm_manager(store.clone());

        let report = manager.perform_check(&IntegrityOptions::new()).await;
        let plan = manager.build_repair_plan(&report);

        let options = RepairOptions::new().with_confirmation(|_| false);
        let outcome = manager.execute_repair_plan(plan.id, &options).await;

        assert_eq!(outcome.executed.len(), 0);
        assert_eq!(outcome.skipped.len(), plan.step_count());
        assert_eq!(store.count("Contact"), 1);
    }

    #[tokio::test]
    async fn test_unknown_plan_fails() {
        let store = Arc::new(MemoryStore::new());
        let manager = crm_manager(store);

        let outcome = manager
            .execute_repair_plan(12345, &RepairOptions::new())
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.failed.len(), 1);
    }
}
