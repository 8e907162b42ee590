//! Cascade executor for create, update, and delete.
//!
//! Each call runs a fixed sequence: validate, then (for deletes) safety
//! check and plan build, then execute. Domain failures accumulate in the
//! per-call context and come back in the [`CascadeResult`]; critical
//! failures block execution unless the caller forces past them.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use relmesh_core::{CascadeAction, RelationshipGraph};

use crate::result::{CascadeOperation, CascadeResult, ErrorCode, OperationError, Severity};
use crate::store::{EntityStore, FieldMap, RecordFilter, RecordId};

use super::context::CascadeContext;
use super::plan::{DeletePlan, NullifyStep};

/// Tuning knobs for a cascade call.
#[derive(Debug, Clone)]
pub struct CascadeOptions {
    /// Maximum cascade recursion depth.
    pub max_depth: usize,
    /// Records mutated per chunk during execution.
    pub batch_size: usize,
    /// Run every step except the actual mutations.
    pub dry_run: bool,
    /// Skip safety and restrict checks on delete.
    pub force: bool,
    /// Keep going past non-critical errors.
    pub continue_on_error: bool,
    /// Propagate updates to directly related records.
    pub follow_dependents: bool,
    /// Refuse deletes whose plan exceeds this many records.
    pub max_affected: usize,
    /// Outgoing-relationship count at which an entity counts as high risk.
    pub high_risk_fanout: usize,
}

impl Default for CascadeOptions {
    fn default() -> Self {
        Self {
            max_depth: 5,
            batch_size: 50,
            dry_run: false,
            force: false,
            continue_on_error: true,
            follow_dependents: false,
            max_affected: 100,
            high_risk_fanout: 3,
        }
    }
}

impl CascadeOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the recursion depth bound.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the mutation chunk size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Preview effects without mutating.
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Bypass safety and restrict checks.
    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    /// Stop at the first error instead of accumulating.
    pub fn fail_fast(mut self) -> Self {
        self.continue_on_error = false;
        self
    }

    /// Cascade updates to directly related records.
    pub fn follow_dependents(mut self) -> Self {
        self.follow_dependents = true;
        self
    }

    /// Set the affected-record refusal bound for deletes.
    pub fn with_max_affected(mut self, max_affected: usize) -> Self {
        self.max_affected = max_affected;
        self
    }
}

/// A record to create, with nested related collections keyed by target
/// entity name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateSpec {
    /// Field values of the record itself.
    pub data: FieldMap,
    /// Child records per related entity.
    pub related: BTreeMap<String, Vec<CreateSpec>>,
}

impl CreateSpec {
    /// Create a spec from field values.
    pub fn new(data: FieldMap) -> Self {
        Self {
            data,
            related: BTreeMap::new(),
        }
    }

    /// Attach a related collection.
    pub fn with_related(mut self, entity: impl Into<String>, children: Vec<CreateSpec>) -> Self {
        self.related.insert(entity.into(), children);
        self
    }
}

/// Validates and executes cascading mutations against the entity store.
pub struct CascadeEngine {
    graph: Arc<RelationshipGraph>,
    store: Arc<dyn EntityStore>,
}

impl CascadeEngine {
    /// Create an engine over a built graph and a store.
    pub fn new(graph: Arc<RelationshipGraph>, store: Arc<dyn EntityStore>) -> Self {
        Self { graph, store }
    }

    /// The relationship graph this engine consults.
    pub fn graph(&self) -> &RelationshipGraph {
        &self.graph
    }

    /// Create a record and cascade into its related collections.
    pub async fn cascade_create(
        &self,
        entity: &str,
        spec: CreateSpec,
        options: &CascadeOptions,
    ) -> CascadeResult {
        let mut ctx = CascadeContext::new(CascadeOperation::Create, entity, options);
        debug!(entity, dry_run = ctx.dry_run, "cascade create starting");

        let valid = self.validate_collections(entity, &spec.related, &mut ctx);
        if (ctx.has_blocking_errors() && !options.force) || ctx.should_abort() {
            return ctx.into_result(false);
        }

        let root_id = self
            .create_record(entity.to_string(), spec, 0, Some(valid), &mut ctx)
            .await;
        ctx.record_id = root_id;

        let success = root_id.is_some() && !ctx.has_blocking_errors();
        info!(
            entity,
            affected = ctx.affected.values().map(Vec::len).sum::<usize>(),
            errors = ctx.errors.len(),
            "cascade create finished"
        );
        ctx.into_result(success)
    }

    /// Update a record, optionally cascading the payload to dependents.
    pub async fn cascade_update(
        &self,
        entity: &str,
        id: RecordId,
        data: FieldMap,
        options: &CascadeOptions,
    ) -> CascadeResult {
        let mut ctx = CascadeContext::new(CascadeOperation::Update, entity, options);
        ctx.record_id = Some(id);
        debug!(entity, id, "cascade update starting");

        if self.store.get(entity, id).await.is_err() {
            ctx.push_error(
                OperationError::new(
                    ErrorCode::EntityNotFound,
                    Severity::Critical,
                    format!("{entity} record {id} does not exist"),
                )
                .with_entity(entity)
                .with_record(id),
            );
            return ctx.into_result(false);
        }

        if !ctx.dry_run {
            if let Err(err) = self.store.update(entity, id, data.clone()).await {
                ctx.push_error(
                    OperationError::new(
                        ErrorCode::UpdateFailed,
                        Severity::Critical,
                        err.to_string(),
                    )
                    .with_entity(entity)
                    .with_record(id),
                );
                return ctx.into_result(false);
            }
        }
        ctx.record_affected(entity, id);

        if options.follow_dependents {
            self.update_dependents(entity, id, &data, &mut ctx).await;
        }

        let success = !ctx.has_blocking_errors();
        ctx.into_result(success)
    }

    /// Delete a record, cascading per the catalog's delete actions.
    pub async fn cascade_delete(
        &self,
        entity: &str,
        id: RecordId,
        options: &CascadeOptions,
    ) -> CascadeResult {
        let mut ctx = CascadeContext::new(CascadeOperation::Delete, entity, options);
        ctx.record_id = Some(id);
        debug!(entity, id, dry_run = ctx.dry_run, "cascade delete starting");

        if self.store.get(entity, id).await.is_err() {
            ctx.push_error(
                OperationError::new(
                    ErrorCode::EntityNotFound,
                    Severity::Critical,
                    format!("{entity} record {id} does not exist"),
                )
                .with_entity(entity)
                .with_record(id),
            );
            return ctx.into_result(false);
        }

        let plan = self.build_delete_plan(entity, id, &mut ctx).await;

        if !options.force {
            let fanout = self.graph.relations_from(entity).len();
            if fanout >= options.high_risk_fanout
                && plan.estimated_total() > options.max_affected
            {
                warn!(
                    entity,
                    id,
                    estimated = plan.estimated_total(),
                    "delete refused: estimated impact above threshold"
                );
                ctx.push_error(
                    OperationError::new(
                        ErrorCode::HighImpactDelete,
                        Severity::Critical,
                        format!(
                            "deleting {entity} {id} would affect {} records",
                            plan.estimated_total()
                        ),
                    )
                    .with_entity(entity)
                    .with_record(id)
                    .with_detail(json!({ "estimated": plan.estimated_total() })),
                );
                return ctx.into_result(false);
            }

            self.check_restrictions(entity, id, &mut ctx).await;
            if ctx.has_blocking_errors() {
                return ctx.into_result(false);
            }
        }

        self.execute_delete_plan(&plan, &mut ctx).await;

        let success = !ctx.has_blocking_errors();
        info!(
            entity,
            id,
            deleted = plan.records.len(),
            nullified = plan.nullify.len(),
            dry_run = ctx.dry_run,
            "cascade delete finished"
        );
        ctx.into_result(success)
    }

    /// Preview the deletion plan for a record without executing anything.
    pub async fn preview_delete(
        &self,
        entity: &str,
        id: RecordId,
        options: &CascadeOptions,
    ) -> DeletePlan {
        let mut ctx = CascadeContext::new(CascadeOperation::Delete, entity, options);
        self.build_delete_plan(entity, id, &mut ctx).await
    }

    /// Validate related collections against the catalog. Returns the target
    /// entities whose collections may cascade.
    fn validate_collections(
        &self,
        entity: &str,
        related: &BTreeMap<String, Vec<CreateSpec>>,
        ctx: &mut CascadeContext,
    ) -> HashSet<String> {
        let mut valid = HashSet::new();

        for target in related.keys() {
            let relation = self
                .graph
                .relations_from(entity)
                .into_iter()
                .find(|rel| rel.target_entity == *target);
            match relation {
                None => ctx.push_error(
                    OperationError::new(
                        ErrorCode::InvalidRelationship,
                        Severity::High,
                        format!("no relationship from {entity} to {target}"),
                    )
                    .with_entity(target.clone()),
                ),
                Some(rel) if rel.cascade.on_create != CascadeAction::Cascade => {
                    ctx.push_error(
                        OperationError::new(
                            ErrorCode::CascadeNotAllowed,
                            Severity::High,
                            format!("relationship {} does not cascade on create", rel.name),
                        )
                        .with_entity(target.clone())
                        .with_relationship(rel.id.clone()),
                    );
                }
                Some(_) => {
                    valid.insert(target.clone());
                }
            }
        }

        for rel in self.graph.relations_from(entity) {
            if rel.required
                && related
                    .get(&rel.target_entity)
                    .map_or(true, Vec::is_empty)
            {
                ctx.push_error(
                    OperationError::new(
                        ErrorCode::RequiredRelationshipMissing,
                        Severity::Critical,
                        format!("required relationship {} has no records", rel.name),
                    )
                    .with_entity(rel.target_entity.clone())
                    .with_relationship(rel.id.clone()),
                );
            }
        }

        valid
    }

    /// Create one record and recurse into its related collections.
    fn create_record<'a>(
        &'a self,
        entity: String,
        spec: CreateSpec,
        depth: usize,
        prevalidated: Option<HashSet<String>>,
        ctx: &'a mut CascadeContext,
    ) -> BoxFuture<'a, Option<RecordId>> {
        Box::pin(async move {
            let CreateSpec { data, related } = spec;

            let record_id = if ctx.dry_run {
                ctx.next_placeholder_id()
            } else {
                match self.store.create(&entity, data).await {
                    Ok(record) => record.id,
                    Err(err) => {
                        ctx.push_error(
                            OperationError::new(
                                ErrorCode::CreateFailed,
                                Severity::High,
                                err.to_string(),
                            )
                            .with_entity(entity.clone()),
                        );
                        return None;
                    }
                }
            };
            ctx.record_affected(&entity, record_id);

            let valid = match prevalidated {
                Some(valid) => valid,
                None => self.validate_collections(&entity, &related, ctx),
            };

            for (target, children) in related {
                if !valid.contains(&target) {
                    continue;
                }
                if depth + 1 > ctx.max_depth {
                    ctx.push_error(
                        OperationError::new(
                            ErrorCode::MaxDepthExceeded,
                            Severity::High,
                            format!("cascade create stopped at depth {depth}"),
                        )
                        .with_entity(target.clone()),
                    );
                    continue;
                }
                let Some(fk) = self
                    .graph
                    .relations_from(&entity)
                    .into_iter()
                    .find(|rel| rel.target_entity == target)
                    .and_then(|rel| rel.primary_target_field())
                    .map(str::to_string)
                else {
                    continue;
                };

                let batch_size = ctx.batch_size;
                for chunk in children.chunks(batch_size) {
                    for child in chunk {
                        let mut child = child.clone();
                        child.data.insert(fk.clone(), Value::from(record_id));
                        self.create_record(target.clone(), child, depth + 1, None, ctx)
                            .await;
                        if ctx.should_abort() {
                            return Some(record_id);
                        }
                    }
                }
            }

            Some(record_id)
        })
    }

    /// Push the update payload to directly related records that allow it.
    async fn update_dependents(
        &self,
        entity: &str,
        id: RecordId,
        data: &FieldMap,
        ctx: &mut CascadeContext,
    ) {
        let mut payload = data.clone();
        payload.remove("id");

        let relations: Vec<_> = self
            .graph
            .relations_from(entity)
            .into_iter()
            .filter(|rel| rel.cascade.on_update == CascadeAction::Cascade)
            .map(|rel| {
                (
                    rel.target_entity.clone(),
                    rel.primary_target_field().unwrap_or("").to_string(),
                    rel.id.clone(),
                )
            })
            .collect();

        for (target, fk, rel_id) in relations {
            if fk.is_empty() {
                continue;
            }
            let child_ids = match self
                .store
                .query(&target, &RecordFilter::field_references(&fk, id))
                .await
            {
                Ok(ids) => ids,
                Err(err) => {
                    ctx.push_error(
                        OperationError::new(
                            ErrorCode::UpdateFailed,
                            Severity::Medium,
                            err.to_string(),
                        )
                        .with_entity(target.clone())
                        .with_relationship(rel_id.clone()),
                    );
                    continue;
                }
            };

            let batch_size = ctx.batch_size;
            for chunk in child_ids.chunks(batch_size) {
                for &child_id in chunk {
                    if !ctx.dry_run {
                        if let Err(err) =
                            self.store.update(&target, child_id, payload.clone()).await
                        {
                            ctx.push_error(
                                OperationError::new(
                                    ErrorCode::UpdateFailed,
                                    Severity::High,
                                    err.to_string(),
                                )
                                .with_entity(target.clone())
                                .with_record(child_id),
                            );
                            if ctx.should_abort() {
                                return;
                            }
                            continue;
                        }
                    }
                    ctx.record_affected(&target, child_id);
                }
            }
        }
    }

    /// Fail on restrict relationships that still have referencing records.
    async fn check_restrictions(&self, entity: &str, id: RecordId, ctx: &mut CascadeContext) {
        let restricts: Vec<_> = self
            .graph
            .relations_from(entity)
            .into_iter()
            .filter(|rel| rel.cascade.on_delete == CascadeAction::Restrict)
            .map(|rel| {
                (
                    rel.target_entity.clone(),
                    rel.primary_target_field().unwrap_or("").to_string(),
                    rel.id.clone(),
                    rel.name.clone(),
                )
            })
            .collect();

        for (target, fk, rel_id, rel_name) in restricts {
            if fk.is_empty() {
                continue;
            }
            match self
                .store
                .query(&target, &RecordFilter::field_references(&fk, id))
                .await
            {
                Ok(referencing) if !referencing.is_empty() => {
                    warn!(
                        entity,
                        id,
                        relationship = %rel_name,
                        count = referencing.len(),
                        "delete blocked by restrict relationship"
                    );
                    ctx.push_error(
                        OperationError::new(
                            ErrorCode::RestrictViolation,
                            Severity::Critical,
                            format!(
                                "{} {} records still reference {entity} {id} via {rel_name}",
                                referencing.len(),
                                target
                            ),
                        )
                        .with_entity(entity)
                        .with_record(id)
                        .with_relationship(rel_id)
                        .with_detail(json!({
                            "referencing_entity": target,
                            "count": referencing.len(),
                        })),
                    );
                }
                Ok(_) => {}
                Err(err) => ctx.push_error(
                    OperationError::new(
                        ErrorCode::ValidationError,
                        Severity::Medium,
                        err.to_string(),
                    )
                    .with_relationship(rel_id),
                ),
            }
        }
    }

    /// Build the deletion plan by following cascade-on-delete relationships.
    async fn build_delete_plan(
        &self,
        entity: &str,
        id: RecordId,
        ctx: &mut CascadeContext,
    ) -> DeletePlan {
        let mut plan = DeletePlan::default();
        self.collect_deletions(entity.to_string(), id, 0, &mut plan, ctx)
            .await;
        plan.records.push((entity.to_string(), id));
        plan
    }

    fn collect_deletions<'a>(
        &'a self,
        entity: String,
        id: RecordId,
        depth: usize,
        plan: &'a mut DeletePlan,
        ctx: &'a mut CascadeContext,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if !ctx.visited.insert((entity.clone(), id)) {
                return;
            }
            if depth > ctx.max_depth {
                if !plan.truncated {
                    plan.truncated = true;
                    ctx.push_error(
                        OperationError::new(
                            ErrorCode::MaxDepthExceeded,
                            Severity::High,
                            format!("deletion plan stopped at depth {depth}"),
                        )
                        .with_entity(entity.clone())
                        .with_record(id),
                    );
                }
                return;
            }

            let relations: Vec<_> = self
                .graph
                .relations_from(&entity)
                .into_iter()
                .map(|rel| {
                    (
                        rel.target_entity.clone(),
                        rel.primary_target_field().unwrap_or("").to_string(),
                        rel.cascade.on_delete,
                    )
                })
                .collect();

            for (target, fk, action) in relations {
                if fk.is_empty() {
                    continue;
                }
                if !matches!(action, CascadeAction::Cascade | CascadeAction::SetNull) {
                    continue;
                }
                let children = match self
                    .store
                    .query(&target, &RecordFilter::field_references(&fk, id))
                    .await
                {
                    Ok(ids) => ids,
                    Err(err) => {
                        ctx.push_error(
                            OperationError::new(
                                ErrorCode::ValidationError,
                                Severity::Medium,
                                err.to_string(),
                            )
                            .with_entity(target.clone()),
                        );
                        continue;
                    }
                };

                match action {
                    CascadeAction::Cascade => {
                        for child_id in children {
                            self.collect_deletions(
                                target.clone(),
                                child_id,
                                depth + 1,
                                plan,
                                ctx,
                            )
                            .await;
                            plan.records.push((target.clone(), child_id));
                        }
                    }
                    CascadeAction::SetNull => {
                        for child_id in children {
                            plan.nullify.push(NullifyStep {
                                entity: target.clone(),
                                record_id: child_id,
                                field: fk.clone(),
                            });
                        }
                    }
                    _ => {}
                }
            }
        })
    }

    /// Null out references, then delete deepest dependents first.
    async fn execute_delete_plan(&self, plan: &DeletePlan, ctx: &mut CascadeContext) {
        for step in &plan.nullify {
            if !ctx.dry_run {
                let mut data = FieldMap::new();
                data.insert(step.field.clone(), Value::Null);
                if let Err(err) = self.store.update(&step.entity, step.record_id, data).await {
                    ctx.push_error(
                        OperationError::new(
                            ErrorCode::UpdateFailed,
                            Severity::High,
                            err.to_string(),
                        )
                        .with_entity(step.entity.clone())
                        .with_record(step.record_id),
                    );
                    if ctx.should_abort() {
                        return;
                    }
                    continue;
                }
            }
            ctx.record_affected(&step.entity, step.record_id);
        }

        let by_entity = plan.by_entity();
        let entities: Vec<String> = by_entity.keys().cloned().collect();
        let ordered = self.graph.sort_for_deletion(&entities);

        for entity in ordered {
            let Some(ids) = by_entity.get(&entity) else {
                continue;
            };
            let batch_size = ctx.batch_size;
            for chunk in ids.chunks(batch_size) {
                for &record_id in chunk {
                    if !ctx.dry_run {
                        if let Err(err) = self.store.delete(&entity, record_id).await {
                            ctx.push_error(
                                OperationError::new(
                                    ErrorCode::DeleteFailed,
                                    Severity::High,
                                    err.to_string(),
                                )
                                .with_entity(entity.clone())
                                .with_record(record_id),
                            );
                            if ctx.should_abort() {
                                return;
                            }
                            continue;
                        }
                    }
                    ctx.record_affected(&entity, record_id);
                }
            }
        }
    }
}
