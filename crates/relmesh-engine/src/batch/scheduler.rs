//! Dependency-aware batch execution.
//!
//! Operations are leveled by their inferred dependency graph; levels run
//! strictly in order, and within a level a counting semaphore bounds how
//! many operations run at once. A dependency cycle aborts the batch before
//! any store call. Rollback replays completed operations with best-effort
//! compensating actions; it is not an undo log.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use relmesh_core::RelationshipGraph;

use crate::cascade::{CascadeEngine, CascadeOptions};
use crate::result::{generate_transaction_id, ErrorCode, OperationError, Severity};
use crate::store::{EntityStore, FieldMap, RecordId};

use super::graph::{build_operation_graph, BatchAction, BatchOperation, OpStatus};

/// Tuning knobs for one batch call.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Maximum operations in flight at once.
    pub max_concurrency: usize,
    /// Keep executing later levels after a failure.
    pub continue_on_error: bool,
    /// Compensate completed operations when the batch fails.
    pub rollback_on_failure: bool,
    /// Route delete operations through the cascade engine.
    pub cascade_deletes: bool,
    /// Deadline for the whole batch call.
    pub timeout: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            continue_on_error: false,
            rollback_on_failure: false,
            cascade_deletes: false,
            timeout: None,
        }
    }
}

impl BatchOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound in-flight operations.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Keep executing after failures.
    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    /// Compensate completed operations when the batch fails.
    pub fn rollback_on_failure(mut self) -> Self {
        self.rollback_on_failure = true;
        self
    }

    /// Route deletes through the cascade engine.
    pub fn cascade_deletes(mut self) -> Self {
        self.cascade_deletes = true;
        self
    }

    /// Set the batch deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result of one operation within a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutcome {
    /// Final status.
    pub status: OpStatus,
    /// Record ids the operation touched.
    pub affected: Vec<RecordId>,
    /// The failure, when the operation failed.
    pub error: Option<OperationError>,
}

impl OperationOutcome {
    fn pending() -> Self {
        Self {
            status: OpStatus::Pending,
            affected: Vec::new(),
            error: None,
        }
    }
}

/// Result of a batch call.
#[derive(Debug, Clone)]
pub struct BatchResult {
    /// Whether every executed operation completed.
    pub success: bool,
    /// Correlation id for the call.
    pub transaction_id: u64,
    /// Per-operation outcomes.
    pub outcomes: BTreeMap<String, OperationOutcome>,
    /// Execution levels the scheduler derived.
    pub levels: Vec<Vec<String>>,
    /// Batch-level errors (cycles, timeout, rollback problems).
    pub errors: Vec<OperationError>,
    /// Whether compensation ran.
    pub rolled_back: bool,
}

impl BatchResult {
    /// Ids of operations with the given status, sorted.
    pub fn with_status(&self, status: OpStatus) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.status == status)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// Best-effort inverse of a completed operation.
#[derive(Debug, Clone)]
enum UndoAction {
    /// Delete a record the batch created.
    DeleteCreated { entity: String, id: RecordId },
    /// Restore fields captured before an update.
    Restore {
        entity: String,
        id: RecordId,
        fields: FieldMap,
    },
    /// Re-create a record from its pre-delete snapshot (the store assigns
    /// a fresh id).
    Recreate { entity: String, fields: FieldMap },
}

#[derive(Debug, Default)]
struct ExecState {
    outcomes: BTreeMap<String, OperationOutcome>,
    undo_log: Vec<UndoAction>,
}

/// Schedules a mixed set of operations with maximal safe parallelism.
pub struct BatchScheduler {
    graph: Arc<RelationshipGraph>,
    store: Arc<dyn EntityStore>,
    cascade: CascadeEngine,
    active: DashMap<String, u64>,
}

impl BatchScheduler {
    /// Create a scheduler over a built graph and a store.
    pub fn new(graph: Arc<RelationshipGraph>, store: Arc<dyn EntityStore>) -> Self {
        let cascade = CascadeEngine::new(graph.clone(), store.clone());
        Self {
            graph,
            store,
            cascade,
            active: DashMap::new(),
        }
    }

    /// Ids of operations currently tracked as active, sorted.
    pub fn active_operations(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Stop tracking an operation. Its task is skipped if it has not
    /// started; in-flight work is not preempted.
    pub fn cancel(&self, op_id: &str) -> bool {
        self.active.remove(op_id).is_some()
    }

    /// Execute a batch of operations.
    pub async fn process_batch(
        &self,
        operations: Vec<BatchOperation>,
        options: &BatchOptions,
    ) -> BatchResult {
        let transaction_id = generate_transaction_id();
        let mut result = BatchResult {
            success: false,
            transaction_id,
            outcomes: operations
                .iter()
                .map(|op| (op.id.clone(), OperationOutcome::pending()))
                .collect(),
            levels: Vec::new(),
            errors: Vec::new(),
            rolled_back: false,
        };

        if result.outcomes.len() != operations.len() {
            result.errors.push(OperationError::new(
                ErrorCode::ValidationError,
                Severity::Critical,
                "duplicate operation ids in batch",
            ));
            return result;
        }

        let op_graph = build_operation_graph(&operations, &self.graph);
        if !op_graph.cyclic.is_empty() {
            warn!(cyclic = ?op_graph.cyclic, "batch aborted: cyclic dependencies");
            result.errors.push(
                OperationError::new(
                    ErrorCode::CyclicDependency,
                    Severity::Critical,
                    "operation dependencies form a cycle",
                )
                .with_detail(json!({ "operations": op_graph.cyclic })),
            );
            for outcome in result.outcomes.values_mut() {
                outcome.status = OpStatus::Skipped;
            }
            return result;
        }
        result.levels = op_graph.levels.clone();

        for op in &operations {
            self.active.insert(op.id.clone(), transaction_id);
        }

        let ops_by_id: BTreeMap<&str, &BatchOperation> =
            operations.iter().map(|op| (op.id.as_str(), op)).collect();
        let state = Mutex::new(ExecState {
            outcomes: result.outcomes.clone(),
            undo_log: Vec::new(),
        });

        let run = self.run_levels(&ops_by_id, &op_graph.levels, options, &state);
        let timed_out = match options.timeout {
            Some(deadline) => tokio::time::timeout(deadline, run).await.is_err(),
            None => {
                run.await;
                false
            }
        };

        for op in &operations {
            self.active.remove(&op.id);
        }

        let mut state = state.into_inner();
        if timed_out {
            result.errors.push(OperationError::new(
                ErrorCode::OperationTimeout,
                Severity::Critical,
                "batch deadline elapsed",
            ));
            for outcome in state.outcomes.values_mut() {
                if !matches!(outcome.status, OpStatus::Completed | OpStatus::Failed) {
                    outcome.status = OpStatus::Skipped;
                }
            }
        }

        let any_failed = state
            .outcomes
            .values()
            .any(|o| o.status == OpStatus::Failed);
        if (any_failed || timed_out) && options.rollback_on_failure {
            self.rollback(&mut state, &mut result.errors).await;
            result.rolled_back = true;
        }

        result.outcomes = state.outcomes;
        result.success = !timed_out
            && result
                .outcomes
                .values()
                .all(|o| o.status == OpStatus::Completed);
        info!(
            transaction_id,
            completed = result.with_status(OpStatus::Completed).len(),
            failed = result.with_status(OpStatus::Failed).len(),
            skipped = result.with_status(OpStatus::Skipped).len(),
            "batch finished"
        );
        result
    }

    /// Run each level to completion before the next starts.
    async fn run_levels(
        &self,
        ops_by_id: &BTreeMap<&str, &BatchOperation>,
        levels: &[Vec<String>],
        options: &BatchOptions,
        state: &Mutex<ExecState>,
    ) {
        let semaphore = Arc::new(Semaphore::new(options.max_concurrency.max(1)));

        for (index, level) in levels.iter().enumerate() {
            debug!(level = index, operations = level.len(), "level starting");

            let tasks = level.iter().map(|op_id| {
                let semaphore = semaphore.clone();
                async move {
                    let Ok(_permit) = semaphore.acquire().await else {
                        return;
                    };
                    let Some(&op) = ops_by_id.get(op_id.as_str()) else {
                        return;
                    };

                    if !self.active.contains_key(op_id) {
                        debug!(op = %op_id, "operation cancelled before start");
                        state.lock().outcomes.insert(
                            op_id.clone(),
                            OperationOutcome {
                                status: OpStatus::Skipped,
                                affected: Vec::new(),
                                error: None,
                            },
                        );
                        return;
                    }

                    if let Some(outcome) = state.lock().outcomes.get_mut(op_id.as_str()) {
                        outcome.status = OpStatus::InProgress;
                    }

                    let (outcome, undos) = self.execute_operation(op, options).await;
                    let mut state = state.lock();
                    state.undo_log.extend(undos);
                    state.outcomes.insert(op_id.clone(), outcome);
                }
            });
            futures::future::join_all(tasks).await;

            let level_failed = {
                let state = state.lock();
                level
                    .iter()
                    .any(|id| state.outcomes.get(id).map(|o| o.status) == Some(OpStatus::Failed))
            };
            if level_failed && !options.continue_on_error {
                warn!(level = index, "level failed, skipping the rest of the batch");
                let mut state = state.lock();
                for later in &levels[index + 1..] {
                    for id in later {
                        if let Some(outcome) = state.outcomes.get_mut(id) {
                            outcome.status = OpStatus::Skipped;
                        }
                    }
                }
                return;
            }
        }
    }

    /// Execute one operation, returning its outcome and undo entries.
    async fn execute_operation(
        &self,
        op: &BatchOperation,
        options: &BatchOptions,
    ) -> (OperationOutcome, Vec<UndoAction>) {
        let mut affected = Vec::new();
        let mut undos = Vec::new();

        let error = match &op.action {
            BatchAction::Create { data } => {
                match self.store.create(&op.entity, data.clone()).await {
                    Ok(record) => {
                        affected.push(record.id);
                        undos.push(UndoAction::DeleteCreated {
                            entity: op.entity.clone(),
                            id: record.id,
                        });
                        None
                    }
                    Err(err) => Some(
                        OperationError::new(ErrorCode::CreateFailed, Severity::High, err.to_string())
                            .with_entity(op.entity.clone()),
                    ),
                }
            }
            BatchAction::Update { data } => {
                self.execute_update(op, data, &mut affected, &mut undos).await
            }
            BatchAction::Delete => {
                self.execute_delete(op, options, &mut affected, &mut undos)
                    .await
            }
        };

        let outcome = OperationOutcome {
            status: if error.is_some() {
                OpStatus::Failed
            } else {
                OpStatus::Completed
            },
            affected,
            error,
        };
        (outcome, undos)
    }

    async fn execute_update(
        &self,
        op: &BatchOperation,
        data: &FieldMap,
        affected: &mut Vec<RecordId>,
        undos: &mut Vec<UndoAction>,
    ) -> Option<OperationError> {
        for &id in &op.record_ids {
            let snapshot = match self.store.get(&op.entity, id).await {
                Ok(record) => record,
                Err(err) => {
                    return Some(
                        OperationError::new(
                            ErrorCode::EntityNotFound,
                            Severity::High,
                            err.to_string(),
                        )
                        .with_entity(op.entity.clone())
                        .with_record(id),
                    );
                }
            };
            if let Err(err) = self.store.update(&op.entity, id, data.clone()).await {
                return Some(
                    OperationError::new(ErrorCode::UpdateFailed, Severity::High, err.to_string())
                        .with_entity(op.entity.clone())
                        .with_record(id),
                );
            }
            undos.push(UndoAction::Restore {
                entity: op.entity.clone(),
                id,
                fields: snapshot.fields,
            });
            affected.push(id);
        }
        None
    }

    async fn execute_delete(
        &self,
        op: &BatchOperation,
        options: &BatchOptions,
        affected: &mut Vec<RecordId>,
        undos: &mut Vec<UndoAction>,
    ) -> Option<OperationError> {
        for &id in &op.record_ids {
            let snapshot = match self.store.get(&op.entity, id).await {
                Ok(record) => record,
                Err(err) => {
                    return Some(
                        OperationError::new(
                            ErrorCode::EntityNotFound,
                            Severity::High,
                            err.to_string(),
                        )
                        .with_entity(op.entity.clone())
                        .with_record(id),
                    );
                }
            };

            if options.cascade_deletes {
                let cascade_result = self
                    .cascade
                    .cascade_delete(&op.entity, id, &CascadeOptions::default())
                    .await;
                if !cascade_result.success {
                    let error = cascade_result.errors.into_iter().next().unwrap_or_else(|| {
                        OperationError::new(
                            ErrorCode::DeleteFailed,
                            Severity::High,
                            "cascade delete failed",
                        )
                    });
                    return Some(error);
                }
                for ids in cascade_result.affected.values() {
                    affected.extend(ids.iter().copied());
                }
            } else {
                if let Err(err) = self.store.delete(&op.entity, id).await {
                    return Some(
                        OperationError::new(
                            ErrorCode::DeleteFailed,
                            Severity::High,
                            err.to_string(),
                        )
                        .with_entity(op.entity.clone())
                        .with_record(id),
                    );
                }
                affected.push(id);
            }
            undos.push(UndoAction::Recreate {
                entity: op.entity.clone(),
                fields: snapshot.fields,
            });
        }
        None
    }

    /// Compensate completed operations in reverse order. Failures are
    /// recorded, not raised; this does not restore original record ids for
    /// re-created records.
    async fn rollback(&self, state: &mut ExecState, errors: &mut Vec<OperationError>) {
        info!(steps = state.undo_log.len(), "rolling back completed operations");

        for undo in state.undo_log.drain(..).rev() {
            let outcome: Result<(), String> = match &undo {
                UndoAction::DeleteCreated { entity, id } => self
                    .store
                    .delete(entity, *id)
                    .await
                    .map_err(|e| e.to_string()),
                UndoAction::Restore { entity, id, fields } => self
                    .store
                    .update(entity, *id, fields.clone())
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string()),
                UndoAction::Recreate { entity, fields } => {
                    let mut fields = fields.clone();
                    fields.remove("id");
                    self.store
                        .create(entity, fields)
                        .await
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                }
            };
            if let Err(message) = outcome {
                warn!(%message, "rollback step failed");
                errors.push(OperationError::new(
                    ErrorCode::ValidationError,
                    Severity::Medium,
                    format!("rollback step failed: {message}"),
                ));
            }
        }
    }

}
