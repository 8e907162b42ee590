//! Repair plans for integrity findings.

use chrono::{DateTime, Utc};

use crate::result::OperationError;
use crate::store::{FieldMap, Record, RecordId};

/// A single repair mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum RepairAction {
    /// Delete an orphaned record.
    DeleteOrphan {
        /// Entity of the record.
        entity: String,
        /// Record to delete.
        record_id: RecordId,
    },
    /// Null out a broken reference.
    ClearReference {
        /// Entity of the referencing record.
        entity: String,
        /// Referencing record.
        record_id: RecordId,
        /// Field to clear.
        field: String,
    },
    /// Re-create a missing parent and point the orphan at it.
    CreateMissing {
        /// Entity of the parent to create.
        entity: String,
        /// Field values for the new parent.
        fields: FieldMap,
        /// `(entity, record id, field)` of the orphan to reattach.
        reattach: Option<(String, RecordId, String)>,
    },
    /// Re-scan an entity and fail if issues remain.
    ValidateConstraint {
        /// Entity to re-check.
        entity: String,
    },
}

/// One ordered step of a repair plan.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairStep {
    /// Position in the plan.
    pub index: usize,
    /// The mutation.
    pub action: RepairAction,
    /// Steps that must execute first.
    pub depends_on: Vec<usize>,
    /// How to undo this step by hand.
    pub rollback_note: String,
}

impl RepairStep {
    /// Human-readable description of this step.
    pub fn description(&self) -> String {
        match &self.action {
            RepairAction::DeleteOrphan { entity, record_id } => {
                format!("Delete orphaned {entity} record {record_id}")
            }
            RepairAction::ClearReference {
                entity,
                record_id,
                field,
            } => {
                format!("Clear {entity}.{field} on record {record_id}")
            }
            RepairAction::CreateMissing { entity, .. } => {
                format!("Re-create missing {entity} record")
            }
            RepairAction::ValidateConstraint { entity } => {
                format!("Validate {entity} after repairs")
            }
        }
    }

    /// Entity this step touches.
    pub fn entity(&self) -> &str {
        match &self.action {
            RepairAction::DeleteOrphan { entity, .. }
            | RepairAction::ClearReference { entity, .. }
            | RepairAction::CreateMissing { entity, .. }
            | RepairAction::ValidateConstraint { entity } => entity,
        }
    }
}

/// An ordered, dependency-aware list of repair steps.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairPlan {
    /// Plan id, used to execute it later.
    pub id: u64,
    /// When the plan was synthesized.
    pub created_at: DateTime<Utc>,
    /// Ordered steps.
    pub steps: Vec<RepairStep>,
}

impl RepairPlan {
    /// Number of steps.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Whether the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps that mutate data (everything except validation).
    pub fn mutation_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| !matches!(s.action, RepairAction::ValidateConstraint { .. }))
            .count()
    }
}

/// Per-step confirmation callback.
pub type StepConfirm = Box<dyn Fn(&RepairStep) -> bool + Send + Sync>;

/// Execution controls for a repair plan.
#[derive(Default)]
pub struct RepairOptions {
    /// Walk the plan without mutating.
    pub dry_run: bool,
    /// Capture pre-images of mutated records.
    pub backup: bool,
    /// Ask before each step; a false return skips the step.
    pub confirm: Option<StepConfirm>,
}

impl RepairOptions {
    /// Execute with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Preview without mutating.
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Capture pre-images before mutating.
    pub fn with_backup(mut self) -> Self {
        self.backup = true;
        self
    }

    /// Confirm each step through a callback.
    pub fn with_confirmation<F>(mut self, confirm: F) -> Self
    where
        F: Fn(&RepairStep) -> bool + Send + Sync + 'static,
    {
        self.confirm = Some(Box::new(confirm));
        self
    }
}

/// Result of executing a repair plan.
#[derive(Debug, Default)]
pub struct RepairOutcome {
    /// Plan that was executed.
    pub plan_id: u64,
    /// Whether every non-skipped step succeeded.
    pub success: bool,
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// Indices of executed steps.
    pub executed: Vec<usize>,
    /// Indices of skipped steps.
    pub skipped: Vec<usize>,
    /// Failed steps with their errors.
    pub failed: Vec<(usize, OperationError)>,
    /// Pre-images captured before mutation.
    pub backups: Vec<Record>,
}
