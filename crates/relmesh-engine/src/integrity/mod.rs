//! Integrity checking and repair.

mod manager;
mod repair;
mod report;

pub use manager::IntegrityManager;
pub use repair::{
    RepairAction, RepairOptions, RepairOutcome, RepairPlan, RepairStep, StepConfirm,
};
pub use report::{
    BusinessRule, ConstraintViolation, IntegrityOptions, IntegrityReport, OrphanedRecord,
    ReferenceIssueKind, ReferentialIssue, ViolationKind,
};
