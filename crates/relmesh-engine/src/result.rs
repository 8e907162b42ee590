//! Operation results and errors-as-values.
//!
//! Domain failures are accumulated per operation, not raised: every
//! top-level call returns a result object carrying a `success` flag, the
//! error list, and whatever partial effects occurred. Callers inspect
//! `success` to detect failure. `Critical` severity blocks an operation
//! unless the caller explicitly overrides.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::RecordId;

/// Machine-readable failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The addressed record does not exist.
    EntityNotFound,
    /// No such relationship between the entities involved.
    InvalidRelationship,
    /// The relationship does not allow cascading this operation.
    CascadeNotAllowed,
    /// A required related collection is absent or empty.
    RequiredRelationshipMissing,
    /// A restrict relationship still has referencing records.
    RestrictViolation,
    /// Cascade recursion exceeded the depth bound.
    MaxDepthExceeded,
    /// The delete would affect more records than allowed.
    HighImpactDelete,
    /// The data service rejected a create.
    CreateFailed,
    /// The data service rejected an update.
    UpdateFailed,
    /// The data service rejected a delete.
    DeleteFailed,
    /// Input failed validation.
    ValidationError,
    /// Submitted operations form a dependency cycle.
    CyclicDependency,
    /// The batch deadline elapsed.
    OperationTimeout,
}

/// How severe a failure is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A single accumulated failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationError {
    /// Failure code.
    pub code: ErrorCode,
    /// Failure severity.
    pub severity: Severity,
    /// Entity involved, if any.
    pub entity: Option<String>,
    /// Record involved, if any.
    pub record_id: Option<RecordId>,
    /// Relationship involved, if any.
    pub relationship: Option<String>,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    pub detail: Option<Value>,
}

impl OperationError {
    /// Create an error.
    pub fn new(code: ErrorCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            entity: None,
            record_id: None,
            relationship: None,
            message: message.into(),
            detail: None,
        }
    }

    /// Attach the entity involved.
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    /// Attach the record involved.
    pub fn with_record(mut self, id: RecordId) -> Self {
        self.record_id = Some(id);
        self
    }

    /// Attach the relationship involved.
    pub fn with_relationship(mut self, id: impl Into<String>) -> Self {
        self.relationship = Some(id.into());
        self
    }

    /// Attach structured detail.
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Critical errors block the operation unless explicitly overridden.
    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Critical
    }
}

/// Which cascade entry point produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CascadeOperation {
    Create,
    Update,
    Delete,
}

/// Outcome of a single cascade call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeResult {
    /// Whether the operation completed without blocking errors.
    pub success: bool,
    /// Which operation ran.
    pub operation: CascadeOperation,
    /// Primary entity.
    pub entity: String,
    /// Primary record, once known.
    pub record_id: Option<RecordId>,
    /// Touched record ids per entity.
    pub affected: BTreeMap<String, Vec<RecordId>>,
    /// Accumulated errors, in occurrence order.
    pub errors: Vec<OperationError>,
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// Correlation id for the call.
    pub transaction_id: u64,
}

impl CascadeResult {
    /// Total number of touched records.
    pub fn affected_count(&self) -> usize {
        self.affected.values().map(Vec::len).sum()
    }

    /// Whether any accumulated error is blocking.
    pub fn has_blocking_errors(&self) -> bool {
        self.errors.iter().any(OperationError::is_blocking)
    }

    /// First error with the given code, if any.
    pub fn error_with_code(&self, code: ErrorCode) -> Option<&OperationError> {
        self.errors.iter().find(|e| e.code == code)
    }
}

/// Generate a correlation id from the clock.
pub(crate) fn generate_transaction_id() -> u64 {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64;
    ts ^ ts.wrapping_mul(0x517c_c1b7_2722_0a95)
}
