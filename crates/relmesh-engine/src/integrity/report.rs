//! Integrity scan results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::result::Severity;
use crate::store::{Record, RecordId};

/// What an integrity check should look at.
pub struct IntegrityOptions {
    /// Entities to scan; `None` scans every entity in the graph.
    pub entities: Option<Vec<String>>,
    /// Find child records whose parent is missing.
    pub check_orphans: bool,
    /// Find dangling, invalid, and circular references.
    pub check_references: bool,
    /// Find constraint violations.
    pub check_constraints: bool,
    /// Caller-supplied business rules, checked per record.
    pub business_rules: Vec<BusinessRule>,
}

impl Default for IntegrityOptions {
    fn default() -> Self {
        Self {
            entities: None,
            check_orphans: true,
            check_references: true,
            check_constraints: true,
            business_rules: Vec::new(),
        }
    }
}

impl IntegrityOptions {
    /// Check everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the scan to the given entities.
    pub fn with_entities(mut self, entities: Vec<String>) -> Self {
        self.entities = Some(entities);
        self
    }

    /// Add a business rule.
    pub fn with_business_rule(mut self, rule: BusinessRule) -> Self {
        self.business_rules.push(rule);
        self
    }
}

/// A named per-record predicate; records failing it are reported as
/// business-rule violations.
pub struct BusinessRule {
    /// Rule name, surfaced in the report.
    pub name: String,
    /// Entity the rule applies to.
    pub entity: String,
    /// Returns true when the record satisfies the rule.
    pub check: fn(&Record) -> bool,
}

/// A child record whose referenced parent does not exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanedRecord {
    /// Entity of the orphaned record.
    pub entity: String,
    /// Orphaned record id.
    pub record_id: RecordId,
    /// Relationship the reference belongs to.
    pub relationship: String,
    /// Entity the missing parent belongs to.
    pub parent_entity: String,
    /// Missing parent id.
    pub parent_id: RecordId,
}

/// Kinds of referential problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceIssueKind {
    /// Reference to a record that does not exist.
    Dangling,
    /// Reference value is not a record id.
    Invalid,
    /// Record references itself.
    Circular,
}

/// A problematic reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferentialIssue {
    /// Problem kind.
    pub kind: ReferenceIssueKind,
    /// Entity of the referencing record.
    pub entity: String,
    /// Referencing record id.
    pub record_id: RecordId,
    /// Referencing field.
    pub field: String,
    /// Human-readable description.
    pub message: String,
}

impl ReferentialIssue {
    /// Severity of this issue kind.
    pub fn severity(&self) -> Severity {
        match self.kind {
            ReferenceIssueKind::Dangling => Severity::High,
            ReferenceIssueKind::Invalid => Severity::Medium,
            ReferenceIssueKind::Circular => Severity::Medium,
        }
    }
}

/// Kinds of constraint violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationKind {
    /// A required referencing field is null or absent.
    RequiredFieldNull,
    /// A field holds a value of the wrong shape.
    InvalidValue,
    /// A caller-supplied business rule failed.
    BusinessRule,
}

/// A single constraint violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintViolation {
    /// Violation kind.
    pub kind: ViolationKind,
    /// Entity of the violating record.
    pub entity: String,
    /// Violating record id.
    pub record_id: RecordId,
    /// Field involved, if any.
    pub field: Option<String>,
    /// Business rule name, for rule failures.
    pub rule: Option<String>,
    /// Severity.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
}

/// Aggregated result of an integrity check. Violations are reported, never
/// auto-corrected; repairs happen only through an explicitly executed
/// repair plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// When the scan ran.
    pub generated_at: DateTime<Utc>,
    /// Entities that were scanned.
    pub checked_entities: Vec<String>,
    /// Orphaned child records.
    pub orphans: Vec<OrphanedRecord>,
    /// Referential issues.
    pub referential: Vec<ReferentialIssue>,
    /// Constraint violations.
    pub violations: Vec<ConstraintViolation>,
}

impl IntegrityReport {
    /// Total number of reported issues.
    pub fn total_issues(&self) -> usize {
        self.orphans.len() + self.referential.len() + self.violations.len()
    }

    /// Whether the scan found nothing.
    pub fn is_clean(&self) -> bool {
        self.total_issues() == 0
    }

    /// Issues touching the given entity.
    pub fn issues_for(&self, entity: &str) -> usize {
        self.orphans.iter().filter(|o| o.entity == entity).count()
            + self.referential.iter().filter(|r| r.entity == entity).count()
            + self.violations.iter().filter(|v| v.entity == entity).count()
    }
}
