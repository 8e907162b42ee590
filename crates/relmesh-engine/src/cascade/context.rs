//! Per-invocation cascade state.

use std::collections::{BTreeMap, HashSet};

use crate::result::{
    generate_transaction_id, CascadeOperation, CascadeResult, OperationError,
};
use crate::store::RecordId;

use super::CascadeOptions;

/// Base for placeholder ids handed out during dry runs, far above any id a
/// real store would assign in practice.
const PLACEHOLDER_BASE: RecordId = 1 << 60;

/// Mutable state for one cascade call.
///
/// Created at the start of a call and discarded at the end; never shared.
#[derive(Debug)]
pub(crate) struct CascadeContext {
    pub operation: CascadeOperation,
    pub entity: String,
    pub record_id: Option<RecordId>,
    pub max_depth: usize,
    pub batch_size: usize,
    pub dry_run: bool,
    pub continue_on_error: bool,
    /// Cycle guard within this run.
    pub visited: HashSet<(String, RecordId)>,
    /// Touched record ids per entity.
    pub affected: BTreeMap<String, Vec<RecordId>>,
    pub errors: Vec<OperationError>,
    pub transaction_id: u64,
    next_placeholder: RecordId,
}

impl CascadeContext {
    pub fn new(operation: CascadeOperation, entity: &str, options: &CascadeOptions) -> Self {
        Self {
            operation,
            entity: entity.to_string(),
            record_id: None,
            max_depth: options.max_depth,
            batch_size: options.batch_size.max(1),
            dry_run: options.dry_run,
            continue_on_error: options.continue_on_error,
            visited: HashSet::new(),
            affected: BTreeMap::new(),
            errors: Vec::new(),
            transaction_id: generate_transaction_id(),
            next_placeholder: PLACEHOLDER_BASE,
        }
    }

    pub fn record_affected(&mut self, entity: &str, id: RecordId) {
        self.affected.entry(entity.to_string()).or_default().push(id);
    }

    pub fn push_error(&mut self, error: OperationError) {
        self.errors.push(error);
    }

    pub fn has_blocking_errors(&self) -> bool {
        self.errors.iter().any(OperationError::is_blocking)
    }

    /// Whether execution should stop after the errors recorded so far.
    pub fn should_abort(&self) -> bool {
        !self.continue_on_error && !self.errors.is_empty()
    }

    /// Substitute id for a record that a dry run did not create.
    pub fn next_placeholder_id(&mut self) -> RecordId {
        let id = self.next_placeholder;
        self.next_placeholder += 1;
        id
    }

    pub fn into_result(self, success: bool) -> CascadeResult {
        CascadeResult {
            success,
            operation: self.operation,
            entity: self.entity,
            record_id: self.record_id,
            affected: self.affected,
            errors: self.errors,
            dry_run: self.dry_run,
            transaction_id: self.transaction_id,
        }
    }
}
