//! Deletion plan built before a cascade delete executes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::store::RecordId;

/// A referencing field to null out instead of deleting its record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NullifyStep {
    /// Entity of the referencing record.
    pub entity: String,
    /// Referencing record id.
    pub record_id: RecordId,
    /// Field to set to null.
    pub field: String,
}

/// Everything a cascade delete will touch.
///
/// Built by recursively following cascade-on-delete relationships;
/// `records` is in post-order with the root entry last. A dry run returns
/// the plan's effects without executing them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeletePlan {
    /// Records to delete, discovery post-order, root last.
    pub records: Vec<(String, RecordId)>,
    /// Referencing fields to null out.
    pub nullify: Vec<NullifyStep>,
    /// The depth bound cut the walk short somewhere.
    pub truncated: bool,
}

impl DeletePlan {
    /// Record ids to delete, grouped by entity.
    pub fn by_entity(&self) -> BTreeMap<String, Vec<RecordId>> {
        let mut grouped: BTreeMap<String, Vec<RecordId>> = BTreeMap::new();
        for (entity, id) in &self.records {
            grouped.entry(entity.clone()).or_default().push(*id);
        }
        grouped
    }

    /// Total number of records the plan touches.
    pub fn estimated_total(&self) -> usize {
        self.records.len() + self.nullify.len()
    }
}
