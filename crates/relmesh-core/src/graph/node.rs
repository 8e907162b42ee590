//! Entity nodes of the relationship graph.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A single entity kind in the relationship graph.
///
/// Created once per distinct entity name during graph construction and
/// never mutated afterward (the hierarchy level is assigned during the
/// one-time build pass).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityNode {
    /// Entity name, the node key.
    pub name: String,
    /// Relationship ids where this entity is the source.
    pub outgoing: BTreeSet<String>,
    /// Relationship ids where this entity is the target.
    pub incoming: BTreeSet<String>,
    /// Entities whose records this entity's records reference.
    pub depends_on: BTreeSet<String>,
    /// Entities that reference this entity.
    pub dependents: BTreeSet<String>,
    /// Longest dependency chain length from a root entity.
    pub hierarchy_level: u32,
}

impl EntityNode {
    /// Create an unconnected node.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outgoing: BTreeSet::new(),
            incoming: BTreeSet::new(),
            depends_on: BTreeSet::new(),
            dependents: BTreeSet::new(),
            hierarchy_level: 0,
        }
    }

    /// Total number of relationships touching this entity.
    pub fn connection_count(&self) -> usize {
        self.outgoing.len() + self.incoming.len()
    }

    /// Check if the entity has no dependencies.
    pub fn is_root(&self) -> bool {
        self.depends_on.is_empty()
    }
}
