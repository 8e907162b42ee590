//! The Entity Data Service boundary.
//!
//! Every side-effecting component talks to entity data through the
//! [`EntityStore`] trait; the engine itself never touches a network or a
//! database. Records are heterogeneous bags of named fields with the
//! identity pulled out explicitly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Identity of a single record.
pub type RecordId = u64;

/// Named field values of a record.
pub type FieldMap = serde_json::Map<String, Value>;

/// A single entity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Entity kind this record belongs to.
    pub entity: String,
    /// Record identity.
    pub id: RecordId,
    /// Named field values, including foreign keys.
    pub fields: FieldMap,
}

impl Record {
    /// Create a record.
    pub fn new(entity: impl Into<String>, id: RecordId, fields: FieldMap) -> Self {
        Self {
            entity: entity.into(),
            id,
            fields,
        }
    }

    /// Get a field value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Get a field value as a record id, if it holds one.
    pub fn field_id(&self, name: &str) -> Option<RecordId> {
        self.fields.get(name).and_then(Value::as_u64)
    }
}

/// Filter for [`EntityStore::query`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordFilter {
    /// Every record of the entity.
    All,
    /// Records whose field equals the value.
    FieldEq {
        /// Field name.
        field: String,
        /// Value to match.
        value: Value,
    },
    /// Records whose id is in the set.
    IdIn(Vec<RecordId>),
}

impl RecordFilter {
    /// Match records whose field equals a record id.
    pub fn field_references(field: impl Into<String>, id: RecordId) -> Self {
        Self::FieldEq {
            field: field.into(),
            value: Value::from(id),
        }
    }
}

/// Errors surfaced by an entity store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record does not exist.
    #[error("{entity} record {id} not found")]
    NotFound {
        /// Entity kind.
        entity: String,
        /// Missing record id.
        id: RecordId,
    },

    /// The entity kind is not known to the store.
    #[error("unknown entity: {entity}")]
    UnknownEntity {
        /// Entity kind.
        entity: String,
    },

    /// The backing service failed.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Access to entity records.
///
/// `query` returns ids only; callers `get` the records they need. All
/// methods are suspension points.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Fetch a record.
    async fn get(&self, entity: &str, id: RecordId) -> Result<Record, StoreError>;

    /// Create a record, returning it with its assigned id.
    async fn create(&self, entity: &str, data: FieldMap) -> Result<Record, StoreError>;

    /// Merge field values into an existing record.
    async fn update(&self, entity: &str, id: RecordId, data: FieldMap)
        -> Result<Record, StoreError>;

    /// Delete a record.
    async fn delete(&self, entity: &str, id: RecordId) -> Result<(), StoreError>;

    /// Ids of records matching the filter, ascending.
    async fn query(&self, entity: &str, filter: &RecordFilter) -> Result<Vec<RecordId>, StoreError>;
}
