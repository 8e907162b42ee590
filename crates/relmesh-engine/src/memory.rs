//! In-memory entity store.
//!
//! A [`DashMap`]-backed [`EntityStore`] for demos and tests. Ids are
//! assigned from an atomic sequence; read and write counters let callers
//! assert how many service calls an operation performed.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::store::{EntityStore, FieldMap, Record, RecordFilter, RecordId, StoreError};

/// In-memory entity store.
#[derive(Debug)]
pub struct MemoryStore {
    entities: DashMap<String, DashMap<RecordId, FieldMap>>,
    next_id: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entities: DashMap::new(),
            next_id: AtomicU64::new(1),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Insert a record with a caller-chosen id, for seeding fixtures.
    pub fn seed(&self, entity: &str, id: RecordId, mut fields: FieldMap) {
        fields.insert("id".to_string(), id.into());
        self.entities
            .entry(entity.to_string())
            .or_default()
            .insert(id, fields);
        // Keep generated ids clear of seeded ones.
        self.next_id.fetch_max(id + 1, Ordering::SeqCst);
    }

    /// Number of records currently stored for an entity.
    pub fn count(&self, entity: &str) -> usize {
        self.entities.get(entity).map(|m| m.len()).unwrap_or(0)
    }

    /// Service reads performed so far.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Service writes performed so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Total service calls performed so far.
    pub fn calls(&self) -> u64 {
        self.reads() + self.writes()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get(&self, entity: &str, id: RecordId) -> Result<Record, StoreError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let records = self
            .entities
            .get(entity)
            .ok_or_else(|| StoreError::NotFound {
                entity: entity.to_string(),
                id,
            })?;
        let fields = records.get(&id).ok_or_else(|| StoreError::NotFound {
            entity: entity.to_string(),
            id,
        })?;
        Ok(Record::new(entity, id, fields.clone()))
    }

    async fn create(&self, entity: &str, mut data: FieldMap) -> Result<Record, StoreError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        data.insert("id".to_string(), id.into());
        self.entities
            .entry(entity.to_string())
            .or_default()
            .insert(id, data.clone());
        Ok(Record::new(entity, id, data))
    }

    async fn update(
        &self,
        entity: &str,
        id: RecordId,
        data: FieldMap,
    ) -> Result<Record, StoreError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let records = self
            .entities
            .get(entity)
            .ok_or_else(|| StoreError::NotFound {
                entity: entity.to_string(),
                id,
            })?;
        let mut fields = records.get_mut(&id).ok_or_else(|| StoreError::NotFound {
            entity: entity.to_string(),
            id,
        })?;
        for (key, value) in data {
            fields.insert(key, value);
        }
        fields.insert("id".to_string(), id.into());
        Ok(Record::new(entity, id, fields.clone()))
    }

    async fn delete(&self, entity: &str, id: RecordId) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let records = self
            .entities
            .get(entity)
            .ok_or_else(|| StoreError::NotFound {
                entity: entity.to_string(),
                id,
            })?;
        records.remove(&id).ok_or_else(|| StoreError::NotFound {
            entity: entity.to_string(),
            id,
        })?;
        Ok(())
    }

    async fn query(
        &self,
        entity: &str,
        filter: &RecordFilter,
    ) -> Result<Vec<RecordId>, StoreError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let Some(records) = self.entities.get(entity) else {
            return Ok(Vec::new());
        };

        let mut ids: Vec<RecordId> = records
            .iter()
            .filter(|entry| match filter {
                RecordFilter::All => true,
                RecordFilter::FieldEq { field, value } => {
                    entry.value().get(field) == Some(value)
                }
                RecordFilter::IdIn(set) => set.contains(entry.key()),
            })
            .map(|entry| *entry.key())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, serde_json::Value)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_create_assigns_ids() {
        let store = MemoryStore::new();
        let a = store
            .create("Contact", fields(&[("name", json!("Ada"))]))
            .await
            .unwrap();
        let b = store
            .create("Contact", fields(&[("name", json!("Bob"))]))
            .await
            .unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(a.field("id"), Some(&json!(a.id)));
        assert_eq!(store.count("Contact"), 2);
    }

    #[tokio::test]
    async fn test_seed_and_get() {
        let store = MemoryStore::new();
        store.seed("Company", 42, fields(&[("name", json!("Acme"))]));

        let record = store.get("Company", 42).await.unwrap();
        assert_eq!(record.field("name"), Some(&json!("Acme")));

        // Generated ids never collide with seeded ones.
        let fresh = store.create("Company", FieldMap::new()).await.unwrap();
        assert!(fresh.id > 42);
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let store = MemoryStore::new();
        store.seed("Company", 1, fields(&[("name", json!("Acme")), ("tier", json!("gold"))]));

        let updated = store
            .update("Company", 1, fields(&[("tier", json!("silver"))]))
            .await
            .unwrap();

        assert_eq!(updated.field("name"), Some(&json!("Acme")));
        assert_eq!(updated.field("tier"), Some(&json!("silver")));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let store = MemoryStore::new();
        store.seed("Company", 1, FieldMap::new());

        assert!(store.delete("Company", 1).await.is_ok());
        assert!(matches!(
            store.delete("Company", 1).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_query_by_field() {
        let store = MemoryStore::new();
        store.seed("Contact", 1, fields(&[("company_id", json!(42))]));
        store.seed("Contact", 2, fields(&[("company_id", json!(42))]));
        store.seed("Contact", 3, fields(&[("company_id", json!(7))]));

        let ids = store
            .query("Contact", &RecordFilter::field_references("company_id", 42))
            .await
            .unwrap();
        assert_eq!(ids, vec![1, 2]);

        let all = store.query("Contact", &RecordFilter::All).await.unwrap();
        assert_eq!(all, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_call_counters() {
        let store = MemoryStore::new();
        store.seed("Company", 1, FieldMap::new());

        store.get("Company", 1).await.unwrap();
        store.query("Company", &RecordFilter::All).await.unwrap();
        store
            .update("Company", 1, fields(&[("x", json!(1))]))
            .await
            .unwrap();

        assert_eq!(store.reads(), 2);
        assert_eq!(store.writes(), 1);
        assert_eq!(store.calls(), 3);
    }
}
