//! Profile-driven relationship loading.
//!
//! Decides how much of an entity's relationship neighborhood to
//! materialize, fetches it through the entity store, and caches the result
//! keyed by the selected relation names. Collections where the entity is
//! the source are fetched by foreign-key query; parent references (the
//! entity's own foreign keys) are followed through declared inverse names.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use relmesh_core::{LoadStrategy, RelationDef, RelationKind, RelationshipGraph};

use crate::store::{EntityStore, Record, RecordFilter, RecordId, StoreError};

use super::cache::{CacheConfig, CacheKey, CacheStats, CachedLoad, RelationCache};

/// How much of the relationship neighborhood to materialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadProfile {
    /// Only eager relations.
    Lightweight,
    /// Eager, prefetch, and selective relations.
    Balanced,
    /// Every relation of the entity.
    Comprehensive,
    /// Exactly the named relations.
    Custom(Vec<String>),
}

impl LoadProfile {
    fn admits(&self, rel: &RelationDef, name: &str) -> bool {
        match self {
            LoadProfile::Lightweight => rel.load_strategy == LoadStrategy::Eager,
            LoadProfile::Balanced => matches!(
                rel.load_strategy,
                LoadStrategy::Eager | LoadStrategy::Prefetch | LoadStrategy::Selective
            ),
            LoadProfile::Comprehensive => true,
            LoadProfile::Custom(names) => names.iter().any(|n| n == name),
        }
    }
}

/// Options for one load call.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Relation selection profile.
    pub profile: LoadProfile,
    /// Skip the cache for this call.
    pub bypass_cache: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            profile: LoadProfile::Balanced,
            bypass_cache: false,
        }
    }
}

impl LoadOptions {
    /// Load with the balanced profile.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the profile.
    pub fn with_profile(mut self, profile: LoadProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Skip the cache.
    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}

/// A loaded record with its materialized relations.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedEntity {
    /// The record itself.
    pub record: Record,
    /// Related records keyed by relation (or inverse) name.
    pub related: BTreeMap<String, Vec<Record>>,
    /// Whether the result came from the cache.
    pub from_cache: bool,
}

/// Loads entities together with a selected subset of their relations.
pub struct LoadingEngine {
    graph: Arc<RelationshipGraph>,
    store: Arc<dyn EntityStore>,
    cache: RelationCache,
    usage: DashMap<String, u64>,
}

impl LoadingEngine {
    /// Create an engine with default cache sizing.
    pub fn new(graph: Arc<RelationshipGraph>, store: Arc<dyn EntityStore>) -> Self {
        Self::with_cache_config(graph, store, CacheConfig::default())
    }

    /// Create an engine with explicit cache sizing.
    pub fn with_cache_config(
        graph: Arc<RelationshipGraph>,
        store: Arc<dyn EntityStore>,
        config: CacheConfig,
    ) -> Self {
        Self {
            graph,
            store,
            cache: RelationCache::new(config),
            usage: DashMap::new(),
        }
    }

    /// Load a record plus the relations its profile selects.
    pub async fn load(
        &self,
        entity: &str,
        id: RecordId,
        options: &LoadOptions,
    ) -> Result<LoadedEntity, StoreError> {
        *self.usage.entry(entity.to_string()).or_insert(0) += 1;

        let selection = self.select_relations(entity, &options.profile);
        let names: Vec<String> = selection.iter().map(|(name, _, _)| name.clone()).collect();
        let key = CacheKey::new(entity, id, &names);

        if !options.bypass_cache {
            if let Some(cached) = self.cache.get(&key) {
                debug!(entity, id, "load served from cache");
                return Ok(LoadedEntity {
                    record: cached.record,
                    related: cached.related,
                    from_cache: true,
                });
            }
        }

        let record = self.store.get(entity, id).await?;
        let mut related: BTreeMap<String, Vec<Record>> = BTreeMap::new();

        for (name, rel, backward) in &selection {
            let records = if *backward {
                self.fetch_parent(rel, &record).await?
            } else {
                match rel.kind {
                    RelationKind::ManyToMany | RelationKind::Polymorphic => {
                        self.fetch_generic(rel, id).await?
                    }
                    _ => self.fetch_children(rel, id).await?,
                }
            };
            related.insert(name.clone(), records);
        }

        self.cache.insert(
            key,
            CachedLoad {
                record: record.clone(),
                related: related.clone(),
            },
        );
        debug!(entity, id, relations = related.len(), "load materialized");

        Ok(LoadedEntity {
            record,
            related,
            from_cache: false,
        })
    }

    /// Relations the profile selects: `(name, relation, backward)` where
    /// backward means "follow this record's own foreign key to its parent".
    fn select_relations<'g>(
        &'g self,
        entity: &str,
        profile: &LoadProfile,
    ) -> Vec<(String, &'g RelationDef, bool)> {
        let mut selection = Vec::new();

        for rel in self.graph.relations_from(entity) {
            if profile.admits(rel, &rel.name) {
                selection.push((rel.name.clone(), rel, false));
            }
        }
        for rel in self.graph.relations_to(entity) {
            let Some(inverse) = rel.inverse_name.as_deref() else {
                continue;
            };
            if rel.is_self_referencing() {
                continue;
            }
            if profile.admits(rel, inverse) {
                selection.push((inverse.to_string(), rel, true));
            }
        }

        selection
    }

    /// One-to-many style fetch: children referencing the record.
    async fn fetch_children(
        &self,
        rel: &RelationDef,
        id: RecordId,
    ) -> Result<Vec<Record>, StoreError> {
        let Some(fk) = rel.primary_target_field() else {
            return Ok(Vec::new());
        };
        let ids = self
            .store
            .query(&rel.target_entity, &RecordFilter::field_references(fk, id))
            .await?;
        let mut records = Vec::with_capacity(ids.len());
        for child_id in ids {
            records.push(self.store.get(&rel.target_entity, child_id).await?);
        }
        Ok(records)
    }

    /// Generic fetch for many-to-many and polymorphic relations; records
    /// without the referencing field simply do not match.
    async fn fetch_generic(
        &self,
        rel: &RelationDef,
        id: RecordId,
    ) -> Result<Vec<Record>, StoreError> {
        let Some(fk) = rel.primary_target_field() else {
            return Ok(Vec::new());
        };
        let ids = self
            .store
            .query(&rel.target_entity, &RecordFilter::field_references(fk, id))
            .await
            .unwrap_or_default();
        let mut records = Vec::with_capacity(ids.len());
        for related_id in ids {
            if let Ok(record) = self.store.get(&rel.target_entity, related_id).await {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Many-to-one style fetch: follow this record's foreign key up.
    async fn fetch_parent(
        &self,
        rel: &RelationDef,
        record: &Record,
    ) -> Result<Vec<Record>, StoreError> {
        let Some(fk) = rel.primary_target_field() else {
            return Ok(Vec::new());
        };
        let Some(parent_id) = record.field_id(fk) else {
            return Ok(Vec::new());
        };
        match self.store.get(&rel.source_entity, parent_id).await {
            Ok(parent) => Ok(vec![parent]),
            Err(StoreError::NotFound { .. }) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    /// Cache statistics.
    pub fn cache_stats(&self) -> &CacheStats {
        self.cache.stats()
    }

    /// Load counts per entity, sorted by name.
    pub fn usage_counts(&self) -> Vec<(String, u64)> {
        let mut counts: Vec<(String, u64)> = self
            .usage
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        counts.sort();
        counts
    }

    /// Drop every cached load.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Heuristic suggestions based on observed cache and usage behavior.
    pub fn optimization_suggestions(&self) -> Vec<String> {
        let mut suggestions = Vec::new();
        let stats = self.cache.stats();
        let lookups = stats.hits() + stats.misses();

        if lookups >= 20 && stats.hit_rate() < 0.3 {
            suggestions.push(
                "enable caching for repeated loads or increase the cache TTL; the hit rate is low"
                    .to_string(),
            );
        }
        if stats.evictions() > lookups / 2 {
            suggestions.push("increase cache capacity; entries are evicted quickly".to_string());
        }
        for entry in self.usage.iter() {
            if *entry.value() >= 50 {
                suggestions.push(format!(
                    "use batch loading for {}; it was loaded {} times individually",
                    entry.key(),
                    entry.value()
                ));
            }
        }
        suggestions.sort();
        suggestions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::store::FieldMap;
    use relmesh_core::{RelationCatalog, RelationDef};
    use serde_json::json;

    fn fields(pairs: &[(&str, serde_json::Value)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn seeded_engine() -> (Arc<MemoryStore>, LoadingEngine) {
        let catalog = RelationCatalog::new(vec![
            RelationDef::one_to_many("company_contacts", "contacts", "Company", "Contact", "company_id")
                .with_load_strategy(LoadStrategy::Eager)
                .with_inverse("company"),
            RelationDef::one_to_many("company_tickets", "tickets", "Company", "Ticket", "company_id")
                .with_load_strategy(LoadStrategy::OnDemand),
            RelationDef::many_to_many("company_tags", "tags", "Company", "Tag", "company_id")
                .with_load_strategy(LoadStrategy::Prefetch),
        ])
        .unwrap();
        let graph = Arc::new(RelationshipGraph::build(&catalog));

        let store = Arc::new(MemoryStore::new());
        store.seed("Company", 1, fields(&[("name", json!("Acme"))]));
        store.seed("Contact", 10, fields(&[("company_id", json!(1))]));
        store.seed("Contact", 11, fields(&[("company_id", json!(1))]));
        store.seed("Ticket", 20, fields(&[("company_id", json!(1))]));
        store.seed("Tag", 30, fields(&[("company_id", json!(1))]));

        let engine = LoadingEngine::new(graph, store.clone());
        (store, engine)
    }

    #[tokio::test]
    async fn test_lightweight_profile_loads_eager_only() {
        let (_store, engine) = seeded_engine();
        let options = LoadOptions::new().with_profile(LoadProfile::Lightweight);

        let loaded = engine.load("Company", 1, &options).await.unwrap();

        assert_eq!(loaded.related.len(), 1);
        assert_eq!(loaded.related["contacts"].len(), 2);
    }

    #[tokio::test]
    async fn test_balanced_profile_includes_prefetch() {
        let (_store, engine) = seeded_engine();

        let loaded = engine.load("Company", 1, &LoadOptions::new()).await.unwrap();

        assert!(loaded.related.contains_key("contacts"));
        assert!(loaded.related.contains_key("tags"));
        assert!(!loaded.related.contains_key("tickets"));
    }

    #[tokio::test]
    async fn test_comprehensive_profile_loads_everything() {
        let (_store, engine) = seeded_engine();
        let options = LoadOptions::new().with_profile(LoadProfile::Comprehensive);

        let loaded = engine.load("Company", 1, &options).await.unwrap();

        assert_eq!(loaded.related.len(), 3);
        assert_eq!(loaded.related["tickets"].len(), 1);
    }

    #[tokio::test]
    async fn test_custom_profile_selects_by_name() {
        let (_store, engine) = seeded_engine();
        let options = LoadOptions::new()
            .with_profile(LoadProfile::Custom(vec!["tickets".to_string()]));

        let loaded = engine.load("Company", 1, &options).await.unwrap();

        assert_eq!(loaded.related.len(), 1);
        assert!(loaded.related.contains_key("tickets"));
    }

    #[tokio::test]
    async fn test_parent_loaded_through_inverse_name() {
        let (_store, engine) = seeded_engine();
        let options = LoadOptions::new().with_profile(LoadProfile::Comprehensive);

        let loaded = engine.load("Contact", 10, &options).await.unwrap();

        let parents = &loaded.related["company"];
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].id, 1);
    }

    #[tokio::test]
    async fn test_second_load_hits_cache() {
        let (store, engine) = seeded_engine();

        let first = engine.load("Company", 1, &LoadOptions::new()).await.unwrap();
        assert!(!first.from_cache);
        let reads_after_first = store.reads();

        let second = engine.load("Company", 1, &LoadOptions::new()).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.related, first.related);
        assert_eq!(store.reads(), reads_after_first);
        assert_eq!(engine.cache_stats().hits(), 1);
    }

    #[tokio::test]
    async fn test_bypass_cache_refetches() {
        let (store, engine) = seeded_engine();
        engine.load("Company", 1, &LoadOptions::new()).await.unwrap();
        let reads_before = store.reads();

        let options = LoadOptions::new().bypass_cache();
        let loaded = engine.load("Company", 1, &options).await.unwrap();

        assert!(!loaded.from_cache);
        assert!(store.reads() > reads_before);
    }

    #[tokio::test]
    async fn test_usage_counts_and_suggestions() {
        let (_store, engine) = seeded_engine();
        for _ in 0..50 {
            let options = LoadOptions::new().bypass_cache();
            engine.load("Company", 1, &options).await.unwrap();
        }

        assert_eq!(engine.usage_counts(), vec![("Company".to_string(), 50)]);
        let suggestions = engine.optimization_suggestions();
        assert!(suggestions.iter().any(|s| s.contains("batch loading")));
    }
}
