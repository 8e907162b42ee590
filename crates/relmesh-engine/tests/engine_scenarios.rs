//! End-to-end scenarios over cascade, batch, integrity, and loading.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use relmesh_core::{CascadeAction, RelationCatalog, RelationDef, RelationshipGraph};
use relmesh_engine::{
    BatchOperation, BatchOptions, BatchScheduler, CascadeEngine, CascadeOptions, CreateSpec,
    EntityStore, ErrorCode, FieldMap, IntegrityManager, IntegrityOptions, LoadOptions,
    LoadingEngine, MemoryStore, OpStatus, Record, RecordFilter, RecordId, RepairOptions,
    Severity, StoreError,
};

fn fields(pairs: &[(&str, serde_json::Value)]) -> FieldMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Company -> Contacts (set null on delete, cascade on create) and
/// Company -> Tickets (restrict on delete).
fn crm_graph() -> Arc<RelationshipGraph> {
    let catalog = RelationCatalog::new(vec![
        RelationDef::one_to_many(
            "company_contacts",
            "Contacts",
            "Company",
            "Contact",
            "company_id",
        )
        .with_on_create(CascadeAction::Cascade)
        .with_on_delete(CascadeAction::SetNull),
        RelationDef::one_to_many(
            "company_tickets",
            "Tickets",
            "Company",
            "Ticket",
            "company_id",
        )
        .with_on_delete(CascadeAction::Restrict),
    ])
    .unwrap();
    Arc::new(RelationshipGraph::build(&catalog))
}

#[tokio::test]
async fn deleting_company_with_ticket_is_restricted() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    store.seed("Company", 42, fields(&[("name", json!("Acme"))]));
    store.seed("Ticket", 1, fields(&[("company_id", json!(42))]));
    let engine = CascadeEngine::new(crm_graph(), store.clone());

    let result = engine
        .cascade_delete("Company", 42, &CascadeOptions::default())
        .await;

    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    let error = &result.errors[0];
    assert_eq!(error.code, ErrorCode::RestrictViolation);
    assert_eq!(error.severity, Severity::Critical);
    assert_eq!(error.record_id, Some(42));
    assert_eq!(store.count("Company"), 1);

    // force bypasses the restriction.
    let forced = engine
        .cascade_delete("Company", 42, &CascadeOptions::new().force())
        .await;
    assert!(forced.success);
    assert_eq!(store.count("Company"), 0);
}

#[tokio::test]
async fn cascade_create_stamps_the_new_parent_id() {
    let store = Arc::new(MemoryStore::new());
    let engine = CascadeEngine::new(crm_graph(), store.clone());

    let spec = CreateSpec::new(fields(&[("name", json!("Acme"))])).with_related(
        "Contact",
        vec![CreateSpec::new(fields(&[("name", json!("Bob"))]))],
    );
    let result = engine
        .cascade_create("Company", spec, &CascadeOptions::default())
        .await;

    assert!(result.success);
    let company_id = result.record_id.expect("company created");
    assert_eq!(result.affected["Contact"].len(), 1);

    let contact_id = result.affected["Contact"][0];
    let contact = store.get("Contact", contact_id).await.unwrap();
    assert_eq!(contact.field_id("company_id"), Some(company_id));
    assert_eq!(contact.field("name"), Some(&json!("Bob")));
}

#[tokio::test]
async fn cyclic_batch_fails_before_any_store_call() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = BatchScheduler::new(crm_graph(), store.clone());

    // Creating the parent while deleting a child contradicts the
    // hierarchy ordering, so the inferred edges cycle.
    let ops = vec![
        BatchOperation::delete("del-contact", "Contact", vec![1]),
        BatchOperation::create("new-company", "Company", FieldMap::new()),
        BatchOperation::create("new-contact", "Contact", FieldMap::new()),
    ];
    let result = scheduler.process_batch(ops, &BatchOptions::default()).await;

    assert!(!result.success);
    let error = result
        .errors
        .iter()
        .find(|e| e.code == ErrorCode::CyclicDependency)
        .expect("cycle reported");
    let cyclic = error.detail.as_ref().unwrap()["operations"].clone();
    assert_eq!(cyclic, json!(["del-contact", "new-company"]));
    assert_eq!(store.calls(), 0);
    assert!(result
        .outcomes
        .values()
        .all(|o| o.status == OpStatus::Skipped));
}

/// Store wrapper that tracks how many calls are in flight at once.
struct GaugeStore {
    inner: MemoryStore,
    current: AtomicU64,
    peak: AtomicU64,
}

impl GaugeStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            current: AtomicU64::new(0),
            peak: AtomicU64::new(0),
        }
    }

    fn peak(&self) -> u64 {
        self.peak.load(Ordering::SeqCst)
    }

    async fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(15)).await;
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl EntityStore for GaugeStore {
    async fn get(&self, entity: &str, id: RecordId) -> Result<Record, StoreError> {
        self.inner.get(entity, id).await
    }

    async fn create(&self, entity: &str, data: FieldMap) -> Result<Record, StoreError> {
        self.enter().await;
        let result = self.inner.create(entity, data).await;
        self.exit();
        result
    }

    async fn update(
        &self,
        entity: &str,
        id: RecordId,
        data: FieldMap,
    ) -> Result<Record, StoreError> {
        self.inner.update(entity, id, data).await
    }

    async fn delete(&self, entity: &str, id: RecordId) -> Result<(), StoreError> {
        self.inner.delete(entity, id).await
    }

    async fn query(
        &self,
        entity: &str,
        filter: &RecordFilter,
    ) -> Result<Vec<RecordId>, StoreError> {
        self.inner.query(entity, filter).await
    }
}

#[tokio::test]
async fn bounded_concurrency_never_exceeds_the_limit() {
    let store = Arc::new(GaugeStore::new());
    let scheduler = BatchScheduler::new(crm_graph(), store.clone());

    let ops: Vec<BatchOperation> = (0..5)
        .map(|i| BatchOperation::create(format!("op-{i}"), "Company", FieldMap::new()))
        .collect();
    let options = BatchOptions::new().with_max_concurrency(2);
    let result = scheduler.process_batch(ops, &options).await;

    assert!(result.success);
    assert_eq!(result.levels.len(), 1);
    assert!(
        store.peak() <= 2,
        "peak concurrency was {}",
        store.peak()
    );
}

#[tokio::test]
async fn batch_timeout_reports_and_skips() {
    let store = Arc::new(GaugeStore::new());
    let scheduler = BatchScheduler::new(crm_graph(), store.clone());

    let ops: Vec<BatchOperation> = (0..5)
        .map(|i| BatchOperation::create(format!("op-{i}"), "Company", FieldMap::new()))
        .collect();
    let options = BatchOptions::new()
        .with_max_concurrency(1)
        .with_timeout(Duration::from_millis(5));
    let result = scheduler.process_batch(ops, &options).await;

    assert!(!result.success);
    assert!(result
        .errors
        .iter()
        .any(|e| e.code == ErrorCode::OperationTimeout));
    // Whatever had not settled when the deadline hit is skipped.
    assert!(result
        .outcomes
        .values()
        .all(|o| o.status != OpStatus::InProgress && o.status != OpStatus::Pending));
}

#[tokio::test]
async fn dependent_levels_execute_in_order() {
    let store = Arc::new(MemoryStore::new());
    store.seed("Company", 1, FieldMap::new());
    store.seed("Contact", 2, fields(&[("company_id", json!(1))]));
    let scheduler = BatchScheduler::new(crm_graph(), store.clone());

    let ops = vec![
        BatchOperation::update("upd-contact", "Contact", vec![2], fields(&[("vip", json!(true))])),
        BatchOperation::update("upd-company", "Company", vec![1], fields(&[("tier", json!("a"))])),
    ];
    let result = scheduler.process_batch(ops, &BatchOptions::default()).await;

    assert!(result.success);
    assert_eq!(result.levels[0], vec!["upd-company".to_string()]);
    assert_eq!(result.levels[1], vec!["upd-contact".to_string()]);
    let contact = store.get("Contact", 2).await.unwrap();
    assert_eq!(contact.field("vip"), Some(&json!(true)));
}

#[tokio::test]
async fn integrity_check_and_repair_round_trip() {
    let store = Arc::new(MemoryStore::new());
    store.seed("Company", 1, fields(&[("name", json!("Acme"))]));
    store.seed("Contact", 10, fields(&[("company_id", json!(1))]));
    store.seed("Contact", 11, fields(&[("company_id", json!(404))]));
    let manager = IntegrityManager::new(crm_graph(), store.clone());

    let report = manager.perform_check(&IntegrityOptions::new()).await;
    assert_eq!(report.orphans.len(), 1);
    assert_eq!(report.orphans[0].record_id, 11);

    let plan = manager.build_repair_plan(&report);
    assert!(!plan.is_empty());

    // The contacts relation is set-null on delete, so the orphan gets its
    // reference cleared rather than being deleted.
    let outcome = manager
        .execute_repair_plan(plan.id, &RepairOptions::new().with_backup())
        .await;
    assert!(outcome.success);
    assert!(!outcome.backups.is_empty());

    let repaired = store.get("Contact", 11).await.unwrap();
    assert_eq!(repaired.field("company_id"), Some(&serde_json::Value::Null));

    let after = manager.perform_check(&IntegrityOptions::new()).await;
    assert!(after.is_clean());
}

#[tokio::test]
async fn loading_profiles_and_cache_work_together() {
    let store = Arc::new(MemoryStore::new());
    store.seed("Company", 1, fields(&[("name", json!("Acme"))]));
    store.seed("Contact", 10, fields(&[("company_id", json!(1))]));
    store.seed("Ticket", 20, fields(&[("company_id", json!(1))]));

    let catalog = RelationCatalog::new(vec![
        RelationDef::one_to_many("company_contacts", "Contacts", "Company", "Contact", "company_id")
            .with_load_strategy(relmesh_core::LoadStrategy::Eager),
        RelationDef::one_to_many("company_tickets", "Tickets", "Company", "Ticket", "company_id")
            .with_load_strategy(relmesh_core::LoadStrategy::OnDemand),
    ])
    .unwrap();
    let graph = Arc::new(RelationshipGraph::build(&catalog));
    let engine = LoadingEngine::new(graph, store.clone());

    let first = engine.load("Company", 1, &LoadOptions::new()).await.unwrap();
    assert!(!first.from_cache);
    assert!(first.related.contains_key("Contacts"));
    assert!(!first.related.contains_key("Tickets"));

    let second = engine.load("Company", 1, &LoadOptions::new()).await.unwrap();
    assert!(second.from_cache);
    assert!(engine.cache_stats().hit_rate() > 0.0);
}
