//! Relmesh engine - side-effecting operations over the relationship graph.
//!
//! Builds on `relmesh-core`'s immutable graph to provide cascading
//! create/update/delete, dependency-aware batch scheduling with bounded
//! concurrency, integrity checking with executable repair plans, and
//! profile-driven relationship loading. All entity data flows through the
//! [`EntityStore`] trait; the engine itself never talks to a network or a
//! database.
//!
//! Domain failures are values: top-level calls return result objects with
//! a `success` flag and an accumulated error list, never an `Err`.

pub mod batch;
pub mod cascade;
pub mod integrity;
pub mod loading;
pub mod memory;
pub mod result;
pub mod store;

pub use batch::{
    BatchAction, BatchOperation, BatchOptions, BatchResult, BatchScheduler, OpStatus,
    OperationOutcome,
};
pub use cascade::{CascadeEngine, CascadeOptions, CreateSpec, DeletePlan, NullifyStep};
pub use integrity::{
    BusinessRule, ConstraintViolation, IntegrityManager, IntegrityOptions, IntegrityReport,
    OrphanedRecord, ReferenceIssueKind, ReferentialIssue, RepairAction, RepairOptions,
    RepairOutcome, RepairPlan, RepairStep, ViolationKind,
};
pub use loading::{CacheConfig, CacheStats, LoadOptions, LoadProfile, LoadedEntity, LoadingEngine};
pub use memory::MemoryStore;
pub use result::{
    CascadeOperation, CascadeResult, ErrorCode, OperationError, Severity,
};
pub use store::{EntityStore, FieldMap, Record, RecordFilter, RecordId, StoreError};
