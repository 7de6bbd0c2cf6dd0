//! Persistence and integration adapters for the replication engine.
//!
//! Every collaborator the engine talks to lives behind a trait defined
//! here, with an in-memory implementation used by tests and a Postgres
//! or Redis implementation used in deployments.

pub mod documents;
pub mod notifier;
pub mod storage;
pub mod store;
pub mod tenants;
pub mod wake;

pub use documents::{BulkApplyResult, DocumentStore, ExportScope, InMemoryDocumentStore};
pub use notifier::{Notification, Notifier, NotifyError, RecordingNotifier};
pub use storage::{InMemoryStorage, ObjectStorage, StorageError, parse_object_url};
pub use store::{
    InMemorySyncAuditStore, InMemorySyncJobStore, InMemoryTaskStore, PostgresStores,
    PostgresSyncAuditStore, PostgresSyncJobStore, PostgresTaskStore, StoreError, SyncAuditEntry,
    SyncAuditStore, SyncJobStore, TaskStore,
};
pub use tenants::{InMemoryTenantStore, SatelliteStatus, SeedingRecord, TenantRecord, TenantStore};
pub use wake::{InProcessWake, RedisWake, WakeChannel, WakeError, WakeSignal};
