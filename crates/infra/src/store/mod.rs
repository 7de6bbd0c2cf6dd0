//! Durable queues for background tasks, sync journal entries, and the
//! hub-side sync audit trail.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use edumesh_core::{SyncJobId, TaskId, TenantId};
use edumesh_replication::{SyncJob, Task, TaskStatus};

pub use memory::{InMemorySyncAuditStore, InMemorySyncJobStore, InMemoryTaskStore};
pub use postgres::{PostgresStores, PostgresSyncAuditStore, PostgresSyncJobStore, PostgresTaskStore};

/// Store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    #[error("sync job not found: {0}")]
    SyncJobNotFound(SyncJobId),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Storage(err.to_string())
    }
}

/// Task queue abstraction.
///
/// `claim_next` is the only contended operation: it must atomically flip
/// the selected row from `QUEUED` to `RUNNING` and bump its attempt
/// counter, so two runners can never hold the same task.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Enqueue a new task.
    async fn enqueue(&self, task: Task) -> Result<TaskId, StoreError>;

    /// Get a task by ID.
    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Persist the full state of a task the runner already holds.
    async fn update(&self, task: &Task) -> Result<(), StoreError>;

    /// Atomically claim the highest-priority ready task.
    ///
    /// Candidates are `QUEUED` tasks with `start_after <= now`, ordered
    /// by priority descending, then `start_after` ascending. The claimed
    /// task comes back already marked `RUNNING` with `attempt`
    /// incremented and `started_at` set.
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Task>, StoreError>;

    /// Requeue every `RUNNING` task. Called once at startup so tasks
    /// orphaned by a crash get re-executed.
    async fn requeue_running(&self) -> Result<u64, StoreError>;

    /// Count tasks in a given status.
    async fn count_by_status(&self, status: TaskStatus) -> Result<u64, StoreError>;
}

/// Per-tenant sync journal.
///
/// Jobs for one tenant form a strict FIFO: only the oldest incomplete
/// job is ever eligible for delivery.
#[async_trait]
pub trait SyncJobStore: Send + Sync {
    /// Append a job to the tail of a tenant's journal.
    async fn append(&self, job: SyncJob) -> Result<SyncJobId, StoreError>;

    /// Get a job by ID.
    async fn get(&self, id: SyncJobId) -> Result<Option<SyncJob>, StoreError>;

    /// The oldest incomplete job for a tenant, if any.
    async fn next_pending(&self, tenant: TenantId) -> Result<Option<SyncJob>, StoreError>;

    /// Record a delivery attempt: bump `attempt`, store the result, and
    /// stamp `completed_at` when the delivery succeeded.
    async fn record_attempt(
        &self,
        id: SyncJobId,
        result: String,
        completed: bool,
    ) -> Result<(), StoreError>;

    /// Mark every incomplete job for a tenant as completed with the
    /// given result. Used when a satellite is reseeded and its backlog
    /// becomes obsolete.
    async fn complete_all(&self, tenant: TenantId, result: String) -> Result<u64, StoreError>;

    /// Count incomplete jobs for a tenant.
    async fn pending_count(&self, tenant: TenantId) -> Result<u64, StoreError>;
}

/// One row of the hub-side audit trail: what a satellite pushed and how
/// the hub resolved it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SyncAuditEntry {
    pub id: Uuid,
    pub sync_job_id: SyncJobId,
    pub tenant_id: TenantId,
    pub attempt: u32,
    pub payload: Value,
    pub result: Value,
    pub has_error: bool,
    pub created_at: DateTime<Utc>,
}

impl SyncAuditEntry {
    pub fn new(
        sync_job_id: SyncJobId,
        tenant_id: TenantId,
        attempt: u32,
        payload: Value,
        result: Value,
        has_error: bool,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            sync_job_id,
            tenant_id,
            attempt,
            payload,
            result,
            has_error,
            created_at: Utc::now(),
        }
    }
}

/// Append-only audit log for inbound satellite pushes.
#[async_trait]
pub trait SyncAuditStore: Send + Sync {
    /// Record an entry and return its ID, echoed back to the satellite.
    async fn record(&self, entry: SyncAuditEntry) -> Result<Uuid, StoreError>;

    /// List entries for a sync job, oldest first.
    async fn list_for_job(&self, id: SyncJobId) -> Result<Vec<SyncAuditEntry>, StoreError>;
}
