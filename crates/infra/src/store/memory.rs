//! In-memory stores for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use edumesh_core::{SyncJobId, TaskId, TenantId};
use edumesh_replication::{SyncJob, Task, TaskStatus};

use super::{StoreError, SyncAuditEntry, SyncAuditStore, SyncJobStore, TaskStore};

/// In-memory task queue.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Snapshot of every task, for assertions in tests.
    pub fn snapshot(&self) -> Vec<Task> {
        let tasks = self.tasks.read().unwrap();
        let mut all: Vec<_> = tasks.values().cloned().collect();
        all.sort_by_key(|t| t.created_at);
        all
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn enqueue(&self, task: Task) -> Result<TaskId, StoreError> {
        let mut tasks = self.tasks.write().unwrap();
        let id = task.id;
        tasks.insert(id, task);
        Ok(id)
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let tasks = self.tasks.read().unwrap();
        Ok(tasks.get(&id).cloned())
    }

    async fn update(&self, task: &Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().unwrap();
        if !tasks.contains_key(&task.id) {
            return Err(StoreError::TaskNotFound(task.id));
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Task>, StoreError> {
        let mut tasks = self.tasks.write().unwrap();

        let mut candidates: Vec<_> = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Queued && t.start_after <= now)
            .map(|t| (t.priority, t.start_after, t.id))
            .collect();
        // Highest priority first, earliest start_after breaking ties.
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        if let Some(&(_, _, id)) = candidates.first() {
            if let Some(task) = tasks.get_mut(&id) {
                task.status = TaskStatus::Running;
                task.attempt += 1;
                task.started_at = Some(now);
                return Ok(Some(task.clone()));
            }
        }
        Ok(None)
    }

    async fn requeue_running(&self) -> Result<u64, StoreError> {
        let mut tasks = self.tasks.write().unwrap();
        let mut requeued = 0;
        for task in tasks.values_mut() {
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Queued;
                task.started_at = None;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn count_by_status(&self, status: TaskStatus) -> Result<u64, StoreError> {
        let tasks = self.tasks.read().unwrap();
        Ok(tasks.values().filter(|t| t.status == status).count() as u64)
    }
}

/// In-memory sync journal.
#[derive(Debug, Default)]
pub struct InMemorySyncJobStore {
    jobs: RwLock<HashMap<SyncJobId, SyncJob>>,
}

impl InMemorySyncJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl SyncJobStore for InMemorySyncJobStore {
    async fn append(&self, job: SyncJob) -> Result<SyncJobId, StoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    async fn get(&self, id: SyncJobId) -> Result<Option<SyncJob>, StoreError> {
        let jobs = self.jobs.read().unwrap();
        Ok(jobs.get(&id).cloned())
    }

    async fn next_pending(&self, tenant: TenantId) -> Result<Option<SyncJob>, StoreError> {
        let jobs = self.jobs.read().unwrap();
        let oldest = jobs
            .values()
            .filter(|j| j.tenant == tenant && j.is_pending())
            .min_by_key(|j| (j.created_at, j.id));
        Ok(oldest.cloned())
    }

    async fn record_attempt(
        &self,
        id: SyncJobId,
        result: String,
        completed: bool,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&id).ok_or(StoreError::SyncJobNotFound(id))?;
        job.attempt += 1;
        job.result = Some(result);
        if completed {
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn complete_all(&self, tenant: TenantId, result: String) -> Result<u64, StoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let now = Utc::now();
        let mut closed = 0;
        for job in jobs.values_mut() {
            if job.tenant == tenant && job.is_pending() {
                job.completed_at = Some(now);
                job.result = Some(result.clone());
                closed += 1;
            }
        }
        Ok(closed)
    }

    async fn pending_count(&self, tenant: TenantId) -> Result<u64, StoreError> {
        let jobs = self.jobs.read().unwrap();
        Ok(jobs
            .values()
            .filter(|j| j.tenant == tenant && j.is_pending())
            .count() as u64)
    }
}

/// In-memory audit trail.
#[derive(Debug, Default)]
pub struct InMemorySyncAuditStore {
    entries: RwLock<Vec<SyncAuditEntry>>,
}

impl InMemorySyncAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl SyncAuditStore for InMemorySyncAuditStore {
    async fn record(&self, entry: SyncAuditEntry) -> Result<Uuid, StoreError> {
        let mut entries = self.entries.write().unwrap();
        let id = entry.id;
        entries.push(entry);
        Ok(id)
    }

    async fn list_for_job(&self, id: SyncJobId) -> Result<Vec<SyncAuditEntry>, StoreError> {
        let entries = self.entries.read().unwrap();
        let mut rows: Vec<_> = entries
            .iter()
            .filter(|e| e.sync_job_id == id)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.created_at);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use edumesh_replication::{SyncEnvelope, TaskKind};

    use super::*;

    fn censor_task(tenant: TenantId) -> Task {
        Task::new(TaskKind::Censor {
            tenant_id: tenant,
            locale: "en".into(),
            parent: "/chat-groups/demo".into(),
            content_id: edumesh_core::ContentId::new(),
        })
    }

    #[tokio::test]
    async fn claim_orders_by_priority_then_start_after() {
        let store = InMemoryTaskStore::new();
        let tenant = TenantId::new();

        let low = censor_task(tenant);
        let high = censor_task(tenant).with_priority(10);
        let low_id = low.id;
        let high_id = high.id;
        store.enqueue(low).await.unwrap();
        store.enqueue(high).await.unwrap();

        let first = store.claim_next(Utc::now()).await.unwrap().unwrap();
        assert_eq!(first.id, high_id);
        assert_eq!(first.status, TaskStatus::Running);
        assert_eq!(first.attempt, 1);

        let second = store.claim_next(Utc::now()).await.unwrap().unwrap();
        assert_eq!(second.id, low_id);

        assert!(store.claim_next(Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delayed_task_is_not_claimable_until_due() {
        let store = InMemoryTaskStore::new();
        let tenant = TenantId::new();
        let task = censor_task(tenant).delayed(chrono::Duration::minutes(5));
        store.enqueue(task).await.unwrap();

        assert!(store.claim_next(Utc::now()).await.unwrap().is_none());
        let later = Utc::now() + chrono::Duration::minutes(6);
        assert!(store.claim_next(later).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn requeue_running_resets_orphans() {
        let store = InMemoryTaskStore::new();
        let tenant = TenantId::new();
        store.enqueue(censor_task(tenant)).await.unwrap();
        store.claim_next(Utc::now()).await.unwrap().unwrap();

        assert_eq!(store.requeue_running().await.unwrap(), 1);
        assert_eq!(store.count_by_status(TaskStatus::Queued).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn journal_is_fifo_per_tenant() {
        let store = InMemorySyncJobStore::new();
        let tenant = TenantId::new();
        let other = TenantId::new();

        let first = SyncJob::new(tenant, None, SyncEnvelope::default());
        let first_id = first.id;
        store.append(first).await.unwrap();
        let second = SyncJob::new(tenant, None, SyncEnvelope::default());
        store.append(second).await.unwrap();
        store
            .append(SyncJob::new(other, None, SyncEnvelope::default()))
            .await
            .unwrap();

        let head = store.next_pending(tenant).await.unwrap().unwrap();
        assert_eq!(head.id, first_id);

        // A failed attempt leaves the same job at the head.
        store
            .record_attempt(first_id, "error: unreachable".into(), false)
            .await
            .unwrap();
        let head = store.next_pending(tenant).await.unwrap().unwrap();
        assert_eq!(head.id, first_id);
        assert_eq!(head.attempt, 1);

        store
            .record_attempt(first_id, "{\"code\":\"COMPLETED\"}".into(), true)
            .await
            .unwrap();
        let head = store.next_pending(tenant).await.unwrap().unwrap();
        assert_ne!(head.id, first_id);
        assert_eq!(store.pending_count(other).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn complete_all_drains_the_backlog() {
        let store = InMemorySyncJobStore::new();
        let tenant = TenantId::new();
        for _ in 0..3 {
            store
                .append(SyncJob::new(tenant, None, SyncEnvelope::default()))
                .await
                .unwrap();
        }

        let closed = store
            .complete_all(tenant, "reseeded".into())
            .await
            .unwrap();
        assert_eq!(closed, 3);
        assert!(store.next_pending(tenant).await.unwrap().is_none());
    }
}
