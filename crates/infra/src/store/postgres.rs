//! Postgres-backed task queue, sync journal, and audit trail.
//!
//! Tasks are claimed with `FOR UPDATE SKIP LOCKED`, so the flip from
//! `QUEUED` to `RUNNING` and the attempt bump happen in one statement
//! and two runners can never claim the same row.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool, Row};
use uuid::Uuid;

use edumesh_core::{SyncJobId, TaskId, TenantId};
use edumesh_replication::{NotifyPayload, SyncEnvelope, SyncJob, Task, TaskKind, TaskStatus};

use super::{StoreError, SyncAuditEntry, SyncAuditStore, SyncJobStore, TaskStore};

/// Connection pool plus schema management for all three stores.
#[derive(Debug, Clone)]
pub struct PostgresStores {
    pool: Arc<PgPool>,
}

impl PostgresStores {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Create the tables and indexes if they do not exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id UUID PRIMARY KEY,
                status TEXT NOT NULL,
                kind JSONB NOT NULL,
                owners JSONB NOT NULL DEFAULT '[]',
                priority INT NOT NULL DEFAULT 0,
                start_after TIMESTAMPTZ NOT NULL,
                attempt INT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL,
                started_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                progress SMALLINT NOT NULL DEFAULT 0,
                result TEXT
            )
            "#,
        )
        .execute(&*self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS tasks_ready_idx
            ON tasks (priority DESC, start_after ASC)
            WHERE status = 'QUEUED'
            "#,
        )
        .execute(&*self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_jobs (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL,
                notify JSONB,
                sync JSONB NOT NULL,
                attempt INT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL,
                completed_at TIMESTAMPTZ,
                result TEXT
            )
            "#,
        )
        .execute(&*self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS sync_jobs_pending_idx
            ON sync_jobs (tenant_id, created_at ASC)
            WHERE completed_at IS NULL
            "#,
        )
        .execute(&*self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_audits (
                id UUID PRIMARY KEY,
                sync_job_id UUID NOT NULL,
                tenant_id UUID NOT NULL,
                attempt INT NOT NULL,
                payload JSONB NOT NULL,
                result JSONB NOT NULL,
                has_error BOOLEAN NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    pub fn tasks(&self) -> PostgresTaskStore {
        PostgresTaskStore { pool: Arc::clone(&self.pool) }
    }

    pub fn sync_jobs(&self) -> PostgresSyncJobStore {
        PostgresSyncJobStore { pool: Arc::clone(&self.pool) }
    }

    pub fn audits(&self) -> PostgresSyncAuditStore {
        PostgresSyncAuditStore { pool: Arc::clone(&self.pool) }
    }
}

/// Postgres task queue.
#[derive(Debug, Clone)]
pub struct PostgresTaskStore {
    pool: Arc<PgPool>,
}

const TASK_COLUMNS: &str = "id, status, kind, owners, priority, start_after, attempt, \
                            created_at, started_at, completed_at, progress, result";

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn enqueue(&self, task: Task) -> Result<TaskId, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, status, kind, owners, priority, start_after, attempt,
                               created_at, started_at, completed_at, progress, result)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(task.id.as_uuid())
        .bind(status_str(task.status))
        .bind(kind_json(&task.kind)?)
        .bind(owners_json(&task)?)
        .bind(task.priority)
        .bind(task.start_after)
        .bind(task.attempt as i32)
        .bind(task.created_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(task.progress as i16)
        .bind(&task.result)
        .execute(&*self.pool)
        .await?;
        Ok(task.id)
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await?;
        row.map(|r| task_from_row(&r)).transpose()
    }

    async fn update(&self, task: &Task) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $2, kind = $3, owners = $4, priority = $5, start_after = $6,
                attempt = $7, started_at = $8, completed_at = $9, progress = $10, result = $11
            WHERE id = $1
            "#,
        )
        .bind(task.id.as_uuid())
        .bind(status_str(task.status))
        .bind(kind_json(&task.kind)?)
        .bind(owners_json(task)?)
        .bind(task.priority)
        .bind(task.start_after)
        .bind(task.attempt as i32)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(task.progress as i16)
        .bind(&task.result)
        .execute(&*self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound(task.id));
        }
        Ok(())
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE tasks
            SET status = 'RUNNING', attempt = attempt + 1, started_at = $1
            WHERE id = (
                SELECT id FROM tasks
                WHERE status = 'QUEUED' AND start_after <= $1
                ORDER BY priority DESC, start_after ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(now)
        .fetch_optional(&*self.pool)
        .await?;
        row.map(|r| task_from_row(&r)).transpose()
    }

    async fn requeue_running(&self) -> Result<u64, StoreError> {
        let updated = sqlx::query(
            "UPDATE tasks SET status = 'QUEUED', started_at = NULL WHERE status = 'RUNNING'",
        )
        .execute(&*self.pool)
        .await?;
        Ok(updated.rows_affected())
    }

    async fn count_by_status(&self, status: TaskStatus) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM tasks WHERE status = $1")
            .bind(status_str(status))
            .fetch_one(&*self.pool)
            .await?;
        let total: i64 = row.try_get("total").map_err(StoreError::from)?;
        Ok(total as u64)
    }
}

/// Postgres sync journal.
#[derive(Debug, Clone)]
pub struct PostgresSyncJobStore {
    pool: Arc<PgPool>,
}

const SYNC_JOB_COLUMNS: &str =
    "id, tenant_id, notify, sync, attempt, created_at, completed_at, result";

#[async_trait]
impl SyncJobStore for PostgresSyncJobStore {
    async fn append(&self, job: SyncJob) -> Result<SyncJobId, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_jobs (id, tenant_id, notify, sync, attempt, created_at,
                                   completed_at, result)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.tenant.as_uuid())
        .bind(to_json(&job.notify)?)
        .bind(to_json(&job.sync)?)
        .bind(job.attempt as i32)
        .bind(job.created_at)
        .bind(job.completed_at)
        .bind(&job.result)
        .execute(&*self.pool)
        .await?;
        Ok(job.id)
    }

    async fn get(&self, id: SyncJobId) -> Result<Option<SyncJob>, StoreError> {
        let row = sqlx::query(&format!("SELECT {SYNC_JOB_COLUMNS} FROM sync_jobs WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await?;
        row.map(|r| sync_job_from_row(&r)).transpose()
    }

    async fn next_pending(&self, tenant: TenantId) -> Result<Option<SyncJob>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {SYNC_JOB_COLUMNS} FROM sync_jobs
            WHERE tenant_id = $1 AND completed_at IS NULL
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            "#
        ))
        .bind(tenant.as_uuid())
        .fetch_optional(&*self.pool)
        .await?;
        row.map(|r| sync_job_from_row(&r)).transpose()
    }

    async fn record_attempt(
        &self,
        id: SyncJobId,
        result: String,
        completed: bool,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET attempt = attempt + 1,
                result = $2,
                completed_at = CASE WHEN $3 THEN NOW() ELSE completed_at END
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(result)
        .bind(completed)
        .execute(&*self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::SyncJobNotFound(id));
        }
        Ok(())
    }

    async fn complete_all(&self, tenant: TenantId, result: String) -> Result<u64, StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET completed_at = NOW(), result = $2
            WHERE tenant_id = $1 AND completed_at IS NULL
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(result)
        .execute(&*self.pool)
        .await?;
        Ok(updated.rows_affected())
    }

    async fn pending_count(&self, tenant: TenantId) -> Result<u64, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total FROM sync_jobs WHERE tenant_id = $1 AND completed_at IS NULL",
        )
        .bind(tenant.as_uuid())
        .fetch_one(&*self.pool)
        .await?;
        let total: i64 = row.try_get("total").map_err(StoreError::from)?;
        Ok(total as u64)
    }
}

/// Postgres audit trail.
#[derive(Debug, Clone)]
pub struct PostgresSyncAuditStore {
    pool: Arc<PgPool>,
}

#[async_trait]
impl SyncAuditStore for PostgresSyncAuditStore {
    async fn record(&self, entry: SyncAuditEntry) -> Result<Uuid, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_audits (id, sync_job_id, tenant_id, attempt, payload, result,
                                     has_error, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(entry.sync_job_id.as_uuid())
        .bind(entry.tenant_id.as_uuid())
        .bind(entry.attempt as i32)
        .bind(&entry.payload)
        .bind(&entry.result)
        .bind(entry.has_error)
        .bind(entry.created_at)
        .execute(&*self.pool)
        .await?;
        Ok(entry.id)
    }

    async fn list_for_job(&self, id: SyncJobId) -> Result<Vec<SyncAuditEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, sync_job_id, tenant_id, attempt, payload, result, has_error, created_at
            FROM sync_audits
            WHERE sync_job_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&*self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let audit = AuditRow::from_row(&row).map_err(StoreError::from)?;
            entries.push(audit.into());
        }
        Ok(entries)
    }
}

fn status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Queued => "QUEUED",
        TaskStatus::Running => "RUNNING",
        TaskStatus::Completed => "COMPLETED",
        TaskStatus::Error => "ERROR",
        TaskStatus::Timeout => "TIMEOUT",
        TaskStatus::Ignore => "IGNORE",
    }
}

fn status_from_str(s: &str) -> Result<TaskStatus, StoreError> {
    match s {
        "QUEUED" => Ok(TaskStatus::Queued),
        "RUNNING" => Ok(TaskStatus::Running),
        "COMPLETED" => Ok(TaskStatus::Completed),
        "ERROR" => Ok(TaskStatus::Error),
        "TIMEOUT" => Ok(TaskStatus::Timeout),
        "IGNORE" => Ok(TaskStatus::Ignore),
        other => Err(StoreError::Storage(format!("unknown task status: {other}"))),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Storage(e.to_string()))
}

fn kind_json(kind: &TaskKind) -> Result<Value, StoreError> {
    to_json(kind)
}

fn owners_json(task: &Task) -> Result<Value, StoreError> {
    to_json(&task.owners)
}

fn task_from_row(row: &sqlx::postgres::PgRow) -> Result<Task, StoreError> {
    let id: Uuid = row.try_get("id").map_err(StoreError::from)?;
    let status: String = row.try_get("status").map_err(StoreError::from)?;
    let kind: Value = row.try_get("kind").map_err(StoreError::from)?;
    let owners: Value = row.try_get("owners").map_err(StoreError::from)?;
    let attempt: i32 = row.try_get("attempt").map_err(StoreError::from)?;
    let progress: i16 = row.try_get("progress").map_err(StoreError::from)?;
    Ok(Task {
        id: TaskId::from_uuid(id),
        status: status_from_str(&status)?,
        kind: serde_json::from_value(kind).map_err(|e| StoreError::Storage(e.to_string()))?,
        owners: serde_json::from_value(owners).map_err(|e| StoreError::Storage(e.to_string()))?,
        priority: row.try_get("priority").map_err(StoreError::from)?,
        start_after: row.try_get("start_after").map_err(StoreError::from)?,
        attempt: attempt as u32,
        created_at: row.try_get("created_at").map_err(StoreError::from)?,
        started_at: row.try_get("started_at").map_err(StoreError::from)?,
        completed_at: row.try_get("completed_at").map_err(StoreError::from)?,
        progress: progress as u8,
        result: row.try_get("result").map_err(StoreError::from)?,
    })
}

fn sync_job_from_row(row: &sqlx::postgres::PgRow) -> Result<SyncJob, StoreError> {
    let id: Uuid = row.try_get("id").map_err(StoreError::from)?;
    let tenant: Uuid = row.try_get("tenant_id").map_err(StoreError::from)?;
    let notify: Option<Value> = row.try_get("notify").map_err(StoreError::from)?;
    let sync: Value = row.try_get("sync").map_err(StoreError::from)?;
    let attempt: i32 = row.try_get("attempt").map_err(StoreError::from)?;
    let notify: Option<NotifyPayload> = notify
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| StoreError::Storage(e.to_string()))?;
    let sync: SyncEnvelope =
        serde_json::from_value(sync).map_err(|e| StoreError::Storage(e.to_string()))?;
    Ok(SyncJob {
        id: SyncJobId::from_uuid(id),
        tenant: TenantId::from_uuid(tenant),
        notify,
        sync,
        attempt: attempt as u32,
        created_at: row.try_get("created_at").map_err(StoreError::from)?,
        completed_at: row.try_get("completed_at").map_err(StoreError::from)?,
        result: row.try_get("result").map_err(StoreError::from)?,
    })
}

#[derive(Debug)]
struct AuditRow {
    id: Uuid,
    sync_job_id: Uuid,
    tenant_id: Uuid,
    attempt: i32,
    payload: Value,
    result: Value,
    has_error: bool,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for AuditRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(AuditRow {
            id: row.try_get("id")?,
            sync_job_id: row.try_get("sync_job_id")?,
            tenant_id: row.try_get("tenant_id")?,
            attempt: row.try_get("attempt")?,
            payload: row.try_get("payload")?,
            result: row.try_get("result")?,
            has_error: row.try_get("has_error")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl From<AuditRow> for SyncAuditEntry {
    fn from(row: AuditRow) -> Self {
        SyncAuditEntry {
            id: row.id,
            sync_job_id: SyncJobId::from_uuid(row.sync_job_id),
            tenant_id: TenantId::from_uuid(row.tenant_id),
            attempt: row.attempt as u32,
            payload: row.payload,
            result: row.result,
            has_error: row.has_error,
            created_at: row.created_at,
        }
    }
}
