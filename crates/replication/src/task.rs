//! Background task model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use edumesh_core::{ContentId, TaskId, TenantId, UserId};

/// Task execution status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting to be claimed.
    Queued,
    /// Claimed by the runner. At most one task per process holds this.
    Running,
    /// Finished successfully.
    Completed,
    /// Handler failed; terminal, not retried.
    Error,
    /// Deadline exceeded on the final attempt; terminal.
    Timeout,
    /// Skipped: the task's kind does not execute in this deployment mode.
    Ignore,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Error | TaskStatus::Timeout | TaskStatus::Ignore
        )
    }
}

/// What a task does, as a closed union so runner dispatch is exhaustive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "camelCase")]
pub enum TaskKind {
    /// Scan one content blob for banned words and fan out moderation.
    #[serde(rename_all = "camelCase")]
    Censor {
        tenant_id: TenantId,
        locale: String,
        /// Path of the parent document, e.g. `/chat-groups/<id>`.
        parent: String,
        content_id: ContentId,
    },
    /// Auto-grade one assignment. Hub-side only.
    #[serde(rename_all = "camelCase")]
    Grade {
        tenant_id: TenantId,
        assignment_id: Uuid,
    },
    /// Generate one report file. Hub-side only.
    #[serde(rename_all = "camelCase")]
    Report {
        tenant_id: TenantId,
        file: String,
        /// Handler-specific argument blob (JSON text).
        arg: String,
    },
    /// Delete one object from object storage.
    #[serde(rename_all = "camelCase")]
    RemoveObject { url: String },
}

impl TaskKind {
    /// Tenant whose satellite should mirror this task's state changes.
    pub fn tenant_id(&self) -> Option<TenantId> {
        match self {
            TaskKind::Grade { tenant_id, .. } | TaskKind::Report { tenant_id, .. } => {
                Some(*tenant_id)
            }
            TaskKind::Censor { .. } | TaskKind::RemoveObject { .. } => None,
        }
    }

    /// Kinds that may only execute on the hub.
    pub fn hub_only(&self) -> bool {
        matches!(self, TaskKind::Grade { .. } | TaskKind::Report { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Censor { .. } => "censor",
            TaskKind::Grade { .. } => "grade",
            TaskKind::Report { .. } => "report",
            TaskKind::RemoveObject { .. } => "removeObject",
        }
    }
}

/// A persisted unit of deferred work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    #[serde(flatten)]
    pub kind: TaskKind,
    /// Users notified on completion (may be empty).
    pub owners: Vec<UserId>,
    /// Higher runs first.
    pub priority: i32,
    /// Earliest eligible execution time (delayed scheduling / retry backoff).
    pub start_after: DateTime<Utc>,
    /// Incremented atomically on every claim.
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// 0..=100.
    pub progress: u8,
    pub result: Option<String>,
}

impl Task {
    pub fn new(kind: TaskKind) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            status: TaskStatus::Queued,
            kind,
            owners: Vec::new(),
            priority: 0,
            start_after: now,
            attempt: 0,
            created_at: now,
            started_at: None,
            completed_at: None,
            progress: 0,
            result: None,
        }
    }

    pub fn with_owners(mut self, owners: Vec<UserId>) -> Self {
        self.owners = owners;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.start_after = Utc::now() + delay;
        self
    }

    /// Eligible to be claimed right now.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Queued && self.start_after <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_and_report_are_hub_only() {
        let grade = TaskKind::Grade {
            tenant_id: TenantId::new(),
            assignment_id: Uuid::now_v7(),
        };
        let remove = TaskKind::RemoveObject { url: "/pub/x".into() };
        assert!(grade.hub_only());
        assert!(!remove.hub_only());
        assert!(grade.tenant_id().is_some());
        assert!(remove.tenant_id().is_none());
    }

    #[test]
    fn delayed_task_is_not_ready() {
        let task = Task::new(TaskKind::RemoveObject { url: "/pub/x".into() })
            .delayed(Duration::seconds(60));
        assert!(!task.is_ready(Utc::now()));
        assert!(task.is_ready(Utc::now() + Duration::seconds(61)));
    }

    #[test]
    fn kind_serializes_with_task_tag() {
        let task = Task::new(TaskKind::RemoveObject { url: "/pub/seed.json".into() });
        let v = serde_json::to_value(&task).unwrap();
        assert_eq!(v["task"], "removeObject");
        assert_eq!(v["url"], "/pub/seed.json");
        assert_eq!(v["status"], "QUEUED");
    }
}
