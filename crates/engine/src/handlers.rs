//! Task handlers.
//!
//! The runner dispatches exhaustively on `TaskKind` through this
//! registry. `RemoveObject` is built in; the business handlers
//! (censor, grade, report) are injected by the host application.

use std::sync::Arc;

use async_trait::async_trait;

use edumesh_infra::{ObjectStorage, StorageError};
use edumesh_replication::{Task, TaskKind};

/// Handler failure. Terminal for the task; the runner does not retry it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct TaskError(pub String);

impl From<StorageError> for TaskError {
    fn from(err: StorageError) -> Self {
        TaskError(err.to_string())
    }
}

/// One task kind's execution logic.
///
/// Handlers must be idempotent: a timed-out attempt is not preempted
/// and may still complete concurrently with its retry.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Execute the task. The returned string becomes `task.result`.
    async fn execute(&self, task: &Task) -> Result<Option<String>, TaskError>;
}

/// Exhaustive kind-to-handler dispatch table.
pub struct HandlerRegistry {
    censor: Option<Arc<dyn TaskHandler>>,
    grade: Option<Arc<dyn TaskHandler>>,
    report: Option<Arc<dyn TaskHandler>>,
    remove_object: Arc<dyn TaskHandler>,
}

impl HandlerRegistry {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self {
            censor: None,
            grade: None,
            report: None,
            remove_object: Arc::new(RemoveObjectHandler { storage }),
        }
    }

    pub fn with_censor(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.censor = Some(handler);
        self
    }

    pub fn with_grade(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.grade = Some(handler);
        self
    }

    pub fn with_report(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.report = Some(handler);
        self
    }

    pub fn resolve(&self, kind: &TaskKind) -> Option<Arc<dyn TaskHandler>> {
        match kind {
            TaskKind::Censor { .. } => self.censor.clone(),
            TaskKind::Grade { .. } => self.grade.clone(),
            TaskKind::Report { .. } => self.report.clone(),
            TaskKind::RemoveObject { .. } => Some(self.remove_object.clone()),
        }
    }
}

/// Deletes one object from local storage. Deleting an object that is
/// already gone succeeds, so retries are safe.
struct RemoveObjectHandler {
    storage: Arc<dyn ObjectStorage>,
}

#[async_trait]
impl TaskHandler for RemoveObjectHandler {
    async fn execute(&self, task: &Task) -> Result<Option<String>, TaskError> {
        let TaskKind::RemoveObject { url } = &task.kind else {
            return Err(TaskError("removeObject handler got a different kind".into()));
        };
        self.storage.remove_object(url).await?;
        Ok(Some(format!("removed {url}")))
    }
}
