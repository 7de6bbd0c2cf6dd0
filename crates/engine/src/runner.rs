//! Single-flight background job runner.
//!
//! One runner per process. `tick()` drains the queue one task at a
//! time; an `AtomicBool` makes it safe to call from the wake channel
//! and the poll timer at the same moment. A handler failure marks its
//! task terminal and never takes the loop down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{debug, error, info, warn};

use edumesh_core::TaskId;
use edumesh_infra::{StoreError, TaskStore, WakeChannel, WakeSignal};
use edumesh_replication::{
    BulkOp, Collection, NotifyPayload, SyncEnvelope, Task, TaskStatus,
};

use crate::config::EngineConfig;
use crate::handlers::HandlerRegistry;
use crate::notify_sync::NotifySync;
use crate::roles::Role;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RunnerError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct JobRunner {
    config: EngineConfig,
    role: Arc<dyn Role>,
    tasks: Arc<dyn TaskStore>,
    handlers: HandlerRegistry,
    fanout: Arc<NotifySync>,
    wake: Arc<dyn WakeChannel>,
    busy: AtomicBool,
}

impl JobRunner {
    pub fn new(
        config: EngineConfig,
        role: Arc<dyn Role>,
        tasks: Arc<dyn TaskStore>,
        handlers: HandlerRegistry,
        fanout: Arc<NotifySync>,
        wake: Arc<dyn WakeChannel>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            role,
            tasks,
            handlers,
            fanout,
            wake,
            busy: AtomicBool::new(false),
        })
    }

    /// Requeue tasks orphaned RUNNING by a crash. Call once at startup,
    /// before the first tick.
    pub async fn recover(&self) -> Result<u64, RunnerError> {
        let requeued = self.tasks.requeue_running().await?;
        if requeued > 0 {
            info!(requeued, "requeued tasks orphaned by previous run");
        }
        Ok(requeued)
    }

    /// Persist a task and wake the loop.
    pub async fn enqueue(&self, task: Task) -> Result<TaskId, RunnerError> {
        let id = self.tasks.enqueue(task).await?;
        if let Err(e) = self.wake.publish(WakeSignal::Task { task_id: id }).await {
            warn!(error = %e, task_id = %id, "task wake publish failed");
        }
        Ok(id)
    }

    /// Drain ready tasks. Reentrancy-safe: a call while a tick is in
    /// progress returns immediately.
    pub async fn tick(&self) {
        if self.busy.swap(true, Ordering::AcqRel) {
            return;
        }

        loop {
            let claimed = match self.tasks.claim_next(Utc::now()).await {
                Ok(Some(task)) => task,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "task claim failed");
                    break;
                }
            };
            self.execute(claimed).await;
        }

        self.busy.store(false, Ordering::Release);
    }

    async fn execute(&self, mut task: Task) {
        let kind = task.kind.name();
        let id = task.id;

        if !self.role.executes(&task.kind) {
            task.status = TaskStatus::Ignore;
            task.completed_at = Some(Utc::now());
            task.result = Some(format!("{kind} does not run in {} mode", self.role.mode()));
            debug!(task_id = %id, kind, "task ignored in this mode");
            self.finish(task).await;
            return;
        }

        let Some(handler) = self.handlers.resolve(&task.kind) else {
            task.status = TaskStatus::Error;
            task.completed_at = Some(Utc::now());
            task.result = Some(format!("no handler registered for {kind}"));
            error!(task_id = %id, kind, "no handler registered");
            self.finish(task).await;
            return;
        };

        debug!(task_id = %id, kind, attempt = task.attempt, "task started");
        match tokio::time::timeout(self.config.task_timeout, handler.execute(&task)).await {
            Ok(Ok(result)) => {
                task.status = TaskStatus::Completed;
                task.progress = 100;
                task.completed_at = Some(Utc::now());
                task.result = result;
                info!(task_id = %id, kind, "task completed");
            }
            Ok(Err(e)) => {
                // Execution errors are terminal; only timeouts retry.
                task.status = TaskStatus::Error;
                task.completed_at = Some(Utc::now());
                task.result = Some(e.to_string());
                error!(task_id = %id, kind, error = %e, "task failed");
            }
            Err(_) => {
                if task.attempt >= self.config.max_attempts {
                    task.status = TaskStatus::Timeout;
                    task.completed_at = Some(Utc::now());
                    task.result = Some(format!(
                        "timed out after {} attempts",
                        task.attempt
                    ));
                    error!(task_id = %id, kind, attempt = task.attempt, "task timed out, giving up");
                } else {
                    let backoff = self.config.retry_backoff * task.attempt;
                    task.status = TaskStatus::Queued;
                    task.started_at = None;
                    task.start_after = Utc::now()
                        + ChronoDuration::from_std(backoff)
                            .unwrap_or_else(|_| ChronoDuration::seconds(60));
                    warn!(task_id = %id, kind, attempt = task.attempt, "task timed out, requeued");
                }
            }
        }

        self.finish(task).await;
    }

    /// Persist the transition, then fan it out: owners get notified and
    /// in hub mode the task state is mirrored to its tenant's satellite.
    /// A requeue after timeout fans out like any other transition; an
    /// IGNORE is a bare bookkeeping update that nobody is told about.
    async fn finish(&self, task: Task) {
        if let Err(e) = self.tasks.update(&task).await {
            error!(error = %e, task_id = %task.id, "task state persist failed");
            return;
        }

        if task.status == TaskStatus::Ignore {
            return;
        }

        let notify = (!task.owners.is_empty()).then(|| NotifyPayload {
            user_ids: task.owners.clone(),
            event: format!("task:{}", task.kind.name()),
            message: task.result.clone(),
        });

        let envelope = match serde_json::to_value(&task) {
            Ok(doc) => SyncEnvelope::bulk(
                Collection::Jobs,
                vec![BulkOp::ReplaceOne {
                    filter: serde_json::json!({"_id": task.id.to_string()}),
                    replacement: doc,
                    upsert: true,
                }],
            ),
            Err(e) => {
                error!(error = %e, task_id = %task.id, "task serialization failed");
                return;
            }
        };

        if let Err(e) = self
            .fanout
            .dispatch(task.kind.tenant_id(), notify, envelope)
            .await
        {
            error!(error = %e, task_id = %task.id, "task fan-out failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use edumesh_core::{BuildVersion, TenantId, UserId};
    use edumesh_infra::{
        InMemoryStorage, InMemorySyncJobStore, InMemoryTaskStore, InProcessWake, RecordingNotifier,
        SyncJobStore,
    };

    use crate::handlers::{TaskError, TaskHandler};
    use crate::roles::{HubRole, SatelliteRole};

    use super::*;

    fn config() -> EngineConfig {
        let mut config = EngineConfig::hub(BuildVersion::new(1, 0, 0), "secret");
        config.task_timeout = Duration::from_millis(50);
        config.retry_backoff = Duration::from_millis(10);
        config
    }

    struct Fixture {
        runner: Arc<JobRunner>,
        tasks: Arc<InMemoryTaskStore>,
        sync_jobs: Arc<InMemorySyncJobStore>,
        notifier: Arc<RecordingNotifier>,
    }

    fn fixture(role: Arc<dyn Role>, registry: impl FnOnce(HandlerRegistry) -> HandlerRegistry) -> Fixture {
        let tasks = InMemoryTaskStore::arc();
        let sync_jobs = InMemorySyncJobStore::arc();
        let notifier = RecordingNotifier::arc();
        let wake = InProcessWake::arc();
        let storage = InMemoryStorage::arc("http://node.local:9000");
        let fanout = Arc::new(NotifySync::new(
            role.clone(),
            sync_jobs.clone(),
            notifier.clone(),
            wake.clone(),
        ));
        let runner = JobRunner::new(
            config(),
            role,
            tasks.clone(),
            registry(HandlerRegistry::new(storage)),
            fanout,
            wake,
        );
        Fixture { runner, tasks, sync_jobs, notifier }
    }

    /// Records which task ids it ran, then succeeds.
    struct RecordingHandler {
        ran: Mutex<Vec<TaskId>>,
    }

    #[async_trait]
    impl TaskHandler for RecordingHandler {
        async fn execute(&self, task: &Task) -> Result<Option<String>, TaskError> {
            self.ran.lock().unwrap().push(task.id);
            Ok(Some("done".into()))
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl TaskHandler for FailingHandler {
        async fn execute(&self, _task: &Task) -> Result<Option<String>, TaskError> {
            Err(TaskError("banned word list unavailable".into()))
        }
    }

    struct HangingHandler;

    #[async_trait]
    impl TaskHandler for HangingHandler {
        async fn execute(&self, _task: &Task) -> Result<Option<String>, TaskError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }
    }

    fn grade_task(tenant: TenantId) -> Task {
        Task::new(edumesh_replication::TaskKind::Grade {
            tenant_id: tenant,
            assignment_id: uuid::Uuid::now_v7(),
        })
    }

    #[tokio::test]
    async fn completed_task_is_replicated_and_notifies_owners() {
        let handler = Arc::new(RecordingHandler { ran: Mutex::new(Vec::new()) });
        let fx = fixture(Arc::new(HubRole), |r| r.with_grade(handler.clone()));
        let tenant = TenantId::new();
        let owner = UserId::new();

        let id = fx
            .runner
            .enqueue(grade_task(tenant).with_owners(vec![owner]))
            .await
            .unwrap();
        fx.runner.tick().await;

        let task = fx.tasks.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100);
        assert_eq!(task.result.as_deref(), Some("done"));
        assert_eq!(handler.ran.lock().unwrap().len(), 1);

        // Hub mode mirrors the task state to the tenant's journal.
        let job = fx.sync_jobs.next_pending(tenant).await.unwrap().unwrap();
        assert!(job.sync.bulk_write.contains_key(&Collection::Jobs));
        assert_eq!(fx.notifier.sent().len(), 1);
        assert_eq!(fx.notifier.sent()[0].user_ids, vec![owner]);
    }

    #[tokio::test]
    async fn handler_error_is_terminal() {
        let fx = fixture(Arc::new(HubRole), |r| r.with_grade(Arc::new(FailingHandler)));
        let id = fx.runner.enqueue(grade_task(TenantId::new())).await.unwrap();

        fx.runner.tick().await;
        let task = fx.tasks.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.attempt, 1);

        // No retry on execution errors.
        fx.runner.tick().await;
        let task = fx.tasks.get(id).await.unwrap().unwrap();
        assert_eq!(task.attempt, 1);
    }

    #[tokio::test]
    async fn timeout_requeues_with_backoff_then_goes_terminal() {
        let fx = fixture(Arc::new(HubRole), |r| r.with_grade(Arc::new(HangingHandler)));
        let id = fx.runner.enqueue(grade_task(TenantId::new())).await.unwrap();

        fx.runner.tick().await;
        let task = fx.tasks.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.attempt, 1);
        assert!(task.start_after > Utc::now() - ChronoDuration::seconds(1));

        // Drive it through the remaining attempts.
        for _ in 0..2 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            fx.runner.tick().await;
        }
        let task = fx.tasks.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Timeout);
        assert_eq!(task.attempt, 3);
    }

    #[tokio::test]
    async fn satellite_ignores_hub_only_kinds_without_running_them() {
        let handler = Arc::new(RecordingHandler { ran: Mutex::new(Vec::new()) });
        let role = Arc::new(SatelliteRole {
            hub_url: "https://hub.example".into(),
            api_key: "k".into(),
        });
        let fx = fixture(role, |r| r.with_grade(handler.clone()));

        let id = fx
            .runner
            .enqueue(grade_task(TenantId::new()).with_owners(vec![UserId::new()]))
            .await
            .unwrap();
        fx.runner.tick().await;

        let task = fx.tasks.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Ignore);
        assert!(handler.ran.lock().unwrap().is_empty());
        // An ignore is bookkeeping only: no fan-out, even to owners.
        assert!(fx.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn timeout_requeue_fans_out_like_any_transition() {
        let fx = fixture(Arc::new(HubRole), |r| r.with_grade(Arc::new(HangingHandler)));
        let tenant = TenantId::new();
        let owner = UserId::new();
        fx.runner
            .enqueue(grade_task(tenant).with_owners(vec![owner]))
            .await
            .unwrap();

        fx.runner.tick().await;

        // The requeued (non-terminal) state is still mirrored and the
        // owners still hear about it.
        let job = fx.sync_jobs.next_pending(tenant).await.unwrap().unwrap();
        assert!(job.sync.bulk_write.contains_key(&Collection::Jobs));
        assert_eq!(fx.notifier.sent().len(), 1);
        assert_eq!(fx.notifier.sent()[0].user_ids, vec![owner]);
    }

    #[tokio::test]
    async fn concurrent_ticks_run_one_loop() {
        let handler = Arc::new(RecordingHandler { ran: Mutex::new(Vec::new()) });
        let fx = fixture(Arc::new(HubRole), |r| r.with_grade(handler.clone()));
        for _ in 0..5 {
            fx.runner.enqueue(grade_task(TenantId::new())).await.unwrap();
        }

        let a = fx.runner.clone();
        let b = fx.runner.clone();
        tokio::join!(a.tick(), b.tick());

        // All five ran, exactly once each.
        let ran = handler.ran.lock().unwrap();
        assert_eq!(ran.len(), 5);
        let unique: std::collections::HashSet<_> = ran.iter().collect();
        assert_eq!(unique.len(), 5);
    }
}
