//! Notify-and-sync fan-out.
//!
//! Every state change that users should see goes through here: local
//! users are notified immediately, and in hub mode the change is also
//! journaled as a sync job for the tenant's satellite (where the same
//! notification fires after replay, while `attempt < 1`).

use std::sync::Arc;

use tracing::{debug, warn};

use edumesh_core::{SyncJobId, TenantId};
use edumesh_infra::{Notification, Notifier, StoreError, SyncJobStore, WakeChannel, WakeSignal};
use edumesh_replication::{NotifyPayload, SyncEnvelope, SyncJob};

use edumesh_core::Mode;

use crate::roles::Role;

#[derive(Debug, Clone, thiserror::Error)]
pub enum NotifySyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct NotifySync {
    role: Arc<dyn Role>,
    sync_jobs: Arc<dyn SyncJobStore>,
    notifier: Arc<dyn Notifier>,
    wake: Arc<dyn WakeChannel>,
}

impl NotifySync {
    pub fn new(
        role: Arc<dyn Role>,
        sync_jobs: Arc<dyn SyncJobStore>,
        notifier: Arc<dyn Notifier>,
        wake: Arc<dyn WakeChannel>,
    ) -> Self {
        Self { role, sync_jobs, notifier, wake }
    }

    /// Fan out one change. Returns the appended sync job id, when one
    /// was journaled.
    pub async fn dispatch(
        &self,
        tenant: Option<TenantId>,
        notify: Option<NotifyPayload>,
        envelope: SyncEnvelope,
    ) -> Result<Option<SyncJobId>, NotifySyncError> {
        let mut job_id = None;

        // Only a hub journals outbound changes; a satellite's own writes
        // reach the hub through its dispatcher loop, not through here.
        if self.role.mode() == Mode::Hub {
            if let Some(tenant) = tenant {
                if !envelope.is_empty() || notify.is_some() {
                    let job = SyncJob::new(tenant, notify.clone(), envelope);
                    let id = self.sync_jobs.append(job).await?;
                    if let Err(e) = self.wake.publish(WakeSignal::Sync { tenant_id: tenant }).await {
                        // The poll loop will still pick the job up.
                        warn!(error = %e, %tenant, "sync wake publish failed");
                    }
                    debug!(sync_job_id = %id, %tenant, "sync job journaled");
                    job_id = Some(id);
                }
            }
        }

        if let Some(notify) = notify {
            if !notify.user_ids.is_empty() {
                let notification = Notification {
                    user_ids: notify.user_ids,
                    event: notify.event,
                    message: notify.message,
                };
                if let Err(e) = self.notifier.notify(notification).await {
                    warn!(error = %e, "local notification delivery failed");
                }
            }
        }

        Ok(job_id)
    }
}

#[cfg(test)]
mod tests {
    use edumesh_core::UserId;
    use edumesh_infra::{InMemorySyncJobStore, InProcessWake, RecordingNotifier};
    use edumesh_replication::{BulkOp, Collection};
    use serde_json::json;

    use crate::roles::{HubRole, SatelliteRole};

    use super::*;

    fn envelope() -> SyncEnvelope {
        SyncEnvelope::bulk(
            Collection::Chats,
            vec![BulkOp::InsertOne { document: json!({"_id": "c1"}) }],
        )
    }

    fn notify(user: UserId) -> NotifyPayload {
        NotifyPayload {
            user_ids: vec![user],
            event: "chat:new".into(),
            message: Some("new message".into()),
        }
    }

    #[tokio::test]
    async fn hub_journals_and_notifies() {
        let jobs = InMemorySyncJobStore::arc();
        let notifier = RecordingNotifier::arc();
        let fanout = NotifySync::new(
            Arc::new(HubRole),
            jobs.clone(),
            notifier.clone(),
            InProcessWake::arc(),
        );
        let tenant = TenantId::new();
        let user = UserId::new();

        let job_id = fanout
            .dispatch(Some(tenant), Some(notify(user)), envelope())
            .await
            .unwrap()
            .unwrap();

        let job = jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.tenant, tenant);
        assert!(job.notify.is_some());
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn satellite_notifies_without_journaling() {
        let jobs = InMemorySyncJobStore::arc();
        let notifier = RecordingNotifier::arc();
        let fanout = NotifySync::new(
            Arc::new(SatelliteRole {
                hub_url: "https://hub.example".into(),
                api_key: "k".into(),
            }),
            jobs.clone(),
            notifier.clone(),
            InProcessWake::arc(),
        );
        let tenant = TenantId::new();

        let job_id = fanout
            .dispatch(Some(tenant), Some(notify(UserId::new())), envelope())
            .await
            .unwrap();

        assert!(job_id.is_none());
        assert_eq!(jobs.pending_count(tenant).await.unwrap(), 0);
        assert_eq!(notifier.sent().len(), 1);
    }
}
