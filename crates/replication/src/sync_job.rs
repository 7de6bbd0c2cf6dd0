//! Queued replication entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use edumesh_core::{SyncJobId, TenantId, UserId};

use crate::envelope::SyncEnvelope;

/// User-visible notification delivered on successful replay.
///
/// Attached to a delivery only while `attempt < 1`: a retry must never ping
/// the same users twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyPayload {
    pub user_ids: Vec<UserId>,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One ordered replication unit bound for a single tenant's counterpart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncJob {
    pub id: SyncJobId,
    /// Partition key: delivery order is strict FIFO within one tenant.
    pub tenant: TenantId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify: Option<NotifyPayload>,
    pub sync: SyncEnvelope,
    /// 0 = queued, never attempted.
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
}

impl SyncJob {
    pub fn new(tenant: TenantId, notify: Option<NotifyPayload>, sync: SyncEnvelope) -> Self {
        Self {
            id: SyncJobId::new(),
            tenant,
            notify,
            sync,
            attempt: 0,
            created_at: Utc::now(),
            completed_at: None,
            result: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.completed_at.is_none()
    }

    /// Notify payload to put on the wire for the next delivery attempt.
    pub fn notify_for_delivery(&self) -> Option<&NotifyPayload> {
        (self.attempt < 1).then_some(self.notify.as_ref()).flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with_notify(attempt: u32) -> SyncJob {
        let mut job = SyncJob::new(
            TenantId::new(),
            Some(NotifyPayload {
                user_ids: vec![UserId::new()],
                event: "JOB".into(),
                message: None,
            }),
            SyncEnvelope::default(),
        );
        job.attempt = attempt;
        job
    }

    #[test]
    fn notify_rides_only_on_first_attempt() {
        assert!(job_with_notify(0).notify_for_delivery().is_some());
        assert!(job_with_notify(1).notify_for_delivery().is_none());
        assert!(job_with_notify(5).notify_for_delivery().is_none());
    }
}
