//! Outbound sync dispatcher.
//!
//! Drains one tenant's journal oldest-first and PATCHes each job to the
//! tenant's counterpart. The first failed delivery stops that tenant's
//! drain; the journal holds its order and the next tick retries from
//! the same head. Hub always wins: a satellite never rejects a hub
//! delivery on content grounds, and the hub's own failures are simply
//! retried.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use edumesh_core::TenantId;
use edumesh_infra::{StoreError, SyncJobStore, TenantStore};
use edumesh_replication::wire::SyncRequest;

use crate::config::EngineConfig;
use crate::roles::Role;
use crate::transport::PeerClient;

#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What one `sync()` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Another call is already draining this tenant.
    AlreadyInFlight,
    /// The tenant has no registered counterpart to deliver to.
    NoDestination,
    /// Drained to the end, or stopped at the first failure.
    Drained { delivered: u32, halted: bool },
}

pub struct SyncDispatcher {
    config: EngineConfig,
    role: Arc<dyn Role>,
    tenants: Arc<dyn TenantStore>,
    sync_jobs: Arc<dyn SyncJobStore>,
    peer: Arc<dyn PeerClient>,
    in_flight: Arc<Mutex<HashSet<TenantId>>>,
}

/// Removes the tenant from the in-flight set on every exit path.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<TenantId>>>,
    tenant: TenantId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().unwrap().remove(&self.tenant);
    }
}

impl SyncDispatcher {
    pub fn new(
        config: EngineConfig,
        role: Arc<dyn Role>,
        tenants: Arc<dyn TenantStore>,
        sync_jobs: Arc<dyn SyncJobStore>,
        peer: Arc<dyn PeerClient>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            role,
            tenants,
            sync_jobs,
            peer,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Deliver the backlog of every tenant this deployment pushes to.
    pub async fn sync_all(&self) {
        let targets = match self.role.mode() {
            edumesh_core::Mode::Hub => self.tenants.list_ready_satellites().await,
            edumesh_core::Mode::Satellite => {
                self.tenants.find_primary().await.map(|t| t.into_iter().collect())
            }
        };
        let targets = match targets {
            Ok(t) => t,
            Err(e) => {
                error!(error = %e, "tenant listing failed");
                return;
            }
        };
        for tenant in targets {
            if let Err(e) = self.sync(tenant.id).await {
                error!(error = %e, tenant = %tenant.id, "tenant sync failed");
            }
        }
    }

    /// Drain one tenant's journal. Reentrancy-safe per tenant.
    pub async fn sync(&self, tenant_id: TenantId) -> Result<DispatchOutcome, DispatchError> {
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if !in_flight.insert(tenant_id) {
                return Ok(DispatchOutcome::AlreadyInFlight);
            }
        }
        let _guard = InFlightGuard {
            set: Arc::clone(&self.in_flight),
            tenant: tenant_id,
        };

        let Some(tenant) = self.tenants.get(tenant_id).await? else {
            warn!(tenant = %tenant_id, "sync requested for unknown tenant");
            return Ok(DispatchOutcome::NoDestination);
        };
        let Some(destination) = self.role.destination(&tenant) else {
            return Ok(DispatchOutcome::NoDestination);
        };

        let mut delivered = 0u32;
        loop {
            let Some(job) = self.sync_jobs.next_pending(tenant_id).await? else {
                if delivered > 0 {
                    debug!(tenant = %tenant_id, delivered, "journal drained");
                }
                return Ok(DispatchOutcome::Drained { delivered, halted: false });
            };

            let request = SyncRequest {
                api_key: destination.api_key.clone(),
                attempt: job.attempt + 1,
                sync_job_id: job.id,
                notify: job.notify_for_delivery().cloned(),
                sync: job.sync.clone(),
                tenant_id,
                timestamp: Utc::now(),
                version: self.config.version,
            };

            match self.peer.deliver_sync(&destination, &request).await {
                Ok(response) => {
                    let result = serde_json::to_string(&response)
                        .unwrap_or_else(|_| response.code.clone());
                    self.sync_jobs.record_attempt(job.id, result, true).await?;
                    delivered += 1;
                    info!(tenant = %tenant_id, sync_job_id = %job.id, "sync job delivered");
                }
                Err(e) => {
                    let attempt = job.attempt + 1;
                    self.sync_jobs
                        .record_attempt(job.id, format!("error: {e}"), false)
                        .await?;
                    // Persistent outages would flood the log; sample them.
                    if attempt % self.config.dispatch_log_every.max(1) == 1 || attempt == 1 {
                        error!(
                            tenant = %tenant_id,
                            sync_job_id = %job.id,
                            attempt,
                            error = %e,
                            "sync delivery failed, halting tenant queue"
                        );
                    } else {
                        debug!(tenant = %tenant_id, sync_job_id = %job.id, attempt, "sync delivery failed");
                    }
                    return Ok(DispatchOutcome::Drained { delivered, halted: true });
                }
            }
        }
    }
}
