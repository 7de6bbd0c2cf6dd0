//! Inbound sync application.
//!
//! Protocol checks run in a fixed order and any failure rejects the
//! whole delivery: api key, clock skew, version, then (hub only)
//! satellite address pinning. Once past the checks, per-item apply
//! failures are aggregated into `has_sync_error` rather than failing
//! the request, and an audit entry is always recorded.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use edumesh_core::Mode;
use edumesh_infra::{
    DocumentStore, Notification, Notifier, ObjectStorage, StoreError, SyncAuditEntry,
    SyncAuditStore, TenantRecord, TenantStore, parse_object_url,
};
use edumesh_replication::wire::{CODE_COMPLETED, CODE_SATELLITE_ERROR, SyncRequest, SyncResponse};
use edumesh_replication::{BulkOp, Collection, SyncEnvelope};

use crate::config::EngineConfig;
use crate::roles::Role;
use crate::transport::PeerClient;

/// Protocol-level rejection. The sender sees these as a failed
/// delivery and will retry the same job unchanged.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApplyError {
    #[error("unknown tenant")]
    UnknownTenant,
    #[error("api key mismatch")]
    ApiKeyMismatch,
    #[error("clock skew of {0}ms exceeds limit")]
    ClockSkew(i64),
    #[error("incompatible sender version {0}")]
    VersionMismatch(String),
    #[error("satellite address mismatch")]
    AddressMismatch,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Host name resolution, injectable for tests.
pub trait Resolver: Send + Sync {
    fn resolve(&self, host: &str) -> std::io::Result<Vec<IpAddr>>;
}

/// System DNS via `ToSocketAddrs`.
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str) -> std::io::Result<Vec<IpAddr>> {
        use std::net::ToSocketAddrs;
        Ok((host, 0)
            .to_socket_addrs()?
            .map(|addr| addr.ip())
            .collect())
    }
}

pub struct SyncReceiver {
    config: EngineConfig,
    role: Arc<dyn Role>,
    tenants: Arc<dyn TenantStore>,
    documents: Arc<dyn DocumentStore>,
    storage: Arc<dyn ObjectStorage>,
    audits: Arc<dyn SyncAuditStore>,
    notifier: Arc<dyn Notifier>,
    peer: Arc<dyn PeerClient>,
    resolver: Arc<dyn Resolver>,
}

impl SyncReceiver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        role: Arc<dyn Role>,
        tenants: Arc<dyn TenantStore>,
        documents: Arc<dyn DocumentStore>,
        storage: Arc<dyn ObjectStorage>,
        audits: Arc<dyn SyncAuditStore>,
        notifier: Arc<dyn Notifier>,
        peer: Arc<dyn PeerClient>,
        resolver: Arc<dyn Resolver>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            role,
            tenants,
            documents,
            storage,
            audits,
            notifier,
            peer,
            resolver,
        })
    }

    /// Handle one inbound delivery from the peer at `peer_ip`.
    pub async fn handle(
        &self,
        request: SyncRequest,
        peer_ip: Option<IpAddr>,
    ) -> Result<SyncResponse, ApplyError> {
        let tenant = self.check_protocol(&request, peer_ip).await?;

        let (results, has_error) = self.apply_envelope(&tenant, &request.sync).await;

        let entry = SyncAuditEntry::new(
            request.sync_job_id,
            request.tenant_id,
            request.attempt,
            serde_json::to_value(&request.sync).unwrap_or(Value::Null),
            results.clone(),
            has_error,
        );
        let audit_id = self.audits.record(entry).await?;

        // Notifications go out only after the database phase.
        if let Some(notify) = request.notify {
            if !notify.user_ids.is_empty() {
                let notification = Notification {
                    user_ids: notify.user_ids,
                    event: notify.event,
                    message: notify.message,
                };
                if let Err(e) = self.notifier.notify(notification).await {
                    warn!(error = %e, "replayed notification delivery failed");
                }
            }
        }

        info!(
            sync_job_id = %request.sync_job_id,
            tenant = %request.tenant_id,
            has_error,
            "sync delivery applied"
        );
        Ok(SyncResponse {
            code: if has_error { CODE_SATELLITE_ERROR.into() } else { CODE_COMPLETED.into() },
            audit_id: audit_id.to_string(),
            sync_result: results,
            has_sync_error: has_error,
        })
    }

    async fn check_protocol(
        &self,
        request: &SyncRequest,
        peer_ip: Option<IpAddr>,
    ) -> Result<TenantRecord, ApplyError> {
        let tenant = self
            .tenants
            .get(request.tenant_id)
            .await?
            .ok_or(ApplyError::UnknownTenant)?;

        // Exact match; a rotated key invalidates the old channel at once.
        if tenant.api_key.as_deref() != Some(request.api_key.as_str()) {
            return Err(ApplyError::ApiKeyMismatch);
        }

        let skew = (Utc::now() - request.timestamp).num_milliseconds().abs();
        if skew > self.config.max_clock_skew_ms {
            return Err(ApplyError::ClockSkew(skew));
        }

        if !self.config.version.compatible_with(&request.version) {
            return Err(ApplyError::VersionMismatch(request.version.to_string()));
        }

        if self.role.mode() == Mode::Hub {
            self.check_address(&tenant, peer_ip).await?;
        }

        Ok(tenant)
    }

    /// Hub-side address pinning: the caller must resolve from the
    /// registered satellite host. An IP that matches DNS but differs
    /// from the pinned one is a legitimate re-deploy; update the pin.
    async fn check_address(
        &self,
        tenant: &TenantRecord,
        peer_ip: Option<IpAddr>,
    ) -> Result<(), ApplyError> {
        let (Some(url), Some(peer_ip)) = (tenant.satellite_url.as_deref(), peer_ip) else {
            return Err(ApplyError::AddressMismatch);
        };
        let host = host_of(url).ok_or(ApplyError::AddressMismatch)?;
        let resolved = self
            .resolver
            .resolve(host)
            .map_err(|_| ApplyError::AddressMismatch)?;
        if !resolved.contains(&peer_ip) {
            error!(tenant = %tenant.id, %peer_ip, host, "satellite DNS mismatch");
            return Err(ApplyError::AddressMismatch);
        }
        let pinned = tenant.satellite_ip.as_deref();
        let current = peer_ip.to_string();
        if pinned != Some(current.as_str()) {
            warn!(tenant = %tenant.id, old = ?pinned, new = %current, "satellite IP drift, updating pin");
            self.tenants.set_satellite_ip(tenant.id, current).await?;
        }
        Ok(())
    }

    /// Apply the envelope. Returns the per-phase results and whether
    /// any item failed.
    async fn apply_envelope(&self, tenant: &TenantRecord, sync: &SyncEnvelope) -> (Value, bool) {
        let mut has_error = false;
        let mut bulk_results = serde_json::Map::new();

        for (collection, ops) in &sync.bulk_write {
            if !self.role.applies(*collection) {
                // Ownership gate; skipping is not an error.
                continue;
            }
            match self.documents.apply(*collection, ops).await {
                Ok(result) => {
                    has_error |= result.has_error();
                    bulk_results.insert(
                        collection.wire_name().to_string(),
                        serde_json::to_value(&result).unwrap_or(Value::Null),
                    );
                }
                Err(e) => {
                    has_error = true;
                    bulk_results
                        .insert(collection.wire_name().to_string(), json!({"error": e.to_string()}));
                }
            }
        }

        let contents = match &sync.contents_token {
            Some(token) => Some(self.pull_contents(tenant, token).await),
            None => None,
        };
        if let Some(Err(ref e)) = contents {
            has_error = true;
            warn!(tenant = %tenant.id, error = %e, "content pull failed");
        }

        let storage_result = match &sync.storage {
            Some(storage) => Some(self.apply_storage(storage).await),
            None => None,
        };
        if let Some((_, _, failed)) = storage_result {
            has_error |= failed > 0;
        }

        if let Some(extra) = &sync.extra {
            if let Some(user) = extra.revoke_all_tokens_by_user_id {
                if let Err(e) = self.documents.revoke_tokens(user).await {
                    has_error = true;
                    warn!(%user, error = %e, "token revocation failed");
                }
            }
        }

        let results = json!({
            "bulkWrite": Value::Object(bulk_results),
            "contents": match contents {
                Some(Ok(n)) => json!({"fetched": n}),
                Some(Err(e)) => json!({"error": e}),
                None => Value::Null,
            },
            "storage": storage_result.map(|(added, removed, failed)| {
                json!({"added": added, "removed": removed, "failed": failed})
            }),
        });
        (results, has_error)
    }

    /// Resolve a contents token against the sender and upsert the blobs.
    async fn pull_contents(&self, tenant: &TenantRecord, token: &str) -> Result<usize, String> {
        let destination = self
            .role
            .destination(tenant)
            .ok_or_else(|| "no peer to fetch contents from".to_string())?;
        let docs = self
            .peer
            .fetch_contents(&destination.url, token, None)
            .await
            .map_err(|e| e.to_string())?;

        let ops: Vec<BulkOp> = docs
            .iter()
            .filter_map(|doc| {
                let id = doc.get("_id").and_then(Value::as_str)?;
                Some(BulkOp::ReplaceOne {
                    filter: json!({"_id": id}),
                    replacement: doc.clone(),
                    upsert: true,
                })
            })
            .collect();
        let count = ops.len();
        let result = self
            .documents
            .apply(Collection::Contents, &ops)
            .await
            .map_err(|e| e.to_string())?;
        if result.has_error() {
            return Err(format!("{} content upserts failed", result.failed));
        }
        Ok(count)
    }

    /// Mirror object-storage changes: pull added objects from the
    /// sender, delete removed ones. Per-object failures are counted,
    /// not fatal.
    async fn apply_storage(
        &self,
        storage: &edumesh_replication::StorageSync,
    ) -> (usize, usize, usize) {
        let mut added = 0;
        let mut removed = 0;
        let mut failed = 0;

        for object_url in &storage.add_objects {
            let Some(server) = storage.server_url.as_deref() else {
                failed += 1;
                continue;
            };
            match self.mirror_object(server, object_url).await {
                Ok(()) => added += 1,
                Err(e) => {
                    warn!(object = %object_url, error = %e, "object mirror failed");
                    failed += 1;
                }
            }
        }

        for object_url in &storage.remove_objects {
            match self.storage.remove_object(object_url).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!(object = %object_url, error = %e, "object removal failed");
                    failed += 1;
                }
            }
        }

        (added, removed, failed)
    }

    async fn mirror_object(&self, server_url: &str, object_url: &str) -> Result<(), String> {
        let (bucket, key) = parse_object_url(object_url).map_err(|e| e.to_string())?;
        // Only mirror buckets this node knows about.
        if bucket != self.storage.public_bucket() && bucket != self.storage.private_bucket() {
            return Err(format!("unrecognized bucket {bucket}"));
        }
        let source = format!("{}{}", server_url.trim_end_matches('/'), object_url);
        let body = self
            .peer
            .fetch_object(&source)
            .await
            .map_err(|e| e.to_string())?;
        self.storage
            .put_object(bucket, key, body)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

fn host_of(url: &str) -> Option<&str> {
    let rest = url.split("//").nth(1).unwrap_or(url);
    let host_port = rest.split('/').next()?;
    Some(host_port.split(':').next().unwrap_or(host_port))
}
