//! Hub side of the seeding handshake.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use edumesh_infra::{
    DocumentStore, ExportScope, ObjectStorage, SatelliteStatus, SeedingRecord, SyncJobStore,
    TaskStore, TenantStore,
};
use edumesh_replication::wire::{
    CODE_COMPLETED, CodeResponse, SeedCompleteRequest, SeedRequest, SeedResponse,
};
use edumesh_replication::{Collection, SeedPayload, Task, TaskKind, TokenSigner};

use crate::config::EngineConfig;

use super::SeedError;

/// Builds seed blobs and tracks seeding handshakes. Hub mode only.
pub struct SeedService {
    config: EngineConfig,
    signer: TokenSigner,
    tenants: Arc<dyn TenantStore>,
    documents: Arc<dyn DocumentStore>,
    storage: Arc<dyn ObjectStorage>,
    tasks: Arc<dyn TaskStore>,
    sync_jobs: Arc<dyn SyncJobStore>,
}

impl SeedService {
    pub fn new(
        config: EngineConfig,
        tenants: Arc<dyn TenantStore>,
        documents: Arc<dyn DocumentStore>,
        storage: Arc<dyn ObjectStorage>,
        tasks: Arc<dyn TaskStore>,
        sync_jobs: Arc<dyn SyncJobStore>,
    ) -> Arc<Self> {
        let signer = TokenSigner::new(config.secret.as_bytes());
        Arc::new(Self {
            config,
            signer,
            tenants,
            documents,
            storage,
            tasks,
            sync_jobs,
        })
    }

    /// Handle a satellite's seed request: export the tenant's dataset
    /// into a blob, rotate its api key, open a seeding record, and
    /// obsolete any pending sync backlog.
    pub async fn handle_request(
        &self,
        request: SeedRequest,
        peer_ip: Option<IpAddr>,
    ) -> Result<SeedResponse, SeedError> {
        let tenant_id = self.signer.verify_satellite(&request.token)?;
        let tenant = self
            .tenants
            .get(tenant_id)
            .await?
            .ok_or(SeedError::UnknownTenant)?;

        let skew = (Utc::now() - request.timestamp).num_milliseconds().abs();
        if skew > self.config.max_clock_skew_ms {
            return Err(SeedError::ClockSkew(skew));
        }
        if !self.config.version.compatible_with(&request.version) {
            return Err(SeedError::VersionMismatch(request.version.to_string()));
        }

        if !request.force {
            let window = ChronoDuration::hours(self.config.reseed_window_hours);
            if let Some(latest) = tenant.latest_seeding() {
                if latest.started_at > Utc::now() - window {
                    return Err(SeedError::ReseedWindow(self.config.reseed_window_hours));
                }
            }
        }

        // Every reseed rotates the sync channel key.
        let api_key = Uuid::new_v4().simple().to_string();
        let seeding = SeedingRecord::started(peer_ip.map(|ip| ip.to_string()));
        let seeding_id = seeding.id;

        let payload = self.export_payload(&tenant, &api_key).await?;
        let bytes = serde_json::to_vec(&payload).map_err(|e| SeedError::Serialize(e.to_string()))?;
        let key = blob_key(seeding_id);
        let blob_url = self
            .storage
            .put_object(self.storage.public_bucket(), &key, bytes)
            .await?;

        // The blob is temporary; schedule its removal after the TTL.
        let ttl_secs = self.config.seed_blob_ttl.as_secs() as i64;
        self.tasks
            .enqueue(
                Task::new(TaskKind::RemoveObject { url: blob_url.clone() })
                    .delayed(ChronoDuration::seconds(ttl_secs)),
            )
            .await?;

        self.tenants
            .begin_seeding(tenant_id, api_key, request.url.clone(), seeding)
            .await?;

        // The blob already carries everything the backlog would replay.
        let obsoleted = self
            .sync_jobs
            .complete_all(tenant_id, "superseded by reseed".into())
            .await?;
        if obsoleted > 0 {
            info!(tenant = %tenant_id, obsoleted, "sync backlog obsoleted by reseed");
        }

        let access_token = self
            .signer
            .sign_seed_access(tenant_id, ttl_secs)?;
        info!(tenant = %tenant_id, %seeding_id, "seed blob published");
        Ok(SeedResponse {
            access_token,
            seed: blob_url,
            seeding_id,
        })
    }

    /// Serve the blob to a bearer of a valid seed access token.
    pub async fn download_blob(
        &self,
        access_token: &str,
        seeding_id: edumesh_core::SeedingId,
    ) -> Result<Vec<u8>, SeedError> {
        self.signer.verify_seed_access(access_token)?;
        self.storage
            .get_object(self.storage.public_bucket(), &blob_key(seeding_id))
            .await?
            .ok_or(SeedError::BlobNotFound)
    }

    /// Close the handshake with the satellite's reported outcome.
    pub async fn handle_complete(
        &self,
        request: SeedCompleteRequest,
    ) -> Result<CodeResponse, SeedError> {
        let status = if request.has_error {
            SatelliteStatus::InitFail
        } else {
            SatelliteStatus::Ready
        };
        let tenant = self
            .tenants
            .complete_seeding(request.tenant_id, request.seeding_id, request.result, status)
            .await?;
        if request.has_error {
            warn!(tenant = %tenant.id, seeding = %request.seeding_id, "satellite reported a failed seed");
        } else {
            info!(tenant = %tenant.id, seeding = %request.seeding_id, "satellite link is ready");
        }
        Ok(CodeResponse { code: CODE_COMPLETED.into() })
    }

    async fn export_payload(
        &self,
        tenant: &edumesh_infra::TenantRecord,
        api_key: &str,
    ) -> Result<SeedPayload, SeedError> {
        let mut payload = SeedPayload::new(self.storage.base_url());
        // Only documents touched within the retention window travel.
        let scope = ExportScope {
            tenant: tenant.id,
            updated_since: Some(Utc::now() - ChronoDuration::days(self.config.retention_days)),
        };

        for collection in Collection::ALL {
            if !collection.seeded()
                || collection == Collection::Tenants
                || collection == Collection::Contents
            {
                continue;
            }
            let docs = self.documents.export(collection, scope).await?;
            if !docs.is_empty() {
                payload.collections.insert(collection, docs);
            }
        }

        // The tenant row travels sanitized, with the rotated key and
        // without the hub-side seeding history.
        let mut exported = tenant.clone();
        exported.api_key = Some(api_key.to_string());
        exported.satellite_ip = None;
        exported.satellite_status = None;
        exported.seedings = Vec::new();
        let tenant_doc =
            serde_json::to_value(&exported).map_err(|e| SeedError::Serialize(e.to_string()))?;
        payload
            .collections
            .insert(Collection::Tenants, vec![tenant_doc]);

        // Content bodies are not inlined; the satellite pulls them in
        // signed chunks after the main insert.
        let content_ids = self.documents.referenced_content_ids(tenant.id).await?;
        for chunk in content_ids.chunks(self.config.content_chunk_size.max(1)) {
            payload
                .contents_tokens
                .push(self.signer.sign_content_ids(None, chunk)?);
        }

        Ok(payload)
    }
}

fn blob_key(seeding_id: edumesh_core::SeedingId) -> String {
    format!("seeds/{seeding_id}.json")
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use edumesh_core::{BuildVersion, ContentId, TenantId};
    use edumesh_infra::{
        InMemoryDocumentStore, InMemoryStorage, InMemorySyncJobStore, InMemoryTaskStore,
        InMemoryTenantStore, TenantRecord,
    };
    use edumesh_replication::{SyncEnvelope, SyncJob, TaskStatus};
    use serde_json::json;

    use super::*;

    struct Fixture {
        service: Arc<SeedService>,
        signer: TokenSigner,
        tenants: Arc<InMemoryTenantStore>,
        documents: Arc<InMemoryDocumentStore>,
        storage: Arc<InMemoryStorage>,
        tasks: Arc<InMemoryTaskStore>,
        sync_jobs: Arc<InMemorySyncJobStore>,
        tenant_id: TenantId,
    }

    fn fixture() -> Fixture {
        let tenant_id = TenantId::new();
        let mut tenant = TenantRecord::new(tenant_id, "north-district");
        tenant.api_key = Some("old-key".into());

        let config = EngineConfig::hub(BuildVersion::new(1, 2, 3), "secret");
        let signer = TokenSigner::new(config.secret.as_bytes());
        let tenants = InMemoryTenantStore::with_tenants([tenant]);
        let documents = InMemoryDocumentStore::arc();
        let storage = InMemoryStorage::arc("http://hub.local:9000");
        let tasks = InMemoryTaskStore::arc();
        let sync_jobs = InMemorySyncJobStore::arc();
        let service = SeedService::new(
            config,
            tenants.clone(),
            documents.clone(),
            storage.clone(),
            tasks.clone(),
            sync_jobs.clone(),
        );
        Fixture { service, signer, tenants, documents, storage, tasks, sync_jobs, tenant_id }
    }

    fn request(fx: &Fixture) -> SeedRequest {
        SeedRequest {
            token: fx.signer.sign_satellite(fx.tenant_id, 600).unwrap(),
            url: "https://north.example".into(),
            timestamp: Utc::now(),
            version: BuildVersion::new(1, 2, 0),
            force: false,
        }
    }

    #[tokio::test]
    async fn blob_carries_sanitized_tenant_and_chunked_tokens() {
        let fx = fixture();
        for i in 0..3 {
            fx.documents.put(
                Collection::Books,
                json!({"_id": format!("b{i}"), "tenantId": fx.tenant_id.to_string(),
                       "contentId": ContentId::new().to_string()}),
            );
        }

        let response = fx.service.handle_request(request(&fx), None).await.unwrap();

        let bytes = fx
            .service
            .download_blob(&response.access_token, response.seeding_id)
            .await
            .unwrap();
        let payload =
            SeedPayload::from_value(serde_json::from_slice(&bytes).unwrap()).unwrap();

        let tenant_doc = payload.tenant().unwrap();
        let new_key = tenant_doc["api_key"].as_str().unwrap();
        assert_ne!(new_key, "old-key");
        assert!(tenant_doc["seedings"].as_array().unwrap().is_empty());
        assert_eq!(payload.collections[&Collection::Books].len(), 3);
        // 3 content ids fit in one signed chunk of 20.
        assert_eq!(payload.contents_tokens.len(), 1);
        assert_eq!(
            fx.signer.verify_content_ids(&payload.contents_tokens[0], None).unwrap().len(),
            3
        );

        // The key in the registry matches the blob, and the handshake is open.
        let tenant = fx.tenants.get(fx.tenant_id).await.unwrap().unwrap();
        assert_eq!(tenant.api_key.as_deref(), Some(new_key));
        assert_eq!(tenant.satellite_status, Some(SatelliteStatus::Initializing));
    }

    #[tokio::test]
    async fn export_applies_the_retention_window() {
        let fx = fixture();
        let stale = Utc::now() - ChronoDuration::days(4 * 365);
        fx.documents.put(
            Collection::Books,
            json!({"_id": "b-old", "updatedAt": stale.to_rfc3339()}),
        );
        fx.documents.put(
            Collection::Books,
            json!({"_id": "b-new", "updatedAt": Utc::now().to_rfc3339()}),
        );

        let response = fx.service.handle_request(request(&fx), None).await.unwrap();
        let bytes = fx
            .service
            .download_blob(&response.access_token, response.seeding_id)
            .await
            .unwrap();
        let payload =
            SeedPayload::from_value(serde_json::from_slice(&bytes).unwrap()).unwrap();

        let books = &payload.collections[&Collection::Books];
        assert_eq!(books.len(), 1);
        assert_eq!(books[0]["_id"], "b-new");
    }

    #[tokio::test]
    async fn blob_cleanup_task_is_scheduled_after_ttl() {
        let fx = fixture();
        let response = fx.service.handle_request(request(&fx), None).await.unwrap();

        let tasks = fx.tasks.snapshot();
        assert_eq!(tasks.len(), 1);
        assert!(matches!(&tasks[0].kind, TaskKind::RemoveObject { url } if *url == response.seed));
        assert_eq!(tasks[0].status, TaskStatus::Queued);
        assert!(tasks[0].start_after > Utc::now() + ChronoDuration::minutes(30));
        assert!(fx.storage.contains(&response.seed));
    }

    #[tokio::test]
    async fn reseed_within_window_requires_force() {
        let fx = fixture();
        fx.service.handle_request(request(&fx), None).await.unwrap();

        assert!(matches!(
            fx.service.handle_request(request(&fx), None).await,
            Err(SeedError::ReseedWindow(_))
        ));

        let mut forced = request(&fx);
        forced.force = true;
        fx.service.handle_request(forced, None).await.unwrap();
    }

    #[tokio::test]
    async fn reseed_obsoletes_pending_backlog() {
        let fx = fixture();
        fx.sync_jobs
            .append(SyncJob::new(fx.tenant_id, None, SyncEnvelope::default()))
            .await
            .unwrap();

        fx.service.handle_request(request(&fx), None).await.unwrap();
        assert_eq!(fx.sync_jobs.pending_count(fx.tenant_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_request_and_bad_token_are_rejected() {
        let fx = fixture();

        let mut stale = request(&fx);
        stale.timestamp = Utc::now() - ChronoDuration::seconds(10);
        assert!(matches!(
            fx.service.handle_request(stale, None).await,
            Err(SeedError::ClockSkew(_))
        ));

        let mut forged = request(&fx);
        forged.token = TokenSigner::new(b"other-secret")
            .sign_satellite(fx.tenant_id, 600)
            .unwrap();
        assert!(matches!(
            fx.service.handle_request(forged, None).await,
            Err(SeedError::Token(_))
        ));
    }

    #[tokio::test]
    async fn complete_flips_link_status() {
        let fx = fixture();
        let response = fx.service.handle_request(request(&fx), None).await.unwrap();

        fx.service
            .handle_complete(SeedCompleteRequest {
                seeding_id: response.seeding_id,
                tenant_id: fx.tenant_id,
                result: json!({"inserted": 3}).to_string(),
                has_error: false,
            })
            .await
            .unwrap();

        let tenant = fx.tenants.get(fx.tenant_id).await.unwrap().unwrap();
        assert_eq!(tenant.satellite_status, Some(SatelliteStatus::Ready));
        assert!(tenant.latest_seeding().unwrap().completed_at.is_some());
    }
}
