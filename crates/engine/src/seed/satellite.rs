//! Satellite side of the seeding handshake.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use edumesh_core::TenantId;
use serde_json::{Value, json};
use tracing::{info, warn};

use edumesh_infra::{DocumentStore, ObjectStorage, SatelliteStatus, TenantStore, parse_object_url};
use edumesh_replication::wire::{SeedCompleteRequest, SeedRequest, SeedResponse};
use edumesh_replication::{Collection, SeedPayload};

use crate::config::EngineConfig;
use crate::transport::PeerClient;

use super::SeedError;

/// Outcome of one bootstrap run, echoed to the hub in `seedComplete`.
#[derive(Debug, Clone, Default)]
pub struct BootstrapReport {
    pub documents: usize,
    pub contents: usize,
    pub media_cloned: usize,
    pub media_failed: usize,
}

impl BootstrapReport {
    fn as_result(&self) -> String {
        json!({
            "documents": self.documents,
            "contents": self.contents,
            "media": {"cloned": self.media_cloned, "failed": self.media_failed},
        })
        .to_string()
    }
}

/// One-shot installer for a hub-issued seed. Satellite mode only.
pub struct SatelliteBootstrap {
    config: EngineConfig,
    tenants: Arc<dyn TenantStore>,
    documents: Arc<dyn DocumentStore>,
    storage: Arc<dyn ObjectStorage>,
    peer: Arc<dyn PeerClient>,
    busy: AtomicBool,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SatelliteBootstrap {
    pub fn new(
        config: EngineConfig,
        tenants: Arc<dyn TenantStore>,
        documents: Arc<dyn DocumentStore>,
        storage: Arc<dyn ObjectStorage>,
        peer: Arc<dyn PeerClient>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            tenants,
            documents,
            storage,
            peer,
            busy: AtomicBool::new(false),
        })
    }

    /// Run the full bootstrap: request a seed from the hub with the
    /// operator-supplied satellite token, download and install the
    /// blob, then confirm with `seedComplete`.
    ///
    /// A malformed blob aborts before anything is inserted; partial
    /// per-item failures are reported to the hub instead of failing
    /// the run.
    pub async fn run(
        &self,
        satellite_token: &str,
        public_url: &str,
        force: bool,
    ) -> Result<BootstrapReport, SeedError> {
        if self.tenants.find_primary().await?.is_some() {
            return Err(SeedError::AlreadyInitialized);
        }
        if self.busy.swap(true, Ordering::AcqRel) {
            return Err(SeedError::InitInProgress);
        }
        let _guard = BusyGuard(&self.busy);

        let hub_url = self
            .config
            .hub_url
            .clone()
            .ok_or(SeedError::Misconfigured)?;

        let raw = self
            .peer
            .seed_request(
                &hub_url,
                &SeedRequest {
                    token: satellite_token.to_string(),
                    url: public_url.to_string(),
                    timestamp: Utc::now(),
                    version: self.config.version,
                    force,
                },
            )
            .await?;
        let response: SeedResponse = serde_json::from_value(raw)
            .map_err(|e| SeedError::BadSeedResponse(e.to_string()))?;

        // The blob is served through the hub's token-gated endpoint;
        // the access token from the handshake is the only credential.
        let blob = self
            .peer
            .fetch_seed(&hub_url, response.seeding_id, &response.access_token)
            .await?;
        let payload = match serde_json::from_slice::<Value>(&blob)
            .map_err(|_| SeedError::BadSeedResponse("seed blob is not JSON".into()))
            .and_then(|value| SeedPayload::from_value(value).map_err(SeedError::from))
        {
            Ok(payload) => payload,
            Err(e) => {
                // Nothing was inserted; tell the hub the handshake failed.
                self.report(&hub_url, &response, e.to_string(), true).await;
                return Err(e);
            }
        };

        let report = self.install(&payload, &response.access_token).await?;
        let has_error = report.media_failed > 0;

        self.register_tenant(&payload, has_error).await?;
        self.report(&hub_url, &response, report.as_result(), has_error)
            .await;
        info!(
            documents = report.documents,
            contents = report.contents,
            "satellite bootstrap finished"
        );
        Ok(report)
    }

    async fn install(
        &self,
        payload: &SeedPayload,
        access_token: &str,
    ) -> Result<BootstrapReport, SeedError> {
        let mut report = BootstrapReport::default();

        for (collection, docs) in &payload.collections {
            if *collection == Collection::Tenants {
                continue;
            }
            report.documents += self.documents.insert_many(*collection, docs).await?;
        }

        // Content bodies come in signed chunks, pulled one at a time
        // so a large library does not hammer the hub.
        for token in &payload.contents_tokens {
            let docs = self
                .peer
                .fetch_contents(
                    hub_base(&payload.storage_url, &self.config),
                    token,
                    Some(access_token),
                )
                .await?;
            report.contents += self.documents.insert_many(Collection::Contents, &docs).await?;
            tokio::time::sleep(self.config.content_fetch_delay).await;
        }

        self.clone_media(payload, &mut report).await;
        Ok(report)
    }

    /// Mirror every object-storage reference found in the seed from
    /// the hub's storage into the local buckets.
    async fn clone_media(&self, payload: &SeedPayload, report: &mut BootstrapReport) {
        let mut urls = Vec::new();
        for docs in payload.collections.values() {
            for doc in docs {
                collect_object_urls(doc, self.storage.as_ref(), &mut urls);
            }
        }
        urls.sort();
        urls.dedup();

        for object_url in urls {
            let source = format!(
                "{}{}",
                payload.storage_url.trim_end_matches('/'),
                object_url
            );
            let outcome = async {
                let (bucket, key) = parse_object_url(&object_url)?;
                let body = self
                    .peer
                    .fetch_object(&source)
                    .await
                    .map_err(|e| edumesh_infra::StorageError::Backend(e.to_string()))?;
                self.storage.put_object(bucket, key, body).await?;
                Ok::<_, edumesh_infra::StorageError>(())
            }
            .await;
            match outcome {
                Ok(()) => report.media_cloned += 1,
                Err(e) => {
                    warn!(object = %object_url, error = %e, "media clone failed");
                    report.media_failed += 1;
                }
            }
        }
    }

    async fn register_tenant(
        &self,
        payload: &SeedPayload,
        has_error: bool,
    ) -> Result<(), SeedError> {
        let mut record: edumesh_infra::TenantRecord =
            serde_json::from_value(payload.tenant()?.clone())
                .map_err(|_| SeedError::SeedData(edumesh_replication::SeedDataError::Invalid(
                    "tenant record has the wrong shape",
                )))?;
        record.primary = true;
        record.satellite_status = Some(if has_error {
            SatelliteStatus::InitFail
        } else {
            SatelliteStatus::Ready
        });
        self.tenants.upsert(record).await?;
        Ok(())
    }

    async fn report(
        &self,
        hub_url: &str,
        response: &SeedResponse,
        result: String,
        has_error: bool,
    ) {
        let tenant_id = self
            .tenants
            .find_primary()
            .await
            .ok()
            .flatten()
            .map(|t| t.id);
        // Without an installed tenant we still owe the hub an answer;
        // the hub matches the handshake on the seeding id alone.
        let request = SeedCompleteRequest {
            seeding_id: response.seeding_id,
            tenant_id: tenant_id.unwrap_or_else(|| TenantId::from_uuid(uuid::Uuid::nil())),
            result,
            has_error,
        };
        if let Err(e) = self.peer.seed_complete(hub_url, &request).await {
            warn!(error = %e, "seedComplete delivery failed");
        }
    }
}

/// Content chunks are fetched from the hub's API, not its storage.
fn hub_base<'a>(storage_url: &'a str, config: &'a EngineConfig) -> &'a str {
    config.hub_url.as_deref().unwrap_or(storage_url)
}

fn collect_object_urls(doc: &Value, storage: &dyn ObjectStorage, out: &mut Vec<String>) {
    match doc {
        Value::String(s) => {
            if let Ok((bucket, _)) = parse_object_url(s) {
                if bucket == storage.public_bucket() || bucket == storage.private_bucket() {
                    out.push(s.clone());
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_object_urls(item, storage, out);
            }
        }
        Value::Object(map) => {
            for value in map.values() {
                collect_object_urls(value, storage, out);
            }
        }
        _ => {}
    }
}
