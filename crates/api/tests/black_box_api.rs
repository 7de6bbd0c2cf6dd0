use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use reqwest::StatusCode;
use serde_json::json;

use edumesh_api::app::{self, Backends, build_services};
use edumesh_core::{BuildVersion, ContentId, TenantId};
use edumesh_engine::EngineConfig;
use edumesh_infra::{
    InMemoryDocumentStore, InMemoryTenantStore, SatelliteStatus, TenantRecord, TenantStore,
};
use edumesh_replication::wire::{SeedRequest, SyncRequest};
use edumesh_replication::{BulkOp, Collection, SyncEnvelope, TokenSigner};

const SECRET: &str = "test-secret";

fn version() -> BuildVersion {
    BuildVersion::new(0, 1, 0)
}

struct TestServer {
    base_url: String,
    documents: Arc<InMemoryDocumentStore>,
    tenants: Arc<InMemoryTenantStore>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Same router as prod, bound to an ephemeral port, with
    /// in-memory backends the test can reach into.
    async fn spawn_hub(tenant: TenantRecord) -> Self {
        let config = EngineConfig::hub(version(), SECRET);
        let mut backends = Backends::in_memory(&config).unwrap();
        let documents = InMemoryDocumentStore::arc();
        let tenants = InMemoryTenantStore::arc();
        tenants.upsert(tenant).await.unwrap();
        backends.documents = documents.clone();
        backends.tenants = tenants.clone();

        let services = Arc::new(build_services(config, backends).unwrap());
        let app = app::build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self { base_url, documents, tenants, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn registered_tenant(id: TenantId, api_key: &str) -> TenantRecord {
    let mut tenant = TenantRecord::new(id, "north-district");
    tenant.api_key = Some(api_key.into());
    // Resolves to the loopback the test connects from.
    tenant.satellite_url = Some("http://localhost:9999".into());
    tenant.satellite_status = Some(SatelliteStatus::Ready);
    tenant
}

fn signer() -> TokenSigner {
    TokenSigner::new(SECRET.as_bytes())
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn_hub(registered_tenant(TenantId::new(), "key")).await;
    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn sync_rejects_a_wrong_api_key() {
    let tenant_id = TenantId::new();
    let srv = TestServer::spawn_hub(registered_tenant(tenant_id, "key")).await;

    let request = SyncRequest {
        api_key: "wrong".into(),
        attempt: 1,
        sync_job_id: edumesh_core::SyncJobId::new(),
        notify: None,
        sync: SyncEnvelope::default(),
        tenant_id,
        timestamp: Utc::now(),
        version: version(),
    };
    let res = reqwest::Client::new()
        .patch(format!("{}/api/satellite/sync", srv.base_url))
        .json(&request)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "api_key_mismatch");
}

#[tokio::test]
async fn sync_applies_shared_writes_and_returns_an_audit_id() {
    let tenant_id = TenantId::new();
    let srv = TestServer::spawn_hub(registered_tenant(tenant_id, "key")).await;

    let request = SyncRequest {
        api_key: "key".into(),
        attempt: 1,
        sync_job_id: edumesh_core::SyncJobId::new(),
        notify: None,
        sync: SyncEnvelope::bulk(
            Collection::Chats,
            vec![BulkOp::InsertOne { document: json!({"_id": "c1", "text": "hello"}) }],
        ),
        tenant_id,
        timestamp: Utc::now(),
        version: version(),
    };
    let res = reqwest::Client::new()
        .patch(format!("{}/api/satellite/sync", srv.base_url))
        .json(&request)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["code"], "COMPLETED");
    assert_eq!(body["hasSyncError"], false);
    assert!(!body["auditId"].as_str().unwrap().is_empty());
    assert_eq!(srv.documents.len(Collection::Chats), 1);
}

#[tokio::test]
async fn seed_handshake_round_trips_over_http() {
    let tenant_id = TenantId::new();
    let mut tenant = TenantRecord::new(tenant_id, "north-district");
    tenant.api_key = Some("old-key".into());
    let srv = TestServer::spawn_hub(tenant).await;

    let client = reqwest::Client::new();
    let request = SeedRequest {
        token: signer().sign_satellite(tenant_id, 600).unwrap(),
        url: "http://localhost:9999".into(),
        timestamp: Utc::now(),
        version: version(),
        force: false,
    };
    let res = client
        .post(format!("{}/api/satellite/seedRequest", srv.base_url))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    let seeding_id = body["seedingId"].as_str().unwrap().to_string();
    let access_token = body["accessToken"].as_str().unwrap().to_string();

    // Blob download needs the bearer.
    let blob_url = format!("{}/api/satellite/seed/{}", srv.base_url, seeding_id);
    let denied = client.get(&blob_url).send().await.unwrap();
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

    let blob: serde_json::Value = client
        .get(&blob_url)
        .bearer_auth(&access_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(blob["tenants"].as_array().unwrap().len(), 1);

    let res = client
        .post(format!("{}/api/satellite/seedComplete", srv.base_url))
        .json(&json!({
            "seedingId": seeding_id,
            "tenantId": tenant_id,
            "result": "{\"documents\":0}",
            "hasError": false,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let tenant = srv.tenants.get(tenant_id).await.unwrap().unwrap();
    assert_eq!(tenant.satellite_status, Some(SatelliteStatus::Ready));
}

#[tokio::test]
async fn contents_are_gated_by_token_and_narrowed_by_ids() {
    let srv = TestServer::spawn_hub(registered_tenant(TenantId::new(), "key")).await;

    let granted: Vec<ContentId> = (0..3).map(|_| ContentId::new()).collect();
    for id in &granted {
        srv.documents.put(
            Collection::Contents,
            json!({"_id": id.to_string(), "data": "..."}),
        );
    }
    let token = signer().sign_content_ids(None, &granted).unwrap();

    let client = reqwest::Client::new();
    let docs: Vec<serde_json::Value> = client
        .get(format!("{}/api/contents/{}", srv.base_url, token))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(docs.len(), 3);

    let docs: Vec<serde_json::Value> = client
        .get(format!(
            "{}/api/contents/{}?ids={}",
            srv.base_url, token, granted[0]
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);

    let forged = TokenSigner::new(b"other-secret")
        .sign_content_ids(None, &granted)
        .unwrap();
    let res = client
        .get(format!("{}/api/contents/{}", srv.base_url, forged))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}
