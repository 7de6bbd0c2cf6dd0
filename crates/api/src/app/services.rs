//! Backend selection and engine wiring.

use std::sync::Arc;

use edumesh_engine::{
    Engine, EngineConfig, HandlerRegistry, HttpPeerClient, JobRunner, NotifySync, PeerClient,
    SatelliteBootstrap, SeedService, SyncDispatcher, SyncReceiver, SystemResolver,
    role_from_config,
};
use edumesh_infra::{
    DocumentStore, InMemoryDocumentStore, InMemoryStorage, InMemorySyncAuditStore,
    InMemorySyncJobStore, InMemoryTaskStore, InMemoryTenantStore, InProcessWake, Notifier,
    ObjectStorage, RecordingNotifier, SyncAuditStore, SyncJobStore, TaskStore, TenantStore,
    WakeChannel,
};
use edumesh_replication::TokenSigner;

/// Every pluggable collaborator the engine needs. `main.rs` builds the
/// Postgres/Redis flavor; tests use [`Backends::in_memory`].
pub struct Backends {
    pub tasks: Arc<dyn TaskStore>,
    pub sync_jobs: Arc<dyn SyncJobStore>,
    pub audits: Arc<dyn SyncAuditStore>,
    pub tenants: Arc<dyn TenantStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub storage: Arc<dyn ObjectStorage>,
    pub notifier: Arc<dyn Notifier>,
    pub wake: Arc<dyn WakeChannel>,
    pub peer: Arc<dyn PeerClient>,
}

impl Backends {
    pub fn in_memory(config: &EngineConfig) -> Result<Self, edumesh_engine::TransportError> {
        Ok(Self {
            tasks: InMemoryTaskStore::arc(),
            sync_jobs: InMemorySyncJobStore::arc(),
            audits: InMemorySyncAuditStore::arc(),
            tenants: InMemoryTenantStore::arc(),
            documents: InMemoryDocumentStore::arc(),
            storage: InMemoryStorage::arc("http://localhost:9000"),
            notifier: RecordingNotifier::arc(),
            wake: InProcessWake::arc(),
            peer: Arc::new(HttpPeerClient::new(config.request_timeout)?),
        })
    }
}

/// Everything the route handlers touch.
pub struct AppServices {
    pub config: EngineConfig,
    pub signer: TokenSigner,
    pub documents: Arc<dyn DocumentStore>,
    pub receiver: Arc<SyncReceiver>,
    /// Hub mode only.
    pub seed: Option<Arc<SeedService>>,
    /// Satellite mode only.
    pub bootstrap: Option<Arc<SatelliteBootstrap>>,
    pub runner: Arc<JobRunner>,
    pub engine: Arc<Engine>,
}

#[derive(Debug, thiserror::Error)]
pub enum WiringError {
    #[error("mode {0} is missing its hub connection settings")]
    IncompleteModeConfig(edumesh_core::Mode),
}

/// Wire the engine out of a config and a set of backends. Does not
/// start the engine loop; callers spawn [`AppServices::engine`]'s
/// `run` themselves.
pub fn build_services(config: EngineConfig, backends: Backends) -> Result<AppServices, WiringError> {
    let role =
        role_from_config(&config).ok_or(WiringError::IncompleteModeConfig(config.mode))?;
    let signer = TokenSigner::new(config.secret.as_bytes());

    let fanout = Arc::new(NotifySync::new(
        role.clone(),
        backends.sync_jobs.clone(),
        backends.notifier.clone(),
        backends.wake.clone(),
    ));
    let runner = JobRunner::new(
        config.clone(),
        role.clone(),
        backends.tasks.clone(),
        HandlerRegistry::new(backends.storage.clone()),
        fanout,
        backends.wake.clone(),
    );
    let dispatcher = SyncDispatcher::new(
        config.clone(),
        role.clone(),
        backends.tenants.clone(),
        backends.sync_jobs.clone(),
        backends.peer.clone(),
    );
    let receiver = SyncReceiver::new(
        config.clone(),
        role.clone(),
        backends.tenants.clone(),
        backends.documents.clone(),
        backends.storage.clone(),
        backends.audits.clone(),
        backends.notifier.clone(),
        backends.peer.clone(),
        Arc::new(SystemResolver),
    );

    let (seed, bootstrap) = match config.mode {
        edumesh_core::Mode::Hub => (
            Some(SeedService::new(
                config.clone(),
                backends.tenants.clone(),
                backends.documents.clone(),
                backends.storage.clone(),
                backends.tasks.clone(),
                backends.sync_jobs.clone(),
            )),
            None,
        ),
        edumesh_core::Mode::Satellite => (
            None,
            Some(SatelliteBootstrap::new(
                config.clone(),
                backends.tenants.clone(),
                backends.documents.clone(),
                backends.storage.clone(),
                backends.peer.clone(),
            )),
        ),
    };

    let engine = Engine::new(
        config.clone(),
        runner.clone(),
        dispatcher,
        backends.wake.clone(),
    );

    Ok(AppServices {
        config,
        signer,
        documents: backends.documents,
        receiver,
        seed,
        bootstrap,
        runner,
        engine,
    })
}
