//! Engine service loop.
//!
//! One long-lived loop drives the runner and dispatcher: wake signals
//! trigger the matching component immediately, and a safety-net poll
//! catches anything a lost signal would leave behind.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use edumesh_infra::{WakeChannel, WakeSignal};

use crate::config::EngineConfig;
use crate::dispatcher::SyncDispatcher;
use crate::runner::JobRunner;

pub struct Engine {
    config: EngineConfig,
    runner: Arc<JobRunner>,
    dispatcher: Arc<SyncDispatcher>,
    wake: Arc<dyn WakeChannel>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        runner: Arc<JobRunner>,
        dispatcher: Arc<SyncDispatcher>,
        wake: Arc<dyn WakeChannel>,
    ) -> Arc<Self> {
        Arc::new(Self { config, runner, dispatcher, wake })
    }

    /// Drive the engine until the process stops. Recovers interrupted
    /// work first, then alternates between wake signals and the poll.
    pub async fn run(self: Arc<Self>) {
        match self.runner.recover().await {
            Ok(0) => {}
            Ok(requeued) => info!(requeued, "requeued interrupted tasks"),
            Err(e) => error!(error = %e, "task recovery failed"),
        }

        let mut wakes = Some(self.wake.subscribe());
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let signal = async {
                match wakes.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                signal = signal => match signal {
                    Some(WakeSignal::Task { .. }) => self.runner.tick().await,
                    Some(WakeSignal::Sync { tenant_id }) => {
                        if let Err(e) = self.dispatcher.sync(tenant_id).await {
                            error!(tenant = %tenant_id, error = %e, "wake-triggered sync failed");
                        }
                    }
                    None => {
                        warn!("wake channel closed, falling back to polling");
                        wakes = None;
                    }
                },
                _ = poll.tick() => {
                    self.runner.tick().await;
                    self.dispatcher.sync_all().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use edumesh_core::BuildVersion;
    use edumesh_infra::{
        InMemoryStorage, InMemorySyncJobStore, InMemoryTaskStore, InMemoryTenantStore,
        InProcessWake, ObjectStorage, RecordingNotifier, TaskStore,
    };
    use edumesh_replication::wire::{
        CodeResponse, SeedCompleteRequest, SeedRequest, SyncRequest, SyncResponse,
    };
    use edumesh_replication::{Task, TaskKind, TaskStatus};
    use serde_json::Value;

    use crate::handlers::HandlerRegistry;
    use crate::notify_sync::NotifySync;
    use crate::roles::{SyncDestination, role_from_config};
    use crate::transport::{PeerClient, TransportError};

    use super::*;

    struct UnreachablePeer;

    #[async_trait]
    impl PeerClient for UnreachablePeer {
        async fn deliver_sync(
            &self,
            _d: &SyncDestination,
            _r: &SyncRequest,
        ) -> Result<SyncResponse, TransportError> {
            Err(TransportError::Http("unreachable".into()))
        }
        async fn seed_request(&self, _h: &str, _r: &SeedRequest) -> Result<Value, TransportError> {
            Err(TransportError::Http("unreachable".into()))
        }
        async fn seed_complete(
            &self,
            _h: &str,
            _r: &SeedCompleteRequest,
        ) -> Result<CodeResponse, TransportError> {
            Err(TransportError::Http("unreachable".into()))
        }
        async fn fetch_contents(
            &self,
            _b: &str,
            _t: &str,
            _a: Option<&str>,
        ) -> Result<Vec<Value>, TransportError> {
            Err(TransportError::Http("unreachable".into()))
        }
        async fn fetch_seed(
            &self,
            _h: &str,
            _s: edumesh_core::SeedingId,
            _a: &str,
        ) -> Result<Vec<u8>, TransportError> {
            Err(TransportError::Http("unreachable".into()))
        }
        async fn fetch_object(&self, _u: &str) -> Result<Vec<u8>, TransportError> {
            Err(TransportError::Http("unreachable".into()))
        }
    }

    #[tokio::test]
    async fn wake_signal_drains_the_queue() {
        let config = EngineConfig::hub(BuildVersion::new(1, 0, 0), "secret");
        let role = role_from_config(&config).unwrap();
        let tasks = InMemoryTaskStore::arc();
        let storage = InMemoryStorage::arc("http://hub.local:9000");
        let sync_jobs = InMemorySyncJobStore::arc();
        let wake = InProcessWake::arc();
        let fanout = Arc::new(NotifySync::new(
            role.clone(),
            sync_jobs.clone(),
            RecordingNotifier::arc(),
            wake.clone(),
        ));
        let runner = JobRunner::new(
            config.clone(),
            role.clone(),
            tasks.clone(),
            HandlerRegistry::new(storage.clone()),
            fanout,
            wake.clone(),
        );
        let dispatcher = SyncDispatcher::new(
            config.clone(),
            role,
            InMemoryTenantStore::arc(),
            sync_jobs,
            Arc::new(UnreachablePeer),
        );
        let engine = Engine::new(config, runner.clone(), dispatcher, wake);

        let handle = tokio::spawn(engine.run());
        let url = storage
            .put_object("pub", "tmp/blob.json", vec![1])
            .await
            .unwrap();
        let id = runner.enqueue(Task::new(TaskKind::RemoveObject { url })).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let task = tasks.get(id).await.unwrap().unwrap();
                if task.status == TaskStatus::Completed {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        handle.abort();
    }
}
