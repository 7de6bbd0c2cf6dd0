//! Deployment roles.
//!
//! Everything that differs between a hub and a satellite is answered by
//! a `Role` injected at startup, so mode conditionals do not leak into
//! the protocols.

use std::sync::Arc;

use edumesh_core::Mode;
use edumesh_infra::TenantRecord;
use edumesh_replication::{Collection, TaskKind};

use crate::config::EngineConfig;

/// Where a tenant's outbound sync deliveries go.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncDestination {
    pub url: String,
    pub api_key: String,
}

pub trait Role: Send + Sync {
    fn mode(&self) -> Mode;

    /// Whether this deployment executes tasks of the given kind. Kinds
    /// it does not execute are marked IGNORE, never run.
    fn executes(&self, kind: &TaskKind) -> bool;

    /// Whether inbound bulk writes for this collection are applied
    /// here. A hub never accepts writes to hub-authoritative
    /// collections; a satellite mirrors everything (hub wins).
    fn applies(&self, collection: Collection) -> bool;

    /// Resolve the sync destination for a tenant, if it has one.
    fn destination(&self, tenant: &TenantRecord) -> Option<SyncDestination>;
}

/// Hub deployment: executes every task kind, pushes to each tenant's
/// registered satellite.
pub struct HubRole;

impl Role for HubRole {
    fn mode(&self) -> Mode {
        Mode::Hub
    }

    fn executes(&self, _kind: &TaskKind) -> bool {
        true
    }

    fn applies(&self, collection: Collection) -> bool {
        !collection.hub_authoritative()
    }

    fn destination(&self, tenant: &TenantRecord) -> Option<SyncDestination> {
        if !tenant.is_ready_satellite() {
            return None;
        }
        Some(SyncDestination {
            url: tenant.satellite_url.clone()?,
            api_key: tenant.api_key.clone()?,
        })
    }
}

/// Satellite deployment: skips hub-only task kinds, pushes everything
/// to the one fixed hub.
pub struct SatelliteRole {
    pub hub_url: String,
    pub api_key: String,
}

impl Role for SatelliteRole {
    fn mode(&self) -> Mode {
        Mode::Satellite
    }

    fn executes(&self, kind: &TaskKind) -> bool {
        !kind.hub_only()
    }

    fn applies(&self, _collection: Collection) -> bool {
        true
    }

    fn destination(&self, _tenant: &TenantRecord) -> Option<SyncDestination> {
        Some(SyncDestination {
            url: self.hub_url.clone(),
            api_key: self.api_key.clone(),
        })
    }
}

/// Build the role matching a configuration.
pub fn role_from_config(config: &EngineConfig) -> Option<Arc<dyn Role>> {
    match config.mode {
        Mode::Hub => Some(Arc::new(HubRole)),
        Mode::Satellite => Some(Arc::new(SatelliteRole {
            hub_url: config.hub_url.clone()?,
            api_key: config.hub_api_key.clone()?,
        })),
    }
}
