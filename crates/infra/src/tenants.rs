//! Tenant registry.
//!
//! On the hub this holds one row per tenant plus the hub's own row; a
//! satellite deployment holds only its primary tenant. Satellite
//! connection material (URL, pinned IP, API key) lives here too.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use edumesh_core::{SeedingId, TenantId};

use crate::store::StoreError;

/// Lifecycle of a satellite link.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SatelliteStatus {
    /// Seeding started, satellite not yet confirmed.
    Initializing,
    /// Seed completed, satellite receives sync deliveries.
    Ready,
    /// Seed failed on the satellite side.
    InitFail,
}

/// One seeding handshake, recorded on the tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedingRecord {
    pub id: SeedingId,
    /// Resolved satellite address at seed time, pinned for later syncs.
    pub ip: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
}

impl SeedingRecord {
    pub fn started(ip: Option<String>) -> Self {
        Self {
            id: SeedingId::new(),
            ip,
            started_at: Utc::now(),
            completed_at: None,
            result: None,
        }
    }
}

/// A tenant row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRecord {
    pub id: TenantId,
    pub name: String,
    /// True for the deployment's own tenant.
    pub primary: bool,
    /// Shared secret for the sync channel. Present once registered.
    pub api_key: Option<String>,
    pub satellite_url: Option<String>,
    /// IP the satellite URL resolved to when last verified.
    pub satellite_ip: Option<String>,
    pub satellite_status: Option<SatelliteStatus>,
    pub seedings: Vec<SeedingRecord>,
}

impl TenantRecord {
    pub fn new(id: TenantId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            primary: false,
            api_key: None,
            satellite_url: None,
            satellite_ip: None,
            satellite_status: None,
            seedings: Vec::new(),
        }
    }

    pub fn as_primary(mut self) -> Self {
        self.primary = true;
        self
    }

    /// Registered and confirmed, so sync deliveries may target it.
    pub fn is_ready_satellite(&self) -> bool {
        self.satellite_status == Some(SatelliteStatus::Ready)
            && self.api_key.is_some()
            && self.satellite_url.is_some()
    }

    /// The most recent seeding handshake, if any.
    pub fn latest_seeding(&self) -> Option<&SeedingRecord> {
        self.seedings.last()
    }
}

/// Tenant registry abstraction.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn get(&self, id: TenantId) -> Result<Option<TenantRecord>, StoreError>;

    /// The deployment's own tenant.
    async fn find_primary(&self) -> Result<Option<TenantRecord>, StoreError>;

    /// Tenants with a confirmed satellite link.
    async fn list_ready_satellites(&self) -> Result<Vec<TenantRecord>, StoreError>;

    /// Insert or replace a tenant row.
    async fn upsert(&self, record: TenantRecord) -> Result<(), StoreError>;

    /// Register a satellite and open a seeding handshake: stores the
    /// connection material, appends the seeding record, and flips the
    /// status to `INITIALIZING`.
    async fn begin_seeding(
        &self,
        id: TenantId,
        api_key: String,
        url: String,
        seeding: SeedingRecord,
    ) -> Result<(), StoreError>;

    /// Close the seeding handshake matching `seeding_id` and set the
    /// link status accordingly.
    async fn complete_seeding(
        &self,
        id: TenantId,
        seeding_id: SeedingId,
        result: String,
        status: SatelliteStatus,
    ) -> Result<TenantRecord, StoreError>;

    /// Update the pinned satellite IP after a verified drift.
    async fn set_satellite_ip(&self, id: TenantId, ip: String) -> Result<(), StoreError>;
}

/// In-memory tenant registry for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryTenantStore {
    tenants: RwLock<HashMap<TenantId, TenantRecord>>,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn with_tenants(tenants: impl IntoIterator<Item = TenantRecord>) -> Arc<Self> {
        let store = Self::new();
        {
            let mut map = store.tenants.write().unwrap();
            for t in tenants {
                map.insert(t.id, t);
            }
        }
        Arc::new(store)
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn get(&self, id: TenantId) -> Result<Option<TenantRecord>, StoreError> {
        let tenants = self.tenants.read().unwrap();
        Ok(tenants.get(&id).cloned())
    }

    async fn find_primary(&self) -> Result<Option<TenantRecord>, StoreError> {
        let tenants = self.tenants.read().unwrap();
        Ok(tenants.values().find(|t| t.primary).cloned())
    }

    async fn list_ready_satellites(&self) -> Result<Vec<TenantRecord>, StoreError> {
        let tenants = self.tenants.read().unwrap();
        let mut out: Vec<_> = tenants
            .values()
            .filter(|t| t.is_ready_satellite())
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn upsert(&self, record: TenantRecord) -> Result<(), StoreError> {
        let mut tenants = self.tenants.write().unwrap();
        tenants.insert(record.id, record);
        Ok(())
    }

    async fn begin_seeding(
        &self,
        id: TenantId,
        api_key: String,
        url: String,
        seeding: SeedingRecord,
    ) -> Result<(), StoreError> {
        let mut tenants = self.tenants.write().unwrap();
        let tenant = tenants
            .get_mut(&id)
            .ok_or_else(|| StoreError::Storage(format!("tenant not found: {id}")))?;
        tenant.api_key = Some(api_key);
        tenant.satellite_url = Some(url);
        tenant.satellite_ip = seeding.ip.clone();
        tenant.satellite_status = Some(SatelliteStatus::Initializing);
        tenant.seedings.push(seeding);
        Ok(())
    }

    async fn complete_seeding(
        &self,
        id: TenantId,
        seeding_id: SeedingId,
        result: String,
        status: SatelliteStatus,
    ) -> Result<TenantRecord, StoreError> {
        let mut tenants = self.tenants.write().unwrap();
        let tenant = tenants
            .get_mut(&id)
            .ok_or_else(|| StoreError::Storage(format!("tenant not found: {id}")))?;
        let seeding = tenant
            .seedings
            .iter_mut()
            .find(|s| s.id == seeding_id)
            .ok_or_else(|| StoreError::Storage(format!("seeding not found: {seeding_id}")))?;
        seeding.completed_at = Some(Utc::now());
        seeding.result = Some(result);
        tenant.satellite_status = Some(status);
        Ok(tenant.clone())
    }

    async fn set_satellite_ip(&self, id: TenantId, ip: String) -> Result<(), StoreError> {
        let mut tenants = self.tenants.write().unwrap();
        let tenant = tenants
            .get_mut(&id)
            .ok_or_else(|| StoreError::Storage(format!("tenant not found: {id}")))?;
        tenant.satellite_ip = Some(ip);
        Ok(())
    }
}
