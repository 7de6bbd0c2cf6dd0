//! Wire protocol bodies exchanged between hub and satellite.
//!
//! Both sides decode these strictly; anything that fails to parse is a
//! protocol error, never applied partially.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use edumesh_core::{BuildVersion, SeedingId, SyncJobId, TenantId};

use crate::envelope::SyncEnvelope;
use crate::sync_job::NotifyPayload;

/// Response codes shared by all satellite endpoints.
pub const CODE_COMPLETED: &str = "COMPLETED";
pub const CODE_SATELLITE_ERROR: &str = "SATELLITE_ERROR";
pub const CODE_TENANT_ERROR: &str = "TENANT_ERROR";

/// `PATCH /api/satellite/sync` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub api_key: String,
    /// Delivery attempt number on the sender side (1-based on the wire).
    pub attempt: u32,
    pub sync_job_id: SyncJobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<NotifyPayload>,
    pub sync: SyncEnvelope,
    pub tenant_id: TenantId,
    pub timestamp: DateTime<Utc>,
    pub version: BuildVersion,
}

/// `PATCH /api/satellite/sync` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub code: String,
    /// Audit log entry recorded for this delivery.
    pub audit_id: String,
    pub sync_result: Value,
    pub has_sync_error: bool,
}

/// `POST /api/satellite/seedRequest` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedRequest {
    /// Signed satellite token embedding the tenant id.
    pub token: String,
    /// Public URL of the requesting satellite.
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub version: BuildVersion,
    #[serde(default)]
    pub force: bool,
}

/// `POST /api/satellite/seedRequest` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedResponse {
    /// Short-lived bearer for downloading the seed blob.
    pub access_token: String,
    /// Object-storage handle of the uploaded seed blob.
    pub seed: String,
    pub seeding_id: SeedingId,
}

/// `POST /api/satellite/seedComplete` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedCompleteRequest {
    pub seeding_id: SeedingId,
    pub tenant_id: TenantId,
    /// JSON text summarizing per-step outcomes.
    pub result: String,
    pub has_error: bool,
}

/// Minimal `{code}` acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeResponse {
    pub code: String,
}
